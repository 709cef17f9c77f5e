//! Process-wide set of live nodes.
//!
//! The registry is the arena: nodes live here and everything else refers to
//! them by id. It is passed explicitly to the components that need it.

use std::collections::HashMap;

use uuid::Uuid;

use crate::model::node::Node;

#[derive(Default)]
pub struct Registry {
    nodes: HashMap<Uuid, Node>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node. Replaces any node already registered under the same id.
    pub fn register(&mut self, node: Node) -> Option<Node> {
        self.nodes.insert(node.id, node)
    }

    /// Remove a node. Idempotent: unregistering an absent id is a no-op.
    pub fn unregister(&mut self, id: Uuid) -> Option<Node> {
        self.nodes.remove(&id)
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn get(&self, id: Uuid) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn get_mut(&mut self, id: Uuid) -> Option<&mut Node> {
        self.nodes.get_mut(&id)
    }

    /// Iterate all live nodes, for global queries such as the auxiliary
    /// dependency scan.
    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn ids(&self) -> Vec<Uuid> {
        self.nodes.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::node::NodeKind;

    #[test]
    fn register_and_unregister() {
        let mut registry = Registry::new();
        let node = Node::new(NodeKind::Generator, "gen");
        let id = node.id;

        assert!(registry.register(node).is_none());
        assert!(registry.contains(id));
        assert_eq!(registry.len(), 1);

        let removed = registry.unregister(id);
        assert_eq!(removed.map(|n| n.id), Some(id));
        assert!(registry.is_empty());

        // Unregistering again is a no-op, not an error.
        assert!(registry.unregister(id).is_none());
    }

    #[test]
    fn iteration_sees_all_nodes() {
        let mut registry = Registry::new();
        for i in 0..4 {
            registry.register(Node::new(NodeKind::Single, &format!("fx{i}")));
        }
        assert_eq!(registry.iter().count(), 4);
        assert_eq!(registry.ids().len(), 4);
    }
}
