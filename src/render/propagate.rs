//! Fan-out after a successful render.
//!
//! One hop only: each dependent re-enters the scheduler's admission on its
//! own, so long chains never recurse the call stack and no sibling can starve
//! another.

use uuid::Uuid;

use crate::graph::connections::Connections;
use crate::graph::registry::Registry;

/// Nodes to re-render after `source` completed: every consumer connected by a
/// formal edge, plus every registered node holding `source` as its auxiliary
/// dependency. Each dependent appears exactly once, even when it is both.
pub fn dependents(registry: &Registry, connections: &Connections, source: Uuid) -> Vec<Uuid> {
    let mut out: Vec<Uuid> = Vec::new();
    for path in connections.out_paths(source) {
        if !out.contains(&path.consumer) {
            out.push(path.consumer);
        }
    }
    for node in registry.iter() {
        if node.aux_source == Some(source) && !node.destroyed && !out.contains(&node.id) {
            out.push(node.id);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::node::{Node, NodeKind};

    #[test]
    fn edge_consumers_and_aux_dependents_are_collected_once() {
        let mut registry = Registry::new();
        let mut connections = Connections::new();

        let source = Node::new(NodeKind::Generator, "gen");
        let source_id = source.id;
        registry.register(source);

        // Consumer with both a formal edge and an auxiliary dependency.
        let mut both = Node::new(NodeKind::Single, "both");
        both.aux_source = Some(source_id);
        let both_id = both.id;
        registry.register(both);

        // Pure auxiliary dependent, no edge.
        let mut aux_only = Node::new(NodeKind::Single, "aux");
        aux_only.aux_source = Some(source_id);
        let aux_only_id = aux_only.id;
        registry.register(aux_only);

        connections
            .connect(&registry, both_id, 0, source_id)
            .unwrap();

        let deps = dependents(&registry, &connections, source_id);
        assert_eq!(deps.len(), 2);
        assert_eq!(deps[0], both_id);
        assert!(deps.contains(&aux_only_id));
    }

    #[test]
    fn no_consumers_is_fine() {
        let mut registry = Registry::new();
        let connections = Connections::new();
        let node = Node::new(NodeKind::Generator, "lonely");
        let id = node.id;
        registry.register(node);
        assert!(dependents(&registry, &connections, id).is_empty());
    }
}
