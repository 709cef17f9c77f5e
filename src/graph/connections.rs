//! Directed, slotted edges between nodes.
//!
//! Edges are owned here, not by the nodes: the forward input list of every
//! consumer and the back-references of every producer are two views over the
//! same edge set, reconciled on every mutation. Nodes only ever appear as ids.

use std::collections::{HashMap, HashSet, VecDeque};

use uuid::Uuid;

use crate::error::ConnectionError;
use crate::graph::registry::Registry;
use crate::model::node::InputArity;
use crate::model::record::EdgeRecord;

/// Back-reference held for a producer: which consumer reads it, at which slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OutPath {
    pub consumer: Uuid,
    pub slot: usize,
}

/// Result of a successful `connect`.
#[derive(Debug, PartialEq, Eq)]
pub struct ConnectOutcome {
    /// Producer that previously occupied the slot, if any.
    pub replaced: Option<Uuid>,
}

#[derive(Default)]
pub struct Connections {
    inputs: HashMap<Uuid, Vec<Option<Uuid>>>,
    outputs: HashMap<Uuid, Vec<OutPath>>,
}

impl Connections {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `producer` at `slot` of `consumer`, replacing any prior edge
    /// occupying that slot. Rejected calls leave the edge set untouched.
    pub fn connect(
        &mut self,
        registry: &Registry,
        consumer: Uuid,
        slot: usize,
        producer: Uuid,
    ) -> Result<ConnectOutcome, ConnectionError> {
        self.validate(registry, consumer, slot, producer)?;

        let slots = self.slots_for(registry, consumer);
        if slot == slots.len() {
            // Variadic consumers grow one slot at a time.
            slots.push(None);
        }
        let replaced = slots[slot].replace(producer);

        if let Some(old) = replaced {
            self.drop_out_path(old, consumer, slot);
        }
        self.outputs
            .entry(producer)
            .or_default()
            .push(OutPath { consumer, slot });

        Ok(ConnectOutcome { replaced })
    }

    /// Remove the edge at `slot` of `consumer`. Returns the producer that was
    /// connected there, or `None` if the slot was already empty.
    pub fn disconnect(
        &mut self,
        registry: &Registry,
        consumer: Uuid,
        slot: usize,
    ) -> Result<Option<Uuid>, ConnectionError> {
        let node = registry
            .get(consumer)
            .ok_or(ConnectionError::UnknownNode(consumer))?;
        match node.kind.input_arity() {
            InputArity::None => {
                return Err(ConnectionError::WrongNodeCapability { kind: node.kind });
            }
            InputArity::Fixed(arity) if slot >= arity => {
                return Err(ConnectionError::InvalidSlot {
                    slot,
                    kind: node.kind,
                });
            }
            _ => {}
        }

        let removed = self
            .inputs
            .get_mut(&consumer)
            .and_then(|slots| slots.get_mut(slot))
            .and_then(|entry| entry.take());
        if let Some(producer) = removed {
            self.drop_out_path(producer, consumer, slot);
        }
        Ok(removed)
    }

    /// Atomically replace the full input list of a multi-input consumer.
    ///
    /// Back-references are reconciled (dropped from producers no longer
    /// present, added for new ones at their new index) in one step; validation
    /// happens entirely before any mutation.
    pub fn connect_multi(
        &mut self,
        registry: &Registry,
        consumer: Uuid,
        producers: &[Uuid],
    ) -> Result<(), ConnectionError> {
        let node = registry
            .get(consumer)
            .ok_or(ConnectionError::UnknownNode(consumer))?;
        if node.kind.input_arity() != InputArity::Variadic {
            return Err(ConnectionError::WrongNodeCapability { kind: node.kind });
        }
        for &producer in producers {
            let producer_node = registry
                .get(producer)
                .ok_or(ConnectionError::UnknownNode(producer))?;
            if producer == consumer {
                return Err(ConnectionError::SelfReference);
            }
            if !producer_node.kind.has_output() {
                return Err(ConnectionError::WrongNodeCapability {
                    kind: producer_node.kind,
                });
            }
            if self.reaches(consumer, producer) {
                return Err(ConnectionError::WouldCycle);
            }
        }

        let old = self.inputs.insert(
            consumer,
            producers.iter().copied().map(Some).collect(),
        );
        for producer in old.into_iter().flatten().flatten() {
            if let Some(paths) = self.outputs.get_mut(&producer) {
                paths.retain(|p| p.consumer != consumer);
            }
        }
        for (slot, &producer) in producers.iter().enumerate() {
            self.outputs
                .entry(producer)
                .or_default()
                .push(OutPath { consumer, slot });
        }
        Ok(())
    }

    /// Remove every edge referencing `id`, as producer and as consumer.
    /// Returns the consumers that lost an input, for downstream cleanup.
    pub fn remove_node(&mut self, id: Uuid) -> Vec<Uuid> {
        let mut affected = Vec::new();
        for path in self.outputs.remove(&id).unwrap_or_default() {
            if let Some(entry) = self
                .inputs
                .get_mut(&path.consumer)
                .and_then(|slots| slots.get_mut(path.slot))
            {
                *entry = None;
            }
            if !affected.contains(&path.consumer) {
                affected.push(path.consumer);
            }
        }
        for producer in self.inputs.remove(&id).into_iter().flatten().flatten() {
            if let Some(paths) = self.outputs.get_mut(&producer) {
                paths.retain(|p| p.consumer != id);
            }
        }
        affected
    }

    pub fn input_list(&self, consumer: Uuid) -> &[Option<Uuid>] {
        self.inputs
            .get(&consumer)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn first_input(&self, consumer: Uuid) -> Option<Uuid> {
        self.input_list(consumer).iter().copied().flatten().next()
    }

    pub fn has_inputs(&self, consumer: Uuid) -> bool {
        self.first_input(consumer).is_some()
    }

    pub fn out_paths(&self, producer: Uuid) -> &[OutPath] {
        self.outputs
            .get(&producer)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// All edges as persisted triples, sorted for stable output.
    pub fn edge_list(&self) -> Vec<EdgeRecord> {
        let mut edges: Vec<EdgeRecord> = self
            .inputs
            .iter()
            .flat_map(|(&consumer, slots)| {
                slots.iter().enumerate().filter_map(move |(slot, entry)| {
                    entry.map(|producer| EdgeRecord {
                        consumer,
                        slot,
                        producer,
                    })
                })
            })
            .collect();
        edges.sort_by_key(|e| (e.consumer, e.slot));
        edges
    }

    fn validate(
        &self,
        registry: &Registry,
        consumer: Uuid,
        slot: usize,
        producer: Uuid,
    ) -> Result<(), ConnectionError> {
        let consumer_node = registry
            .get(consumer)
            .ok_or(ConnectionError::UnknownNode(consumer))?;
        let producer_node = registry
            .get(producer)
            .ok_or(ConnectionError::UnknownNode(producer))?;

        if consumer == producer {
            return Err(ConnectionError::SelfReference);
        }
        match consumer_node.kind.input_arity() {
            InputArity::None => {
                return Err(ConnectionError::WrongNodeCapability {
                    kind: consumer_node.kind,
                });
            }
            InputArity::Fixed(arity) => {
                if slot >= arity {
                    return Err(ConnectionError::InvalidSlot {
                        slot,
                        kind: consumer_node.kind,
                    });
                }
            }
            InputArity::Variadic => {
                if slot > self.input_list(consumer).len() {
                    return Err(ConnectionError::InvalidSlot {
                        slot,
                        kind: consumer_node.kind,
                    });
                }
            }
        }
        if !producer_node.kind.has_output() {
            return Err(ConnectionError::WrongNodeCapability {
                kind: producer_node.kind,
            });
        }
        // Closing the cycle at this edge: reject if the consumer already
        // reaches the producer downstream.
        if self.reaches(consumer, producer) {
            return Err(ConnectionError::WouldCycle);
        }
        Ok(())
    }

    /// BFS over forward edges: can `from` reach `to`?
    fn reaches(&self, from: Uuid, to: Uuid) -> bool {
        let mut visited = HashSet::new();
        let mut queue = VecDeque::new();
        queue.push_back(from);
        while let Some(current) = queue.pop_front() {
            if current == to {
                return true;
            }
            if !visited.insert(current) {
                continue;
            }
            for path in self.out_paths(current) {
                queue.push_back(path.consumer);
            }
        }
        false
    }

    fn slots_for(&mut self, registry: &Registry, consumer: Uuid) -> &mut Vec<Option<Uuid>> {
        let arity = registry
            .get(consumer)
            .map(|n| n.kind.input_arity())
            .unwrap_or(InputArity::Variadic);
        self.inputs.entry(consumer).or_insert_with(|| match arity {
            InputArity::Fixed(n) => vec![None; n],
            _ => Vec::new(),
        })
    }

    fn drop_out_path(&mut self, producer: Uuid, consumer: Uuid, slot: usize) {
        if let Some(paths) = self.outputs.get_mut(&producer) {
            if let Some(index) = paths
                .iter()
                .position(|p| p.consumer == consumer && p.slot == slot)
            {
                paths.remove(index);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::node::{Node, NodeKind};

    fn registry_with(kinds: &[NodeKind]) -> (Registry, Vec<Uuid>) {
        let mut registry = Registry::new();
        let mut ids = Vec::new();
        for (i, &kind) in kinds.iter().enumerate() {
            let node = Node::new(kind, &format!("n{i}"));
            ids.push(node.id);
            registry.register(node);
        }
        (registry, ids)
    }

    #[test]
    fn rejects_self_connection() {
        let (registry, ids) = registry_with(&[NodeKind::Single]);
        let mut connections = Connections::new();
        let err = connections
            .connect(&registry, ids[0], 0, ids[0])
            .unwrap_err();
        assert_eq!(err, ConnectionError::SelfReference);
    }

    #[test]
    fn rejects_out_of_range_slot() {
        let (registry, ids) = registry_with(&[NodeKind::Merger, NodeKind::Generator]);
        let mut connections = Connections::new();
        let err = connections
            .connect(&registry, ids[0], 2, ids[1])
            .unwrap_err();
        assert_eq!(
            err,
            ConnectionError::InvalidSlot {
                slot: 2,
                kind: NodeKind::Merger
            }
        );
    }

    #[test]
    fn rejects_wrong_capability() {
        let (registry, ids) = registry_with(&[
            NodeKind::Generator,
            NodeKind::Single,
            NodeKind::Output,
        ]);
        let mut connections = Connections::new();
        // A generator takes no inputs.
        assert_eq!(
            connections.connect(&registry, ids[0], 0, ids[1]),
            Err(ConnectionError::WrongNodeCapability {
                kind: NodeKind::Generator
            })
        );
        // An output produces no frame.
        assert_eq!(
            connections.connect(&registry, ids[1], 0, ids[2]),
            Err(ConnectionError::WrongNodeCapability {
                kind: NodeKind::Output
            })
        );
    }

    #[test]
    fn rejects_cycle_closure() {
        let (registry, ids) =
            registry_with(&[NodeKind::Single, NodeKind::Single, NodeKind::Single]);
        let mut connections = Connections::new();
        // a -> b -> c
        connections.connect(&registry, ids[1], 0, ids[0]).unwrap();
        connections.connect(&registry, ids[2], 0, ids[1]).unwrap();
        // c -> a would close a length-3 cycle.
        assert_eq!(
            connections.connect(&registry, ids[0], 0, ids[2]),
            Err(ConnectionError::WouldCycle)
        );
        // Existing topology is untouched by the rejection.
        assert_eq!(connections.first_input(ids[0]), None);
        assert_eq!(connections.edge_list().len(), 2);
    }

    #[test]
    fn connect_replaces_prior_edge_and_back_reference() {
        let (registry, ids) = registry_with(&[
            NodeKind::Single,
            NodeKind::Generator,
            NodeKind::Generator,
        ]);
        let mut connections = Connections::new();

        let outcome = connections.connect(&registry, ids[0], 0, ids[1]).unwrap();
        assert_eq!(outcome.replaced, None);
        let outcome = connections.connect(&registry, ids[0], 0, ids[2]).unwrap();
        assert_eq!(outcome.replaced, Some(ids[1]));

        assert_eq!(connections.first_input(ids[0]), Some(ids[2]));
        assert!(connections.out_paths(ids[1]).is_empty());
        assert_eq!(connections.out_paths(ids[2]).len(), 1);
    }

    #[test]
    fn merger_slots_are_independent() {
        let (registry, ids) = registry_with(&[
            NodeKind::Merger,
            NodeKind::Generator,
            NodeKind::Generator,
        ]);
        let mut connections = Connections::new();
        connections.connect(&registry, ids[0], 1, ids[2]).unwrap();
        assert_eq!(connections.input_list(ids[0]), &[None, Some(ids[2])]);
        connections.connect(&registry, ids[0], 0, ids[1]).unwrap();
        assert_eq!(
            connections.input_list(ids[0]),
            &[Some(ids[1]), Some(ids[2])]
        );
    }

    #[test]
    fn disconnect_removes_edge_and_back_reference() {
        let (registry, ids) = registry_with(&[NodeKind::Single, NodeKind::Generator]);
        let mut connections = Connections::new();
        connections.connect(&registry, ids[0], 0, ids[1]).unwrap();

        let removed = connections.disconnect(&registry, ids[0], 0).unwrap();
        assert_eq!(removed, Some(ids[1]));
        assert!(connections.out_paths(ids[1]).is_empty());
        assert!(!connections.has_inputs(ids[0]));

        // Disconnecting an already-empty slot is not an error.
        assert_eq!(connections.disconnect(&registry, ids[0], 0), Ok(None));
    }

    #[test]
    fn connect_multi_reconciles_back_references() {
        let (registry, ids) = registry_with(&[
            NodeKind::Multi,
            NodeKind::Generator,
            NodeKind::Generator,
            NodeKind::Generator,
        ]);
        let mut connections = Connections::new();
        connections
            .connect_multi(&registry, ids[0], &[ids[1], ids[2]])
            .unwrap();
        connections
            .connect_multi(&registry, ids[0], &[ids[3], ids[1]])
            .unwrap();

        assert_eq!(
            connections.input_list(ids[0]),
            &[Some(ids[3]), Some(ids[1])]
        );
        assert!(connections.out_paths(ids[2]).is_empty());
        assert_eq!(connections.out_paths(ids[3])[0].slot, 0);
        assert_eq!(connections.out_paths(ids[1])[0].slot, 1);
    }

    #[test]
    fn remove_node_clears_both_directions() {
        let (registry, ids) = registry_with(&[
            NodeKind::Generator,
            NodeKind::Single,
            NodeKind::Single,
        ]);
        let mut connections = Connections::new();
        // gen -> fx1 -> fx2
        connections.connect(&registry, ids[1], 0, ids[0]).unwrap();
        connections.connect(&registry, ids[2], 0, ids[1]).unwrap();

        let affected = connections.remove_node(ids[1]);
        assert_eq!(affected, vec![ids[2]]);
        assert!(connections.out_paths(ids[0]).is_empty());
        assert_eq!(connections.first_input(ids[2]), None);
        assert!(connections.edge_list().is_empty());
    }

    #[test]
    fn edge_list_is_stable_and_complete() {
        let (registry, ids) = registry_with(&[
            NodeKind::Merger,
            NodeKind::Generator,
            NodeKind::Generator,
        ]);
        let mut connections = Connections::new();
        connections.connect(&registry, ids[0], 1, ids[2]).unwrap();
        connections.connect(&registry, ids[0], 0, ids[1]).unwrap();

        let edges = connections.edge_list();
        assert_eq!(edges.len(), 2);
        assert_eq!(edges[0].slot, 0);
        assert_eq!(edges[1].slot, 1);
        assert_eq!(edges[0].producer, ids[1]);
    }
}
