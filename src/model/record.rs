//! Persisted graph state.
//!
//! One record per node plus a separate edge list; edges are replayed through
//! the connection layer after all nodes are decoded, so a node record never
//! references graph topology.

use log::debug;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::frame::Resolution;
use crate::model::modes::{Extend, Interpolation, Sampling, ViewInterpolation};
use crate::model::node::{Attribute, Node, NodeKind};

/// Attribute tags this build understands. Anything else found in a persisted
/// record is dropped on decode (forward-compatible, lossy).
pub const KNOWN_ATTRIBUTE_TAGS: &[&str] =
    &["resolution", "color", "background-color", "opacity", "position"];

/// Tag under which a generator's explicit resolution rides the attribute list.
pub const RESOLUTION_TAG: &str = "resolution";

pub fn is_known_attribute(tag: &str) -> bool {
    KNOWN_ATTRIBUTE_TAGS.contains(&tag)
}

/// Persisted shape of a single node. Runtime-only state (`render_index`,
/// current frame, queue state) is deliberately absent.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct NodeRecord {
    pub id: Uuid,
    pub name: String,
    pub type_kind: NodeKind,
    pub bypass: bool,
    pub view_interpolation: ViewInterpolation,
    pub interpolation: Interpolation,
    pub extend: Extend,
    pub mip_filter: u32,
    pub compare_function: u32,
    #[serde(default)]
    pub attributes: Vec<Attribute>,
}

impl NodeRecord {
    pub fn from_node(node: &Node) -> Self {
        let mut attributes = node.attributes.clone();
        if node.kind == NodeKind::Generator {
            if let Some(resolution) = node.resolution() {
                upsert(
                    &mut attributes,
                    Attribute::new(
                        RESOLUTION_TAG,
                        serde_json::to_value(resolution).unwrap_or_default(),
                    ),
                );
            }
        }
        Self {
            id: node.id,
            name: node.name.clone(),
            type_kind: node.kind,
            bypass: node.bypass,
            view_interpolation: node.sampling.view_interpolation,
            interpolation: node.sampling.interpolation,
            extend: node.sampling.extend,
            mip_filter: node.sampling.mip_filter,
            compare_function: node.sampling.compare_function,
            attributes,
        }
    }

    /// Rebuild a node from its record.
    ///
    /// Unrecognized attribute tags are skipped; a generator's resolution is
    /// restored from the attribute list.
    pub fn into_node(self) -> Node {
        let mut node = Node::new(self.type_kind, &self.name);
        node.id = self.id;
        node.bypass = self.bypass;
        node.sampling = Sampling {
            view_interpolation: self.view_interpolation,
            interpolation: self.interpolation,
            extend: self.extend,
            mip_filter: self.mip_filter,
            compare_function: self.compare_function,
        };
        for attribute in self.attributes {
            if !is_known_attribute(&attribute.type_tag) {
                debug!(
                    "Skipping unknown attribute '{}' on node {}",
                    attribute.type_tag, self.name
                );
                continue;
            }
            if attribute.type_tag == RESOLUTION_TAG && node.kind == NodeKind::Generator {
                match serde_json::from_value::<Resolution>(attribute.payload.clone()) {
                    Ok(resolution) => node.set_resolution(Some(resolution)),
                    Err(err) => debug!(
                        "Ignoring malformed resolution on node {}: {}",
                        self.name, err
                    ),
                }
            }
            node.attributes.push(attribute);
        }
        node
    }
}

fn upsert(attributes: &mut Vec<Attribute>, attribute: Attribute) {
    match attributes
        .iter_mut()
        .find(|a| a.type_tag == attribute.type_tag)
    {
        Some(slot) => *slot = attribute,
        None => attributes.push(attribute),
    }
}

/// One persisted edge: `(consumer, slot, producer)`.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct EdgeRecord {
    pub consumer: Uuid,
    pub slot: usize,
    pub producer: Uuid,
}

/// The whole persisted graph.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct GraphRecord {
    #[serde(default)]
    pub nodes: Vec<NodeRecord>,
    #[serde(default)]
    pub edges: Vec<EdgeRecord>,
}

impl GraphRecord {
    pub fn load(json_str: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json_str)
    }

    pub fn save(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_record() -> NodeRecord {
        NodeRecord {
            id: Uuid::new_v4(),
            name: "noise".to_string(),
            type_kind: NodeKind::Generator,
            bypass: false,
            view_interpolation: ViewInterpolation::Linear,
            interpolation: Interpolation::Nearest,
            extend: Extend::Hold,
            mip_filter: 2,
            compare_function: 0,
            attributes: vec![
                Attribute::new(RESOLUTION_TAG, json!({"width": 256, "height": 256})),
                Attribute::new("color", json!([1.0, 0.5, 0.0, 1.0])),
            ],
        }
    }

    #[test]
    fn record_round_trips_through_json() {
        let record = sample_record();
        let json = serde_json::to_string(&record).unwrap();
        let back: NodeRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn node_round_trips_known_attributes() {
        let record = sample_record();
        let node = record.clone().into_node();
        assert_eq!(node.resolution(), Some(Resolution::new(256, 256)));
        assert_eq!(node.sampling.extend, Extend::Hold);
        assert_eq!(NodeRecord::from_node(&node), record);
    }

    #[test]
    fn unknown_attribute_tags_are_dropped() {
        let mut record = sample_record();
        record
            .attributes
            .push(Attribute::new("lens-flare-v2", json!({"amount": 3})));
        let node = record.into_node();
        assert!(
            node.attributes
                .iter()
                .all(|a| a.type_tag != "lens-flare-v2")
        );
        assert_eq!(node.attributes.len(), 2);
    }

    #[test]
    fn type_kind_uses_lowercase_tags() {
        let record = NodeRecord::from_node(&Node::new(NodeKind::Merger, "blend"));
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"type_kind\":\"merger\""));
    }

    #[test]
    fn graph_record_tolerates_missing_sections() {
        let graph = GraphRecord::load("{}").unwrap();
        assert!(graph.nodes.is_empty());
        assert!(graph.edges.is_empty());
    }
}
