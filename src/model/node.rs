//! Node state for the compositing graph.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::model::frame::{Frame, Resolution};
use crate::model::modes::Sampling;

/// Node kinds, a closed set. The kind decides the input arity class and is
/// the `typeKind` tag in the persisted record.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    /// No inputs, explicit resolution.
    Generator,
    /// One input slot.
    Single,
    /// Two fixed slots (A at 0, B at 1).
    Merger,
    /// N ordered slots, replaced wholesale via `connect_multi`.
    Multi,
    /// One input slot, no output; terminal consumer.
    Output,
}

/// Input arity class of a node kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InputArity {
    None,
    Fixed(usize),
    Variadic,
}

impl NodeKind {
    pub fn input_arity(self) -> InputArity {
        match self {
            NodeKind::Generator => InputArity::None,
            NodeKind::Single | NodeKind::Output => InputArity::Fixed(1),
            NodeKind::Merger => InputArity::Fixed(2),
            NodeKind::Multi => InputArity::Variadic,
        }
    }

    /// Whether nodes of this kind produce a frame other nodes may consume.
    pub fn has_output(self) -> bool {
        !matches!(self, NodeKind::Output)
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            NodeKind::Generator => "generator",
            NodeKind::Single => "single",
            NodeKind::Merger => "merger",
            NodeKind::Multi => "multi",
            NodeKind::Output => "output",
        };
        write!(f, "{tag}")
    }
}

/// One entry of a node's opaque live-property list.
///
/// The graph stores and persists these verbatim; only the parameter-binding
/// layer (and the render backend) interpret payloads. Entries with a
/// `type_tag` this build does not recognize are dropped on decode.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Attribute {
    pub type_tag: String,
    pub payload: Value,
}

impl Attribute {
    pub fn new(type_tag: &str, payload: Value) -> Self {
        Self {
            type_tag: type_tag.to_string(),
            payload,
        }
    }
}

pub type NextFrameHook = Box<dyn FnOnce() + Send>;
pub type ConnectionsHook = Arc<dyn Fn() + Send + Sync>;

/// A vertex of the compositing graph.
///
/// Nodes hold no references to each other; edges live in
/// [`Connections`](crate::graph::connections::Connections) keyed by id.
pub struct Node {
    pub id: Uuid,
    pub name: String,
    pub kind: NodeKind,
    /// When true the node's effective output is its first input's frame and
    /// renders are not admitted.
    pub bypass: bool,
    pub sampling: Sampling,
    pub attributes: Vec<Attribute>,
    /// Auxiliary dependency: re-render this node whenever the named node
    /// completes a render, without a formal edge.
    pub aux_source: Option<Uuid>,
    /// Completed-render counter, for staleness checks.
    pub render_index: u64,
    pub destroyed: bool,
    resolution: Option<Resolution>,
    current_frame: Option<Frame>,
    next_frame_hook: Option<NextFrameHook>,
    connections_hook: Option<ConnectionsHook>,
}

impl Node {
    pub fn new(kind: NodeKind, name: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            kind,
            bypass: false,
            sampling: Sampling::default(),
            attributes: Vec::new(),
            aux_source: None,
            render_index: 0,
            destroyed: false,
            resolution: None,
            current_frame: None,
            next_frame_hook: None,
            connections_hook: None,
        }
    }

    pub fn resolution(&self) -> Option<Resolution> {
        self.resolution
    }

    pub fn set_resolution(&mut self, resolution: Option<Resolution>) {
        self.resolution = resolution;
    }

    pub fn current_frame(&self) -> Option<&Frame> {
        self.current_frame.as_ref()
    }

    /// Whether this node has ever produced a frame.
    pub fn did_render_frame(&self) -> bool {
        self.current_frame.is_some()
    }

    /// Store a newly rendered frame.
    ///
    /// Returns the armed one-shot frame hook, if any, for the caller to invoke
    /// outside the graph lock. The hook slot is cleared either way.
    #[must_use]
    pub fn set_current_frame(&mut self, frame: Frame) -> Option<NextFrameHook> {
        self.current_frame = Some(frame);
        self.next_frame_hook.take()
    }

    pub fn clear_frame(&mut self) {
        self.current_frame = None;
    }

    /// Arm the one-shot "frame became available" callback. A later call
    /// replaces an earlier one that has not fired yet.
    pub fn on_next_frame(&mut self, hook: NextFrameHook) {
        self.next_frame_hook = Some(hook);
    }

    pub fn set_connections_hook(&mut self, hook: ConnectionsHook) {
        self.connections_hook = Some(hook);
    }

    pub fn connections_hook(&self) -> Option<ConnectionsHook> {
        self.connections_hook.clone()
    }

    /// Upsert one live property by tag.
    pub fn set_attribute(&mut self, attribute: Attribute) {
        match self
            .attributes
            .iter_mut()
            .find(|a| a.type_tag == attribute.type_tag)
        {
            Some(slot) => *slot = attribute,
            None => self.attributes.push(attribute),
        }
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("bypass", &self.bypass)
            .field("resolution", &self.resolution)
            .field("render_index", &self.render_index)
            .field("destroyed", &self.destroyed)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn arity_per_kind() {
        assert_eq!(NodeKind::Generator.input_arity(), InputArity::None);
        assert_eq!(NodeKind::Single.input_arity(), InputArity::Fixed(1));
        assert_eq!(NodeKind::Merger.input_arity(), InputArity::Fixed(2));
        assert_eq!(NodeKind::Multi.input_arity(), InputArity::Variadic);
        assert_eq!(NodeKind::Output.input_arity(), InputArity::Fixed(1));
        assert!(!NodeKind::Output.has_output());
        assert!(NodeKind::Generator.has_output());
    }

    #[test]
    fn next_frame_hook_is_one_shot() {
        let fired = Arc::new(AtomicUsize::new(0));
        let mut node = Node::new(NodeKind::Generator, "gen");
        let counter = Arc::clone(&fired);
        node.on_next_frame(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        let hook = node.set_current_frame(Frame::new(1, 1, vec![0; 4]));
        hook.expect("hook should be armed")();
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        // Next frame: the slot was cleared with the invocation.
        assert!(node.set_current_frame(Frame::new(1, 1, vec![0; 4])).is_none());
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(node.render_index, 0);
        assert!(node.did_render_frame());
    }

    #[test]
    fn set_attribute_upserts_by_tag() {
        let mut node = Node::new(NodeKind::Generator, "gen");
        node.set_attribute(Attribute::new("color", serde_json::json!([1, 1, 1, 1])));
        node.set_attribute(Attribute::new("color", serde_json::json!([0, 0, 0, 1])));
        node.set_attribute(Attribute::new("opacity", serde_json::json!(0.5)));
        assert_eq!(node.attributes.len(), 2);
        assert_eq!(node.attributes[0].payload, serde_json::json!([0, 0, 0, 1]));
    }
}
