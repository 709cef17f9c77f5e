use thiserror::Error;
use uuid::Uuid;

use crate::model::node::NodeKind;

/// Rejected topology mutations. All-or-nothing: a rejected call leaves the
/// existing edge set untouched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("cannot connect a node to itself")]
    SelfReference,
    #[error("input slot {slot} is out of range for a {kind} node")]
    InvalidSlot { slot: usize, kind: NodeKind },
    #[error("a {kind} node cannot take part in this connection")]
    WrongNodeCapability { kind: NodeKind },
    #[error("connection would close a cycle")]
    WouldCycle,
    #[error("node {0} not found")]
    UnknownNode(Uuid),
}

/// Admission failures, delivered through a request's completion.
///
/// `Duplicate` is expected traffic (same node/tick already queued) and is kept
/// out of warning-level logs; everything else is logged at warn.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdmissionError {
    #[error("a render for this node is already queued at frame {0}")]
    Duplicate(u64),
    #[error("node is destroyed")]
    NodeDestroyed,
}

/// Opaque failure reported by the render backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("render failed: {0}")]
pub struct RenderError(pub String);

/// Failure delivered through a render request's completion.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error(transparent)]
    Admission(#[from] AdmissionError),
    #[error(transparent)]
    Render(#[from] RenderError),
}

/// A persisted edge that could not be replayed during graph load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdgeFailure {
    pub consumer: Uuid,
    pub slot: usize,
    pub producer: Uuid,
    pub reason: ConnectionError,
}

/// Graph-level load failure.
///
/// `Edges` is an aggregate: every node that decoded cleanly stays registered,
/// the unreplayable edges are reported together.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("invalid graph document: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("graph loaded with {} unreplayable edge(s)", .0.len())]
    Edges(Vec<EdgeFailure>),
}
