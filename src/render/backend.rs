//! Interface to the external render execution pipeline.
//!
//! The core never computes a frame itself: it snapshots everything a backend
//! needs into a [`RenderJob`], hands it over together with a [`RenderHandle`],
//! and gets the outcome marshaled back into the graph's single mutation
//! context when the backend calls [`RenderHandle::finish`] — from whatever
//! thread or queue it ran on.

use std::sync::Weak;

use uuid::Uuid;

use crate::error::RenderError;
use crate::model::frame::{Frame, Resolution};
use crate::model::modes::Sampling;
use crate::model::node::{Attribute, NodeKind};
use crate::render::engine::Shared;

/// Everything the execution pipeline gets to see of a node.
#[derive(Debug)]
pub struct RenderJob {
    pub node: Uuid,
    pub node_name: String,
    pub kind: NodeKind,
    /// Tick of the request this render was admitted for.
    pub frame_index: u64,
    /// Cached output resolution; `None` before the first derivation.
    pub resolution: Option<Resolution>,
    pub sampling: Sampling,
    pub attributes: Vec<Attribute>,
    /// Effective frame of each input slot, in slot order. Empty or unconnected
    /// slots are `None`.
    pub inputs: Vec<Option<Frame>>,
}

/// Successful result of a backend execution.
#[derive(Clone, Debug)]
pub struct RenderOutcome {
    pub frame: Frame,
    /// Resolution metadata for the node's derived-resolution cache; `None`
    /// keeps the cached value.
    pub resolution: Option<Resolution>,
}

impl RenderOutcome {
    pub fn new(frame: Frame) -> Self {
        let resolution = Some(frame.resolution());
        Self { frame, resolution }
    }
}

/// The external render execution pipeline.
///
/// `execute` must not block graph mutation: implementations either complete
/// inline or move the work elsewhere and call `finish` later. Exactly one
/// `finish` per job; dropping the handle stalls that node's queue (no timeout
/// is defined at this layer).
pub trait RenderBackend: Send + Sync {
    fn execute(&self, job: RenderJob, handle: RenderHandle);
}

/// Completion token for one in-flight render.
pub struct RenderHandle {
    pub(crate) shared: Weak<Shared>,
    pub(crate) node: Uuid,
    pub(crate) frame_index: u64,
}

impl RenderHandle {
    /// Deliver the outcome back into the graph. A no-op if the engine has
    /// been dropped in the meantime.
    pub fn finish(self, result: Result<RenderOutcome, RenderError>) {
        if let Some(shared) = self.shared.upgrade() {
            crate::render::engine::complete_render(&shared, self.node, self.frame_index, result);
        }
    }
}
