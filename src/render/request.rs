//! Render requests and their completions.

use std::fmt;

use uuid::Uuid;

use crate::error::EngineError;
use crate::model::frame::Frame;

/// Invoked exactly once with the outcome of the render that answered the
/// request (which may be a merged follow-up render, see the queuer).
pub type RenderCompletion = Box<dyn FnOnce(Result<RenderResponse, EngineError>) + Send>;

/// What a completed render hands to every waiting completion.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RenderResponse {
    pub frame: Frame,
    /// Tick of the request the render was admitted for.
    pub frame_index: u64,
}

/// Provenance of a propagated request: the upstream completion that caused it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Cause {
    pub node: Uuid,
    pub frame_index: u64,
}

/// One request for a node to render.
///
/// `frame_index` is the scheduler tick captured at submit time; it orders and
/// merges requests but never identifies them.
pub struct RenderRequest {
    pub frame_index: u64,
    pub completions: Vec<RenderCompletion>,
    pub caused_by: Option<Cause>,
}

impl RenderRequest {
    pub fn new(frame_index: u64) -> Self {
        Self {
            frame_index,
            completions: Vec::new(),
            caused_by: None,
        }
    }

    pub fn with_completion(frame_index: u64, completion: RenderCompletion) -> Self {
        Self {
            frame_index,
            completions: vec![completion],
            caused_by: None,
        }
    }

    pub fn caused_by(frame_index: u64, cause: Cause) -> Self {
        Self {
            frame_index,
            completions: Vec::new(),
            caused_by: Some(cause),
        }
    }

    /// Fail every completion of this request with clones of one error.
    pub fn fail(self, error: EngineError) {
        for completion in self.completions {
            completion(Err(error.clone()));
        }
    }
}

impl fmt::Debug for RenderRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderRequest")
            .field("frame_index", &self.frame_index)
            .field("completions", &self.completions.len())
            .field("caused_by", &self.caused_by)
            .finish()
    }
}
