pub mod error;
pub mod graph;
pub mod model;
pub mod render;

pub use error::{AdmissionError, ConnectionError, EngineError, LoadError, RenderError};
pub use model::frame::{Frame, Resolution};
pub use model::node::{Attribute, Node, NodeKind};
pub use render::backend::{RenderBackend, RenderHandle, RenderJob, RenderOutcome};
pub use render::engine::Engine;
pub use render::request::RenderResponse;
