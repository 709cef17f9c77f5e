pub mod backend;
pub mod engine;
pub mod propagate;
pub mod queuer;
pub mod request;
