pub mod frame;
pub mod modes;
pub mod node;
pub mod record;
