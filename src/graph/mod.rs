pub mod connections;
pub mod registry;
