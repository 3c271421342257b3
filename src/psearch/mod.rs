pub mod control;
pub mod registry;
