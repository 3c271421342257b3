pub mod sequence;
pub mod checker;
pub mod entry_store;
pub mod changelog;
