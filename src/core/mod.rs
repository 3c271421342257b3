pub mod error;
pub mod config;
pub mod types;
pub mod dn;
pub mod backend;
