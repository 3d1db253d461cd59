//! Side-effecting boundary: the shared store, on-disk config, workspace
//! initialization, and the enforcer that applies blocking rules.

pub mod config;
pub mod enforcer;
pub mod init;
pub mod store;
