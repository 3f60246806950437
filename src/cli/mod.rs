//! CLI command handlers

pub mod agents;
pub mod check;
pub mod recompute;
pub mod serve;
pub mod status;
