//! CLI command implementations.

pub mod action;
pub mod hook;
pub mod plan;
pub mod version;
