//! Subcommand implementations

pub mod detect;
pub mod predict;
pub mod status;
