//! Subcommand implementations.

pub mod credits;
pub mod reveal;
pub mod serve;
