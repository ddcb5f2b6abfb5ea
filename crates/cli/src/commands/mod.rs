//! Subcommand implementations

pub mod alerts;
pub mod config;
pub mod reports;
pub mod status;
