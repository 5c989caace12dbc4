//! CLI command implementations for rag-metrics-exporter.
//!
//! This module provides implementations for all CLI subcommands:
//! - `config`: Configuration file generation
//! - `simulate`: One-shot pipeline run against a fresh registry

pub mod config;
pub mod simulate;

// Re-export command functions
pub use config::command_config;
pub use simulate::command_simulate;
