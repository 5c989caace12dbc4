//! CLI arguments and subcommands for rag-metrics-exporter.
//!
//! This module defines the command-line interface structure using the clap library,
//! including all flags, options, and subcommands.

use clap::{Parser, Subcommand, ValueEnum};
use std::net::IpAddr;
use std::path::PathBuf;

/// Log level options for CLI parsing
#[derive(Debug, Clone, ValueEnum)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Configuration format options for output
#[derive(Debug, Clone, ValueEnum)]
pub enum ConfigFormat {
    Yaml,
    Json,
    Toml,
}

/// Main CLI arguments structure
#[derive(Parser, Debug)]
#[command(
    name = "rag-metrics-exporter",
    about = "Prometheus exporter for simulated RAG pipeline metrics",
    long_about = "Prometheus exporter for simulated RAG pipeline metrics.\n\n\
                  Runs a simulated retrieval-augmented-generation pipeline and exposes \
                  query counts, per-phase latencies, retrieved document and generated token \
                  distributions, and vector store gauges on /metrics.",
    version,
    propagate_version = true
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// HTTP listen port
    #[arg(short = 'p', long)]
    pub port: Option<u16>,

    /// Bind to specific interface/IP
    #[arg(long)]
    pub bind: Option<IpAddr>,

    /// Log level (overrides log_level from the config file)
    #[arg(long, value_enum)]
    pub log_level: Option<LogLevel>,

    /// Config file (YAML/JSON/TOML)
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// Disable all config file loading
    #[arg(long)]
    pub no_config: bool,

    /// Print effective merged config and exit
    #[arg(long)]
    pub show_config: bool,

    /// Output format for --show-config
    #[arg(long, value_enum, default_value = "yaml")]
    pub config_format: ConfigFormat,

    /// Validate config and exit (return code 1 on error)
    #[arg(long)]
    pub check_config: bool,

    /// Disable /health endpoint
    #[arg(long)]
    pub disable_health: bool,

    /// Seconds between background gauge refreshes
    #[arg(long)]
    pub refresh_interval: Option<u64>,

    /// Do not run the background query driver
    #[arg(long)]
    pub no_simulation: bool,

    /// Number of concurrent simulated query loops
    #[arg(long)]
    pub workers: Option<usize>,

    /// Probability (0.0-1.0) that a simulated phase fails
    #[arg(long)]
    pub failure_rate: Option<f64>,

    /// Enable TLS/SSL for HTTPS
    #[arg(long)]
    pub enable_tls: bool,

    /// Path to TLS certificate file (PEM format)
    #[arg(long)]
    pub tls_cert: Option<PathBuf>,

    /// Path to TLS private key file (PEM format)
    #[arg(long)]
    pub tls_key: Option<PathBuf>,
}

/// Subcommands for additional functionality
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Generate configuration files
    Config {
        /// Output file path ("-" for stdout)
        #[arg(short = 'o', long)]
        output: Option<PathBuf>,

        /// Output format
        #[arg(long, value_enum, default_value = "yaml")]
        format: ConfigFormat,

        /// Include comments and examples
        #[arg(long)]
        commented: bool,
    },

    /// Run simulated queries against a fresh registry and print the metrics
    Simulate {
        /// Number of queries to run
        #[arg(short = 'n', long, default_value_t = 5)]
        iterations: usize,

        /// Skip the simulated delays
        #[arg(long)]
        fast: bool,

        /// Print per-query results
        #[arg(long)]
        verbose: bool,
    },
}
