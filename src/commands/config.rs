//! Config command implementation.
//!
//! Generates configuration files in various formats.

use std::fs;
use std::path::PathBuf;

use crate::cli::ConfigFormat;
use crate::config::{render_config, Config};

/// Generates configuration files.
pub fn command_config(
    output: Option<PathBuf>,
    format: ConfigFormat,
    commented: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::default();
    let output = output.unwrap_or_else(|| PathBuf::from("rag-metrics-exporter.yaml"));

    let mut content = render_config(&config, &format)?;
    if commented && matches!(format, ConfigFormat::Yaml) {
        content = add_config_comments(content);
    }

    if output.to_string_lossy() == "-" {
        print!("{}", content);
    } else {
        fs::write(&output, content)?;
        println!("✅ Configuration written to: {}", output.display());
    }

    Ok(())
}

/// Adds comments to YAML configuration.
fn add_config_comments(yaml: String) -> String {
    let comments = r#"# RAG Metrics Exporter Configuration
# ==================================
#
# Server Configuration
# --------------------
# bind: "0.0.0.0"                # Bind IP (0.0.0.0 = all interfaces)
# port: 8000                     # HTTP port
# enable_health: true            # Enable /health endpoint
# log_level: "info"              # off, error, warn, info, debug, trace
#
# Pipeline Instrumentation
# ------------------------
# phase_timing: always           # always | on_completion
#                                #   always: a failed phase still records its duration
#                                #   on_completion: only completed phases are recorded
# refresh_interval_seconds: 5    # Background gauge refresh period
# refresh_timeout_ms: 2000       # Max wait for one vector store / queue read
#
# Histogram Buckets
# -----------------
# buckets:
#   query_duration_seconds: [0.1, 0.5, 1, 2, 5]
#   documents_retrieved: [1, 5, 10, 20, 50]
#   retrieval_duration_seconds: [0.05, 0.1, 0.25, 0.5, 1]
#   generation_duration_seconds: [0.5, 1, 2, 5, 10]
#   generated_tokens: [50, 100, 200, 500, 1000]
#
# Simulation
# ----------
# simulation:
#   enabled: true                # Run the background query driver
#   workers: 1                   # Concurrent query loops
#   retrieval_delay_ms: { min: 100, max: 300 }
#   documents: { min: 3, max: 15 }
#   generation_delay_ms: { min: 500, max: 2000 }
#   response_repeats: { min: 5, max: 20 }
#   vector_store_documents: { min: 10000, max: 20000 }
#   embedding_queue: { min: 0, max: 100 }
#   query_interval_ms: { min: 1000, max: 5000 }
#   failure_rate: 0.0            # Probability that a phase fails
#   cache_hit_ratio: 0.3         # Probability that a query counts as a cache hit
#   query: "Sample query"
#
# TLS/SSL Configuration
# ---------------------
# enable_tls: false              # Enable HTTPS (default: false)
# tls_cert_path: null            # Path to TLS certificate (PEM format)
# tls_key_path: null             # Path to TLS private key (PEM format)
"#;

    format!("{comments}\n{yaml}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_config_writes_parseable_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.yaml");
        command_config(Some(path.clone()), ConfigFormat::Yaml, true).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("# RAG Metrics Exporter Configuration"));
        let parsed: Config = serde_yaml::from_str(&content).unwrap();
        assert_eq!(parsed.refresh_interval_seconds, Some(5));
    }
}
