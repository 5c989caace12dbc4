//! Configuration management for rag-metrics-exporter.
//!
//! This module handles loading, merging, and validating configuration from files
//! and CLI arguments. It supports YAML, JSON, and TOML formats.

use rag_metrics_exporter::registry::validate_buckets;
use rag_metrics_exporter::{BucketConfig, RecordPolicy, SimulationConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::cli::{Args, ConfigFormat};

// Default configuration constants
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_REFRESH_INTERVAL_SECS: u64 = 5;
pub const DEFAULT_REFRESH_TIMEOUT_MS: u64 = 2000;

/// Enhanced configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // Server configuration
    pub port: Option<u16>,
    pub bind: Option<String>,

    // Feature flags
    #[serde(alias = "enable-health")]
    pub enable_health: Option<bool>,

    // Logging
    #[serde(alias = "log-level")]
    pub log_level: Option<String>,

    // Pipeline instrumentation
    /// "always" records interrupted phases, "on_completion" drops them
    #[serde(alias = "phase-timing")]
    pub phase_timing: Option<RecordPolicy>,
    /// Seconds between background gauge refreshes
    #[serde(alias = "refresh-interval-seconds")]
    pub refresh_interval_seconds: Option<u64>,
    /// Upper bound for one vector store / embedding queue read
    #[serde(alias = "refresh-timeout-ms")]
    pub refresh_timeout_ms: Option<u64>,

    // TLS/SSL Configuration
    #[serde(alias = "enable-tls")]
    pub enable_tls: Option<bool>,
    #[serde(alias = "tls-cert-path")]
    pub tls_cert_path: Option<String>,
    #[serde(alias = "tls-key-path")]
    pub tls_key_path: Option<String>,

    // Histogram buckets
    #[serde(default)]
    pub buckets: BucketConfig,

    // Simulated collaborators
    #[serde(default)]
    pub simulation: SimulationConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: Some(DEFAULT_BIND_ADDR.to_string()),
            port: Some(DEFAULT_PORT),
            enable_health: Some(true),
            log_level: Some("info".into()),
            phase_timing: Some(RecordPolicy::Always),
            refresh_interval_seconds: Some(DEFAULT_REFRESH_INTERVAL_SECS),
            refresh_timeout_ms: Some(DEFAULT_REFRESH_TIMEOUT_MS),
            enable_tls: Some(false),
            tls_cert_path: None,
            tls_key_path: None,
            buckets: BucketConfig::default(),
            simulation: SimulationConfig::default(),
        }
    }
}

impl Config {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(
            self.refresh_interval_seconds
                .unwrap_or(DEFAULT_REFRESH_INTERVAL_SECS),
        )
    }

    pub fn refresh_timeout(&self) -> Duration {
        Duration::from_millis(self.refresh_timeout_ms.unwrap_or(DEFAULT_REFRESH_TIMEOUT_MS))
    }
}

fn check_probability(name: &str, value: f64) -> Result<(), Box<dyn std::error::Error>> {
    if !(0.0..=1.0).contains(&value) {
        return Err(format!("{} must be between 0.0 and 1.0, got {}", name, value).into());
    }
    Ok(())
}

/// Validate effective config (used by --check-config and at startup)
pub fn validate_effective_config(cfg: &Config) -> Result<(), Box<dyn std::error::Error>> {
    if cfg.refresh_interval_seconds == Some(0) {
        return Err("refresh_interval_seconds must be greater than 0".into());
    }
    if cfg.refresh_timeout_ms == Some(0) {
        return Err("refresh_timeout_ms must be greater than 0".into());
    }

    if let Some(level) = cfg.log_level.as_deref() {
        if parse_log_level(level).is_none() {
            return Err(format!(
                "Invalid log_level '{}', expected off, error, warn, info, debug or trace",
                level
            )
            .into());
        }
    }

    // Histogram buckets
    for (name, buckets) in cfg.buckets.entries() {
        if let Err(reason) = validate_buckets(buckets) {
            return Err(format!("Invalid buckets.{}: {}", name, reason).into());
        }
    }

    // Simulation
    let sim = &cfg.simulation;
    if sim.enabled && sim.workers == 0 {
        return Err("simulation.workers must be at least 1 when the simulation is enabled".into());
    }
    for (name, span) in sim.spans() {
        if !span.is_valid() {
            return Err(format!(
                "Invalid simulation.{}: min ({}) is greater than max ({})",
                name, span.min, span.max
            )
            .into());
        }
    }
    check_probability("simulation.failure_rate", sim.failure_rate)?;
    check_probability("simulation.cache_hit_ratio", sim.cache_hit_ratio)?;

    // TLS validation
    if cfg.enable_tls.unwrap_or(false) {
        let cert_path = cfg.tls_cert_path.as_deref();
        let key_path = cfg.tls_key_path.as_deref();

        match (cert_path, key_path) {
            (None, None) => {
                return Err(
                    "TLS is enabled but neither tls_cert_path nor tls_key_path are set".into(),
                );
            }
            (Some(_), None) => {
                return Err("TLS is enabled but tls_key_path is not set".into());
            }
            (None, Some(_)) => {
                return Err("TLS is enabled but tls_cert_path is not set".into());
            }
            (Some(cert), Some(key)) => {
                check_pem_file("certificate", cert)?;
                check_pem_file("private key", key)?;
            }
        }
    }

    Ok(())
}

fn check_pem_file(what: &str, path: &str) -> Result<(), Box<dyn std::error::Error>> {
    let file = Path::new(path);
    if !file.exists() {
        return Err(format!("TLS {} file not found: {}", what, path).into());
    }
    match fs::metadata(file) {
        Ok(meta) if meta.len() == 0 => Err(format!("TLS {} file is empty: {}", what, path).into()),
        Err(e) => {
            Err(format!("TLS {} file is not readable: {} ({})", what, path, e).into())
        }
        Ok(_) => Ok(()),
    }
}

/// Parses a config-file log level.
pub fn parse_log_level(level: &str) -> Option<crate::cli::LogLevel> {
    use crate::cli::LogLevel;
    match level.to_ascii_lowercase().as_str() {
        "off" => Some(LogLevel::Off),
        "error" => Some(LogLevel::Error),
        "warn" | "warning" => Some(LogLevel::Warn),
        "info" => Some(LogLevel::Info),
        "debug" => Some(LogLevel::Debug),
        "trace" => Some(LogLevel::Trace),
        _ => None,
    }
}

/// Resolves configuration from CLI args, config file, and defaults.
/// This enforces precedence: CLI (if provided) > config file > default.
pub fn resolve_config(args: &Args) -> Result<Config, Box<dyn std::error::Error>> {
    let mut config = if args.no_config {
        Config::default()
    } else {
        load_config(args.config.as_deref())?
    };

    if let Some(bind_ip) = args.bind {
        config.bind = Some(bind_ip.to_string());
    }
    if let Some(cli_port) = args.port {
        config.port = Some(cli_port);
    }

    // Feature flags
    if args.disable_health {
        config.enable_health = Some(false);
    }

    // Background refresh and simulation
    if let Some(interval) = args.refresh_interval {
        config.refresh_interval_seconds = Some(interval);
    }
    if args.no_simulation {
        config.simulation.enabled = false;
    }
    if let Some(workers) = args.workers {
        config.simulation.workers = workers;
    }
    if let Some(rate) = args.failure_rate {
        config.simulation.failure_rate = rate;
    }

    // TLS configuration: CLI wins if provided
    if args.enable_tls {
        config.enable_tls = Some(true);
    }
    if let Some(cert_path) = &args.tls_cert {
        config.tls_cert_path = Some(cert_path.to_string_lossy().to_string());
    }
    if let Some(key_path) = &args.tls_key {
        config.tls_key_path = Some(key_path.to_string_lossy().to_string());
    }

    Ok(config)
}

/// Loads a config file, trying default locations when no path is given.
pub fn load_config(path: Option<&Path>) -> Result<Config, Box<dyn std::error::Error>> {
    let path = match path {
        Some(p) => {
            if !p.exists() {
                return Err(format!("Config file not found: {}", p.display()).into());
            }
            p.to_path_buf()
        }
        None => {
            const DEFAULTS: [&str; 4] = [
                "/etc/rag-metrics-exporter/config.yaml",
                "/etc/rag-metrics-exporter/config.yml",
                "./rag-metrics-exporter.yaml",
                "./rag-metrics-exporter.yml",
            ];
            match DEFAULTS.iter().map(PathBuf::from).find(|p| p.exists()) {
                Some(p) => p,
                None => return Ok(Config::default()),
            }
        }
    };

    let content = fs::read_to_string(&path)?;

    match path.extension().and_then(|s| s.to_str()) {
        Some("json") => {
            let config: Config = serde_json::from_str(&content)?;
            info!("Loaded JSON configuration from: {}", path.display());
            Ok(config)
        }
        Some("toml") => {
            let config: Config = toml::from_str(&content)?;
            info!("Loaded TOML configuration from: {}", path.display());
            Ok(config)
        }
        _ => {
            // Default to YAML
            let config: Config = serde_yaml::from_str(&content)?;
            info!("Loaded YAML configuration from: {}", path.display());
            Ok(config)
        }
    }
}

/// Renders configuration in the requested format.
pub fn render_config(
    config: &Config,
    format: &ConfigFormat,
) -> Result<String, Box<dyn std::error::Error>> {
    let output = match format {
        ConfigFormat::Json => serde_json::to_string_pretty(config)?,
        // Tables must follow plain values in TOML
        ConfigFormat::Toml => toml::to_string_pretty(&toml::Value::try_from(config)?)?,
        ConfigFormat::Yaml => serde_yaml::to_string(config)?,
    };
    Ok(output)
}

/// Shows configuration in requested format
pub fn show_config(config: &Config, format: ConfigFormat) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", render_config(config, &format)?);
    Ok(())
}
