//! rag-metrics-exporter
//!
//! Prometheus exporter for a metrics-instrumented RAG pipeline.
//! This is the main entry point that initializes the server and handles subcommands.

mod cli;
mod commands;
mod config;
mod driver;
mod handlers;
mod state;

use axum::{routing::get, Router};
use axum_server::tls_rustls::RustlsConfig;
use clap::Parser;
use rag_metrics_exporter::server_stats::ServerStats;
use rag_metrics_exporter::{
    MetricDefinition, MetricRegistry, Pipeline, PipelineOptions, RagMetrics,
    SimulatedEmbeddingQueue, SimulatedGenerator, SimulatedRetriever, SimulatedVectorStore,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::{net::TcpListener, signal};
use tracing::level_filters::LevelFilter;
use tracing::{debug, error, info};

use cli::{Args, Commands, LogLevel};
use commands::{command_config, command_simulate};
use config::{
    parse_log_level, resolve_config, show_config, validate_effective_config, Config,
    DEFAULT_BIND_ADDR, DEFAULT_PORT,
};
use handlers::{health_handler, metrics_handler, root_handler};
use state::AppState;

/// Name of the self-telemetry gauge updated by every scrape.
const SCRAPE_DURATION_METRIC: &str = "rag_exporter_scrape_duration_seconds";

/// Initializes tracing logging subsystem with configured log level.
/// The CLI flag wins over `log_level` from the config file.
fn setup_logging(config: &Config, args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let level = args
        .log_level
        .clone()
        .or_else(|| config.log_level.as_deref().and_then(parse_log_level))
        .unwrap_or(LogLevel::Info);

    let filter = match level {
        LogLevel::Off => LevelFilter::OFF,
        LogLevel::Error => LevelFilter::ERROR,
        LogLevel::Warn => LevelFilter::WARN,
        LogLevel::Info => LevelFilter::INFO,
        LogLevel::Debug => LevelFilter::DEBUG,
        LogLevel::Trace => LevelFilter::TRACE,
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("Logging initialized with level: {:?}", level);
    Ok(())
}

/// Helper function to load and validate configuration.
/// Exits the process with error code 1 if validation fails.
fn load_validated_config(args: &Args) -> Result<Config, Box<dyn std::error::Error>> {
    let config = resolve_config(args)?;
    if let Err(e) = validate_effective_config(&config) {
        eprintln!("❌ Configuration invalid: {}", e);
        std::process::exit(1);
    }
    Ok(config)
}

/// Completes on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C), shutting down gracefully...");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down gracefully...");
        }
    }
}

/// Main application entry point.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Early config resolution for show/check modes
    if args.show_config || args.check_config {
        let config = resolve_config(&args)?;

        if args.check_config {
            if let Err(e) = validate_effective_config(&config) {
                eprintln!("❌ Configuration invalid: {}", e);
                std::process::exit(1);
            }
            println!("✅ Configuration is valid");
            return Ok(());
        }

        return show_config(&config, args.config_format.clone());
    }

    // Handle subcommands
    if let Some(command) = &args.command {
        return match command {
            Commands::Config {
                output,
                format,
                commented,
            } => command_config(output.clone(), format.clone(), *commented),

            Commands::Simulate {
                iterations,
                fast,
                verbose,
            } => {
                let config = load_validated_config(&args)?;
                setup_logging(&config, &args)?;
                command_simulate(*iterations, *fast, *verbose, &config).await
            }
        };
    }

    // Load configuration for main server mode
    let config = load_validated_config(&args)?;
    setup_logging(&config, &args)?;

    info!("Starting rag-metrics-exporter");

    let bind_ip_str = config.bind.as_deref().unwrap_or(DEFAULT_BIND_ADDR);
    let port = config.port.unwrap_or(DEFAULT_PORT);

    // Initialize metrics registry
    let registry = Arc::new(MetricRegistry::new());
    let metrics = RagMetrics::new(&registry, &config.buckets)?;
    let scrape_duration = registry
        .register(MetricDefinition::gauge(
            SCRAPE_DURATION_METRIC,
            "Time spent serving the previous /metrics request",
        ))?
        .gauge(&[])?;
    debug!("{} metric families registered", registry.len());

    // Wire the simulated collaborators
    let sim = &config.simulation;
    let options = PipelineOptions {
        phase_policy: config.phase_timing.unwrap_or_default(),
        refresh_timeout: config.refresh_timeout(),
    };
    info!("Phase timing policy: {:?}", options.phase_policy);
    let pipeline = Pipeline::new(
        metrics,
        SimulatedRetriever::new(sim),
        SimulatedGenerator::new(sim),
        options,
    )
    .with_vector_store(Arc::new(SimulatedVectorStore::new(sim)))
    .with_embedding_queue(Arc::new(SimulatedEmbeddingQueue::new(sim)));

    let state = Arc::new(AppState {
        registry,
        pipeline: Arc::new(pipeline),
        scrape_duration,
        config: Arc::new(config.clone()),
        stats: Arc::new(ServerStats::new()),
    });

    // Populate the gauges before the first scrape
    state.pipeline.refresh_background_gauges().await;
    let background = driver::spawn_background_tasks(&state);

    // Configure HTTP server routes
    let addr: SocketAddr = format!("{}:{}", bind_ip_str, port).parse()?;

    let mut app = Router::new()
        .route("/", get(root_handler))
        .route("/metrics", get(metrics_handler));

    if config.enable_health.unwrap_or(true) {
        app = app.route("/health", get(health_handler));
    }

    let app = app.with_state(state.clone());

    // Check if TLS is enabled
    let enable_tls = config.enable_tls.unwrap_or(false);

    let result: Result<(), Box<dyn std::error::Error>> = if enable_tls {
        // Paths are checked by validate_effective_config
        let cert_path = config
            .tls_cert_path
            .as_deref()
            .ok_or("tls_cert_path is required when enable_tls is true")?;
        let key_path = config
            .tls_key_path
            .as_deref()
            .ok_or("tls_key_path is required when enable_tls is true")?;

        info!("Loading TLS certificate from: {}", cert_path);
        info!("Loading TLS private key from: {}", key_path);

        let tls_config = RustlsConfig::from_pem_file(cert_path, key_path)
            .await
            .map_err(|e| {
                error!("Failed to load TLS configuration: {}", e);
                e
            })?;

        info!(
            "rag-metrics-exporter listening on https://{}:{}",
            bind_ip_str, port
        );

        let server = axum_server::bind_rustls(addr, tls_config).serve(app.into_make_service());

        tokio::select! {
            result = server => result.map_err(|e| {
                error!("Server error: {}", e);
                e.into()
            }),
            _ = shutdown_signal() => {
                info!("Shutdown signal received, exiting...");
                Ok(())
            }
        }
    } else {
        let listener = TcpListener::bind(addr).await?;
        info!(
            "rag-metrics-exporter listening on http://{}:{}",
            bind_ip_str, port
        );

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| {
                error!("Server error: {}", e);
                e.into()
            })
    };

    for handle in background {
        handle.abort();
    }

    if result.is_ok() {
        info!("rag-metrics-exporter stopped gracefully");
    }
    result
}
