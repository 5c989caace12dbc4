//! Application state management for the exporter.
//!
//! This module defines the shared application state that is passed
//! to HTTP handlers and used by the background query driver.

use rag_metrics_exporter::registry::GaugeInstance;
use rag_metrics_exporter::server_stats::ServerStats;
use rag_metrics_exporter::{MetricRegistry, Pipeline, SimulatedGenerator, SimulatedRetriever};
use std::sync::Arc;

use crate::config::Config;

/// Pipeline driven by the exporter's background workers.
pub type SimulatedPipeline = Pipeline<SimulatedRetriever, SimulatedGenerator>;

/// Type alias for shared application state.
pub type SharedState = Arc<AppState>;

/// Global application state shared across requests and background tasks.
pub struct AppState {
    pub registry: Arc<MetricRegistry>,
    pub pipeline: Arc<SimulatedPipeline>,
    /// Duration of the last `/metrics` encode, exported with the next scrape.
    pub scrape_duration: GaugeInstance,
    pub config: Arc<Config>,
    pub stats: Arc<ServerStats>,
}

#[cfg(test)]
pub fn test_state(stats: ServerStats) -> SharedState {
    use rag_metrics_exporter::{
        BucketConfig, MetricDefinition, PipelineOptions, RagMetrics, SimulationConfig,
    };

    let registry = Arc::new(MetricRegistry::new());
    let metrics = RagMetrics::new(&registry, &BucketConfig::default()).unwrap();
    let scrape_duration = registry
        .register(MetricDefinition::gauge(crate::SCRAPE_DURATION_METRIC, "scrape"))
        .unwrap()
        .gauge(&[])
        .unwrap();
    let sim = SimulationConfig::default();
    let pipeline = Pipeline::new(
        metrics,
        SimulatedRetriever::new(&sim),
        SimulatedGenerator::new(&sim),
        PipelineOptions::default(),
    );

    Arc::new(AppState {
        registry,
        pipeline: Arc::new(pipeline),
        scrape_duration,
        config: Arc::new(Config::default()),
        stats: Arc::new(stats),
    })
}
