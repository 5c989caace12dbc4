//! RAG Metrics Exporter Library
//!
//! This library provides a metrics-instrumented pipeline wrapper for
//! retrieval-augmented generation services. It times the nested phases of a
//! query, counts outcomes and publishes counters, histograms and gauges to a
//! Prometheus scrape target. Real retriever and generator implementations
//! plug in behind traits without touching the instrumentation.
//!
//! # Features
//!
//! - **Explicit Registry**: No global state, one [`MetricRegistry`] per process or per test
//! - **Scoped Timers**: Phase durations are recorded on every exit path
//! - **Untouched Errors**: Collaborator failures reach the caller unchanged
//! - **Stale Over Blocking**: Background gauges keep their last value when a source fails
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use rag_metrics_exporter::{
//!     BucketConfig, MetricRegistry, Pipeline, PipelineOptions, RagMetrics,
//!     SimulatedGenerator, SimulatedRetriever, SimulationConfig,
//! };
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = Arc::new(MetricRegistry::new());
//! let metrics = RagMetrics::new(&registry, &BucketConfig::default())?;
//!
//! let sim = SimulationConfig::default();
//! let pipeline = Pipeline::new(
//!     metrics,
//!     SimulatedRetriever::new(&sim),
//!     SimulatedGenerator::new(&sim),
//!     PipelineOptions::default(),
//! );
//!
//! let result = pipeline.process("Sample query").await?;
//! println!("{} documents, {} tokens", result.document_count, result.token_count);
//! println!("{}", registry.encode_text()?);
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod metrics;
pub mod pipeline;
pub mod registry;
pub mod server_stats;
pub mod simulation;
pub mod timer;

// Re-export main types for convenience
pub use error::MetricsError;
pub use metrics::{BucketConfig, CacheLookup, QueryOutcome, RagMetrics};
pub use pipeline::{
    count_tokens, EmbeddingQueue, Generator, PhaseDurations, Pipeline, PipelineOptions,
    PipelineResult, QueryPhase, Retriever, VectorStore,
};
pub use registry::{
    MetricDefinition, MetricHandle, MetricKind, MetricRegistry, MetricSample, SampleValue,
};
pub use simulation::{
    SimulatedEmbeddingQueue, SimulatedGenerator, SimulatedRetriever, SimulatedVectorStore,
    SimulationConfig, SimulationError, Span,
};
pub use timer::{PhaseTimer, RecordPolicy, ScopedTimer};
