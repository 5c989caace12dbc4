//! Simulate command implementation.
//!
//! Runs a handful of simulated queries against a fresh registry and prints
//! the resulting exposition text.

use rag_metrics_exporter::{
    MetricRegistry, Pipeline, PipelineOptions, RagMetrics, SimulatedEmbeddingQueue,
    SimulatedGenerator, SimulatedRetriever, SimulatedVectorStore, Span,
};
use std::sync::Arc;
use std::time::Instant;

use crate::config::Config;

/// Runs `iterations` queries and prints the metrics.
pub async fn command_simulate(
    iterations: usize,
    fast: bool,
    verbose: bool,
    config: &Config,
) -> Result<(), Box<dyn std::error::Error>> {
    println!("🧪 RAG Metrics Exporter - Simulation");
    println!("====================================");

    let mut sim = config.simulation.clone();
    if fast {
        sim.retrieval_delay_ms = Span::new(0, 0);
        sim.generation_delay_ms = Span::new(0, 0);
    }

    let registry = MetricRegistry::new();
    let metrics = RagMetrics::new(&registry, &config.buckets)?;
    let options = PipelineOptions {
        phase_policy: config.phase_timing.unwrap_or_default(),
        refresh_timeout: config.refresh_timeout(),
    };
    let pipeline = Pipeline::new(
        metrics,
        SimulatedRetriever::new(&sim),
        SimulatedGenerator::new(&sim),
        options,
    )
    .with_vector_store(Arc::new(SimulatedVectorStore::new(&sim)))
    .with_embedding_queue(Arc::new(SimulatedEmbeddingQueue::new(&sim)));

    let start = Instant::now();
    let mut failures = 0usize;
    for iteration in 1..=iterations {
        pipeline.record_cache_lookup(sim.sample_cache_lookup());
        match pipeline.process(&sim.query).await {
            Ok(result) if verbose => println!(
                "   ✅ Query {}/{}: {} documents, {} tokens, retrieval {:.3}s, generation {:.3}s",
                iteration,
                iterations,
                result.document_count,
                result.token_count,
                result.phase_durations.retrieval.as_secs_f64(),
                result.phase_durations.generation.as_secs_f64()
            ),
            Ok(_) => {}
            Err(e) => {
                failures += 1;
                if verbose {
                    println!("   ❌ Query {}/{}: {}", iteration, iterations, e);
                }
            }
        }
    }
    pipeline.refresh_background_gauges().await;

    println!(
        "\n📊 {} queries in {:.2}s, {} failed",
        iterations,
        start.elapsed().as_secs_f64(),
        failures
    );
    println!("\n{}", registry.encode_text()?);

    Ok(())
}
