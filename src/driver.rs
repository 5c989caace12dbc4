//! Background tasks for the exporter.
//!
//! The query driver keeps the pipeline busy with simulated queries so the
//! scraped metrics move, and the refresh task polls the vector store and
//! embedding queue gauges on a fixed interval.

use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::state::SharedState;

/// Runs simulated queries until the task is aborted.
#[instrument(skip(state))]
async fn query_loop(state: SharedState, worker: usize) {
    let sim = &state.config.simulation;
    debug!("Query worker {} started", worker);

    loop {
        state
            .pipeline
            .record_cache_lookup(sim.sample_cache_lookup());

        let start = Instant::now();
        match state.pipeline.process(&sim.query).await {
            Ok(result) => {
                state.stats.record_query(true, start.elapsed().as_secs_f64());
                debug!(
                    "Worker {}: {} documents, {} tokens",
                    worker, result.document_count, result.token_count
                );
            }
            Err(e) => {
                state.stats.record_query(false, start.elapsed().as_secs_f64());
                warn!("Worker {}: query failed: {}", worker, e);
            }
        }

        tokio::time::sleep(sim.next_query_interval()).await;
    }
}

/// Refreshes the background gauges every `period`.
#[instrument(skip(state))]
async fn refresh_loop(state: SharedState, period: Duration) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        interval.tick().await;
        state.pipeline.refresh_background_gauges().await;
        state.stats.record_gauge_refresh();
    }
}

/// Spawns the refresh task and, when enabled, the simulated query workers.
pub fn spawn_background_tasks(state: &SharedState) -> Vec<JoinHandle<()>> {
    let mut handles = Vec::new();

    let period = state.config.refresh_interval();
    info!("Refreshing background gauges every {:?}", period);
    handles.push(tokio::spawn(refresh_loop(state.clone(), period)));

    let sim = &state.config.simulation;
    if sim.enabled {
        info!("Starting {} simulated query worker(s)", sim.workers);
        for worker in 0..sim.workers {
            handles.push(tokio::spawn(query_loop(state.clone(), worker)));
        }
    } else {
        info!("Simulation disabled - no queries will be driven");
    }

    handles
}
