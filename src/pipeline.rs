//! Metrics-instrumented RAG query pipeline.
//!
//! [`Pipeline`] wraps a [`Retriever`] and a [`Generator`] and records, for
//! every query:
//!
//! - end-to-end latency on every exit path, including cancellation
//! - per-phase latency through [`PhaseTimer`]s
//! - retrieved document count and generated token count
//! - one outcome increment on `rag_queries_total{status=...}`
//!
//! Failures from the collaborators are returned to the caller unchanged.
//! Background gauges (vector store size, embedding queue depth) are refreshed
//! independently through [`Pipeline::refresh_background_gauges`].

use async_trait::async_trait;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use crate::metrics::{CacheLookup, QueryOutcome, RagMetrics};
use crate::registry::GaugeInstance;
use crate::timer::{PhaseTimer, RecordPolicy};

/// Default upper bound for a single background collaborator call.
pub const DEFAULT_REFRESH_TIMEOUT: Duration = Duration::from_secs(2);

/// Retrieval phase: finds documents relevant to a query.
#[async_trait]
pub trait Retriever: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Returns the number of documents retrieved for `query`.
    async fn retrieve(&self, query: &str) -> Result<usize, Self::Error>;
}

/// Generation phase: produces the response text for a query.
#[async_trait]
pub trait Generator: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    async fn generate(&self, query: &str) -> Result<String, Self::Error>;
}

/// Source of the vector store document count.
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn count(&self) -> anyhow::Result<u64>;
}

/// Source of the embedding backlog depth.
#[async_trait]
pub trait EmbeddingQueue: Send + Sync {
    async fn depth(&self) -> anyhow::Result<u64>;
}

/// Per-query processing state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryPhase {
    Idle,
    Retrieving,
    Generating,
    Completed,
    Failed,
}

impl fmt::Display for QueryPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            QueryPhase::Idle => "idle",
            QueryPhase::Retrieving => "retrieving",
            QueryPhase::Generating => "generating",
            QueryPhase::Completed => "completed",
            QueryPhase::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Wall-clock time spent in each phase.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhaseDurations {
    pub retrieval: Duration,
    pub generation: Duration,
}

/// Result of a successfully processed query.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineResult {
    pub response: String,
    pub document_count: usize,
    /// Whitespace-delimited word count, see [`count_tokens`].
    pub token_count: usize,
    pub phase_durations: PhaseDurations,
}

/// Approximate token count: the number of whitespace-delimited words.
///
/// This is not a tokenizer. Subword tokenizers usually report more tokens
/// than words.
pub fn count_tokens(response: &str) -> usize {
    response.split_whitespace().count()
}

/// Tuning options for a [`Pipeline`].
#[derive(Debug, Clone, Copy)]
pub struct PipelineOptions {
    /// Whether a phase interrupted by a failure still records its duration.
    pub phase_policy: RecordPolicy,
    /// Upper bound for each background collaborator call.
    pub refresh_timeout: Duration,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            phase_policy: RecordPolicy::Always,
            refresh_timeout: DEFAULT_REFRESH_TIMEOUT,
        }
    }
}

/// Tracks the phase of one query and records its outcome exactly once.
///
/// Dropping the tracker before [`QueryTracker::complete`] counts the query
/// as failed, which is how errors and cancelled futures are both accounted.
struct QueryTracker<'a> {
    metrics: &'a RagMetrics,
    phase: QueryPhase,
}

impl<'a> QueryTracker<'a> {
    fn new(metrics: &'a RagMetrics) -> Self {
        Self {
            metrics,
            phase: QueryPhase::Idle,
        }
    }

    fn enter(&mut self, phase: QueryPhase) {
        debug!("Query {} -> {}", self.phase, phase);
        self.phase = phase;
    }

    fn complete(mut self) {
        self.enter(QueryPhase::Completed);
        self.metrics.record_outcome(QueryOutcome::Success);
    }
}

impl Drop for QueryTracker<'_> {
    fn drop(&mut self) {
        if self.phase == QueryPhase::Completed {
            return;
        }
        warn!("Query failed while {}", self.phase);
        self.phase = QueryPhase::Failed;
        self.metrics.record_outcome(QueryOutcome::Failure);
    }
}

/// Instrumented retrieval + generation pipeline.
///
/// `Pipeline` has no mutable state of its own; `process` may be called
/// concurrently from any number of tasks.
///
/// `E` is the error returned by [`Pipeline::process`]. It defaults to the
/// retriever's error; collaborators with different error types are joined
/// through `Into<E>` with [`Pipeline::converging`].
pub struct Pipeline<R: Retriever, G, E = <R as Retriever>::Error> {
    retriever: R,
    generator: G,
    vector_store: Option<Arc<dyn VectorStore>>,
    embedding_queue: Option<Arc<dyn EmbeddingQueue>>,
    metrics: RagMetrics,
    query_timer: PhaseTimer,
    retrieval_timer: PhaseTimer,
    generation_timer: PhaseTimer,
    refresh_timeout: Duration,
    error: PhantomData<fn() -> E>,
}

impl<R, G> Pipeline<R, G>
where
    R: Retriever,
    G: Generator,
    G::Error: Into<R::Error>,
{
    /// Builds a pipeline that reports failures as the retriever's error type.
    pub fn new(metrics: RagMetrics, retriever: R, generator: G, options: PipelineOptions) -> Self {
        Self::converging(metrics, retriever, generator, options)
    }
}

impl<R, G, E> Pipeline<R, G, E>
where
    R: Retriever,
    G: Generator,
    R::Error: Into<E>,
    G::Error: Into<E>,
{
    /// Builds a pipeline whose collaborator errors are converted into `E`.
    pub fn converging(
        metrics: RagMetrics,
        retriever: R,
        generator: G,
        options: PipelineOptions,
    ) -> Self {
        // The end-to-end timer covers failures regardless of the phase policy.
        let query_timer = PhaseTimer::new(metrics.query_duration.clone(), RecordPolicy::Always);
        let retrieval_timer =
            PhaseTimer::new(metrics.retrieval_duration.clone(), options.phase_policy);
        let generation_timer =
            PhaseTimer::new(metrics.generation_duration.clone(), options.phase_policy);

        Self {
            retriever,
            generator,
            vector_store: None,
            embedding_queue: None,
            metrics,
            query_timer,
            retrieval_timer,
            generation_timer,
            refresh_timeout: options.refresh_timeout,
            error: PhantomData,
        }
    }

    pub fn with_vector_store(mut self, vector_store: Arc<dyn VectorStore>) -> Self {
        self.vector_store = Some(vector_store);
        self
    }

    pub fn with_embedding_queue(mut self, embedding_queue: Arc<dyn EmbeddingQueue>) -> Self {
        self.embedding_queue = Some(embedding_queue);
        self
    }

    pub fn metrics(&self) -> &RagMetrics {
        &self.metrics
    }

    /// Runs retrieval then generation for `query`.
    ///
    /// On failure the failure counter is incremented, the end-to-end
    /// duration is recorded and the collaborator's error is returned,
    /// converted into `E`.
    #[instrument(skip(self, query), fields(query_len = query.len()))]
    pub async fn process(&self, query: &str) -> Result<PipelineResult, E> {
        let _query_timer = self.query_timer.start();
        let mut tracker = QueryTracker::new(&self.metrics);

        // ========== Retrieval ==========
        tracker.enter(QueryPhase::Retrieving);
        let retrieval_timer = self.retrieval_timer.start();
        let document_count = self
            .retriever
            .retrieve(query)
            .await
            .map_err(Into::<E>::into)?;
        RagMetrics::observe_count(&self.metrics.documents_retrieved, document_count);
        let retrieval = retrieval_timer.stop();

        // ========== Generation ==========
        tracker.enter(QueryPhase::Generating);
        let generation_timer = self.generation_timer.start();
        let response = self
            .generator
            .generate(query)
            .await
            .map_err(Into::<E>::into)?;
        let token_count = count_tokens(&response);
        RagMetrics::observe_count(&self.metrics.generated_tokens, token_count);
        let generation = generation_timer.stop();

        tracker.complete();
        debug!(
            "Query completed: {} documents, {} tokens, retrieval {:.3}s, generation {:.3}s",
            document_count,
            token_count,
            retrieval.as_secs_f64(),
            generation.as_secs_f64()
        );

        Ok(PipelineResult {
            response,
            document_count,
            token_count,
            phase_durations: PhaseDurations {
                retrieval,
                generation,
            },
        })
    }

    /// Reports a response-cache lookup made by the caller.
    pub fn record_cache_lookup(&self, lookup: CacheLookup) {
        self.metrics.record_cache_lookup(lookup);
    }

    /// Refreshes the vector-store and embedding-queue gauges.
    ///
    /// Each call is bounded by the configured refresh timeout. A failed or
    /// timed-out call leaves the previous gauge value in place.
    #[instrument(skip(self))]
    pub async fn refresh_background_gauges(&self) {
        let vector_store = async {
            if let Some(store) = &self.vector_store {
                refresh_gauge(
                    "vector store",
                    &self.metrics.vector_store_documents,
                    self.refresh_timeout,
                    store.count(),
                )
                .await;
            }
        };
        let embedding_queue = async {
            if let Some(queue) = &self.embedding_queue {
                refresh_gauge(
                    "embedding queue",
                    &self.metrics.embedding_queue_size,
                    self.refresh_timeout,
                    queue.depth(),
                )
                .await;
            }
        };
        tokio::join!(vector_store, embedding_queue);
    }
}

async fn refresh_gauge<F>(source: &str, gauge: &GaugeInstance, timeout: Duration, read: F)
where
    F: std::future::Future<Output = anyhow::Result<u64>>,
{
    match tokio::time::timeout(timeout, read).await {
        Ok(Ok(value)) => {
            gauge.set(value as f64);
            debug!("Refreshed {} gauge: {}", source, value);
        }
        Ok(Err(e)) => {
            warn!("Failed to read {}: {} - keeping previous value", source, e);
        }
        Err(_) => {
            warn!(
                "Reading {} timed out after {:?} - keeping previous value",
                source, timeout
            );
        }
    }
}
