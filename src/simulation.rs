//! Simulated RAG collaborators.
//!
//! Every phase is a random sleep followed by a random result. These types
//! implement the pipeline traits so the exporter has something to measure
//! without a real vector store or model behind it.

use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::metrics::CacheLookup;
use crate::pipeline::{EmbeddingQueue, Generator, Retriever, VectorStore};

/// Phrase repeated to build simulated responses.
pub const RESPONSE_PHRASE: &str = "This is a simulated response ";

/// Inclusive integer range sampled uniformly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub min: u64,
    pub max: u64,
}

impl Span {
    pub const fn new(min: u64, max: u64) -> Self {
        Self { min, max }
    }

    pub fn is_valid(&self) -> bool {
        self.min <= self.max
    }

    /// Samples a value in `[min, max]`. An inverted span samples `min`.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> u64 {
        if self.min >= self.max {
            return self.min;
        }
        rng.gen_range(self.min..=self.max)
    }
}

/// Simulation parameters. Delays are milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Run the background query driver (default: true)
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Number of concurrent query loops (default: 1)
    #[serde(default = "default_workers")]
    pub workers: usize,

    #[serde(default = "default_retrieval_delay_ms")]
    pub retrieval_delay_ms: Span,

    #[serde(default = "default_documents")]
    pub documents: Span,

    #[serde(default = "default_generation_delay_ms")]
    pub generation_delay_ms: Span,

    /// How many times the response phrase is repeated
    #[serde(default = "default_response_repeats")]
    pub response_repeats: Span,

    #[serde(default = "default_vector_store_documents")]
    pub vector_store_documents: Span,

    #[serde(default = "default_embedding_queue")]
    pub embedding_queue: Span,

    /// Pause between two queries of one worker
    #[serde(default = "default_query_interval_ms")]
    pub query_interval_ms: Span,

    /// Probability (0.0-1.0) that a phase fails (default: 0.0)
    #[serde(default)]
    pub failure_rate: f64,

    /// Probability (0.0-1.0) that a query is reported as a cache hit
    #[serde(default = "default_cache_hit_ratio")]
    pub cache_hit_ratio: f64,

    /// Text sent through the pipeline
    #[serde(default = "default_query")]
    pub query: String,
}

fn default_enabled() -> bool {
    true
}
fn default_workers() -> usize {
    1
}
fn default_retrieval_delay_ms() -> Span {
    Span::new(100, 300)
}
fn default_documents() -> Span {
    Span::new(3, 15)
}
fn default_generation_delay_ms() -> Span {
    Span::new(500, 2000)
}
fn default_response_repeats() -> Span {
    Span::new(5, 20)
}
fn default_vector_store_documents() -> Span {
    Span::new(10_000, 20_000)
}
fn default_embedding_queue() -> Span {
    Span::new(0, 100)
}
fn default_query_interval_ms() -> Span {
    Span::new(1000, 5000)
}
fn default_cache_hit_ratio() -> f64 {
    0.3
}
fn default_query() -> String {
    "Sample query".to_string()
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            workers: default_workers(),
            retrieval_delay_ms: default_retrieval_delay_ms(),
            documents: default_documents(),
            generation_delay_ms: default_generation_delay_ms(),
            response_repeats: default_response_repeats(),
            vector_store_documents: default_vector_store_documents(),
            embedding_queue: default_embedding_queue(),
            query_interval_ms: default_query_interval_ms(),
            failure_rate: 0.0,
            cache_hit_ratio: default_cache_hit_ratio(),
            query: default_query(),
        }
    }
}

impl SimulationConfig {
    /// Named spans, for validation.
    pub fn spans(&self) -> [(&'static str, Span); 7] {
        [
            ("retrieval_delay_ms", self.retrieval_delay_ms),
            ("documents", self.documents),
            ("generation_delay_ms", self.generation_delay_ms),
            ("response_repeats", self.response_repeats),
            ("vector_store_documents", self.vector_store_documents),
            ("embedding_queue", self.embedding_queue),
            ("query_interval_ms", self.query_interval_ms),
        ]
    }

    /// Samples the pause before a worker's next query.
    pub fn next_query_interval(&self) -> Duration {
        Duration::from_millis(self.query_interval_ms.sample(&mut rand::thread_rng()))
    }

    /// Fabricates a cache lookup result according to `cache_hit_ratio`.
    pub fn sample_cache_lookup(&self) -> CacheLookup {
        if chance(self.cache_hit_ratio) {
            CacheLookup::Hit
        } else {
            CacheLookup::Miss
        }
    }
}

fn chance(probability: f64) -> bool {
    probability > 0.0 && rand::thread_rng().gen_bool(probability.min(1.0))
}

/// Error injected by the simulated collaborators.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SimulationError {
    #[error("simulated {phase} failure")]
    InjectedFailure { phase: &'static str },
}

/// Sleeps, then returns a random document count.
#[derive(Debug, Clone)]
pub struct SimulatedRetriever {
    delay_ms: Span,
    documents: Span,
    failure_rate: f64,
}

impl SimulatedRetriever {
    pub fn new(config: &SimulationConfig) -> Self {
        Self {
            delay_ms: config.retrieval_delay_ms,
            documents: config.documents,
            failure_rate: config.failure_rate,
        }
    }
}

#[async_trait]
impl Retriever for SimulatedRetriever {
    type Error = SimulationError;

    async fn retrieve(&self, _query: &str) -> Result<usize, SimulationError> {
        let (delay, documents, fail) = {
            let mut rng = rand::thread_rng();
            (
                self.delay_ms.sample(&mut rng),
                self.documents.sample(&mut rng),
                chance(self.failure_rate),
            )
        };
        tokio::time::sleep(Duration::from_millis(delay)).await;
        if fail {
            return Err(SimulationError::InjectedFailure { phase: "retrieval" });
        }
        Ok(documents as usize)
    }
}

/// Sleeps, then returns the response phrase repeated a random number of times.
#[derive(Debug, Clone)]
pub struct SimulatedGenerator {
    delay_ms: Span,
    repeats: Span,
    failure_rate: f64,
}

impl SimulatedGenerator {
    pub fn new(config: &SimulationConfig) -> Self {
        Self {
            delay_ms: config.generation_delay_ms,
            repeats: config.response_repeats,
            failure_rate: config.failure_rate,
        }
    }
}

#[async_trait]
impl Generator for SimulatedGenerator {
    type Error = SimulationError;

    async fn generate(&self, _query: &str) -> Result<String, SimulationError> {
        let (delay, repeats, fail) = {
            let mut rng = rand::thread_rng();
            (
                self.delay_ms.sample(&mut rng),
                self.repeats.sample(&mut rng),
                chance(self.failure_rate),
            )
        };
        tokio::time::sleep(Duration::from_millis(delay)).await;
        if fail {
            return Err(SimulationError::InjectedFailure {
                phase: "generation",
            });
        }
        Ok(RESPONSE_PHRASE.repeat(repeats as usize))
    }
}

/// Reports a random document count.
#[derive(Debug, Clone)]
pub struct SimulatedVectorStore {
    documents: Span,
}

impl SimulatedVectorStore {
    pub fn new(config: &SimulationConfig) -> Self {
        Self {
            documents: config.vector_store_documents,
        }
    }
}

#[async_trait]
impl VectorStore for SimulatedVectorStore {
    async fn count(&self) -> anyhow::Result<u64> {
        Ok(self.documents.sample(&mut rand::thread_rng()))
    }
}

/// Reports a random backlog depth.
#[derive(Debug, Clone)]
pub struct SimulatedEmbeddingQueue {
    depth: Span,
}

impl SimulatedEmbeddingQueue {
    pub fn new(config: &SimulationConfig) -> Self {
        Self {
            depth: config.embedding_queue,
        }
    }
}

#[async_trait]
impl EmbeddingQueue for SimulatedEmbeddingQueue {
    async fn depth(&self) -> anyhow::Result<u64> {
        Ok(self.depth.sample(&mut rand::thread_rng()))
    }
}
