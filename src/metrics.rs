//! Prometheus metric definitions for the RAG pipeline.
//!
//! All families are registered on an explicitly constructed
//! [`MetricRegistry`]. Label-less families are materialized at registration
//! so a cold scrape shows every series at zero.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::Result;
use crate::registry::{
    CounterInstance, GaugeInstance, HistogramInstance, MetricDefinition,
    MetricRegistry,
};

pub const QUERIES_TOTAL: &str = "rag_queries_total";
pub const QUERY_DURATION_SECONDS: &str = "rag_query_duration_seconds";
pub const DOCUMENTS_RETRIEVED: &str = "rag_documents_retrieved";
pub const RETRIEVAL_DURATION_SECONDS: &str = "rag_retrieval_duration_seconds";
pub const GENERATION_DURATION_SECONDS: &str = "rag_generation_duration_seconds";
pub const GENERATED_TOKENS: &str = "rag_generated_tokens";
pub const VECTOR_STORE_DOCUMENTS: &str = "rag_vector_store_documents";
pub const EMBEDDING_QUEUE_SIZE: &str = "rag_embedding_queue_size";
pub const CACHE_HITS_TOTAL: &str = "rag_cache_hits_total";
pub const CACHE_MISSES_TOTAL: &str = "rag_cache_misses_total";

/// Histogram bucket boundaries, overridable from the config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketConfig {
    #[serde(default = "default_query_duration_buckets")]
    pub query_duration_seconds: Vec<f64>,

    #[serde(default = "default_documents_buckets")]
    pub documents_retrieved: Vec<f64>,

    #[serde(default = "default_retrieval_duration_buckets")]
    pub retrieval_duration_seconds: Vec<f64>,

    #[serde(default = "default_generation_duration_buckets")]
    pub generation_duration_seconds: Vec<f64>,

    #[serde(default = "default_token_buckets")]
    pub generated_tokens: Vec<f64>,
}

fn default_query_duration_buckets() -> Vec<f64> {
    vec![0.1, 0.5, 1.0, 2.0, 5.0]
}
fn default_documents_buckets() -> Vec<f64> {
    vec![1.0, 5.0, 10.0, 20.0, 50.0]
}
fn default_retrieval_duration_buckets() -> Vec<f64> {
    vec![0.05, 0.1, 0.25, 0.5, 1.0]
}
fn default_generation_duration_buckets() -> Vec<f64> {
    vec![0.5, 1.0, 2.0, 5.0, 10.0]
}
fn default_token_buckets() -> Vec<f64> {
    vec![50.0, 100.0, 200.0, 500.0, 1000.0]
}

impl Default for BucketConfig {
    fn default() -> Self {
        Self {
            query_duration_seconds: default_query_duration_buckets(),
            documents_retrieved: default_documents_buckets(),
            retrieval_duration_seconds: default_retrieval_duration_buckets(),
            generation_duration_seconds: default_generation_duration_buckets(),
            generated_tokens: default_token_buckets(),
        }
    }
}

impl BucketConfig {
    /// Named bucket lists, for validation and display.
    pub fn entries(&self) -> [(&'static str, &[f64]); 5] {
        [
            ("query_duration_seconds", self.query_duration_seconds.as_slice()),
            ("documents_retrieved", self.documents_retrieved.as_slice()),
            ("retrieval_duration_seconds", self.retrieval_duration_seconds.as_slice()),
            ("generation_duration_seconds", self.generation_duration_seconds.as_slice()),
            ("generated_tokens", self.generated_tokens.as_slice()),
        ]
    }
}

/// Outcome label of a processed query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryOutcome {
    Success,
    Failure,
}

impl QueryOutcome {
    pub fn as_label(&self) -> &'static str {
        match self {
            QueryOutcome::Success => "success",
            QueryOutcome::Failure => "failure",
        }
    }
}

/// Result of a response-cache lookup reported by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheLookup {
    Hit,
    Miss,
}

/// Collection of RAG metrics registered on one registry.
#[derive(Clone, Debug)]
pub struct RagMetrics {
    // ========== Query Metrics ==========
    pub queries_success: CounterInstance,
    pub queries_failure: CounterInstance,
    pub query_duration: HistogramInstance,

    // ========== Retrieval Metrics ==========
    pub documents_retrieved: HistogramInstance,
    pub retrieval_duration: HistogramInstance,

    // ========== Generation Metrics ==========
    pub generation_duration: HistogramInstance,
    pub generated_tokens: HistogramInstance,

    // ========== Vector Store Metrics ==========
    pub vector_store_documents: GaugeInstance,
    pub embedding_queue_size: GaugeInstance,

    // ========== Cache Metrics ==========
    pub cache_hits: CounterInstance,
    pub cache_misses: CounterInstance,
}

impl RagMetrics {
    /// Creates and registers all RAG metrics with the registry.
    pub fn new(registry: &MetricRegistry, buckets: &BucketConfig) -> Result<Self> {
        // ========== Query Metrics ==========
        let queries = registry.register(
            MetricDefinition::counter(QUERIES_TOTAL, "Total number of queries processed")
                .with_labels(&["status"]),
        )?;
        let queries_success = queries.counter(&[QueryOutcome::Success.as_label()])?;
        let queries_failure = queries.counter(&[QueryOutcome::Failure.as_label()])?;

        let query_duration = registry
            .register(MetricDefinition::histogram(
                QUERY_DURATION_SECONDS,
                "Time spent processing queries",
                buckets.query_duration_seconds.clone(),
            ))?
            .histogram(&[])?;

        // ========== Retrieval Metrics ==========
        let documents_retrieved = registry
            .register(MetricDefinition::histogram(
                DOCUMENTS_RETRIEVED,
                "Number of documents retrieved per query",
                buckets.documents_retrieved.clone(),
            ))?
            .histogram(&[])?;
        let retrieval_duration = registry
            .register(MetricDefinition::histogram(
                RETRIEVAL_DURATION_SECONDS,
                "Time spent in retrieval phase",
                buckets.retrieval_duration_seconds.clone(),
            ))?
            .histogram(&[])?;

        // ========== Generation Metrics ==========
        let generation_duration = registry
            .register(MetricDefinition::histogram(
                GENERATION_DURATION_SECONDS,
                "Time spent in generation phase",
                buckets.generation_duration_seconds.clone(),
            ))?
            .histogram(&[])?;
        let generated_tokens = registry
            .register(MetricDefinition::histogram(
                GENERATED_TOKENS,
                "Number of tokens in generated responses",
                buckets.generated_tokens.clone(),
            ))?
            .histogram(&[])?;

        // ========== Vector Store Metrics ==========
        let vector_store_documents = registry
            .register(MetricDefinition::gauge(
                VECTOR_STORE_DOCUMENTS,
                "Total number of documents in vector store",
            ))?
            .gauge(&[])?;
        let embedding_queue_size = registry
            .register(MetricDefinition::gauge(
                EMBEDDING_QUEUE_SIZE,
                "Number of documents waiting to be embedded",
            ))?
            .gauge(&[])?;

        // ========== Cache Metrics ==========
        let cache_hits = registry
            .register(MetricDefinition::counter(
                CACHE_HITS_TOTAL,
                "Number of cache hits",
            ))?
            .counter(&[])?;
        let cache_misses = registry
            .register(MetricDefinition::counter(
                CACHE_MISSES_TOTAL,
                "Number of cache misses",
            ))?
            .counter(&[])?;

        Ok(Self {
            queries_success,
            queries_failure,
            query_duration,
            documents_retrieved,
            retrieval_duration,
            generation_duration,
            generated_tokens,
            vector_store_documents,
            embedding_queue_size,
            cache_hits,
            cache_misses,
        })
    }

    pub fn record_outcome(&self, outcome: QueryOutcome) {
        match outcome {
            QueryOutcome::Success => self.queries_success.increment_one(),
            QueryOutcome::Failure => self.queries_failure.increment_one(),
        }
    }

    pub fn record_cache_lookup(&self, lookup: CacheLookup) {
        match lookup {
            CacheLookup::Hit => self.cache_hits.increment_one(),
            CacheLookup::Miss => self.cache_misses.increment_one(),
        }
    }

    /// Observes a count into a histogram, logging instead of failing.
    pub(crate) fn observe_count(histogram: &HistogramInstance, count: usize) {
        if let Err(e) = histogram.observe(count as f64) {
            warn!("Failed to record {}: {}", histogram.name(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::SampleValue;

    #[test]
    fn test_bucket_config_defaults() {
        let buckets = BucketConfig::default();
        assert_eq!(buckets.query_duration_seconds, vec![0.1, 0.5, 1.0, 2.0, 5.0]);
        assert_eq!(buckets.generated_tokens.len(), 5);
    }

    #[test]
    fn test_bucket_config_partial_yaml_uses_defaults() {
        let buckets: BucketConfig =
            serde_yaml::from_str("generated_tokens: [10, 20, 30]").unwrap();
        assert_eq!(buckets.generated_tokens, vec![10.0, 20.0, 30.0]);
        assert_eq!(
            buckets.documents_retrieved,
            BucketConfig::default().documents_retrieved
        );
    }

    #[test]
    fn test_new_registers_all_families() {
        let registry = MetricRegistry::new();
        RagMetrics::new(&registry, &BucketConfig::default()).unwrap();
        assert_eq!(registry.len(), 10);

        let success = registry.sample(QUERIES_TOTAL, &["success"]).unwrap();
        assert_eq!(success.value, SampleValue::Counter(0.0));
        assert!(registry.sample(QUERIES_TOTAL, &["failure"]).is_some());
        assert!(registry.sample(VECTOR_STORE_DOCUMENTS, &[]).is_some());
    }

    #[test]
    fn test_new_twice_on_same_registry_is_idempotent() {
        let registry = MetricRegistry::new();
        let first = RagMetrics::new(&registry, &BucketConfig::default()).unwrap();
        let second = RagMetrics::new(&registry, &BucketConfig::default()).unwrap();

        first.record_outcome(QueryOutcome::Success);
        assert_eq!(second.queries_success.get(), 1.0);
    }

    #[test]
    fn test_new_with_conflicting_buckets_fails() {
        let registry = MetricRegistry::new();
        RagMetrics::new(&registry, &BucketConfig::default()).unwrap();

        let mut other = BucketConfig::default();
        other.generated_tokens = vec![1.0, 2.0];
        assert!(RagMetrics::new(&registry, &other).is_err());
    }

    #[test]
    fn test_record_cache_lookup() {
        let registry = MetricRegistry::new();
        let metrics = RagMetrics::new(&registry, &BucketConfig::default()).unwrap();
        metrics.record_cache_lookup(CacheLookup::Hit);
        metrics.record_cache_lookup(CacheLookup::Miss);
        metrics.record_cache_lookup(CacheLookup::Miss);
        assert_eq!(metrics.cache_hits.get(), 1.0);
        assert_eq!(metrics.cache_misses.get(), 2.0);
    }
}
