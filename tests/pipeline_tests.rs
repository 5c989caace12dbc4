//! Integration tests for the instrumented pipeline.
//!
//! Collaborators are scripted mocks so every exit path of `process` and of
//! the background refresh can be driven deterministically.

use async_trait::async_trait;
use rag_metrics_exporter::metrics::{
    DOCUMENTS_RETRIEVED, GENERATED_TOKENS, GENERATION_DURATION_SECONDS, QUERIES_TOTAL,
    QUERY_DURATION_SECONDS, RETRIEVAL_DURATION_SECONDS, VECTOR_STORE_DOCUMENTS,
};
use rag_metrics_exporter::registry::HistogramSnapshot;
use rag_metrics_exporter::{
    BucketConfig, CacheLookup, EmbeddingQueue, Generator, MetricRegistry, Pipeline,
    PipelineOptions, RagMetrics, RecordPolicy, Retriever, SampleValue, VectorStore,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
enum MockError {
    #[error("index unavailable")]
    IndexUnavailable,
    #[error("model overloaded: {0}")]
    ModelOverloaded(String),
}

struct MockRetriever {
    documents: usize,
    fail: bool,
}

#[async_trait]
impl Retriever for MockRetriever {
    type Error = MockError;

    async fn retrieve(&self, _query: &str) -> Result<usize, MockError> {
        tokio::time::sleep(Duration::from_millis(2)).await;
        if self.fail {
            return Err(MockError::IndexUnavailable);
        }
        Ok(self.documents)
    }
}

enum GeneratorScript {
    Respond(&'static str),
    Fail,
    Hang,
}

struct MockGenerator {
    script: GeneratorScript,
}

#[async_trait]
impl Generator for MockGenerator {
    type Error = MockError;

    async fn generate(&self, _query: &str) -> Result<String, MockError> {
        tokio::time::sleep(Duration::from_millis(2)).await;
        match self.script {
            GeneratorScript::Respond(text) => Ok(text.to_string()),
            GeneratorScript::Fail => Err(MockError::ModelOverloaded("retry later".into())),
            GeneratorScript::Hang => std::future::pending().await,
        }
    }
}

const TWELVE_WORDS: &str = "one two three four five six seven eight nine ten eleven twelve";

fn build(
    retriever: MockRetriever,
    generator: MockGenerator,
    policy: RecordPolicy,
) -> (Arc<MetricRegistry>, Pipeline<MockRetriever, MockGenerator>) {
    let registry = Arc::new(MetricRegistry::new());
    let metrics = RagMetrics::new(&registry, &BucketConfig::default()).unwrap();
    let options = PipelineOptions {
        phase_policy: policy,
        refresh_timeout: Duration::from_millis(50),
    };
    (registry.clone(), Pipeline::new(metrics, retriever, generator, options))
}

fn histogram(registry: &MetricRegistry, name: &str) -> HistogramSnapshot {
    match registry.sample(name, &[]).expect("sample").value {
        SampleValue::Histogram(h) => h,
        other => panic!("expected histogram, got {:?}", other),
    }
}

fn counter(registry: &MetricRegistry, name: &str, labels: &[&str]) -> f64 {
    match registry.sample(name, labels).expect("sample").value {
        SampleValue::Counter(v) => v,
        other => panic!("expected counter, got {:?}", other),
    }
}

fn gauge(registry: &MetricRegistry, name: &str) -> f64 {
    match registry.sample(name, &[]).expect("sample").value {
        SampleValue::Gauge(v) => v,
        other => panic!("expected gauge, got {:?}", other),
    }
}

#[tokio::test]
async fn test_successful_query_records_every_family() {
    let (registry, pipeline) = build(
        MockRetriever { documents: 7, fail: false },
        MockGenerator { script: GeneratorScript::Respond(TWELVE_WORDS) },
        RecordPolicy::Always,
    );

    let result = pipeline.process("what is rust?").await.unwrap();
    assert_eq!(result.document_count, 7);
    assert_eq!(result.token_count, 12);
    assert_eq!(result.response, TWELVE_WORDS);
    assert!(result.phase_durations.retrieval >= Duration::from_millis(2));

    assert_eq!(counter(&registry, QUERIES_TOTAL, &["success"]), 1.0);
    assert_eq!(counter(&registry, QUERIES_TOTAL, &["failure"]), 0.0);

    let docs = histogram(&registry, DOCUMENTS_RETRIEVED);
    assert_eq!((docs.count, docs.sum), (1, 7.0));
    let tokens = histogram(&registry, GENERATED_TOKENS);
    assert_eq!((tokens.count, tokens.sum), (1, 12.0));

    for name in [
        QUERY_DURATION_SECONDS,
        RETRIEVAL_DURATION_SECONDS,
        GENERATION_DURATION_SECONDS,
    ] {
        assert_eq!(histogram(&registry, name).count, 1, "{}", name);
    }

    // End-to-end covers both phases
    let total = histogram(&registry, QUERY_DURATION_SECONDS).sum;
    let phases = histogram(&registry, RETRIEVAL_DURATION_SECONDS).sum
        + histogram(&registry, GENERATION_DURATION_SECONDS).sum;
    assert!(total >= phases);
}

#[tokio::test]
async fn test_generator_failure_returns_error_unchanged() {
    let (registry, pipeline) = build(
        MockRetriever { documents: 3, fail: false },
        MockGenerator { script: GeneratorScript::Fail },
        RecordPolicy::Always,
    );

    let err = pipeline.process("q").await.unwrap_err();
    assert_eq!(err, MockError::ModelOverloaded("retry later".into()));

    assert_eq!(counter(&registry, QUERIES_TOTAL, &["failure"]), 1.0);
    assert_eq!(counter(&registry, QUERIES_TOTAL, &["success"]), 0.0);
    assert_eq!(histogram(&registry, QUERY_DURATION_SECONDS).count, 1);
    assert_eq!(histogram(&registry, RETRIEVAL_DURATION_SECONDS).count, 1);
    assert_eq!(histogram(&registry, DOCUMENTS_RETRIEVED).count, 1);
    assert_eq!(histogram(&registry, GENERATED_TOKENS).count, 0);

    // The interrupted phase is still timed under the default policy
    assert_eq!(histogram(&registry, GENERATION_DURATION_SECONDS).count, 1);
}

#[tokio::test]
async fn test_generator_failure_with_on_completion_policy() {
    let (registry, pipeline) = build(
        MockRetriever { documents: 3, fail: false },
        MockGenerator { script: GeneratorScript::Fail },
        RecordPolicy::OnCompletion,
    );

    assert!(pipeline.process("q").await.is_err());

    assert_eq!(counter(&registry, QUERIES_TOTAL, &["failure"]), 1.0);
    assert_eq!(histogram(&registry, QUERY_DURATION_SECONDS).count, 1);
    assert_eq!(histogram(&registry, RETRIEVAL_DURATION_SECONDS).count, 1);
    assert_eq!(histogram(&registry, GENERATION_DURATION_SECONDS).count, 0);
    assert_eq!(histogram(&registry, GENERATED_TOKENS).count, 0);
}

#[tokio::test]
async fn test_retriever_failure_skips_generation() {
    let (registry, pipeline) = build(
        MockRetriever { documents: 3, fail: true },
        MockGenerator { script: GeneratorScript::Respond(TWELVE_WORDS) },
        RecordPolicy::Always,
    );

    let err = pipeline.process("q").await.unwrap_err();
    assert_eq!(err, MockError::IndexUnavailable);

    assert_eq!(counter(&registry, QUERIES_TOTAL, &["failure"]), 1.0);
    assert_eq!(histogram(&registry, RETRIEVAL_DURATION_SECONDS).count, 1);
    assert_eq!(histogram(&registry, DOCUMENTS_RETRIEVED).count, 0);
    assert_eq!(histogram(&registry, GENERATION_DURATION_SECONDS).count, 0);
    assert_eq!(histogram(&registry, QUERY_DURATION_SECONDS).count, 1);
}

#[tokio::test]
async fn test_cancelled_query_counts_as_failure() {
    let (registry, pipeline) = build(
        MockRetriever { documents: 5, fail: false },
        MockGenerator { script: GeneratorScript::Hang },
        RecordPolicy::Always,
    );

    let outcome = tokio::time::timeout(Duration::from_millis(30), pipeline.process("q")).await;
    assert!(outcome.is_err(), "query should have been cancelled");

    assert_eq!(counter(&registry, QUERIES_TOTAL, &["failure"]), 1.0);
    assert_eq!(counter(&registry, QUERIES_TOTAL, &["success"]), 0.0);
    assert_eq!(histogram(&registry, QUERY_DURATION_SECONDS).count, 1);
    assert_eq!(histogram(&registry, GENERATION_DURATION_SECONDS).count, 1);
    assert_eq!(histogram(&registry, GENERATED_TOKENS).count, 0);
}

#[tokio::test]
async fn test_empty_response_yields_zero_tokens() {
    let (registry, pipeline) = build(
        MockRetriever { documents: 0, fail: false },
        MockGenerator { script: GeneratorScript::Respond("   ") },
        RecordPolicy::Always,
    );

    let result = pipeline.process("").await.unwrap();
    assert_eq!(result.document_count, 0);
    assert_eq!(result.token_count, 0);

    let tokens = histogram(&registry, GENERATED_TOKENS);
    assert_eq!((tokens.count, tokens.sum), (1, 0.0));
}

#[tokio::test]
async fn test_concurrent_queries_are_all_counted() {
    let (registry, pipeline) = build(
        MockRetriever { documents: 4, fail: false },
        MockGenerator { script: GeneratorScript::Respond("a b c") },
        RecordPolicy::Always,
    );
    let pipeline = Arc::new(pipeline);

    let tasks: Vec<_> = (0..16)
        .map(|_| {
            let pipeline = pipeline.clone();
            tokio::spawn(async move { pipeline.process("q").await })
        })
        .collect();
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    assert_eq!(counter(&registry, QUERIES_TOTAL, &["success"]), 16.0);
    let docs = histogram(&registry, DOCUMENTS_RETRIEVED);
    assert_eq!((docs.count, docs.sum), (16, 64.0));
    assert_eq!(histogram(&registry, GENERATED_TOKENS).sum, 48.0);
}

#[tokio::test]
async fn test_cache_lookups_go_to_separate_counters() {
    let (registry, pipeline) = build(
        MockRetriever { documents: 1, fail: false },
        MockGenerator { script: GeneratorScript::Respond("ok") },
        RecordPolicy::Always,
    );

    pipeline.record_cache_lookup(CacheLookup::Hit);
    pipeline.record_cache_lookup(CacheLookup::Miss);
    pipeline.record_cache_lookup(CacheLookup::Miss);

    assert_eq!(counter(&registry, "rag_cache_hits_total", &[]), 1.0);
    assert_eq!(counter(&registry, "rag_cache_misses_total", &[]), 2.0);
}

/// Vector store whose next read can be switched to fail or to hang.
struct FlakyStore {
    value: u64,
    fail: AtomicBool,
    hang: AtomicBool,
}

#[async_trait]
impl VectorStore for FlakyStore {
    async fn count(&self) -> anyhow::Result<u64> {
        if self.hang.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("vector store connection refused");
        }
        Ok(self.value)
    }
}

struct FixedQueue(u64);

#[async_trait]
impl EmbeddingQueue for FixedQueue {
    async fn depth(&self) -> anyhow::Result<u64> {
        Ok(self.0)
    }
}

#[tokio::test]
async fn test_refresh_keeps_previous_value_on_error_and_timeout() {
    let store = Arc::new(FlakyStore {
        value: 12_345,
        fail: AtomicBool::new(false),
        hang: AtomicBool::new(false),
    });
    let (registry, pipeline) = build(
        MockRetriever { documents: 1, fail: false },
        MockGenerator { script: GeneratorScript::Respond("ok") },
        RecordPolicy::Always,
    );
    let pipeline = pipeline
        .with_vector_store(store.clone())
        .with_embedding_queue(Arc::new(FixedQueue(17)));

    assert_eq!(gauge(&registry, VECTOR_STORE_DOCUMENTS), 0.0);

    pipeline.refresh_background_gauges().await;
    assert_eq!(gauge(&registry, VECTOR_STORE_DOCUMENTS), 12_345.0);
    assert_eq!(gauge(&registry, "rag_embedding_queue_size"), 17.0);

    store.fail.store(true, Ordering::SeqCst);
    pipeline.refresh_background_gauges().await;
    assert_eq!(gauge(&registry, VECTOR_STORE_DOCUMENTS), 12_345.0);

    store.fail.store(false, Ordering::SeqCst);
    store.hang.store(true, Ordering::SeqCst);
    let started = std::time::Instant::now();
    pipeline.refresh_background_gauges().await;
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(gauge(&registry, VECTOR_STORE_DOCUMENTS), 12_345.0);
}

#[tokio::test]
async fn test_refresh_without_sources_is_a_no_op() {
    let (registry, pipeline) = build(
        MockRetriever { documents: 1, fail: false },
        MockGenerator { script: GeneratorScript::Respond("ok") },
        RecordPolicy::Always,
    );
    pipeline.refresh_background_gauges().await;
    assert_eq!(gauge(&registry, VECTOR_STORE_DOCUMENTS), 0.0);
}

#[derive(Debug, thiserror::Error)]
#[error("search backend timed out")]
struct SearchTimeout;

#[derive(Debug, thiserror::Error)]
#[error("completion rejected: {0}")]
struct CompletionRejected(&'static str);

#[derive(Debug, PartialEq)]
enum QueryError {
    Search,
    Completion(&'static str),
}

impl From<SearchTimeout> for QueryError {
    fn from(_: SearchTimeout) -> Self {
        QueryError::Search
    }
}

impl From<CompletionRejected> for QueryError {
    fn from(e: CompletionRejected) -> Self {
        QueryError::Completion(e.0)
    }
}

struct SearchIndex {
    fail: bool,
}

#[async_trait]
impl Retriever for SearchIndex {
    type Error = SearchTimeout;

    async fn retrieve(&self, _query: &str) -> Result<usize, SearchTimeout> {
        if self.fail {
            return Err(SearchTimeout);
        }
        Ok(2)
    }
}

struct CompletionModel;

#[async_trait]
impl Generator for CompletionModel {
    type Error = CompletionRejected;

    async fn generate(&self, _query: &str) -> Result<String, CompletionRejected> {
        Err(CompletionRejected("content filter"))
    }
}

#[tokio::test]
async fn test_collaborators_with_distinct_error_types() {
    let registry = Arc::new(MetricRegistry::new());
    let metrics = RagMetrics::new(&registry, &BucketConfig::default()).unwrap();
    let pipeline: Pipeline<SearchIndex, CompletionModel, QueryError> = Pipeline::converging(
        metrics.clone(),
        SearchIndex { fail: false },
        CompletionModel,
        PipelineOptions::default(),
    );
    assert_eq!(
        pipeline.process("q").await.unwrap_err(),
        QueryError::Completion("content filter")
    );

    let pipeline: Pipeline<SearchIndex, CompletionModel, QueryError> = Pipeline::converging(
        metrics,
        SearchIndex { fail: true },
        CompletionModel,
        PipelineOptions::default(),
    );
    assert_eq!(pipeline.process("q").await.unwrap_err(), QueryError::Search);

    assert_eq!(counter(&registry, QUERIES_TOTAL, &["failure"]), 2.0);
    assert_eq!(histogram(&registry, DOCUMENTS_RETRIEVED).count, 1);
}
