//! Integration tests for the metric registry.
//!
//! These tests exercise registration, recording and snapshot reads through
//! the public API, including reads taken while other threads record.

use rag_metrics_exporter::registry::HistogramSnapshot;
use rag_metrics_exporter::{MetricDefinition, MetricRegistry, MetricsError, SampleValue};
use std::sync::Arc;
use std::thread;

fn histogram_snapshot(registry: &MetricRegistry, name: &str) -> HistogramSnapshot {
    match registry.sample(name, &[]).expect("sample").value {
        SampleValue::Histogram(h) => h,
        other => panic!("expected histogram, got {:?}", other),
    }
}

#[test]
fn test_histogram_buckets_partition_observations() {
    let registry = MetricRegistry::new();
    let histogram = registry
        .register(MetricDefinition::histogram(
            "docs",
            "documents",
            vec![1.0, 5.0, 10.0, 20.0, 50.0],
        ))
        .unwrap()
        .histogram(&[])
        .unwrap();

    for v in [0.5, 1.0, 3.0, 7.0, 15.0, 30.0, 75.0] {
        histogram.observe(v).unwrap();
    }

    let snap = histogram_snapshot(&registry, "docs");
    assert_eq!(snap.count, 7);
    assert!((snap.sum - 131.5).abs() < 1e-9);

    // Upper bounds are inclusive
    assert_eq!(snap.discrete_counts(), vec![2, 1, 1, 1, 1, 1]);
    assert_eq!(snap.discrete_counts().iter().sum::<u64>(), snap.count);

    let last = snap.buckets.last().unwrap();
    assert!(last.upper_bound.is_infinite());
    assert_eq!(last.cumulative_count, snap.count);
    assert!((snap.mean().unwrap() - 131.5 / 7.0).abs() < 1e-9);
}

#[test]
fn test_empty_histogram_has_no_mean() {
    let registry = MetricRegistry::new();
    registry
        .register(MetricDefinition::histogram("empty", "empty", vec![1.0]))
        .unwrap();

    let snap = histogram_snapshot(&registry, "empty");
    assert_eq!(snap.count, 0);
    assert_eq!(snap.mean(), None);
    assert!(snap.buckets.iter().all(|b| b.cumulative_count == 0));
}

#[test]
fn test_counter_accumulates_and_rejects_negative() {
    let registry = MetricRegistry::new();
    let counter = registry
        .register(MetricDefinition::counter("requests_total", "requests"))
        .unwrap()
        .counter(&[])
        .unwrap();

    counter.increment(2.5).unwrap();
    counter.increment_one();
    counter.increment(0.0).unwrap();
    assert_eq!(counter.get(), 3.5);

    let err = counter.increment(-1.0).unwrap_err();
    assert!(matches!(err, MetricsError::InvalidAmount { .. }));
    assert!(counter.increment(f64::NAN).is_err());
    assert_eq!(counter.get(), 3.5);
}

#[test]
fn test_histogram_rejects_invalid_observation() {
    let registry = MetricRegistry::new();
    let histogram = registry
        .register(MetricDefinition::histogram("h", "h", vec![1.0]))
        .unwrap()
        .histogram(&[])
        .unwrap();

    assert!(matches!(
        histogram.observe(-0.1),
        Err(MetricsError::InvalidObservation { .. })
    ));
    assert!(histogram.observe(f64::INFINITY).is_err());
    assert_eq!(histogram.sample_count(), 0);
}

#[test]
fn test_gauge_keeps_last_value() {
    let registry = MetricRegistry::new();
    let gauge = registry
        .register(MetricDefinition::gauge("queue", "queue"))
        .unwrap()
        .gauge(&[])
        .unwrap();

    gauge.set(42.0);
    gauge.set(7.0);
    assert_eq!(
        registry.sample("queue", &[]).unwrap().value,
        SampleValue::Gauge(7.0)
    );
}

#[test]
fn test_labelled_counter_instances_are_independent() {
    let registry = MetricRegistry::new();
    let handle = registry
        .register(MetricDefinition::counter("queries_total", "q").with_labels(&["status"]))
        .unwrap();

    let success = registry.counter(&handle, &["success"]).unwrap();
    let failure = registry.counter(&handle, &["failure"]).unwrap();
    success.increment_one();
    success.increment_one();
    failure.increment_one();

    // Instances come back sorted by label values
    let values: Vec<(Vec<String>, SampleValue)> = registry
        .snapshot()
        .into_iter()
        .map(|s| (s.label_values, s.value))
        .collect();
    assert_eq!(
        values,
        vec![
            (vec!["failure".to_string()], SampleValue::Counter(1.0)),
            (vec!["success".to_string()], SampleValue::Counter(2.0)),
        ]
    );
}

#[test]
fn test_identical_registration_returns_same_instruments() {
    let registry = MetricRegistry::new();
    let def = MetricDefinition::counter("same_total", "same");

    let first = registry.register(def.clone()).unwrap();
    let second = registry.register(def).unwrap();
    first.counter(&[]).unwrap().increment_one();

    assert_eq!(second.counter(&[]).unwrap().get(), 1.0);
    assert_eq!(registry.len(), 1);
}

#[test]
fn test_conflicting_registration_fails() {
    let registry = MetricRegistry::new();
    registry
        .register(MetricDefinition::counter("shared", "shared"))
        .unwrap();

    let err = registry
        .register(MetricDefinition::gauge("shared", "shared"))
        .unwrap_err();
    assert!(matches!(err, MetricsError::DuplicateNameConflict { .. }));

    let err = registry
        .register(MetricDefinition::counter("shared", "shared").with_labels(&["x"]))
        .unwrap_err();
    assert!(matches!(err, MetricsError::DuplicateNameConflict { .. }));
    assert_eq!(registry.len(), 1);
}

#[test]
fn test_snapshot_preserves_registration_order() {
    let registry = MetricRegistry::new();
    for name in ["zz", "aa", "mm"] {
        registry
            .register(MetricDefinition::gauge(name, name))
            .unwrap();
    }
    let names: Vec<String> = registry
        .snapshot()
        .iter()
        .map(|s| s.name().to_string())
        .collect();
    assert_eq!(names, vec!["zz", "aa", "mm"]);
    assert!(registry.handle("aa").is_some());
    assert!(registry.handle("missing").is_none());
}

#[test]
fn test_concurrent_snapshots_are_consistent() {
    const THREADS: usize = 4;
    const PER_THREAD: usize = 2_000;

    let registry = Arc::new(MetricRegistry::new());
    let histogram = registry
        .register(MetricDefinition::histogram(
            "concurrent",
            "concurrent",
            vec![1.0, 2.0, 3.0],
        ))
        .unwrap()
        .histogram(&[])
        .unwrap();

    let writers: Vec<_> = (0..THREADS)
        .map(|t| {
            let histogram = histogram.clone();
            thread::spawn(move || {
                for i in 0..PER_THREAD {
                    histogram.observe(((i + t) % 4) as f64).unwrap();
                }
            })
        })
        .collect();

    let reader = {
        let registry = registry.clone();
        thread::spawn(move || {
            for _ in 0..200 {
                let snap = histogram_snapshot(&registry, "concurrent");
                assert_eq!(
                    snap.buckets.last().unwrap().cumulative_count,
                    snap.count
                );
                assert_eq!(snap.discrete_counts().iter().sum::<u64>(), snap.count);
                let cumulative: Vec<u64> =
                    snap.buckets.iter().map(|b| b.cumulative_count).collect();
                assert!(cumulative.windows(2).all(|w| w[0] <= w[1]));
            }
        })
    };

    for w in writers {
        w.join().unwrap();
    }
    reader.join().unwrap();

    let snap = histogram_snapshot(&registry, "concurrent");
    assert_eq!(snap.count, (THREADS * PER_THREAD) as u64);
}
