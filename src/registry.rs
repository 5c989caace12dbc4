//! Metric registry backed by the `prometheus` crate.
//!
//! The registry owns every instrument family, keeps the definitions in
//! registration order and offers two read paths: [`MetricRegistry::snapshot`]
//! for structured point-in-time reads and [`MetricRegistry::encode_text`] for
//! the Prometheus text exposition served on `/metrics`.
//!
//! Recording goes straight to the prometheus atomics. The definition index is
//! behind an `RwLock` that is only taken while registering or while
//! enumerating families for a snapshot, never on the recording path.

use ahash::AHashMap as HashMap;
use prometheus::core::Collector;
use prometheus::proto::{LabelPair, Metric, MetricFamily};
use prometheus::{
    Counter, CounterVec, Encoder, Gauge, GaugeVec, Histogram, HistogramOpts, HistogramVec, Opts,
    Registry, TextEncoder,
};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tracing::debug;

use crate::error::{MetricsError, Result};

/// Buffer capacity for text encoding.
const ENCODE_BUFFER_CAP: usize = 16 * 1024;

/// Kind of a metric family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricKind {
    Counter,
    Histogram,
    Gauge,
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MetricKind::Counter => "counter",
            MetricKind::Histogram => "histogram",
            MetricKind::Gauge => "gauge",
        };
        f.write_str(name)
    }
}

/// Static description of a metric family.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricDefinition {
    pub name: String,
    pub help: String,
    pub kind: MetricKind,
    /// Label names in declaration order. Snapshots report values in this order.
    pub label_names: Vec<String>,
    /// Upper bounds of the histogram buckets, strictly increasing. Empty for
    /// counters and gauges; the `+Inf` bucket is implicit.
    pub buckets: Vec<f64>,
}

impl MetricDefinition {
    pub fn counter(name: impl Into<String>, help: impl Into<String>) -> Self {
        Self::new(name, help, MetricKind::Counter, Vec::new())
    }

    pub fn gauge(name: impl Into<String>, help: impl Into<String>) -> Self {
        Self::new(name, help, MetricKind::Gauge, Vec::new())
    }

    pub fn histogram(
        name: impl Into<String>,
        help: impl Into<String>,
        buckets: impl Into<Vec<f64>>,
    ) -> Self {
        Self::new(name, help, MetricKind::Histogram, buckets.into())
    }

    fn new(
        name: impl Into<String>,
        help: impl Into<String>,
        kind: MetricKind,
        buckets: Vec<f64>,
    ) -> Self {
        Self {
            name: name.into(),
            help: help.into(),
            kind,
            label_names: Vec::new(),
            buckets,
        }
    }

    /// Sets the label schema of this family.
    pub fn with_labels(mut self, labels: &[&str]) -> Self {
        self.label_names = labels.iter().map(|l| l.to_string()).collect();
        self
    }

    /// Checks the structural invariants that hold independently of the backend.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: &str| MetricsError::InvalidDefinition {
            name: self.name.clone(),
            reason: reason.to_string(),
        };

        if self.name.is_empty() {
            return Err(invalid("name must not be empty"));
        }

        for (i, label) in self.label_names.iter().enumerate() {
            if self.label_names[..i].contains(label) {
                return Err(invalid(&format!("duplicate label name '{}'", label)));
            }
        }

        match self.kind {
            MetricKind::Histogram => {
                validate_buckets(&self.buckets).map_err(|reason| invalid(&reason))?;
            }
            MetricKind::Counter | MetricKind::Gauge => {
                if !self.buckets.is_empty() {
                    return Err(invalid("only histograms may declare buckets"));
                }
            }
        }

        Ok(())
    }

    fn label_refs(&self) -> Vec<&str> {
        self.label_names.iter().map(String::as_str).collect()
    }

    /// Reorders prometheus label pairs (sorted by name) into declaration order.
    fn label_values_from(&self, pairs: &[LabelPair]) -> Vec<String> {
        self.label_names
            .iter()
            .map(|name| {
                pairs
                    .iter()
                    .find(|p| p.name() == name.as_str())
                    .map(|p| p.value().to_string())
                    .unwrap_or_default()
            })
            .collect()
    }
}

/// Validates histogram bucket boundaries: non-empty, finite, strictly increasing.
pub fn validate_buckets(buckets: &[f64]) -> std::result::Result<(), String> {
    if buckets.is_empty() {
        return Err("histogram requires at least one bucket boundary".into());
    }
    if let Some(b) = buckets.iter().find(|b| !b.is_finite()) {
        return Err(format!(
            "bucket boundary {} is not finite (+Inf is implicit)",
            b
        ));
    }
    if let Some(w) = buckets.windows(2).find(|w| w[0] >= w[1]) {
        return Err(format!(
            "bucket boundaries must be strictly increasing ({} >= {})",
            w[0], w[1]
        ));
    }
    Ok(())
}

#[derive(Clone)]
enum Instruments {
    Counter(CounterVec),
    Histogram(HistogramVec),
    Gauge(GaugeVec),
}

impl Instruments {
    fn build(definition: &MetricDefinition) -> Result<Self> {
        let labels = definition.label_refs();
        let instruments = match definition.kind {
            MetricKind::Counter => Instruments::Counter(CounterVec::new(
                Opts::new(&definition.name, &definition.help),
                &labels,
            )?),
            MetricKind::Histogram => Instruments::Histogram(HistogramVec::new(
                HistogramOpts::new(&definition.name, &definition.help)
                    .buckets(definition.buckets.clone()),
                &labels,
            )?),
            MetricKind::Gauge => Instruments::Gauge(GaugeVec::new(
                Opts::new(&definition.name, &definition.help),
                &labels,
            )?),
        };
        Ok(instruments)
    }

    fn boxed(&self) -> Box<dyn Collector> {
        match self {
            Instruments::Counter(v) => Box::new(v.clone()),
            Instruments::Histogram(v) => Box::new(v.clone()),
            Instruments::Gauge(v) => Box::new(v.clone()),
        }
    }

    fn collect(&self) -> Vec<MetricFamily> {
        match self {
            Instruments::Counter(v) => v.collect(),
            Instruments::Histogram(v) => v.collect(),
            Instruments::Gauge(v) => v.collect(),
        }
    }
}

/// Handle to a registered metric family.
///
/// Cloning is cheap; clones address the same instruments.
#[derive(Clone)]
pub struct MetricHandle {
    definition: Arc<MetricDefinition>,
    instruments: Instruments,
}

impl fmt::Debug for MetricHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetricHandle")
            .field("name", &self.definition.name)
            .field("kind", &self.definition.kind)
            .finish()
    }
}

impl MetricHandle {
    fn check_labels(&self, labels: &[&str]) -> Result<()> {
        if labels.len() != self.definition.label_names.len() {
            return Err(MetricsError::LabelMismatch {
                name: self.definition.name.clone(),
                expected: self.definition.label_names.len(),
                got: labels.len(),
            });
        }
        Ok(())
    }

    fn kind_mismatch(&self, expected: MetricKind) -> MetricsError {
        MetricsError::KindMismatch {
            name: self.definition.name.clone(),
            expected,
            actual: self.definition.kind,
        }
    }

    /// Returns the counter instance for `labels`, creating it on first use.
    pub fn counter(&self, labels: &[&str]) -> Result<CounterInstance> {
        let Instruments::Counter(vec) = &self.instruments else {
            return Err(self.kind_mismatch(MetricKind::Counter));
        };
        self.check_labels(labels)?;
        Ok(CounterInstance {
            definition: self.definition.clone(),
            inner: vec.get_metric_with_label_values(labels)?,
        })
    }

    /// Returns the histogram instance for `labels`, creating it on first use.
    pub fn histogram(&self, labels: &[&str]) -> Result<HistogramInstance> {
        let Instruments::Histogram(vec) = &self.instruments else {
            return Err(self.kind_mismatch(MetricKind::Histogram));
        };
        self.check_labels(labels)?;
        Ok(HistogramInstance {
            definition: self.definition.clone(),
            inner: vec.get_metric_with_label_values(labels)?,
        })
    }

    /// Returns the gauge instance for `labels`, creating it on first use.
    pub fn gauge(&self, labels: &[&str]) -> Result<GaugeInstance> {
        let Instruments::Gauge(vec) = &self.instruments else {
            return Err(self.kind_mismatch(MetricKind::Gauge));
        };
        self.check_labels(labels)?;
        Ok(GaugeInstance {
            definition: self.definition.clone(),
            inner: vec.get_metric_with_label_values(labels)?,
        })
    }

    /// Materializes the single instance of a label-less family so it is
    /// scraped as zero before the first update.
    fn touch_unlabelled(&self) -> Result<()> {
        if !self.definition.label_names.is_empty() {
            return Ok(());
        }
        match self.definition.kind {
            MetricKind::Counter => self.counter(&[]).map(drop),
            MetricKind::Histogram => self.histogram(&[]).map(drop),
            MetricKind::Gauge => self.gauge(&[]).map(drop),
        }
    }
}

/// A single counter series.
#[derive(Clone)]
pub struct CounterInstance {
    definition: Arc<MetricDefinition>,
    inner: Counter,
}

impl fmt::Debug for CounterInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CounterInstance")
            .field("name", &self.definition.name)
            .field("value", &self.inner.get())
            .finish()
    }
}

impl CounterInstance {
    /// Adds `amount` to the counter. Negative or non-finite amounts are
    /// rejected and leave the counter unchanged.
    pub fn increment(&self, amount: f64) -> Result<()> {
        if !amount.is_finite() || amount < 0.0 {
            return Err(MetricsError::InvalidAmount {
                name: self.definition.name.clone(),
                amount,
            });
        }
        self.inner.inc_by(amount);
        Ok(())
    }

    pub fn increment_one(&self) {
        self.inner.inc();
    }

    pub fn get(&self) -> f64 {
        self.inner.get()
    }
}

/// A single histogram series.
#[derive(Clone)]
pub struct HistogramInstance {
    definition: Arc<MetricDefinition>,
    inner: Histogram,
}

impl fmt::Debug for HistogramInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HistogramInstance")
            .field("name", &self.definition.name)
            .field("count", &self.inner.get_sample_count())
            .finish()
    }
}

impl HistogramInstance {
    /// Records one observation. Negative or non-finite values are rejected.
    pub fn observe(&self, value: f64) -> Result<()> {
        if !value.is_finite() || value < 0.0 {
            return Err(MetricsError::InvalidObservation {
                name: self.definition.name.clone(),
                value,
            });
        }
        self.inner.observe(value);
        Ok(())
    }

    /// Records a duration in seconds. Durations are always valid observations.
    pub fn observe_duration(&self, elapsed: Duration) {
        self.inner.observe(elapsed.as_secs_f64());
    }

    pub fn sample_count(&self) -> u64 {
        self.inner.get_sample_count()
    }

    pub fn sample_sum(&self) -> f64 {
        self.inner.get_sample_sum()
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }
}

/// A single gauge series.
#[derive(Clone)]
pub struct GaugeInstance {
    definition: Arc<MetricDefinition>,
    inner: Gauge,
}

impl fmt::Debug for GaugeInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GaugeInstance")
            .field("name", &self.definition.name)
            .field("value", &self.inner.get())
            .finish()
    }
}

impl GaugeInstance {
    /// Overwrites the gauge value.
    pub fn set(&self, value: f64) {
        self.inner.set(value);
    }

    pub fn get(&self) -> f64 {
        self.inner.get()
    }
}

/// One cumulative histogram bucket.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketCount {
    pub upper_bound: f64,
    pub cumulative_count: u64,
}

/// Point-in-time histogram read. The last bucket is always `+Inf` and its
/// cumulative count equals `count`.
#[derive(Debug, Clone, PartialEq)]
pub struct HistogramSnapshot {
    pub buckets: Vec<BucketCount>,
    pub sum: f64,
    pub count: u64,
}

impl HistogramSnapshot {
    /// Per-bucket (non-cumulative) counts, in bucket order.
    pub fn discrete_counts(&self) -> Vec<u64> {
        let mut previous = 0;
        self.buckets
            .iter()
            .map(|b| {
                let c = b.cumulative_count.saturating_sub(previous);
                previous = b.cumulative_count;
                c
            })
            .collect()
    }

    pub fn mean(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SampleValue {
    Counter(f64),
    Gauge(f64),
    Histogram(HistogramSnapshot),
}

/// One metric instance as read by [`MetricRegistry::snapshot`].
#[derive(Debug, Clone)]
pub struct MetricSample {
    pub definition: Arc<MetricDefinition>,
    pub label_values: Vec<String>,
    pub value: SampleValue,
}

impl MetricSample {
    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn has_labels(&self, labels: &[&str]) -> bool {
        self.label_values.len() == labels.len()
            && self.label_values.iter().zip(labels).all(|(a, b)| a == b)
    }
}

fn read_sample(definition: &Arc<MetricDefinition>, metric: &Metric) -> MetricSample {
    let value = match definition.kind {
        MetricKind::Counter => SampleValue::Counter(metric.get_counter().value()),
        MetricKind::Gauge => SampleValue::Gauge(metric.get_gauge().value()),
        MetricKind::Histogram => {
            let h = metric.get_histogram();
            let count = h.get_sample_count();
            let mut buckets: Vec<BucketCount> = h
                .get_bucket()
                .iter()
                .filter(|b| b.upper_bound().is_finite())
                .map(|b| BucketCount {
                    upper_bound: b.upper_bound(),
                    cumulative_count: b.cumulative_count(),
                })
                .collect();
            buckets.push(BucketCount {
                upper_bound: f64::INFINITY,
                cumulative_count: count,
            });
            SampleValue::Histogram(HistogramSnapshot {
                buckets,
                sum: h.get_sample_sum(),
                count,
            })
        }
    };

    MetricSample {
        definition: definition.clone(),
        label_values: definition.label_values_from(metric.get_label()),
        value,
    }
}

#[derive(Default)]
struct Families {
    order: Vec<MetricHandle>,
    by_name: HashMap<String, usize>,
}

/// Owner of all metric families of a process.
///
/// Construct one at startup and share it by `Arc`; tests construct a fresh
/// registry each.
pub struct MetricRegistry {
    inner: Registry,
    families: RwLock<Families>,
}

impl Default for MetricRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricRegistry {
    pub fn new() -> Self {
        Self {
            inner: Registry::new(),
            families: RwLock::new(Families::default()),
        }
    }

    /// Registers a metric family.
    ///
    /// Re-registering an identical definition returns a handle to the
    /// existing instruments. Any other definition under a known name fails
    /// with [`MetricsError::DuplicateNameConflict`].
    pub fn register(&self, definition: MetricDefinition) -> Result<MetricHandle> {
        definition.validate()?;

        let mut families = self.families.write().unwrap_or_else(PoisonError::into_inner);

        if let Some(&idx) = families.by_name.get(&definition.name) {
            let existing = &families.order[idx];
            if *existing.definition == definition {
                debug!("Metric '{}' already registered, reusing handle", definition.name);
                return Ok(existing.clone());
            }
            return Err(MetricsError::DuplicateNameConflict {
                name: definition.name,
                existing: existing.definition.kind,
                requested: definition.kind,
            });
        }

        let instruments = Instruments::build(&definition)?;
        self.inner.register(instruments.boxed())?;

        let handle = MetricHandle {
            definition: Arc::new(definition),
            instruments,
        };
        handle.touch_unlabelled()?;

        debug!(
            "Registered {} '{}' with labels {:?}",
            handle.definition.kind, handle.definition.name, handle.definition.label_names
        );

        let idx = families.order.len();
        families.by_name.insert(handle.definition.name.clone(), idx);
        families.order.push(handle.clone());
        Ok(handle)
    }

    pub fn counter(&self, handle: &MetricHandle, labels: &[&str]) -> Result<CounterInstance> {
        handle.counter(labels)
    }

    pub fn histogram(&self, handle: &MetricHandle, labels: &[&str]) -> Result<HistogramInstance> {
        handle.histogram(labels)
    }

    pub fn gauge(&self, handle: &MetricHandle, labels: &[&str]) -> Result<GaugeInstance> {
        handle.gauge(labels)
    }

    /// Looks up a registered family by name.
    pub fn handle(&self, name: &str) -> Option<MetricHandle> {
        let families = self.families.read().unwrap_or_else(PoisonError::into_inner);
        families
            .by_name
            .get(name)
            .map(|&idx| families.order[idx].clone())
    }

    /// Number of registered families.
    pub fn len(&self) -> usize {
        self.families
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .order
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reads every instance, families in registration order and instances
    /// sorted by label values.
    ///
    /// Each histogram is read through prometheus' hot/cold shard swap, so a
    /// sample never mixes bucket counts from before and after a concurrent
    /// observation.
    pub fn snapshot(&self) -> Vec<MetricSample> {
        let handles: Vec<MetricHandle> = self
            .families
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .order
            .clone();

        let mut samples = Vec::new();
        for handle in &handles {
            let mut family_samples: Vec<MetricSample> = handle
                .instruments
                .collect()
                .iter()
                .flat_map(|family| family.get_metric())
                .map(|metric| read_sample(&handle.definition, metric))
                .collect();
            family_samples.sort_by(|a, b| a.label_values.cmp(&b.label_values));
            samples.extend(family_samples);
        }
        samples
    }

    /// Finds the sample for `name` with exactly `labels`.
    pub fn sample(&self, name: &str, labels: &[&str]) -> Option<MetricSample> {
        self.snapshot()
            .into_iter()
            .find(|s| s.name() == name && s.has_labels(labels))
    }

    /// Renders all families in the Prometheus text exposition format.
    pub fn encode_text(&self) -> Result<String> {
        let families = self.inner.gather();
        let mut buffer = Vec::with_capacity(ENCODE_BUFFER_CAP);
        TextEncoder::new()
            .encode(&families, &mut buffer)
            .map_err(|e| MetricsError::Encoding(e.to_string()))?;
        String::from_utf8(buffer).map_err(|e| MetricsError::Encoding(e.to_string()))
    }
}
