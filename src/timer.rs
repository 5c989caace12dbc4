//! Scoped phase timers.
//!
//! A [`ScopedTimer`] measures wall-clock time from [`PhaseTimer::start`] and
//! records it into the bound histogram either explicitly via
//! [`ScopedTimer::stop`] or when it is dropped. Dropping covers early returns,
//! `?` propagation and cancelled futures alike.

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use crate::registry::HistogramInstance;

/// What a timer does when it is dropped without [`ScopedTimer::stop`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordPolicy {
    /// Record the duration up to the drop point.
    #[default]
    Always,
    /// Record only phases that ran to completion.
    OnCompletion,
}

/// Factory for scoped timers bound to one histogram.
#[derive(Debug, Clone)]
pub struct PhaseTimer {
    histogram: HistogramInstance,
    policy: RecordPolicy,
}

impl PhaseTimer {
    pub fn new(histogram: HistogramInstance, policy: RecordPolicy) -> Self {
        Self { histogram, policy }
    }

    pub fn histogram(&self) -> &HistogramInstance {
        &self.histogram
    }

    /// Starts measuring.
    pub fn start(&self) -> ScopedTimer<'_> {
        ScopedTimer {
            histogram: &self.histogram,
            policy: self.policy,
            start: Instant::now(),
            recorded: false,
        }
    }
}

/// A running measurement. Records at most once.
#[must_use = "a timer records when it is stopped or dropped"]
pub struct ScopedTimer<'a> {
    histogram: &'a HistogramInstance,
    policy: RecordPolicy,
    start: Instant,
    recorded: bool,
}

impl ScopedTimer<'_> {
    /// Records the elapsed time and returns it.
    pub fn stop(mut self) -> Duration {
        let elapsed = self.start.elapsed();
        self.histogram.observe_duration(elapsed);
        self.recorded = true;
        elapsed
    }

    /// Drops the measurement without recording, regardless of policy.
    pub fn discard(mut self) {
        self.recorded = true;
    }
}

impl Drop for ScopedTimer<'_> {
    fn drop(&mut self) {
        if self.recorded || self.policy == RecordPolicy::OnCompletion {
            return;
        }
        self.histogram.observe_duration(self.start.elapsed());
    }
}
