//! Exporter self-statistics.
//!
//! Tracks how the exporter itself behaves (scrape timings, response sizes,
//! driver activity) for the plain-text `/health` endpoint. These numbers are
//! not part of the scraped metric set.

use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::fmt::Write as FmtWrite;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Window kept by [`RequestTimestamps`].
const REQUEST_HISTORY: Duration = Duration::from_secs(600);

/// Running statistics for a single value.
#[derive(Clone, Copy, Default, Debug)]
pub struct RunningStat {
    count: u64,
    sum: f64,
    min: f64,
    max: f64,
    last: f64,
}

impl RunningStat {
    pub fn add(&mut self, value: f64) {
        if self.count == 0 {
            self.min = value;
            self.max = value;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }
        self.count += 1;
        self.sum += value;
        self.last = value;
    }

    pub fn avg(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / (self.count as f64)
        }
    }
}

/// Point-in-time copy of a [`Stat`].
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct StatSnapshot {
    pub last: f64,
    pub avg: f64,
    pub max: f64,
    pub min: f64,
    pub count: u64,
}

/// Thread-safe wrapper for running statistics.
#[derive(Default)]
pub struct Stat {
    inner: Mutex<RunningStat>,
}

impl Stat {
    pub fn add_sample(&self, value: f64) {
        if let Ok(mut s) = self.inner.lock() {
            s.add(value);
        }
    }

    pub fn snapshot(&self) -> StatSnapshot {
        self.inner
            .lock()
            .map(|s| StatSnapshot {
                last: s.last,
                avg: s.avg(),
                max: s.max,
                min: s.min,
                count: s.count,
            })
            .unwrap_or_default()
    }
}

/// Sliding window of HTTP request timestamps.
pub struct RequestTimestamps {
    inner: Mutex<VecDeque<Instant>>,
}

impl Default for RequestTimestamps {
    fn default() -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(1024)),
        }
    }
}

impl RequestTimestamps {
    pub fn record(&self) {
        if let Ok(mut guard) = self.inner.lock() {
            let now = Instant::now();
            guard.push_back(now);
            while guard
                .front()
                .is_some_and(|&t| now.duration_since(t) > REQUEST_HISTORY)
            {
                guard.pop_front();
            }
        }
    }

    pub fn count_last_minute(&self) -> u64 {
        let Ok(guard) = self.inner.lock() else {
            return 0;
        };
        let now = Instant::now();
        guard
            .iter()
            .filter(|&&t| now.duration_since(t) <= Duration::from_secs(60))
            .count() as u64
    }
}

/// Statistics about the exporter process.
pub struct ServerStats {
    // HTTP server
    pub http_request_timestamps: RequestTimestamps,
    pub metrics_endpoint_calls: AtomicU64,
    pub scrape_duration_ms: Stat,
    pub scrape_response_size_kb: Stat,
    pub scrape_series: Stat,

    // Query driver
    pub queries_succeeded: AtomicU64,
    pub queries_failed: AtomicU64,
    pub query_duration_seconds: Stat,
    pub gauge_refreshes: AtomicU64,

    // Timing
    pub start_time: Instant,
    pub started_at: DateTime<Utc>,
}

impl Default for ServerStats {
    fn default() -> Self {
        Self {
            http_request_timestamps: RequestTimestamps::default(),
            metrics_endpoint_calls: AtomicU64::new(0),
            scrape_duration_ms: Stat::default(),
            scrape_response_size_kb: Stat::default(),
            scrape_series: Stat::default(),
            queries_succeeded: AtomicU64::new(0),
            queries_failed: AtomicU64::new(0),
            query_duration_seconds: Stat::default(),
            gauge_refreshes: AtomicU64::new(0),
            start_time: Instant::now(),
            started_at: Utc::now(),
        }
    }
}

impl ServerStats {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn record_http_request(&self) {
        self.http_request_timestamps.record();
    }

    pub fn record_scrape(&self, duration_ms: f64, response_bytes: usize, series: usize) {
        self.metrics_endpoint_calls.fetch_add(1, Ordering::Relaxed);
        self.scrape_duration_ms.add_sample(duration_ms);
        self.scrape_response_size_kb
            .add_sample(response_bytes as f64 / 1024.0);
        self.scrape_series.add_sample(series as f64);
    }

    pub fn record_query(&self, succeeded: bool, duration_seconds: f64) {
        if succeeded {
            self.queries_succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.queries_failed.fetch_add(1, Ordering::Relaxed);
        }
        self.query_duration_seconds.add_sample(duration_seconds);
    }

    pub fn record_gauge_refresh(&self) {
        self.gauge_refreshes.fetch_add(1, Ordering::Relaxed);
    }

    /// Percentage of driver queries that succeeded; 100 before the first query.
    pub fn query_success_rate(&self) -> f64 {
        let success = self.queries_succeeded.load(Ordering::Relaxed);
        let failure = self.queries_failed.load(Ordering::Relaxed);
        let total = success + failure;
        if total == 0 {
            100.0
        } else {
            (success as f64 / total as f64) * 100.0
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    pub fn render_table(&self) -> String {
        let left_col = 26usize;
        let col_w = 12usize;
        let mut out = String::new();

        let stat_row = |out: &mut String, name: &str, s: StatSnapshot, precision: usize| {
            writeln!(
                out,
                "{:left$} | {:^col$} | {:^col$} | {:^col$} | {:^col$}",
                name,
                format!("{:.p$}", s.last, p = precision),
                format!("{:.p$}", s.avg, p = precision),
                format!("{:.p$}", s.max, p = precision),
                format!("{:.p$}", s.min, p = precision),
                left = left_col,
                col = col_w
            )
            .ok();
        };
        let value_row = |out: &mut String, name: &str, value: String| {
            writeln!(
                out,
                "{:left$} | {:^col$}",
                name,
                value,
                left = left_col,
                col = col_w
            )
            .ok();
        };

        writeln!(out, "HEALTH ENDPOINT - EXPORTER INTERNAL STATS").ok();
        writeln!(out, "==========================================").ok();
        writeln!(out).ok();
        writeln!(
            out,
            "{:left$} | {:^col$} | {:^col$} | {:^col$} | {:^col$}",
            "",
            "current",
            "average",
            "max",
            "min",
            left = left_col,
            col = col_w
        )
        .ok();

        writeln!(out).ok();
        writeln!(out, "SCRAPES").ok();
        writeln!(out, "-------").ok();
        stat_row(&mut out, "scrape_duration (ms)", self.scrape_duration_ms.snapshot(), 3);
        stat_row(
            &mut out,
            "response_size (KB)",
            self.scrape_response_size_kb.snapshot(),
            1,
        );
        stat_row(&mut out, "time_series", self.scrape_series.snapshot(), 0);
        value_row(
            &mut out,
            "metrics_endpoint_calls",
            self.metrics_endpoint_calls.load(Ordering::Relaxed).to_string(),
        );
        value_row(
            &mut out,
            "http_requests_last_minute",
            self.http_request_timestamps.count_last_minute().to_string(),
        );

        writeln!(out).ok();
        writeln!(out, "QUERY DRIVER").ok();
        writeln!(out, "------------").ok();
        stat_row(
            &mut out,
            "query_duration (s)",
            self.query_duration_seconds.snapshot(),
            3,
        );
        value_row(
            &mut out,
            "queries_succeeded",
            self.queries_succeeded.load(Ordering::Relaxed).to_string(),
        );
        value_row(
            &mut out,
            "queries_failed",
            self.queries_failed.load(Ordering::Relaxed).to_string(),
        );
        value_row(
            &mut out,
            "query_success_rate (%)",
            format!("{:.1}", self.query_success_rate()),
        );
        value_row(
            &mut out,
            "gauge_refreshes",
            self.gauge_refreshes.load(Ordering::Relaxed).to_string(),
        );

        writeln!(out).ok();
        writeln!(
            out,
            "Started at: {}",
            self.started_at.format("%Y-%m-%d %H:%M:%S UTC")
        )
        .ok();
        out
    }
}
