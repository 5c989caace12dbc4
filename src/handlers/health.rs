//! Health check endpoint handler.
//!
//! This module provides the `/health` endpoint handler that returns
//! exporter self-statistics as plain text.

use axum::{extract::State, http::StatusCode, response::IntoResponse};
use tracing::{debug, instrument};

use crate::state::SharedState;

// Time conversion constants
const SECONDS_PER_HOUR: f64 = 3600.0;
const MINUTES_PER_HOUR: f64 = 60.0;
const HOURS_PER_DAY: f64 = 24.0;

/// Footer text for human-readable HTTP endpoints.
pub const FOOTER_TEXT: &str = concat!(
    "rag-metrics-exporter ",
    env!("CARGO_PKG_VERSION"),
    " - metrics on /metrics"
);

/// Formats an uptime in minutes, hours or days.
pub fn format_uptime(uptime_seconds: u64) -> String {
    let uptime_hours = uptime_seconds as f64 / SECONDS_PER_HOUR;
    if uptime_hours < 1.0 {
        format!("{:.1} minutes", uptime_hours * MINUTES_PER_HOUR)
    } else if uptime_hours < HOURS_PER_DAY {
        format!("{:.1} hours", uptime_hours)
    } else {
        format!("{:.1} days", uptime_hours / HOURS_PER_DAY)
    }
}

/// Handler for the /health endpoint.
#[instrument(skip(state))]
pub async fn health_handler(State(state): State<SharedState>) -> impl IntoResponse {
    debug!("Processing /health request");
    state.stats.record_http_request();

    let uptime_str = format_uptime(state.stats.uptime_seconds());
    let table = state.stats.render_table();
    let families = state.registry.len();

    (
        StatusCode::OK,
        [("Content-Type", "text/plain; charset=utf-8")],
        format!(
            "OK\n\nUptime: {uptime_str}\nRegistered metric families: {families}\n\n{table}\n{FOOTER_TEXT}"
        ),
    )
}
