//! Root endpoint handler for the landing page.

use axum::{
    extract::State,
    response::{Html, IntoResponse},
};
use tracing::{debug, instrument};

use crate::handlers::health::FOOTER_TEXT;
use crate::state::SharedState;

/// Handler for the root `/` endpoint.
#[instrument(skip(state))]
pub async fn root_handler(State(state): State<SharedState>) -> impl IntoResponse {
    debug!("Processing / request");
    state.stats.record_http_request();

    let version = env!("CARGO_PKG_VERSION");

    let uptime_secs = state.stats.uptime_seconds();
    let hours = uptime_secs / 3600;
    let minutes = (uptime_secs % 3600) / 60;
    let seconds = uptime_secs % 60;
    let uptime_str = format!("{}h {}m {}s", hours, minutes, seconds);

    let health_item = if state.config.enable_health.unwrap_or(true) {
        r#"<li>
            <a href="/health">/health</a>
            <div class="endpoint-desc">Exporter scrape and query driver statistics (text)</div>
        </li>"#
    } else {
        ""
    };

    let html = format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <title>RAG Metrics Exporter</title>
    <style>
        body {{ font-family: -apple-system, 'Segoe UI', Roboto, sans-serif; margin: 0; padding: 20px; background: #f5f5f5; }}
        .container {{ max-width: 800px; margin: 0 auto; background: white; padding: 30px; border-radius: 8px; }}
        h1 {{ color: #333; border-bottom: 3px solid #007bff; padding-bottom: 10px; }}
        .endpoint-list {{ list-style: none; padding: 0; }}
        .endpoint-list li {{ margin: 15px 0; padding: 12px; background: #f8f9fa; border-left: 4px solid #007bff; }}
        .endpoint-list a {{ color: #007bff; font-weight: 600; text-decoration: none; }}
        .endpoint-desc {{ color: #666; margin-top: 4px; }}
        .footer {{ margin-top: 30px; color: #666; font-size: 0.9em; text-align: center; }}
    </style>
</head>
<body>
<div class="container">
    <h1>RAG Metrics Exporter</h1>
    <p>Version <b>{version}</b>, up {uptime}, {families} metric families registered</p>
    <ul class="endpoint-list">
        <li>
            <a href="/metrics">/metrics</a>
            <div class="endpoint-desc">Prometheus-compatible metrics endpoint</div>
        </li>
        {health_item}
    </ul>
    <div class="footer"><p>{footer}</p></div>
</div>
</body>
</html>"#,
        version = version,
        uptime = uptime_str,
        families = state.registry.len(),
        health_item = health_item,
        footer = FOOTER_TEXT
    );

    Html(html)
}
