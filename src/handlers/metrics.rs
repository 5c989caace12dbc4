//! Metrics endpoint handler for Prometheus scraping.
//!
//! This module provides the `/metrics` endpoint handler that renders every
//! registered family in the Prometheus text exposition format.

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
};
use std::time::Instant;
use tracing::{debug, error, instrument};

use crate::state::SharedState;

/// Error type for metrics endpoint failures.
#[derive(Debug)]
pub enum MetricsEndpointError {
    EncodingFailed,
}

impl IntoResponse for MetricsEndpointError {
    fn into_response(self) -> axum::response::Response {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to encode metrics",
        )
            .into_response()
    }
}

/// Number of sample lines in an exposition body.
fn count_series(body: &str) -> usize {
    body.lines()
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .count()
}

/// Handler for the /metrics endpoint.
#[instrument(skip(state))]
pub async fn metrics_handler(
    State(state): State<SharedState>,
) -> Result<impl IntoResponse, MetricsEndpointError> {
    let start = Instant::now();
    debug!("Processing /metrics request");
    state.stats.record_http_request();

    let body = state.registry.encode_text().map_err(|e| {
        error!("Failed to encode metrics: {}", e);
        MetricsEndpointError::EncodingFailed
    })?;

    let elapsed = start.elapsed();
    state.scrape_duration.set(elapsed.as_secs_f64());
    state.stats.record_scrape(
        elapsed.as_secs_f64() * 1000.0,
        body.len(),
        count_series(&body),
    );

    debug!(
        "Metrics request completed in {:.3}ms, {} bytes",
        elapsed.as_secs_f64() * 1000.0,
        body.len()
    );

    Ok((
        [(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)],
        body,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_state;
    use rag_metrics_exporter::server_stats::ServerStats;
    use std::sync::atomic::Ordering;

    async fn scrape(state: &SharedState) -> (String, String) {
        let response = metrics_handler(State(state.clone())).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);

        let content_type = response.headers()[header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .to_string();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (content_type, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_metrics_handler_serves_exposition() {
        let state = test_state(ServerStats::new());

        let (content_type, body) = scrape(&state).await;
        assert_eq!(content_type, prometheus::TEXT_FORMAT);
        assert!(body.contains("# TYPE rag_queries_total counter"));
        assert!(body.contains("rag_queries_total{status=\"failure\"} 0"));
        assert!(body.contains("rag_query_duration_seconds_bucket{le=\"+Inf\"} 0"));
        assert!(body.contains("rag_vector_store_documents 0"));

        let first = state.scrape_duration.get();
        assert!(first > 0.0);
        assert_eq!(state.stats.metrics_endpoint_calls.load(Ordering::Relaxed), 1);

        // The previous scrape's duration is exported with the next one
        let (_, body) = scrape(&state).await;
        assert!(body.contains("# TYPE rag_exporter_scrape_duration_seconds gauge"));
        assert!(!body.contains("rag_exporter_scrape_duration_seconds 0\n"));
        assert_eq!(state.stats.metrics_endpoint_calls.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_count_series_skips_comments() {
        let body = "# HELP a help\n# TYPE a counter\na 1\nb{x=\"y\"} 2\n\n";
        assert_eq!(count_series(body), 2);
    }
}
