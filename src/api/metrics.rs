//! Prometheus exposition endpoint
//!
//! Serves every registered `anchor_*` instrument in the Prometheus
//! text format. Mounted outside the stateful router so scrapes skip
//! the compression/CORS middleware stack.

use axum::{
    Router,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use prometheus::{Encoder, TextEncoder};

use crate::metrics::REGISTRY;

async fn serve_metrics() -> Response {
    let families = REGISTRY.gather();
    let encoder = TextEncoder::new();

    match encoder.encode_to_string(&families) {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, encoder.format_type())],
            body,
        )
            .into_response(),
        Err(error) => {
            tracing::error!(%error, "Metrics encoding failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Router exposing `GET /metrics`
pub fn metrics_router<S>() -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    Router::new().route("/metrics", get(serve_metrics))
}
