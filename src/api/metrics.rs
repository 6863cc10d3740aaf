//! Counter endpoints

use axum::{
    extract::State,
    http::{header, HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
};

use crate::error::BridgeStatus;
use crate::schemas::{BridgeResult, ContentKind};
use crate::server::state::AppState;

const PROMETHEUS_MIME: &str = "text/plain; version=0.0.4";

/// Current counter values, JSON or `key=value` per the caller's headers
///
/// GET /metrics and GET /stats
pub async fn snapshot(
    State(state): State<AppState>,
    method: Method,
    headers: HeaderMap,
) -> BridgeResult {
    let header_value = |name| headers.get(name).and_then(|v| v.to_str().ok());
    let content_kind = ContentKind::negotiate(
        header_value(header::CONTENT_TYPE),
        header_value(header::ACCEPT),
    );

    if method != Method::GET {
        state.metrics.inc_errored();
        return BridgeResult::failure(
            BridgeStatus::MethodNotAllowed,
            "Method Not Allowed",
            content_kind,
        );
    }

    state.metrics.inc_received();
    state.metrics.inc_processed();
    BridgeResult::success(state.metrics.snapshot().render(content_kind), content_kind)
}

/// Prometheus text exposition of the bridge counters
///
/// GET /metrics/prometheus
pub async fn prometheus(State(state): State<AppState>) -> Response {
    match state.metrics.encode_prometheus() {
        Ok(text) => ([(header::CONTENT_TYPE, PROMETHEUS_MIME)], text).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode counters");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
