//! Bridging endpoint
//!
//! `GET|POST /` and `/api`. Routing, credentials and message attributes all
//! travel as headers; the body is the message text.

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, Method},
};
use std::collections::HashMap;

use crate::broker::EndpointKey;
use crate::error::BridgeStatus;
use crate::schemas::{BridgeResult, ContentKind};
use crate::server::state::AppState;
use crate::services::properties::normalize_key;
use crate::services::BridgeRequest;

/// Headers that must be present and non-blank, in reporting order
const REQUIRED_HEADERS: &[(&str, &str)] = &[
    ("Jms-usr", "JMS-USR"),
    ("Jms-url", "JMS-URL"),
    ("Jms-qu1", "JMS-QU1"),
];

/// Request headers keyed by normalized name; the first value of a repeated
/// header wins. Values are decoded as UTF-8, lossily, so queue names and
/// properties outside ASCII still reach the broker.
struct BridgeHeaders {
    values: HashMap<String, String>,
}

impl BridgeHeaders {
    fn from_map(headers: &HeaderMap) -> Self {
        let mut values = HashMap::new();
        for (name, value) in headers {
            values
                .entry(normalize_key(name.as_str()))
                .or_insert_with(|| String::from_utf8_lossy(value.as_bytes()).into_owned());
        }
        Self { values }
    }

    fn get(&self, normalized: &str) -> Option<&str> {
        self.values.get(normalized).map(String::as_str)
    }

    /// Present and not blank
    fn non_blank(&self, normalized: &str) -> Option<&str> {
        self.get(normalized).filter(|v| !v.trim().is_empty())
    }

    fn flag(&self, normalized: &str) -> bool {
        self.get(normalized)
            .map(|v| v.trim().eq_ignore_ascii_case("YES"))
            .unwrap_or(false)
    }

    fn content_kind(&self) -> ContentKind {
        ContentKind::negotiate(self.get("Content-type"), self.get("Accept"))
    }

    fn missing_required(&self) -> Vec<&'static str> {
        REQUIRED_HEADERS
            .iter()
            .filter(|(normalized, _)| self.non_blank(normalized).is_none())
            .map(|(_, display)| *display)
            .collect()
    }

    /// Unparsable values fall back to the engine default
    fn timeout_ms(&self) -> i64 {
        self.get("Jms-timeout")
            .and_then(|v| v.trim().parse::<i64>().ok())
            .unwrap_or(0)
    }

    fn pairs(&self) -> impl Iterator<Item = (String, String)> + '_ {
        self.values.iter().map(|(k, v)| (k.clone(), v.clone()))
    }
}

/// Bridge one HTTP call onto the broker
///
/// GET|POST / and GET|POST /api
pub async fn bridge(
    State(state): State<AppState>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> BridgeResult {
    let headers = BridgeHeaders::from_map(&headers);
    let content_kind = headers.content_kind();
    let metrics = &state.metrics;

    if method != Method::GET && method != Method::POST {
        metrics.inc_errored();
        return BridgeResult::failure(
            BridgeStatus::MethodNotAllowed,
            "Method Not Allowed",
            content_kind,
        );
    }
    metrics.inc_received();

    if headers.flag("Statistics") {
        metrics.inc_processed();
        return BridgeResult::success(metrics.snapshot().render(content_kind), content_kind);
    }

    let missing = headers.missing_required();
    if !missing.is_empty() {
        metrics.inc_errored();
        tracing::warn!(missing = ?missing, "Bridging request rejected");
        return BridgeResult::failure(
            BridgeStatus::ClientError,
            &format!("Missing headers: {}", missing.join(", ")),
            content_kind,
        );
    }

    let endpoint = EndpointKey::new(
        headers.get("Jms-url").unwrap_or_default().trim(),
        headers.get("Jms-usr").unwrap_or_default().trim(),
        headers.get("Jms-psw").map(str::to_string),
    );
    let destination = headers.get("Jms-qu1").unwrap_or_default().trim().to_string();

    let request = BridgeRequest::new(endpoint, destination, String::from_utf8_lossy(&body))
        .with_reply_queue(headers.get("Jms-qu2").map(|q| q.trim().to_string()))
        .with_publish_only(headers.flag("Jms-publish-only"))
        .with_timeout_ms(headers.timeout_ms())
        .with_correlation_id(headers.get("Jms-correlation-id").map(str::to_string))
        .with_attributes(headers.pairs())
        .with_verbose(headers.flag("Debug"));

    let result = state.engine.bridge(request, content_kind).await;
    if result.is_success() {
        metrics.inc_returned();
        metrics.inc_processed();
    } else {
        metrics.inc_errored();
    }
    result
}
