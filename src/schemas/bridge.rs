//! Bridge result and response body shapes

use crate::error::{BridgeError, BridgeStatus};
use axum::{
    http::header,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

pub const JSON_MIME: &str = "application/json";
pub const TEXT_MIME: &str = "text/plain; charset=utf-8";

/// Response flavour picked from the caller's `Content-Type` / `Accept`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContentKind {
    /// JSON envelopes
    Structured,
    #[default]
    Plain,
}

impl ContentKind {
    /// Structured when either header mentions `application/json`
    pub fn negotiate(content_type: Option<&str>, accept: Option<&str>) -> Self {
        let wants_json = |value: Option<&str>| {
            value
                .map(|v| v.to_ascii_lowercase().contains(JSON_MIME))
                .unwrap_or(false)
        };
        if wants_json(content_type) || wants_json(accept) {
            ContentKind::Structured
        } else {
            ContentKind::Plain
        }
    }

    pub fn mime(&self) -> &'static str {
        match self {
            ContentKind::Structured => JSON_MIME,
            ContentKind::Plain => TEXT_MIME,
        }
    }
}

/// Body of a successful publish-only request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishResponse {
    pub message_id: String,
}

/// Body of any failed request in structured mode
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub status: u16,
}

/// What a bridging request produced, ready to be written back to the caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeResult {
    pub status: BridgeStatus,
    pub body: String,
    pub content_kind: ContentKind,
}

impl BridgeResult {
    /// Success carrying `body` verbatim
    pub fn success(body: impl Into<String>, content_kind: ContentKind) -> Self {
        Self {
            status: BridgeStatus::Success,
            body: body.into(),
            content_kind,
        }
    }

    /// Success of a publish-only send
    pub fn published(message_id: &str, content_kind: ContentKind) -> Self {
        let body = match content_kind {
            ContentKind::Structured => to_json(&PublishResponse {
                message_id: message_id.to_string(),
            }),
            ContentKind::Plain => message_id.to_string(),
        };
        Self::success(body, content_kind)
    }

    /// Failure with the status-specific envelope
    pub fn failure(status: BridgeStatus, message: &str, content_kind: ContentKind) -> Self {
        let code = status.code();
        let body = match content_kind {
            ContentKind::Structured => to_json(&ErrorResponse {
                error: message.to_string(),
                status: code,
            }),
            ContentKind::Plain => format!("Error {}: {}", code, message),
        };
        Self {
            status,
            body,
            content_kind,
        }
    }

    pub fn from_error(error: &BridgeError, content_kind: ContentKind) -> Self {
        Self::failure(error.status(), &error.to_string(), content_kind)
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

fn to_json<T: Serialize>(value: &T) -> String {
    // Plain string fields always serialize.
    serde_json::to_string(value).unwrap_or_default()
}

impl IntoResponse for BridgeResult {
    fn into_response(self) -> Response {
        (
            self.status.http(),
            [(header::CONTENT_TYPE, self.content_kind.mime())],
            self.body,
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_negotiate() {
        assert_eq!(
            ContentKind::negotiate(Some("application/json; charset=utf-8"), None),
            ContentKind::Structured
        );
        assert_eq!(
            ContentKind::negotiate(None, Some("text/html, APPLICATION/JSON")),
            ContentKind::Structured
        );
        assert_eq!(
            ContentKind::negotiate(Some("text/plain"), Some("*/*")),
            ContentKind::Plain
        );
        assert_eq!(ContentKind::negotiate(None, None), ContentKind::Plain);
    }

    #[test]
    fn test_published_envelopes() {
        let plain = BridgeResult::published("ID:MEMORY.1", ContentKind::Plain);
        assert_eq!(plain.body, "ID:MEMORY.1");
        assert!(plain.is_success());

        let structured = BridgeResult::published("ID:MEMORY.1", ContentKind::Structured);
        let parsed: PublishResponse = serde_json::from_str(&structured.body).unwrap();
        assert_eq!(parsed.message_id, "ID:MEMORY.1");
        assert!(structured.body.contains("\"messageId\""));
    }

    #[test]
    fn test_failure_envelopes_differ_only_in_wrapping() {
        let message = "Missing headers: JMS-URL";
        let plain = BridgeResult::failure(BridgeStatus::ClientError, message, ContentKind::Plain);
        assert_eq!(plain.body, "Error 400: Missing headers: JMS-URL");

        let structured =
            BridgeResult::failure(BridgeStatus::ClientError, message, ContentKind::Structured);
        let parsed: ErrorResponse = serde_json::from_str(&structured.body).unwrap();
        assert_eq!(parsed.error, message);
        assert_eq!(parsed.status, 400);
        assert_eq!(plain.status, structured.status);
    }

    #[test]
    fn test_structured_error_escapes_quotes() {
        let result = BridgeResult::failure(
            BridgeStatus::UpstreamError,
            "queue \"Q1\" unavailable",
            ContentKind::Structured,
        );
        let parsed: ErrorResponse = serde_json::from_str(&result.body).unwrap();
        assert_eq!(parsed.error, "queue \"Q1\" unavailable");
    }

    #[test]
    fn test_from_error_uses_error_status() {
        let result = BridgeResult::from_error(&BridgeError::Timeout(200), ContentKind::Plain);
        assert_eq!(result.status, BridgeStatus::Timeout);
        assert_eq!(result.body, "Error 504: Timeout waiting for reply after 200 ms");
    }

    #[test]
    fn test_into_response_sets_status_and_content_type() {
        let response =
            BridgeResult::failure(BridgeStatus::MethodNotAllowed, "Method Not Allowed", ContentKind::Structured)
                .into_response();
        assert_eq!(response.status(), axum::http::StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            JSON_MIME
        );
    }
}
