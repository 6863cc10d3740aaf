//! Bridge error types

use crate::broker::BrokerError;
use axum::http::StatusCode;
use thiserror::Error;

/// Outcome class of a bridging request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeStatus {
    Success,
    ClientError,
    MethodNotAllowed,
    UpstreamError,
    Timeout,
}

impl BridgeStatus {
    pub fn code(&self) -> u16 {
        match self {
            BridgeStatus::Success => 200,
            BridgeStatus::ClientError => 400,
            BridgeStatus::MethodNotAllowed => 405,
            BridgeStatus::UpstreamError => 503,
            BridgeStatus::Timeout => 504,
        }
    }

    pub fn http(&self) -> StatusCode {
        match self {
            BridgeStatus::Success => StatusCode::OK,
            BridgeStatus::ClientError => StatusCode::BAD_REQUEST,
            BridgeStatus::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            BridgeStatus::UpstreamError => StatusCode::SERVICE_UNAVAILABLE,
            BridgeStatus::Timeout => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, BridgeStatus::Success)
    }
}

/// Errors that abort a bridging request.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Correlation id is empty after trimming or too large
    #[error("Invalid correlation id: {0}")]
    InvalidCorrelationId(String),

    /// Destination name is blank or contains wildcards
    #[error("Invalid destination '{name}': {reason}")]
    InvalidDestination { name: String, reason: String },

    /// Broker connection, session or send failure
    #[error("EMS error: {0}")]
    Broker(#[from] BrokerError),

    /// No reply arrived within the timeout
    #[error("Timeout waiting for reply after {0} ms")]
    Timeout(u64),

    /// Reply was not a text message
    #[error("Unexpected reply: {0}")]
    UnexpectedReply(String),

    /// Reply slot went away before a reply arrived
    #[error("Reply channel closed before a reply arrived")]
    ReplyChannelClosed,

    /// Bridging worker could not run or crashed
    #[error("Worker failure: {0}")]
    Worker(String),
}

impl BridgeError {
    /// Result status this error is reported with
    pub fn status(&self) -> BridgeStatus {
        match self {
            BridgeError::Timeout(_) => BridgeStatus::Timeout,
            _ => BridgeStatus::UpstreamError,
        }
    }

    /// Whether the connection used by the request must be thrown away
    pub fn is_connection_fault(&self) -> bool {
        matches!(self, BridgeError::Broker(e) if e.is_connection_fault())
    }
}
