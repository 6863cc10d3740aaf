//! Broker client errors

use thiserror::Error;

/// Errors raised by a broker client implementation.
#[derive(Debug, Clone, Error)]
pub enum BrokerError {
    /// Broker could not be reached
    #[error("Failed to connect to {url}: {reason}")]
    Connect { url: String, reason: String },

    /// Broker rejected the principal/credential pair
    #[error("Authentication failed for user '{0}'")]
    Authentication(String),

    /// URL scheme has no registered connector
    #[error("No connector registered for broker URL '{0}'")]
    UnsupportedScheme(String),

    /// Operation on a connection that has already been closed
    #[error("Connection is closed")]
    ConnectionClosed,

    /// Connection broke while in use
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// Operation on a session that has already been closed
    #[error("Session is closed")]
    SessionClosed,

    /// Destination does not exist (e.g. a temporary queue that was deleted)
    #[error("Unknown destination: {0}")]
    UnknownDestination(String),

    /// Broker refused the message
    #[error("Send failed: {0}")]
    Send(String),
}

impl BrokerError {
    /// Whether the connection that raised this error should be thrown away
    /// rather than returned to the pool.
    pub fn is_connection_fault(&self) -> bool {
        matches!(
            self,
            BrokerError::Connect { .. }
                | BrokerError::ConnectionClosed
                | BrokerError::ConnectionLost(_)
        )
    }
}

/// Result type for broker operations
pub type BrokerResult<T> = Result<T, BrokerError>;
