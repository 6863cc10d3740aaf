//! Error types

mod types;

pub use types::{BridgeError, BridgeStatus};

/// Result type for bridge operations
pub type BridgeOutcome<T> = Result<T, BridgeError>;
