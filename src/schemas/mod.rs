//! Schema module
//!
//! Request/response shapes of the HTTP surface.

pub mod bridge;

pub use bridge::{BridgeResult, ContentKind, ErrorResponse, PublishResponse, JSON_MIME, TEXT_MIME};
