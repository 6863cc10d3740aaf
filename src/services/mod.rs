//! Services module
//!
//! Contains the bridge core (endpoint pool, property mapper, engine) and the
//! services built around it.

pub mod bridge;
pub mod endpoint_pool;
pub mod metrics;
pub mod properties;
pub mod reply_emulator;

pub use bridge::{BridgeEngine, BridgeReply, BridgeRequest};
pub use endpoint_pool::{EndpointPool, PoolConfig, PoolStats, PooledConnection};
pub use metrics::{BridgeMetrics, MetricsSnapshot};
pub use properties::{AttributeError, AttributeValue, MessageAttribute};
pub use reply_emulator::ReplyEmulator;
