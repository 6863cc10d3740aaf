//! Endpoint Pool Module
//!
//! Keeps broker connections alive between bridging requests so that each
//! request does not pay for connection setup.
//!
//! # Features
//! - One cached connection factory per endpoint (address, principal, credential)
//! - Bounded pool of started connections per endpoint (`max_active` live,
//!   `max_idle` idle)
//! - Waiting for a returned connection when the endpoint is at capacity, with
//!   an advisory overflow once the wait expires
//! - Broken connections are discarded instead of being reused
//!
//! # Example
//! ```ignore
//! let pool = EndpointPool::new(connector, PoolConfig::default());
//!
//! let key = EndpointKey::new("memory://local", "admin", None);
//! let lease = pool.acquire(&key).await?;
//! let session = lease.connection().create_session().await?;
//! // ...
//! pool.release(lease).await;
//! ```

mod lease;
mod pool;

pub use lease::PooledConnection;
pub use pool::{EndpointPool, PoolConfig, PoolStats};
