//! Bridge Engine
//!
//! Runs a single bridging request against the broker: either a publish-only
//! send that returns the broker message id, or a request/reply exchange that
//! waits, up to a deadline, for the correlated reply.
//!
//! Each request runs on its own worker task, admitted through a semaphore.
//! Every resource the request opens (session, producer, consumer, temporary
//! queue) is closed before the worker finishes, and the borrowed connection
//! goes back to the pool or, after a connection fault, is discarded.

mod engine;
mod request;

pub use engine::BridgeEngine;
pub use request::{BridgeReply, BridgeRequest};
