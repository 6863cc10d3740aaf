//! EMS HTTP Bridge library
//!
//! Lets synchronous HTTP callers talk to message-oriented middleware: a call
//! either publishes a message and returns its broker id, or sends a request
//! and waits, up to a deadline, for the correlated reply.

// Public modules
pub mod api;
pub mod broker;
pub mod config;
pub mod error;
pub mod logging;
pub mod middleware;
pub mod schemas;
pub mod server;
pub mod services;
pub mod utils;

// Re-export commonly used types
pub use config::Settings;
pub use error::{BridgeError, BridgeStatus};
pub use server::App;
pub use services::{BridgeEngine, BridgeRequest};
