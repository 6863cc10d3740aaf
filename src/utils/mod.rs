//! Utility modules

pub mod hostname;

pub use hostname::{default_correlation_id, hostname, location, user_name};
