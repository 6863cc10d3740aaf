//! API endpoint handlers module
//!
//! Contains all HTTP endpoint handler implementations.

pub mod bridge;
pub mod health;
pub mod metrics;
