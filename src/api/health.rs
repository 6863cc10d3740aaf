//! Health check endpoint

use axum::{extract::State, Json};
use serde::Serialize;

use crate::server::state::AppState;
use crate::services::PoolStats;

/// Response for the health check endpoint
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
    pub environment: String,
    pub uptime_seconds: u64,
    /// Bridging requests that could start right now
    pub available_workers: usize,
    pub emulator_queue: Option<String>,
    pub pools: Vec<PoolStats>,
}

/// Service health with version, uptime and per-endpoint pool occupancy
///
/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let emulator_queue = state
        .emulator
        .lock()
        .await
        .as_ref()
        .map(|emulator| emulator.queue().to_string());

    Json(HealthResponse {
        status: "healthy".to_string(),
        service: state.settings.app_name.clone(),
        version: state.settings.app_version.clone(),
        environment: state.settings.environment.to_string(),
        uptime_seconds: state.uptime_seconds(),
        available_workers: state.engine.available_workers(),
        emulator_queue,
        pools: state.pool.stats(),
    })
}
