//! Application state container
//!
//! This module defines the shared application state that is passed
//! to all request handlers via Axum's state extraction.

use crate::broker::{AmqpConnector, Connector, ConnectorRegistry, EndpointKey, MemoryBroker};
use crate::config::Settings;
use crate::services::{BridgeEngine, BridgeMetrics, EndpointPool, ReplyEmulator};
use anyhow::Context;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Shared application state
///
/// Cheap to clone; every field is shared between clones.
#[derive(Clone)]
pub struct AppState {
    /// Application settings
    pub settings: Arc<Settings>,

    /// In-process broker serving `memory://` endpoints
    pub broker: MemoryBroker,

    /// Connection pools, one per endpoint
    pub pool: Arc<EndpointPool>,

    /// Process-wide bridge counters
    pub metrics: BridgeMetrics,

    pub engine: BridgeEngine,

    /// Embedded reply emulator, taken out on shutdown
    pub emulator: Arc<Mutex<Option<ReplyEmulator>>>,

    /// Application start time (for uptime calculation)
    pub start_time: Instant,
}

impl AppState {
    /// Build the broker registry, pool, counters and engine from `settings`,
    /// and start the reply emulator when one is configured.
    pub async fn new(settings: Settings) -> anyhow::Result<Self> {
        let settings = Arc::new(settings);
        let start_time = Instant::now();

        let broker = MemoryBroker::new();
        let registry = ConnectorRegistry::new()
            .with("memory", Arc::new(broker.clone()))
            .with("amqp", Arc::new(AmqpConnector::new()));
        tracing::debug!(schemes = ?registry.schemes(), "Broker connectors registered");
        let connector: Arc<dyn Connector> = Arc::new(registry);

        let pool = Arc::new(EndpointPool::new(connector.clone(), settings.pool_config()));
        let metrics = BridgeMetrics::new().context("Failed to register bridge counters")?;

        let engine = BridgeEngine::new(pool.clone(), metrics.clone())
            .with_worker_limit(settings.bridge.worker_limit)
            .with_default_timeout(Duration::from_millis(settings.bridge.default_timeout_ms));

        let emulator = match &settings.emulator {
            Some(emulator) => {
                let key = EndpointKey::new(
                    emulator.broker_url.as_str(),
                    emulator.user.as_str(),
                    emulator.password.clone(),
                );
                let started = ReplyEmulator::start(connector.as_ref(), &key, &emulator.queue)
                    .await
                    .with_context(|| {
                        format!("Failed to start reply emulator on queue {}", emulator.queue)
                    })?;
                Some(started)
            }
            None => {
                tracing::debug!("Reply emulator disabled");
                None
            }
        };

        tracing::info!(
            worker_limit = engine.worker_limit(),
            max_active = settings.pool.max_active,
            max_idle = settings.pool.max_idle,
            "Application state initialized successfully"
        );

        Ok(Self {
            settings,
            broker,
            pool,
            metrics,
            engine,
            emulator: Arc::new(Mutex::new(emulator)),
            start_time,
        })
    }

    /// Get the application uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Stop the emulator and close every pooled connection
    pub async fn shutdown(&self) {
        if let Some(emulator) = self.emulator.lock().await.take() {
            emulator.stop().await;
        }
        self.pool.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::BrokerError;
    use crate::config::EmulatorSettings;

    #[tokio::test]
    async fn test_state_without_emulator() {
        let state = AppState::new(Settings::default()).await.unwrap();
        assert!(state.emulator.lock().await.is_none());
        assert_eq!(state.engine.worker_limit(), state.settings.bridge.worker_limit);
        assert_eq!(state.broker.open_connections(), 0);
    }

    #[tokio::test]
    async fn test_state_starts_and_stops_emulator() {
        let settings = Settings {
            emulator: Some(EmulatorSettings {
                queue: "requests".to_string(),
                broker_url: "memory://local".to_string(),
                user: "emulator".to_string(),
                password: None,
            }),
            ..Settings::default()
        };
        let state = AppState::new(settings).await.unwrap();
        assert_eq!(state.broker.consumer_count("requests"), 1);

        state.shutdown().await;
        assert!(state.emulator.lock().await.is_none());
        assert_eq!(state.broker.consumer_count("requests"), 0);
        assert_eq!(state.broker.open_connections(), 0);
    }

    #[tokio::test]
    async fn test_amqp_urls_reach_the_amqp_connector() {
        let state = AppState::new(Settings::default()).await.unwrap();
        let key = EndpointKey::new("amqp://127.0.0.1:1", "admin", None);

        let err = state.pool.acquire(&key).await.err().unwrap();
        assert!(matches!(err, BrokerError::Connect { .. }));
        assert_eq!(state.broker.connections_opened(), 0);
    }

    #[tokio::test]
    async fn test_emulator_on_unknown_scheme_fails_startup() {
        let settings = Settings {
            emulator: Some(EmulatorSettings {
                queue: "requests".to_string(),
                broker_url: "tcp://ems:7222".to_string(),
                user: "emulator".to_string(),
                password: None,
            }),
            ..Settings::default()
        };
        assert!(AppState::new(settings).await.is_err());
    }
}
