//! Endpoint Pool Implementation
//!
//! `EndpointPool` hands out started broker connections per endpoint and takes
//! them back after the request, keeping at most `max_idle` of them around.

use super::lease::{PoolEntry, PooledConnection};
use crate::broker::{
    BrokerConnection, BrokerError, BrokerResult, ConnectionFactory, Connector, EndpointKey,
};
use moka::future::Cache;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::time::Instant;

// ============================================================================
// Pool Configuration
// ============================================================================

/// Configuration for endpoint pool behavior
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum live connections per endpoint before callers wait
    pub max_active: usize,
    /// Maximum idle connections kept per endpoint
    pub max_idle: usize,
    /// How long a caller waits for a returned connection at capacity
    pub acquire_wait: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_active: 10,
            max_idle: 5,
            acquire_wait: Duration::from_millis(5000),
        }
    }
}

impl PoolConfig {
    pub fn with_max_active(mut self, max: usize) -> Self {
        self.max_active = max;
        self
    }

    pub fn with_max_idle(mut self, max: usize) -> Self {
        self.max_idle = max;
        self
    }

    pub fn with_acquire_wait(mut self, wait: Duration) -> Self {
        self.acquire_wait = wait;
        self
    }
}

// ============================================================================
// Endpoint Pool
// ============================================================================

/// Connection pools for every endpoint the bridge has talked to
pub struct EndpointPool {
    connector: Arc<dyn Connector>,
    config: PoolConfig,
    /// Factories are built once per endpoint and reused
    factories: Cache<EndpointKey, Arc<dyn ConnectionFactory>>,
    entries: RwLock<HashMap<EndpointKey, Arc<PoolEntry>>>,
}

impl EndpointPool {
    pub fn new(connector: Arc<dyn Connector>, config: PoolConfig) -> Self {
        Self {
            connector,
            config,
            factories: Cache::builder().build(),
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Borrow a started connection for `key`.
    ///
    /// Prefers an idle connection (restarted before use). Below `max_active` a
    /// new connection is opened; at capacity the caller waits up to
    /// `acquire_wait` for one to be returned and then opens one beyond the cap.
    pub async fn acquire(&self, key: &EndpointKey) -> BrokerResult<PooledConnection> {
        let entry = self.entry(key);
        let factory = self.factory(key).await?;
        let deadline = Instant::now() + self.config.acquire_wait;

        loop {
            if let Some(connection) = entry.pop_idle() {
                match connection.start().await {
                    Ok(()) => {
                        tracing::debug!(
                            endpoint = %key,
                            connection_id = connection.id(),
                            "Reusing idle connection"
                        );
                        return Ok(PooledConnection::new(connection, entry));
                    }
                    Err(e) => {
                        tracing::warn!(
                            endpoint = %key,
                            connection_id = connection.id(),
                            error = %e,
                            "Idle connection failed to restart, discarding"
                        );
                        entry.free_slot();
                        close_quietly(connection).await;
                        continue;
                    }
                }
            }

            if entry.try_reserve(self.config.max_active) {
                return self.open(&entry, factory.as_ref()).await;
            }

            let now = Instant::now();
            if now >= deadline {
                let live = entry.force_reserve();
                tracing::warn!(
                    endpoint = %key,
                    live = live,
                    max_active = self.config.max_active,
                    "No connection returned in time, opening one beyond the pool limit"
                );
                return self.open(&entry, factory.as_ref()).await;
            }

            let _ = tokio::time::timeout(deadline - now, entry.wait_returned()).await;
        }
    }

    /// Return a healthy connection to the pool
    pub async fn release(&self, lease: PooledConnection) {
        let (entry, connection) = lease.settle();

        let surplus = if connection.is_open() {
            entry.push_idle(connection, self.config.max_idle)
        } else {
            Some(connection)
        };

        if let Some(connection) = surplus {
            tracing::debug!(
                endpoint = %entry.key,
                connection_id = connection.id(),
                "Closing surplus connection"
            );
            entry.free_slot();
            close_quietly(connection).await;
        }
    }

    /// Throw away a connection that failed; it never goes back to idle
    pub async fn discard(&self, lease: PooledConnection) {
        let (entry, connection) = lease.settle();
        tracing::info!(
            endpoint = %entry.key,
            connection_id = connection.id(),
            "Discarding broken connection"
        );
        entry.free_slot();
        close_quietly(connection).await;
    }

    /// Live and idle counts for every endpoint seen so far
    pub fn stats(&self) -> Vec<PoolStats> {
        let entries = self
            .entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut stats: Vec<PoolStats> = entries
            .values()
            .map(|entry| PoolStats {
                endpoint: entry.key.to_string(),
                live: entry.live(),
                idle: entry.idle_count(),
            })
            .collect();
        stats.sort_by(|a, b| a.endpoint.cmp(&b.endpoint));
        stats
    }

    /// Close every idle connection. Lent connections are closed as they come back.
    pub async fn shutdown(&self) {
        let entries: Vec<Arc<PoolEntry>> = self
            .entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .values()
            .cloned()
            .collect();

        let mut closed = 0usize;
        for entry in entries {
            for connection in entry.drain_idle() {
                entry.free_slot();
                close_quietly(connection).await;
                closed += 1;
            }
        }
        tracing::info!(closed = closed, "Endpoint pool shut down");
    }

    fn entry(&self, key: &EndpointKey) -> Arc<PoolEntry> {
        if let Some(entry) = self
            .entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(key)
        {
            return entry.clone();
        }
        self.entries
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .entry(key.clone())
            .or_insert_with(|| Arc::new(PoolEntry::new(key.clone())))
            .clone()
    }

    async fn factory(&self, key: &EndpointKey) -> BrokerResult<Arc<dyn ConnectionFactory>> {
        let connector = self.connector.clone();
        let owned = key.clone();
        self.factories
            .try_get_with(key.clone(), async move { connector.connection_factory(&owned) })
            .await
            .map_err(|e: Arc<BrokerError>| (*e).clone())
    }

    /// Open and start a connection for a slot already reserved in `entry`
    async fn open(
        &self,
        entry: &Arc<PoolEntry>,
        factory: &dyn ConnectionFactory,
    ) -> BrokerResult<PooledConnection> {
        let connection = match factory.create_connection().await {
            Ok(connection) => connection,
            Err(e) => {
                entry.free_slot();
                return Err(e);
            }
        };

        if let Err(e) = connection.start().await {
            entry.free_slot();
            close_quietly(connection).await;
            return Err(e);
        }

        tracing::debug!(
            endpoint = %entry.key,
            connection_id = connection.id(),
            live = entry.live(),
            "Opened broker connection"
        );
        Ok(PooledConnection::new(connection, entry.clone()))
    }
}

async fn close_quietly(connection: Arc<dyn BrokerConnection>) {
    if let Err(e) = connection.close().await {
        tracing::debug!(connection_id = connection.id(), error = %e, "Error closing connection");
    }
}

// ============================================================================
// Pool Statistics
// ============================================================================

/// Connection counts for one endpoint
#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    /// `principal@url`; never includes the credential
    pub endpoint: String,
    /// Live connections (idle and lent)
    pub live: usize,
    pub idle: usize,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MemoryBroker;

    fn key() -> EndpointKey {
        EndpointKey::new("memory://local", "admin", None)
    }

    fn pool(broker: &MemoryBroker, config: PoolConfig) -> Arc<EndpointPool> {
        Arc::new(EndpointPool::new(Arc::new(broker.clone()), config))
    }

    #[tokio::test]
    async fn test_released_connection_is_reused() {
        let broker = MemoryBroker::new();
        let pool = pool(&broker, PoolConfig::default());

        let lease = pool.acquire(&key()).await.unwrap();
        let first_id = lease.connection().id();
        pool.release(lease).await;

        let lease = pool.acquire(&key()).await.unwrap();
        assert_eq!(lease.connection().id(), first_id);
        assert_eq!(broker.connections_opened(), 1);
        pool.release(lease).await;

        let stats = pool.stats();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].live, 1);
        assert_eq!(stats[0].idle, 1);
    }

    #[tokio::test]
    async fn test_acquire_at_capacity_waits_for_release() {
        let broker = MemoryBroker::new();
        let pool = pool(
            &broker,
            PoolConfig::default()
                .with_max_active(1)
                .with_acquire_wait(Duration::from_secs(5)),
        );

        let held = pool.acquire(&key()).await.unwrap();
        let held_id = held.connection().id();

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire(&key()).await })
        };

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!waiter.is_finished());

        pool.release(held).await;
        let lease = waiter.await.unwrap().unwrap();

        assert_eq!(lease.connection().id(), held_id);
        assert_eq!(broker.connections_opened(), 1);
        assert_eq!(pool.stats()[0].live, 1);
        pool.release(lease).await;
    }

    #[tokio::test]
    async fn test_cap_is_advisory_after_wait() {
        let broker = MemoryBroker::new();
        let pool = pool(
            &broker,
            PoolConfig::default()
                .with_max_active(1)
                .with_acquire_wait(Duration::from_millis(100)),
        );

        let first = pool.acquire(&key()).await.unwrap();
        let started = std::time::Instant::now();
        let second = pool.acquire(&key()).await.unwrap();

        assert!(started.elapsed() >= Duration::from_millis(100));
        assert_ne!(first.connection().id(), second.connection().id());
        assert_eq!(pool.stats()[0].live, 2);

        pool.release(first).await;
        pool.release(second).await;
    }

    #[tokio::test]
    async fn test_release_beyond_max_idle_closes_connection() {
        let broker = MemoryBroker::new();
        let pool = pool(
            &broker,
            PoolConfig::default().with_max_active(3).with_max_idle(1),
        );

        let a = pool.acquire(&key()).await.unwrap();
        let b = pool.acquire(&key()).await.unwrap();
        let c = pool.acquire(&key()).await.unwrap();
        assert_eq!(pool.stats()[0].live, 3);

        pool.release(a).await;
        pool.release(b).await;
        pool.release(c).await;

        let stats = &pool.stats()[0];
        assert_eq!(stats.idle, 1);
        assert_eq!(stats.live, 1);
        assert_eq!(broker.connections_closed(), 2);
    }

    #[tokio::test]
    async fn test_discard_frees_slot_and_closes() {
        let broker = MemoryBroker::new();
        let pool = pool(&broker, PoolConfig::default());

        let lease = pool.acquire(&key()).await.unwrap();
        pool.discard(lease).await;

        assert_eq!(pool.stats()[0].live, 0);
        assert_eq!(pool.stats()[0].idle, 0);
        assert_eq!(broker.connections_closed(), 1);
    }

    #[tokio::test]
    async fn test_idle_connection_failing_restart_is_discarded() {
        let broker = MemoryBroker::new();
        let pool = pool(&broker, PoolConfig::default());

        let lease = pool.acquire(&key()).await.unwrap();
        pool.release(lease).await;
        assert_eq!(pool.stats()[0].idle, 1);

        broker.set_reachable(false);
        let err = pool.acquire(&key()).await.unwrap_err();
        assert!(err.is_connection_fault());
        assert_eq!(pool.stats()[0].live, 0);
        assert_eq!(pool.stats()[0].idle, 0);

        broker.set_reachable(true);
        let lease = pool.acquire(&key()).await.unwrap();
        assert_eq!(pool.stats()[0].live, 1);
        pool.release(lease).await;
    }

    #[tokio::test]
    async fn test_failed_open_gives_slot_back() {
        let broker = MemoryBroker::new().with_user("admin", Some("secret"));
        let pool = pool(&broker, PoolConfig::default().with_max_active(1));

        let bad = EndpointKey::new("memory://local", "admin", Some("wrong".to_string()));
        let err = pool.acquire(&bad).await.unwrap_err();
        assert!(matches!(err, BrokerError::Authentication(_)));
        assert_eq!(pool.stats()[0].live, 0);
    }

    #[tokio::test]
    async fn test_endpoints_are_pooled_separately() {
        let broker = MemoryBroker::new();
        let pool = pool(&broker, PoolConfig::default());

        let one = EndpointKey::new("memory://local", "admin", Some("one".to_string()));
        let two = EndpointKey::new("memory://local", "admin", Some("two".to_string()));
        let a = pool.acquire(&one).await.unwrap();
        let b = pool.acquire(&two).await.unwrap();
        assert_ne!(a.connection().id(), b.connection().id());
        assert_eq!(a.key(), &one);

        pool.release(a).await;
        pool.release(b).await;
        assert_eq!(pool.stats().len(), 2);
        assert!(pool.stats().iter().all(|s| !s.endpoint.contains("one")));
    }

    #[tokio::test]
    async fn test_dropped_lease_frees_slot() {
        let broker = MemoryBroker::new();
        let pool = pool(&broker, PoolConfig::default());

        let lease = pool.acquire(&key()).await.unwrap();
        drop(lease);
        assert_eq!(pool.stats()[0].live, 0);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(broker.connections_closed(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_closes_idle_connections() {
        let broker = MemoryBroker::new();
        let pool = pool(&broker, PoolConfig::default());

        let a = pool.acquire(&key()).await.unwrap();
        let b = pool.acquire(&key()).await.unwrap();
        pool.release(a).await;
        pool.release(b).await;

        pool.shutdown().await;
        assert_eq!(broker.open_connections(), 0);
        assert_eq!(pool.stats()[0].live, 0);
    }
}
