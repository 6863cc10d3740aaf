//! Per-endpoint pool state and connection leases

use crate::broker::{BrokerConnection, EndpointKey};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Notify;

/// Pool state for one endpoint
pub(super) struct PoolEntry {
    pub(super) key: EndpointKey,
    /// Started connections waiting to be borrowed
    idle: Mutex<VecDeque<Arc<dyn BrokerConnection>>>,
    /// Live connections, idle and lent out
    live: AtomicUsize,
    /// Signalled whenever a connection goes back to idle or a live slot frees up
    returned: Notify,
}

impl PoolEntry {
    pub(super) fn new(key: EndpointKey) -> Self {
        Self {
            key,
            idle: Mutex::new(VecDeque::new()),
            live: AtomicUsize::new(0),
            returned: Notify::new(),
        }
    }

    fn idle(&self) -> MutexGuard<'_, VecDeque<Arc<dyn BrokerConnection>>> {
        self.idle.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(super) fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub(super) fn idle_count(&self) -> usize {
        self.idle().len()
    }

    /// Most recently returned idle connection
    pub(super) fn pop_idle(&self) -> Option<Arc<dyn BrokerConnection>> {
        self.idle().pop_back()
    }

    /// Park a connection unless `max_idle` are already parked. Gives the
    /// connection back when there is no room.
    pub(super) fn push_idle(
        &self,
        connection: Arc<dyn BrokerConnection>,
        max_idle: usize,
    ) -> Option<Arc<dyn BrokerConnection>> {
        {
            let mut idle = self.idle();
            if idle.len() >= max_idle {
                return Some(connection);
            }
            idle.push_back(connection);
        }
        self.returned.notify_one();
        None
    }

    pub(super) fn drain_idle(&self) -> Vec<Arc<dyn BrokerConnection>> {
        self.idle().drain(..).collect()
    }

    /// Claim a live slot if fewer than `max_active` are in use
    pub(super) fn try_reserve(&self, max_active: usize) -> bool {
        self.live
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < max_active).then_some(n + 1)
            })
            .is_ok()
    }

    /// Claim a live slot regardless of the cap
    pub(super) fn force_reserve(&self) -> usize {
        self.live.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Give a live slot back and wake one waiter
    pub(super) fn free_slot(&self) {
        let _ = self
            .live
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        self.returned.notify_one();
    }

    pub(super) async fn wait_returned(&self) {
        self.returned.notified().await
    }
}

/// A connection lent to one in-flight request.
///
/// Hand it back with [`EndpointPool::release`](super::EndpointPool::release)
/// or [`EndpointPool::discard`](super::EndpointPool::discard). A lease that is
/// simply dropped frees its slot and closes the connection in the background.
pub struct PooledConnection {
    connection: Arc<dyn BrokerConnection>,
    entry: Arc<PoolEntry>,
    settled: bool,
}

impl PooledConnection {
    pub(super) fn new(connection: Arc<dyn BrokerConnection>, entry: Arc<PoolEntry>) -> Self {
        Self {
            connection,
            entry,
            settled: false,
        }
    }

    pub fn connection(&self) -> &Arc<dyn BrokerConnection> {
        &self.connection
    }

    pub fn key(&self) -> &EndpointKey {
        &self.entry.key
    }

    /// Take the connection out of the lease; the caller now owns the slot
    pub(super) fn settle(mut self) -> (Arc<PoolEntry>, Arc<dyn BrokerConnection>) {
        self.settled = true;
        (self.entry.clone(), self.connection.clone())
    }
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("endpoint", &self.entry.key)
            .field("connection_id", &self.connection.id())
            .finish()
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        tracing::warn!(
            endpoint = %self.entry.key,
            connection_id = self.connection.id(),
            "Connection lease dropped without release, closing connection"
        );
        self.entry.free_slot();
        let connection = self.connection.clone();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                let _ = connection.close().await;
            });
        }
    }
}
