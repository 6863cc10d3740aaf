//! In-process broker
//!
//! A small queue broker living inside the current process, reachable through
//! `memory://` URLs. It implements the full client trait set so the bridge,
//! the reply emulator and the test-suite can run without external services.
//!
//! Semantics:
//! - named queues are created on first use; temporary queues belong to the
//!   session that created them and are deleted (with any pending messages) when
//!   that session or its connection closes;
//! - a message sent to a queue goes to one matching consumer (round-robin) or
//!   waits on the queue until one subscribes;
//! - listeners run on spawned tokio tasks, never on the sender's task;
//! - an optional user table enables credential checks, and the broker can be
//!   marked unreachable to simulate an outage.

use super::{
    BrokerConnection, BrokerError, BrokerResult, ConnectionFactory, Connector, Destination,
    EndpointKey, Message, MessageConsumer, MessageListener, MessageProducer, Session,
};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Prefix of broker-assigned message identifiers
pub const MESSAGE_ID_PREFIX: &str = "ID:MEMORY.";

/// Prefix of temporary queue names
pub const TEMP_QUEUE_PREFIX: &str = "$TMP$.MEMORY.";

// ============================================================================
// Broker core
// ============================================================================

struct ConsumerSlot {
    id: u64,
    connection_id: u64,
    selector: Option<String>,
    listener: MessageListener,
}

impl ConsumerSlot {
    fn accepts(&self, message: &Message) -> bool {
        match &self.selector {
            Some(selector) => message.correlation_id.as_deref() == Some(selector.as_str()),
            None => true,
        }
    }
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<Message>,
    consumers: Vec<ConsumerSlot>,
    cursor: usize,
    /// Owning connection for temporary queues
    owner: Option<u64>,
}

impl QueueState {
    /// Pick the next consumer willing to take `message`, round-robin
    fn next_consumer(&mut self, message: &Message) -> Option<MessageListener> {
        let count = self.consumers.len();
        for offset in 0..count {
            let idx = (self.cursor + offset) % count;
            if self.consumers[idx].accepts(message) {
                self.cursor = (idx + 1) % count;
                return Some(self.consumers[idx].listener.clone());
            }
        }
        None
    }
}

struct BrokerCore {
    queues: Mutex<HashMap<String, QueueState>>,
    /// principal -> credential; empty means any principal is accepted
    users: Mutex<HashMap<String, Option<String>>>,
    reachable: AtomicBool,
    next_message: AtomicU64,
    next_connection: AtomicU64,
    next_session: AtomicU64,
    next_consumer: AtomicU64,
    next_temp_queue: AtomicU64,
    connections_opened: AtomicU64,
    connections_closed: AtomicU64,
}

impl BrokerCore {
    fn queues(&self) -> MutexGuard<'_, HashMap<String, QueueState>> {
        // A listener panicking on another task cannot leave the map half-written.
        self.queues.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn is_reachable(&self) -> bool {
        self.reachable.load(Ordering::SeqCst)
    }

    fn authenticate(&self, principal: &str, credential: Option<&str>) -> BrokerResult<()> {
        let users = self.users.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if users.is_empty() {
            return Ok(());
        }
        match users.get(principal) {
            Some(expected) if expected.as_deref() == credential => Ok(()),
            _ => Err(BrokerError::Authentication(principal.to_string())),
        }
    }

    /// Hand `message` to a consumer of `destination`, or park it on the queue
    fn route(&self, destination: &Destination, message: Message) -> BrokerResult<()> {
        let listener = {
            let mut queues = self.queues();
            let queue = match destination {
                Destination::Queue(name) => queues.entry(name.clone()).or_default(),
                Destination::TemporaryQueue(name) => queues
                    .get_mut(name)
                    .ok_or_else(|| BrokerError::UnknownDestination(name.clone()))?,
            };
            match queue.next_consumer(&message) {
                Some(listener) => Some((listener, message)),
                None => {
                    queue.pending.push_back(message);
                    None
                }
            }
        };

        if let Some((listener, message)) = listener {
            dispatch(listener, vec![message]);
        }
        Ok(())
    }

    /// Drop every consumer and temporary queue that belongs to a connection
    fn detach_connection(&self, connection_id: u64) {
        let mut queues = self.queues();
        queues.retain(|_, queue| queue.owner != Some(connection_id));
        for queue in queues.values_mut() {
            queue.consumers.retain(|slot| slot.connection_id != connection_id);
            queue.cursor = 0;
        }
    }

    fn remove_consumer(&self, queue_name: &str, consumer_id: u64) {
        if let Some(queue) = self.queues().get_mut(queue_name) {
            queue.consumers.retain(|slot| slot.id != consumer_id);
            queue.cursor = 0;
        }
    }
}

/// Run a listener over a batch of messages on a separate task
fn dispatch(listener: MessageListener, messages: Vec<Message>) {
    tokio::spawn(async move {
        for message in messages {
            listener(message);
        }
    });
}

// ============================================================================
// Public handle
// ============================================================================

/// Handle to an in-process broker. Clones share the same broker.
#[derive(Clone)]
pub struct MemoryBroker {
    core: Arc<BrokerCore>,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    /// Create a broker that accepts any principal
    pub fn new() -> Self {
        Self {
            core: Arc::new(BrokerCore {
                queues: Mutex::new(HashMap::new()),
                users: Mutex::new(HashMap::new()),
                reachable: AtomicBool::new(true),
                next_message: AtomicU64::new(1),
                next_connection: AtomicU64::new(1),
                next_session: AtomicU64::new(1),
                next_consumer: AtomicU64::new(1),
                next_temp_queue: AtomicU64::new(1),
                connections_opened: AtomicU64::new(0),
                connections_closed: AtomicU64::new(0),
            }),
        }
    }

    /// Register a user. Once any user exists, unknown principals and wrong
    /// credentials are rejected.
    pub fn with_user(self, principal: &str, credential: Option<&str>) -> Self {
        self.core
            .users
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(principal.to_string(), credential.map(str::to_string));
        self
    }

    /// Simulate an outage (`false`) or recovery (`true`)
    pub fn set_reachable(&self, reachable: bool) {
        self.core.reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn connections_opened(&self) -> u64 {
        self.core.connections_opened.load(Ordering::SeqCst)
    }

    pub fn connections_closed(&self) -> u64 {
        self.core.connections_closed.load(Ordering::SeqCst)
    }

    /// Connections opened and not yet closed
    pub fn open_connections(&self) -> u64 {
        self.connections_opened()
            .saturating_sub(self.connections_closed())
    }

    /// Number of messages waiting on a queue
    pub fn pending(&self, queue: &str) -> usize {
        self.core
            .queues()
            .get(queue)
            .map(|q| q.pending.len())
            .unwrap_or(0)
    }

    /// Remove and return the oldest waiting message on a queue
    pub fn take(&self, queue: &str) -> Option<Message> {
        self.core
            .queues()
            .get_mut(queue)
            .and_then(|q| q.pending.pop_front())
    }

    /// Number of consumers currently subscribed to a queue
    pub fn consumer_count(&self, queue: &str) -> usize {
        self.core
            .queues()
            .get(queue)
            .map(|q| q.consumers.len())
            .unwrap_or(0)
    }

    /// Names of the temporary queues that currently exist
    pub fn temporary_queues(&self) -> Vec<String> {
        self.core
            .queues()
            .iter()
            .filter(|(_, q)| q.owner.is_some())
            .map(|(name, _)| name.clone())
            .collect()
    }
}

impl Connector for MemoryBroker {
    fn connection_factory(&self, key: &EndpointKey) -> BrokerResult<Arc<dyn ConnectionFactory>> {
        Ok(Arc::new(MemoryConnectionFactory {
            core: self.core.clone(),
            url: key.url().to_string(),
            principal: key.principal().to_string(),
            credential: key.credential().map(str::to_string),
        }))
    }
}

// ============================================================================
// Factory and connection
// ============================================================================

struct MemoryConnectionFactory {
    core: Arc<BrokerCore>,
    url: String,
    principal: String,
    credential: Option<String>,
}

#[async_trait]
impl ConnectionFactory for MemoryConnectionFactory {
    async fn create_connection(&self) -> BrokerResult<Arc<dyn BrokerConnection>> {
        if !self.core.is_reachable() {
            return Err(BrokerError::Connect {
                url: self.url.clone(),
                reason: "broker unreachable".to_string(),
            });
        }
        self.core
            .authenticate(&self.principal, self.credential.as_deref())?;

        let id = self.core.next_connection.fetch_add(1, Ordering::SeqCst);
        self.core.connections_opened.fetch_add(1, Ordering::SeqCst);
        tracing::trace!(connection_id = id, url = %self.url, "Memory broker connection opened");

        Ok(Arc::new(MemoryConnection {
            state: Arc::new(ConnectionState {
                id,
                closed: AtomicBool::new(false),
            }),
            core: self.core.clone(),
        }))
    }
}

struct ConnectionState {
    id: u64,
    closed: AtomicBool,
}

impl ConnectionState {
    fn ensure_usable(&self, core: &BrokerCore) -> BrokerResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BrokerError::ConnectionClosed);
        }
        if !core.is_reachable() {
            return Err(BrokerError::ConnectionLost("broker unreachable".to_string()));
        }
        Ok(())
    }
}

struct MemoryConnection {
    state: Arc<ConnectionState>,
    core: Arc<BrokerCore>,
}

#[async_trait]
impl BrokerConnection for MemoryConnection {
    fn id(&self) -> u64 {
        self.state.id
    }

    fn is_open(&self) -> bool {
        !self.state.closed.load(Ordering::SeqCst) && self.core.is_reachable()
    }

    async fn start(&self) -> BrokerResult<()> {
        self.state.ensure_usable(&self.core)
    }

    async fn create_session(&self) -> BrokerResult<Arc<dyn Session>> {
        self.state.ensure_usable(&self.core)?;
        Ok(Arc::new(MemorySession {
            state: Arc::new(SessionState {
                id: self.core.next_session.fetch_add(1, Ordering::SeqCst),
                connection: self.state.clone(),
                closed: AtomicBool::new(false),
                consumers: Mutex::new(Vec::new()),
                temp_queues: Mutex::new(Vec::new()),
            }),
            core: self.core.clone(),
        }))
    }

    async fn close(&self) -> BrokerResult<()> {
        if !self.state.closed.swap(true, Ordering::SeqCst) {
            self.core.detach_connection(self.state.id);
            self.core.connections_closed.fetch_add(1, Ordering::SeqCst);
            tracing::trace!(connection_id = self.state.id, "Memory broker connection closed");
        }
        Ok(())
    }
}

// ============================================================================
// Session, producer, consumer
// ============================================================================

struct SessionState {
    id: u64,
    connection: Arc<ConnectionState>,
    closed: AtomicBool,
    /// (queue, consumer id)
    consumers: Mutex<Vec<(String, u64)>>,
    temp_queues: Mutex<Vec<String>>,
}

impl SessionState {
    fn ensure_usable(&self, core: &BrokerCore) -> BrokerResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BrokerError::SessionClosed);
        }
        self.connection.ensure_usable(core)
    }
}

struct MemorySession {
    state: Arc<SessionState>,
    core: Arc<BrokerCore>,
}

#[async_trait]
impl Session for MemorySession {
    fn queue(&self, name: &str) -> BrokerResult<Destination> {
        if name.trim().is_empty() {
            return Err(BrokerError::UnknownDestination(name.to_string()));
        }
        Ok(Destination::Queue(name.to_string()))
    }

    async fn create_temporary_queue(&self) -> BrokerResult<Destination> {
        self.state.ensure_usable(&self.core)?;
        let name = format!(
            "{}{}.{}",
            TEMP_QUEUE_PREFIX,
            self.state.connection.id,
            self.core.next_temp_queue.fetch_add(1, Ordering::SeqCst)
        );
        self.core.queues().insert(
            name.clone(),
            QueueState {
                owner: Some(self.state.connection.id),
                ..Default::default()
            },
        );
        self.state
            .temp_queues
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(name.clone());
        Ok(Destination::TemporaryQueue(name))
    }

    async fn create_producer(
        &self,
        destination: &Destination,
    ) -> BrokerResult<Box<dyn MessageProducer>> {
        self.state.ensure_usable(&self.core)?;
        Ok(Box::new(MemoryProducer {
            session: self.state.clone(),
            core: self.core.clone(),
            destination: destination.clone(),
            closed: AtomicBool::new(false),
        }))
    }

    async fn create_consumer(
        &self,
        destination: &Destination,
        correlation_selector: Option<&str>,
        listener: MessageListener,
    ) -> BrokerResult<Box<dyn MessageConsumer>> {
        self.state.ensure_usable(&self.core)?;
        let id = self.core.next_consumer.fetch_add(1, Ordering::SeqCst);
        let slot = ConsumerSlot {
            id,
            connection_id: self.state.connection.id,
            selector: correlation_selector.map(str::to_string),
            listener: listener.clone(),
        };

        // Messages that arrived before anyone listened go to the new consumer.
        let backlog = {
            let mut queues = self.core.queues();
            let queue = match destination {
                Destination::Queue(name) => queues.entry(name.clone()).or_default(),
                Destination::TemporaryQueue(name) => queues
                    .get_mut(name)
                    .ok_or_else(|| BrokerError::UnknownDestination(name.clone()))?,
            };
            let (matching, rest): (VecDeque<Message>, VecDeque<Message>) =
                queue.pending.drain(..).partition(|m| slot.accepts(m));
            queue.pending = rest;
            queue.consumers.push(slot);
            matching
        };
        if !backlog.is_empty() {
            dispatch(listener, backlog.into_iter().collect());
        }

        self.state
            .consumers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((destination.name().to_string(), id));

        Ok(Box::new(MemoryConsumer {
            core: self.core.clone(),
            queue: destination.name().to_string(),
            id,
            closed: AtomicBool::new(false),
        }))
    }

    async fn close(&self) -> BrokerResult<()> {
        if self.state.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let consumers = std::mem::take(
            &mut *self
                .state
                .consumers
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        );
        for (queue, id) in consumers {
            self.core.remove_consumer(&queue, id);
        }
        let temp_queues = std::mem::take(
            &mut *self
                .state
                .temp_queues
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        );
        if !temp_queues.is_empty() {
            let mut queues = self.core.queues();
            for name in temp_queues {
                queues.remove(&name);
            }
        }
        tracing::trace!(session_id = self.state.id, "Memory broker session closed");
        Ok(())
    }
}

struct MemoryProducer {
    session: Arc<SessionState>,
    core: Arc<BrokerCore>,
    destination: Destination,
    closed: AtomicBool,
}

#[async_trait]
impl MessageProducer for MemoryProducer {
    async fn send(&self, message: &mut Message) -> BrokerResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BrokerError::Send("producer is closed".to_string()));
        }
        self.session.ensure_usable(&self.core)?;

        let seq = self.core.next_message.fetch_add(1, Ordering::SeqCst);
        message.message_id = Some(format!("{}{}", MESSAGE_ID_PREFIX, seq));
        message.destination = Some(self.destination.clone());
        message.timestamp = Some(Utc::now());

        self.core.route(&self.destination, message.clone())
    }

    async fn close(&self) -> BrokerResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

struct MemoryConsumer {
    core: Arc<BrokerCore>,
    queue: String,
    id: u64,
    closed: AtomicBool,
}

#[async_trait]
impl MessageConsumer for MemoryConsumer {
    async fn close(&self) -> BrokerResult<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.core.remove_consumer(&self.queue, self.id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn key() -> EndpointKey {
        EndpointKey::new("memory://local", "admin", None)
    }

    async fn open(broker: &MemoryBroker) -> Arc<dyn BrokerConnection> {
        let connection = broker
            .connection_factory(&key())
            .unwrap()
            .create_connection()
            .await
            .unwrap();
        connection.start().await.unwrap();
        connection
    }

    fn channel_listener() -> (MessageListener, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let listener: MessageListener = Arc::new(move |message| {
            let _ = tx.send(message);
        });
        (listener, rx)
    }

    async fn recv(rx: &mut mpsc::UnboundedReceiver<Message>) -> Message {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("delivery timed out")
            .expect("listener dropped")
    }

    #[tokio::test]
    async fn test_send_stamps_message_and_parks_without_consumer() {
        let broker = MemoryBroker::new();
        let connection = open(&broker).await;
        let session = connection.create_session().await.unwrap();
        let dest = session.queue("Q1").unwrap();
        let producer = session.create_producer(&dest).await.unwrap();

        let mut message = Message::text("Hello EMS");
        producer.send(&mut message).await.unwrap();

        let id = message.message_id.clone().unwrap();
        assert!(id.starts_with(MESSAGE_ID_PREFIX));
        assert_eq!(message.destination, Some(dest));
        assert!(message.timestamp.is_some());

        assert_eq!(broker.pending("Q1"), 1);
        let parked = broker.take("Q1").unwrap();
        assert_eq!(parked.message_id.as_deref(), Some(id.as_str()));
        assert_eq!(parked.text_body(), Some("Hello EMS"));
    }

    #[tokio::test]
    async fn test_consumer_receives_backlog_and_live_messages() {
        let broker = MemoryBroker::new();
        let connection = open(&broker).await;
        let session = connection.create_session().await.unwrap();
        let dest = session.queue("Q1").unwrap();
        let producer = session.create_producer(&dest).await.unwrap();

        producer.send(&mut Message::text("first")).await.unwrap();

        let (listener, mut rx) = channel_listener();
        let _consumer = session.create_consumer(&dest, None, listener).await.unwrap();
        assert_eq!(recv(&mut rx).await.text_body(), Some("first"));

        producer.send(&mut Message::text("second")).await.unwrap();
        assert_eq!(recv(&mut rx).await.text_body(), Some("second"));
        assert_eq!(broker.pending("Q1"), 0);
    }

    #[tokio::test]
    async fn test_correlation_selector_filters_delivery() {
        let broker = MemoryBroker::new();
        let connection = open(&broker).await;
        let session = connection.create_session().await.unwrap();
        let dest = session.queue("Q2").unwrap();
        let producer = session.create_producer(&dest).await.unwrap();

        let (listener, mut rx) = channel_listener();
        let _consumer = session
            .create_consumer(&dest, Some("mine"), listener)
            .await
            .unwrap();

        producer
            .send(&mut Message::text("stale").with_correlation_id("other"))
            .await
            .unwrap();
        producer
            .send(&mut Message::text("reply").with_correlation_id("mine"))
            .await
            .unwrap();

        let delivered = recv(&mut rx).await;
        assert_eq!(delivered.text_body(), Some("reply"));
        assert_eq!(broker.pending("Q2"), 1);
    }

    #[tokio::test]
    async fn test_temporary_queue_deleted_with_session() {
        let broker = MemoryBroker::new();
        let connection = open(&broker).await;
        let session = connection.create_session().await.unwrap();
        let tmp = session.create_temporary_queue().await.unwrap();
        assert!(tmp.is_temporary());
        assert_eq!(broker.temporary_queues(), vec![tmp.name().to_string()]);

        session.close().await.unwrap();
        assert!(broker.temporary_queues().is_empty());

        // A late reply to a deleted temporary queue is refused.
        let other = connection.create_session().await.unwrap();
        let producer = other.create_producer(&tmp).await.unwrap();
        let err = producer.send(&mut Message::text("late")).await.unwrap_err();
        assert!(matches!(err, BrokerError::UnknownDestination(_)));
    }

    #[tokio::test]
    async fn test_closing_consumer_stops_delivery() {
        let broker = MemoryBroker::new();
        let connection = open(&broker).await;
        let session = connection.create_session().await.unwrap();
        let dest = session.queue("Q1").unwrap();

        let (listener, _rx) = channel_listener();
        let consumer = session.create_consumer(&dest, None, listener).await.unwrap();
        assert_eq!(broker.consumer_count("Q1"), 1);

        consumer.close().await.unwrap();
        assert_eq!(broker.consumer_count("Q1"), 0);
    }

    #[tokio::test]
    async fn test_authentication() {
        let broker = MemoryBroker::new().with_user("admin", Some("secret"));

        let good = EndpointKey::new("memory://local", "admin", Some("secret".to_string()));
        assert!(broker
            .connection_factory(&good)
            .unwrap()
            .create_connection()
            .await
            .is_ok());

        let bad = EndpointKey::new("memory://local", "admin", Some("wrong".to_string()));
        let err = broker
            .connection_factory(&bad)
            .unwrap()
            .create_connection()
            .await
            .err()
            .unwrap();
        assert!(matches!(err, BrokerError::Authentication(user) if user == "admin"));
    }

    #[tokio::test]
    async fn test_outage_breaks_connections() {
        let broker = MemoryBroker::new();
        let connection = open(&broker).await;

        broker.set_reachable(false);
        assert!(!connection.is_open());
        assert!(connection.start().await.unwrap_err().is_connection_fault());
        assert!(broker
            .connection_factory(&key())
            .unwrap()
            .create_connection()
            .await
            .err()
            .unwrap()
            .is_connection_fault());

        broker.set_reachable(true);
        assert!(connection.start().await.is_ok());
    }

    #[tokio::test]
    async fn test_connection_close_is_counted_once() {
        let broker = MemoryBroker::new();
        let connection = open(&broker).await;
        assert_eq!(broker.open_connections(), 1);

        connection.close().await.unwrap();
        connection.close().await.unwrap();
        assert_eq!(broker.connections_closed(), 1);
        assert_eq!(broker.open_connections(), 0);
        assert!(matches!(
            connection.create_session().await.err().unwrap(),
            BrokerError::ConnectionClosed
        ));
    }
}
