//! Broker client abstraction
//!
//! The bridge talks to message-oriented middleware through the traits in this
//! module. They follow the JMS object model:
//!
//! `Connector` → `ConnectionFactory` → `BrokerConnection` → `Session` →
//! `MessageProducer` / `MessageConsumer`
//!
//! A `Connector` turns an [`EndpointKey`] into a factory without doing any
//! network I/O; the factory opens connections. Sessions and everything below
//! them are single-request objects and are never shared between requests.
//!
//! [`ConnectorRegistry`] dispatches on the URL scheme so several transports can
//! live side by side. The crate ships the in-process [`memory`] broker
//! (`memory://` URLs) and the [`amqp`] client for AMQP 1.0 brokers
//! (`amqp://` URLs).
//!
//! # Example
//! ```ignore
//! let broker = MemoryBroker::new();
//! let registry = ConnectorRegistry::new().with("memory", Arc::new(broker));
//! let key = EndpointKey::new("memory://local", "admin", None);
//! let factory = registry.connection_factory(&key)?;
//! let connection = factory.create_connection().await?;
//! connection.start().await?;
//! ```

pub mod amqp;
mod endpoint;
mod error;
pub mod memory;
mod message;

pub use amqp::AmqpConnector;
pub use endpoint::EndpointKey;
pub use error::{BrokerError, BrokerResult};
pub use memory::MemoryBroker;
pub use message::{DeliveryMode, Destination, Message, MessageBody, PropertyValue};

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// Asynchronous delivery callback registered with a consumer.
///
/// Invoked on the broker client's own delivery task, never on the task that
/// created the consumer.
pub type MessageListener = Arc<dyn Fn(Message) + Send + Sync>;

// ============================================================================
// Client traits
// ============================================================================

/// Builds connection factories for endpoints
pub trait Connector: Send + Sync {
    /// Create the factory for an endpoint. Must not perform network I/O.
    fn connection_factory(&self, key: &EndpointKey) -> BrokerResult<Arc<dyn ConnectionFactory>>;
}

/// Opens connections to one endpoint
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    async fn create_connection(&self) -> BrokerResult<Arc<dyn BrokerConnection>>;
}

/// A physical connection to the broker
#[async_trait]
pub trait BrokerConnection: Send + Sync {
    /// Connection identifier, unique per broker
    fn id(&self) -> u64;

    /// False once the connection was closed or the broker dropped it
    fn is_open(&self) -> bool;

    /// Start (or restart) message delivery. Also serves as a liveness check.
    async fn start(&self) -> BrokerResult<()>;

    /// Open a non-transacted, auto-acknowledge session
    async fn create_session(&self) -> BrokerResult<Arc<dyn Session>>;

    async fn close(&self) -> BrokerResult<()>;
}

/// A single-threaded unit of work on a connection
#[async_trait]
pub trait Session: Send + Sync {
    /// Reference a named queue
    fn queue(&self, name: &str) -> BrokerResult<Destination>;

    /// Allocate a temporary queue that is deleted when this session closes
    async fn create_temporary_queue(&self) -> BrokerResult<Destination>;

    async fn create_producer(
        &self,
        destination: &Destination,
    ) -> BrokerResult<Box<dyn MessageProducer>>;

    /// Subscribe `listener` to `destination`.
    ///
    /// With a `correlation_selector`, only messages whose correlation id equals
    /// the selector are delivered; other messages stay on the queue.
    async fn create_consumer(
        &self,
        destination: &Destination,
        correlation_selector: Option<&str>,
        listener: MessageListener,
    ) -> BrokerResult<Box<dyn MessageConsumer>>;

    /// Close the session together with its producers, consumers and
    /// temporary queues
    async fn close(&self) -> BrokerResult<()>;
}

#[async_trait]
pub trait MessageProducer: Send + Sync {
    /// Send `message`; the broker stamps message id, destination and timestamp
    /// into it.
    async fn send(&self, message: &mut Message) -> BrokerResult<()>;

    async fn close(&self) -> BrokerResult<()>;
}

#[async_trait]
pub trait MessageConsumer: Send + Sync {
    async fn close(&self) -> BrokerResult<()>;
}

// ============================================================================
// Scheme registry
// ============================================================================

/// Routes endpoints to connectors by URL scheme
#[derive(Clone, Default)]
pub struct ConnectorRegistry {
    connectors: HashMap<String, Arc<dyn Connector>>,
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `connector` for URLs starting with `scheme://`
    pub fn with(mut self, scheme: &str, connector: Arc<dyn Connector>) -> Self {
        self.connectors
            .insert(scheme.to_ascii_lowercase(), connector);
        self
    }

    pub fn schemes(&self) -> Vec<&str> {
        self.connectors.keys().map(|s| s.as_str()).collect()
    }
}

impl Connector for ConnectorRegistry {
    fn connection_factory(&self, key: &EndpointKey) -> BrokerResult<Arc<dyn ConnectionFactory>> {
        let connector = key
            .scheme()
            .and_then(|scheme| self.connectors.get(&scheme))
            .ok_or_else(|| BrokerError::UnsupportedScheme(key.url().to_string()))?;
        connector.connection_factory(key)
    }
}
