//! AMQP 1.0 broker client
//!
//! Reaches real brokers over `amqp://host:port` URLs (EMS, Artemis, Qpid and
//! other AMQP 1.0 speakers). The endpoint principal and credential are sent
//! as a SASL PLAIN profile.
//!
//! AMQP has no JMS temporary queues or selectors, so both are emulated:
//! - a temporary queue is a uniquely named queue under [`TEMP_QUEUE_PREFIX`];
//! - a consumer with a correlation selector accepts matching deliveries and
//!   releases every other one back to the queue.

use super::{
    BrokerConnection, BrokerError, BrokerResult, ConnectionFactory, Connector, DeliveryMode,
    Destination, EndpointKey, Message, MessageBody, MessageConsumer, MessageListener,
    MessageProducer, PropertyValue, Session,
};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use fe2o3_amqp::connection::ConnectionHandle;
use fe2o3_amqp::link::{Receiver, Sender};
use fe2o3_amqp::sasl_profile::SaslProfile;
use fe2o3_amqp::session::SessionHandle;
use fe2o3_amqp::types::messaging::{
    AmqpValue, ApplicationProperties, Body, Header, Message as AmqpMessage, MessageId, Outcome,
    Priority, Properties,
};
use fe2o3_amqp::types::primitives::{Binary, SimpleValue, Timestamp, Value};
use fe2o3_amqp::{Connection, Session as AmqpSession};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Prefix of message identifiers stamped by this client
pub const MESSAGE_ID_PREFIX: &str = "ID:AMQP.";

/// Prefix of emulated temporary queue names
pub const TEMP_QUEUE_PREFIX: &str = "$TMP$.AMQP.";

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

type AmqpBody = Body<Value>;

// ============================================================================
// Connector and factory
// ============================================================================

/// Connector for `amqp://` endpoints
#[derive(Debug, Clone, Default)]
pub struct AmqpConnector;

impl AmqpConnector {
    pub fn new() -> Self {
        Self
    }
}

impl Connector for AmqpConnector {
    fn connection_factory(&self, key: &EndpointKey) -> BrokerResult<Arc<dyn ConnectionFactory>> {
        Ok(Arc::new(AmqpConnectionFactory { key: key.clone() }))
    }
}

struct AmqpConnectionFactory {
    key: EndpointKey,
}

#[async_trait]
impl ConnectionFactory for AmqpConnectionFactory {
    async fn create_connection(&self) -> BrokerResult<Arc<dyn BrokerConnection>> {
        let url = self.key.url().to_string();
        let id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::SeqCst);

        let handle = Connection::builder()
            .container_id(format!("ems-http-bridge-{}", Uuid::new_v4()))
            .sasl_profile(SaslProfile::Plain {
                username: self.key.principal().to_string(),
                password: self.key.credential().unwrap_or_default().to_string(),
            })
            .open(url.as_str())
            .await
            .map_err(|e| BrokerError::Connect {
                url: url.clone(),
                reason: e.to_string(),
            })?;

        tracing::debug!(connection_id = id, url = %url, "AMQP connection opened");

        Ok(Arc::new(AmqpConnection {
            id,
            url,
            handle: Mutex::new(Some(handle)),
            open: AtomicBool::new(true),
        }))
    }
}

// ============================================================================
// Connection
// ============================================================================

struct AmqpConnection {
    id: u64,
    url: String,
    handle: Mutex<Option<ConnectionHandle<()>>>,
    open: AtomicBool,
}

impl AmqpConnection {
    fn ensure_open(&self) -> BrokerResult<()> {
        if self.open.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(BrokerError::ConnectionClosed)
        }
    }
}

#[async_trait]
impl BrokerConnection for AmqpConnection {
    fn id(&self) -> u64 {
        self.id
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn start(&self) -> BrokerResult<()> {
        // Deliveries flow as soon as a receiver attaches.
        self.ensure_open()
    }

    async fn create_session(&self) -> BrokerResult<Arc<dyn Session>> {
        self.ensure_open()?;
        let mut guard = self.handle.lock().await;
        let connection = guard.as_mut().ok_or(BrokerError::ConnectionClosed)?;

        match AmqpSession::begin(connection).await {
            Ok(session) => Ok(Arc::new(AmqpSessionState {
                connection_id: self.id,
                handle: Mutex::new(Some(session)),
                consumers: Mutex::new(Vec::new()),
                closed: AtomicBool::new(false),
            })),
            Err(e) => {
                self.open.store(false, Ordering::SeqCst);
                tracing::warn!(connection_id = self.id, url = %self.url, error = %e, "AMQP session begin failed");
                Err(BrokerError::ConnectionLost(e.to_string()))
            }
        }
    }

    async fn close(&self) -> BrokerResult<()> {
        self.open.store(false, Ordering::SeqCst);
        if let Some(mut connection) = self.handle.lock().await.take() {
            if let Err(e) = connection.close().await {
                tracing::debug!(connection_id = self.id, error = %e, "AMQP connection close failed");
            }
        }
        Ok(())
    }
}

// ============================================================================
// Session
// ============================================================================

struct AmqpSessionState {
    connection_id: u64,
    handle: Mutex<Option<SessionHandle<()>>>,
    consumers: Mutex<Vec<Arc<DeliveryTask>>>,
    closed: AtomicBool,
}

impl AmqpSessionState {
    fn ensure_usable(&self) -> BrokerResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(BrokerError::SessionClosed)
        } else {
            Ok(())
        }
    }

    fn link_name(&self, role: &str) -> String {
        format!("ems-http-bridge-{}-{}-{}", role, self.connection_id, Uuid::new_v4())
    }
}

#[async_trait]
impl Session for AmqpSessionState {
    fn queue(&self, name: &str) -> BrokerResult<Destination> {
        self.ensure_usable()?;
        if name.trim().is_empty() {
            return Err(BrokerError::UnknownDestination(name.to_string()));
        }
        Ok(Destination::queue(name))
    }

    async fn create_temporary_queue(&self) -> BrokerResult<Destination> {
        self.ensure_usable()?;
        Ok(Destination::TemporaryQueue(format!(
            "{}{}.{}",
            TEMP_QUEUE_PREFIX,
            self.connection_id,
            Uuid::new_v4().simple()
        )))
    }

    async fn create_producer(
        &self,
        destination: &Destination,
    ) -> BrokerResult<Box<dyn MessageProducer>> {
        self.ensure_usable()?;
        let mut guard = self.handle.lock().await;
        let session = guard.as_mut().ok_or(BrokerError::SessionClosed)?;

        let sender = Sender::attach(session, self.link_name("sender"), destination.name())
            .await
            .map_err(|e| BrokerError::ConnectionLost(e.to_string()))?;

        Ok(Box::new(AmqpProducer {
            destination: destination.clone(),
            sender: Mutex::new(Some(sender)),
        }))
    }

    async fn create_consumer(
        &self,
        destination: &Destination,
        correlation_selector: Option<&str>,
        listener: MessageListener,
    ) -> BrokerResult<Box<dyn MessageConsumer>> {
        self.ensure_usable()?;
        let mut guard = self.handle.lock().await;
        let session = guard.as_mut().ok_or(BrokerError::SessionClosed)?;

        let receiver = Receiver::attach(session, self.link_name("receiver"), destination.name())
            .await
            .map_err(|e| BrokerError::ConnectionLost(e.to_string()))?;

        let task = Arc::new(DeliveryTask::spawn(
            receiver,
            destination.clone(),
            correlation_selector.map(str::to_string),
            listener,
        ));
        self.consumers.lock().await.push(task.clone());

        Ok(Box::new(AmqpConsumer { task }))
    }

    async fn close(&self) -> BrokerResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let consumers: Vec<_> = self.consumers.lock().await.drain(..).collect();
        for consumer in consumers {
            consumer.stop().await;
        }

        if let Some(mut session) = self.handle.lock().await.take() {
            if let Err(e) = session.end().await {
                tracing::debug!(connection_id = self.connection_id, error = %e, "AMQP session end failed");
            }
        }
        Ok(())
    }
}

// ============================================================================
// Producer
// ============================================================================

struct AmqpProducer {
    destination: Destination,
    sender: Mutex<Option<Sender>>,
}

#[async_trait]
impl MessageProducer for AmqpProducer {
    async fn send(&self, message: &mut Message) -> BrokerResult<()> {
        let mut guard = self.sender.lock().await;
        let sender = guard.as_mut().ok_or(BrokerError::SessionClosed)?;

        message.message_id = Some(format!("{}{}", MESSAGE_ID_PREFIX, Uuid::new_v4()));
        message.destination = Some(self.destination.clone());
        message.timestamp = Some(Utc::now());

        let outcome = sender
            .send(to_amqp(message))
            .await
            .map_err(|e| BrokerError::Send(e.to_string()))?;

        match outcome {
            Outcome::Accepted(_) => Ok(()),
            other => Err(BrokerError::Send(format!(
                "{} not accepted by broker: {:?}",
                self.destination, other
            ))),
        }
    }

    async fn close(&self) -> BrokerResult<()> {
        if let Some(sender) = self.sender.lock().await.take() {
            if let Err(e) = sender.close().await {
                tracing::debug!(destination = %self.destination, error = %e, "AMQP sender detach failed");
            }
        }
        Ok(())
    }
}

// ============================================================================
// Consumer
// ============================================================================

/// Receive loop feeding one listener until stopped
struct DeliveryTask {
    stop: std::sync::Mutex<Option<oneshot::Sender<()>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl DeliveryTask {
    fn spawn(
        mut receiver: Receiver,
        destination: Destination,
        selector: Option<String>,
        listener: MessageListener,
    ) -> Self {
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            loop {
                let delivery = tokio::select! {
                    _ = &mut stop_rx => break,
                    delivery = receiver.recv::<AmqpBody>() => delivery,
                };

                let delivery = match delivery {
                    Ok(delivery) => delivery,
                    Err(e) => {
                        tracing::warn!(destination = %destination, error = %e, "AMQP receive failed");
                        break;
                    }
                };

                let mut message = from_amqp(delivery.message());
                let wanted = match &selector {
                    Some(selector) => message.correlation_id.as_deref() == Some(selector.as_str()),
                    None => true,
                };
                if !wanted {
                    if let Err(e) = receiver.release(&delivery).await {
                        tracing::debug!(destination = %destination, error = %e, "AMQP release failed");
                    }
                    continue;
                }

                if let Err(e) = receiver.accept(&delivery).await {
                    tracing::warn!(destination = %destination, error = %e, "AMQP accept failed");
                    continue;
                }
                message.destination = Some(destination.clone());
                listener(message);
            }

            if let Err(e) = receiver.close().await {
                tracing::debug!(destination = %destination, error = %e, "AMQP receiver detach failed");
            }
        });

        Self {
            stop: std::sync::Mutex::new(Some(stop_tx)),
            handle: Mutex::new(Some(handle)),
        }
    }

    async fn stop(&self) {
        let stop = self.stop.lock().ok().and_then(|mut s| s.take());
        if let Some(stop) = stop {
            let _ = stop.send(());
        }
        if let Some(handle) = self.handle.lock().await.take() {
            let _ = handle.await;
        }
    }
}

struct AmqpConsumer {
    task: Arc<DeliveryTask>,
}

#[async_trait]
impl MessageConsumer for AmqpConsumer {
    async fn close(&self) -> BrokerResult<()> {
        self.task.stop().await;
        Ok(())
    }
}

// ============================================================================
// Message mapping
// ============================================================================

fn message_id_text(id: &MessageId) -> String {
    match id {
        MessageId::String(s) => s.clone(),
        other => format!("{:?}", other),
    }
}

fn destination_for(name: &str) -> Destination {
    if name.starts_with(TEMP_QUEUE_PREFIX) {
        Destination::TemporaryQueue(name.to_string())
    } else {
        Destination::queue(name)
    }
}

/// Build the AMQP form of `message`. `message_type` travels as the subject.
fn to_amqp(message: &Message) -> AmqpMessage<AmqpBody> {
    let header = Header {
        durable: message.delivery_mode == Some(DeliveryMode::Persistent),
        priority: message.priority.map(Priority).unwrap_or_default(),
        ttl: message
            .expiration
            .filter(|ttl| *ttl > 0)
            .map(|ttl| u32::try_from(ttl).unwrap_or(u32::MAX)),
        ..Default::default()
    };

    let properties = Properties {
        message_id: message.message_id.clone().map(MessageId::String),
        correlation_id: message.correlation_id.clone().map(MessageId::String),
        to: message.destination.as_ref().map(|d| d.name().to_string()),
        reply_to: message.reply_to.as_ref().map(|d| d.name().to_string()),
        subject: message.message_type.clone(),
        creation_time: message
            .timestamp
            .map(|t| Timestamp::from_milliseconds(t.timestamp_millis())),
        ..Default::default()
    };

    let application_properties = message
        .properties
        .iter()
        .fold(ApplicationProperties::builder(), |builder, (name, value)| {
            let value = match value {
                PropertyValue::String(s) => SimpleValue::String(s.clone()),
                PropertyValue::Int(i) => SimpleValue::Int(*i),
                PropertyValue::Long(l) => SimpleValue::Long(*l),
                PropertyValue::Bool(b) => SimpleValue::Bool(*b),
            };
            builder.insert(name.clone(), value)
        })
        .build();

    let body = match &message.body {
        MessageBody::Text(text) => Body::Value(AmqpValue(Value::String(text.clone()))),
        MessageBody::Bytes(bytes) => Body::Value(AmqpValue(Value::Binary(Binary::from(bytes.clone())))),
    };

    AmqpMessage::builder()
        .header(header)
        .properties(properties)
        .application_properties(application_properties)
        .body(body)
        .build()
}

fn from_amqp(amqp: &AmqpMessage<AmqpBody>) -> Message {
    let mut message = match &amqp.body {
        Body::Value(AmqpValue(Value::String(text))) => Message::text(text.clone()),
        Body::Value(AmqpValue(Value::Binary(bytes))) => Message::bytes(bytes.to_vec()),
        _ => Message::bytes(Vec::new()),
    };

    if let Some(header) = &amqp.header {
        message.delivery_mode = Some(if header.durable {
            DeliveryMode::Persistent
        } else {
            DeliveryMode::NonPersistent
        });
        message.priority = Some(header.priority.0);
        message.expiration = header.ttl.map(i64::from);
    }

    if let Some(properties) = &amqp.properties {
        message.message_id = properties.message_id.as_ref().map(message_id_text);
        message.correlation_id = properties.correlation_id.as_ref().map(message_id_text);
        message.reply_to = properties.reply_to.as_deref().map(destination_for);
        message.message_type = properties.subject.clone();
        message.timestamp = properties
            .creation_time
            .as_ref()
            .and_then(|t| Utc.timestamp_millis_opt(t.milliseconds()).single());
    }

    if let Some(application_properties) = &amqp.application_properties {
        for (name, value) in application_properties.0.iter() {
            let value = match value {
                SimpleValue::String(s) => PropertyValue::String(s.clone()),
                SimpleValue::Int(i) => PropertyValue::Int(*i),
                SimpleValue::Long(l) => PropertyValue::Long(*l),
                SimpleValue::Bool(b) => PropertyValue::Bool(*b),
                _ => continue,
            };
            message.set_property(name.clone(), value);
        }
    }

    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{ConnectorRegistry, MemoryBroker};
    use std::time::Duration;

    #[test]
    fn test_factory_creation_needs_no_network() {
        let key = EndpointKey::new("amqp://ems.invalid:5672", "admin", Some("secret".to_string()));
        assert!(AmqpConnector::new().connection_factory(&key).is_ok());
    }

    #[test]
    fn test_registry_routes_amqp_urls() {
        let registry = ConnectorRegistry::new()
            .with("memory", Arc::new(MemoryBroker::new()))
            .with("amqp", Arc::new(AmqpConnector::new()));

        let amqp = EndpointKey::new("AMQP://ems.invalid:5672", "admin", None);
        assert!(registry.connection_factory(&amqp).is_ok());

        let nats = EndpointKey::new("nats://ems.invalid:4222", "admin", None);
        assert!(matches!(
            registry.connection_factory(&nats).err(),
            Some(BrokerError::UnsupportedScheme(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_broker_is_connection_fault() {
        let key = EndpointKey::new("amqp://127.0.0.1:1", "admin", None);
        let factory = AmqpConnector::new().connection_factory(&key).unwrap();

        let err = tokio::time::timeout(Duration::from_secs(10), factory.create_connection())
            .await
            .expect("connect attempt should not hang")
            .err()
            .unwrap();

        assert!(err.is_connection_fault());
        assert!(matches!(err, BrokerError::Connect { ref url, .. } if url == "amqp://127.0.0.1:1"));
    }

    #[test]
    fn test_message_attributes_survive_amqp_mapping() {
        let mut message = Message::text("<order id=\"7\"/>")
            .with_correlation_id("corr-7")
            .with_reply_to(Destination::TemporaryQueue(format!("{}1.abc", TEMP_QUEUE_PREFIX)))
            .with_type("Order");
        message.priority = Some(7);
        message.delivery_mode = Some(DeliveryMode::Persistent);
        message.expiration = Some(30_000);
        message.set_property("region", PropertyValue::String("EU".to_string()));
        message.set_property("attempt", PropertyValue::Int(2));

        let amqp = to_amqp(&message);
        let header = amqp.header.as_ref().unwrap();
        assert!(header.durable);
        assert_eq!(header.ttl, Some(30_000));
        assert_eq!(
            amqp.properties.as_ref().and_then(|p| p.subject.as_deref()),
            Some("Order")
        );

        let back = from_amqp(&amqp);
        assert_eq!(back.text_body(), Some("<order id=\"7\"/>"));
        assert_eq!(back.correlation_id.as_deref(), Some("corr-7"));
        assert!(back.reply_to.as_ref().map(Destination::is_temporary).unwrap_or(false));
        assert_eq!(back.message_type.as_deref(), Some("Order"));
        assert_eq!(back.priority, Some(7));
        assert_eq!(back.delivery_mode, Some(DeliveryMode::Persistent));
        assert_eq!(back.property("region"), Some(&PropertyValue::String("EU".to_string())));
        assert_eq!(back.property("attempt"), Some(&PropertyValue::Int(2)));
    }

    #[test]
    fn test_binary_body_maps_to_bytes_message() {
        let amqp = to_amqp(&Message::bytes(vec![0xCA, 0xFE]));
        let back = from_amqp(&amqp);
        assert_eq!(back.body, MessageBody::Bytes(vec![0xCA, 0xFE]));
        assert_eq!(back.text_body(), None);
    }
}
