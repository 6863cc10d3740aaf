//! Broker-level message model
//!
//! Mirrors the JMS message surface the bridge needs: a text body, the standard
//! header fields and a typed property map.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt;

// ============================================================================
// Destinations
// ============================================================================

/// Address a message is sent to or received from
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Destination {
    /// A named queue
    Queue(String),
    /// A broker-allocated queue that lives as long as the session that created it
    TemporaryQueue(String),
}

impl Destination {
    pub fn queue(name: impl Into<String>) -> Self {
        Destination::Queue(name.into())
    }

    /// Queue name as known to the broker
    pub fn name(&self) -> &str {
        match self {
            Destination::Queue(name) | Destination::TemporaryQueue(name) => name,
        }
    }

    pub fn is_temporary(&self) -> bool {
        matches!(self, Destination::TemporaryQueue(_))
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Destination::Queue(name) => write!(f, "queue://{}", name),
            Destination::TemporaryQueue(name) => write!(f, "temp-queue://{}", name),
        }
    }
}

// ============================================================================
// Header values
// ============================================================================

/// Message persistence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    NonPersistent,
    Persistent,
}

impl DeliveryMode {
    /// Numeric JMS constant (1 = NON_PERSISTENT, 2 = PERSISTENT)
    pub fn code(&self) -> u8 {
        match self {
            DeliveryMode::NonPersistent => 1,
            DeliveryMode::Persistent => 2,
        }
    }
}

impl fmt::Display for DeliveryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryMode::NonPersistent => write!(f, "NON_PERSISTENT"),
            DeliveryMode::Persistent => write!(f, "PERSISTENT"),
        }
    }
}

/// Typed message property value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyValue {
    String(String),
    Int(i32),
    Long(i64),
    Bool(bool),
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::String(v) => write!(f, "{}", v),
            PropertyValue::Int(v) => write!(f, "{}", v),
            PropertyValue::Long(v) => write!(f, "{}", v),
            PropertyValue::Bool(v) => write!(f, "{}", v),
        }
    }
}

/// Message payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageBody {
    Text(String),
    Bytes(Vec<u8>),
}

// ============================================================================
// Message
// ============================================================================

/// A message as seen by producers and consumers
///
/// Header fields left as `None` take the broker's defaults on send.
/// `message_id`, `destination` and `timestamp` are stamped by the broker.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub body: MessageBody,
    pub message_id: Option<String>,
    pub correlation_id: Option<String>,
    pub reply_to: Option<Destination>,
    pub destination: Option<Destination>,
    pub delivery_mode: Option<DeliveryMode>,
    pub message_type: Option<String>,
    /// Milliseconds; 0 means never expires
    pub expiration: Option<i64>,
    pub priority: Option<u8>,
    pub timestamp: Option<DateTime<Utc>>,
    pub properties: BTreeMap<String, PropertyValue>,
}

impl Message {
    /// Create a text message
    pub fn text(body: impl Into<String>) -> Self {
        Self::with_body(MessageBody::Text(body.into()))
    }

    /// Create a bytes message
    pub fn bytes(body: Vec<u8>) -> Self {
        Self::with_body(MessageBody::Bytes(body))
    }

    fn with_body(body: MessageBody) -> Self {
        Self {
            body,
            message_id: None,
            correlation_id: None,
            reply_to: None,
            destination: None,
            delivery_mode: None,
            message_type: None,
            expiration: None,
            priority: None,
            timestamp: None,
            properties: BTreeMap::new(),
        }
    }

    /// Text payload, or `None` for non-text messages
    pub fn text_body(&self) -> Option<&str> {
        match &self.body {
            MessageBody::Text(text) => Some(text),
            MessageBody::Bytes(_) => None,
        }
    }

    pub fn property(&self, name: &str) -> Option<&PropertyValue> {
        self.properties.get(name)
    }

    pub fn set_property(&mut self, name: impl Into<String>, value: PropertyValue) {
        self.properties.insert(name.into(), value);
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn with_reply_to(mut self, reply_to: Destination) -> Self {
        self.reply_to = Some(reply_to);
        self
    }

    pub fn with_type(mut self, message_type: impl Into<String>) -> Self {
        self.message_type = Some(message_type.into());
        self
    }
}
