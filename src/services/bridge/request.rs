//! Bridging request and reply types

use crate::broker::EndpointKey;

/// One synchronous call to be bridged onto the broker
#[derive(Debug, Clone)]
pub struct BridgeRequest {
    pub endpoint: EndpointKey,
    /// Queue the message is sent to
    pub destination: String,
    /// Queue replies are read from; `None` uses a temporary queue
    pub reply_queue: Option<String>,
    pub publish_only: bool,
    /// Reply wait in ms; `None` uses the engine default
    pub timeout_ms: Option<u64>,
    /// `None` generates `<hostname>-<uuid>`
    pub correlation_id: Option<String>,
    pub body: String,
    /// Caller name/value pairs, fed to the property mapper
    pub attributes: Vec<(String, String)>,
    /// Log every step at info instead of debug
    pub verbose: bool,
}

impl BridgeRequest {
    pub fn new(endpoint: EndpointKey, destination: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            endpoint,
            destination: destination.into(),
            reply_queue: None,
            publish_only: false,
            timeout_ms: None,
            correlation_id: None,
            body: body.into(),
            attributes: Vec::new(),
            verbose: false,
        }
    }

    /// Blank names count as absent
    pub fn with_reply_queue(mut self, reply_queue: Option<String>) -> Self {
        self.reply_queue = reply_queue.filter(|q| !q.trim().is_empty());
        self
    }

    pub fn with_publish_only(mut self, publish_only: bool) -> Self {
        self.publish_only = publish_only;
        self
    }

    /// Zero or negative means "use the default"
    pub fn with_timeout_ms(mut self, timeout_ms: i64) -> Self {
        self.timeout_ms = u64::try_from(timeout_ms).ok().filter(|ms| *ms > 0);
        self
    }

    /// Blank ids count as absent
    pub fn with_correlation_id(mut self, correlation_id: Option<String>) -> Self {
        self.correlation_id = correlation_id.filter(|c| !c.trim().is_empty());
        self
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push((name.into(), value.into()));
        self
    }

    pub fn with_attributes<I>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        self.attributes.extend(attributes);
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }
}

/// What a successful bridging request produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeReply {
    /// Publish-only send; carries the broker-assigned message id
    Published {
        message_id: String,
        correlation_id: String,
    },
    /// Request/reply exchange; carries the reply text
    Replied { body: String, correlation_id: String },
}

impl BridgeReply {
    pub fn correlation_id(&self) -> &str {
        match self {
            BridgeReply::Published { correlation_id, .. }
            | BridgeReply::Replied { correlation_id, .. } => correlation_id,
        }
    }
}
