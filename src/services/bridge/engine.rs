//! Bridge engine implementation

use super::request::{BridgeReply, BridgeRequest};
use crate::bridge_step;
use crate::broker::{BrokerConnection, Destination, Message, MessageListener, Session};
use crate::error::{BridgeError, BridgeOutcome};
use crate::schemas::{BridgeResult, ContentKind};
use crate::services::endpoint_pool::EndpointPool;
use crate::services::metrics::BridgeMetrics;
use crate::services::properties::{self, MessageAttribute};
use crate::utils::default_correlation_id;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, Semaphore};

/// Reply wait when a request names none
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Workers allowed per available processor
const WORKERS_PER_PROCESSOR: usize = 32;

type ReplySlot = oneshot::Receiver<BridgeOutcome<String>>;

/// Executes bridging requests. Cheap to clone; clones share the pool, the
/// counters and the worker limit.
#[derive(Clone)]
pub struct BridgeEngine {
    pool: Arc<EndpointPool>,
    metrics: BridgeMetrics,
    workers: Arc<Semaphore>,
    worker_limit: usize,
    default_timeout: Duration,
}

impl BridgeEngine {
    pub fn new(pool: Arc<EndpointPool>, metrics: BridgeMetrics) -> Self {
        let worker_limit = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
            * WORKERS_PER_PROCESSOR;
        Self {
            pool,
            metrics,
            workers: Arc::new(Semaphore::new(worker_limit)),
            worker_limit,
            default_timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
        }
    }

    pub fn with_worker_limit(mut self, limit: usize) -> Self {
        let limit = limit.max(1);
        self.workers = Arc::new(Semaphore::new(limit));
        self.worker_limit = limit;
        self
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn pool(&self) -> &Arc<EndpointPool> {
        &self.pool
    }

    pub fn metrics(&self) -> &BridgeMetrics {
        &self.metrics
    }

    pub fn worker_limit(&self) -> usize {
        self.worker_limit
    }

    pub fn available_workers(&self) -> usize {
        self.workers.available_permits()
    }

    /// Run a request and render its outcome for the caller
    pub async fn bridge(&self, request: BridgeRequest, content_kind: ContentKind) -> BridgeResult {
        match self.submit(request).await {
            Ok(BridgeReply::Published { message_id, .. }) => {
                BridgeResult::published(&message_id, content_kind)
            }
            Ok(BridgeReply::Replied { body, .. }) => BridgeResult::success(body, content_kind),
            Err(e) => BridgeResult::from_error(&e, content_kind),
        }
    }

    /// Run a request on its own worker task.
    ///
    /// The worker finishes (and cleans up) even if the caller stops waiting.
    pub async fn submit(&self, request: BridgeRequest) -> BridgeOutcome<BridgeReply> {
        let permit = self
            .workers
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| BridgeError::Worker(e.to_string()))?;

        let engine = self.clone();
        let worker = tokio::spawn(async move {
            let _permit = permit;
            engine.execute(request).await
        });

        worker
            .await
            .map_err(|e| BridgeError::Worker(e.to_string()))?
    }

    /// Run a request on the current task
    pub async fn execute(&self, request: BridgeRequest) -> BridgeOutcome<BridgeReply> {
        let started = Instant::now();
        let outcome = self.run(&request).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match &outcome {
            Ok(reply) => bridge_step!(
                request.verbose,
                correlation_id = %reply.correlation_id(),
                elapsed_ms,
                "Bridge request completed"
            ),
            Err(e) => tracing::warn!(
                endpoint = %request.endpoint,
                destination = %request.destination,
                publish_only = request.publish_only,
                error = %e,
                elapsed_ms,
                "Bridge request failed"
            ),
        }
        outcome
    }

    async fn run(&self, request: &BridgeRequest) -> BridgeOutcome<BridgeReply> {
        let correlation_id = match &request.correlation_id {
            Some(id) => id.clone(),
            None => default_correlation_id(),
        };
        properties::validate_correlation_id(&correlation_id)?;
        properties::validate_destination(&request.destination)?;
        if let Some(reply_queue) = &request.reply_queue {
            properties::validate_destination(reply_queue)?;
        }

        let attributes = properties::map_attributes(
            request
                .attributes
                .iter()
                .map(|(name, value)| (name.as_str(), value.as_str())),
        );

        let lease = self.pool.acquire(&request.endpoint).await?;
        bridge_step!(
            request.verbose,
            endpoint = %request.endpoint,
            connection_id = lease.connection().id(),
            correlation_id = %correlation_id,
            "Connection acquired"
        );

        let outcome = self
            .exchange(lease.connection(), request, &correlation_id, &attributes)
            .await;

        if matches!(&outcome, Err(e) if e.is_connection_fault()) {
            self.pool.discard(lease).await;
        } else {
            self.pool.release(lease).await;
        }
        outcome
    }

    /// Fresh session per request, closed on every path
    async fn exchange(
        &self,
        connection: &Arc<dyn BrokerConnection>,
        request: &BridgeRequest,
        correlation_id: &str,
        attributes: &[MessageAttribute],
    ) -> BridgeOutcome<BridgeReply> {
        let session = connection.create_session().await?;

        let outcome = if request.publish_only {
            self.publish(session.as_ref(), request, correlation_id, attributes)
                .await
        } else {
            self.request_reply(session.as_ref(), request, correlation_id, attributes)
                .await
        };

        if let Err(e) = session.close().await {
            tracing::debug!(error = %e, "Error closing session");
        }
        outcome
    }

    async fn publish(
        &self,
        session: &dyn Session,
        request: &BridgeRequest,
        correlation_id: &str,
        attributes: &[MessageAttribute],
    ) -> BridgeOutcome<BridgeReply> {
        let destination = session.queue(&request.destination)?;
        let producer = session.create_producer(&destination).await?;

        let mut message = self.compose(request, correlation_id, attributes);
        let sent = producer.send(&mut message).await;
        let _ = producer.close().await;
        sent?;
        self.metrics.inc_sent();

        let message_id = message.message_id.unwrap_or_default();
        bridge_step!(
            request.verbose,
            destination = %destination,
            message_id = %message_id,
            "Message published"
        );
        Ok(BridgeReply::Published {
            message_id,
            correlation_id: correlation_id.to_string(),
        })
    }

    async fn request_reply(
        &self,
        session: &dyn Session,
        request: &BridgeRequest,
        correlation_id: &str,
        attributes: &[MessageAttribute],
    ) -> BridgeOutcome<BridgeReply> {
        let reply_to = match &request.reply_queue {
            Some(name) => session.queue(name)?,
            None => session.create_temporary_queue().await?,
        };
        // Shared reply queues only hand this request its own reply.
        let selector = if reply_to.is_temporary() {
            None
        } else {
            Some(correlation_id)
        };

        let (listener, reply) = self.reply_slot();
        let consumer = session
            .create_consumer(&reply_to, selector, listener)
            .await?;
        bridge_step!(request.verbose, reply_to = %reply_to, "Reply consumer subscribed");

        let outcome = self
            .send_and_wait(session, request, correlation_id, attributes, reply_to, reply)
            .await;

        let _ = consumer.close().await;
        outcome
    }

    async fn send_and_wait(
        &self,
        session: &dyn Session,
        request: &BridgeRequest,
        correlation_id: &str,
        attributes: &[MessageAttribute],
        reply_to: Destination,
        reply: ReplySlot,
    ) -> BridgeOutcome<BridgeReply> {
        let destination = session.queue(&request.destination)?;
        let producer = session.create_producer(&destination).await?;

        let mut message = self
            .compose(request, correlation_id, attributes)
            .with_reply_to(reply_to);
        let sent = producer.send(&mut message).await;
        let _ = producer.close().await;
        sent?;
        self.metrics.inc_sent();

        let timeout = request
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(self.default_timeout);
        bridge_step!(
            request.verbose,
            destination = %destination,
            message_id = message.message_id.as_deref().unwrap_or_default(),
            timeout_ms = timeout.as_millis() as u64,
            "Request sent, waiting for reply"
        );

        match tokio::time::timeout(timeout, reply).await {
            Ok(Ok(Ok(body))) => Ok(BridgeReply::Replied {
                body,
                correlation_id: correlation_id.to_string(),
            }),
            Ok(Ok(Err(e))) => Err(e),
            Ok(Err(_)) => Err(BridgeError::ReplyChannelClosed),
            Err(_) => Err(BridgeError::Timeout(timeout.as_millis() as u64)),
        }
    }

    /// Listener completing a one-shot slot with the first reply it sees
    fn reply_slot(&self) -> (MessageListener, ReplySlot) {
        let (tx, rx) = oneshot::channel();
        let slot = Mutex::new(Some(tx));
        let metrics = self.metrics.clone();

        // Only the text reply that completes the slot counts as replied.
        let listener: MessageListener = Arc::new(move |message: Message| {
            let Some(sender) = slot.lock().ok().and_then(|mut s| s.take()) else {
                return;
            };
            let reply = match message.text_body() {
                Some(text) => {
                    metrics.inc_replied();
                    Ok(text.to_string())
                }
                None => Err(BridgeError::UnexpectedReply(
                    "reply is not a text message".to_string(),
                )),
            };
            let _ = sender.send(reply);
        });
        (listener, rx)
    }

    fn compose(
        &self,
        request: &BridgeRequest,
        correlation_id: &str,
        attributes: &[MessageAttribute],
    ) -> Message {
        let mut message = Message::text(request.body.as_str()).with_correlation_id(correlation_id);
        let applied = properties::apply(&mut message, attributes);
        if !attributes.is_empty() {
            bridge_step!(
                request.verbose,
                applied,
                rejected = attributes.len() - applied,
                "Message attributes applied"
            );
        }
        message
    }
}
