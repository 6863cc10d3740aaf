//! Reply Emulator
//!
//! A stand-in responder for request/reply testing. It consumes requests from
//! one queue and answers each on the request's reply-to destination with a
//! JSON document describing the request and where it was handled.

use crate::broker::{
    BrokerConnection, BrokerResult, Connector, EndpointKey, Message, MessageConsumer,
    MessageListener, Session,
};
use crate::utils::{hostname, location, user_name};
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Message type set on every reply
pub const REPLY_TYPE: &str = "Reply";

const REPLY_FROM: &str = "ReplyEmulator";

/// JSON body of an emulated reply
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmulatedReply {
    pub timestamp: String,
    pub received_at: String,
    pub hostname: String,
    /// Host name with its resolved address
    pub location: String,
    /// Account the emulator process runs under
    pub user_name: String,
    pub reply_from: String,
    pub message_number: u64,
    pub request_message_id: String,
    pub correlation_id: String,
    pub original_message: String,
}

/// A running emulator bound to one request queue
pub struct ReplyEmulator {
    queue: String,
    connection: Arc<dyn BrokerConnection>,
    session: Arc<dyn Session>,
    consumer: Box<dyn MessageConsumer>,
    worker: JoinHandle<()>,
    handled: Arc<AtomicU64>,
}

impl ReplyEmulator {
    /// Connect to `key` and start answering requests sent to `queue`
    pub async fn start(connector: &dyn Connector, key: &EndpointKey, queue: &str) -> BrokerResult<Self> {
        let connection = connector.connection_factory(key)?.create_connection().await?;
        connection.start().await?;
        let session = connection.create_session().await?;
        let destination = session.queue(queue)?;

        let (tx, rx) = mpsc::unbounded_channel::<Message>();
        let listener: MessageListener = Arc::new(move |message| {
            let _ = tx.send(message);
        });

        let handled = Arc::new(AtomicU64::new(0));
        let worker = tokio::spawn(answer_requests(session.clone(), rx, handled.clone()));

        let consumer = session.create_consumer(&destination, None, listener).await?;

        tracing::info!(queue = %queue, endpoint = %key, "Reply emulator started");
        Ok(Self {
            queue: queue.to_string(),
            connection,
            session,
            consumer,
            worker,
            handled,
        })
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Requests received so far, answered or skipped
    pub fn handled(&self) -> u64 {
        self.handled.load(Ordering::SeqCst)
    }

    pub async fn stop(self) {
        let _ = self.consumer.close().await;
        self.worker.abort();
        let _ = self.session.close().await;
        let _ = self.connection.close().await;
        tracing::info!(queue = %self.queue, handled = self.handled(), "Reply emulator stopped");
    }
}

async fn answer_requests(
    session: Arc<dyn Session>,
    mut requests: mpsc::UnboundedReceiver<Message>,
    handled: Arc<AtomicU64>,
) {
    while let Some(request) = requests.recv().await {
        let number = handled.fetch_add(1, Ordering::SeqCst) + 1;
        let received_at = now();

        let Some(reply_to) = request.reply_to.clone() else {
            tracing::warn!(
                message_id = request.message_id.as_deref().unwrap_or_default(),
                "Request has no reply-to destination, skipping"
            );
            continue;
        };

        let correlation_id = request.correlation_id.clone();
        let body = EmulatedReply {
            timestamp: now(),
            received_at,
            hostname: hostname().to_string(),
            location: location().to_string(),
            user_name: user_name(),
            reply_from: REPLY_FROM.to_string(),
            message_number: number,
            request_message_id: request.message_id.clone().unwrap_or_default(),
            correlation_id: correlation_id.clone().unwrap_or_default(),
            original_message: request.text_body().unwrap_or_default().to_string(),
        };

        let mut reply = Message::text(serde_json::to_string_pretty(&body).unwrap_or_default())
            .with_type(REPLY_TYPE);
        reply.correlation_id = correlation_id;

        let sent = match session.create_producer(&reply_to).await {
            Ok(producer) => {
                let sent = producer.send(&mut reply).await;
                let _ = producer.close().await;
                sent
            }
            Err(e) => Err(e),
        };

        match sent {
            Ok(()) => tracing::info!(
                number,
                reply_to = %reply_to,
                correlation_id = reply.correlation_id.as_deref().unwrap_or_default(),
                "Reply sent"
            ),
            Err(e) => tracing::warn!(number, reply_to = %reply_to, error = %e, "Failed to send reply"),
        }
    }
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
