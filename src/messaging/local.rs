use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use super::{BusError, Envelope, MessageBus, Subscription};

/// In-process bus for tests and single-binary deployments.
///
/// Mirrors the NATS semantics the bridge relies on: fan-out to every
/// subscriber of a subject, replies through a private inbox subject, and a
/// request to a subject nobody listens on fails immediately.
#[derive(Debug, Default)]
pub struct LocalBus {
    subscribers: Mutex<HashMap<String, Vec<mpsc::UnboundedSender<Envelope>>>>,
    next_inbox: AtomicU64,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver to live subscribers; returns how many received the message.
    fn deliver(&self, envelope: Envelope) -> Result<usize, BusError> {
        let mut subscribers = self
            .subscribers
            .lock()
            .map_err(|_| BusError::Publish("subscriber table poisoned".to_string()))?;

        let Some(senders) = subscribers.get_mut(&envelope.subject) else {
            return Ok(0);
        };
        senders.retain(|tx| tx.send(envelope.clone()).is_ok());
        Ok(senders.len())
    }

    fn close_subject(&self, subject: &str) {
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.remove(subject);
        }
    }
}

#[async_trait]
impl MessageBus for LocalBus {
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), BusError> {
        self.deliver(Envelope {
            subject: subject.to_string(),
            payload,
            reply: None,
        })?;
        Ok(())
    }

    async fn request(
        &self,
        subject: &str,
        payload: Bytes,
        timeout: Duration,
    ) -> Result<Bytes, BusError> {
        let inbox = format!(
            "_INBOX.{}",
            self.next_inbox.fetch_add(1, Ordering::Relaxed)
        );
        let mut replies = self.subscribe(&inbox).await?;

        let delivered = self.deliver(Envelope {
            subject: subject.to_string(),
            payload,
            reply: Some(inbox.clone()),
        });
        if !matches!(delivered, Ok(n) if n > 0) {
            self.close_subject(&inbox);
            return Err(delivered
                .err()
                .unwrap_or_else(|| BusError::NoResponders(subject.to_string())));
        }

        let reply = tokio::time::timeout(timeout, replies.next()).await;
        self.close_subject(&inbox);
        match reply {
            Ok(Some(reply)) => Ok(reply.payload),
            Ok(None) => Err(BusError::Request(format!(
                "reply inbox for '{subject}' closed"
            ))),
            Err(_) => Err(BusError::Timeout {
                subject: subject.to_string(),
                timeout,
            }),
        }
    }

    async fn subscribe(&self, subject: &str) -> Result<Subscription, BusError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .map_err(|_| BusError::Subscribe("subscriber table poisoned".to_string()))?
            .entry(subject.to_string())
            .or_default()
            .push(tx);
        Ok(UnboundedReceiverStream::new(rx).boxed())
    }
}
