use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use thiserror::Error;

/// Message bus error
#[derive(Debug, Error)]
pub enum BusError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Publish error: {0}")]
    Publish(String),

    #[error("Subscribe error: {0}")]
    Subscribe(String),

    #[error("Request error: {0}")]
    Request(String),

    /// Nobody is subscribed to the subject.
    #[error("No responders on '{0}'")]
    NoResponders(String),

    #[error("No reply on '{subject}' within {timeout:?}")]
    Timeout { subject: String, timeout: Duration },
}

/// A message as delivered to a subscriber.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub subject: String,
    pub payload: Bytes,
    /// Subject the requester is waiting on, if any
    pub reply: Option<String>,
}

pub type Subscription = BoxStream<'static, Envelope>;

/// Publish/subscribe with request/reply, at-most-once delivery.
#[async_trait]
pub trait MessageBus: Send + Sync {
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), BusError>;

    /// Publish and wait for a single reply. Fails with
    /// [`BusError::Timeout`] once `timeout` elapses.
    async fn request(
        &self,
        subject: &str,
        payload: Bytes,
        timeout: Duration,
    ) -> Result<Bytes, BusError>;

    async fn subscribe(&self, subject: &str) -> Result<Subscription, BusError>;
}
