use std::time::Duration;

use async_nats::{Client, RequestErrorKind};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use tracing::info;

use super::{BusError, Envelope, MessageBus, Subscription};

/// [`MessageBus`] over core NATS (no JetStream: the bridge protocols are
/// one-shot request/reply and need no persistence).
#[derive(Clone)]
pub struct NatsBus {
    client: Client,
}

impl NatsBus {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub async fn connect(nats_url: &str) -> Result<Self, BusError> {
        info!("Connecting to NATS at {}", nats_url);
        let client = async_nats::connect(nats_url)
            .await
            .map_err(|e| BusError::Connection(e.to_string()))?;
        Ok(Self::new(client))
    }
}

#[async_trait]
impl MessageBus for NatsBus {
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), BusError> {
        self.client
            .publish(subject.to_string(), payload)
            .await
            .map_err(|e| BusError::Publish(e.to_string()))?;
        self.client
            .flush()
            .await
            .map_err(|e| BusError::Publish(e.to_string()))
    }

    async fn request(
        &self,
        subject: &str,
        payload: Bytes,
        timeout: Duration,
    ) -> Result<Bytes, BusError> {
        let timed_out = || BusError::Timeout {
            subject: subject.to_string(),
            timeout,
        };

        match tokio::time::timeout(timeout, self.client.request(subject.to_string(), payload)).await
        {
            Ok(Ok(message)) => Ok(message.payload),
            Ok(Err(e)) => match e.kind() {
                RequestErrorKind::TimedOut => Err(timed_out()),
                RequestErrorKind::NoResponders => Err(BusError::NoResponders(subject.to_string())),
                _ => Err(BusError::Request(e.to_string())),
            },
            Err(_) => Err(timed_out()),
        }
    }

    async fn subscribe(&self, subject: &str) -> Result<Subscription, BusError> {
        let subscriber = self
            .client
            .subscribe(subject.to_string())
            .await
            .map_err(|e| BusError::Subscribe(e.to_string()))?;

        Ok(subscriber
            .map(|message| Envelope {
                subject: message.subject.to_string(),
                payload: message.payload,
                reply: message.reply.map(|reply| reply.to_string()),
            })
            .boxed())
    }
}
