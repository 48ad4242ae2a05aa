use crate::nats::MessageAcker;
use anyhow::Result;
use async_nats::HeaderMap;
use bytes::Bytes;
use std::time::Duration;

/// A JetStream message delivered to a durable consumer, with its delivery metadata
/// and a handle for acknowledging it.
pub struct FetchedMessage {
    pub subject: String,
    pub payload: Bytes,
    pub headers: Option<HeaderMap>,
    pub stream: String,
    pub stream_sequence: u64,
    /// 1 on first delivery
    pub delivered: i64,
    acker: Box<dyn MessageAcker>,
}

impl FetchedMessage {
    pub fn new(
        subject: String,
        payload: Bytes,
        headers: Option<HeaderMap>,
        stream: String,
        stream_sequence: u64,
        delivered: i64,
        acker: Box<dyn MessageAcker>,
    ) -> Self {
        Self {
            subject,
            payload,
            headers,
            stream,
            stream_sequence,
            delivered,
            acker,
        }
    }

    /// Stable across redeliveries of the same stream message
    pub fn message_id(&self) -> String {
        format!("{}:{}", self.stream, self.stream_sequence)
    }

    pub async fn ack(&self) -> Result<()> {
        self.acker.ack().await
    }

    pub async fn nak(&self, delay: Option<Duration>) -> Result<()> {
        self.acker.nak(delay).await
    }

    pub async fn term(&self) -> Result<()> {
        self.acker.term().await
    }
}

impl std::fmt::Debug for FetchedMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchedMessage")
            .field("subject", &self.subject)
            .field("payload_bytes", &self.payload.len())
            .field("stream", &self.stream)
            .field("stream_sequence", &self.stream_sequence)
            .field("delivered", &self.delivered)
            .finish()
    }
}

/// A core NATS message received through a queue subscription
#[derive(Debug, Clone)]
pub struct CoreMessage {
    pub subject: String,
    pub payload: Bytes,
    /// Inbox of a requester waiting for an answer
    pub reply: Option<String>,
}
