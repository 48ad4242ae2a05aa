use async_nats::HeaderMap;
use bytes::Bytes;

/// Request type for consuming a single stream message through Tower.
///
/// Owns all the message data so it can pass through middleware layers
/// without borrowing from the fetched batch.
#[derive(Debug, Clone)]
pub struct ConsumeRequest {
    /// The subject the message was published to
    pub subject: String,
    pub payload: Bytes,
    pub headers: Option<HeaderMap>,
    /// `<stream>:<stream_sequence>`, identical on every redelivery
    pub message_id: Option<String>,
    /// Delivery attempt, starting at 1
    pub delivered: i64,
}

impl ConsumeRequest {
    pub fn new(subject: String, payload: Bytes, headers: Option<HeaderMap>) -> Self {
        Self {
            subject,
            payload,
            headers,
            message_id: None,
            delivered: 1,
        }
    }

    pub fn with_delivery(mut self, message_id: String, delivered: i64) -> Self {
        self.message_id = Some(message_id);
        self.delivered = delivered;
        self
    }

    pub fn is_redelivery(&self) -> bool {
        self.delivered > 1
    }
}

/// Outcome of processing one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsumeResponse {
    /// Side effects applied; remove the message from the redelivery set
    Ack,
    /// Transient failure; redeliver after the configured delay, however often it takes
    Nak(Option<String>),
    /// The message itself is unusable. Redelivered up to the delivery cap, then
    /// dead-lettered.
    Reject(String),
}

impl ConsumeResponse {
    pub fn ack() -> Self {
        Self::Ack
    }

    pub fn nak(reason: impl Into<String>) -> Self {
        Self::Nak(Some(reason.into()))
    }

    pub fn reject(reason: impl Into<String>) -> Self {
        Self::Reject(reason.into())
    }

    pub fn is_ack(&self) -> bool {
        matches!(self, Self::Ack)
    }

    pub fn is_nak(&self) -> bool {
        matches!(self, Self::Nak(_))
    }

    pub fn is_reject(&self) -> bool {
        matches!(self, Self::Reject(_))
    }

    /// Whether another delivery can succeed without the message changing
    pub fn is_retryable(&self) -> bool {
        !self.is_reject()
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Nak(Some(reason)) | Self::Reject(reason) => Some(reason),
            _ => None,
        }
    }
}
