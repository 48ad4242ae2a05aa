use crate::nats::{CoreMessage, FetchedMessage};
use anyhow::Result;
use async_nats::jetstream;
use async_nats::HeaderMap;
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::time::Duration;

/// Trait for JetStream consumer operations
/// Abstracts the operations needed to create and use a NATS JetStream consumer
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait JetStreamConsumer: Send + Sync {
    /// Create (or bind to an existing) durable pull consumer on a stream
    async fn create_consumer(
        &self,
        config: jetstream::consumer::pull::Config,
        stream_name: &str,
    ) -> Result<Box<dyn PullConsumer>>;
}

/// Trait for pull consumer operations
/// Abstracts the fetch operation on a pull consumer
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait PullConsumer: Send + Sync {
    /// Fetch up to max_messages undelivered messages, waiting up to expires.
    /// An expired fetch with nothing to deliver yields an empty batch, not an error.
    async fn fetch_messages(
        &self,
        max_messages: usize,
        expires: Duration,
    ) -> Result<Vec<FetchedMessage>>;
}

/// Acknowledgment operations for a single delivered message
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait MessageAcker: Send + Sync {
    async fn ack(&self) -> Result<()>;

    /// Request redelivery, optionally after a delay
    async fn nak(&self, delay: Option<Duration>) -> Result<()>;

    /// Stop redelivering the message
    async fn term(&self) -> Result<()>;
}

/// Trait for JetStream publisher operations
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait JetStreamPublisher: Send + Sync {
    /// Publish a message to a subject and await the stream acknowledgment
    async fn publish(&self, subject: String, payload: bytes::Bytes) -> Result<()>;

    /// Publish a message with headers and await the stream acknowledgment
    async fn publish_with_headers(
        &self,
        subject: String,
        headers: HeaderMap,
        payload: bytes::Bytes,
    ) -> Result<()>;
}

/// Desired shape of a durable, file-backed stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSpec {
    pub name: String,
    pub subjects: Vec<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamCreateOutcome {
    Created,
    AlreadyExists,
}

/// Stream administration
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait StreamManager: Send + Sync {
    async fn stream_exists(&self, stream_name: &str) -> Result<bool>;

    /// Create the stream; a name collision is reported as AlreadyExists rather than an error
    async fn create_stream(&self, spec: StreamSpec) -> Result<StreamCreateOutcome>;
}

/// Core NATS queue-group subscriptions
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait QueueSubscriber: Send + Sync {
    /// Join `queue_group` on `subject`; each message goes to one member of the group
    async fn queue_subscribe(
        &self,
        subject: String,
        queue_group: String,
    ) -> Result<BoxStream<'static, CoreMessage>>;
}

/// Core NATS publishing, without stream persistence. Used to answer requests.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait CorePublisher: Send + Sync {
    async fn publish(&self, subject: String, payload: bytes::Bytes) -> Result<()>;
}
