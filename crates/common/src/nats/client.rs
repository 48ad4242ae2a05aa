use crate::nats::traits::{
    CorePublisher, JetStreamConsumer, JetStreamPublisher, MessageAcker, PullConsumer,
    QueueSubscriber, StreamCreateOutcome, StreamManager, StreamSpec,
};
use crate::nats::{CoreMessage, FetchedMessage};
use anyhow::{anyhow, Context, Result};
use async_nats::jetstream::{
    self,
    context::{CreateStreamErrorKind, GetStreamErrorKind},
    stream::{Config as StreamConfig, StorageType},
    AckKind, ErrorCode,
};
use async_nats::HeaderMap;
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Connection to the broker shared by every component.
/// Created once at startup and handed to components as trait objects.
pub struct NatsClient {
    client: async_nats::Client,
    jetstream: jetstream::Context,
}

impl NatsClient {
    pub async fn connect(url: &str, timeout: Duration) -> Result<Self> {
        info!(url = %url, timeout_ms = timeout.as_millis(), "connecting to NATS");

        let client = async_nats::ConnectOptions::new()
            .name("vigil")
            .connection_timeout(timeout)
            .connect(url)
            .await
            .context("Failed to connect to NATS")?;

        let jetstream = jetstream::new(client.clone());

        info!("successfully connected to NATS");
        Ok(Self { client, jetstream })
    }

    /// Make sure a pipeline-owned stream (alerts, dead letters) exists
    pub async fn ensure_stream(&self, spec: StreamSpec) -> Result<()> {
        let manager = self.stream_manager();
        let name = spec.name.clone();

        if manager.stream_exists(&name).await? {
            info!(stream = %name, "stream already exists");
            return Ok(());
        }

        match manager.create_stream(spec).await? {
            StreamCreateOutcome::Created => info!(stream = %name, "created stream"),
            StreamCreateOutcome::AlreadyExists => info!(stream = %name, "stream already exists"),
        }
        Ok(())
    }

    pub fn create_consumer_client(&self) -> Arc<dyn JetStreamConsumer> {
        Arc::new(NatsJetStreamConsumer::new(self.jetstream.clone()))
    }

    pub fn create_publisher_client(&self) -> Arc<dyn JetStreamPublisher> {
        Arc::new(NatsJetStreamPublisher::new(self.jetstream.clone()))
    }

    pub fn stream_manager(&self) -> Arc<dyn StreamManager> {
        Arc::new(NatsStreamManager::new(self.jetstream.clone()))
    }

    pub fn queue_subscriber(&self) -> Arc<dyn QueueSubscriber> {
        Arc::new(NatsQueueSubscriber::new(self.client.clone()))
    }

    pub fn core_publisher(&self) -> Arc<dyn CorePublisher> {
        Arc::new(NatsCorePublisher::new(self.client.clone()))
    }

    /// Flush pending publishes and close the connection
    pub async fn close(&self) {
        info!("closing NATS connection");
        if let Err(e) = self.client.flush().await {
            warn!(error = %e, "failed to flush NATS connection on close");
        }
    }
}

/// Concrete implementation of JetStreamConsumer using async-nats
pub struct NatsJetStreamConsumer {
    context: jetstream::Context,
}

impl NatsJetStreamConsumer {
    pub fn new(context: jetstream::Context) -> Self {
        Self { context }
    }
}

#[async_trait]
impl JetStreamConsumer for NatsJetStreamConsumer {
    async fn create_consumer(
        &self,
        config: jetstream::consumer::pull::Config,
        stream_name: &str,
    ) -> Result<Box<dyn PullConsumer>> {
        let consumer = self
            .context
            .create_consumer_on_stream(config, stream_name)
            .await
            .context("Failed to create consumer")?;

        Ok(Box::new(NatsPullConsumer { consumer }))
    }
}

/// Concrete implementation of PullConsumer using async-nats
pub struct NatsPullConsumer {
    consumer: jetstream::consumer::PullConsumer,
}

#[async_trait]
impl PullConsumer for NatsPullConsumer {
    async fn fetch_messages(
        &self,
        max_messages: usize,
        expires: Duration,
    ) -> Result<Vec<FetchedMessage>> {
        let mut messages = self
            .consumer
            .fetch()
            .max_messages(max_messages)
            .expires(expires)
            .messages()
            .await
            .context("Failed to fetch messages")?;

        let mut result = Vec::new();
        while let Some(msg) = messages.next().await {
            let message = match msg {
                Ok(message) => message,
                Err(e) => {
                    warn!(error = %e, "error receiving message from batch");
                    continue;
                }
            };

            let (stream, stream_sequence, delivered) = match message.info() {
                Ok(info) => (info.stream.to_string(), info.stream_sequence, info.delivered),
                Err(e) => {
                    warn!(
                        subject = %message.subject,
                        error = %e,
                        "message has no JetStream metadata, skipping"
                    );
                    continue;
                }
            };

            result.push(FetchedMessage::new(
                message.subject.to_string(),
                message.payload.clone(),
                message.headers.clone(),
                stream,
                stream_sequence,
                delivered,
                Box::new(NatsMessageAcker { message }),
            ));
        }
        Ok(result)
    }
}

/// Acks through the reply subject of the original JetStream message
struct NatsMessageAcker {
    message: jetstream::Message,
}

#[async_trait]
impl MessageAcker for NatsMessageAcker {
    async fn ack(&self) -> Result<()> {
        self.message
            .ack()
            .await
            .map_err(|e| anyhow!("failed to acknowledge message: {}", e))
    }

    async fn nak(&self, delay: Option<Duration>) -> Result<()> {
        self.message
            .ack_with(AckKind::Nak(delay))
            .await
            .map_err(|e| anyhow!("failed to reject message: {}", e))
    }

    async fn term(&self) -> Result<()> {
        self.message
            .ack_with(AckKind::Term)
            .await
            .map_err(|e| anyhow!("failed to terminate message: {}", e))
    }
}

/// Concrete implementation of JetStreamPublisher using async-nats
pub struct NatsJetStreamPublisher {
    context: jetstream::Context,
}

impl NatsJetStreamPublisher {
    pub fn new(context: jetstream::Context) -> Self {
        Self { context }
    }
}

#[async_trait]
impl JetStreamPublisher for NatsJetStreamPublisher {
    async fn publish(&self, subject: String, payload: bytes::Bytes) -> Result<()> {
        self.publish_with_headers(subject, HeaderMap::new(), payload)
            .await
    }

    #[instrument(skip(self, headers, payload), fields(subject = %subject, payload_size = payload.len()))]
    async fn publish_with_headers(
        &self,
        subject: String,
        headers: HeaderMap,
        payload: bytes::Bytes,
    ) -> Result<()> {
        let ack = self
            .context
            .publish_with_headers(subject, headers, payload)
            .await
            .context("Failed to publish message to JetStream")?;

        ack.await
            .context("Failed to receive JetStream acknowledgment")?;
        Ok(())
    }
}

/// Concrete implementation of StreamManager using async-nats
pub struct NatsStreamManager {
    context: jetstream::Context,
}

impl NatsStreamManager {
    pub fn new(context: jetstream::Context) -> Self {
        Self { context }
    }
}

#[async_trait]
impl StreamManager for NatsStreamManager {
    async fn stream_exists(&self, stream_name: &str) -> Result<bool> {
        match self.context.get_stream(stream_name).await {
            Ok(_) => Ok(true),
            Err(e) => match e.kind() {
                GetStreamErrorKind::JetStream(err)
                    if err.error_code() == ErrorCode::STREAM_NOT_FOUND =>
                {
                    Ok(false)
                }
                _ => Err(anyhow::Error::new(e).context("Failed to look up stream")),
            },
        }
    }

    async fn create_stream(&self, spec: StreamSpec) -> Result<StreamCreateOutcome> {
        debug!(stream = %spec.name, subjects = ?spec.subjects, "creating stream");

        let config = StreamConfig {
            name: spec.name,
            subjects: spec.subjects,
            description: spec.description,
            storage: StorageType::File,
            ..Default::default()
        };

        match self.context.create_stream(config).await {
            Ok(_) => Ok(StreamCreateOutcome::Created),
            Err(e) => match e.kind() {
                CreateStreamErrorKind::JetStream(err)
                    if err.error_code() == ErrorCode::STREAM_NAME_EXIST =>
                {
                    Ok(StreamCreateOutcome::AlreadyExists)
                }
                _ => Err(anyhow::Error::new(e).context("Failed to create stream")),
            },
        }
    }
}

/// Concrete implementation of QueueSubscriber using a core NATS client
pub struct NatsQueueSubscriber {
    client: async_nats::Client,
}

impl NatsQueueSubscriber {
    pub fn new(client: async_nats::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl QueueSubscriber for NatsQueueSubscriber {
    async fn queue_subscribe(
        &self,
        subject: String,
        queue_group: String,
    ) -> Result<BoxStream<'static, CoreMessage>> {
        let subscriber = self
            .client
            .queue_subscribe(subject, queue_group)
            .await
            .context("Failed to subscribe to queue group")?;

        Ok(subscriber
            .map(|message| CoreMessage {
                subject: message.subject.to_string(),
                payload: message.payload,
                reply: message.reply.map(|reply| reply.to_string()),
            })
            .boxed())
    }
}

/// Concrete implementation of CorePublisher using a core NATS client
pub struct NatsCorePublisher {
    client: async_nats::Client,
}

impl NatsCorePublisher {
    pub fn new(client: async_nats::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl CorePublisher for NatsCorePublisher {
    async fn publish(&self, subject: String, payload: bytes::Bytes) -> Result<()> {
        self.client
            .publish(subject, payload)
            .await
            .context("Failed to publish message")
    }
}
