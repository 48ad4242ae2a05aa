use crate::namespace::dead_letter_subject;
use crate::nats::{
    ConsumeRequest, ConsumeResponse, FetchedMessage, JetStreamConsumer, JetStreamPublisher,
    PullConsumer,
};
use anyhow::{Context, Result};
use async_nats::jetstream;
use async_nats::HeaderMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower::{Service, ServiceExt};
use tracing::{debug, error, info, warn};

pub const DEAD_LETTER_REASON: &str = "Dead-Letter-Reason";
pub const DEAD_LETTER_STREAM: &str = "Dead-Letter-Stream";
pub const DEAD_LETTER_SEQUENCE: &str = "Dead-Letter-Sequence";
pub const DEAD_LETTER_DELIVERIES: &str = "Dead-Letter-Deliveries";

const FETCH_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Settings for one durable consumer on one stream
#[derive(Debug, Clone)]
pub struct DurableConsumerConfig {
    pub stream_name: String,
    pub consumer_name: String,
    pub filter_subject: String,
    pub batch_size: usize,
    pub max_wait: Duration,
    /// Delay before a nak'ed message is redelivered
    pub nak_delay: Option<Duration>,
    /// Delivery attempt at which a rejected message is dead-lettered. Retryable
    /// failures are not capped.
    pub max_deliveries: i64,
}

impl DurableConsumerConfig {
    pub fn new(
        stream_name: impl Into<String>,
        consumer_name: impl Into<String>,
        filter_subject: impl Into<String>,
    ) -> Self {
        Self {
            stream_name: stream_name.into(),
            consumer_name: consumer_name.into(),
            filter_subject: filter_subject.into(),
            batch_size: 100,
            max_wait: Duration::from_secs(1),
            nak_delay: None,
            max_deliveries: 5,
        }
    }

    pub fn with_batch(mut self, batch_size: usize, max_wait: Duration) -> Self {
        self.batch_size = batch_size;
        self.max_wait = max_wait;
        self
    }

    pub fn with_redelivery(mut self, nak_delay: Option<Duration>, max_deliveries: i64) -> Self {
        self.nak_delay = nak_delay;
        self.max_deliveries = max_deliveries;
        self
    }
}

/// A durable pull consumer that feeds every message through a Tower service.
///
/// The consumer's position is kept by the broker under `consumer_name`, so a
/// restarted process resumes at the first unacknowledged message. Each message
/// is handled to completion and acknowledged before the next one is taken, which
/// keeps per-subject order within a consumer.
pub struct DurableConsumer<S> {
    consumer: Box<dyn PullConsumer>,
    config: DurableConsumerConfig,
    service: S,
    dead_letter: Option<Arc<dyn JetStreamPublisher>>,
}

impl<S> DurableConsumer<S>
where
    S: Service<ConsumeRequest, Response = ConsumeResponse, Error = anyhow::Error> + Send + 'static,
    S::Future: Send + 'static,
{
    /// Create the durable consumer on the broker, or bind to it if it already exists
    pub async fn new(
        jetstream: Arc<dyn JetStreamConsumer>,
        config: DurableConsumerConfig,
        service: S,
    ) -> Result<Self> {
        debug!(
            stream = %config.stream_name,
            consumer = %config.consumer_name,
            filter_subject = %config.filter_subject,
            "creating durable consumer"
        );

        let pull_config = jetstream::consumer::pull::Config {
            name: Some(config.consumer_name.clone()),
            durable_name: Some(config.consumer_name.clone()),
            filter_subject: config.filter_subject.clone(),
            ack_policy: jetstream::consumer::AckPolicy::Explicit,
            ..Default::default()
        };

        let consumer = jetstream
            .create_consumer(pull_config, &config.stream_name)
            .await
            .context("failed to create consumer")?;

        Ok(Self {
            consumer,
            config,
            service,
            dead_letter: None,
        })
    }

    /// Route rejected messages that reach `max_deliveries` to `dead_letter.<subject>`
    pub fn with_dead_letter(mut self, publisher: Arc<dyn JetStreamPublisher>) -> Self {
        self.dead_letter = Some(publisher);
        self
    }

    /// Run until cancelled. Cancellation is observed between messages: the message
    /// in hand is finished and the rest of its batch is handed back to the broker.
    /// A fetch in flight is allowed to complete (it is bounded by `max_wait`) so the
    /// messages it pulled are handed back too instead of waiting out the ack timeout.
    pub async fn run(mut self, ctx: CancellationToken) -> Result<()> {
        info!(
            stream = %self.config.stream_name,
            consumer = %self.config.consumer_name,
            "starting durable consumer"
        );

        while !ctx.is_cancelled() {
            let fetched = self
                .consumer
                .fetch_messages(self.config.batch_size, self.config.max_wait)
                .await;

            match fetched {
                Ok(messages) => self.process_batch(messages, &ctx).await,
                Err(e) => {
                    error!(
                        stream = %self.config.stream_name,
                        consumer = %self.config.consumer_name,
                        error = %e,
                        "failed to fetch batch"
                    );
                    tokio::select! {
                        _ = ctx.cancelled() => break,
                        _ = tokio::time::sleep(FETCH_RETRY_DELAY) => {}
                    }
                }
            }
        }

        info!(
            stream = %self.config.stream_name,
            consumer = %self.config.consumer_name,
            "durable consumer stopped"
        );
        Ok(())
    }

    async fn process_batch(&mut self, messages: Vec<FetchedMessage>, ctx: &CancellationToken) {
        if messages.is_empty() {
            debug!("no messages in batch");
            return;
        }

        debug!(message_count = messages.len(), "received message batch");

        let mut remaining = messages.into_iter();
        while let Some(msg) = remaining.next() {
            if ctx.is_cancelled() {
                self.release(msg).await;
                for msg in remaining.by_ref() {
                    self.release(msg).await;
                }
                break;
            }
            self.process_message(msg).await;
        }
    }

    async fn process_message(&mut self, msg: FetchedMessage) {
        let request = ConsumeRequest::new(msg.subject.clone(), msg.payload.clone(), msg.headers.clone())
            .with_delivery(msg.message_id(), msg.delivered);

        let response = match self.service.ready().await {
            Ok(service) => service.call(request).await,
            Err(e) => Err(e),
        };
        // An error escaping the service says nothing about the message, so it is retried
        let response = response.unwrap_or_else(|e| {
            error!(subject = %msg.subject, error = %e, "service error processing message");
            ConsumeResponse::nak(e.to_string())
        });

        match response {
            ConsumeResponse::Ack => {
                if let Err(e) = msg.ack().await {
                    error!(subject = %msg.subject, error = %e, "failed to acknowledge message");
                }
            }
            ConsumeResponse::Nak(_) => self.nak(&msg).await,
            ConsumeResponse::Reject(reason) => {
                if msg.delivered >= self.config.max_deliveries {
                    if let Some(publisher) = self.dead_letter.clone() {
                        self.send_to_dead_letter(publisher.as_ref(), &msg, &reason).await;
                        return;
                    }
                }
                self.nak(&msg).await;
            }
        }
    }

    async fn send_to_dead_letter(
        &self,
        publisher: &dyn JetStreamPublisher,
        msg: &FetchedMessage,
        reason: &str,
    ) {
        let mut headers = HeaderMap::new();
        headers.insert(DEAD_LETTER_REASON, reason);
        headers.insert(DEAD_LETTER_STREAM, msg.stream.as_str());
        headers.insert(DEAD_LETTER_SEQUENCE, msg.stream_sequence.to_string().as_str());
        headers.insert(DEAD_LETTER_DELIVERIES, msg.delivered.to_string().as_str());

        let subject = dead_letter_subject(&msg.subject);
        match publisher
            .publish_with_headers(subject.clone(), headers, msg.payload.clone())
            .await
        {
            Ok(()) => {
                warn!(
                    subject = %msg.subject,
                    dead_letter_subject = %subject,
                    delivered = msg.delivered,
                    reason = %reason,
                    "message exhausted its deliveries, moved to dead letter"
                );
                if let Err(e) = msg.term().await {
                    error!(subject = %msg.subject, error = %e, "failed to terminate message");
                }
            }
            Err(e) => {
                error!(
                    subject = %msg.subject,
                    error = %e,
                    "failed to dead-letter message, leaving it for redelivery"
                );
                self.nak(msg).await;
            }
        }
    }

    async fn nak(&self, msg: &FetchedMessage) {
        if let Err(e) = msg.nak(self.config.nak_delay).await {
            error!(subject = %msg.subject, error = %e, "failed to reject message");
        }
    }

    async fn release(&self, msg: FetchedMessage) {
        debug!(subject = %msg.subject, "shutting down, returning unprocessed message");
        if let Err(e) = msg.nak(None).await {
            error!(subject = %msg.subject, error = %e, "failed to return message");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nats::{MockJetStreamConsumer, MockJetStreamPublisher, MockMessageAcker, MockPullConsumer};
    use bytes::Bytes;
    use futures::future::BoxFuture;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::task::{Context as TaskContext, Poll};

    /// Replies with a fixed response and records the requests it saw
    #[derive(Clone)]
    struct ScriptedService {
        response: ConsumeResponse,
        seen: Arc<Mutex<Vec<ConsumeRequest>>>,
        cancel_after_first: Option<CancellationToken>,
    }

    impl ScriptedService {
        fn new(response: ConsumeResponse) -> Self {
            Self {
                response,
                seen: Arc::new(Mutex::new(Vec::new())),
                cancel_after_first: None,
            }
        }
    }

    impl Service<ConsumeRequest> for ScriptedService {
        type Response = ConsumeResponse;
        type Error = anyhow::Error;
        type Future = BoxFuture<'static, Result<ConsumeResponse, anyhow::Error>>;

        fn poll_ready(&mut self, _cx: &mut TaskContext<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, req: ConsumeRequest) -> Self::Future {
            self.seen.lock().unwrap().push(req);
            if let Some(token) = &self.cancel_after_first {
                token.cancel();
            }
            let response = self.response.clone();
            Box::pin(async move { Ok(response) })
        }
    }

    fn message(seq: u64, delivered: i64, acker: MockMessageAcker) -> FetchedMessage {
        FetchedMessage::new(
            "data.orgA.d1.temp1".to_string(),
            Bytes::from_static(b"{}"),
            None,
            "ORG_orgA_STREAM".to_string(),
            seq,
            delivered,
            Box::new(acker),
        )
    }

    fn config() -> DurableConsumerConfig {
        DurableConsumerConfig::new("ORG_orgA_STREAM", "BREACH_DETECTOR", "data.orgA.>")
            .with_batch(10, Duration::from_millis(10))
            .with_redelivery(Some(Duration::from_secs(2)), 3)
    }

    async fn consumer_with(pull: MockPullConsumer, service: ScriptedService) -> DurableConsumer<ScriptedService> {
        let mut jetstream = MockJetStreamConsumer::new();
        let mut pull = Some(pull);
        jetstream
            .expect_create_consumer()
            .times(1)
            .returning(move |_, _| Ok(Box::new(pull.take().unwrap())));
        DurableConsumer::new(Arc::new(jetstream), config(), service)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_creates_durable_explicit_ack_consumer() {
        let mut jetstream = MockJetStreamConsumer::new();
        jetstream
            .expect_create_consumer()
            .withf(|config, stream| {
                config.durable_name.as_deref() == Some("BREACH_DETECTOR")
                    && config.filter_subject == "data.orgA.>"
                    && stream == "ORG_orgA_STREAM"
            })
            .times(1)
            .returning(|_, _| Ok(Box::new(MockPullConsumer::new())));

        let result = DurableConsumer::new(
            Arc::new(jetstream),
            config(),
            ScriptedService::new(ConsumeResponse::Ack),
        )
        .await;

        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_creation_failure_is_reported() {
        let mut jetstream = MockJetStreamConsumer::new();
        jetstream
            .expect_create_consumer()
            .times(1)
            .returning(|_, _| Err(anyhow::anyhow!("stream not found")));

        let result = DurableConsumer::new(
            Arc::new(jetstream),
            config(),
            ScriptedService::new(ConsumeResponse::Ack),
        )
        .await;

        let err = result.err().unwrap();
        assert!(err.to_string().contains("failed to create consumer"));
    }

    #[tokio::test]
    async fn test_ack_response_acks_message_with_delivery_metadata() {
        let mut acker = MockMessageAcker::new();
        acker.expect_ack().times(1).returning(|| Ok(()));
        acker.expect_nak().never();

        let service = ScriptedService::new(ConsumeResponse::Ack);
        let seen = service.seen.clone();
        let mut consumer = consumer_with(MockPullConsumer::new(), service).await;

        consumer
            .process_batch(vec![message(7, 2, acker)], &CancellationToken::new())
            .await;

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].message_id.as_deref(), Some("ORG_orgA_STREAM:7"));
        assert_eq!(seen[0].delivered, 2);
        assert!(seen[0].is_redelivery());
    }

    #[tokio::test]
    async fn test_nak_response_requests_delayed_redelivery() {
        let mut acker = MockMessageAcker::new();
        acker
            .expect_nak()
            .withf(|delay| *delay == Some(Duration::from_secs(2)))
            .times(1)
            .returning(|_| Ok(()));
        acker.expect_ack().never();

        let mut consumer = consumer_with(
            MockPullConsumer::new(),
            ScriptedService::new(ConsumeResponse::nak("counter store down")),
        )
        .await;

        consumer
            .process_batch(vec![message(1, 1, acker)], &CancellationToken::new())
            .await;
    }

    #[tokio::test]
    async fn test_exhausted_message_is_dead_lettered_and_terminated() {
        let mut acker = MockMessageAcker::new();
        acker.expect_term().times(1).returning(|| Ok(()));
        acker.expect_nak().never();

        let mut publisher = MockJetStreamPublisher::new();
        publisher
            .expect_publish_with_headers()
            .withf(|subject, headers, _| {
                subject == "dead_letter.data.orgA.d1.temp1"
                    && headers.get(DEAD_LETTER_REASON).map(|v| v.as_str()) == Some("bad payload")
                    && headers.get(DEAD_LETTER_SEQUENCE).map(|v| v.as_str()) == Some("9")
                    && headers.get(DEAD_LETTER_DELIVERIES).map(|v| v.as_str()) == Some("3")
            })
            .times(1)
            .returning(|_, _, _| Ok(()));

        let mut consumer = consumer_with(
            MockPullConsumer::new(),
            ScriptedService::new(ConsumeResponse::reject("bad payload")),
        )
        .await
        .with_dead_letter(Arc::new(publisher));

        consumer
            .process_batch(vec![message(9, 3, acker)], &CancellationToken::new())
            .await;
    }

    #[tokio::test]
    async fn test_retryable_failure_past_delivery_cap_is_naked_not_terminated() {
        let mut acker = MockMessageAcker::new();
        acker
            .expect_nak()
            .withf(|delay| *delay == Some(Duration::from_secs(2)))
            .times(1)
            .returning(|_| Ok(()));
        acker.expect_term().never();
        acker.expect_ack().never();

        let mut publisher = MockJetStreamPublisher::new();
        publisher.expect_publish_with_headers().never();

        let mut consumer = consumer_with(
            MockPullConsumer::new(),
            ScriptedService::new(ConsumeResponse::nak("Counter store unavailable: redis restarting")),
        )
        .await
        .with_dead_letter(Arc::new(publisher));

        // config() caps rejected messages at 3 deliveries
        consumer
            .process_batch(vec![message(9, 3, acker)], &CancellationToken::new())
            .await;
    }

    #[tokio::test]
    async fn test_rejected_message_below_cap_is_naked() {
        let mut acker = MockMessageAcker::new();
        acker.expect_nak().times(1).returning(|_| Ok(()));
        acker.expect_term().never();

        let mut publisher = MockJetStreamPublisher::new();
        publisher.expect_publish_with_headers().never();

        let mut consumer = consumer_with(
            MockPullConsumer::new(),
            ScriptedService::new(ConsumeResponse::reject("bad payload")),
        )
        .await
        .with_dead_letter(Arc::new(publisher));

        consumer
            .process_batch(vec![message(9, 2, acker)], &CancellationToken::new())
            .await;
    }

    #[tokio::test]
    async fn test_failed_dead_letter_publish_falls_back_to_nak() {
        let mut acker = MockMessageAcker::new();
        acker.expect_term().never();
        acker.expect_nak().times(1).returning(|_| Ok(()));

        let mut publisher = MockJetStreamPublisher::new();
        publisher
            .expect_publish_with_headers()
            .times(1)
            .returning(|_, _, _| Err(anyhow::anyhow!("no responders")));

        let mut consumer = consumer_with(
            MockPullConsumer::new(),
            ScriptedService::new(ConsumeResponse::reject("bad payload")),
        )
        .await
        .with_dead_letter(Arc::new(publisher));

        consumer
            .process_batch(vec![message(9, 5, acker)], &CancellationToken::new())
            .await;
    }

    #[tokio::test]
    async fn test_exhausted_message_without_dead_letter_is_naked() {
        let mut acker = MockMessageAcker::new();
        acker.expect_nak().times(1).returning(|_| Ok(()));
        acker.expect_term().never();

        let mut consumer = consumer_with(
            MockPullConsumer::new(),
            ScriptedService::new(ConsumeResponse::reject("bad payload")),
        )
        .await;

        consumer
            .process_batch(vec![message(9, 4, acker)], &CancellationToken::new())
            .await;
    }

    #[tokio::test]
    async fn test_cancellation_returns_rest_of_batch() {
        let ctx = CancellationToken::new();

        let mut first = MockMessageAcker::new();
        first.expect_ack().times(1).returning(|| Ok(()));

        let mut rest = Vec::new();
        for seq in 2..=3 {
            let mut acker = MockMessageAcker::new();
            acker
                .expect_nak()
                .withf(|delay| delay.is_none())
                .times(1)
                .returning(|_| Ok(()));
            acker.expect_ack().never();
            rest.push(message(seq, 1, acker));
        }

        let mut service = ScriptedService::new(ConsumeResponse::Ack);
        service.cancel_after_first = Some(ctx.clone());
        let seen = service.seen.clone();
        let mut consumer = consumer_with(MockPullConsumer::new(), service).await;

        let mut batch = vec![message(1, 1, first)];
        batch.extend(rest);
        consumer.process_batch(batch, &ctx).await;

        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_run_stops_on_cancellation() {
        let fetches = Arc::new(AtomicUsize::new(0));
        let counter = fetches.clone();

        let mut pull = MockPullConsumer::new();
        pull.expect_fetch_messages().returning(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(vec![])
        });

        let consumer = consumer_with(pull, ScriptedService::new(ConsumeResponse::Ack)).await;
        let ctx = CancellationToken::new();
        let handle = tokio::spawn(consumer.run(ctx.clone()));

        tokio::time::sleep(Duration::from_millis(20)).await;
        ctx.cancel();

        let result = tokio::time::timeout(Duration::from_secs(1), handle).await;
        assert!(result.unwrap().unwrap().is_ok());
        assert!(fetches.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn test_cancellation_during_fetch_returns_fetched_messages() {
        let ctx = CancellationToken::new();
        let token = ctx.clone();

        let mut pull = MockPullConsumer::new();
        pull.expect_fetch_messages().times(1).returning(move |_, _| {
            // shutdown arrives while the pull request is outstanding
            token.cancel();
            let mut batch = Vec::new();
            for seq in 1..=2 {
                let mut acker = MockMessageAcker::new();
                acker
                    .expect_nak()
                    .withf(|delay| delay.is_none())
                    .times(1)
                    .returning(|_| Ok(()));
                acker.expect_ack().never();
                batch.push(message(seq, 1, acker));
            }
            Ok(batch)
        });

        let service = ScriptedService::new(ConsumeResponse::Ack);
        let seen = service.seen.clone();
        let consumer = consumer_with(pull, service).await;

        let result = tokio::time::timeout(Duration::from_secs(1), consumer.run(ctx)).await;
        assert!(result.unwrap().is_ok());
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fetch_error_keeps_consumer_running() {
        let fetches = Arc::new(AtomicUsize::new(0));
        let counter = fetches.clone();

        let mut pull = MockPullConsumer::new();
        pull.expect_fetch_messages().returning(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(anyhow::anyhow!("connection reset"))
        });

        let consumer = consumer_with(pull, ScriptedService::new(ConsumeResponse::Ack)).await;
        let ctx = CancellationToken::new();
        let handle = tokio::spawn(consumer.run(ctx.clone()));

        tokio::time::sleep(Duration::from_millis(20)).await;
        ctx.cancel();

        let result = tokio::time::timeout(Duration::from_secs(1), handle).await;
        assert!(result.unwrap().unwrap().is_ok());
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
    }
}
