use crate::domain::BreachDetectorService;
use common::domain::TelemetryEvent;
use common::namespace::parse_telemetry_subject;
use common::nats::{ConsumeRequest, ConsumeResponse};
use futures::future::BoxFuture;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::Service;
use tracing::{debug, error, warn};

/// Tower service feeding telemetry messages into the breach detector.
///
/// Undecodable payloads and payloads that disagree with their subject are rejected, so
/// the redelivery cap eventually moves them to the dead-letter subject. Counter store and
/// broker outages are nak'ed and retried for as long as they last.
#[derive(Clone)]
pub struct TelemetryConsumerService {
    detector: Arc<BreachDetectorService>,
}

impl TelemetryConsumerService {
    pub fn new(detector: Arc<BreachDetectorService>) -> Self {
        Self { detector }
    }
}

impl Service<ConsumeRequest> for TelemetryConsumerService {
    type Response = ConsumeResponse;
    type Error = anyhow::Error;
    type Future = BoxFuture<'static, Result<ConsumeResponse, anyhow::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: ConsumeRequest) -> Self::Future {
        let detector = Arc::clone(&self.detector);

        Box::pin(async move {
            let event = match TelemetryEvent::decode(&req.payload) {
                Ok(event) => event,
                Err(e) => {
                    error!(error = %e, subject = %req.subject, "failed to decode telemetry event");
                    return Ok(ConsumeResponse::reject(format!("decode error: {}", e)));
                }
            };

            if let Err(e) = event.validate() {
                warn!(error = %e, subject = %req.subject, "invalid telemetry event");
                return Ok(ConsumeResponse::reject(e.to_string()));
            }

            let consistent = parse_telemetry_subject(&req.subject).is_some_and(|s| {
                s.organization_id == event.organization_id
                    && s.device_id == event.device_id
                    && s.sensor_name == event.sensor_name
            });
            if !consistent {
                warn!(
                    subject = %req.subject,
                    organization_id = %event.organization_id,
                    device_id = %event.device_id,
                    "telemetry payload does not match its subject"
                );
                return Ok(ConsumeResponse::reject("payload does not match subject"));
            }

            match detector
                .handle_reading(&event, req.message_id.as_deref())
                .await
            {
                Ok(outcome) => {
                    debug!(subject = %req.subject, outcome = ?outcome, "reading applied");
                    Ok(ConsumeResponse::ack())
                }
                Err(e) if e.is_transient() => {
                    warn!(error = %e, subject = %req.subject, "failed to apply reading, will retry");
                    Ok(ConsumeResponse::nak(e.to_string()))
                }
                Err(e) => {
                    error!(error = %e, subject = %req.subject, "reading rejected");
                    Ok(ConsumeResponse::reject(e.to_string()))
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{BreachDetectorSettings, BreachRule, BreachRuleTable};
    use bytes::Bytes;
    use common::domain::{
        BreachCounterStore, DomainError, InMemoryBreachCounterStore, MockAlertProducer,
        MockBreachCounterStore,
    };
    use common::nats::{
        DurableConsumer, DurableConsumerConfig, FetchedMessage, MockJetStreamConsumer,
        MockJetStreamPublisher, MockMessageAcker, MockPullConsumer,
    };
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;

    fn service_with(
        counters: Arc<dyn BreachCounterStore>,
        alerts: MockAlertProducer,
    ) -> TelemetryConsumerService {
        let rules = BreachRuleTable::new(vec![BreachRule {
            sensor_name: "temp1".to_string(),
            threshold: 80.0,
            consecutive_count: 3,
            condition: "Consecutive Temp Threshold Breach".to_string(),
        }])
        .unwrap();

        TelemetryConsumerService::new(Arc::new(BreachDetectorService::new(
            counters,
            Arc::new(alerts),
            Arc::new(rules),
            BreachDetectorSettings {
                idle_expiry: Duration::from_secs(300),
                dedup_ttl: Some(Duration::from_secs(600)),
            },
        )))
    }

    fn request(subject: &str, payload: &str, seq: u64) -> ConsumeRequest {
        ConsumeRequest::new(subject.to_string(), Bytes::from(payload.to_string()), None)
            .with_delivery(format!("ORG_acme_STREAM:{}", seq), 1)
    }

    const READING: &str = r#"{"organization_id":"acme","device_id":"machine-123","sensor_name":"temp1","value":95.0,"timestamp":1700000000}"#;

    #[tokio::test]
    async fn test_applied_reading_is_acked() {
        let service = service_with(
            Arc::new(InMemoryBreachCounterStore::new()),
            MockAlertProducer::new(),
        );

        let response = service
            .oneshot(request("data.acme.machine-123.temp1", READING, 1))
            .await
            .unwrap();

        assert_eq!(response, ConsumeResponse::Ack);
    }

    #[tokio::test]
    async fn test_malformed_payload_is_rejected() {
        let mut counters = MockBreachCounterStore::new();
        counters.expect_increment().never();
        let service = service_with(Arc::new(counters), MockAlertProducer::new());

        let response = service
            .oneshot(request("data.acme.machine-123.temp1", "{\"value\":", 1))
            .await
            .unwrap();

        assert!(response.is_reject());
        assert!(response.reason().unwrap().contains("decode error"));
    }

    #[tokio::test]
    async fn test_payload_for_other_tenant_is_rejected() {
        let mut counters = MockBreachCounterStore::new();
        counters.expect_increment().never();
        let service = service_with(Arc::new(counters), MockAlertProducer::new());

        let response = service
            .oneshot(request("data.globex.machine-123.temp1", READING, 1))
            .await
            .unwrap();

        assert_eq!(response, ConsumeResponse::reject("payload does not match subject"));
    }

    #[tokio::test]
    async fn test_store_outage_is_naked() {
        let mut counters = MockBreachCounterStore::new();
        counters.expect_is_processed().returning(|_| Ok(false));
        counters
            .expect_increment()
            .times(1)
            .returning(|_, _| Err(DomainError::CounterStoreUnavailable("refused".to_string())));
        let service = service_with(Arc::new(counters), MockAlertProducer::new());

        let response = service
            .oneshot(request("data.acme.machine-123.temp1", READING, 1))
            .await
            .unwrap();

        assert!(response.is_nak());
        assert!(response.is_retryable());
    }

    #[tokio::test]
    async fn test_store_outage_on_final_delivery_is_redelivered() {
        let mut counters = MockBreachCounterStore::new();
        counters.expect_is_processed().returning(|_| Ok(false));
        counters.expect_increment().times(1).returning(|_, _| {
            Err(DomainError::CounterStoreUnavailable("redis restarting".to_string()))
        });
        let service = service_with(Arc::new(counters), MockAlertProducer::new());

        let ctx = CancellationToken::new();
        let token = ctx.clone();
        let mut pull = MockPullConsumer::new();
        pull.expect_fetch_messages().times(1).returning(move |_, _| {
            let token = token.clone();
            let mut acker = MockMessageAcker::new();
            acker
                .expect_nak()
                .withf(|delay| *delay == Some(Duration::from_secs(2)))
                .times(1)
                .returning(move |_| {
                    token.cancel();
                    Ok(())
                });
            acker.expect_term().never();
            acker.expect_ack().never();
            Ok(vec![FetchedMessage::new(
                "data.acme.machine-123.temp1".to_string(),
                Bytes::from_static(READING.as_bytes()),
                None,
                "ORG_acme_STREAM".to_string(),
                41,
                5,
                Box::new(acker),
            )])
        });

        let mut jetstream = MockJetStreamConsumer::new();
        let mut pull = Some(pull);
        jetstream
            .expect_create_consumer()
            .times(1)
            .returning(move |_, _| Ok(Box::new(pull.take().unwrap())));

        let mut dead_letter = MockJetStreamPublisher::new();
        dead_letter.expect_publish_with_headers().never();

        let consumer = DurableConsumer::new(
            Arc::new(jetstream),
            DurableConsumerConfig::new("ORG_acme_STREAM", "BREACH_DETECTOR", "data.acme.>")
                .with_batch(10, Duration::from_millis(10))
                .with_redelivery(Some(Duration::from_secs(2)), 5),
            service,
        )
        .await
        .unwrap()
        .with_dead_letter(Arc::new(dead_letter));

        let result = tokio::time::timeout(Duration::from_secs(1), consumer.run(ctx)).await;
        assert!(result.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_invalid_reading_is_rejected() {
        let mut counters = MockBreachCounterStore::new();
        counters.expect_increment().never();
        let service = service_with(Arc::new(counters), MockAlertProducer::new());
        let unstamped = r#"{"organization_id":"acme","device_id":"machine-123","sensor_name":"temp1","value":95.0,"timestamp":0}"#;

        let response = service
            .oneshot(request("data.acme.machine-123.temp1", unstamped, 1))
            .await
            .unwrap();

        assert!(response.is_reject());
    }

    #[tokio::test]
    async fn test_third_breach_publishes_alert_and_acks() {
        let counters = Arc::new(InMemoryBreachCounterStore::new());
        let mut alerts = MockAlertProducer::new();
        alerts.expect_publish_alert().times(1).returning(|_| Ok(()));
        let mut service = service_with(counters, alerts);

        for seq in 1..=3 {
            let response = service
                .ready()
                .await
                .unwrap()
                .call(request("data.acme.machine-123.temp1", READING, seq))
                .await
                .unwrap();
            assert_eq!(response, ConsumeResponse::Ack);
        }
    }
}
