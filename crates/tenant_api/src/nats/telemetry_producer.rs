use common::domain::{DomainError, DomainResult, TelemetryEvent, TelemetryProducer};
use common::nats::{build_publisher, JetStreamPublisher, LayeredPublisher, PublishRequest};
use std::sync::Arc;
use tower::ServiceExt;
use tracing::debug;

/// Publishes telemetry as JSON on `data.<org>.<device>.<sensor>` and waits for the
/// stream acknowledgment
pub struct NatsTelemetryProducer {
    publisher: LayeredPublisher,
}

impl NatsTelemetryProducer {
    pub fn new(jetstream: Arc<dyn JetStreamPublisher>) -> Self {
        debug!("initialized NatsTelemetryProducer");
        Self {
            publisher: build_publisher(jetstream),
        }
    }
}

#[async_trait::async_trait]
impl TelemetryProducer for NatsTelemetryProducer {
    async fn publish_telemetry(&self, event: &TelemetryEvent) -> DomainResult<()> {
        let request = PublishRequest::new(event.subject(), event.encode()?);

        self.publisher
            .clone()
            .oneshot(request)
            .await
            .map_err(|e| DomainError::StreamUnavailable(format!("{:#}", e)))?;

        Ok(())
    }
}
