use common::domain::{AlertEvent, AlertProducer, DomainError, DomainResult};
use common::nats::{build_publisher, JetStreamPublisher, LayeredPublisher, PublishRequest};
use std::sync::Arc;
use tower::ServiceExt;
use tracing::debug;

/// Publishes alerts on `notifications.<org>.<device>` through JetStream, so a
/// returned Ok means the ALERTS stream has stored the alert
pub struct NatsAlertProducer {
    publisher: LayeredPublisher,
}

impl NatsAlertProducer {
    pub fn new(jetstream: Arc<dyn JetStreamPublisher>) -> Self {
        debug!("initialized NatsAlertProducer");
        Self {
            publisher: build_publisher(jetstream),
        }
    }
}

#[async_trait::async_trait]
impl AlertProducer for NatsAlertProducer {
    async fn publish_alert(&self, alert: &AlertEvent) -> DomainResult<()> {
        let request = PublishRequest::new(alert.subject(), alert.encode()?);

        self.publisher
            .clone()
            .oneshot(request)
            .await
            .map_err(|e| DomainError::AlertPublishFailed(format!("{:#}", e)))?;

        Ok(())
    }
}
