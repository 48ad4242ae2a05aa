use common::auth::DeviceCredentialProvider;
use common::domain::{DomainError, DomainResult, TelemetryEvent, TelemetryProducer, TenantRegistry};
use std::sync::Arc;
use tracing::{debug, instrument};

/// Accepts device telemetry on behalf of the API boundary and publishes it onto the
/// organization's stream.
///
/// Flow:
/// 1. Validate the event fields
/// 2. Verify the bearer credential grants publishing on the event's subject
/// 3. Require the organization to be provisioned
/// 4. Publish via the telemetry producer
pub struct IngestionService {
    credentials: Arc<dyn DeviceCredentialProvider>,
    registry: Arc<dyn TenantRegistry>,
    producer: Arc<dyn TelemetryProducer>,
}

impl IngestionService {
    pub fn new(
        credentials: Arc<dyn DeviceCredentialProvider>,
        registry: Arc<dyn TenantRegistry>,
        producer: Arc<dyn TelemetryProducer>,
    ) -> Self {
        Self {
            credentials,
            registry,
            producer,
        }
    }

    #[instrument(skip(self, token, event), fields(organization_id = %event.organization_id, device_id = %event.device_id))]
    pub async fn ingest(&self, token: &str, event: TelemetryEvent) -> DomainResult<()> {
        event.validate()?;

        let subject = event.subject();
        self.credentials.verify(token, &subject)?;

        self.registry
            .get(&event.organization_id)
            .await?
            .ok_or_else(|| DomainError::OrganizationNotFound(event.organization_id.clone()))?;

        self.producer.publish_telemetry(&event).await?;

        debug!(subject = %subject, "ingested telemetry");
        Ok(())
    }
}
