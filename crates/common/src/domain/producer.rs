use crate::domain::{AlertEvent, DomainResult, TelemetryEvent};
use async_trait::async_trait;

/// Publishes telemetry onto the owning organization's stream
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait TelemetryProducer: Send + Sync {
    async fn publish_telemetry(&self, event: &TelemetryEvent) -> DomainResult<()>;
}

/// Publishes alerts onto the alert namespace for fan-out
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait AlertProducer: Send + Sync {
    async fn publish_alert(&self, alert: &AlertEvent) -> DomainResult<()>;
}
