use async_trait::async_trait;
use common::domain::AlertEvent;
use tracing::info;

/// Acts on a delivered alert. Each alert reaches exactly one handler in the queue group.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait AlertHandler: Send + Sync {
    async fn handle(&self, alert: &AlertEvent) -> anyhow::Result<()>;
}

/// Records the dispatch in the log in place of sending an email or SMS
#[derive(Debug, Clone, Default)]
pub struct LogAlertHandler;

impl LogAlertHandler {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl AlertHandler for LogAlertHandler {
    async fn handle(&self, alert: &AlertEvent) -> anyhow::Result<()> {
        info!(
            organization_id = %alert.organization_id,
            device_id = %alert.device_id,
            sensor_name = %alert.sensor_name,
            condition = %alert.condition,
            "dispatching alert notification"
        );
        Ok(())
    }
}
