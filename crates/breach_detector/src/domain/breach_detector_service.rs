use crate::domain::BreachRuleTable;
use common::domain::{
    AlertEvent, AlertProducer, BreachCounterStore, DomainResult, TelemetryEvent,
};
use common::namespace;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Result of applying one reading to its counter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreachOutcome {
    /// No rule covers this sensor
    Unmonitored,
    /// Breaching run of this length, below the trigger count
    Armed(u64),
    /// Alert published for a run of this length; counter cleared
    Triggered(u64),
    /// Non-breaching reading; counter cleared
    Reset,
    /// Already applied on an earlier delivery
    Duplicate,
}

#[derive(Debug, Clone)]
pub struct BreachDetectorSettings {
    /// Counter lifetime without new breaching readings
    pub idle_expiry: Duration,
    /// Lifetime of per-message processed markers; None disables duplicate suppression
    pub dedup_ttl: Option<Duration>,
}

/// Consecutive-breach state machine. State lives in the shared counter store, keyed by
/// device and sensor, so it survives restarts and is shared by every replica.
pub struct BreachDetectorService {
    counters: Arc<dyn BreachCounterStore>,
    alerts: Arc<dyn AlertProducer>,
    rules: Arc<BreachRuleTable>,
    settings: BreachDetectorSettings,
}

impl BreachDetectorService {
    pub fn new(
        counters: Arc<dyn BreachCounterStore>,
        alerts: Arc<dyn AlertProducer>,
        rules: Arc<BreachRuleTable>,
        settings: BreachDetectorSettings,
    ) -> Self {
        Self {
            counters,
            alerts,
            rules,
            settings,
        }
    }

    /// Apply one reading.
    ///
    /// Any error leaves the message to be redelivered. The trigger check is `>=` so that a
    /// redelivery after a failed alert publish still fires, and the counter is only cleared
    /// once the alert has been accepted by the broker.
    pub async fn handle_reading(
        &self,
        event: &TelemetryEvent,
        message_id: Option<&str>,
    ) -> DomainResult<BreachOutcome> {
        let Some(rule) =
            self.rules
                .lookup(&event.organization_id, &event.device_id, &event.sensor_name)
        else {
            return Ok(BreachOutcome::Unmonitored);
        };

        let marker = match (message_id, self.settings.dedup_ttl) {
            (Some(id), Some(ttl)) => Some((namespace::processed_marker_key(id), ttl)),
            _ => None,
        };

        if let Some((marker, _)) = &marker {
            if self.counters.is_processed(marker).await? {
                debug!(marker = %marker, "reading already applied, skipping");
                return Ok(BreachOutcome::Duplicate);
            }
        }

        let key = namespace::breach_counter_key(&event.device_id, &event.sensor_name);

        let outcome = if rule.is_breach(event.value) {
            let count = self
                .counters
                .increment(&key, self.settings.idle_expiry)
                .await?;

            if count >= rule.consecutive_count {
                let alert = AlertEvent {
                    organization_id: event.organization_id.clone(),
                    device_id: event.device_id.clone(),
                    sensor_name: event.sensor_name.clone(),
                    condition: rule.condition.clone(),
                };
                self.alerts.publish_alert(&alert).await?;
                self.counters.reset(&key).await?;

                info!(
                    organization_id = %event.organization_id,
                    device_id = %event.device_id,
                    sensor_name = %event.sensor_name,
                    count,
                    "breach alert emitted"
                );
                BreachOutcome::Triggered(count)
            } else {
                debug!(key = %key, count, value = event.value, "breach counter armed");
                BreachOutcome::Armed(count)
            }
        } else {
            self.counters.reset(&key).await?;
            BreachOutcome::Reset
        };

        if let Some((marker, ttl)) = &marker {
            self.counters.mark_processed(marker, *ttl).await?;
        }

        Ok(outcome)
    }
}
