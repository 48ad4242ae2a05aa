use crate::domain::{DomainError, DomainResult};
use crate::namespace;
use serde::{Deserialize, Serialize};

/// A single sensor reading published by a device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryEvent {
    pub organization_id: String,
    pub device_id: String,
    pub sensor_name: String,
    pub value: f64,
    /// Unix seconds
    pub timestamp: i64,
}

impl TelemetryEvent {
    /// Check the fields that become subject tokens and the reading itself
    pub fn validate(&self) -> DomainResult<()> {
        namespace::validate_organization_id(&self.organization_id)?;
        namespace::validate_device_id(&self.device_id)?;
        namespace::validate_sensor_name(&self.sensor_name)?;

        if !self.value.is_finite() {
            return Err(DomainError::InvalidTelemetryEvent(format!(
                "value must be a finite number, got {}",
                self.value
            )));
        }

        if self.timestamp <= 0 {
            return Err(DomainError::InvalidTelemetryEvent(format!(
                "timestamp must be positive unix seconds, got {}",
                self.timestamp
            )));
        }

        Ok(())
    }

    /// Subject this event is published on
    pub fn subject(&self) -> String {
        namespace::telemetry_subject(&self.organization_id, &self.device_id, &self.sensor_name)
    }

    pub fn decode(payload: &[u8]) -> DomainResult<Self> {
        serde_json::from_slice(payload).map_err(|e| DomainError::PayloadDecodeError(e.to_string()))
    }

    pub fn encode(&self) -> DomainResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| DomainError::RepositoryError(e.into()))
    }
}

/// Emitted once per satisfied breach episode
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertEvent {
    pub organization_id: String,
    pub device_id: String,
    pub sensor_name: String,
    pub condition: String,
}

impl AlertEvent {
    pub fn subject(&self) -> String {
        namespace::alert_subject(&self.organization_id, &self.device_id)
    }

    pub fn decode(payload: &[u8]) -> DomainResult<Self> {
        serde_json::from_slice(payload).map_err(|e| DomainError::PayloadDecodeError(e.to_string()))
    }

    pub fn encode(&self) -> DomainResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| DomainError::RepositoryError(e.into()))
    }
}
