use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type DomainResult<T> = Result<T, DomainError>;

#[derive(Error, Debug)]
pub enum DomainError {
    #[error("Invalid organization ID: {0}")]
    InvalidOrganizationId(String),

    #[error("Invalid organization name: {0}")]
    InvalidOrganizationName(String),

    #[error("Invalid device ID: {0}")]
    InvalidDeviceId(String),

    #[error("Invalid device name: {0}")]
    InvalidDeviceName(String),

    #[error("Invalid sensor name: {0}")]
    InvalidSensorName(String),

    #[error("Invalid telemetry event: {0}")]
    InvalidTelemetryEvent(String),

    #[error("Organization not found: {0}")]
    OrganizationNotFound(String),

    #[error("Organization already exists: {0}")]
    OrganizationAlreadyExists(String),

    #[error("Invalid credential: {0}")]
    InvalidCredential(String),

    #[error("Credential expired for device {0}")]
    CredentialExpired(String),

    #[error("Capability denied: device {device_id} may not publish to {subject}")]
    CapabilityDenied { device_id: String, subject: String },

    #[error("Payload decode error: {0}")]
    PayloadDecodeError(String),

    #[error("Stream unavailable: {0}")]
    StreamUnavailable(String),

    #[error("Counter store unavailable: {0}")]
    CounterStoreUnavailable(String),

    #[error("Alert publish failed: {0}")]
    AlertPublishFailed(String),

    #[error("Repository error: {0}")]
    RepositoryError(#[from] anyhow::Error),
}

/// Structured error code surfaced by the provisioning and ingestion API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidArgument,
    NotFound,
    AlreadyExists,
    Unauthenticated,
    CapabilityDenied,
    Unavailable,
    Internal,
}

impl DomainError {
    pub fn code(&self) -> ErrorCode {
        match self {
            DomainError::InvalidOrganizationId(_)
            | DomainError::InvalidOrganizationName(_)
            | DomainError::InvalidDeviceId(_)
            | DomainError::InvalidDeviceName(_)
            | DomainError::InvalidSensorName(_)
            | DomainError::InvalidTelemetryEvent(_)
            | DomainError::PayloadDecodeError(_) => ErrorCode::InvalidArgument,

            DomainError::OrganizationNotFound(_) => ErrorCode::NotFound,

            DomainError::OrganizationAlreadyExists(_) => ErrorCode::AlreadyExists,

            DomainError::InvalidCredential(_) | DomainError::CredentialExpired(_) => {
                ErrorCode::Unauthenticated
            }

            DomainError::CapabilityDenied { .. } => ErrorCode::CapabilityDenied,

            DomainError::StreamUnavailable(_)
            | DomainError::CounterStoreUnavailable(_)
            | DomainError::AlertPublishFailed(_) => ErrorCode::Unavailable,

            DomainError::RepositoryError(_) => ErrorCode::Internal,
        }
    }

    /// Transient failures are worth a redelivery; everything else will fail the same way again.
    pub fn is_transient(&self) -> bool {
        matches!(self.code(), ErrorCode::Unavailable | ErrorCode::Internal)
    }
}
