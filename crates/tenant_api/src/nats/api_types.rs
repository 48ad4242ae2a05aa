use chrono::{DateTime, Utc};
use common::domain::{DomainError, ErrorCode, Organization, TelemetryEvent, Tenant};
use serde::{Deserialize, Serialize};
use tracing::error;

pub const CREATE_ORGANIZATION: &str = "organizations.create";
pub const GET_ORGANIZATION: &str = "organizations.get";
pub const LIST_ORGANIZATIONS: &str = "organizations.list";
pub const REGISTER_DEVICE: &str = "devices.register";
pub const INGEST_TELEMETRY: &str = "telemetry.ingest";

/// Reply envelope: `{"ok": ...}` on success, `{"error": {"code": ..., "message": ...}}` otherwise
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiReply<T> {
    Ok(T),
    Error(ApiError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Convert a domain error to the error body returned to callers.
/// Internal failures are logged here and reported without detail.
pub fn domain_error_to_reply(error: DomainError) -> ApiError {
    match error.code() {
        ErrorCode::Internal => {
            error!(error = %error, "internal error handling api request");
            ApiError::new(ErrorCode::Internal, "internal error")
        }
        code => ApiError::new(code, error.to_string()),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateOrganizationRequest {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetOrganizationRequest {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrganizationReply {
    pub id: String,
    pub name: String,
    pub created_at: Option<DateTime<Utc>>,
    pub stream_name: String,
    pub subject_filter: String,
}

impl From<Tenant> for OrganizationReply {
    fn from(tenant: Tenant) -> Self {
        Self {
            id: tenant.organization.id,
            name: tenant.organization.name,
            created_at: tenant.organization.created_at,
            stream_name: tenant.stream_name,
            subject_filter: tenant.subject_filter,
        }
    }
}

impl From<Organization> for OrganizationReply {
    fn from(organization: Organization) -> Self {
        Tenant::for_organization(organization).into()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateOrganizationReply {
    pub organization: OrganizationReply,
    /// False when the organization was already provisioned under the same name
    pub created: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterDeviceRequest {
    pub organization_id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterDeviceReply {
    pub device_id: String,
    pub organization_id: String,
    pub name: String,
    pub token: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Telemetry submitted with the device's bearer credential
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestRequest {
    pub token: String,
    pub event: TelemetryEvent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestReply {
    pub subject: String,
}
