use crate::domain::{
    CreateOrganizationInput, DeviceService, IngestionService, OrganizationService,
    ProvisionOutcome, RegisterDeviceInput,
};
use crate::nats::{
    domain_error_to_reply, ApiError, ApiReply, CreateOrganizationReply, CreateOrganizationRequest,
    GetOrganizationRequest, IngestReply, IngestRequest, OrganizationReply, RegisterDeviceReply,
    RegisterDeviceRequest, CREATE_ORGANIZATION, GET_ORGANIZATION, INGEST_TELEMETRY,
    LIST_ORGANIZATIONS, REGISTER_DEVICE,
};
use bytes::Bytes;
use common::domain::ErrorCode;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, instrument};

const ENCODE_FAILURE: &[u8] = br#"{"error":{"code":"internal","message":"failed to encode reply"}}"#;

/// Maps API requests onto the provisioning and ingestion services.
/// Handles JSON to domain mapping and error conversion.
#[derive(Clone)]
pub struct TenantApiHandler {
    organizations: Arc<OrganizationService>,
    devices: Arc<DeviceService>,
    ingestion: Arc<IngestionService>,
}

impl TenantApiHandler {
    pub fn new(
        organizations: Arc<OrganizationService>,
        devices: Arc<DeviceService>,
        ingestion: Arc<IngestionService>,
    ) -> Self {
        Self {
            organizations,
            devices,
            ingestion,
        }
    }

    /// Handle one request addressed to `endpoint` and encode the reply
    pub async fn dispatch(&self, endpoint: &str, payload: &[u8]) -> Bytes {
        match endpoint {
            CREATE_ORGANIZATION => encode(self.create_organization(payload).await),
            GET_ORGANIZATION => encode(self.get_organization(payload).await),
            LIST_ORGANIZATIONS => encode(self.list_organizations().await),
            REGISTER_DEVICE => encode(self.register_device(payload).await),
            INGEST_TELEMETRY => encode(self.ingest(payload).await),
            other => encode::<()>(Err(ApiError::new(
                ErrorCode::NotFound,
                format!("unknown endpoint: {}", other),
            ))),
        }
    }

    #[instrument(name = "CreateOrganization", skip(self, payload))]
    async fn create_organization(&self, payload: &[u8]) -> Result<CreateOrganizationReply, ApiError> {
        let req: CreateOrganizationRequest = decode(payload)?;

        let provisioned = self
            .organizations
            .create_organization(CreateOrganizationInput {
                id: req.id,
                name: req.name,
            })
            .await
            .map_err(domain_error_to_reply)?;

        Ok(CreateOrganizationReply {
            created: provisioned.outcome == ProvisionOutcome::Created,
            organization: provisioned.tenant.into(),
        })
    }

    #[instrument(name = "GetOrganization", skip(self, payload))]
    async fn get_organization(&self, payload: &[u8]) -> Result<OrganizationReply, ApiError> {
        let req: GetOrganizationRequest = decode(payload)?;

        self.organizations
            .get_organization(&req.id)
            .await
            .map(OrganizationReply::from)
            .map_err(domain_error_to_reply)
    }

    #[instrument(name = "ListOrganizations", skip(self))]
    async fn list_organizations(&self) -> Result<Vec<OrganizationReply>, ApiError> {
        let organizations = self
            .organizations
            .list_organizations()
            .await
            .map_err(domain_error_to_reply)?;

        Ok(organizations.into_iter().map(OrganizationReply::from).collect())
    }

    #[instrument(name = "RegisterDevice", skip(self, payload))]
    async fn register_device(&self, payload: &[u8]) -> Result<RegisterDeviceReply, ApiError> {
        let req: RegisterDeviceRequest = decode(payload)?;

        let registered = self
            .devices
            .register_device(RegisterDeviceInput {
                organization_id: req.organization_id,
                name: req.name,
            })
            .await
            .map_err(domain_error_to_reply)?;

        Ok(RegisterDeviceReply {
            device_id: registered.device.device_id,
            organization_id: registered.device.organization_id,
            name: registered.device.name,
            token: registered.credential.token,
            issued_at: registered.credential.issued_at,
            expires_at: registered.credential.expires_at,
        })
    }

    #[instrument(name = "IngestTelemetry", skip(self, payload))]
    async fn ingest(&self, payload: &[u8]) -> Result<IngestReply, ApiError> {
        let req: IngestRequest = decode(payload)?;
        let subject = req.event.subject();

        self.ingestion
            .ingest(&req.token, req.event)
            .await
            .map_err(domain_error_to_reply)?;

        Ok(IngestReply { subject })
    }
}

fn decode<T: DeserializeOwned>(payload: &[u8]) -> Result<T, ApiError> {
    serde_json::from_slice(payload).map_err(|e| {
        ApiError::new(
            ErrorCode::InvalidArgument,
            format!("malformed request: {}", e),
        )
    })
}

fn encode<T: Serialize>(result: Result<T, ApiError>) -> Bytes {
    let reply = match result {
        Ok(body) => ApiReply::Ok(body),
        Err(e) => ApiReply::Error(e),
    };

    match serde_json::to_vec(&reply) {
        Ok(bytes) => Bytes::from(bytes),
        Err(e) => {
            error!(error = %e, "failed to encode api reply");
            Bytes::from_static(ENCODE_FAILURE)
        }
    }
}
