use common::auth::{DeviceCredentialProvider, IssuedCredential};
use common::domain::{Device, DomainError, DomainResult, TenantRegistry};
use common::namespace;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct RegisterDeviceInput {
    pub organization_id: String,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct RegisteredDevice {
    pub device: Device,
    pub credential: IssuedCredential,
}

/// Registers devices under provisioned organizations and hands out their credentials.
///
/// Registration never touches stream infrastructure: the organization's stream already
/// covers every device subject beneath it.
pub struct DeviceService {
    registry: Arc<dyn TenantRegistry>,
    credentials: Arc<dyn DeviceCredentialProvider>,
    credential_validity: Duration,
}

impl DeviceService {
    pub fn new(
        registry: Arc<dyn TenantRegistry>,
        credentials: Arc<dyn DeviceCredentialProvider>,
        credential_validity: Duration,
    ) -> Self {
        Self {
            registry,
            credentials,
            credential_validity,
        }
    }

    pub async fn register_device(&self, input: RegisterDeviceInput) -> DomainResult<RegisteredDevice> {
        debug!(organization_id = %input.organization_id, name = %input.name, "registering device");

        namespace::validate_organization_id(&input.organization_id)?;
        if input.name.trim().is_empty() {
            return Err(DomainError::InvalidDeviceName(
                "Device name cannot be empty".to_string(),
            ));
        }

        self.registry
            .get(&input.organization_id)
            .await?
            .ok_or_else(|| DomainError::OrganizationNotFound(input.organization_id.clone()))?;

        let device = Device {
            device_id: xid::new().to_string(),
            organization_id: input.organization_id,
            name: input.name,
            created_at: Some(chrono::Utc::now()),
        };

        let credential = self.credentials.issue(
            &device.organization_id,
            &device.device_id,
            self.credential_validity,
        )?;

        info!(
            organization_id = %device.organization_id,
            device_id = %device.device_id,
            expires_at = %credential.expires_at,
            "device registered"
        );
        Ok(RegisteredDevice { device, credential })
    }
}
