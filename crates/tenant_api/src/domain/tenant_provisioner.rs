use common::domain::{DomainError, DomainResult, Organization, Tenant, TenantRegistry};
use common::namespace;
use common::nats::{StreamCreateOutcome, StreamManager, StreamSpec};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionOutcome {
    Created,
    AlreadyExisted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionedTenant {
    pub tenant: Tenant,
    pub outcome: ProvisionOutcome,
}

/// Creates the per-organization stream and records the tenant in the registry.
///
/// Safe to retry: an organization whose stream already exists is reported as
/// `AlreadyExisted` and re-registered.
pub struct TenantProvisioner {
    streams: Arc<dyn StreamManager>,
    registry: Arc<dyn TenantRegistry>,
}

impl TenantProvisioner {
    pub fn new(streams: Arc<dyn StreamManager>, registry: Arc<dyn TenantRegistry>) -> Self {
        Self { streams, registry }
    }

    pub async fn provision(&self, organization: Organization) -> DomainResult<ProvisionedTenant> {
        namespace::validate_organization_id(&organization.id)?;

        let tenant = Tenant::for_organization(organization);
        debug!(
            organization_id = %tenant.organization_id(),
            stream = %tenant.stream_name,
            "provisioning tenant stream"
        );

        let exists = self
            .streams
            .stream_exists(&tenant.stream_name)
            .await
            .map_err(|e| DomainError::StreamUnavailable(format!("{:#}", e)))?;

        let outcome = if exists {
            ProvisionOutcome::AlreadyExisted
        } else {
            let spec = StreamSpec {
                name: tenant.stream_name.clone(),
                subjects: vec![tenant.subject_filter.clone()],
                description: Some(format!(
                    "telemetry for organization {}",
                    tenant.organization_id()
                )),
            };

            match self.streams.create_stream(spec).await {
                Ok(StreamCreateOutcome::Created) => ProvisionOutcome::Created,
                // lost a race with another provisioner
                Ok(StreamCreateOutcome::AlreadyExists) => ProvisionOutcome::AlreadyExisted,
                Err(e) => {
                    warn!(
                        organization_id = %tenant.organization_id(),
                        error = %e,
                        "failed to create tenant stream"
                    );
                    return Err(DomainError::StreamUnavailable(format!("{:#}", e)));
                }
            }
        };

        self.registry.register(tenant.clone()).await?;

        info!(
            organization_id = %tenant.organization_id(),
            stream = %tenant.stream_name,
            outcome = ?outcome,
            "tenant provisioned"
        );
        Ok(ProvisionedTenant { tenant, outcome })
    }
}
