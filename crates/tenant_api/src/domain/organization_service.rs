use crate::domain::{ProvisionOutcome, ProvisionedTenant, TenantProvisioner};
use common::domain::{DomainError, DomainResult, Organization, TenantRegistry};
use common::namespace;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct CreateOrganizationInput {
    pub id: String,
    pub name: String,
}

/// Domain service for organization business logic
pub struct OrganizationService {
    provisioner: Arc<TenantProvisioner>,
    registry: Arc<dyn TenantRegistry>,
}

impl OrganizationService {
    pub fn new(provisioner: Arc<TenantProvisioner>, registry: Arc<dyn TenantRegistry>) -> Self {
        Self {
            provisioner,
            registry,
        }
    }

    /// Create an organization and provision its stream.
    ///
    /// Repeating the call for an existing organization with the same name succeeds with
    /// `AlreadyExisted`. Reusing the id under a different name is `OrganizationAlreadyExists`.
    pub async fn create_organization(
        &self,
        input: CreateOrganizationInput,
    ) -> DomainResult<ProvisionedTenant> {
        debug!(organization_id = %input.id, name = %input.name, "creating organization");

        namespace::validate_organization_id(&input.id)?;
        if input.name.trim().is_empty() {
            return Err(DomainError::InvalidOrganizationName(
                "Organization name cannot be empty".to_string(),
            ));
        }

        let organization = match self.registry.get(&input.id).await? {
            Some(existing) if existing.organization.name != input.name => {
                return Err(DomainError::OrganizationAlreadyExists(input.id));
            }
            // keep the original creation time, but re-run provisioning in case the
            // stream was lost since
            Some(existing) => existing.organization,
            None => Organization {
                id: input.id,
                name: input.name,
                created_at: Some(chrono::Utc::now()),
            },
        };

        let provisioned = self.provisioner.provision(organization).await?;

        if provisioned.outcome == ProvisionOutcome::Created {
            info!(organization_id = %provisioned.tenant.organization_id(), "organization created");
        }
        Ok(provisioned)
    }

    pub async fn get_organization(&self, organization_id: &str) -> DomainResult<Organization> {
        namespace::validate_organization_id(organization_id)?;

        self.registry
            .get(organization_id)
            .await?
            .map(|tenant| tenant.organization)
            .ok_or_else(|| DomainError::OrganizationNotFound(organization_id.to_string()))
    }

    pub async fn list_organizations(&self) -> DomainResult<Vec<Organization>> {
        let organizations: Vec<Organization> = self
            .registry
            .list()
            .await?
            .into_iter()
            .map(|tenant| tenant.organization)
            .collect();

        debug!(count = organizations.len(), "listed organizations");
        Ok(organizations)
    }
}
