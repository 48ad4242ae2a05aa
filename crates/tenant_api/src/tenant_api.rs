use crate::domain::{
    CreateOrganizationInput, DeviceService, IngestionService, OrganizationService,
    TenantProvisioner,
};
use crate::nats::{NatsTelemetryProducer, TenantApiHandler, TenantApiServer};
use anyhow::Context;
use common::auth::DeviceCredentialProvider;
use common::domain::TenantRegistry;
use common::nats::{JetStreamPublisher, StreamManager};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Provisioning and ingestion services sharing one tenant registry
pub struct TenantApi {
    pub organizations: Arc<OrganizationService>,
    pub devices: Arc<DeviceService>,
    pub ingestion: Arc<IngestionService>,
}

impl TenantApi {
    pub fn new(
        streams: Arc<dyn StreamManager>,
        publisher: Arc<dyn JetStreamPublisher>,
        registry: Arc<dyn TenantRegistry>,
        credentials: Arc<dyn DeviceCredentialProvider>,
        credential_validity: Duration,
    ) -> Self {
        debug!("initializing tenant api module");

        let provisioner = Arc::new(TenantProvisioner::new(streams, registry.clone()));
        let producer = Arc::new(NatsTelemetryProducer::new(publisher));

        Self {
            organizations: Arc::new(OrganizationService::new(provisioner, registry.clone())),
            devices: Arc::new(DeviceService::new(
                registry.clone(),
                credentials.clone(),
                credential_validity,
            )),
            ingestion: Arc::new(IngestionService::new(credentials, registry, producer)),
        }
    }

    /// Provision organizations named in configuration, using the id as display name
    pub async fn bootstrap(&self, organization_ids: &[String]) -> anyhow::Result<()> {
        for id in organization_ids {
            let provisioned = self
                .organizations
                .create_organization(CreateOrganizationInput {
                    id: id.clone(),
                    name: id.clone(),
                })
                .await
                .with_context(|| format!("failed to provision organization {}", id))?;

            info!(
                organization_id = %id,
                stream = %provisioned.tenant.stream_name,
                outcome = ?provisioned.outcome,
                "bootstrapped organization"
            );
        }
        Ok(())
    }

    /// Serve the services through `server` until cancelled
    pub fn into_runner_process(
        self,
        server: TenantApiServer,
    ) -> impl FnOnce(
        CancellationToken,
    ) -> std::pin::Pin<
        Box<dyn std::future::Future<Output = anyhow::Result<()>> + Send>,
    > {
        let handler = TenantApiHandler::new(self.organizations, self.devices, self.ingestion);
        move |ctx| Box::pin(async move { server.run(handler, ctx).await })
    }
}
