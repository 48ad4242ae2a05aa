use crate::nats::TelemetryConsumerService;
use common::domain::{Tenant, TenantRegistry};
use common::nats::{
    DurableConsumer, DurableConsumerConfig, JetStreamConsumer, JetStreamPublisher,
    NatsConsumeLoggingLayer, NatsConsumeLoggingService,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{Id, JoinSet};
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tracing::{debug, error, info, warn};

type TenantConsumer = DurableConsumer<NatsConsumeLoggingService<TelemetryConsumerService>>;

/// Organization served by each consumer task, so a task that panics can still be traced
/// back to its tenant and restarted
type RunningConsumers = HashMap<Id, String>;

/// Settings shared by every per-tenant consumer
#[derive(Debug, Clone)]
pub struct TenantConsumerSettings {
    pub consumer_name: String,
    pub batch_size: usize,
    pub max_wait: Duration,
    pub nak_delay: Option<Duration>,
    pub max_deliveries: i64,
    /// How often the registry is checked for newly provisioned tenants
    pub poll_interval: Duration,
}

/// Runs one durable consumer per provisioned organization stream.
///
/// All replicas use the same consumer name, so they compete for each tenant's messages
/// instead of each receiving a copy.
pub struct TenantConsumerSupervisor {
    registry: Arc<dyn TenantRegistry>,
    jetstream: Arc<dyn JetStreamConsumer>,
    dead_letter: Option<Arc<dyn JetStreamPublisher>>,
    service: TelemetryConsumerService,
    settings: TenantConsumerSettings,
}

impl TenantConsumerSupervisor {
    pub fn new(
        registry: Arc<dyn TenantRegistry>,
        jetstream: Arc<dyn JetStreamConsumer>,
        service: TelemetryConsumerService,
        settings: TenantConsumerSettings,
    ) -> Self {
        Self {
            registry,
            jetstream,
            dead_letter: None,
            service,
            settings,
        }
    }

    pub fn with_dead_letter(mut self, publisher: Arc<dyn JetStreamPublisher>) -> Self {
        self.dead_letter = Some(publisher);
        self
    }

    /// Supervise until cancelled, then wait for every consumer to finish its message in hand
    pub async fn run(self, ctx: CancellationToken) -> anyhow::Result<()> {
        let mut running = RunningConsumers::new();
        let mut consumers: JoinSet<anyhow::Result<()>> = JoinSet::new();

        loop {
            self.start_new_tenants(&mut running, &mut consumers, &ctx).await;

            tokio::select! {
                _ = ctx.cancelled() => break,
                _ = tokio::time::sleep(self.settings.poll_interval) => {}
                Some(joined) = consumers.join_next_with_id() => {
                    // removed from `running` either way, so the next pass restarts it
                    match joined {
                        Ok((id, result)) => {
                            let organization_id = running.remove(&id).unwrap_or_default();
                            if let Err(e) = result {
                                error!(organization_id = %organization_id, error = %e, "tenant consumer failed");
                            }
                        }
                        Err(e) => {
                            let organization_id = running.remove(&e.id()).unwrap_or_default();
                            error!(organization_id = %organization_id, error = %e, "tenant consumer panicked");
                        }
                    }
                }
            }
        }

        info!(consumers = consumers.len(), "draining tenant consumers");
        while let Some(joined) = consumers.join_next_with_id().await {
            match joined {
                Ok((id, Err(e))) => {
                    let organization_id = running.remove(&id).unwrap_or_default();
                    error!(organization_id = %organization_id, error = %e, "tenant consumer failed during shutdown")
                }
                Ok((id, Ok(()))) => {
                    let organization_id = running.remove(&id).unwrap_or_default();
                    debug!(organization_id = %organization_id, "tenant consumer stopped")
                }
                Err(e) => {
                    let organization_id = running.remove(&e.id()).unwrap_or_default();
                    error!(organization_id = %organization_id, error = %e, "tenant consumer panicked during shutdown")
                }
            }
        }
        Ok(())
    }

    async fn start_new_tenants(
        &self,
        running: &mut RunningConsumers,
        consumers: &mut JoinSet<anyhow::Result<()>>,
        ctx: &CancellationToken,
    ) {
        let tenants = match self.registry.list().await {
            Ok(tenants) => tenants,
            Err(e) => {
                warn!(error = %e, "failed to list tenants");
                return;
            }
        };

        for tenant in tenants {
            let served = running
                .values()
                .any(|organization_id| organization_id == tenant.organization_id());
            if served || ctx.is_cancelled() {
                continue;
            }

            match self.build_consumer(&tenant).await {
                Ok(consumer) => {
                    let organization_id = tenant.organization_id().to_string();
                    let token = ctx.child_token();
                    info!(
                        organization_id = %organization_id,
                        stream = %tenant.stream_name,
                        "starting tenant consumer"
                    );
                    let handle = consumers.spawn(consumer.run(token));
                    running.insert(handle.id(), organization_id);
                }
                Err(e) => warn!(
                    organization_id = %tenant.organization_id(),
                    error = %format!("{:#}", e),
                    "failed to create tenant consumer, retrying on next pass"
                ),
            }
        }
    }

    async fn build_consumer(&self, tenant: &Tenant) -> anyhow::Result<TenantConsumer> {
        let config = DurableConsumerConfig::new(
            tenant.stream_name.clone(),
            self.settings.consumer_name.clone(),
            tenant.subject_filter.clone(),
        )
        .with_batch(self.settings.batch_size, self.settings.max_wait)
        .with_redelivery(self.settings.nak_delay, self.settings.max_deliveries);

        let service = ServiceBuilder::new()
            .layer(NatsConsumeLoggingLayer::new())
            .service(self.service.clone());

        let consumer = DurableConsumer::new(self.jetstream.clone(), config, service).await?;
        Ok(match &self.dead_letter {
            Some(publisher) => consumer.with_dead_letter(publisher.clone()),
            None => consumer,
        })
    }
}
