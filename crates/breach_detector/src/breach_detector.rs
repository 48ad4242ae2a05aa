use crate::domain::{BreachDetectorService, BreachDetectorSettings, BreachRuleTable};
use crate::nats::{NatsAlertProducer, TelemetryConsumerService};
use crate::supervisor::{TenantConsumerSettings, TenantConsumerSupervisor};
use common::domain::{BreachCounterStore, TenantRegistry};
use common::nats::{JetStreamConsumer, JetStreamPublisher};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub struct BreachDetectorConfig {
    pub consumers: TenantConsumerSettings,
    pub detector: BreachDetectorSettings,
}

/// Breach detection module: per-tenant durable consumers feeding the breach state machine
pub struct BreachDetector {
    supervisor: TenantConsumerSupervisor,
}

impl BreachDetector {
    pub fn new(
        registry: Arc<dyn TenantRegistry>,
        counters: Arc<dyn BreachCounterStore>,
        rules: BreachRuleTable,
        jetstream: Arc<dyn JetStreamConsumer>,
        publisher: Arc<dyn JetStreamPublisher>,
        config: BreachDetectorConfig,
    ) -> Self {
        info!(
            consumer = %config.consumers.consumer_name,
            idle_expiry_secs = config.detector.idle_expiry.as_secs(),
            dedup = config.detector.dedup_ttl.is_some(),
            "initializing breach detector module"
        );

        let alerts = Arc::new(NatsAlertProducer::new(publisher.clone()));
        let detector = Arc::new(BreachDetectorService::new(
            counters,
            alerts,
            Arc::new(rules),
            config.detector,
        ));

        let supervisor = TenantConsumerSupervisor::new(
            registry,
            jetstream,
            TelemetryConsumerService::new(detector),
            config.consumers,
        )
        .with_dead_letter(publisher);

        Self { supervisor }
    }

    pub fn into_runner_process(
        self,
    ) -> impl FnOnce(
        CancellationToken,
    ) -> std::pin::Pin<
        Box<dyn std::future::Future<Output = anyhow::Result<()>> + Send>,
    > {
        move |ctx| Box::pin(async move { self.supervisor.run(ctx).await })
    }
}
