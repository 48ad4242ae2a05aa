mod config;

use alert_notifier::{AlertNotifier, AlertNotifierConfig, LogAlertHandler};
use breach_detector::{
    BreachDetector, BreachDetectorConfig, BreachDetectorSettings, BreachRule, BreachRuleTable,
    TenantConsumerSettings,
};
use common::auth::{CredentialConfig, JwtDeviceCredentialProvider};
use common::domain::InMemoryTenantRegistry;
use common::namespace::{ALL_ALERTS, DEAD_LETTER_CLASS};
use common::nats::{NatsClient, StreamSpec};
use common::redis::RedisBreachCounterStore;
use common::telemetry::{init_telemetry, TelemetryConfig};
use config::ServiceConfig;
use std::sync::Arc;
use std::time::Duration;
use tenant_api::{ApiServerConfig, TenantApi, TenantApiServer};
use tracing::{debug, error, info};
use vigil_runner::{RunOutcome, Runner};

#[tokio::main]
async fn main() {
    let config = match ServiceConfig::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = init_telemetry(&TelemetryConfig::new("vigil", config.log_level.clone())) {
        eprintln!("Failed to initialize telemetry: {}", e);
        std::process::exit(1);
    }

    info!("starting vigil");
    debug!("configuration: {:?}", redacted(&config));

    let credential_config = CredentialConfig::new(
        config.credential_signing_key.clone(),
        config.credential_validity_hours,
    );
    let credentials = match JwtDeviceCredentialProvider::new(&credential_config) {
        Ok(provider) => Arc::new(provider),
        Err(e) => {
            error!(error = %e, "failed to initialize credential issuer");
            std::process::exit(1);
        }
    };

    let (nats_client, counters) = match initialize_shared_dependencies(&config).await {
        Ok(deps) => deps,
        Err(e) => {
            error!(error = %format!("{:#}", e), "failed to initialize shared dependencies");
            std::process::exit(1);
        }
    };

    let registry = Arc::new(InMemoryTenantRegistry::new());

    let credential_validity = credentials.validity();
    let tenant_api = TenantApi::new(
        nats_client.stream_manager(),
        nats_client.create_publisher_client(),
        registry.clone(),
        credentials,
        credential_validity,
    );
    if let Err(e) = tenant_api
        .bootstrap(&config.bootstrap_organization_ids())
        .await
    {
        error!(error = %format!("{:#}", e), "failed to bootstrap organizations");
        std::process::exit(1);
    }

    let rules = match BreachRuleTable::from_config(
        BreachRule {
            sensor_name: config.breach_sensor_name.clone(),
            threshold: config.breach_threshold,
            consecutive_count: config.breach_consecutive_count,
            condition: config.breach_condition.clone(),
        },
        &config.breach_rules_json,
    ) {
        Ok(rules) => rules,
        Err(e) => {
            error!(error = %format!("{:#}", e), "invalid breach rules");
            std::process::exit(1);
        }
    };

    let breach_detector = BreachDetector::new(
        registry,
        counters,
        rules,
        nats_client.create_consumer_client(),
        nats_client.create_publisher_client(),
        BreachDetectorConfig {
            consumers: TenantConsumerSettings {
                consumer_name: config.breach_consumer_name.clone(),
                batch_size: config.nats_batch_size,
                max_wait: Duration::from_secs(config.nats_batch_wait_secs),
                nak_delay: config.nak_delay(),
                max_deliveries: config.nats_max_deliveries,
                poll_interval: Duration::from_secs(config.tenant_poll_interval_secs),
            },
            detector: BreachDetectorSettings {
                idle_expiry: Duration::from_secs(config.breach_idle_expiry_secs),
                dedup_ttl: config.dedup_ttl(),
            },
        },
    );

    let alert_notifier = AlertNotifier::new(
        nats_client.queue_subscriber(),
        Arc::new(LogAlertHandler::new()),
        AlertNotifierConfig {
            subject: config.alert_subject.clone(),
            queue_group: config.alert_queue_group.clone(),
        },
    );

    let api_server = TenantApiServer::new(
        nats_client.queue_subscriber(),
        nats_client.core_publisher(),
        ApiServerConfig {
            subject_prefix: config.api_subject_prefix.clone(),
            queue_group: config.api_queue_group.clone(),
        },
    );

    let outcome = Runner::new()
        .with_named_process("tenant_api", tenant_api.into_runner_process(api_server))
        .with_named_process("breach_detector", breach_detector.into_runner_process())
        .with_named_process("alert_notifier", alert_notifier.into_runner_process())
        .with_closer({
            let nats_for_close = Arc::clone(&nats_client);
            move || async move {
                info!("running cleanup tasks");
                nats_for_close.close().await;
                info!("cleanup complete");
                Ok(())
            }
        })
        .with_closer_timeout(Duration::from_secs(10))
        .run()
        .await;

    if let RunOutcome::Failed { process, error } = &outcome {
        error!(process = %process, error = %format!("{:#}", error), "vigil stopped after a process failure");
    }
    std::process::exit(outcome.exit_code());
}

async fn initialize_shared_dependencies(
    config: &ServiceConfig,
) -> anyhow::Result<(Arc<NatsClient>, Arc<RedisBreachCounterStore>)> {
    info!("initializing NATS");
    let nats_client =
        Arc::new(NatsClient::connect(&config.nats_url, config.startup_timeout()).await?);

    nats_client
        .ensure_stream(StreamSpec {
            name: "ALERTS".to_string(),
            subjects: vec![ALL_ALERTS.to_string()],
            description: Some("Breach alerts for every organization".to_string()),
        })
        .await?;
    nats_client
        .ensure_stream(StreamSpec {
            name: "DEAD_LETTER".to_string(),
            subjects: vec![format!("{}.>", DEAD_LETTER_CLASS)],
            description: Some("Telemetry that exhausted its redeliveries".to_string()),
        })
        .await?;

    info!("initializing Redis");
    let counters = tokio::time::timeout(
        config.startup_timeout(),
        RedisBreachCounterStore::connect(&config.redis_url),
    )
    .await
    .map_err(|_| anyhow::anyhow!("timed out connecting to Redis at {}", config.redis_url))??;

    Ok((nats_client, Arc::new(counters)))
}

/// Configuration with the signing key blanked, for logging
fn redacted(config: &ServiceConfig) -> ServiceConfig {
    let mut config = config.clone();
    if !config.credential_signing_key.is_empty() {
        config.credential_signing_key = "<redacted>".to_string();
    }
    config
}
