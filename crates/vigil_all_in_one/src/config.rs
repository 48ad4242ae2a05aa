use config::{Config, ConfigError, Environment};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServiceConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    // NATS configuration
    #[serde(default = "default_nats_url")]
    pub nats_url: String,

    /// Connection timeout for NATS and Redis at startup
    #[serde(default = "default_startup_timeout_secs")]
    pub startup_timeout_secs: u64,

    /// Messages pulled per fetch by each tenant consumer
    #[serde(default = "default_nats_batch_size")]
    pub nats_batch_size: usize,

    #[serde(default = "default_nats_batch_wait_secs")]
    pub nats_batch_wait_secs: u64,

    /// Redelivery delay after a nak; 0 redelivers immediately
    #[serde(default = "default_nats_nak_delay_secs")]
    pub nats_nak_delay_secs: u64,

    /// Deliveries after which a rejected message goes to the dead-letter subject
    #[serde(default = "default_nats_max_deliveries")]
    pub nats_max_deliveries: i64,

    /// Interval at which newly provisioned tenants are picked up
    #[serde(default = "default_tenant_poll_interval_secs")]
    pub tenant_poll_interval_secs: u64,

    // Redis configuration
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    // Breach detection
    #[serde(default = "default_breach_sensor_name")]
    pub breach_sensor_name: String,

    #[serde(default = "default_breach_threshold")]
    pub breach_threshold: f64,

    #[serde(default = "default_breach_consecutive_count")]
    pub breach_consecutive_count: u64,

    #[serde(default = "default_breach_condition")]
    pub breach_condition: String,

    /// Lifetime of a breach counter that receives no readings
    #[serde(default = "default_breach_idle_expiry_secs")]
    pub breach_idle_expiry_secs: u64,

    /// Lifetime of processed-message markers; 0 disables duplicate suppression
    #[serde(default = "default_breach_dedup_ttl_secs")]
    pub breach_dedup_ttl_secs: u64,

    /// JSON array of per-organization and per-device rule overrides
    #[serde(default)]
    pub breach_rules_json: String,

    #[serde(default = "default_breach_consumer_name")]
    pub breach_consumer_name: String,

    // Alert fan-out
    #[serde(default = "default_alert_subject")]
    pub alert_subject: String,

    #[serde(default = "default_alert_queue_group")]
    pub alert_queue_group: String,

    // Tenant API
    /// Subject prefix the request-reply API is served under
    #[serde(default = "default_api_subject_prefix")]
    pub api_subject_prefix: String,

    #[serde(default = "default_api_queue_group")]
    pub api_queue_group: String,

    // Device credentials
    /// HS256 signing key; startup fails when empty
    #[serde(default)]
    pub credential_signing_key: String,

    #[serde(default = "default_credential_validity_hours")]
    pub credential_validity_hours: u64,

    /// Comma-separated organization ids provisioned at startup
    #[serde(default)]
    pub bootstrap_organizations: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_nats_url() -> String {
    "nats://localhost:4222".to_string()
}

fn default_startup_timeout_secs() -> u64 {
    30
}

fn default_nats_batch_size() -> usize {
    100
}

fn default_nats_batch_wait_secs() -> u64 {
    1
}

fn default_nats_nak_delay_secs() -> u64 {
    2
}

fn default_nats_max_deliveries() -> i64 {
    5
}

fn default_tenant_poll_interval_secs() -> u64 {
    5
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_breach_sensor_name() -> String {
    "temp1".to_string()
}

fn default_breach_threshold() -> f64 {
    80.0
}

fn default_breach_consecutive_count() -> u64 {
    3
}

fn default_breach_condition() -> String {
    "Consecutive Temp Threshold Breach".to_string()
}

fn default_breach_idle_expiry_secs() -> u64 {
    300
}

fn default_breach_dedup_ttl_secs() -> u64 {
    3600
}

fn default_breach_consumer_name() -> String {
    "BREACH_DETECTOR".to_string()
}

fn default_alert_subject() -> String {
    common::namespace::ALL_ALERTS.to_string()
}

fn default_alert_queue_group() -> String {
    "notification-group".to_string()
}

fn default_api_subject_prefix() -> String {
    "vigil.api".to_string()
}

fn default_api_queue_group() -> String {
    "tenant-api".to_string()
}

fn default_credential_validity_hours() -> u64 {
    12
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(Environment::with_prefix("VIGIL"))
            .build()?
            .try_deserialize()
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs)
    }

    pub fn nak_delay(&self) -> Option<Duration> {
        match self.nats_nak_delay_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    pub fn dedup_ttl(&self) -> Option<Duration> {
        match self.breach_dedup_ttl_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    pub fn bootstrap_organization_ids(&self) -> Vec<String> {
        self.bootstrap_organizations
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }
}
