use anyhow::{anyhow, bail};
use std::time::Duration;

/// Longest credential lifetime the issuer accepts
pub const MAX_VALIDITY_HOURS: u64 = 24 * 366;

/// Configuration for device credential signing
#[derive(Debug, Clone)]
pub struct CredentialConfig {
    pub signing_key: String,
    pub validity_hours: u64,
}

impl CredentialConfig {
    pub fn new(signing_key: String, validity_hours: u64) -> Self {
        Self {
            signing_key,
            validity_hours,
        }
    }

    /// Configured credential lifetime, between one hour and `MAX_VALIDITY_HOURS`
    pub fn validity(&self) -> anyhow::Result<Duration> {
        let secs = self
            .validity_hours
            .checked_mul(60 * 60)
            .ok_or_else(|| anyhow!("credential validity of {} hours overflows", self.validity_hours))?;

        if self.validity_hours == 0 || self.validity_hours > MAX_VALIDITY_HOURS {
            bail!(
                "credential validity must be between 1 and {} hours, got {}",
                MAX_VALIDITY_HOURS,
                self.validity_hours
            );
        }

        Ok(Duration::from_secs(secs))
    }
}
