use crate::auth::{DeviceClaims, IssuedCredential};
use crate::domain::DomainResult;
use std::time::Duration;

/// Mints and checks scoped device publish credentials
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
pub trait DeviceCredentialProvider: Send + Sync {
    /// Issue a credential granting publish rights on the device's own subtree only
    fn issue(
        &self,
        organization_id: &str,
        device_id: &str,
        validity: Duration,
    ) -> DomainResult<IssuedCredential>;

    /// Verify a credential and check that it grants publishing on `subject`
    fn verify(&self, token: &str, subject: &str) -> DomainResult<DeviceClaims>;
}
