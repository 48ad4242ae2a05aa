use crate::auth::{CredentialConfig, DeviceCredentialProvider};
use crate::domain::{DomainError, DomainResult};
use crate::namespace;
use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Allow list for one direction of traffic
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionSet {
    #[serde(default)]
    pub allow: Vec<String>,
}

/// Publish/subscribe grants, shaped like a NATS user JWT's `nats` section
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NatsPermissions {
    #[serde(rename = "pub", default)]
    pub publish: PermissionSet,
    #[serde(rename = "sub", default)]
    pub subscribe: PermissionSet,
}

/// Device credential claims
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceClaims {
    pub sub: String, // device_id
    pub org: String,
    pub jti: String,
    pub iat: i64,
    pub nbf: i64,
    pub exp: i64,
    pub nats: NatsPermissions,
}

/// A freshly signed credential
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedCredential {
    pub token: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// HS256 JWT implementation of DeviceCredentialProvider
pub struct JwtDeviceCredentialProvider {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validity: Duration,
}

impl JwtDeviceCredentialProvider {
    /// Fails when the signing key is missing or the validity window is out of range;
    /// callers treat this as fatal at startup
    pub fn new(config: &CredentialConfig) -> anyhow::Result<Self> {
        if config.signing_key.trim().is_empty() {
            bail!("credential signing key is not configured");
        }

        let validity = config.validity()?;
        chrono::Duration::from_std(validity).context("credential validity is out of range")?;

        Ok(Self {
            encoding_key: EncodingKey::from_secret(config.signing_key.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.signing_key.as_bytes()),
            validity,
        })
    }

    /// Configured lifetime for newly issued credentials
    pub fn validity(&self) -> Duration {
        self.validity
    }

    pub fn issue_at(
        &self,
        organization_id: &str,
        device_id: &str,
        validity: Duration,
        issued_at: DateTime<Utc>,
    ) -> DomainResult<IssuedCredential> {
        namespace::validate_organization_id(organization_id)?;
        namespace::validate_device_id(device_id)?;

        let expires_at = chrono::Duration::from_std(validity)
            .ok()
            .and_then(|validity| issued_at.checked_add_signed(validity))
            .ok_or_else(|| {
                DomainError::RepositoryError(anyhow::anyhow!(
                    "credential validity of {}s is out of range",
                    validity.as_secs()
                ))
            })?;

        let claims = DeviceClaims {
            sub: device_id.to_string(),
            org: organization_id.to_string(),
            jti: xid::new().to_string(),
            iat: issued_at.timestamp(),
            nbf: issued_at.timestamp(),
            exp: expires_at.timestamp(),
            nats: NatsPermissions {
                publish: PermissionSet {
                    allow: vec![namespace::device_publish_pattern(organization_id, device_id)],
                },
                // devices only produce
                subscribe: PermissionSet::default(),
            },
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| DomainError::RepositoryError(anyhow::anyhow!("JWT encoding error: {}", e)))?;

        Ok(IssuedCredential {
            token,
            issued_at,
            expires_at,
        })
    }

    pub fn verify_at(
        &self,
        token: &str,
        subject: &str,
        now: DateTime<Utc>,
    ) -> DomainResult<DeviceClaims> {
        // Expiry is checked below against `now` with zero leeway
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.set_required_spec_claims(&["exp", "sub"]);

        let claims = decode::<DeviceClaims>(token, &self.decoding_key, &validation)
            .map_err(|e| DomainError::InvalidCredential(e.to_string()))?
            .claims;

        let now = now.timestamp();
        if now >= claims.exp {
            return Err(DomainError::CredentialExpired(claims.sub));
        }
        if now < claims.nbf {
            return Err(DomainError::InvalidCredential(format!(
                "credential for device {} is not valid yet",
                claims.sub
            )));
        }

        let allowed = claims
            .nats
            .publish
            .allow
            .iter()
            .any(|pattern| namespace::subject_matches(pattern, subject));
        if !allowed {
            return Err(DomainError::CapabilityDenied {
                device_id: claims.sub,
                subject: subject.to_string(),
            });
        }

        Ok(claims)
    }
}

impl DeviceCredentialProvider for JwtDeviceCredentialProvider {
    fn issue(
        &self,
        organization_id: &str,
        device_id: &str,
        validity: Duration,
    ) -> DomainResult<IssuedCredential> {
        self.issue_at(organization_id, device_id, validity, Utc::now())
    }

    fn verify(&self, token: &str, subject: &str) -> DomainResult<DeviceClaims> {
        self.verify_at(token, subject, Utc::now())
    }
}
