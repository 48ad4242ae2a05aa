//! Mapping of tenants, devices and sensors onto stream names, subjects and counter keys.
//!
//! Telemetry lives under `data.<organization>.<device>.<sensor>` and alerts under
//! `notifications.<organization>.<device>`. A device may only ever publish below its own
//! `data.<organization>.<device>.>` subtree, so every identifier that becomes a subject
//! token has to be a single, wildcard-free token.

use crate::domain::{DomainError, DomainResult};

pub const TELEMETRY_CLASS: &str = "data";
pub const ALERT_CLASS: &str = "notifications";
pub const DEAD_LETTER_CLASS: &str = "dead_letter";

/// Every alert for every organization
pub const ALL_ALERTS: &str = "notifications.>";

/// Name of the durable stream owned by an organization
pub fn stream_name(organization_id: &str) -> String {
    format!("ORG_{}_STREAM", organization_id)
}

/// Subject filter the organization's stream is bound to
pub fn organization_subject_filter(organization_id: &str) -> String {
    format!("{}.{}.>", TELEMETRY_CLASS, organization_id)
}

pub fn telemetry_subject(organization_id: &str, device_id: &str, sensor_name: &str) -> String {
    format!(
        "{}.{}.{}.{}",
        TELEMETRY_CLASS, organization_id, device_id, sensor_name
    )
}

/// The only subjects a device credential grants publish rights on
pub fn device_publish_pattern(organization_id: &str, device_id: &str) -> String {
    format!("{}.{}.{}.>", TELEMETRY_CLASS, organization_id, device_id)
}

pub fn alert_subject(organization_id: &str, device_id: &str) -> String {
    format!("{}.{}.{}", ALERT_CLASS, organization_id, device_id)
}

pub fn organization_alert_filter(organization_id: &str) -> String {
    format!("{}.{}.>", ALERT_CLASS, organization_id)
}

pub fn breach_counter_key(device_id: &str, sensor_name: &str) -> String {
    format!("breach:count:{}:{}", device_id, sensor_name)
}

pub fn processed_marker_key(message_id: &str) -> String {
    format!("breach:seen:{}", message_id)
}

pub fn dead_letter_subject(original_subject: &str) -> String {
    format!("{}.{}", DEAD_LETTER_CLASS, original_subject)
}

/// Organization owning a telemetry, alert or dead-letter subject
pub fn subject_organization(subject: &str) -> Option<&str> {
    let subject = subject
        .strip_prefix(DEAD_LETTER_CLASS)
        .and_then(|rest| rest.strip_prefix('.'))
        .unwrap_or(subject);

    let mut tokens = subject.split('.');
    match tokens.next()? {
        TELEMETRY_CLASS | ALERT_CLASS => tokens.next().filter(|org| !org.is_empty()),
        _ => None,
    }
}

/// Tokens parsed back out of a telemetry subject
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetrySubject {
    pub organization_id: String,
    pub device_id: String,
    pub sensor_name: String,
}

pub fn parse_telemetry_subject(subject: &str) -> Option<TelemetrySubject> {
    let mut tokens = subject.split('.');
    if tokens.next()? != TELEMETRY_CLASS {
        return None;
    }

    let organization_id = tokens.next()?;
    let device_id = tokens.next()?;
    let sensor_name = tokens.next()?;
    if tokens.next().is_some() || [organization_id, device_id, sensor_name].contains(&"") {
        return None;
    }

    Some(TelemetrySubject {
        organization_id: organization_id.to_string(),
        device_id: device_id.to_string(),
        sensor_name: sensor_name.to_string(),
    })
}

/// NATS subject matching: `*` matches one token, a trailing `>` matches one or more
pub fn subject_matches(pattern: &str, subject: &str) -> bool {
    let mut pattern_tokens = pattern.split('.');
    let mut subject_tokens = subject.split('.');

    loop {
        match (pattern_tokens.next(), subject_tokens.next()) {
            (Some(">"), Some(token)) => return pattern_tokens.next().is_none() && !token.is_empty(),
            (Some("*"), Some(token)) if !token.is_empty() => continue,
            (Some(p), Some(s)) if p == s && !s.is_empty() => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}

fn is_valid_token(value: &str) -> bool {
    !value.is_empty()
        && !value
            .chars()
            .any(|c| c == '.' || c == '*' || c == '>' || c.is_whitespace() || c.is_control())
}

pub fn validate_organization_id(value: &str) -> DomainResult<()> {
    if is_valid_token(value) {
        Ok(())
    } else {
        Err(DomainError::InvalidOrganizationId(format!(
            "'{}' must be a non-empty subject token without '.', '*', '>' or whitespace",
            value
        )))
    }
}

pub fn validate_device_id(value: &str) -> DomainResult<()> {
    if is_valid_token(value) {
        Ok(())
    } else {
        Err(DomainError::InvalidDeviceId(format!(
            "'{}' must be a non-empty subject token without '.', '*', '>' or whitespace",
            value
        )))
    }
}

pub fn validate_sensor_name(value: &str) -> DomainResult<()> {
    if is_valid_token(value) {
        Ok(())
    } else {
        Err(DomainError::InvalidSensorName(format!(
            "'{}' must be a non-empty subject token without '.', '*', '>' or whitespace",
            value
        )))
    }
}
