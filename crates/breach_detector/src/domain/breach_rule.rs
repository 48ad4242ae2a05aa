use anyhow::{bail, Context};
use serde::Deserialize;
use std::collections::HashMap;

/// Breach predicate for one sensor: `consecutive_count` readings in a row above
/// `threshold` raise an alert carrying `condition`
#[derive(Debug, Clone, PartialEq)]
pub struct BreachRule {
    pub sensor_name: String,
    pub threshold: f64,
    pub consecutive_count: u64,
    pub condition: String,
}

impl BreachRule {
    pub fn is_breach(&self, value: f64) -> bool {
        value > self.threshold
    }
}

/// One entry of the JSON override list.
///
/// `device_id` narrows the override to a single device; without it the rule applies
/// to the whole organization.
#[derive(Debug, Clone, Deserialize)]
pub struct BreachRuleOverride {
    pub organization_id: String,
    #[serde(default)]
    pub device_id: Option<String>,
    pub sensor_name: String,
    pub threshold: f64,
    pub consecutive_count: u64,
    #[serde(default)]
    pub condition: Option<String>,
}

/// Monitored sensors and their predicates.
///
/// Lookup precedence: device override, then organization override, then the defaults.
#[derive(Debug, Clone, Default)]
pub struct BreachRuleTable {
    defaults: HashMap<String, BreachRule>,
    organizations: HashMap<(String, String), BreachRule>,
    devices: HashMap<(String, String, String), BreachRule>,
}

impl BreachRuleTable {
    pub fn new(defaults: Vec<BreachRule>) -> anyhow::Result<Self> {
        let mut table = Self::default();
        for rule in defaults {
            validate(&rule)?;
            table.defaults.insert(rule.sensor_name.clone(), rule);
        }
        Ok(table)
    }

    /// Default rule plus overrides parsed from a JSON array of `BreachRuleOverride`.
    /// Overrides without a condition inherit the default rule's condition text.
    pub fn from_config(default_rule: BreachRule, overrides_json: &str) -> anyhow::Result<Self> {
        let default_condition = default_rule.condition.clone();
        let mut table = Self::new(vec![default_rule])?;

        if overrides_json.trim().is_empty() {
            return Ok(table);
        }

        let overrides: Vec<BreachRuleOverride> =
            serde_json::from_str(overrides_json).context("failed to parse breach rule overrides")?;

        for entry in overrides {
            let rule = BreachRule {
                sensor_name: entry.sensor_name,
                threshold: entry.threshold,
                consecutive_count: entry.consecutive_count,
                condition: entry.condition.unwrap_or_else(|| default_condition.clone()),
            };
            match entry.device_id {
                Some(device_id) => table.with_device_rule(&entry.organization_id, &device_id, rule)?,
                None => table.with_organization_rule(&entry.organization_id, rule)?,
            };
        }

        Ok(table)
    }

    pub fn with_organization_rule(
        &mut self,
        organization_id: &str,
        rule: BreachRule,
    ) -> anyhow::Result<&mut Self> {
        validate(&rule)?;
        self.organizations
            .insert((organization_id.to_string(), rule.sensor_name.clone()), rule);
        Ok(self)
    }

    pub fn with_device_rule(
        &mut self,
        organization_id: &str,
        device_id: &str,
        rule: BreachRule,
    ) -> anyhow::Result<&mut Self> {
        validate(&rule)?;
        self.devices.insert(
            (
                organization_id.to_string(),
                device_id.to_string(),
                rule.sensor_name.clone(),
            ),
            rule,
        );
        Ok(self)
    }

    /// The rule governing this reading, or None when the sensor is not monitored
    pub fn lookup(&self, organization_id: &str, device_id: &str, sensor_name: &str) -> Option<&BreachRule> {
        let device_key = (
            organization_id.to_string(),
            device_id.to_string(),
            sensor_name.to_string(),
        );
        if let Some(rule) = self.devices.get(&device_key) {
            return Some(rule);
        }

        let organization_key = (organization_id.to_string(), sensor_name.to_string());
        self.organizations
            .get(&organization_key)
            .or_else(|| self.defaults.get(sensor_name))
    }
}

fn validate(rule: &BreachRule) -> anyhow::Result<()> {
    common::namespace::validate_sensor_name(&rule.sensor_name)?;
    if rule.consecutive_count == 0 {
        bail!(
            "breach rule for {} needs a consecutive count of at least 1",
            rule.sensor_name
        );
    }
    if !rule.threshold.is_finite() {
        bail!("breach rule for {} has a non-finite threshold", rule.sensor_name);
    }
    Ok(())
}
