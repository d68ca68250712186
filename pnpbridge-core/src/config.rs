//! Bridge configuration: configured devices, adapter parameters and the
//! reconciliation policy.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, Result};

/// How a device entry selects discovered devices.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchType {
    /// Every `match_parameters` value must be contained in the device's value.
    #[default]
    #[serde(rename = "exact")]
    Exact,
    /// Matches any device reported by the entry's discovery adapter.
    #[serde(rename = "*", alias = "wildcard")]
    Wildcard,
}

/// Match filter of a configured device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchFilter {
    #[serde(default)]
    pub match_type: MatchType,
    #[serde(default)]
    pub match_parameters: BTreeMap<String, String>,
}

/// Discovery adapter parameters attached to a configured device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryParameters {
    /// Identity of the discovery adapter that reports this device.
    pub identity: String,
    /// Adapter-specific parameters.
    #[serde(flatten)]
    pub parameters: serde_json::Map<String, serde_json::Value>,
}

/// One configured device (component definition).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfigEntry {
    /// Component name; unique across the bridge.
    pub component_name: String,

    /// Interface id registered with the cloud (defaults to the component name).
    #[serde(default)]
    pub interface_id: Option<String>,

    /// The device publishes its own interface id in the discovery message.
    #[serde(default)]
    pub self_describing: bool,

    /// Identity of the protocol adapter that owns the component.
    pub pnp_adapter: String,

    /// Protocol adapter arguments for this component.
    #[serde(default)]
    pub adapter_config: serde_json::Value,

    /// Discovery adapter that reports the device.
    #[serde(default)]
    pub discovery_adapter: Option<DiscoveryParameters>,

    #[serde(default)]
    pub match_filters: MatchFilter,
}

impl DeviceConfigEntry {
    /// Identity of the discovery adapter, if the entry pins one.
    pub fn discovery_identity(&self) -> Option<&str> {
        self.discovery_adapter
            .as_ref()
            .map(|params| params.identity.as_str())
    }

    /// Interface id for a statically configured device.
    pub fn resolved_interface_id(&self) -> &str {
        self.interface_id
            .as_deref()
            .unwrap_or(self.component_name.as_str())
    }
}

/// Registration wait and retry policy for reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcilePolicy {
    /// How long to wait for the registration completion callback.
    #[serde(default = "default_registration_timeout_ms")]
    pub registration_timeout_ms: u64,

    /// Delay before the first retry after a failed reconciliation.
    #[serde(default = "default_retry_initial_ms")]
    pub retry_initial_ms: u64,

    /// Upper bound for the retry delay.
    #[serde(default = "default_retry_max_ms")]
    pub retry_max_ms: u64,
}

fn default_registration_timeout_ms() -> u64 {
    30_000
}

fn default_retry_initial_ms() -> u64 {
    1_000
}

fn default_retry_max_ms() -> u64 {
    60_000
}

impl Default for ReconcilePolicy {
    fn default() -> Self {
        Self {
            registration_timeout_ms: default_registration_timeout_ms(),
            retry_initial_ms: default_retry_initial_ms(),
            retry_max_ms: default_retry_max_ms(),
        }
    }
}

impl ReconcilePolicy {
    pub fn registration_timeout(&self) -> Duration {
        Duration::from_millis(self.registration_timeout_ms)
    }

    /// Delay before retry number `failures` (1-based), doubling up to the cap.
    pub fn retry_delay(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(20);
        let delay = self
            .retry_initial_ms
            .saturating_mul(1u64 << exponent)
            .min(self.retry_max_ms.max(self.retry_initial_ms));
        Duration::from_millis(delay)
    }
}

/// Everything the bridge core needs from the configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BridgeConfiguration {
    /// Configured devices.
    #[serde(default)]
    pub devices: Vec<DeviceConfigEntry>,

    /// Global parameters per discovery adapter identity.
    #[serde(default)]
    pub discovery_adapters: BTreeMap<String, serde_json::Value>,

    /// Global parameters per protocol adapter identity.
    #[serde(default)]
    pub pnp_adapters: BTreeMap<String, serde_json::Value>,

    #[serde(default)]
    pub reconciliation: ReconcilePolicy,
}

impl BridgeConfiguration {
    /// Load configuration from a JSON5 file and validate it.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(BridgeError::ConfigNotFound {
                path: path.display().to_string(),
            });
        }

        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse configuration from a JSON5 string and validate it.
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = json5::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();

        for device in &self.devices {
            let name = device.component_name.as_str();
            if name.is_empty() {
                return Err(BridgeError::validation("component_name cannot be empty"));
            }
            if name.contains(['/', '*', '$', '?', '#']) || name == "@" {
                return Err(BridgeError::validation(format!(
                    "Device '{}': component_name contains reserved characters",
                    name
                )));
            }
            if !names.insert(name) {
                return Err(BridgeError::duplicate(format!(
                    "component '{}' is configured more than once",
                    name
                )));
            }
            if device.pnp_adapter.is_empty() {
                return Err(BridgeError::validation(format!(
                    "Device '{}': pnp_adapter cannot be empty",
                    name
                )));
            }
            if device
                .discovery_adapter
                .as_ref()
                .is_some_and(|discovery| discovery.identity.is_empty())
            {
                return Err(BridgeError::validation(format!(
                    "Device '{}': discovery_adapter.identity cannot be empty",
                    name
                )));
            }
            if device.match_filters.match_type == MatchType::Exact
                && device.match_filters.match_parameters.is_empty()
            {
                return Err(BridgeError::validation(format!(
                    "Device '{}': exact match_filters require match_parameters",
                    name
                )));
            }
            if device.self_describing && device.interface_id.is_some() {
                return Err(BridgeError::validation(format!(
                    "Device '{}': self-describing devices cannot pin an interface_id",
                    name
                )));
            }
        }

        let policy = &self.reconciliation;
        if policy.registration_timeout_ms == 0 {
            return Err(BridgeError::validation(
                "reconciliation.registration_timeout_ms must be positive",
            ));
        }
        if policy.retry_initial_ms == 0 {
            return Err(BridgeError::validation(
                "reconciliation.retry_initial_ms must be positive",
            ));
        }

        Ok(())
    }

    /// Serialized per-device parameters for a discovery adapter.
    pub fn discovery_device_parameters(&self, identity: &str) -> Result<Vec<String>> {
        self.devices
            .iter()
            .filter_map(|device| device.discovery_adapter.as_ref())
            .filter(|params| params.identity == identity)
            .map(|params| serde_json::to_string(params).map_err(BridgeError::from))
            .collect()
    }

    /// Serialized global parameters for a discovery adapter.
    pub fn discovery_adapter_parameters(&self, identity: &str) -> Result<Option<String>> {
        self.discovery_adapters
            .get(identity)
            .map(|value| serde_json::to_string(value).map_err(BridgeError::from))
            .transpose()
    }

    /// Discovery adapter identities named by at least one device, deduplicated in order.
    pub fn discovery_identities(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.devices
            .iter()
            .filter_map(DeviceConfigEntry::discovery_identity)
            .filter(|identity| seen.insert(*identity))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        discovery_adapters: {
            serial: { scan_interval_ms: 500 },
        },
        pnp_adapters: {
            modbus: { default_poll_interval_secs: 5 },
        },
        devices: [
            {
                component_name: "env_sensor",
                interface_id: "urn:contoso:env_sensor:1",
                pnp_adapter: "modbus",
                adapter_config: { unit_id: 3 },
                discovery_adapter: { identity: "serial", port_filter: "ttyUSB" },
                match_filters: {
                    match_type: "exact",
                    match_parameters: { vid: "0403" },
                },
            },
            {
                component_name: "camera",
                pnp_adapter: "camera",
                self_describing: true,
                match_filters: { match_type: "*" },
            },
        ],
        reconciliation: { registration_timeout_ms: 5000 },
    }"#;

    #[test]
    fn test_parse_sample() {
        let config = BridgeConfiguration::parse(SAMPLE).unwrap();

        assert_eq!(config.devices.len(), 2);
        let sensor = &config.devices[0];
        assert_eq!(sensor.discovery_identity(), Some("serial"));
        assert_eq!(sensor.resolved_interface_id(), "urn:contoso:env_sensor:1");
        assert_eq!(sensor.match_filters.match_type, MatchType::Exact);
        assert_eq!(sensor.adapter_config["unit_id"].as_f64(), Some(3.0));

        let camera = &config.devices[1];
        assert_eq!(camera.match_filters.match_type, MatchType::Wildcard);
        assert_eq!(camera.resolved_interface_id(), "camera");
        assert!(camera.self_describing);

        assert_eq!(config.reconciliation.registration_timeout_ms, 5000);
        assert_eq!(config.reconciliation.retry_initial_ms, 1000);
    }

    #[test]
    fn test_discovery_parameters_are_serialized() {
        let config = BridgeConfiguration::parse(SAMPLE).unwrap();

        let devices = config.discovery_device_parameters("serial").unwrap();
        assert_eq!(devices.len(), 1);
        let parsed: serde_json::Value = serde_json::from_str(&devices[0]).unwrap();
        assert_eq!(parsed["identity"], "serial");
        assert_eq!(parsed["port_filter"], "ttyUSB");

        let global = config.discovery_adapter_parameters("serial").unwrap();
        let global: serde_json::Value = serde_json::from_str(&global.unwrap()).unwrap();
        assert_eq!(global["scan_interval_ms"].as_f64(), Some(500.0));
        assert!(config.discovery_adapter_parameters("none").unwrap().is_none());
        assert_eq!(config.discovery_identities(), vec!["serial"]);
    }

    #[test]
    fn test_duplicate_component_rejected() {
        let result = BridgeConfiguration::parse(
            r#"{ devices: [
                { component_name: "c1", pnp_adapter: "a", match_filters: { match_type: "*" } },
                { component_name: "c1", pnp_adapter: "b", match_filters: { match_type: "*" } },
            ] }"#,
        );
        assert!(matches!(result, Err(BridgeError::DuplicateEntry(_))));
    }

    #[test]
    fn test_exact_without_parameters_rejected() {
        let result = BridgeConfiguration::parse(
            r#"{ devices: [ { component_name: "c1", pnp_adapter: "a" } ] }"#,
        );
        assert!(matches!(result, Err(BridgeError::ConfigValidation(_))));
    }

    #[test]
    fn test_self_describing_with_interface_rejected() {
        let result = BridgeConfiguration::parse(
            r#"{ devices: [ {
                component_name: "c1", pnp_adapter: "a", self_describing: true,
                interface_id: "urn:x", match_filters: { match_type: "*" },
            } ] }"#,
        );
        assert!(matches!(result, Err(BridgeError::ConfigValidation(_))));
    }

    #[test]
    fn test_reserved_characters_rejected() {
        let result = BridgeConfiguration::parse(
            r#"{ devices: [ { component_name: "a/b", pnp_adapter: "a", match_filters: { match_type: "*" } } ] }"#,
        );
        assert!(matches!(result, Err(BridgeError::ConfigValidation(_))));
    }

    #[test]
    fn test_config_not_found() {
        let result = BridgeConfiguration::load("/nonexistent/pnpbridge.json5");
        assert!(matches!(result, Err(BridgeError::ConfigNotFound { .. })));
    }

    #[test]
    fn test_retry_delay_doubles_and_caps() {
        let policy = ReconcilePolicy {
            registration_timeout_ms: 1000,
            retry_initial_ms: 100,
            retry_max_ms: 1000,
        };
        assert_eq!(policy.retry_delay(1), Duration::from_millis(100));
        assert_eq!(policy.retry_delay(2), Duration::from_millis(200));
        assert_eq!(policy.retry_delay(4), Duration::from_millis(800));
        assert_eq!(policy.retry_delay(5), Duration::from_millis(1000));
        assert_eq!(policy.retry_delay(64), Duration::from_millis(1000));
    }
}
