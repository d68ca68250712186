//! Configuration for the pnpbridge binary.
//!
//! One JSON5 file carries both the process settings (logging, Zenoh session,
//! cloud connection) and the bridge core configuration (devices, adapter
//! parameters, reconciliation policy).

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use pnpbridge_common::{Format, KEY_PREFIX, LoggingConfig, ZenohConfig};
use pnpbridge_core::{BridgeConfiguration, BridgeError};

/// Environment variable read by the `host_injected` connection mode by default.
pub const DEFAULT_CONNECTION_ENV: &str = "PNPBRIDGE_CONNECTION_STRING";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] json5::Error),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

/// Complete configuration file.
#[derive(Debug, Clone)]
pub struct PnpBridgeConfig {
    pub logging: LoggingConfig,
    /// Base Zenoh session settings; connection endpoints are added on top.
    pub zenoh: ZenohConfig,
    pub connection: ConnectionConfig,
    pub twin: TwinSettings,
    pub bridge: BridgeConfiguration,
}

/// Process-level sections of the file. Everything else belongs to the core.
#[derive(Debug, Clone, Deserialize)]
struct ProcessSections {
    #[serde(default)]
    logging: LoggingConfig,
    #[serde(default)]
    zenoh: ZenohConfig,
    connection: ConnectionConfig,
    #[serde(default)]
    twin: TwinSettings,
}

/// Twin key layout and payload encoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TwinSettings {
    /// Key expression prefix (default: "pnpbridge").
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Payload format: "json" or "cbor".
    #[serde(default)]
    pub format: Format,
}

fn default_key_prefix() -> String {
    KEY_PREFIX.to_string()
}

impl Default for TwinSettings {
    fn default() -> Self {
        Self {
            key_prefix: default_key_prefix(),
            format: Format::default(),
        }
    }
}

/// How the bridge finds its cloud identity and endpoint. Chosen once at start-up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ConnectionConfig {
    /// `DeviceId=<id>;Endpoint=<zenoh endpoint>[;Scope=<scope>]`
    ConnectionString { connection_string: String },
    /// Device provisioning against a global endpoint.
    Provisioning {
        global_endpoint: String,
        id_scope: String,
        device_id: String,
    },
    /// Connection string injected by the host through an environment variable.
    HostInjected {
        #[serde(default = "default_connection_env")]
        env_var: String,
    },
}

fn default_connection_env() -> String {
    DEFAULT_CONNECTION_ENV.to_string()
}

/// The cloud identity the twin client connects as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedConnection {
    pub device_id: String,
    pub endpoints: Vec<String>,
    pub scope: Option<String>,
}

impl ConnectionConfig {
    /// Resolve to a device identity; `lookup` reads environment variables.
    pub fn resolve(
        &self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<ResolvedConnection, ConfigError> {
        match self {
            ConnectionConfig::ConnectionString { connection_string } => {
                parse_connection_string(connection_string)
            }
            ConnectionConfig::Provisioning {
                global_endpoint,
                id_scope,
                device_id,
            } => {
                if device_id.is_empty() || id_scope.is_empty() || global_endpoint.is_empty() {
                    return Err(ConfigError::Validation(
                        "provisioning requires global_endpoint, id_scope and device_id".to_string(),
                    ));
                }
                Ok(ResolvedConnection {
                    device_id: device_id.clone(),
                    endpoints: vec![global_endpoint.clone()],
                    scope: Some(id_scope.clone()),
                })
            }
            ConnectionConfig::HostInjected { env_var } => {
                let connection_string = lookup(env_var).ok_or_else(|| {
                    ConfigError::Validation(format!(
                        "environment variable '{}' is not set",
                        env_var
                    ))
                })?;
                parse_connection_string(&connection_string)
            }
        }
    }
}

/// Parse `Key=Value` pairs separated by `;`. Keys are case-insensitive;
/// `Endpoint` may repeat.
pub fn parse_connection_string(input: &str) -> Result<ResolvedConnection, ConfigError> {
    let mut device_id = None;
    let mut endpoints = Vec::new();
    let mut scope = None;

    for pair in input.split(';').map(str::trim).filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').ok_or_else(|| {
            ConfigError::Validation(format!("malformed connection string segment '{}'", pair))
        })?;
        let value = value.trim().to_string();
        match key.trim().to_ascii_lowercase().as_str() {
            "deviceid" => device_id = Some(value),
            "endpoint" => endpoints.push(value),
            "scope" => scope = Some(value),
            other => {
                tracing::debug!(key = %other, "Ignoring unknown connection string key");
            }
        }
    }

    let device_id = device_id.filter(|id| !id.is_empty()).ok_or_else(|| {
        ConfigError::Validation("connection string is missing DeviceId".to_string())
    })?;

    Ok(ResolvedConnection {
        device_id,
        endpoints,
        scope,
    })
}

impl PnpBridgeConfig {
    /// Load configuration from a JSON5 file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse and validate a JSON5 document.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let process: ProcessSections = json5::from_str(content)?;
        let bridge = BridgeConfiguration::parse(content)?;

        let config = Self {
            logging: process.logging,
            zenoh: process.zenoh,
            connection: process.connection,
            twin: process.twin,
            bridge,
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate the process-level sections.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.twin.key_prefix.trim_matches('/').is_empty() {
            return Err(ConfigError::Validation(
                "twin.key_prefix cannot be empty".to_string(),
            ));
        }
        pnpbridge_common::build_zenoh_config(&self.zenoh)
            .map_err(|e| ConfigError::Validation(e.to_string()))?;
        Ok(())
    }
}
