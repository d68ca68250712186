//! Device-change messages reported by discovery adapters.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, Result};

/// Kind of device change carried by a [`PnpMessage`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    /// A device appeared.
    #[default]
    Arrival,
    /// A device disappeared.
    Removal,
}

/// Opaque context attached by the discoverer and handed to the protocol adapter.
pub type DeviceContext = Arc<dyn Any + Send + Sync>;

/// Properties attached to a device-change message.
#[derive(Clone, Default)]
pub struct MessageProperties {
    /// Component name, written by the matcher.
    pub component_name: Option<String>,
    /// Discoverer-supplied context.
    pub context: Option<DeviceContext>,
    /// Arrival or removal.
    pub change_type: ChangeType,
    /// Identity of the discovery adapter that reported the message.
    pub discovery_identity: Option<String>,
}

impl fmt::Debug for MessageProperties {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageProperties")
            .field("component_name", &self.component_name)
            .field("context", &self.context.as_ref().map(|_| "<opaque>"))
            .field("change_type", &self.change_type)
            .field("discovery_identity", &self.discovery_identity)
            .finish()
    }
}

/// The device description carried in a message payload.
///
/// Only `match_parameters` is interpreted by the bridge; any other field is
/// preserved for the protocol adapter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceDescription {
    /// Identity of the reporting discovery adapter, if the discoverer sets it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<String>,
    /// Properties used to match the device against configuration.
    #[serde(default)]
    pub match_parameters: BTreeMap<String, serde_json::Value>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl DeviceDescription {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_parameter(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.match_parameters.insert(key.into(), value.into());
        self
    }

    /// A match parameter rendered as text (strings unquoted).
    pub fn parameter(&self, key: &str) -> Option<String> {
        self.match_parameters.get(key).map(|value| match value {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }
}

/// One device-change event travelling from a discovery adapter to the bridge.
///
/// The payload is immutable once the message is built. Ownership moves into
/// the message queue on enqueue; the matcher fills in `interface_id` and the
/// component name.
#[derive(Debug, Clone)]
pub struct PnpMessage {
    payload: String,
    interface_id: Option<String>,
    properties: MessageProperties,
}

impl PnpMessage {
    /// Create a message from a serialized device description.
    pub fn new(payload: impl Into<String>, change_type: ChangeType) -> Result<Self> {
        let payload = payload.into();
        if payload.trim().is_empty() {
            return Err(BridgeError::invalid("message payload cannot be empty"));
        }
        Ok(Self {
            payload,
            interface_id: None,
            properties: MessageProperties {
                change_type,
                ..Default::default()
            },
        })
    }

    /// Create an arrival message from a device description.
    pub fn arrival(description: &DeviceDescription) -> Result<Self> {
        Self::new(serde_json::to_string(description)?, ChangeType::Arrival)
    }

    /// Create a removal message from a device description.
    pub fn removal(description: &DeviceDescription) -> Result<Self> {
        Self::new(serde_json::to_string(description)?, ChangeType::Removal)
    }

    /// Set the interface id up front (self-describing devices).
    pub fn with_interface_id(mut self, interface_id: impl Into<String>) -> Self {
        self.interface_id = Some(interface_id.into());
        self
    }

    /// Attach discoverer context.
    pub fn with_context(mut self, context: DeviceContext) -> Self {
        self.properties.context = Some(context);
        self
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    /// Parse the payload as a [`DeviceDescription`].
    pub fn description(&self) -> Result<DeviceDescription> {
        serde_json::from_str(&self.payload)
            .map_err(|e| BridgeError::invalid(format!("malformed device description: {}", e)))
    }

    pub fn interface_id(&self) -> Option<&str> {
        self.interface_id.as_deref()
    }

    pub fn component_name(&self) -> Option<&str> {
        self.properties.component_name.as_deref()
    }

    pub fn change_type(&self) -> ChangeType {
        self.properties.change_type
    }

    pub fn discovery_identity(&self) -> Option<&str> {
        self.properties.discovery_identity.as_deref()
    }

    pub fn context(&self) -> Option<&DeviceContext> {
        self.properties.context.as_ref()
    }

    pub fn properties(&self) -> &MessageProperties {
        &self.properties
    }

    pub(crate) fn bind(&mut self, interface_id: String, component_name: String) {
        self.interface_id = Some(interface_id);
        self.properties.component_name = Some(component_name);
    }

    pub(crate) fn stamp_discovery_identity(&mut self, identity: &str) {
        self.properties.discovery_identity = Some(identity.to_string());
    }
}
