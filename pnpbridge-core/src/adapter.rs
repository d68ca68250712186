//! Protocol adapter plugin interface.
//!
//! A protocol adapter is a factory registered in the manifest. The bridge
//! creates one [`AdapterInstance`] per adapter identity the first time a
//! configured device needs it, and one [`PnpComponent`] per bound device.
//! The component returned by [`AdapterInstance::create_component`] is also
//! its command and property handler, so it can be routed to as soon as the
//! call returns.

use crate::cloud::TwinClientHandle;
use crate::error::{BridgeError, Result};
use crate::message::PnpMessage;

/// Arguments for creating one component.
#[derive(Debug, Clone, Copy)]
pub struct ComponentRequest<'a> {
    pub component_name: &'a str,
    pub interface_id: &'a str,
    /// `adapter_config` of the matching configured device.
    pub config: &'a serde_json::Value,
    /// The device message that triggered the creation.
    pub message: &'a PnpMessage,
}

/// Factory registered in the adapter manifest.
pub trait ProtocolAdapter: Send + Sync {
    /// Unique identity, referenced by `pnp_adapter` in device configuration.
    fn identity(&self) -> &str;

    /// Create the adapter instance with its global parameters.
    fn create_adapter(
        &self,
        global_config: Option<&serde_json::Value>,
    ) -> Result<Box<dyn AdapterInstance>>;
}

/// A live protocol adapter owning zero or more components.
pub trait AdapterInstance: Send + Sync {
    /// Create a component for a matched device.
    fn create_component(&self, request: ComponentRequest<'_>) -> Result<Box<dyn PnpComponent>>;

    /// Release the adapter. Called once, after all of its components are destroyed.
    fn destroy(&self) -> Result<()>;
}

/// One device exposed as a twin component.
///
/// Lifecycle: `start` once a twin client is available, `stop`, then `destroy`.
pub trait PnpComponent: Send + Sync {
    /// Start talking to the device; `client` stays valid across reconnects.
    fn start(&self, client: TwinClientHandle) -> Result<()>;

    fn stop(&self) -> Result<()>;

    fn destroy(&self) -> Result<()>;

    /// Handle a cloud command; the returned value is the command response.
    fn handle_command(
        &self,
        command: &str,
        _payload: &serde_json::Value,
    ) -> Result<serde_json::Value> {
        Err(BridgeError::not_supported(format!("command '{}'", command)))
    }

    /// Handle a desired property update.
    fn handle_property_update(
        &self,
        property: &str,
        _value: &serde_json::Value,
        _version: u64,
    ) -> Result<()> {
        Err(BridgeError::not_supported(format!("property '{}'", property)))
    }
}
