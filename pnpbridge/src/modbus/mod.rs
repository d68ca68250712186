//! Modbus protocol adapter.
//!
//! Every bound device becomes a component that polls its registers on an
//! interval and sends the decoded values as component telemetry. Components
//! accept the `poll` command and a writable `poll_interval_secs` property.

pub mod config;
pub mod poller;

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use tokio::task::JoinHandle;

use pnpbridge_core::{
    AdapterInstance, BridgeError, ComponentRequest, PnpComponent, ProtocolAdapter, Result,
    TwinClientHandle,
};

pub use config::{ModbusAdapterConfig, ModbusComponentConfig};
pub use poller::{ModbusPoller, PollControl, PollerError};

use config::RegisterConfig;

pub const IDENTITY: &str = "modbus";

/// Property that changes the poll interval at runtime.
pub const POLL_INTERVAL_PROPERTY: &str = "poll_interval_secs";

#[derive(Debug, Default)]
pub struct ModbusAdapter;

impl ModbusAdapter {
    pub fn new() -> Self {
        Self
    }
}

impl ProtocolAdapter for ModbusAdapter {
    fn identity(&self) -> &str {
        IDENTITY
    }

    fn create_adapter(
        &self,
        global_config: Option<&serde_json::Value>,
    ) -> Result<Box<dyn AdapterInstance>> {
        let config = ModbusAdapterConfig::from_value(global_config)?;
        tracing::debug!(
            register_groups = config.register_groups.len(),
            register_names = config.register_names.len(),
            "Modbus adapter created"
        );
        Ok(Box::new(ModbusInstance { config }))
    }
}

struct ModbusInstance {
    config: ModbusAdapterConfig,
}

impl AdapterInstance for ModbusInstance {
    fn create_component(&self, request: ComponentRequest<'_>) -> Result<Box<dyn PnpComponent>> {
        let device = request.message.description().ok();
        let config = ModbusComponentConfig::from_request(request.config, device.as_ref())?;
        config.validate(&self.config)?;

        let registers = config.all_registers(&self.config.register_groups);
        Ok(Box::new(ModbusComponent {
            name: request.component_name.to_string(),
            control: PollControl::new(config.poll_interval_secs),
            config,
            registers,
            register_names: self.config.register_names.clone(),
            task: Mutex::new(None),
        }))
    }

    fn destroy(&self) -> Result<()> {
        Ok(())
    }
}

struct ModbusComponent {
    name: String,
    config: ModbusComponentConfig,
    registers: Vec<RegisterConfig>,
    register_names: HashMap<String, String>,
    control: PollControl,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl PnpComponent for ModbusComponent {
    fn start(&self, client: TwinClientHandle) -> Result<()> {
        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if task.is_some() {
            return Err(BridgeError::invalid(format!(
                "component '{}' is already polling",
                self.name
            )));
        }

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| BridgeError::with_context("no async runtime for poller", e))?;
        let poller = ModbusPoller::new(
            self.name.clone(),
            self.config.clone(),
            self.registers.clone(),
            self.register_names.clone(),
            client,
            self.control.clone(),
        );
        *task = Some(runtime.spawn(poller.run()));
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        if let Some(task) = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
            tracing::debug!(component = %self.name, "Modbus poller stopped");
        }
        Ok(())
    }

    fn destroy(&self) -> Result<()> {
        self.stop()
    }

    fn handle_command(&self, command: &str, _payload: &serde_json::Value) -> Result<serde_json::Value> {
        match command {
            "poll" => {
                self.control.poll_now();
                Ok(serde_json::json!({ "requested": true }))
            }
            other => Err(BridgeError::not_supported(format!("command '{}'", other))),
        }
    }

    fn handle_property_update(
        &self,
        property: &str,
        value: &serde_json::Value,
        version: u64,
    ) -> Result<()> {
        if property != POLL_INTERVAL_PROPERTY {
            return Err(BridgeError::not_supported(format!("property '{}'", property)));
        }
        let secs = value
            .as_u64()
            .filter(|secs| *secs >= 1)
            .ok_or_else(|| BridgeError::invalid("poll_interval_secs must be an integer >= 1"))?;

        self.control.set_interval_secs(secs);
        tracing::info!(component = %self.name, secs, version, "Poll interval updated");
        Ok(())
    }
}
