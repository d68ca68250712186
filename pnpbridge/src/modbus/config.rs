//! Configuration for Modbus components.
//!
//! Each configured device carries a [`ModbusComponentConfig`] in its
//! `adapter_config`; the `pnp_adapters.modbus` block holds the
//! [`ModbusAdapterConfig`] shared by every component.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use pnpbridge_core::{BridgeError, DeviceDescription, Result};

/// Parameters shared by all Modbus components.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModbusAdapterConfig {
    /// Named register groups (reusable across devices)
    #[serde(default)]
    pub register_groups: HashMap<String, RegisterGroup>,

    /// Register name mappings, keyed by `<type>:<address>`
    #[serde(default)]
    pub register_names: HashMap<String, String>,
}

impl ModbusAdapterConfig {
    /// Parse the global adapter block; absent means empty.
    pub fn from_value(value: Option<&serde_json::Value>) -> Result<Self> {
        match value {
            Some(value) => Ok(serde_json::from_value(value.clone())?),
            None => Ok(Self::default()),
        }
    }
}

/// Configuration for a single Modbus component.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModbusComponentConfig {
    /// Connection type and address
    pub connection: ConnectionConfig,

    /// Modbus unit/slave ID (1-247)
    #[serde(default = "default_unit_id")]
    pub unit_id: u8,

    /// Poll interval in seconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Registers to poll (inline definition)
    #[serde(default)]
    pub registers: Vec<RegisterConfig>,

    /// Reference to a named register group
    #[serde(default)]
    pub register_group: Option<String>,

    /// Connection timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_unit_id() -> u8 {
    1
}

fn default_poll_interval() -> u64 {
    10
}

fn default_timeout_ms() -> u64 {
    1000
}

/// Connection configuration (TCP or RTU).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ConnectionConfig {
    /// Modbus TCP connection
    Tcp {
        /// Host address (IP or hostname)
        host: String,
        /// TCP port (default: 502)
        #[serde(default = "default_modbus_port")]
        port: u16,
    },
    /// Modbus RTU (serial) connection
    Rtu {
        /// Serial port path; taken from the discovered device when empty
        #[serde(default)]
        port: String,
        #[serde(default = "default_baud_rate")]
        baud_rate: u32,
        #[serde(default = "default_data_bits")]
        data_bits: u8,
        /// "none", "even" or "odd"
        #[serde(default = "default_parity")]
        parity: String,
        #[serde(default = "default_stop_bits")]
        stop_bits: u8,
    },
}

fn default_modbus_port() -> u16 {
    502
}

fn default_baud_rate() -> u32 {
    9600
}

fn default_data_bits() -> u8 {
    8
}

fn default_parity() -> String {
    "none".to_string()
}

fn default_stop_bits() -> u8 {
    1
}

/// A group of registers to poll together.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterGroup {
    pub registers: Vec<RegisterConfig>,
}

/// Configuration for a register or range of registers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterConfig {
    #[serde(rename = "type")]
    pub register_type: RegisterType,

    /// Starting address (0-based)
    pub address: u16,

    /// Number of values to read (default: 1)
    #[serde(default = "default_count")]
    pub count: u16,

    /// Telemetry name for this register
    pub name: Option<String>,

    /// Data type interpretation for holding/input registers
    #[serde(default)]
    pub data_type: DataType,

    /// Scaling factor (value * scale)
    #[serde(default = "default_scale")]
    pub scale: f64,

    /// Offset (value * scale + offset)
    #[serde(default)]
    pub offset: f64,

    /// Unit of measurement, reported as a label
    pub unit: Option<String>,
}

impl RegisterConfig {
    /// Number of addresses the read covers. Coils and discrete inputs are
    /// one address per value.
    pub fn span(&self) -> u32 {
        match self.register_type {
            RegisterType::Coil | RegisterType::Discrete => self.count as u32,
            RegisterType::Input | RegisterType::Holding => {
                self.count as u32 * self.data_type.width() as u32
            }
        }
    }
}

fn default_count() -> u16 {
    1
}

fn default_scale() -> f64 {
    1.0
}

/// Modbus register types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegisterType {
    /// Discrete output coils (read/write, 1-bit)
    Coil,
    /// Discrete input contacts (read-only, 1-bit)
    Discrete,
    /// Input registers (read-only, 16-bit)
    Input,
    /// Holding registers (read/write, 16-bit)
    Holding,
}

impl RegisterType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RegisterType::Coil => "coil",
            RegisterType::Discrete => "discrete",
            RegisterType::Input => "input",
            RegisterType::Holding => "holding",
        }
    }
}

/// Data type interpretation for 16-bit registers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    #[default]
    U16,
    I16,
    /// 2 registers, big-endian word order
    U32,
    I32,
    F32,
    /// 2 registers, little-endian word order
    U32Le,
    I32Le,
    F32Le,
}

impl DataType {
    /// Number of 16-bit registers one value occupies.
    pub fn width(&self) -> u16 {
        match self {
            DataType::U16 | DataType::I16 => 1,
            _ => 2,
        }
    }
}

const MODBUS_ADDRESS_SPACE: u32 = 0x1_0000;

impl ModbusComponentConfig {
    /// Parse a component's `adapter_config`, filling an empty RTU port from
    /// the discovered device's `port` parameter.
    pub fn from_request(
        config: &serde_json::Value,
        device: Option<&DeviceDescription>,
    ) -> Result<Self> {
        let mut parsed: ModbusComponentConfig = serde_json::from_value(config.clone())?;

        if let ConnectionConfig::Rtu { port, .. } = &mut parsed.connection {
            if port.is_empty() {
                *port = device
                    .and_then(|d| d.parameter("port"))
                    .ok_or_else(|| BridgeError::invalid("rtu connection has no serial port"))?;
            }
        }
        Ok(parsed)
    }

    /// Validate against the shared adapter parameters.
    pub fn validate(&self, adapter: &ModbusAdapterConfig) -> Result<()> {
        if self.unit_id == 0 || self.unit_id > 247 {
            return Err(BridgeError::invalid("unit_id must be 1-247"));
        }
        if self.poll_interval_secs == 0 {
            return Err(BridgeError::invalid("poll_interval_secs must be at least 1"));
        }
        if self.registers.is_empty() && self.register_group.is_none() {
            return Err(BridgeError::invalid(
                "must specify either registers or register_group",
            ));
        }
        if let Some(group) = &self.register_group {
            if !adapter.register_groups.contains_key(group) {
                return Err(BridgeError::invalid(format!(
                    "unknown register_group '{}'",
                    group
                )));
            }
        }
        for register in self.all_registers(&adapter.register_groups) {
            if register.count == 0 {
                return Err(BridgeError::invalid(format!(
                    "{} register at {} has a zero count",
                    register.register_type.as_str(),
                    register.address
                )));
            }
            if register.address as u32 + register.span() > MODBUS_ADDRESS_SPACE {
                return Err(BridgeError::invalid(format!(
                    "{} register at {} with count {} runs past address 65535",
                    register.register_type.as_str(),
                    register.address,
                    register.count
                )));
            }
        }
        if let ConnectionConfig::Rtu { parity, .. } = &self.connection {
            match parity.to_lowercase().as_str() {
                "none" | "even" | "odd" => {}
                _ => {
                    return Err(BridgeError::invalid(format!(
                        "invalid parity '{}' (use none, even, or odd)",
                        parity
                    )));
                }
            }
        }
        Ok(())
    }

    /// Inline registers followed by those of the referenced group.
    pub fn all_registers(&self, groups: &HashMap<String, RegisterGroup>) -> Vec<RegisterConfig> {
        let mut registers = self.registers.clone();
        if let Some(group) = self.register_group.as_ref().and_then(|name| groups.get(name)) {
            registers.extend(group.registers.iter().cloned());
        }
        registers
    }
}
