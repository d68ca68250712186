//! Modbus device polling and telemetry delivery.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::Notify;
use tokio_modbus::client::{Context, Reader};
use tokio_modbus::prelude::*;
use tracing::{debug, info, warn};

use pnpbridge_common::{ComponentTelemetry, TelemetryValue};
use pnpbridge_core::{BridgeError, TwinClientHandle};

use super::config::{ConnectionConfig, DataType, ModbusComponentConfig, RegisterConfig, RegisterType};

/// Error type for polling operations.
#[derive(Debug, thiserror::Error)]
pub enum PollerError {
    #[error("Connection failed: {0}")]
    Connection(String),
    #[error("Read failed: {0}")]
    Read(String),
    #[error("Twin client error: {0}")]
    Twin(String),
}

/// Knobs shared between a running poller and its component.
#[derive(Debug, Clone)]
pub struct PollControl {
    interval_secs: Arc<AtomicU64>,
    trigger: Arc<Notify>,
}

impl PollControl {
    pub fn new(interval_secs: u64) -> Self {
        Self {
            interval_secs: Arc::new(AtomicU64::new(interval_secs)),
            trigger: Arc::new(Notify::new()),
        }
    }

    pub fn interval_secs(&self) -> u64 {
        self.interval_secs.load(Ordering::Relaxed)
    }

    /// Takes effect after the current sleep.
    pub fn set_interval_secs(&self, secs: u64) {
        self.interval_secs.store(secs, Ordering::Relaxed);
    }

    /// Wake the poller for an immediate cycle.
    pub fn poll_now(&self) {
        self.trigger.notify_one();
    }
}

/// A poller for a single Modbus component.
pub struct ModbusPoller {
    component: String,
    config: ModbusComponentConfig,
    registers: Vec<RegisterConfig>,
    register_names: HashMap<String, String>,
    client: TwinClientHandle,
    control: PollControl,
}

impl ModbusPoller {
    pub fn new(
        component: impl Into<String>,
        config: ModbusComponentConfig,
        registers: Vec<RegisterConfig>,
        register_names: HashMap<String, String>,
        client: TwinClientHandle,
        control: PollControl,
    ) -> Self {
        Self {
            component: component.into(),
            config,
            registers,
            register_names,
            client,
            control,
        }
    }

    /// Run the polling loop until the task is aborted.
    pub async fn run(self) {
        info!(
            component = %self.component,
            interval_secs = self.control.interval_secs(),
            "Starting Modbus poller"
        );

        loop {
            match self.poll_once().await {
                Ok(count) => debug!(component = %self.component, count, "Published telemetry"),
                Err(e) => warn!(component = %self.component, error = %e, "Polling error"),
            }

            let interval = Duration::from_secs(self.control.interval_secs().max(1));
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = self.control.trigger.notified() => {
                    debug!(component = %self.component, "Poll requested");
                }
            }
        }
    }

    /// Read every register once and send the values as one telemetry message.
    async fn poll_once(&self) -> Result<usize, PollerError> {
        let mut ctx = self.connect().await?;
        let mut telemetry = ComponentTelemetry::new();

        for register in &self.registers {
            match read_register(&mut ctx, register).await {
                Ok(values) => {
                    let many = values.len() > 1;
                    for (index, value) in values.into_iter().enumerate() {
                        let address = value_address(register, index);
                        let name = register_name(register, address, index, many, &self.register_names);
                        if let Some(unit) = &register.unit {
                            telemetry.labels.insert(format!("{}.unit", name), unit.clone());
                        }
                        telemetry.insert(name, value);
                    }
                }
                Err(e) => {
                    warn!(
                        component = %self.component,
                        register_type = register.register_type.as_str(),
                        address = register.address,
                        error = %e,
                        "Failed to read register"
                    );
                }
            }
        }

        if telemetry.is_empty() {
            return Ok(0);
        }
        let count = telemetry.values.len();

        match self
            .client
            .send_telemetry(&self.component, telemetry.to_json())
            .await
        {
            Ok(()) => Ok(count),
            Err(BridgeError::NotConnected) => {
                debug!(component = %self.component, "No twin client, dropping telemetry");
                Ok(0)
            }
            Err(e) => Err(PollerError::Twin(e.to_string())),
        }
    }

    async fn connect(&self) -> Result<Context, PollerError> {
        let timeout = Duration::from_millis(self.config.timeout_ms);
        let slave = Slave(self.config.unit_id);

        match &self.config.connection {
            ConnectionConfig::Tcp { host, port } => {
                let addr: SocketAddr = tokio::net::lookup_host((host.as_str(), *port))
                    .await
                    .map_err(|e| PollerError::Connection(format!("Invalid address: {}", e)))?
                    .next()
                    .ok_or_else(|| {
                        PollerError::Connection(format!("No address for '{}'", host))
                    })?;

                tokio::time::timeout(timeout, tcp::connect_slave(addr, slave))
                    .await
                    .map_err(|_| PollerError::Connection("Connection timeout".to_string()))?
                    .map_err(|e| PollerError::Connection(e.to_string()))
            }
            ConnectionConfig::Rtu {
                port,
                baud_rate,
                data_bits,
                parity,
                stop_bits,
            } => {
                let parity = match parity.to_lowercase().as_str() {
                    "even" => tokio_serial::Parity::Even,
                    "odd" => tokio_serial::Parity::Odd,
                    _ => tokio_serial::Parity::None,
                };
                let stop_bits = match stop_bits {
                    2 => tokio_serial::StopBits::Two,
                    _ => tokio_serial::StopBits::One,
                };
                let data_bits = match data_bits {
                    5 => tokio_serial::DataBits::Five,
                    6 => tokio_serial::DataBits::Six,
                    7 => tokio_serial::DataBits::Seven,
                    _ => tokio_serial::DataBits::Eight,
                };

                let builder = tokio_serial::new(port, *baud_rate)
                    .parity(parity)
                    .stop_bits(stop_bits)
                    .data_bits(data_bits)
                    .timeout(timeout);

                let serial = tokio_serial::SerialStream::open(&builder)
                    .map_err(|e| PollerError::Connection(format!("Serial open failed: {}", e)))?;

                Ok(rtu::attach_slave(serial, slave))
            }
        }
    }
}

async fn read_register(
    ctx: &mut Context,
    register: &RegisterConfig,
) -> Result<Vec<TelemetryValue>, PollerError> {
    match register.register_type {
        RegisterType::Coil => {
            let bits = ctx
                .read_coils(register.address, register.count)
                .await
                .map_err(|e| PollerError::Read(e.to_string()))?
                .map_err(|e| PollerError::Read(format!("Exception: {:?}", e)))?;
            Ok(bits.into_iter().map(TelemetryValue::Boolean).collect())
        }
        RegisterType::Discrete => {
            let bits = ctx
                .read_discrete_inputs(register.address, register.count)
                .await
                .map_err(|e| PollerError::Read(e.to_string()))?
                .map_err(|e| PollerError::Read(format!("Exception: {:?}", e)))?;
            Ok(bits.into_iter().map(TelemetryValue::Boolean).collect())
        }
        RegisterType::Input => {
            let words = ctx
                .read_input_registers(register.address, registers_needed(register))
                .await
                .map_err(|e| PollerError::Read(e.to_string()))?
                .map_err(|e| PollerError::Read(format!("Exception: {:?}", e)))?;
            Ok(decode_registers(&words, register))
        }
        RegisterType::Holding => {
            let words = ctx
                .read_holding_registers(register.address, registers_needed(register))
                .await
                .map_err(|e| PollerError::Read(e.to_string()))?
                .map_err(|e| PollerError::Read(format!("Exception: {:?}", e)))?;
            Ok(decode_registers(&words, register))
        }
    }
}

/// Number of 16-bit registers to read for the configured data type.
pub fn registers_needed(register: &RegisterConfig) -> u16 {
    register.count.saturating_mul(register.data_type.width())
}

/// Address of the `index`th decoded value, wrapping at the top of the
/// address space.
pub fn value_address(register: &RegisterConfig, index: usize) -> u16 {
    let offset = index as u32 * register.data_type.width() as u32;
    (register.address as u32 + offset) as u16
}

/// Decode raw register words, applying scale and offset. A trailing partial
/// value is dropped.
pub fn decode_registers(data: &[u16], register: &RegisterConfig) -> Vec<TelemetryValue> {
    let width = register.data_type.width() as usize;

    data.chunks_exact(width)
        .map(|chunk| {
            let raw = match register.data_type {
                DataType::U16 => chunk[0] as f64,
                DataType::I16 => chunk[0] as i16 as f64,
                DataType::U32 => words_be(chunk) as f64,
                DataType::I32 => words_be(chunk) as i32 as f64,
                DataType::F32 => f32::from_bits(words_be(chunk)) as f64,
                DataType::U32Le => words_le(chunk) as f64,
                DataType::I32Le => words_le(chunk) as i32 as f64,
                DataType::F32Le => f32::from_bits(words_le(chunk)) as f64,
            };
            TelemetryValue::Gauge(raw * register.scale + register.offset)
        })
        .collect()
}

fn words_be(chunk: &[u16]) -> u32 {
    ((chunk[0] as u32) << 16) | (chunk[1] as u32)
}

fn words_le(chunk: &[u16]) -> u32 {
    ((chunk[1] as u32) << 16) | (chunk[0] as u32)
}

/// Telemetry name for one decoded value.
///
/// A configured register name wins (suffixed with the index for ranges),
/// then the global `<type>:<address>` mapping, then `<type>_<address>`.
pub fn register_name(
    register: &RegisterConfig,
    address: u16,
    index: usize,
    many: bool,
    names: &HashMap<String, String>,
) -> String {
    let type_prefix = register.register_type.as_str();
    if let Some(name) = &register.name {
        return if many {
            format!("{}_{}", name, index)
        } else {
            name.clone()
        };
    }
    if let Some(name) = names.get(&format!("{}:{}", type_prefix, address)) {
        return name.clone();
    }
    format!("{}_{}", type_prefix, address)
}
