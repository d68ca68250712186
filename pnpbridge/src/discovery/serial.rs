//! Serial port discovery.
//!
//! Periodically enumerates the host's serial ports and reports an arrival for
//! every new port and a removal for every port that disappeared. USB ports
//! carry their vendor and product ids so configuration can match on them.

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use serde::Deserialize;
use tokio::task::JoinHandle;
use tokio_serial::{SerialPortInfo, SerialPortType};

use pnpbridge_core::{BridgeError, DeviceDescription, DeviceReporter, DiscoveryAdapter, PnpMessage, Result};

pub const IDENTITY: &str = "serial";

/// Adapter parameters (`discovery_adapters.serial`).
#[derive(Debug, Clone, Deserialize)]
pub struct SerialDiscoveryParams {
    #[serde(default = "default_scan_interval_ms")]
    pub scan_interval_ms: u64,
}

fn default_scan_interval_ms() -> u64 {
    2000
}

impl Default for SerialDiscoveryParams {
    fn default() -> Self {
        Self {
            scan_interval_ms: default_scan_interval_ms(),
        }
    }
}

impl SerialDiscoveryParams {
    pub fn parse(params: Option<&str>) -> Result<Self> {
        let parsed = match params {
            Some(params) => serde_json::from_str::<Self>(params)?,
            None => Self::default(),
        };
        if parsed.scan_interval_ms == 0 {
            return Err(BridgeError::invalid("scan_interval_ms must be positive"));
        }
        Ok(parsed)
    }
}

/// USB identity of a port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsbIdentity {
    pub vid: u16,
    pub pid: u16,
    pub serial_number: Option<String>,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
}

/// One enumerated serial port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortSnapshot {
    pub port: String,
    pub port_type: &'static str,
    pub usb: Option<UsbIdentity>,
}

impl From<&SerialPortInfo> for PortSnapshot {
    fn from(info: &SerialPortInfo) -> Self {
        let (port_type, usb) = match &info.port_type {
            SerialPortType::UsbPort(usb) => (
                "usb",
                Some(UsbIdentity {
                    vid: usb.vid,
                    pid: usb.pid,
                    serial_number: usb.serial_number.clone(),
                    manufacturer: usb.manufacturer.clone(),
                    product: usb.product.clone(),
                }),
            ),
            SerialPortType::PciPort => ("pci", None),
            SerialPortType::BluetoothPort => ("bluetooth", None),
            SerialPortType::Unknown => ("unknown", None),
        };
        Self {
            port: info.port_name.clone(),
            port_type,
            usb,
        }
    }
}

/// Device description reported for a port. Ids are 4-digit lowercase hex.
pub fn describe(port: &PortSnapshot) -> DeviceDescription {
    let mut description = DeviceDescription::new()
        .with_parameter("port", port.port.clone())
        .with_parameter("port_type", port.port_type);
    description.identity = Some(IDENTITY.to_string());

    if let Some(usb) = &port.usb {
        description = description
            .with_parameter("vid", format!("{:04x}", usb.vid))
            .with_parameter("pid", format!("{:04x}", usb.pid));
        let optional = [
            ("serial_number", &usb.serial_number),
            ("manufacturer", &usb.manufacturer),
            ("product", &usb.product),
        ];
        for (key, value) in optional {
            if let Some(value) = value {
                description = description.with_parameter(key, value.clone());
            }
        }
    }
    description
}

/// Ports that appeared and disappeared since the last scan.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct PortChanges {
    pub arrived: Vec<PortSnapshot>,
    pub removed: Vec<PortSnapshot>,
}

/// Update `known` to `current`, returning the differences. A port whose
/// identity changed under the same name is reported as removed then arrived.
pub fn diff(known: &mut BTreeMap<String, PortSnapshot>, current: Vec<PortSnapshot>) -> PortChanges {
    let mut next: BTreeMap<String, PortSnapshot> =
        current.into_iter().map(|p| (p.port.clone(), p)).collect();
    let mut changes = PortChanges::default();

    for (name, old) in known.iter() {
        match next.get(name) {
            Some(new) if new == old => {}
            Some(new) => {
                changes.removed.push(old.clone());
                changes.arrived.push(new.clone());
            }
            None => changes.removed.push(old.clone()),
        }
    }
    for (name, new) in &next {
        if !known.contains_key(name) {
            changes.arrived.push(new.clone());
        }
    }

    std::mem::swap(known, &mut next);
    changes
}

/// Fold one enumeration result into `known`. A failed enumeration leaves
/// `known` untouched and reports nothing.
pub fn apply_scan<E: std::fmt::Display>(
    known: &mut BTreeMap<String, PortSnapshot>,
    scan: std::result::Result<Vec<PortSnapshot>, E>,
) -> Option<PortChanges> {
    match scan {
        Ok(current) => Some(diff(known, current)),
        Err(e) => {
            tracing::warn!(error = %e, known = known.len(), "Serial port enumeration failed");
            None
        }
    }
}

#[derive(Debug, Default)]
pub struct SerialDiscovery {
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SerialDiscovery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }
}

async fn scan_loop(reporter: DeviceReporter, interval: Duration) {
    let mut known = BTreeMap::new();

    loop {
        let scan = match tokio::task::spawn_blocking(tokio_serial::available_ports).await {
            Ok(scan) => scan.map(|ports| ports.iter().map(PortSnapshot::from).collect()),
            Err(e) => {
                tracing::error!(error = %e, "Serial scan task failed");
                return;
            }
        };

        let Some(changes) = apply_scan(&mut known, scan) else {
            tokio::time::sleep(interval).await;
            continue;
        };
        let messages = changes
            .removed
            .iter()
            .map(|port| PnpMessage::removal(&describe(port)))
            .chain(changes.arrived.iter().map(|port| PnpMessage::arrival(&describe(port))));

        for message in messages {
            let result = message.and_then(|message| reporter.report(message));
            if let Err(e) = result {
                tracing::debug!(error = %e, "Serial discovery stopping");
                return;
            }
        }

        tokio::time::sleep(interval).await;
    }
}

impl DiscoveryAdapter for SerialDiscovery {
    fn identity(&self) -> &str {
        IDENTITY
    }

    fn start_discovery(
        &self,
        reporter: DeviceReporter,
        _device_params: &[String],
        adapter_params: Option<&str>,
    ) -> Result<()> {
        let params = SerialDiscoveryParams::parse(adapter_params)?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| BridgeError::with_context("no async runtime for serial scan", e))?;

        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = task.take() {
            previous.abort();
        }
        tracing::info!(scan_interval_ms = params.scan_interval_ms, "Serial discovery started");
        *task = Some(runtime.spawn(scan_loop(
            reporter,
            Duration::from_millis(params.scan_interval_ms),
        )));
        Ok(())
    }

    fn stop_discovery(&self) -> Result<()> {
        if let Some(task) = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usb(port: &str, vid: u16, pid: u16) -> PortSnapshot {
        PortSnapshot {
            port: port.to_string(),
            port_type: "usb",
            usb: Some(UsbIdentity {
                vid,
                pid,
                serial_number: Some("A123".to_string()),
                manufacturer: None,
                product: Some("FT232R".to_string()),
            }),
        }
    }

    fn plain(port: &str) -> PortSnapshot {
        PortSnapshot {
            port: port.to_string(),
            port_type: "pci",
            usb: None,
        }
    }

    #[test]
    fn test_describe_usb_port() {
        let description = describe(&usb("/dev/ttyUSB0", 0x0403, 0x6001));
        assert_eq!(description.parameter("port").as_deref(), Some("/dev/ttyUSB0"));
        assert_eq!(description.parameter("vid").as_deref(), Some("0403"));
        assert_eq!(description.parameter("pid").as_deref(), Some("6001"));
        assert_eq!(description.parameter("serial_number").as_deref(), Some("A123"));
        assert_eq!(description.parameter("manufacturer"), None);
        assert_eq!(description.identity.as_deref(), Some(IDENTITY));
    }

    #[test]
    fn test_diff_arrivals_and_removals() {
        let mut known = BTreeMap::new();

        let first = diff(&mut known, vec![plain("/dev/ttyS0"), usb("/dev/ttyUSB0", 1, 2)]);
        assert_eq!(first.arrived.len(), 2);
        assert!(first.removed.is_empty());

        let unchanged = diff(&mut known, vec![plain("/dev/ttyS0"), usb("/dev/ttyUSB0", 1, 2)]);
        assert_eq!(unchanged, PortChanges::default());

        let unplugged = diff(&mut known, vec![plain("/dev/ttyS0")]);
        assert_eq!(unplugged.removed, vec![usb("/dev/ttyUSB0", 1, 2)]);
        assert!(unplugged.arrived.is_empty());
        assert_eq!(known.len(), 1);
    }

    #[test]
    fn test_diff_replaced_device() {
        let mut known = BTreeMap::new();
        diff(&mut known, vec![usb("/dev/ttyUSB0", 1, 2)]);

        let swapped = diff(&mut known, vec![usb("/dev/ttyUSB0", 3, 4)]);
        assert_eq!(swapped.removed, vec![usb("/dev/ttyUSB0", 1, 2)]);
        assert_eq!(swapped.arrived, vec![usb("/dev/ttyUSB0", 3, 4)]);
    }

    #[test]
    fn test_failed_scan_keeps_known_ports() {
        let mut known = BTreeMap::new();
        let first = apply_scan::<String>(&mut known, Ok(vec![usb("/dev/ttyUSB0", 1, 2)]));
        assert_eq!(first.map(|c| c.arrived.len()), Some(1));

        let failed = apply_scan(&mut known, Err("enumeration failed"));
        assert!(failed.is_none());
        assert!(known.contains_key("/dev/ttyUSB0"));

        let recovered = apply_scan::<String>(&mut known, Ok(vec![usb("/dev/ttyUSB0", 1, 2)]));
        assert_eq!(recovered, Some(PortChanges::default()));
    }

    #[test]
    fn test_params() {
        assert_eq!(SerialDiscoveryParams::parse(None).unwrap().scan_interval_ms, 2000);
        assert_eq!(
            SerialDiscoveryParams::parse(Some(r#"{"scan_interval_ms":250}"#))
                .unwrap()
                .scan_interval_ms,
            250
        );
        assert!(SerialDiscoveryParams::parse(Some(r#"{"scan_interval_ms":0}"#)).is_err());
        assert!(SerialDiscoveryParams::parse(Some("nope")).is_err());
    }
}
