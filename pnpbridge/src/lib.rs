//! PnP device bridge.
//!
//! Discovers devices attached to the gateway, binds the ones named in the
//! configuration to protocol adapters and exposes each as a component of the
//! gateway's cloud twin over Zenoh.
//!
//! Shipped adapters:
//!
//! - discovery `configured` - statically configured devices
//! - discovery `serial` - serial and USB-serial ports, scanned periodically
//! - protocol `modbus` - Modbus TCP/RTU register polling
//!
//! See [`twin`] for the key expression layout.

pub mod args;
pub mod config;
pub mod discovery;
pub mod modbus;
pub mod twin;

use pnpbridge_core::AdapterManifest;

/// Manifest with every adapter built into the binary.
pub fn default_manifest() -> AdapterManifest {
    AdapterManifest::new()
        .with_discovery(discovery::ConfiguredDiscovery::new())
        .with_discovery(discovery::SerialDiscovery::new())
        .with_protocol(modbus::ModbusAdapter::new())
}
