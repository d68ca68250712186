//! Discovery adapters shipped with the bridge.

pub mod configured;
pub mod serial;

pub use configured::ConfiguredDiscovery;
pub use serial::SerialDiscovery;
