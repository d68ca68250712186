//! The set of adapters compiled into a bridge binary.

use std::collections::HashSet;
use std::sync::Arc;

use crate::adapter::ProtocolAdapter;
use crate::discovery::DiscoveryAdapter;
use crate::error::{BridgeError, Result};

/// Discovery and protocol adapters available to the bridge.
///
/// # Example
///
/// ```ignore
/// let manifest = AdapterManifest::new()
///     .with_discovery(ConfiguredDiscovery::new())
///     .with_protocol(ModbusAdapter::new());
/// ```
#[derive(Default, Clone)]
pub struct AdapterManifest {
    pub(crate) discovery: Vec<Arc<dyn DiscoveryAdapter>>,
    pub(crate) protocol: Vec<Arc<dyn ProtocolAdapter>>,
}

impl AdapterManifest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_discovery(mut self, adapter: impl DiscoveryAdapter + 'static) -> Self {
        self.discovery.push(Arc::new(adapter));
        self
    }

    pub fn with_protocol(mut self, adapter: impl ProtocolAdapter + 'static) -> Self {
        self.protocol.push(Arc::new(adapter));
        self
    }

    pub fn discovery_identities(&self) -> Vec<&str> {
        self.discovery.iter().map(|a| a.identity()).collect()
    }

    pub fn protocol_identities(&self) -> Vec<&str> {
        self.protocol.iter().map(|a| a.identity()).collect()
    }

    /// Reject empty or duplicate identities within each adapter kind.
    pub fn validate(&self) -> Result<()> {
        check_identities("discovery", self.discovery_identities())?;
        check_identities("protocol", self.protocol_identities())
    }
}

fn check_identities(kind: &str, identities: Vec<&str>) -> Result<()> {
    let mut seen = HashSet::new();
    for identity in identities {
        if identity.is_empty() {
            return Err(BridgeError::invalid(format!(
                "{} adapter identity cannot be empty",
                kind
            )));
        }
        if !seen.insert(identity) {
            return Err(BridgeError::duplicate(format!(
                "{} adapter '{}' registered twice",
                kind, identity
            )));
        }
    }
    Ok(())
}

impl std::fmt::Debug for AdapterManifest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterManifest")
            .field("discovery", &self.discovery_identities())
            .field("protocol", &self.protocol_identities())
            .finish()
    }
}
