//! Discovery adapter plugin interface and manager.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use crate::config::BridgeConfiguration;
use crate::error::{BridgeError, Result};
use crate::message::PnpMessage;
use crate::queue::{MessageId, MessageQueue};
use crate::state::{BridgeState, StateCell};

/// A plugin that detects device arrival and removal.
///
/// `start_discovery` must return promptly. Scanning happens on the adapter's
/// own task or thread, and every change is reported through the
/// [`DeviceReporter`] it was handed.
pub trait DiscoveryAdapter: Send + Sync {
    /// Unique identity, referenced by `discovery_adapter.identity` in device configuration.
    fn identity(&self) -> &str;

    /// Begin discovery.
    ///
    /// `device_params` holds one JSON document per configured device that
    /// names this adapter; `adapter_params` is the adapter's global block.
    fn start_discovery(
        &self,
        reporter: DeviceReporter,
        device_params: &[String],
        adapter_params: Option<&str>,
    ) -> Result<()>;

    fn stop_discovery(&self) -> Result<()>;
}

/// Handed to discovery adapters for reporting device changes into the bridge.
#[derive(Clone)]
pub struct DeviceReporter {
    identity: Arc<str>,
    queue: Arc<MessageQueue>,
    state: Arc<StateCell>,
}

impl DeviceReporter {
    pub(crate) fn new(identity: &str, queue: Arc<MessageQueue>, state: Arc<StateCell>) -> Self {
        Self {
            identity: Arc::from(identity),
            queue,
            state,
        }
    }

    /// Identity of the adapter this reporter belongs to.
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Stamp the message with this adapter's identity and enqueue it.
    pub fn report(&self, mut message: PnpMessage) -> Result<MessageId> {
        if self.state.get() != BridgeState::Initialized {
            return Err(BridgeError::failed("bridge is shutting down"));
        }
        message.stamp_discovery_identity(&self.identity);
        let id = self.queue.enqueue(message)?;
        tracing::debug!(adapter = %self.identity, message = %id, "Device change reported");
        Ok(id)
    }
}

impl std::fmt::Debug for DeviceReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceReporter")
            .field("identity", &self.identity)
            .finish()
    }
}

/// Outcome of [`DiscoveryAdapterManager::start`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveryReport {
    /// Adapters whose `start_discovery` succeeded.
    pub started: Vec<String>,
    /// Adapters whose `start_discovery` failed.
    pub failed: Vec<String>,
    /// Identities named in configuration but absent from the manifest.
    pub unknown: Vec<String>,
}

/// Starts and stops the discovery adapters named by configuration.
pub struct DiscoveryAdapterManager {
    adapters: Vec<Arc<dyn DiscoveryAdapter>>,
    running: Mutex<Vec<Arc<dyn DiscoveryAdapter>>>,
}

impl DiscoveryAdapterManager {
    pub fn new(adapters: Vec<Arc<dyn DiscoveryAdapter>>) -> Result<Self> {
        let mut seen = HashSet::new();
        for adapter in &adapters {
            let identity = adapter.identity();
            if identity.is_empty() {
                return Err(BridgeError::invalid("discovery adapter identity cannot be empty"));
            }
            if !seen.insert(identity) {
                return Err(BridgeError::duplicate(format!(
                    "discovery adapter '{}' registered twice",
                    identity
                )));
            }
        }

        Ok(Self {
            adapters,
            running: Mutex::new(Vec::new()),
        })
    }

    /// Start every adapter named by at least one configured device.
    pub fn start(
        &self,
        config: &BridgeConfiguration,
        reporter_for: impl Fn(&str) -> DeviceReporter,
    ) -> DiscoveryReport {
        let mut report = DiscoveryReport::default();

        for identity in config.discovery_identities() {
            if !self.adapters.iter().any(|a| a.identity() == identity) {
                tracing::warn!(adapter = %identity, "Configured discovery adapter is not available");
                report.unknown.push(identity.to_string());
            }
        }

        for adapter in &self.adapters {
            let identity = adapter.identity();

            let device_params = match config.discovery_device_parameters(identity) {
                Ok(params) => params,
                Err(e) => {
                    tracing::error!(adapter = %identity, error = %e, "Failed to serialize discovery parameters");
                    report.failed.push(identity.to_string());
                    continue;
                }
            };
            if device_params.is_empty() {
                tracing::debug!(adapter = %identity, "No configured device uses discovery adapter, skipping");
                continue;
            }

            let adapter_params = match config.discovery_adapter_parameters(identity) {
                Ok(params) => params,
                Err(e) => {
                    tracing::error!(adapter = %identity, error = %e, "Failed to serialize discovery parameters");
                    report.failed.push(identity.to_string());
                    continue;
                }
            };

            match adapter.start_discovery(
                reporter_for(identity),
                &device_params,
                adapter_params.as_deref(),
            ) {
                Ok(()) => {
                    tracing::info!(
                        adapter = %identity,
                        devices = device_params.len(),
                        "Discovery adapter started"
                    );
                    self.running
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .push(adapter.clone());
                    report.started.push(identity.to_string());
                }
                Err(e) => {
                    tracing::error!(adapter = %identity, error = %e, "Discovery adapter failed to start");
                    report.failed.push(identity.to_string());
                }
            }
        }

        report
    }

    /// Stop every started adapter. Safe to call more than once.
    pub fn stop(&self) {
        let running: Vec<Arc<dyn DiscoveryAdapter>> = self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();

        for adapter in running {
            match adapter.stop_discovery() {
                Ok(()) => tracing::info!(adapter = %adapter.identity(), "Discovery adapter stopped"),
                Err(e) => tracing::warn!(
                    adapter = %adapter.identity(),
                    error = %e,
                    "Discovery adapter failed to stop"
                ),
            }
        }
    }

    pub fn is_running(&self, identity: &str) -> bool {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|a| a.identity() == identity)
    }

    /// Identities of the started adapters.
    pub fn running(&self) -> Vec<String> {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|a| a.identity().to_string())
            .collect()
    }
}
