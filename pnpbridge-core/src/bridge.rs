//! The bridge: owns the queue, the adapter managers and the reconciliation worker.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

use crate::cloud::{CloudConnector, TwinClientHandle};
use crate::components::ComponentAdapterManager;
use crate::config::BridgeConfiguration;
use crate::discovery::{DeviceReporter, DiscoveryAdapterManager};
use crate::error::{BridgeError, Result};
use crate::manifest::AdapterManifest;
use crate::matcher::Matcher;
use crate::queue::MessageQueue;
use crate::reconcile::Reconciler;
use crate::state::{BridgeState, StateCell};
use crate::status::BridgeStatus;

/// Default bridge name used in status documents.
pub const BRIDGE_NAME: &str = "pnpbridge";

/// A running PnP bridge.
///
/// # Example
///
/// ```ignore
/// let bridge = Arc::new(Bridge::new(config, manifest, connector)?);
///
/// let stopper = bridge.clone();
/// tokio::spawn(async move {
///     let _ = tokio::signal::ctrl_c().await;
///     stopper.stop();
/// });
///
/// bridge.run().await?;
/// ```
pub struct Bridge<C: CloudConnector> {
    name: String,
    version: String,
    config: Arc<BridgeConfiguration>,
    state: Arc<StateCell>,
    queue: Arc<MessageQueue>,
    discovery: DiscoveryAdapterManager,
    components: Arc<ComponentAdapterManager>,
    reconciler: Arc<Reconciler<C>>,
    client: TwinClientHandle,
    exit: Notify,
    stopping: AtomicBool,
    ran: AtomicBool,
}

impl<C: CloudConnector> Bridge<C> {
    /// Validate the configuration and manifest, build the managers and start
    /// the queue worker. Must be called within a Tokio runtime.
    pub fn new(config: BridgeConfiguration, manifest: AdapterManifest, connector: C) -> Result<Self> {
        Self::with_name(BRIDGE_NAME, config, manifest, connector)
    }

    /// Like [`new`](Self::new) with a custom bridge name for status documents.
    pub fn with_name(
        name: impl Into<String>,
        config: BridgeConfiguration,
        manifest: AdapterManifest,
        connector: C,
    ) -> Result<Self> {
        let name = name.into();
        let version = env!("CARGO_PKG_VERSION").to_string();

        config.validate()?;
        manifest.validate()?;

        let config = Arc::new(config);
        let state = Arc::new(StateCell::new());
        let queue = Arc::new(MessageQueue::new());
        let discovery = DiscoveryAdapterManager::new(manifest.discovery)?;
        let components = Arc::new(ComponentAdapterManager::new(
            manifest.protocol,
            config
                .pnp_adapters
                .iter()
                .map(|(identity, params)| (identity.clone(), params.clone())),
        )?);
        let client = TwinClientHandle::new();

        let reconciler = Arc::new(Reconciler::new(
            Matcher::new(config.clone()),
            components.clone(),
            connector,
            client.clone(),
            config.reconciliation,
            &name,
            &version,
        ));
        queue.start(reconciler.clone())?;

        state.advance(BridgeState::Initialized);
        tracing::info!(
            bridge = %name,
            version = %version,
            devices = config.devices.len(),
            "Bridge initialized"
        );

        Ok(Self {
            name,
            version,
            config,
            state,
            queue,
            discovery,
            components,
            reconciler,
            client,
            exit: Notify::new(),
            stopping: AtomicBool::new(false),
            ran: AtomicBool::new(false),
        })
    }

    /// Reporter for the discovery adapter `identity`.
    pub fn reporter(&self, identity: &str) -> DeviceReporter {
        DeviceReporter::new(identity, self.queue.clone(), self.state.clone())
    }

    /// Reconcile once, start discovery, then wait for [`stop`](Self::stop)
    /// and tear everything down.
    pub async fn run(&self) -> Result<()> {
        if self.ran.swap(true, Ordering::AcqRel) {
            return Err(BridgeError::invalid("bridge has already been run"));
        }

        if self.state.get() == BridgeState::Initialized {
            self.reconciler.request();
            self.queue.wake();

            let report = self
                .discovery
                .start(&self.config, |identity| self.reporter(identity));
            tracing::info!(
                started = ?report.started,
                failed = ?report.failed,
                unknown = ?report.unknown,
                "Discovery started"
            );

            self.exit.notified().await;
        }

        self.teardown().await;
        Ok(())
    }

    /// Request shutdown. Returns `true` for the call that initiated it.
    pub fn stop(&self) -> bool {
        if self.stopping.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.state.advance(BridgeState::TearingDown);
        self.queue.request_teardown();
        self.exit.notify_one();
        tracing::info!(bridge = %self.name, "Bridge stopping");
        true
    }

    async fn teardown(&self) {
        self.stop();

        self.discovery.stop();

        let released = self.queue.shutdown().await;
        if released > 0 {
            tracing::debug!(released = released, "Released queued messages");
        }

        self.components.teardown();

        if let Some(client) = self.client.replace(None) {
            let status = BridgeStatus::offline(&self.name, &self.version);
            if let Err(e) = client.publish_status(&status).await {
                tracing::warn!(error = %e, "Failed to publish offline status");
            }
            client.destroy().await;
        }

        self.state.advance(BridgeState::Destroyed);
        tracing::info!(bridge = %self.name, "Bridge destroyed");
    }

    pub fn state(&self) -> BridgeState {
        self.state.get()
    }

    pub fn components(&self) -> &ComponentAdapterManager {
        &self.components
    }

    pub fn config(&self) -> &BridgeConfiguration {
        &self.config
    }

    /// Handle to the live twin client.
    pub fn client(&self) -> &TwinClientHandle {
        &self.client
    }

    /// Identities of the discovery adapters currently running.
    pub fn running_discovery(&self) -> Vec<String> {
        self.discovery.running()
    }
}

impl<C: CloudConnector> Drop for Bridge<C> {
    fn drop(&mut self) {
        if self.state.get() != BridgeState::Destroyed {
            self.queue.request_teardown();
        }
    }
}
