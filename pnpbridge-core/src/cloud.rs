//! Cloud twin seams: the connector that builds twin clients, the client
//! itself, and the router that delivers inbound requests to components.
//!
//! Registration is not incremental. Every change of the live interface set
//! goes through a fresh client and a registration of the complete set.

use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;

use crate::error::{BridgeError, Result};
use crate::queue::InterfaceDescriptor;
use crate::status::BridgeStatus;

/// Completion callback for [`TwinClient::register_interfaces`].
pub type RegistrationCallback = Box<dyn FnOnce(Result<()>) + Send + 'static>;

/// A connected cloud twin client.
#[async_trait]
pub trait TwinClient: Send + Sync {
    /// Register the complete interface set.
    ///
    /// Returns immediately; `on_complete` is invoked exactly once from a
    /// transport-owned task when the cloud accepts or rejects the set.
    fn register_interfaces(
        &self,
        interfaces: Vec<InterfaceDescriptor>,
        on_complete: RegistrationCallback,
    );

    /// Send a telemetry document for a component.
    async fn send_telemetry(&self, component: &str, payload: serde_json::Value) -> Result<()>;

    /// Report a property value for a component.
    async fn report_property(
        &self,
        component: &str,
        property: &str,
        value: serde_json::Value,
    ) -> Result<()>;

    /// Publish the bridge status document.
    async fn publish_status(&self, status: &BridgeStatus) -> Result<()>;

    /// Disconnect and release the client.
    async fn destroy(&self);
}

/// Delivers inbound cloud requests to the owning component.
pub trait InboundRouter: Send + Sync {
    fn route_command(
        &self,
        component: &str,
        command: &str,
        payload: &serde_json::Value,
    ) -> Result<serde_json::Value>;

    fn route_property_update(
        &self,
        component: &str,
        property: &str,
        value: &serde_json::Value,
        version: u64,
    ) -> Result<()>;
}

/// Establishes the cloud transport and builds twin clients on top of it.
pub trait CloudConnector: Send + Sync + 'static {
    /// Transport returned by [`connect`](Self::connect) and consumed by
    /// [`create_client`](Self::create_client).
    type Transport: Send + 'static;

    /// (Re-)establish the transport.
    fn connect(&self) -> impl Future<Output = Result<Self::Transport>> + Send;

    /// Build a twin client that routes inbound requests to `router`.
    fn create_client(
        &self,
        transport: Self::Transport,
        router: Arc<dyn InboundRouter>,
    ) -> Result<Arc<dyn TwinClient>>;
}

/// Shared slot holding the live twin client.
///
/// The bridge swaps the client on every reconciliation; components keep a
/// clone of the handle and always talk to whichever client is current.
#[derive(Clone, Default)]
pub struct TwinClientHandle {
    slot: Arc<RwLock<Option<Arc<dyn TwinClient>>>>,
}

impl TwinClientHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// The live client, if connected.
    pub fn current(&self) -> Option<Arc<dyn TwinClient>> {
        self.slot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_connected(&self) -> bool {
        self.slot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    pub(crate) fn replace(
        &self,
        client: Option<Arc<dyn TwinClient>>,
    ) -> Option<Arc<dyn TwinClient>> {
        let mut slot = self.slot.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *slot, client)
    }

    pub async fn send_telemetry(&self, component: &str, payload: serde_json::Value) -> Result<()> {
        let client = self.current().ok_or(BridgeError::NotConnected)?;
        client.send_telemetry(component, payload).await
    }

    pub async fn report_property(
        &self,
        component: &str,
        property: &str,
        value: serde_json::Value,
    ) -> Result<()> {
        let client = self.current().ok_or(BridgeError::NotConnected)?;
        client.report_property(component, property, value).await
    }

    pub async fn publish_status(&self, status: &BridgeStatus) -> Result<()> {
        let client = self.current().ok_or(BridgeError::NotConnected)?;
        client.publish_status(status).await
    }
}

impl std::fmt::Debug for TwinClientHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TwinClientHandle")
            .field("connected", &self.is_connected())
            .finish()
    }
}
