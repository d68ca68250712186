//! PnP Bridge Core
//!
//! Orchestration core of a plug-and-play device bridge: discovery adapters
//! report local device changes, configuration binds each device to a named
//! component served by a protocol adapter, and the complete set of component
//! interfaces is (re-)registered with a cloud twin whenever it changes.
//!
//! # Overview
//!
//! This crate provides:
//! - [`Bridge`] owning the lifecycle (initialize, run, stop, teardown)
//! - [`MessageQueue`] decoupling discovery threads from the single reconciliation worker
//! - [`Matcher`] resolving a device to exactly one configured component
//! - [`DiscoveryAdapter`] and [`ProtocolAdapter`] plugin traits, collected in an [`AdapterManifest`]
//! - [`CloudConnector`] and [`TwinClient`] seams to the cloud twin service
//! - [`BridgeConfiguration`] loaded from JSON5
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use pnpbridge_core::{AdapterManifest, Bridge, BridgeConfiguration};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = BridgeConfiguration::load("pnpbridge.json5")?;
//!     let manifest = AdapterManifest::new()
//!         .with_discovery(MyDiscovery::new())
//!         .with_protocol(MyProtocol::new());
//!
//!     let bridge = Arc::new(Bridge::new(config, manifest, MyConnector::new())?);
//!
//!     let stopper = bridge.clone();
//!     tokio::spawn(async move {
//!         let _ = tokio::signal::ctrl_c().await;
//!         stopper.stop();
//!     });
//!
//!     bridge.run().await?;
//!     Ok(())
//! }
//! ```

mod adapter;
mod bridge;
mod cloud;
mod components;
mod config;
mod discovery;
mod error;
mod manifest;
mod matcher;
mod message;
mod queue;
mod reconcile;
mod state;
mod status;

pub use adapter::{AdapterInstance, ComponentRequest, PnpComponent, ProtocolAdapter};
pub use bridge::{BRIDGE_NAME, Bridge};
pub use cloud::{CloudConnector, InboundRouter, RegistrationCallback, TwinClient, TwinClientHandle};
pub use components::{ComponentAdapterManager, ComponentHandle, ComponentState};
pub use config::{
    BridgeConfiguration, DeviceConfigEntry, DiscoveryParameters, MatchFilter, MatchType,
    ReconcilePolicy,
};
pub use discovery::{DeviceReporter, DiscoveryAdapter, DiscoveryAdapterManager, DiscoveryReport};
pub use error::{BridgeError, Result};
pub use manifest::AdapterManifest;
pub use matcher::{MatchError, MatchResolution, Matcher};
pub use message::{ChangeType, DeviceContext, DeviceDescription, MessageProperties, PnpMessage};
pub use queue::{
    CycleOutcome, EntryStatus, InterfaceDescriptor, MessageHandler, MessageId, MessageQueue,
    PublishEntry, PublishSet,
};
pub use state::BridgeState;
pub use status::BridgeStatus;
