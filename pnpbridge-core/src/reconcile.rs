//! The worker-side cycle: bind pending messages to components and
//! re-register the complete interface set with the cloud.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use tokio::sync::oneshot;

use crate::adapter::ComponentRequest;
use crate::cloud::{CloudConnector, InboundRouter, TwinClientHandle};
use crate::components::ComponentAdapterManager;
use crate::config::ReconcilePolicy;
use crate::error::{BridgeError, Result};
use crate::matcher::{MatchError, Matcher};
use crate::message::{ChangeType, PnpMessage};
use crate::queue::{
    CycleOutcome, EntryStatus, InterfaceDescriptor, MessageHandler, MessageId, PublishSet,
};
use crate::status::BridgeStatus;

pub(crate) struct Reconciler<C: CloudConnector> {
    matcher: Matcher,
    components: Arc<ComponentAdapterManager>,
    connector: C,
    client: TwinClientHandle,
    policy: ReconcilePolicy,
    pending: AtomicBool,
    failures: AtomicU32,
    bridge_name: String,
    version: String,
}

impl<C: CloudConnector> Reconciler<C> {
    pub(crate) fn new(
        matcher: Matcher,
        components: Arc<ComponentAdapterManager>,
        connector: C,
        client: TwinClientHandle,
        policy: ReconcilePolicy,
        bridge_name: &str,
        version: &str,
    ) -> Self {
        Self {
            matcher,
            components,
            connector,
            client,
            policy,
            pending: AtomicBool::new(false),
            failures: AtomicU32::new(0),
            bridge_name: bridge_name.to_string(),
            version: version.to_string(),
        }
    }

    /// Force a reconciliation on the next cycle even if nothing changed.
    pub(crate) fn request(&self) {
        self.pending.store(true, Ordering::Release);
    }

    /// Bind or unbind every pending entry. Returns whether the live set changed.
    fn process_pending(&self, publish: &mut PublishSet) -> bool {
        let pending: Vec<(MessageId, ChangeType)> = publish
            .entries()
            .iter()
            .filter(|entry| entry.is_pending())
            .map(|entry| (entry.id, entry.message.change_type()))
            .collect();

        let mut changed = false;
        for (id, change_type) in pending {
            let result = match change_type {
                ChangeType::Arrival => self.bind_arrival(publish, id),
                ChangeType::Removal => self.apply_removal(publish, id),
            };
            match result {
                Ok(entry_changed) => changed |= entry_changed,
                Err(e) => {
                    tracing::debug!(message = %id, error = %e, "Message released");
                    publish.release(id);
                }
            }
        }
        changed
    }

    fn bind_arrival(&self, publish: &mut PublishSet, id: MessageId) -> Result<bool> {
        let Some(entry) = publish.entries_mut().iter_mut().find(|e| e.id == id) else {
            return Ok(false);
        };

        let components = &self.components;
        let resolution = self
            .matcher
            .resolve(&mut entry.message, |name| components.contains(name))
            .map_err(|e| reject(id, e))?;

        let config = self
            .matcher
            .entry(resolution.entry_index)
            .map(|device| &device.adapter_config)
            .ok_or_else(|| BridgeError::not_found(format!("device entry {}", resolution.entry_index)))?;

        self.components
            .create_component(
                &resolution.adapter_identity,
                ComponentRequest {
                    component_name: &resolution.component_name,
                    interface_id: &resolution.interface_id,
                    config,
                    message: &entry.message,
                },
            )
            .inspect_err(|e| {
                tracing::error!(
                    message = %id,
                    component = %resolution.component_name,
                    adapter = %resolution.adapter_identity,
                    error = %e,
                    "Component creation failed"
                )
            })?;

        entry.status = EntryStatus::Bound(InterfaceDescriptor {
            component_name: resolution.component_name,
            interface_id: resolution.interface_id,
            adapter_identity: resolution.adapter_identity,
        });
        tracing::info!(message = %id, component = ?entry.message.component_name(), "Device bound");
        Ok(true)
    }

    fn apply_removal(&self, publish: &mut PublishSet, id: MessageId) -> Result<bool> {
        let (resolution, bound_here) = {
            let Some(entry) = publish.entries().iter().find(|e| e.id == id) else {
                return Ok(false);
            };
            let resolution = self.matcher.find(&entry.message).map_err(|e| reject(id, e))?;
            let bound_here = publish
                .bound_entry(&resolution.component_name)
                .is_none_or(|bound| same_device(&bound.message, &entry.message));
            (resolution, bound_here)
        };

        publish.release(id);

        if !self.components.contains(&resolution.component_name) {
            tracing::debug!(
                component = %resolution.component_name,
                "Removal for a component that is not bound, ignoring"
            );
            return Ok(false);
        }
        if !bound_here {
            tracing::debug!(
                message = %id,
                component = %resolution.component_name,
                "Removal for a device other than the bound one, ignoring"
            );
            return Ok(false);
        }

        let removed = self.components.remove_component(&resolution.component_name);
        publish.release_bound(&resolution.component_name);
        if let Err(e) = removed {
            tracing::warn!(
                component = %resolution.component_name,
                error = %e,
                "Component teardown failed during removal"
            );
        }
        tracing::info!(component = %resolution.component_name, "Device removed");
        Ok(true)
    }

    async fn reconcile(&self, interfaces: Vec<InterfaceDescriptor>) -> Result<()> {
        if let Some(previous) = self.client.replace(None) {
            tracing::debug!("Destroying previous twin client");
            previous.destroy().await;
        }

        let transport = self.connector.connect().await?;
        let router: Arc<dyn InboundRouter> = self.components.clone();
        let client = self.connector.create_client(transport, router)?;

        let (tx, rx) = oneshot::channel();
        client.register_interfaces(
            interfaces.clone(),
            Box::new(move |result| {
                let _ = tx.send(result);
            }),
        );

        let timeout = self.policy.registration_timeout();
        let registered = match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(BridgeError::failed(
                "registration completion was dropped without a result",
            )),
            Err(_) => Err(BridgeError::failed(format!(
                "registration timed out after {} ms",
                timeout.as_millis()
            ))),
        };

        if let Err(e) = registered {
            client.destroy().await;
            return Err(e);
        }

        self.client.replace(Some(client));
        let started = self.components.start_all_components(&self.client);

        let names: Vec<&str> = interfaces
            .iter()
            .map(|i| i.component_name.as_str())
            .collect();
        let status = if interfaces.is_empty() {
            BridgeStatus::waiting_for_configuration(&self.bridge_name, &self.version)
        } else {
            BridgeStatus::configuration_complete(&self.bridge_name, &self.version)
        }
        .with_metadata(serde_json::json!({ "components": names }));

        if let Err(e) = self.client.publish_status(&status).await {
            tracing::warn!(error = %e, "Failed to publish bridge status");
        }

        tracing::info!(
            interfaces = interfaces.len(),
            started = started,
            status = %status.status,
            "Interfaces registered"
        );
        Ok(())
    }
}

impl<C: CloudConnector> MessageHandler for Reconciler<C> {
    async fn handle_cycle(&self, publish: &mut PublishSet) -> CycleOutcome {
        if self.process_pending(publish) {
            self.pending.store(true, Ordering::Release);
        }
        if !self.pending.load(Ordering::Acquire) {
            return CycleOutcome::Idle;
        }

        match self.reconcile(publish.bound_interfaces()).await {
            Ok(()) => {
                self.pending.store(false, Ordering::Release);
                self.failures.store(0, Ordering::Release);
                CycleOutcome::Idle
            }
            Err(e) => {
                let failures = self.failures.fetch_add(1, Ordering::AcqRel) + 1;
                let delay = self.policy.retry_delay(failures);
                tracing::warn!(
                    error = %e,
                    attempt = failures,
                    retry_in_ms = delay.as_millis() as u64,
                    "Reconciliation failed, retrying"
                );
                CycleOutcome::RetryAfter(delay)
            }
        }
    }
}

/// Whether a removal describes the device behind a bound arrival.
fn same_device(bound: &PnpMessage, removal: &PnpMessage) -> bool {
    match (bound.description(), removal.description()) {
        (Ok(bound), Ok(removal)) => bound.match_parameters == removal.match_parameters,
        _ => bound.payload() == removal.payload(),
    }
}

fn reject(id: MessageId, err: MatchError) -> BridgeError {
    match &err {
        MatchError::NoMatch => {
            tracing::info!(message = %id, "No configured component claims device")
        }
        MatchError::Ambiguous { .. } => {
            tracing::error!(message = %id, error = %err, "Ambiguous device configuration")
        }
        MatchError::AlreadyBound { .. } | MatchError::InvalidPayload(_) => {
            tracing::warn!(message = %id, error = %err, "Device message rejected")
        }
    }
    err.into()
}
