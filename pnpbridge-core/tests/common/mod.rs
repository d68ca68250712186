//! Mock adapters and a scripted cloud connector shared by the integration tests.

#![allow(dead_code)]

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use pnpbridge_core::{
    AdapterInstance, BridgeError, BridgeStatus, CloudConnector, ComponentRequest, DeviceReporter,
    DiscoveryAdapter, InboundRouter, InterfaceDescriptor, PnpComponent, ProtocolAdapter,
    RegistrationCallback, Result, TwinClient, TwinClientHandle,
};

/// Ordered record of adapter callbacks, e.g. `create:env_sensor`.
#[derive(Default, Clone)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn push(&self, event: impl Into<String>) {
        self.0.lock().unwrap().push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, event: &str) -> usize {
        self.0.lock().unwrap().iter().filter(|e| *e == event).count()
    }
}

/// Discovery adapter that hands its reporter to the test.
pub struct MockDiscovery {
    identity: &'static str,
    pub reporter: Arc<Mutex<Option<DeviceReporter>>>,
    pub starts: Arc<AtomicUsize>,
    pub stops: Arc<AtomicUsize>,
}

impl MockDiscovery {
    pub fn new(identity: &'static str) -> Self {
        Self {
            identity,
            reporter: Arc::default(),
            starts: Arc::default(),
            stops: Arc::default(),
        }
    }

    /// A second view sharing the same counters and reporter slot.
    pub fn handle(&self) -> DiscoveryHandle {
        DiscoveryHandle {
            reporter: self.reporter.clone(),
            starts: self.starts.clone(),
            stops: self.stops.clone(),
        }
    }
}

impl DiscoveryAdapter for MockDiscovery {
    fn identity(&self) -> &str {
        self.identity
    }

    fn start_discovery(
        &self,
        reporter: DeviceReporter,
        _device_params: &[String],
        _adapter_params: Option<&str>,
    ) -> Result<()> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        *self.reporter.lock().unwrap() = Some(reporter);
        Ok(())
    }

    fn stop_discovery(&self) -> Result<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Clone)]
pub struct DiscoveryHandle {
    reporter: Arc<Mutex<Option<DeviceReporter>>>,
    pub starts: Arc<AtomicUsize>,
    pub stops: Arc<AtomicUsize>,
}

impl DiscoveryHandle {
    pub fn reporter(&self) -> Option<DeviceReporter> {
        self.reporter.lock().unwrap().clone()
    }
}

/// Protocol adapter whose components echo commands and journal every callback.
pub struct MockProtocol {
    identity: &'static str,
    journal: Journal,
}

impl MockProtocol {
    pub fn new(identity: &'static str, journal: Journal) -> Self {
        Self { identity, journal }
    }
}

impl ProtocolAdapter for MockProtocol {
    fn identity(&self) -> &str {
        self.identity
    }

    fn create_adapter(
        &self,
        _global_config: Option<&serde_json::Value>,
    ) -> Result<Box<dyn AdapterInstance>> {
        self.journal.push("create_adapter");
        Ok(Box::new(MockInstance {
            journal: self.journal.clone(),
        }))
    }
}

struct MockInstance {
    journal: Journal,
}

impl AdapterInstance for MockInstance {
    fn create_component(&self, request: ComponentRequest<'_>) -> Result<Box<dyn PnpComponent>> {
        if request.config.get("fail").and_then(|v| v.as_bool()) == Some(true) {
            self.journal.push(format!("create_failed:{}", request.component_name));
            return Err(BridgeError::failed("device refused connection"));
        }
        self.journal.push(format!("create:{}", request.component_name));
        Ok(Box::new(MockComponent {
            name: request.component_name.to_string(),
            journal: self.journal.clone(),
        }))
    }

    fn destroy(&self) -> Result<()> {
        self.journal.push("destroy_adapter");
        Ok(())
    }
}

struct MockComponent {
    name: String,
    journal: Journal,
}

impl PnpComponent for MockComponent {
    fn start(&self, _client: TwinClientHandle) -> Result<()> {
        self.journal.push(format!("start:{}", self.name));
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        self.journal.push(format!("stop:{}", self.name));
        Ok(())
    }

    fn destroy(&self) -> Result<()> {
        self.journal.push(format!("destroy:{}", self.name));
        Ok(())
    }

    fn handle_command(&self, command: &str, payload: &serde_json::Value) -> Result<serde_json::Value> {
        Ok(serde_json::json!({ "component": self.name, "command": command, "payload": payload }))
    }

    fn handle_property_update(
        &self,
        property: &str,
        _value: &serde_json::Value,
        version: u64,
    ) -> Result<()> {
        self.journal
            .push(format!("property:{}:{}:{}", self.name, property, version));
        Ok(())
    }
}

/// Shared script and record of everything the mock cloud saw.
#[derive(Default)]
pub struct CloudScript {
    /// Number of upcoming registrations to reject.
    pub reject_next: AtomicUsize,
    /// Keep completion callbacks pending forever.
    pub hang: AtomicBool,
    pub connects: AtomicUsize,
    pub clients_destroyed: AtomicUsize,
    /// Component names of every registration attempt.
    pub attempts: Mutex<Vec<Vec<String>>>,
    /// Component names of every accepted registration.
    pub accepted: Mutex<Vec<Vec<String>>>,
    pub statuses: Mutex<Vec<String>>,
    pub router: Mutex<Option<Arc<dyn InboundRouter>>>,
    held: Mutex<Vec<RegistrationCallback>>,
}

impl CloudScript {
    pub fn accepted(&self) -> Vec<Vec<String>> {
        self.accepted.lock().unwrap().clone()
    }

    pub fn attempts(&self) -> Vec<Vec<String>> {
        self.attempts.lock().unwrap().clone()
    }

    pub fn last_accepted(&self) -> Option<Vec<String>> {
        self.accepted.lock().unwrap().last().cloned()
    }

    pub fn statuses(&self) -> Vec<String> {
        self.statuses.lock().unwrap().clone()
    }

    pub fn router(&self) -> Option<Arc<dyn InboundRouter>> {
        self.router.lock().unwrap().clone()
    }
}

/// Connector backed by a [`CloudScript`].
#[derive(Clone, Default)]
pub struct MockConnector {
    pub script: Arc<CloudScript>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CloudConnector for MockConnector {
    type Transport = ();

    fn connect(&self) -> impl Future<Output = Result<()>> + Send {
        let script = self.script.clone();
        async move {
            script.connects.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn create_client(
        &self,
        _transport: (),
        router: Arc<dyn InboundRouter>,
    ) -> Result<Arc<dyn TwinClient>> {
        *self.script.router.lock().unwrap() = Some(router);
        Ok(Arc::new(MockTwin {
            script: self.script.clone(),
        }))
    }
}

struct MockTwin {
    script: Arc<CloudScript>,
}

#[async_trait]
impl TwinClient for MockTwin {
    fn register_interfaces(
        &self,
        interfaces: Vec<InterfaceDescriptor>,
        on_complete: RegistrationCallback,
    ) {
        let names: Vec<String> = interfaces
            .into_iter()
            .map(|i| i.component_name)
            .collect();
        self.script.attempts.lock().unwrap().push(names.clone());

        if self.script.hang.load(Ordering::SeqCst) {
            self.script.held.lock().unwrap().push(on_complete);
            return;
        }

        let rejected = self
            .script
            .reject_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();

        let script = self.script.clone();
        tokio::spawn(async move {
            if rejected {
                on_complete(Err(BridgeError::failed("registration rejected")));
            } else {
                script.accepted.lock().unwrap().push(names);
                on_complete(Ok(()));
            }
        });
    }

    async fn send_telemetry(&self, _component: &str, _payload: serde_json::Value) -> Result<()> {
        Ok(())
    }

    async fn report_property(
        &self,
        _component: &str,
        _property: &str,
        _value: serde_json::Value,
    ) -> Result<()> {
        Ok(())
    }

    async fn publish_status(&self, status: &BridgeStatus) -> Result<()> {
        self.script.statuses.lock().unwrap().push(status.status.clone());
        Ok(())
    }

    async fn destroy(&self) {
        self.script.clients_destroyed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Poll `condition` until it holds, failing the test after five seconds.
pub async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        if tokio::time::Instant::now() >= deadline {
            panic!("timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
