//! Protocol adapter instances and the components living under them.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::adapter::{AdapterInstance, ComponentRequest, PnpComponent, ProtocolAdapter};
use crate::cloud::{InboundRouter, TwinClientHandle};
use crate::error::{BridgeError, Result};

/// Lifecycle state of a component. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ComponentState {
    Created,
    Started,
    Stopped,
    Destroyed,
}

impl ComponentState {
    /// Whether moving from `self` to `next` is legal.
    pub fn can_transition_to(self, next: ComponentState) -> bool {
        matches!(
            (self, next),
            (ComponentState::Created, ComponentState::Started)
                | (ComponentState::Created, ComponentState::Stopped)
                | (ComponentState::Started, ComponentState::Stopped)
                | (ComponentState::Stopped, ComponentState::Destroyed)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ComponentState::Created => "created",
            ComponentState::Started => "started",
            ComponentState::Stopped => "stopped",
            ComponentState::Destroyed => "destroyed",
        }
    }
}

impl fmt::Display for ComponentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One bound component.
pub struct ComponentHandle {
    name: String,
    adapter_identity: String,
    interface_id: String,
    state: ComponentState,
    component: Arc<dyn PnpComponent>,
}

impl ComponentHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn adapter_identity(&self) -> &str {
        &self.adapter_identity
    }

    pub fn interface_id(&self) -> &str {
        &self.interface_id
    }

    pub fn state(&self) -> ComponentState {
        self.state
    }

    fn transition(&mut self, next: ComponentState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(BridgeError::invalid(format!(
                "component '{}' cannot move from {} to {}",
                self.name, self.state, next
            )));
        }
        self.state = next;
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        let result = self.component.stop();
        self.transition(ComponentState::Stopped)?;
        result
    }

    fn destroy(&mut self) -> Result<()> {
        if self.state != ComponentState::Stopped {
            if let Err(e) = self.stop() {
                tracing::warn!(component = %self.name, error = %e, "Component stop failed");
            }
        }
        let result = self.component.destroy();
        self.transition(ComponentState::Destroyed)?;
        result
    }
}

impl fmt::Debug for ComponentHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentHandle")
            .field("name", &self.name)
            .field("adapter_identity", &self.adapter_identity)
            .field("interface_id", &self.interface_id)
            .field("state", &self.state)
            .finish()
    }
}

/// A created adapter instance and its components.
struct AdapterRegistration {
    identity: String,
    instance: Box<dyn AdapterInstance>,
    components: RwLock<Vec<ComponentHandle>>,
}

impl AdapterRegistration {
    fn read(&self) -> RwLockReadGuard<'_, Vec<ComponentHandle>> {
        self.components.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<ComponentHandle>> {
        self.components
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Owns protocol adapters and drives each component's lifecycle.
///
/// Adapter instances are created lazily on the first component that names
/// them and destroyed once at teardown. Routing takes read locks only and
/// calls the component after the lock is released.
pub struct ComponentAdapterManager {
    adapters: HashMap<String, Arc<dyn ProtocolAdapter>>,
    global_configs: HashMap<String, serde_json::Value>,
    registrations: RwLock<Vec<Arc<AdapterRegistration>>>,
}

impl ComponentAdapterManager {
    /// Build the manager from the manifest's protocol adapters.
    pub fn new(
        adapters: Vec<Arc<dyn ProtocolAdapter>>,
        global_configs: impl IntoIterator<Item = (String, serde_json::Value)>,
    ) -> Result<Self> {
        let mut registry: HashMap<String, Arc<dyn ProtocolAdapter>> = HashMap::new();
        for adapter in adapters {
            let identity = adapter.identity().to_string();
            if identity.is_empty() {
                return Err(BridgeError::invalid("protocol adapter identity cannot be empty"));
            }
            if registry.insert(identity.clone(), adapter).is_some() {
                return Err(BridgeError::duplicate(format!(
                    "protocol adapter '{}' registered twice",
                    identity
                )));
            }
        }

        Ok(Self {
            adapters: registry,
            global_configs: global_configs.into_iter().collect(),
            registrations: RwLock::new(Vec::new()),
        })
    }

    fn registrations(&self) -> Vec<Arc<AdapterRegistration>> {
        self.registrations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn registration(&self, identity: &str) -> Result<Arc<AdapterRegistration>> {
        let mut registrations = self
            .registrations
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        if let Some(existing) = registrations.iter().find(|r| r.identity == identity) {
            return Ok(existing.clone());
        }

        let adapter = self
            .adapters
            .get(identity)
            .ok_or_else(|| BridgeError::not_found(format!("protocol adapter '{}'", identity)))?;

        let instance = adapter.create_adapter(self.global_configs.get(identity))?;
        tracing::info!(adapter = %identity, "Protocol adapter created");

        let registration = Arc::new(AdapterRegistration {
            identity: identity.to_string(),
            instance,
            components: RwLock::new(Vec::new()),
        });
        registrations.push(registration.clone());
        Ok(registration)
    }

    /// Create a component under `adapter_identity`, creating the adapter on first use.
    pub fn create_component(
        &self,
        adapter_identity: &str,
        request: ComponentRequest<'_>,
    ) -> Result<()> {
        if self.contains(request.component_name) {
            return Err(BridgeError::duplicate(format!(
                "component '{}' already exists",
                request.component_name
            )));
        }

        let registration = self.registration(adapter_identity)?;
        let component = registration.instance.create_component(request)?;

        registration.write().push(ComponentHandle {
            name: request.component_name.to_string(),
            adapter_identity: adapter_identity.to_string(),
            interface_id: request.interface_id.to_string(),
            state: ComponentState::Created,
            component: Arc::from(component),
        });

        tracing::info!(
            component = %request.component_name,
            adapter = %adapter_identity,
            interface = %request.interface_id,
            "Component created"
        );
        Ok(())
    }

    /// Start every component still in `Created`; returns how many started.
    pub fn start_all_components(&self, client: &TwinClientHandle) -> usize {
        let mut started = 0;
        for registration in self.registrations() {
            let pending: Vec<(String, Arc<dyn PnpComponent>)> = registration
                .read()
                .iter()
                .filter(|h| h.state == ComponentState::Created)
                .map(|h| (h.name.clone(), h.component.clone()))
                .collect();

            // Components may call back into the manager from `start`.
            for (name, component) in pending {
                if let Err(e) = component.start(client.clone()) {
                    tracing::warn!(
                        component = %name,
                        error = %e,
                        "Component failed to start, will retry on next reconciliation"
                    );
                    continue;
                }

                let marked = registration
                    .write()
                    .iter_mut()
                    .find(|h| Arc::ptr_eq(&h.component, &component))
                    .filter(|h| h.state == ComponentState::Created)
                    .map(|h| h.state = ComponentState::Started)
                    .is_some();

                if marked {
                    started += 1;
                    tracing::info!(component = %name, "Component started");
                } else {
                    tracing::debug!(component = %name, "Component removed while starting, stopping it");
                    if let Err(e) = component.stop() {
                        tracing::warn!(component = %name, error = %e, "Component stop failed");
                    }
                }
            }
        }
        started
    }

    /// Stop every component that is not stopped yet.
    pub fn stop_all_components(&self) {
        for registration in self.registrations() {
            for handle in registration
                .write()
                .iter_mut()
                .filter(|h| h.state.can_transition_to(ComponentState::Stopped))
            {
                if let Err(e) = handle.stop() {
                    tracing::warn!(component = %handle.name, error = %e, "Component stop failed");
                }
            }
        }
    }

    /// Destroy and unlink every component, stopping any that are still running.
    pub fn destroy_all_components(&self) {
        for registration in self.registrations() {
            let drained: Vec<ComponentHandle> = registration.write().drain(..).collect();
            for mut handle in drained {
                if let Err(e) = handle.destroy() {
                    tracing::warn!(component = %handle.name, error = %e, "Component destroy failed");
                }
            }
        }
    }

    /// Stop and destroy every component, then destroy every adapter instance.
    pub fn teardown(&self) {
        self.stop_all_components();
        self.destroy_all_components();

        let registrations: Vec<Arc<AdapterRegistration>> = self
            .registrations
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();

        for registration in registrations {
            match registration.instance.destroy() {
                Ok(()) => tracing::info!(adapter = %registration.identity, "Protocol adapter destroyed"),
                Err(e) => tracing::warn!(
                    adapter = %registration.identity,
                    error = %e,
                    "Protocol adapter destroy failed"
                ),
            }
        }
    }

    /// Stop, destroy and unlink a single component.
    pub fn remove_component(&self, name: &str) -> Result<()> {
        for registration in self.registrations() {
            let removed = {
                let mut components = registration.write();
                components
                    .iter()
                    .position(|h| h.name == name)
                    .map(|index| components.remove(index))
            };
            if let Some(mut handle) = removed {
                handle.destroy()?;
                tracing::info!(component = %name, "Component removed");
                return Ok(());
            }
        }
        Err(BridgeError::not_found(format!("component '{}'", name)))
    }

    fn lookup(&self, name: &str) -> Option<Arc<dyn PnpComponent>> {
        self.registrations().iter().find_map(|registration| {
            registration
                .read()
                .iter()
                .find(|h| h.name == name)
                .map(|h| h.component.clone())
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.component_state(name).is_some()
    }

    pub fn component_state(&self, name: &str) -> Option<ComponentState> {
        self.registrations().iter().find_map(|registration| {
            registration
                .read()
                .iter()
                .find(|h| h.name == name)
                .map(ComponentHandle::state)
        })
    }

    /// Names of all live components, grouped by adapter.
    pub fn component_names(&self) -> Vec<String> {
        self.registrations()
            .iter()
            .flat_map(|registration| {
                registration
                    .read()
                    .iter()
                    .map(|h| h.name.clone())
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    pub fn component_count(&self) -> usize {
        self.registrations()
            .iter()
            .map(|registration| registration.read().len())
            .sum()
    }

    /// Identities of the adapter instances created so far.
    pub fn adapter_identities(&self) -> Vec<String> {
        self.registrations()
            .iter()
            .map(|registration| registration.identity.clone())
            .collect()
    }
}

impl InboundRouter for ComponentAdapterManager {
    fn route_command(
        &self,
        component: &str,
        command: &str,
        payload: &serde_json::Value,
    ) -> Result<serde_json::Value> {
        let Some(target) = self.lookup(component) else {
            tracing::warn!(component = %component, command = %command, "Command for unknown component dropped");
            return Err(BridgeError::not_found(format!("component '{}'", component)));
        };
        tracing::debug!(component = %component, command = %command, "Routing command");
        target.handle_command(command, payload)
    }

    fn route_property_update(
        &self,
        component: &str,
        property: &str,
        value: &serde_json::Value,
        version: u64,
    ) -> Result<()> {
        let Some(target) = self.lookup(component) else {
            tracing::warn!(
                component = %component,
                property = %property,
                "Property update for unknown component dropped"
            );
            return Err(BridgeError::not_found(format!("component '{}'", component)));
        };
        tracing::debug!(component = %component, property = %property, version = version, "Routing property update");
        target.handle_property_update(property, value, version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{DeviceDescription, PnpMessage};
    use std::sync::{Mutex, OnceLock, Weak};

    #[derive(Default)]
    struct Calls(Mutex<Vec<String>>);

    impl Calls {
        fn push(&self, call: impl Into<String>) {
            self.0.lock().unwrap().push(call.into());
        }

        fn list(&self) -> Vec<String> {
            self.0.lock().unwrap().clone()
        }
    }

    struct TestAdapter {
        calls: Arc<Calls>,
        fail_start: bool,
    }

    struct TestInstance {
        calls: Arc<Calls>,
        fail_start: bool,
    }

    struct TestComponent {
        name: String,
        calls: Arc<Calls>,
        fail_start: bool,
    }

    impl ProtocolAdapter for TestAdapter {
        fn identity(&self) -> &str {
            "test"
        }

        fn create_adapter(&self, _: Option<&serde_json::Value>) -> Result<Box<dyn AdapterInstance>> {
            self.calls.push("create_adapter");
            Ok(Box::new(TestInstance {
                calls: self.calls.clone(),
                fail_start: self.fail_start,
            }))
        }
    }

    impl AdapterInstance for TestInstance {
        fn create_component(&self, request: ComponentRequest<'_>) -> Result<Box<dyn PnpComponent>> {
            if request.component_name == "broken" {
                return Err(BridgeError::failed("device unreachable"));
            }
            self.calls.push(format!("create:{}", request.component_name));
            Ok(Box::new(TestComponent {
                name: request.component_name.to_string(),
                calls: self.calls.clone(),
                fail_start: self.fail_start,
            }))
        }

        fn destroy(&self) -> Result<()> {
            self.calls.push("destroy_adapter");
            Ok(())
        }
    }

    impl PnpComponent for TestComponent {
        fn start(&self, _: TwinClientHandle) -> Result<()> {
            if self.fail_start {
                return Err(BridgeError::failed("offline"));
            }
            self.calls.push(format!("start:{}", self.name));
            Ok(())
        }

        fn stop(&self) -> Result<()> {
            self.calls.push(format!("stop:{}", self.name));
            Ok(())
        }

        fn destroy(&self) -> Result<()> {
            self.calls.push(format!("destroy:{}", self.name));
            Ok(())
        }

        fn handle_command(&self, command: &str, _: &serde_json::Value) -> Result<serde_json::Value> {
            Ok(serde_json::json!({ "echo": command }))
        }
    }

    fn manager(fail_start: bool) -> (ComponentAdapterManager, Arc<Calls>) {
        let calls = Arc::new(Calls::default());
        let adapter: Arc<dyn ProtocolAdapter> = Arc::new(TestAdapter {
            calls: calls.clone(),
            fail_start,
        });
        (
            ComponentAdapterManager::new(vec![adapter], []).unwrap(),
            calls,
        )
    }

    fn create(manager: &ComponentAdapterManager, name: &str) -> Result<()> {
        let message = PnpMessage::arrival(&DeviceDescription::new()).unwrap();
        manager.create_component(
            "test",
            ComponentRequest {
                component_name: name,
                interface_id: name,
                config: &serde_json::Value::Null,
                message: &message,
            },
        )
    }

    #[test]
    fn test_state_transitions() {
        use ComponentState::*;
        assert!(Created.can_transition_to(Started));
        assert!(Created.can_transition_to(Stopped));
        assert!(Started.can_transition_to(Stopped));
        assert!(Stopped.can_transition_to(Destroyed));
        assert!(!Started.can_transition_to(Created));
        assert!(!Started.can_transition_to(Destroyed));
        assert!(!Destroyed.can_transition_to(Started));
    }

    #[test]
    fn test_adapter_created_lazily_once() {
        let (manager, calls) = manager(false);
        assert!(manager.adapter_identities().is_empty());

        create(&manager, "c1").unwrap();
        create(&manager, "c2").unwrap();

        let list = calls.list();
        assert_eq!(list.iter().filter(|c| *c == "create_adapter").count(), 1);
        assert_eq!(manager.component_count(), 2);
        assert_eq!(manager.component_names(), vec!["c1", "c2"]);
    }

    #[test]
    fn test_duplicate_component_rejected() {
        let (manager, _) = manager(false);
        create(&manager, "c1").unwrap();
        assert!(matches!(
            create(&manager, "c1"),
            Err(BridgeError::DuplicateEntry(_))
        ));
        assert_eq!(manager.component_count(), 1);
    }

    #[test]
    fn test_unknown_adapter() {
        let (manager, _) = manager(false);
        let message = PnpMessage::arrival(&DeviceDescription::new()).unwrap();
        let result = manager.create_component(
            "missing",
            ComponentRequest {
                component_name: "c1",
                interface_id: "c1",
                config: &serde_json::Value::Null,
                message: &message,
            },
        );
        assert!(matches!(result, Err(BridgeError::NotFound(_))));
    }

    #[test]
    fn test_failed_create_is_never_started() {
        let (manager, calls) = manager(false);
        assert!(create(&manager, "broken").is_err());

        assert_eq!(manager.start_all_components(&TwinClientHandle::new()), 0);
        assert!(!manager.contains("broken"));
        assert!(!calls.list().iter().any(|c| c.starts_with("start:")));
    }

    #[test]
    fn test_start_only_created_components() {
        let (manager, calls) = manager(false);
        create(&manager, "c1").unwrap();
        assert_eq!(manager.start_all_components(&TwinClientHandle::new()), 1);

        create(&manager, "c2").unwrap();
        assert_eq!(manager.start_all_components(&TwinClientHandle::new()), 1);

        let starts: Vec<String> = calls
            .list()
            .into_iter()
            .filter(|c| c.starts_with("start:"))
            .collect();
        assert_eq!(starts, vec!["start:c1", "start:c2"]);
        assert_eq!(manager.component_state("c1"), Some(ComponentState::Started));
    }

    #[test]
    fn test_start_failure_keeps_created() {
        let (manager, _) = manager(true);
        create(&manager, "c1").unwrap();
        assert_eq!(manager.start_all_components(&TwinClientHandle::new()), 0);
        assert_eq!(manager.component_state("c1"), Some(ComponentState::Created));
    }

    type ManagerSlot = Arc<OnceLock<Weak<ComponentAdapterManager>>>;

    /// Adapter whose components look themselves up in the manager on start.
    struct ReentrantAdapter {
        slot: ManagerSlot,
        seen: Arc<Calls>,
    }

    struct ReentrantComponent {
        name: String,
        slot: ManagerSlot,
        seen: Arc<Calls>,
    }

    impl ProtocolAdapter for ReentrantAdapter {
        fn identity(&self) -> &str {
            "reentrant"
        }

        fn create_adapter(&self, _: Option<&serde_json::Value>) -> Result<Box<dyn AdapterInstance>> {
            Ok(Box::new(ReentrantAdapter {
                slot: self.slot.clone(),
                seen: self.seen.clone(),
            }))
        }
    }

    impl AdapterInstance for ReentrantAdapter {
        fn create_component(&self, request: ComponentRequest<'_>) -> Result<Box<dyn PnpComponent>> {
            Ok(Box::new(ReentrantComponent {
                name: request.component_name.to_string(),
                slot: self.slot.clone(),
                seen: self.seen.clone(),
            }))
        }

        fn destroy(&self) -> Result<()> {
            Ok(())
        }
    }

    impl PnpComponent for ReentrantComponent {
        fn start(&self, _: TwinClientHandle) -> Result<()> {
            let manager = self
                .slot
                .get()
                .and_then(Weak::upgrade)
                .ok_or_else(|| BridgeError::failed("manager gone"))?;
            let state = manager.component_state(&self.name);
            self.seen.push(format!("{}:{:?}", self.name, state));
            manager.route_command(&self.name, "ping", &serde_json::Value::Null)?;
            Ok(())
        }

        fn stop(&self) -> Result<()> {
            Ok(())
        }

        fn destroy(&self) -> Result<()> {
            Ok(())
        }

        fn handle_command(&self, command: &str, _: &serde_json::Value) -> Result<serde_json::Value> {
            self.seen.push(format!("{}:{}", self.name, command));
            Ok(serde_json::Value::Null)
        }
    }

    #[test]
    fn test_component_start_can_call_back_into_manager() {
        let slot: ManagerSlot = Arc::default();
        let seen = Arc::new(Calls::default());
        let adapter: Arc<dyn ProtocolAdapter> = Arc::new(ReentrantAdapter {
            slot: slot.clone(),
            seen: seen.clone(),
        });
        let manager = Arc::new(ComponentAdapterManager::new(vec![adapter], []).unwrap());
        slot.set(Arc::downgrade(&manager)).unwrap();

        let message = PnpMessage::arrival(&DeviceDescription::new()).unwrap();
        for name in ["r1", "r2"] {
            manager
                .create_component(
                    "reentrant",
                    ComponentRequest {
                        component_name: name,
                        interface_id: name,
                        config: &serde_json::Value::Null,
                        message: &message,
                    },
                )
                .unwrap();
        }

        assert_eq!(manager.start_all_components(&TwinClientHandle::new()), 2);
        assert_eq!(
            seen.list(),
            vec!["r1:Some(Created)", "r1:ping", "r2:Some(Created)", "r2:ping"]
        );
        assert_eq!(manager.component_state("r1"), Some(ComponentState::Started));
        assert_eq!(manager.component_state("r2"), Some(ComponentState::Started));
    }

    #[test]
    fn test_teardown_order() {
        let (manager, calls) = manager(false);
        create(&manager, "c1").unwrap();
        manager.start_all_components(&TwinClientHandle::new());

        manager.teardown();

        let list = calls.list();
        let position = |call: &str| list.iter().position(|c| c == call).unwrap();
        assert!(position("stop:c1") < position("destroy:c1"));
        assert!(position("destroy:c1") < position("destroy_adapter"));
        assert_eq!(list.iter().filter(|c| *c == "stop:c1").count(), 1);
        assert_eq!(manager.component_count(), 0);
    }

    #[test]
    fn test_routing_after_destroy_is_not_found() {
        let (manager, _) = manager(false);
        create(&manager, "c1").unwrap();

        let response = manager
            .route_command("c1", "ping", &serde_json::Value::Null)
            .unwrap();
        assert_eq!(response["echo"], "ping");

        manager.destroy_all_components();

        assert!(matches!(
            manager.route_command("c1", "ping", &serde_json::Value::Null),
            Err(BridgeError::NotFound(_))
        ));
        assert!(matches!(
            manager.route_property_update("c1", "p", &serde_json::Value::Null, 1),
            Err(BridgeError::NotFound(_))
        ));
    }

    #[test]
    fn test_property_update_not_supported_by_default() {
        let (manager, _) = manager(false);
        create(&manager, "c1").unwrap();
        assert!(matches!(
            manager.route_property_update("c1", "p", &serde_json::json!(1), 1),
            Err(BridgeError::NotSupported(_))
        ));
    }

    #[test]
    fn test_remove_component() {
        let (manager, calls) = manager(false);
        create(&manager, "c1").unwrap();
        manager.start_all_components(&TwinClientHandle::new());

        manager.remove_component("c1").unwrap();

        assert!(!manager.contains("c1"));
        let list = calls.list();
        assert!(list.contains(&"stop:c1".to_string()));
        assert!(list.contains(&"destroy:c1".to_string()));
        assert!(matches!(
            manager.remove_component("c1"),
            Err(BridgeError::NotFound(_))
        ));
    }

    #[test]
    fn test_duplicate_adapter_identity_rejected() {
        let calls = Arc::new(Calls::default());
        let a: Arc<dyn ProtocolAdapter> = Arc::new(TestAdapter {
            calls: calls.clone(),
            fail_start: false,
        });
        let b: Arc<dyn ProtocolAdapter> = Arc::new(TestAdapter {
            calls,
            fail_start: false,
        });
        assert!(matches!(
            ComponentAdapterManager::new(vec![a, b], []),
            Err(BridgeError::DuplicateEntry(_))
        ));
    }
}
