//! Cloud twin over Zenoh.
//!
//! # Key Expressions
//!
//! ```text
//! <prefix>[/<scope>]/<device>/@/status
//! <prefix>[/<scope>]/<device>/@/interfaces
//! <prefix>[/<scope>]/<device>/@/components/<component>/alive
//! <prefix>[/<scope>]/<device>/<component>/telemetry
//! <prefix>[/<scope>]/<device>/<component>/properties/reported/<name>
//! <prefix>[/<scope>]/<device>/<component>/properties/desired/<name>
//! <prefix>[/<scope>]/<device>/<component>/commands/<name>[/response]
//! ```
//!
//! Every reconciliation opens a fresh session, declares one liveliness token
//! per registered component and puts the complete interface document.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use zenoh::Session;
use zenoh::liveliness::LivelinessToken;

use pnpbridge_common::{Format, InboundKey, TwinKeys, ZenohConfig, decode_auto, encode};
use pnpbridge_core::{
    BridgeError, BridgeStatus, CloudConnector, InboundRouter, InterfaceDescriptor,
    RegistrationCallback, Result, TwinClient,
};

use crate::config::{PnpBridgeConfig, ResolvedConnection};

/// Interface document put at `<root>/@/interfaces` on every registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterfaceDocument {
    pub device_id: String,
    pub timestamp: i64,
    pub interfaces: Vec<InterfaceDescriptor>,
}

/// Response put at `.../commands/<name>/response`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResponse {
    pub status: u16,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub payload: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CommandResponse {
    fn from_result(result: Result<serde_json::Value>) -> Self {
        match result {
            Ok(payload) => Self {
                status: 200,
                payload,
                error: None,
            },
            Err(e) => {
                let status = match &e {
                    BridgeError::NotFound(_) => 404,
                    BridgeError::InvalidArgument(_) => 400,
                    BridgeError::NotSupported(_) => 501,
                    _ => 500,
                };
                Self {
                    status,
                    payload: serde_json::Value::Null,
                    error: Some(e.to_string()),
                }
            }
        }
    }
}

/// Desired property update as sent by the cloud.
///
/// A bare value is accepted too and treated as version 0.
#[derive(Debug, Clone, PartialEq)]
pub struct DesiredProperty {
    pub value: serde_json::Value,
    pub version: u64,
}

impl DesiredProperty {
    pub fn from_json(document: serde_json::Value) -> Self {
        match document {
            serde_json::Value::Object(mut map) if map.contains_key("value") => {
                let version = map
                    .get("version")
                    .and_then(serde_json::Value::as_u64)
                    .unwrap_or(0);
                Self {
                    value: map.remove("value").unwrap_or_default(),
                    version,
                }
            }
            value => Self { value, version: 0 },
        }
    }
}

fn transport_error(context: &str, e: zenoh::Error) -> BridgeError {
    BridgeError::failed(format!("{}: {}", context, e))
}

/// Opens Zenoh sessions and builds [`ZenohTwinClient`]s.
#[derive(Debug, Clone)]
pub struct ZenohConnector {
    zenoh: ZenohConfig,
    keys: TwinKeys,
    device_id: String,
    format: Format,
}

impl ZenohConnector {
    pub fn new(config: &PnpBridgeConfig, connection: &ResolvedConnection) -> Result<Self> {
        let keys = TwinKeys::with_prefix(
            &config.twin.key_prefix,
            connection.scope.as_deref(),
            &connection.device_id,
        )?;
        Ok(Self {
            zenoh: config.zenoh.with_endpoints(connection.endpoints.iter().cloned()),
            keys,
            device_id: connection.device_id.clone(),
            format: config.twin.format,
        })
    }

    pub fn keys(&self) -> &TwinKeys {
        &self.keys
    }
}

impl CloudConnector for ZenohConnector {
    type Transport = Session;

    async fn connect(&self) -> Result<Session> {
        let session = pnpbridge_common::connect(&self.zenoh).await?;
        tracing::debug!(root = %self.keys.root(), "Twin transport connected");
        Ok(session)
    }

    fn create_client(
        &self,
        session: Session,
        router: Arc<dyn InboundRouter>,
    ) -> Result<Arc<dyn TwinClient>> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| BridgeError::failed(format!("no Tokio runtime for twin client: {}", e)))?;

        let inbound = runtime.spawn(inbound_loop(
            session.clone(),
            self.keys.clone(),
            self.format,
            router,
        ));

        Ok(Arc::new(ZenohTwinClient {
            session,
            keys: self.keys.clone(),
            device_id: self.device_id.clone(),
            format: self.format,
            tokens: Arc::new(tokio::sync::Mutex::new(Vec::new())),
            inbound: Mutex::new(Some(inbound)),
        }))
    }
}

/// Twin client bound to one Zenoh session.
pub struct ZenohTwinClient {
    session: Session,
    keys: TwinKeys,
    device_id: String,
    format: Format,
    tokens: Arc<tokio::sync::Mutex<Vec<LivelinessToken>>>,
    inbound: Mutex<Option<JoinHandle<()>>>,
}

impl ZenohTwinClient {
    async fn put<T: Serialize>(&self, key: String, value: &T) -> Result<()> {
        let payload = encode(value, self.format)?;
        self.session
            .put(&key, payload)
            .await
            .map_err(|e| transport_error(&format!("put to '{}' failed", key), e))?;
        tracing::trace!(key = %key, "Published");
        Ok(())
    }
}

#[async_trait]
impl TwinClient for ZenohTwinClient {
    fn register_interfaces(
        &self,
        interfaces: Vec<InterfaceDescriptor>,
        on_complete: RegistrationCallback,
    ) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            on_complete(Err(BridgeError::failed("no Tokio runtime for registration")));
            return;
        };

        let session = self.session.clone();
        let keys = self.keys.clone();
        let format = self.format;
        let tokens = self.tokens.clone();
        let document = InterfaceDocument {
            device_id: self.device_id.clone(),
            timestamp: pnpbridge_common::current_timestamp_millis(),
            interfaces,
        };

        runtime.spawn(async move {
            let result = register(&session, &keys, format, &tokens, &document).await;
            if let Err(e) = &result {
                tracing::warn!(error = %e, "Interface registration failed");
            }
            on_complete(result);
        });
    }

    async fn send_telemetry(&self, component: &str, payload: serde_json::Value) -> Result<()> {
        self.put(self.keys.telemetry(component), &payload).await
    }

    async fn report_property(
        &self,
        component: &str,
        property: &str,
        value: serde_json::Value,
    ) -> Result<()> {
        self.put(self.keys.reported_property(component, property), &value)
            .await
    }

    async fn publish_status(&self, status: &BridgeStatus) -> Result<()> {
        self.put(self.keys.status(), status).await
    }

    async fn destroy(&self) {
        if let Some(inbound) = self
            .inbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            inbound.abort();
        }

        // Dropping a token undeclares it.
        self.tokens.lock().await.clear();

        if let Err(e) = self.session.close().await {
            tracing::warn!(error = %e, "Failed to close Zenoh session");
        }
        tracing::debug!(root = %self.keys.root(), "Twin client destroyed");
    }
}

async fn register(
    session: &Session,
    keys: &TwinKeys,
    format: Format,
    tokens: &tokio::sync::Mutex<Vec<LivelinessToken>>,
    document: &InterfaceDocument,
) -> Result<()> {
    let mut tokens = tokens.lock().await;
    tokens.clear();

    for interface in &document.interfaces {
        let key = keys.component_alive(&interface.component_name);
        let token = session
            .liveliness()
            .declare_token(&key)
            .await
            .map_err(|e| transport_error(&format!("liveliness token '{}'", key), e))?;
        tokens.push(token);
    }

    let payload = encode(document, format)?;
    session
        .put(keys.interfaces(), payload)
        .await
        .map_err(|e| transport_error("interface document put failed", e))?;

    tracing::info!(
        root = %keys.root(),
        interfaces = document.interfaces.len(),
        "Interface document published"
    );
    Ok(())
}

async fn inbound_loop(
    session: Session,
    keys: TwinKeys,
    format: Format,
    router: Arc<dyn InboundRouter>,
) {
    let commands = match session.declare_subscriber(keys.commands_wildcard()).await {
        Ok(subscriber) => subscriber,
        Err(e) => {
            tracing::error!(error = %e, "Failed to subscribe to commands");
            return;
        }
    };
    let desired = match session
        .declare_subscriber(keys.desired_properties_wildcard())
        .await
    {
        Ok(subscriber) => subscriber,
        Err(e) => {
            tracing::error!(error = %e, "Failed to subscribe to desired properties");
            return;
        }
    };

    loop {
        tokio::select! {
            sample = commands.recv_async() => match sample {
                Ok(sample) => {
                    let key = sample.key_expr().as_str().to_string();
                    let payload = sample.payload().to_bytes();
                    handle_inbound(&session, &keys, format, router.as_ref(), &key, &payload).await;
                }
                Err(e) => {
                    tracing::debug!(error = %e, "Command subscriber closed");
                    break;
                }
            },
            sample = desired.recv_async() => match sample {
                Ok(sample) => {
                    let key = sample.key_expr().as_str().to_string();
                    let payload = sample.payload().to_bytes();
                    handle_inbound(&session, &keys, format, router.as_ref(), &key, &payload).await;
                }
                Err(e) => {
                    tracing::debug!(error = %e, "Desired property subscriber closed");
                    break;
                }
            },
        }
    }
}

fn decode_payload(payload: &[u8]) -> Result<serde_json::Value> {
    if payload.is_empty() {
        return Ok(serde_json::Value::Null);
    }
    decode_auto(payload).map_err(|e| BridgeError::invalid(format!("undecodable payload: {}", e)))
}

async fn handle_inbound(
    session: &Session,
    keys: &TwinKeys,
    format: Format,
    router: &dyn InboundRouter,
    key: &str,
    payload: &[u8],
) {
    match keys.parse_inbound(key) {
        Some(InboundKey::Command { component, command }) => {
            let result = decode_payload(payload)
                .and_then(|request| router.route_command(component, command, &request));
            let response = CommandResponse::from_result(result);
            tracing::debug!(
                component = %component,
                command = %command,
                status = response.status,
                "Command handled"
            );

            let response_key = keys.command_response(component, command);
            match encode(&response, format) {
                Ok(bytes) => {
                    if let Err(e) = session.put(&response_key, bytes).await {
                        tracing::warn!(key = %response_key, error = %e, "Failed to publish command response");
                    }
                }
                Err(e) => tracing::warn!(error = %e, "Failed to encode command response"),
            }
        }
        Some(InboundKey::DesiredProperty {
            component,
            property,
        }) => {
            let result = decode_payload(payload).and_then(|document| {
                let desired = DesiredProperty::from_json(document);
                router.route_property_update(component, property, &desired.value, desired.version)
            });
            match result {
                Ok(()) => tracing::debug!(
                    component = %component,
                    property = %property,
                    "Desired property applied"
                ),
                Err(e) => tracing::warn!(
                    component = %component,
                    property = %property,
                    error = %e,
                    "Desired property rejected"
                ),
            }
        }
        None => tracing::trace!(key = %key, "Ignoring sample outside the twin"),
    }
}
