//! End-to-end test of the bridge binary's stack over Zenoh.
//!
//! A configured Modbus device is discovered, registered through the Zenoh
//! twin and driven with a cloud command. Nothing listens on the Modbus port,
//! so polling fails quietly in the background.

use std::sync::Arc;
use std::time::Duration;

use pnpbridge::config::PnpBridgeConfig;
use pnpbridge::default_manifest;
use pnpbridge::twin::{CommandResponse, InterfaceDocument, ZenohConnector};
use pnpbridge_common::{TwinKeys, ZenohConfig, decode_auto};
use pnpbridge_core::{Bridge, BridgeState, BridgeStatus};

fn unique_device() -> String {
    format!("gw{}", chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default())
}

fn cloud_endpoint() -> String {
    let nanos = chrono::Utc::now().timestamp_subsec_nanos();
    format!("tcp/127.0.0.1:{}", 20_000 + nanos % 20_000)
}

fn config(device_id: &str, endpoint: &str) -> PnpBridgeConfig {
    let document = format!(
        r#"{{
            zenoh: {{ mode: "peer" }},
            connection: {{ mode: "connection_string", connection_string: "DeviceId={};Endpoint={}" }},
            reconciliation: {{ registration_timeout_ms: 5000, retry_initial_ms: 100, retry_max_ms: 500 }},
            devices: [
                {{
                    component_name: "meter",
                    interface_id: "urn:acme:meter:1",
                    pnp_adapter: "modbus",
                    adapter_config: {{
                        connection: {{ type: "tcp", host: "127.0.0.1", port: 9 }},
                        timeout_ms: 50,
                        poll_interval_secs: 60,
                        registers: [ {{ type: "holding", address: 0, name: "flow" }} ],
                    }},
                    discovery_adapter: {{ identity: "configured", match_parameters: {{ address: "127.0.0.1" }} }},
                    match_filters: {{ match_type: "exact", match_parameters: {{ address: "127.0.0.1" }} }},
                }},
            ],
        }}"#,
        device_id, endpoint
    );
    PnpBridgeConfig::parse(&document).expect("valid config")
}

async fn next_payload(
    subscriber: &zenoh::pubsub::Subscriber<zenoh::handlers::FifoChannelHandler<zenoh::sample::Sample>>,
) -> Vec<u8> {
    let sample = tokio::time::timeout(Duration::from_secs(10), subscriber.recv_async())
        .await
        .expect("timeout waiting for sample")
        .expect("receive failed");
    sample.payload().to_bytes().to_vec()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_configured_device_registered_and_commanded() {
    let device_id = unique_device();
    let endpoint = cloud_endpoint();
    let config = config(&device_id, &endpoint);
    let connection = config.connection.resolve(|_| None).unwrap();
    assert_eq!(connection.endpoints, vec![endpoint.clone()]);
    let keys = TwinKeys::new(&device_id).unwrap();

    let cloud_config = ZenohConfig {
        mode: "peer".to_string(),
        listen: vec![endpoint],
        ..Default::default()
    };
    let cloud = pnpbridge_common::connect(&cloud_config)
        .await
        .expect("open cloud session");
    let interfaces = cloud
        .declare_subscriber(keys.interfaces())
        .await
        .expect("subscribe interfaces");
    let responses = cloud
        .declare_subscriber(keys.command_response("meter", "poll"))
        .await
        .expect("subscribe responses");
    let status = cloud
        .declare_subscriber(keys.status())
        .await
        .expect("subscribe status");

    let connector = ZenohConnector::new(&config, &connection).unwrap();
    let bridge = Arc::new(Bridge::new(config.bridge, default_manifest(), connector).unwrap());
    let runner = bridge.clone();
    let run = tokio::spawn(async move { runner.run().await });

    let document: InterfaceDocument = loop {
        let document: InterfaceDocument =
            decode_auto(&next_payload(&interfaces).await).expect("decode interfaces");
        if !document.interfaces.is_empty() {
            break document;
        }
    };
    assert_eq!(document.device_id, device_id);
    assert_eq!(document.interfaces[0].component_name, "meter");
    assert_eq!(document.interfaces[0].interface_id, "urn:acme:meter:1");
    assert_eq!(document.interfaces[0].adapter_identity, "modbus");

    // The bridge subscribes before registering; give the declaration time to propagate.
    tokio::time::sleep(Duration::from_millis(200)).await;
    cloud
        .put(keys.command("meter", "poll"), "{}")
        .await
        .expect("put command");
    let response: CommandResponse =
        decode_auto(&next_payload(&responses).await).expect("decode response");
    assert_eq!(response.status, 200);
    assert_eq!(response.payload, serde_json::json!({ "requested": true }));

    assert!(bridge.stop());
    run.await.unwrap().unwrap();
    assert_eq!(bridge.state(), BridgeState::Destroyed);

    let mut last = String::new();
    while let Ok(Ok(sample)) =
        tokio::time::timeout(Duration::from_millis(500), status.recv_async()).await
    {
        let status: BridgeStatus =
            decode_auto(&sample.payload().to_bytes()).expect("decode status");
        last = status.status;
    }
    assert_eq!(last, "offline");

    cloud.close().await.expect("close cloud session");
}
