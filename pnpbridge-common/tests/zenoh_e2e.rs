//! End-to-end tests with Zenoh pub/sub.
//!
//! Zenoh requires a multi-thread tokio runtime. Each test uses its own device
//! id so concurrent tests do not see each other's traffic.

use std::time::Duration;

use pnpbridge_common::{
    ComponentTelemetry, Format, TwinKeys, ZenohConfig, connect, decode_auto, encode,
};

fn unique_device() -> String {
    format!("test{}", chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default())
}

fn peer_config() -> ZenohConfig {
    ZenohConfig {
        mode: "peer".to_string(),
        ..Default::default()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_telemetry_reaches_subscriber() {
    let keys = TwinKeys::new(&unique_device()).unwrap();
    let session = connect(&peer_config()).await.expect("open session");

    let subscriber = session
        .declare_subscriber(keys.telemetry("sensor"))
        .await
        .expect("declare subscriber");

    tokio::time::sleep(Duration::from_millis(100)).await;

    let telemetry = ComponentTelemetry::new().with_value("temperature", 19.0);
    let payload = encode(&telemetry, Format::Json).expect("encode");
    session
        .put(keys.telemetry("sensor"), payload)
        .await
        .expect("put");

    let sample = tokio::time::timeout(Duration::from_secs(5), subscriber.recv_async())
        .await
        .expect("timeout waiting for telemetry")
        .expect("receive failed");

    let decoded: ComponentTelemetry =
        decode_auto(&sample.payload().to_bytes()).expect("decode");
    assert!(decoded.values.contains_key("temperature"));

    drop(subscriber);
    session.close().await.expect("close session");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_inbound_wildcard_excludes_responses() {
    let keys = TwinKeys::new(&unique_device()).unwrap();
    let session = connect(&peer_config()).await.expect("open session");

    let subscriber = session
        .declare_subscriber(keys.commands_wildcard())
        .await
        .expect("declare subscriber");

    tokio::time::sleep(Duration::from_millis(100)).await;

    session
        .put(keys.command_response("pump", "poll"), "{}")
        .await
        .expect("put response");
    session
        .put(keys.command("pump", "poll"), "{}")
        .await
        .expect("put command");

    let sample = tokio::time::timeout(Duration::from_secs(5), subscriber.recv_async())
        .await
        .expect("timeout waiting for command")
        .expect("receive failed");

    assert_eq!(sample.key_expr().as_str(), keys.command("pump", "poll"));

    drop(subscriber);
    session.close().await.expect("close session");
}
