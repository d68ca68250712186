//! Reports statically configured devices.
//!
//! Devices that cannot be enumerated (Modbus TCP, fixed serial lines) name
//! this adapter in their `discovery_adapter` block. Each block is reported as
//! one arrival as soon as discovery starts; its `match_parameters` become the
//! device properties and every other field is carried along for the protocol
//! adapter.

use std::sync::atomic::{AtomicBool, Ordering};

use pnpbridge_core::{
    BridgeError, DeviceDescription, DeviceReporter, DiscoveryAdapter, PnpMessage, Result,
};

pub const IDENTITY: &str = "configured";

#[derive(Debug, Default)]
pub struct ConfiguredDiscovery {
    running: AtomicBool,
}

impl ConfiguredDiscovery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

/// Build the arrival message for one device parameter block.
pub fn device_message(params: &str) -> Result<PnpMessage> {
    let value: serde_json::Value = serde_json::from_str(params)?;
    let serde_json::Value::Object(mut fields) = value else {
        return Err(BridgeError::invalid("device parameters must be an object"));
    };
    let identity = match fields.remove("identity") {
        Some(serde_json::Value::String(identity)) => Some(identity),
        _ => None,
    };

    let interface_id = match fields.remove("interface_id") {
        Some(serde_json::Value::String(id)) => Some(id),
        Some(_) => return Err(BridgeError::invalid("interface_id must be a string")),
        None => None,
    };

    let mut description = DeviceDescription::new();
    description.identity = identity;
    match fields.remove("match_parameters") {
        Some(serde_json::Value::Object(parameters)) => {
            description.match_parameters = parameters.into_iter().collect();
        }
        Some(_) => return Err(BridgeError::invalid("match_parameters must be an object")),
        None => {}
    }
    description.extra = fields;

    let message = PnpMessage::arrival(&description)?;
    Ok(match interface_id {
        Some(id) => message.with_interface_id(id),
        None => message,
    })
}

impl DiscoveryAdapter for ConfiguredDiscovery {
    fn identity(&self) -> &str {
        IDENTITY
    }

    fn start_discovery(
        &self,
        reporter: DeviceReporter,
        device_params: &[String],
        _adapter_params: Option<&str>,
    ) -> Result<()> {
        self.running.store(true, Ordering::Release);

        for params in device_params {
            match device_message(params).and_then(|message| reporter.report(message)) {
                Ok(id) => tracing::debug!(message = %id, "Configured device reported"),
                Err(e) => tracing::warn!(error = %e, params = %params, "Skipping configured device"),
            }
        }
        Ok(())
    }

    fn stop_discovery(&self) -> Result<()> {
        self.running.store(false, Ordering::Release);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_message() {
        let message = device_message(
            r#"{"identity":"configured","match_parameters":{"address":"10.0.0.20"},"unit_id":3}"#,
        )
        .unwrap();

        let description = message.description().unwrap();
        assert_eq!(description.parameter("address").as_deref(), Some("10.0.0.20"));
        assert_eq!(description.extra["unit_id"], 3);
        assert_eq!(description.identity.as_deref(), Some("configured"));
        assert!(!description.extra.contains_key("identity"));
        assert!(message.interface_id().is_none());
    }

    #[test]
    fn test_device_message_with_interface() {
        let message =
            device_message(r#"{"identity":"configured","interface_id":"urn:acme:meter:1"}"#)
                .unwrap();
        assert_eq!(message.interface_id(), Some("urn:acme:meter:1"));
        assert!(message.description().unwrap().match_parameters.is_empty());
    }

    #[test]
    fn test_malformed_parameters() {
        assert!(device_message("[1,2]").is_err());
        assert!(device_message(r#"{"match_parameters":"nope"}"#).is_err());
        assert!(device_message("not json").is_err());
    }
}
