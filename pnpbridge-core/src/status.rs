//! Bridge status reporting.

use serde::{Deserialize, Serialize};

/// Bridge status document published through the twin client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeStatus {
    /// Bridge name.
    pub bridge: String,
    /// Bridge version.
    pub version: String,
    /// Current status ("waiting_for_configuration", "configuration_complete", "offline").
    pub status: String,
    /// Unix epoch milliseconds when the status was produced.
    pub timestamp: i64,
    /// Additional metadata.
    #[serde(flatten)]
    pub metadata: serde_json::Value,
}

impl BridgeStatus {
    fn with_status(bridge: impl Into<String>, version: impl Into<String>, status: &str) -> Self {
        Self {
            bridge: bridge.into(),
            version: version.into(),
            status: status.to_string(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            metadata: serde_json::Value::Null,
        }
    }

    /// Connected, but no configured device is registered yet.
    pub fn waiting_for_configuration(
        bridge: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self::with_status(bridge, version, "waiting_for_configuration")
    }

    /// At least one configured device is registered.
    pub fn configuration_complete(bridge: impl Into<String>, version: impl Into<String>) -> Self {
        Self::with_status(bridge, version, "configuration_complete")
    }

    /// The bridge is shutting down.
    pub fn offline(bridge: impl Into<String>, version: impl Into<String>) -> Self {
        Self::with_status(bridge, version, "offline")
    }

    /// Add metadata to the status.
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}
