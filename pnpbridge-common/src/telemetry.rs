use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One telemetry message sent by a component to its twin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentTelemetry {
    /// Unix epoch milliseconds when the values were sampled.
    pub timestamp: i64,

    /// Named values, e.g. `temperature`, `humidity`.
    pub values: BTreeMap<String, TelemetryValue>,

    /// Additional context labels (e.g., register addresses, units).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

impl ComponentTelemetry {
    /// Create an empty message stamped with the current time.
    pub fn new() -> Self {
        Self {
            timestamp: current_timestamp_millis(),
            values: BTreeMap::new(),
            labels: BTreeMap::new(),
        }
    }

    /// Add a value.
    pub fn with_value(mut self, name: impl Into<String>, value: impl Into<TelemetryValue>) -> Self {
        self.insert(name, value);
        self
    }

    /// Insert a value in place.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<TelemetryValue>) {
        self.values.insert(name.into(), value.into());
    }

    /// Add a label.
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Render as the JSON document sent to the twin.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

impl Default for ComponentTelemetry {
    fn default() -> Self {
        Self::new()
    }
}

/// Typed telemetry value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum TelemetryValue {
    /// Counter (monotonically increasing).
    Counter(u64),

    /// Gauge (can go up or down).
    Gauge(f64),

    /// Text value.
    Text(String),

    /// Boolean value.
    Boolean(bool),
}

impl From<u64> for TelemetryValue {
    fn from(v: u64) -> Self {
        TelemetryValue::Counter(v)
    }
}

impl From<f64> for TelemetryValue {
    fn from(v: f64) -> Self {
        TelemetryValue::Gauge(v)
    }
}

impl From<bool> for TelemetryValue {
    fn from(v: bool) -> Self {
        TelemetryValue::Boolean(v)
    }
}

impl From<String> for TelemetryValue {
    fn from(v: String) -> Self {
        TelemetryValue::Text(v)
    }
}

impl From<&str> for TelemetryValue {
    fn from(v: &str) -> Self {
        TelemetryValue::Text(v.to_string())
    }
}

/// Current time as Unix epoch milliseconds.
pub fn current_timestamp_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_component_telemetry_json() {
        let telemetry = ComponentTelemetry::new()
            .with_value("temperature", 21.5)
            .with_value("door_open", false)
            .with_label("unit", "C");

        let json = telemetry.to_json();
        assert_eq!(json["values"]["temperature"], 21.5);
        assert_eq!(json["values"]["door_open"], false);
        assert_eq!(json["labels"]["unit"], "C");
        assert!(json["timestamp"].as_i64().unwrap() > 0);
    }

    #[test]
    fn test_empty_labels_are_skipped() {
        let json = ComponentTelemetry::new().with_value("count", 3u64).to_json();
        assert!(json.get("labels").is_none());
    }
}
