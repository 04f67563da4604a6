//! Bridge configuration and host-supplied app configuration.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::events::NATIVE_APP_NAMESPACE;

/// Local settings for the session bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Namespace push events are subscribed under.
    pub event_namespace: String,
    /// Capacity of the local notification channels.
    pub notification_capacity: usize,
    /// Maximum number of log entries buffered for the host.
    pub log_buffer_capacity: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            event_namespace: NATIVE_APP_NAMESPACE.to_owned(),
            notification_capacity: 64,
            log_buffer_capacity: 1000,
        }
    }
}

impl BridgeConfig {
    /// Parse a config from JSON, filling absent fields with defaults.
    ///
    /// # Errors
    /// Returns error if a present field has the wrong type.
    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }
}

/// Key/value configuration, primarily what the host reports at startup.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AppConfig {
    values: HashMap<String, Value>,
}

impl AppConfig {
    /// Create an empty config.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a config from existing values.
    #[must_use]
    pub const fn with_values(values: HashMap<String, Value>) -> Self {
        Self { values }
    }

    /// Get a value by key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Get a string value by key.
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(Value::as_str)
    }

    /// Set a value.
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.values.insert(key.into(), value);
    }

    /// Merge `other` over this config; its keys win.
    pub fn merge(&mut self, other: HashMap<String, Value>) {
        self.values.extend(other);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tokio_test::{assert_err, assert_ok};

    use super::*;

    #[test]
    fn partial_bridge_config_uses_defaults() {
        let config = assert_ok!(BridgeConfig::from_value(json!({ "notification_capacity": 8 })));
        assert_eq!(config.notification_capacity, 8);
        assert_eq!(config.event_namespace, NATIVE_APP_NAMESPACE);
        assert_eq!(config.log_buffer_capacity, 1000);
    }

    #[test]
    fn wrong_type_is_an_error() {
        assert_err!(BridgeConfig::from_value(json!({ "notification_capacity": "many" })));
    }

    #[test]
    fn merge_overwrites_existing_keys() {
        let mut config = AppConfig::new();
        config.set("region_id", json!(0));
        config.set("kept", json!("yes"));

        config.merge(HashMap::from([
            ("region_id".to_owned(), json!(102)),
            ("added".to_owned(), json!(true)),
        ]));

        assert_eq!(config.len(), 3);
        assert_eq!(config.get("region_id"), Some(&json!(102)));
        assert_eq!(config.get_str("kept"), Some("yes"));
        assert_eq!(config.get("added"), Some(&json!(true)));
    }
}
