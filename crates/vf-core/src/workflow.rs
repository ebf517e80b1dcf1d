//! Workflow definitions as seen by the trigger engine
//!
//! The engine treats a workflow as an immutable value owned by an external
//! store. Only the id, the enabled flag and the untyped trigger config
//! matter here; the action list is opaque and travels to the executor as-is.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A user-defined workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    /// Unique identifier
    pub id: String,

    /// Friendly name, used for logging
    #[serde(default)]
    pub name: String,

    /// Whether the workflow participates in triggering
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Trigger configuration; `type` selects the handler
    #[serde(default)]
    pub trigger_config: TriggerConfig,

    /// Action steps, interpreted only by the executor
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<Value>,
}

fn default_enabled() -> bool {
    true
}

impl Workflow {
    /// Create an enabled workflow bound to a trigger type
    pub fn new(id: impl Into<String>, trigger_type: &str) -> Self {
        let id = id.into();
        let mut trigger_config = TriggerConfig::default();
        trigger_config.insert("type", Value::String(trigger_type.to_string()));
        Self {
            name: id.clone(),
            id,
            enabled: true,
            trigger_config,
            steps: Vec::new(),
        }
    }

    /// Set the friendly name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Add a trigger config value
    pub fn with_config(mut self, key: impl Into<String>, value: Value) -> Self {
        self.trigger_config.insert(key, value);
        self
    }

    /// Mark as disabled
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// The trigger type this workflow is bound to, if any
    pub fn trigger_type(&self) -> Option<&str> {
        self.trigger_config.trigger_type()
    }

    /// Whether this workflow is enabled and bound to `trigger_type`
    pub fn is_active_for(&self, trigger_type: &str) -> bool {
        self.enabled && self.trigger_type() == Some(trigger_type)
    }
}

/// Untyped, string-keyed trigger configuration
///
/// Each handler owns its key set and projects this map into a typed
/// resolved trigger with [`TriggerConfig::resolve`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TriggerConfig(Map<String, Value>);

impl TriggerConfig {
    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.0.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// The `type` key
    pub fn trigger_type(&self) -> Option<&str> {
        self.get_str("type")
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    /// Numeric value, accepting numbers and numeric strings
    pub fn get_f64(&self, key: &str) -> Option<f64> {
        match self.0.get(key)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.0.get(key).and_then(Value::as_bool)
    }

    /// Deserialize the whole map into a handler's typed trigger
    pub fn resolve<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(Value::Object(self.0.clone()))
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }
}

impl From<Map<String, Value>> for TriggerConfig {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Deserialize)]
    struct KeyConfig {
        device: String,
        #[serde(default)]
        radius: f64,
    }

    #[test]
    fn test_enabled_defaults_to_true() {
        let workflow: Workflow = serde_json::from_value(json!({
            "id": "wf1",
            "trigger_config": {"type": "vflow.trigger.sms"}
        }))
        .unwrap();
        assert!(workflow.enabled);
        assert!(workflow.is_active_for("vflow.trigger.sms"));
        assert!(!workflow.is_active_for("vflow.trigger.call"));
    }

    #[test]
    fn test_resolve_typed() {
        let workflow = Workflow::new("wf", "x").with_config("device", json!("/dev/input/event2"));
        let parsed: KeyConfig = workflow.trigger_config.resolve().unwrap();
        assert_eq!(parsed.device, "/dev/input/event2");
        assert_eq!(parsed.radius, 0.0);
    }

    #[test]
    fn test_get_f64_accepts_strings() {
        let workflow = Workflow::new("wf", "x")
            .with_config("radius", json!("250.5"))
            .with_config("latitude", json!(31.2));
        assert_eq!(workflow.trigger_config.get_f64("radius"), Some(250.5));
        assert_eq!(workflow.trigger_config.get_f64("latitude"), Some(31.2));
        assert_eq!(workflow.trigger_config.get_f64("missing"), None);
    }
}
