//! Trigger payload handed to the executor alongside a workflow

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Data provided when a trigger fires
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerPayload {
    /// Optional identifier of the rule or fence that fired
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Trigger type that produced this payload
    pub trigger_type: String,

    /// Variables exposed to the workflow
    #[serde(flatten)]
    pub variables: HashMap<String, serde_json::Value>,

    /// When the trigger fired
    pub triggered_at: DateTime<Utc>,
}

impl TriggerPayload {
    /// Create an empty payload for a trigger type
    pub fn new(trigger_type: impl Into<String>) -> Self {
        Self {
            id: None,
            trigger_type: trigger_type.into(),
            variables: HashMap::new(),
            triggered_at: Utc::now(),
        }
    }

    /// Set the payload id
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Add a variable
    pub fn with_var(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.variables.insert(key.into(), value);
        self
    }

    pub fn var(&self, key: &str) -> Option<&serde_json::Value> {
        self.variables.get(key)
    }
}
