//! Execution context handed to the executor with every dispatch

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Identity of one workflow run
///
/// The dispatcher mints a fresh one per workflow it hands off. An executor
/// that starts nested runs links them back through `parent_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Context {
    /// ULID, sortable by dispatch time
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
}

impl Context {
    pub fn new() -> Self {
        Self::with_id(Ulid::new().to_string())
    }

    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            parent_id: None,
        }
    }

    /// Context for a run started from inside this one
    pub fn nested(&self) -> Self {
        Self {
            parent_id: Some(self.id.clone()),
            ..Self::new()
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}
