//! Trigger error types

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while resolving triggers or talking to platform seams
#[derive(Debug, Error)]
pub enum TriggerError {
    /// A workflow's trigger config does not fit the handler
    #[error("workflow {workflow_id}: invalid trigger config: {message}")]
    InvalidConfig { workflow_id: String, message: String },

    /// The location provider refused to deliver updates at a tier
    #[error("location provider refused {tier} updates: {message}")]
    LocationUnavailable { tier: String, message: String },

    /// Geofence containment could not be read or written
    #[error("geofence state {path}: {source}")]
    StateIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("geofence state is not valid JSON: {0}")]
    StateFormat(#[from] serde_json::Error),
}

impl TriggerError {
    pub(crate) fn invalid_config(workflow_id: &str, message: impl ToString) -> Self {
        TriggerError::InvalidConfig {
            workflow_id: workflow_id.to_string(),
            message: message.to_string(),
        }
    }
}

/// Result type for trigger operations
pub type TriggerResult<T> = Result<T, TriggerError>;
