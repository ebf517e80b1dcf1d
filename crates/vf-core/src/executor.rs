//! Seam to the external workflow executor

use crate::{Context, TriggerPayload, Workflow};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

/// Errors reported by an executor
///
/// The engine only logs these; they never feed back into trigger state.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("workflow {workflow_id} failed: {message}")]
    Failed { workflow_id: String, message: String },

    #[error("executor unavailable: {0}")]
    Unavailable(String),
}

/// Result type for executor calls
pub type ExecutionResult<T> = Result<T, ExecutionError>;

/// Runs a fully-resolved workflow with the payload of the trigger that fired
///
/// The dispatcher calls this on a spawned task, so an implementation may take
/// as long as it needs without stalling event delivery.
#[async_trait]
pub trait WorkflowExecutor: Send + Sync {
    async fn execute(
        &self,
        workflow: Workflow,
        context: Context,
        payload: TriggerPayload,
    ) -> ExecutionResult<()>;
}

/// Shared handle to an executor
pub type SharedExecutor = Arc<dyn WorkflowExecutor>;
