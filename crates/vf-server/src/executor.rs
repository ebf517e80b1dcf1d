//! Executor that reports each dispatched workflow as a JSON line on stdout

use async_trait::async_trait;
use serde::Serialize;
use std::io::Write;
use tracing::{error, info};
use vf_core::{Context, ExecutionError, ExecutionResult, TriggerPayload, Workflow, WorkflowExecutor};

#[derive(Serialize)]
struct ExecutionLine<'a> {
    workflow_id: &'a str,
    context_id: &'a str,
    payload: &'a TriggerPayload,
}

/// Stands in for the real action runner
pub struct LoggingExecutor;

impl LoggingExecutor {
    fn render(workflow: &Workflow, context: &Context, payload: &TriggerPayload) -> serde_json::Result<String> {
        serde_json::to_string(&ExecutionLine {
            workflow_id: &workflow.id,
            context_id: &context.id,
            payload,
        })
    }
}

#[async_trait]
impl WorkflowExecutor for LoggingExecutor {
    async fn execute(&self, workflow: Workflow, context: Context, payload: TriggerPayload) -> ExecutionResult<()> {
        info!(
            workflow_id = %workflow.id,
            context_id = %context.id,
            trigger_type = %payload.trigger_type,
            "Executing workflow"
        );

        let line = Self::render(&workflow, &context, &payload).map_err(|e| ExecutionError::Failed {
            workflow_id: workflow.id.clone(),
            message: e.to_string(),
        })?;

        let mut stdout = std::io::stdout().lock();
        writeln!(stdout, "{line}").map_err(|e| {
            error!(error = %e, "Failed to write execution line");
            ExecutionError::Unavailable(e.to_string())
        })
    }
}
