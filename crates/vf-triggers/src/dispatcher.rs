//! Hand-off of matched workflows to the executor
//!
//! Every dispatch runs on its own task with a fresh [`Context`], so a slow
//! workflow never holds up the detector that matched it. Executor failures
//! are logged and go no further.

use dashmap::DashSet;
use std::sync::Arc;
use tracing::{debug, warn};
use vf_core::{Context, SharedExecutor, TriggerPayload, Workflow};

/// Spawns workflow executions
#[derive(Clone)]
pub struct Dispatcher {
    executor: SharedExecutor,
    /// Entity keys with an exclusive execution still running
    in_flight: Arc<DashSet<String>>,
}

impl Dispatcher {
    pub fn new(executor: SharedExecutor) -> Self {
        Self {
            executor,
            in_flight: Arc::new(DashSet::new()),
        }
    }

    /// Run one workflow
    pub fn dispatch(&self, workflow: Workflow, payload: TriggerPayload) {
        let executor = self.executor.clone();
        tokio::spawn(async move {
            execute(executor, workflow, payload).await;
        });
    }

    /// Run each workflow independently with its own copy of the payload
    pub fn dispatch_all(&self, workflows: impl IntoIterator<Item = Workflow>, payload: &TriggerPayload) {
        for workflow in workflows {
            self.dispatch(workflow, payload.clone());
        }
    }

    /// Run a workflow unless an earlier run for `entity` is still going
    ///
    /// Returns whether the workflow was dispatched.
    pub fn dispatch_exclusive(
        &self,
        entity: impl Into<String>,
        workflow: Workflow,
        payload: TriggerPayload,
    ) -> bool {
        let entity = entity.into();
        if !self.in_flight.insert(entity.clone()) {
            debug!(entity = %entity, workflow_id = %workflow.id, "Previous run still in flight, skipping");
            return false;
        }

        let guard = InFlight {
            entity,
            in_flight: self.in_flight.clone(),
        };
        let executor = self.executor.clone();
        tokio::spawn(async move {
            let _guard = guard;
            execute(executor, workflow, payload).await;
        });
        true
    }

    /// Whether an exclusive run for `entity` is still going
    pub fn is_in_flight(&self, entity: &str) -> bool {
        self.in_flight.contains(entity)
    }
}

/// Releases the entity key when the run ends, including on abort
struct InFlight {
    entity: String,
    in_flight: Arc<DashSet<String>>,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.in_flight.remove(&self.entity);
    }
}

async fn execute(executor: SharedExecutor, workflow: Workflow, payload: TriggerPayload) {
    let workflow_id = workflow.id.clone();
    let context = Context::new();
    debug!(
        workflow_id = %workflow_id,
        trigger_type = %payload.trigger_type,
        context_id = %context.id,
        "Dispatching workflow"
    );
    if let Err(e) = executor.execute(workflow, context, payload).await {
        warn!(workflow_id = %workflow_id, error = %e, "Workflow execution failed");
    }
}
