//! Helpers shared by the unit tests

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use vf_config::EngineConfig;
use vf_core::{Context, ExecutionError, ExecutionResult, TriggerPayload, Workflow, WorkflowExecutor};
use vf_event_bus::EventBus;

use crate::services::TriggerServices;

/// Records every execution request
pub(crate) struct RecordingExecutor {
    runs: Mutex<Vec<(Workflow, TriggerPayload)>>,
    delay: Duration,
    fail: bool,
}

impl RecordingExecutor {
    pub(crate) fn new() -> Arc<Self> {
        Self::build(Duration::ZERO, false)
    }

    pub(crate) fn with_delay(delay: Duration) -> Arc<Self> {
        Self::build(delay, false)
    }

    pub(crate) fn failing() -> Arc<Self> {
        Self::build(Duration::ZERO, true)
    }

    fn build(delay: Duration, fail: bool) -> Arc<Self> {
        Arc::new(Self {
            runs: Mutex::new(Vec::new()),
            delay,
            fail,
        })
    }

    pub(crate) fn count(&self) -> usize {
        self.runs.lock().unwrap().len()
    }

    pub(crate) fn workflow_ids(&self) -> Vec<String> {
        self.runs.lock().unwrap().iter().map(|(w, _)| w.id.clone()).collect()
    }

    pub(crate) fn payloads(&self) -> Vec<TriggerPayload> {
        self.runs.lock().unwrap().iter().map(|(_, p)| p.clone()).collect()
    }

    /// Values of one payload variable, in execution order
    pub(crate) fn vars(&self, key: &str) -> Vec<serde_json::Value> {
        self.payloads()
            .iter()
            .filter_map(|p| p.var(key).cloned())
            .collect()
    }
}

#[async_trait]
impl WorkflowExecutor for RecordingExecutor {
    async fn execute(
        &self,
        workflow: Workflow,
        _context: Context,
        payload: TriggerPayload,
    ) -> ExecutionResult<()> {
        let workflow_id = workflow.id.clone();
        self.runs.lock().unwrap().push((workflow, payload));
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail {
            return Err(ExecutionError::Failed {
                workflow_id,
                message: "boom".into(),
            });
        }
        Ok(())
    }
}

/// Let spawned tasks run on a paused clock
pub(crate) async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

/// Services over a fresh bus with default settings
pub(crate) fn services(executor: Arc<RecordingExecutor>) -> TriggerServices {
    TriggerServices::new(Arc::new(EventBus::new()), executor, EngineConfig::default())
}
