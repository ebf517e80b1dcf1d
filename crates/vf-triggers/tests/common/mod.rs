//! Shared harness for end-to-end trigger tests

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use vf_config::EngineConfig;
use vf_core::{
    Context, ExecutionResult, MemoryWorkflowStore, SourceEvent, TriggerPayload, Workflow, WorkflowExecutor,
};
use vf_event_bus::EventBus;
use vf_triggers::{TriggerEngine, TriggerRegistry, TriggerServices};

/// Records every execution in order
#[derive(Default)]
pub struct RecordingExecutor {
    runs: Mutex<Vec<(String, TriggerPayload)>>,
}

impl RecordingExecutor {
    pub fn count(&self) -> usize {
        self.runs.lock().unwrap().len()
    }

    pub fn workflow_ids(&self) -> Vec<String> {
        self.runs.lock().unwrap().iter().map(|(id, _)| id.clone()).collect()
    }

    pub fn vars(&self, key: &str) -> Vec<serde_json::Value> {
        self.runs
            .lock()
            .unwrap()
            .iter()
            .filter_map(|(_, payload)| payload.var(key).cloned())
            .collect()
    }
}

#[async_trait]
impl WorkflowExecutor for RecordingExecutor {
    async fn execute(&self, workflow: Workflow, _context: Context, payload: TriggerPayload) -> ExecutionResult<()> {
        self.runs.lock().unwrap().push((workflow.id, payload));
        Ok(())
    }
}

/// Bus, store, executor and a started engine
pub struct Harness {
    pub bus: Arc<EventBus>,
    pub store: Arc<MemoryWorkflowStore>,
    pub executor: Arc<RecordingExecutor>,
    pub engine: TriggerEngine,
}

impl Harness {
    pub async fn start(workflows: Vec<Workflow>) -> Self {
        Self::start_with(workflows, EngineConfig::default(), |services| services).await
    }

    /// Start with custom settings and service overrides
    pub async fn start_with(
        workflows: Vec<Workflow>,
        settings: EngineConfig,
        customize: impl FnOnce(TriggerServices) -> TriggerServices,
    ) -> Self {
        let bus = Arc::new(EventBus::new());
        let store = Arc::new(MemoryWorkflowStore::with_workflows(workflows));
        let executor = Arc::new(RecordingExecutor::default());
        let services = customize(TriggerServices::new(bus.clone(), executor.clone(), settings));
        let engine = TriggerEngine::new(store.clone(), &TriggerRegistry::with_defaults(), &services);
        engine.start().await;
        Self {
            bus,
            store,
            executor,
            engine,
        }
    }

    /// Fire one event and let the detectors and executions run
    pub async fn fire(&self, event: SourceEvent) {
        self.bus.fire(event);
        settle().await;
    }
}

pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

pub async fn wait(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}
