//! Workflow store seam and an in-memory implementation
//!
//! Persistence of workflow definitions lives outside the engine. The engine
//! only needs a snapshot query and a change stream so it can re-sync handler
//! membership live.

use crate::Workflow;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

const CHANGE_CHANNEL_CAPACITY: usize = 256;

/// A change to the set of stored workflows
#[derive(Debug, Clone, PartialEq)]
pub enum WorkflowChange {
    /// Workflow was created or replaced
    Upserted(Workflow),
    /// Workflow with this id was deleted
    Removed(String),
}

/// Source of workflow definitions
pub trait WorkflowStore: Send + Sync {
    /// Snapshot of every stored workflow
    fn all_workflows(&self) -> Vec<Workflow>;

    /// Look up a single workflow
    fn workflow(&self, id: &str) -> Option<Workflow>;

    /// Subscribe to change notifications
    fn subscribe(&self) -> broadcast::Receiver<WorkflowChange>;
}

/// Shared handle to a workflow store
pub type SharedWorkflowStore = Arc<dyn WorkflowStore>;

/// Thread-safe in-memory workflow store
pub struct MemoryWorkflowStore {
    workflows: DashMap<String, Workflow>,
    changes: broadcast::Sender<WorkflowChange>,
}

impl MemoryWorkflowStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            workflows: DashMap::new(),
            changes,
        }
    }

    /// Create a store pre-populated without emitting notifications
    pub fn with_workflows(workflows: impl IntoIterator<Item = Workflow>) -> Self {
        let store = Self::new();
        for workflow in workflows {
            store.workflows.insert(workflow.id.clone(), workflow);
        }
        store
    }

    /// Insert or replace a workflow and notify subscribers
    pub fn upsert(&self, workflow: Workflow) {
        debug!(workflow_id = %workflow.id, "Workflow upserted");
        self.workflows.insert(workflow.id.clone(), workflow.clone());
        // No receivers is fine
        let _ = self.changes.send(WorkflowChange::Upserted(workflow));
    }

    /// Remove a workflow and notify subscribers
    pub fn remove(&self, id: &str) -> Option<Workflow> {
        let removed = self.workflows.remove(id).map(|(_, w)| w);
        if removed.is_some() {
            debug!(workflow_id = %id, "Workflow removed");
            let _ = self.changes.send(WorkflowChange::Removed(id.to_string()));
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.workflows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workflows.is_empty()
    }
}

impl Default for MemoryWorkflowStore {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkflowStore for MemoryWorkflowStore {
    fn all_workflows(&self) -> Vec<Workflow> {
        let mut all: Vec<Workflow> = self.workflows.iter().map(|e| e.value().clone()).collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    fn workflow(&self, id: &str) -> Option<Workflow> {
        self.workflows.get(id).map(|e| e.value().clone())
    }

    fn subscribe(&self) -> broadcast::Receiver<WorkflowChange> {
        self.changes.subscribe()
    }
}
