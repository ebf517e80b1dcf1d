//! Trigger engine
//!
//! Owns one handler per registered trigger type, seeds them from the
//! workflow store and keeps their membership in sync with the store's change
//! stream.

use indexmap::IndexMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use vf_core::{SharedWorkflowStore, WorkflowChange};

use crate::lifecycle::TriggerHandler;
use crate::registry::TriggerRegistry;
use crate::services::TriggerServices;

type Handlers = Arc<IndexMap<&'static str, Arc<dyn TriggerHandler>>>;

/// Routes workflows from the store to their trigger handlers
pub struct TriggerEngine {
    /// Source of workflow definitions
    store: SharedWorkflowStore,
    /// One handler per trigger type
    handlers: Handlers,
    /// Running flag
    running: Arc<AtomicBool>,
    /// Shutdown signal sender
    shutdown_tx: broadcast::Sender<()>,
}

impl TriggerEngine {
    /// Create an engine with a handler for every registered trigger type
    pub fn new(store: SharedWorkflowStore, registry: &TriggerRegistry, services: &TriggerServices) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            store,
            handlers: Arc::new(registry.build(services)),
            running: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
        }
    }

    /// Handler for a trigger type
    pub fn handler(&self, trigger_type: &str) -> Option<Arc<dyn TriggerHandler>> {
        self.handlers.get(trigger_type).cloned()
    }

    /// Start every handler and follow the store's change stream
    pub async fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Trigger engine already running");
            return;
        }

        info!(handlers = self.handlers.len(), "Starting trigger engine");

        // Subscribe first so changes made while handlers start are not lost
        let mut change_rx = self.store.subscribe();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        Self::start_handlers(&self.handlers, &self.store).await;

        let store = self.store.clone();
        let handlers = self.handlers.clone();
        let running = self.running.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    change = change_rx.recv() => {
                        match change {
                            Ok(change) => Self::apply_change(&handlers, change).await,
                            Err(broadcast::error::RecvError::Lagged(n)) => {
                                warn!("Trigger engine lagged by {} workflow changes, resyncing", n);
                                Self::start_handlers(&handlers, &store).await;
                            }
                            Err(broadcast::error::RecvError::Closed) => {
                                info!("Workflow store closed, stopping change loop");
                                break;
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Received shutdown signal");
                        break;
                    }
                }
            }

            running.store(false, Ordering::SeqCst);
            info!("Trigger engine change loop stopped");
        });
    }

    /// Stop the change loop and every handler
    pub async fn stop(&self) {
        if !self.running.load(Ordering::SeqCst) {
            return;
        }

        info!("Stopping trigger engine");
        let _ = self.shutdown_tx.send(());
        for handler in self.handlers.values() {
            handler.stop().await;
        }
    }

    /// Check if the engine is running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    async fn start_handlers(handlers: &Handlers, store: &SharedWorkflowStore) {
        for handler in handlers.values() {
            handler.start(store.as_ref()).await;
        }
    }

    async fn apply_change(handlers: &Handlers, change: WorkflowChange) {
        match change {
            WorkflowChange::Upserted(workflow) => {
                let trigger_type = workflow.trigger_type().unwrap_or_default().to_string();
                if !handlers.contains_key(trigger_type.as_str()) {
                    debug!(workflow_id = %workflow.id, trigger_type = %trigger_type, "No handler for trigger type");
                }
                // Handlers drop workflows that are disabled or not theirs
                for handler in handlers.values() {
                    handler.add_workflow(workflow.clone()).await;
                }
            }
            WorkflowChange::Removed(workflow_id) => {
                for handler in handlers.values() {
                    handler.remove_workflow(&workflow_id).await;
                }
            }
        }
    }
}
