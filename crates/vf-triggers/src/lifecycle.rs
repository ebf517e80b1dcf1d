//! Handler lifecycle: reference-counted listening
//!
//! A [`TriggerHandler`] owns the workflows bound to one trigger type. The
//! generic [`ListeningHandler`] implements it for any [`TriggerSource`]: it
//! keeps the membership set and starts the source when the set becomes
//! non-empty and stops it when the set empties again. Start and stop calls on
//! the source strictly alternate because every membership change goes through
//! one lock and one reconcile step.

use async_trait::async_trait;
use indexmap::IndexMap;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};
use vf_core::{EventKind, SourceEvent, Workflow, WorkflowStore};
use vf_event_bus::SharedEventBus;

/// One trigger type's view of the workflow set
#[async_trait]
pub trait TriggerHandler: Send + Sync {
    fn trigger_type(&self) -> &'static str;

    /// Populate from the store and start listening if anything is bound
    async fn start(&self, store: &dyn WorkflowStore);

    /// Drop every workflow and stop listening
    async fn stop(&self);

    /// Insert or replace by id
    ///
    /// A workflow that is disabled or bound to another trigger type is
    /// removed instead.
    async fn add_workflow(&self, workflow: Workflow);

    async fn remove_workflow(&self, workflow_id: &str);

    async fn workflow_count(&self) -> usize;

    async fn is_listening(&self) -> bool;
}

/// A detector driven by raw source events
///
/// Calls into a source are serialized by its [`ListeningHandler`] except for
/// [`TriggerSource::on_event`], which runs on one task per event kind.
#[async_trait]
pub trait TriggerSource: Send + Sync + 'static {
    fn trigger_type(&self) -> &'static str;

    /// Event kinds to subscribe to while listening
    fn event_kinds(&self) -> &'static [EventKind];

    /// Replace the resolved trigger list
    async fn set_workflows(&self, workflows: Vec<Workflow>);

    /// Listening begins; `generation` increases on every start
    ///
    /// Work deferred past an event (timers, background loads) should carry
    /// the generation it was started under and drop itself once that
    /// generation has stopped.
    async fn on_start(&self, _generation: u64) {}

    async fn on_event(&self, event: SourceEvent);

    /// Listening ended: cancel pending timers and drop detector state
    ///
    /// The handler follows up with an empty [`TriggerSource::set_workflows`],
    /// so per-workflow state never outlives a generation.
    async fn on_stop(&self) {}
}

#[derive(Default)]
struct Membership {
    workflows: IndexMap<String, Workflow>,
    listeners: Option<Vec<JoinHandle<()>>>,
    generation: u64,
}

/// Reference-counting [`TriggerHandler`] for a [`TriggerSource`]
pub struct ListeningHandler<S: TriggerSource> {
    source: Arc<S>,
    bus: SharedEventBus,
    membership: Mutex<Membership>,
}

impl<S: TriggerSource> ListeningHandler<S> {
    pub fn new(source: S, bus: SharedEventBus) -> Self {
        Self {
            source: Arc::new(source),
            bus,
            membership: Mutex::new(Membership::default()),
        }
    }

    pub fn source(&self) -> &Arc<S> {
        &self.source
    }

    /// Bring the source in line with the membership set
    async fn reconcile(&self, membership: &mut Membership) {
        let wanted = !membership.workflows.is_empty();
        match (membership.listeners.is_some(), wanted) {
            (false, true) => self.start_listening(membership).await,
            (true, false) => self.stop_listening(membership).await,
            (true, true) => {
                let workflows = membership.workflows.values().cloned().collect();
                self.source.set_workflows(workflows).await;
            }
            (false, false) => {}
        }
    }

    async fn start_listening(&self, membership: &mut Membership) {
        let trigger_type = self.source.trigger_type();
        if membership.listeners.is_some() {
            error!(trigger_type, "Start requested while already listening");
            return;
        }

        membership.generation += 1;
        let generation = membership.generation;

        // Subscribe before anything else so no event fired after this call
        // returns can be missed.
        let receivers: Vec<_> = self
            .source
            .event_kinds()
            .iter()
            .map(|kind| (*kind, self.bus.subscribe(*kind)))
            .collect();

        let workflows = membership.workflows.values().cloned().collect();
        self.source.set_workflows(workflows).await;
        self.source.on_start(generation).await;

        let listeners = receivers
            .into_iter()
            .map(|(kind, rx)| spawn_listener(self.source.clone(), kind, rx))
            .collect();
        membership.listeners = Some(listeners);

        info!(
            trigger_type,
            generation,
            workflows = membership.workflows.len(),
            "Started listening"
        );
    }

    async fn stop_listening(&self, membership: &mut Membership) {
        let trigger_type = self.source.trigger_type();
        let Some(listeners) = membership.listeners.take() else {
            error!(trigger_type, "Stop requested while not listening");
            return;
        };

        for listener in listeners {
            listener.abort();
        }
        self.source.on_stop().await;
        self.source.set_workflows(Vec::new()).await;

        info!(trigger_type, generation = membership.generation, "Stopped listening");
    }
}

fn spawn_listener<S: TriggerSource>(
    source: Arc<S>,
    kind: EventKind,
    mut rx: broadcast::Receiver<SourceEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let trigger_type = source.trigger_type();
        loop {
            match rx.recv().await {
                Ok(event) => {
                    trace!(trigger_type, %kind, "Source event");
                    source.on_event(event).await;
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(trigger_type, %kind, "Detector lagged by {} events", n);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!(trigger_type, %kind, "Event bus closed");
                    break;
                }
            }
        }
    })
}

#[async_trait]
impl<S: TriggerSource> TriggerHandler for ListeningHandler<S> {
    fn trigger_type(&self) -> &'static str {
        self.source.trigger_type()
    }

    async fn start(&self, store: &dyn WorkflowStore) {
        let trigger_type = self.source.trigger_type();
        let mut membership = self.membership.lock().await;
        membership.workflows = store
            .all_workflows()
            .into_iter()
            .filter(|w| w.is_active_for(trigger_type))
            .map(|w| (w.id.clone(), w))
            .collect();
        debug!(
            trigger_type,
            workflows = membership.workflows.len(),
            "Loaded workflows from store"
        );
        self.reconcile(&mut membership).await;
    }

    async fn stop(&self) {
        let mut membership = self.membership.lock().await;
        membership.workflows.clear();
        self.reconcile(&mut membership).await;
    }

    async fn add_workflow(&self, workflow: Workflow) {
        let trigger_type = self.source.trigger_type();
        if !workflow.is_active_for(trigger_type) {
            self.remove_workflow(&workflow.id).await;
            return;
        }

        let mut membership = self.membership.lock().await;
        if membership.workflows.get(&workflow.id) == Some(&workflow) {
            trace!(workflow_id = %workflow.id, "Workflow unchanged");
            return;
        }
        debug!(trigger_type, workflow_id = %workflow.id, "Adding workflow");
        membership.workflows.insert(workflow.id.clone(), workflow);
        self.reconcile(&mut membership).await;
    }

    async fn remove_workflow(&self, workflow_id: &str) {
        let mut membership = self.membership.lock().await;
        if membership.workflows.shift_remove(workflow_id).is_none() {
            return;
        }
        debug!(trigger_type = self.source.trigger_type(), workflow_id, "Removed workflow");
        self.reconcile(&mut membership).await;
    }

    async fn workflow_count(&self) -> usize {
        self.membership.lock().await.workflows.len()
    }

    async fn is_listening(&self) -> bool {
        self.membership.lock().await.listeners.is_some()
    }
}
