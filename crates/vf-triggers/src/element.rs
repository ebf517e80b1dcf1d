//! Fire when a selector matches on screen
//!
//! Every window or content change re-checks the current screen. Each
//! workflow carries its own [`RuleExecutionState`], so the usual cooldown,
//! delay, window and activation limits apply. Within one check pass a node
//! triggers at most one workflow.

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::time::Instant;
use tracing::{debug, trace, warn};
use vf_config::{ActivationResetPolicy, RuleSettings};
use vf_core::{trigger_types, EventKind, SourceEvent, TimerSet, TriggerPayload, Workflow};
use vf_selector::{ElementSnapshot, MatchOptions, Selector};

use crate::dispatcher::Dispatcher;
use crate::error::{TriggerError, TriggerResult};
use crate::lifecycle::TriggerSource;
use crate::ports::ScreenProvider;
use crate::rule_state::{RuleExecutionState, RuleStatus, RuleTiming};
use crate::services::TriggerServices;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ElementTrigger {
    selector: String,
    #[serde(default)]
    match_delay: u64,
    #[serde(default)]
    action_delay: u64,
    #[serde(default)]
    match_time: Option<u64>,
    #[serde(default)]
    action_cd: Option<u64>,
    #[serde(default)]
    action_maximum: Option<u32>,
}

struct Entry {
    workflow: Workflow,
    selector: Selector,
    state: RuleExecutionState,
}

impl Entry {
    fn resolve(workflow: Workflow, default_cd_ms: u64) -> TriggerResult<Self> {
        let trigger: ElementTrigger = workflow
            .trigger_config
            .resolve()
            .map_err(|e| TriggerError::invalid_config(&workflow.id, e))?;
        let selector =
            Selector::parse(&trigger.selector).map_err(|e| TriggerError::invalid_config(&workflow.id, e))?;
        let timing = RuleTiming::from_millis(
            trigger.action_cd.unwrap_or(default_cd_ms),
            trigger.action_delay,
            trigger.match_delay,
            trigger.match_time,
            0,
            trigger.action_maximum,
        );
        Ok(Self {
            workflow,
            selector,
            state: RuleExecutionState::new(timing),
        })
    }
}

#[derive(Default)]
struct Board {
    entries: IndexMap<String, Entry>,
    /// Package the states are scoped to
    package: Option<String>,
    /// Listening generation delayed fires belong to
    generation: Option<u64>,
}

struct Inner {
    board: Mutex<Board>,
    timers: TimerSet<String>,
    dispatcher: Dispatcher,
    screen: Arc<dyn ScreenProvider>,
    settings: RuleSettings,
}

impl Inner {
    fn board(&self) -> std::sync::MutexGuard<'_, Board> {
        self.board.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check(self: &Arc<Self>, package: &str) {
        let Some(screen) = self.screen.current_screen() else {
            trace!("No screen to check");
            return;
        };
        let root = screen.root();
        let now = Instant::now();
        let mut guard = self.board();
        let board = &mut *guard;

        if board.package.as_deref() != Some(package) {
            debug!(package, "Element scope changed");
            board.package = Some(package.to_string());
            self.timers.cancel_all();
            for entry in board.entries.values_mut() {
                entry.state.enter_scope(now);
                if self.settings.activation_reset == ActivationResetPolicy::OnAppChange {
                    entry.state.reset_counters();
                }
            }
        }

        let mut used: HashSet<usize> = HashSet::new();
        for (id, entry) in board.entries.iter_mut() {
            if !entry.state.in_scope() {
                entry.state.enter_scope(now);
            }
            let status = entry.state.status(now);
            if !status.is_ready() {
                trace!(workflow_id = %id, ?status, "Element rule not ready");
                continue;
            }

            let Some(node) = entry
                .selector
                .find_all(&root, MatchOptions::fast())
                .into_iter()
                .find(|node| !used.contains(&node.node_index()))
            else {
                continue;
            };
            used.insert(node.node_index());
            entry.state.record_match(now);
            let element = serde_json::to_value(ElementSnapshot::capture(&node)).unwrap_or_default();

            let delay = entry.state.timing().action_delay;
            if delay.is_zero() {
                self.trigger(entry, element, now);
            } else {
                debug!(workflow_id = %id, delay_ms = delay.as_millis() as u64, "Element matched, delaying");
                entry.state.arm_delay();
                let inner = Arc::clone(self);
                let key = id.clone();
                let generation = board.generation;
                self.timers.schedule(id.clone(), delay, async move {
                    inner.fire_delayed(&key, generation, element);
                });
            }
        }
    }

    fn fire_delayed(&self, id: &str, generation: Option<u64>, element: Value) {
        let now = Instant::now();
        let mut board = self.board();
        if board.generation != generation {
            debug!(workflow_id = %id, ?generation, "Delayed element trigger from a stopped generation");
            return;
        }
        let Some(entry) = board.entries.get_mut(id) else {
            return;
        };
        entry.state.disarm();
        match entry.state.status(now) {
            RuleStatus::Ready => self.trigger(entry, element, now),
            status => debug!(workflow_id = %id, ?status, "Delayed element trigger dropped"),
        }
    }

    fn trigger(&self, entry: &mut Entry, element: Value, now: Instant) {
        let payload = TriggerPayload::new(trigger_types::ELEMENT).with_var("element", element);
        if self
            .dispatcher
            .dispatch_exclusive(entry.workflow.id.clone(), entry.workflow.clone(), payload)
        {
            debug!(workflow_id = %entry.workflow.id, "Element trigger fired");
            entry.state.record_trigger(now);
        }
    }
}

/// Selector match detector
pub struct ElementSource {
    inner: Arc<Inner>,
}

impl ElementSource {
    pub fn new(services: &TriggerServices) -> Self {
        Self::with_settings(
            services.dispatcher.clone(),
            services.screen.clone(),
            services.settings.rules.clone(),
        )
    }

    pub fn with_settings(dispatcher: Dispatcher, screen: Arc<dyn ScreenProvider>, settings: RuleSettings) -> Self {
        Self {
            inner: Arc::new(Inner {
                board: Mutex::new(Board::default()),
                timers: TimerSet::new(),
                dispatcher,
                screen,
                settings,
            }),
        }
    }

    /// Activations recorded for a workflow
    pub fn activations(&self, workflow_id: &str) -> Option<u32> {
        self.inner
            .board()
            .entries
            .get(workflow_id)
            .map(|entry| entry.state.activations())
    }
}

#[async_trait]
impl TriggerSource for ElementSource {
    fn trigger_type(&self) -> &'static str {
        trigger_types::ELEMENT
    }

    fn event_kinds(&self) -> &'static [EventKind] {
        &[EventKind::WindowChanged, EventKind::ContentChanged]
    }

    async fn set_workflows(&self, workflows: Vec<Workflow>) {
        let policy = self.inner.settings.activation_reset;
        let default_cd = self.inner.settings.default_action_cd_ms;
        let mut board = self.inner.board();
        let mut previous = std::mem::take(&mut board.entries);

        for workflow in workflows {
            let id = workflow.id.clone();
            let mut entry = match Entry::resolve(workflow, default_cd) {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(error = %e, "Skipping element trigger");
                    continue;
                }
            };
            if let Some(old) = previous.shift_remove(&id) {
                let unchanged = old.workflow == entry.workflow;
                if unchanged || policy == ActivationResetPolicy::Never {
                    let timing = *entry.state.timing();
                    entry.state = old.state;
                    entry.state.retime(timing);
                } else {
                    self.inner.timers.cancel(&id);
                }
            }
            board.entries.insert(id, entry);
        }

        for id in previous.keys() {
            self.inner.timers.cancel(id);
        }
    }

    async fn on_event(&self, event: SourceEvent) {
        match event {
            SourceEvent::WindowChanged(window) | SourceEvent::ContentChanged(window) => {
                self.inner.check(&window.package);
            }
            _ => {}
        }
    }

    async fn on_start(&self, generation: u64) {
        self.inner.board().generation = Some(generation);
    }

    async fn on_stop(&self) {
        self.inner.timers.cancel_all();
        let mut board = self.inner.board();
        board.package = None;
        board.generation = None;
        board.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::{ListeningHandler, TriggerHandler};
    use crate::ports::ScreenSlot;
    use crate::testing::{settle, RecordingExecutor};
    use serde_json::json;
    use std::time::Duration;
    use vf_core::WindowEvent;
    use vf_event_bus::EventBus;
    use vf_selector::{UiNodeSpec, UiTree};

    fn screen() -> Arc<ScreenSlot> {
        let slot = Arc::new(ScreenSlot::new());
        slot.replace(UiTree::build(
            UiNodeSpec::new("android.widget.FrameLayout")
                .with_package("com.app")
                .with_child(
                    UiNodeSpec::new("android.widget.TextView")
                        .with_text("Skip")
                        .with_id("com.app:id/skip")
                        .clickable(),
                ),
        ));
        slot
    }

    fn workflow(id: &str) -> Workflow {
        Workflow::new(id, trigger_types::ELEMENT).with_config("selector", json!("[text=\"Skip\"]"))
    }

    async fn element_source(
        workflows: Vec<Workflow>,
        settings: RuleSettings,
    ) -> (ElementSource, Arc<RecordingExecutor>) {
        let executor = RecordingExecutor::new();
        let source = ElementSource::with_settings(Dispatcher::new(executor.clone()), screen(), settings);
        source.set_workflows(workflows).await;
        (source, executor)
    }

    async fn changed(source: &ElementSource, package: &str) {
        source
            .on_event(SourceEvent::ContentChanged(WindowEvent {
                package: package.into(),
                activity: String::new(),
            }))
            .await;
        settle().await;
    }

    async fn wait(ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooldown_spaces_triggers() {
        let (source, executor) = element_source(vec![workflow("skip")], RuleSettings::default()).await;

        changed(&source, "com.app").await;
        assert_eq!(executor.count(), 1);
        for _ in 0..5 {
            wait(100).await;
            changed(&source, "com.app").await;
        }
        assert_eq!(executor.count(), 1);

        wait(500).await;
        changed(&source, "com.app").await;
        assert_eq!(executor.count(), 2);

        let element = &executor.vars("element")[0];
        assert_eq!(element["text"], json!("Skip"));
        assert_eq!(element["clickable"], json!(true));
    }

    #[tokio::test(start_paused = true)]
    async fn test_action_delay_holds_matches() {
        let delayed = workflow("later").with_config("actionDelay", json!(500));
        let (source, executor) = element_source(vec![delayed], RuleSettings::default()).await;

        changed(&source, "com.app").await;
        wait(200).await;
        changed(&source, "com.app").await;
        assert_eq!(executor.count(), 0);

        wait(400).await;
        assert_eq!(executor.count(), 1);
        wait(2000).await;
        assert_eq!(executor.count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_app_change_restarts_pending_delay() {
        let delayed = workflow("later").with_config("actionDelay", json!(500));
        let (source, executor) = element_source(vec![delayed], RuleSettings::default()).await;

        changed(&source, "com.app").await;
        wait(100).await;
        changed(&source, "com.other").await;
        wait(450).await;
        // The first delay was cancelled and the new scope armed its own
        assert_eq!(executor.count(), 0);
        wait(200).await;
        assert_eq!(executor.count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_node_one_workflow_per_pass() {
        let (source, executor) = element_source(vec![workflow("a"), workflow("b")], RuleSettings::default()).await;
        changed(&source, "com.app").await;
        assert_eq!(executor.workflow_ids(), vec!["a"]);

        wait(10).await;
        changed(&source, "com.app").await;
        assert_eq!(executor.workflow_ids(), vec!["a", "b"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_action_maximum_and_reset_policy() {
        let capped = workflow("once").with_config("actionMaximum", json!(1)).with_config("actionCd", json!(0));

        let (source, executor) = element_source(vec![capped.clone()], RuleSettings::default()).await;
        changed(&source, "com.app").await;
        changed(&source, "com.other").await;
        changed(&source, "com.app").await;
        assert_eq!(executor.count(), 1);
        assert_eq!(source.activations("once"), Some(1));

        // Reloading the same workflow keeps the count
        source.set_workflows(vec![capped.clone()]).await;
        changed(&source, "com.app").await;
        assert_eq!(executor.count(), 1);

        let settings = RuleSettings {
            activation_reset: ActivationResetPolicy::OnAppChange,
            ..RuleSettings::default()
        };
        let (source, executor) = element_source(vec![capped], settings).await;
        changed(&source, "com.app").await;
        changed(&source, "com.app").await;
        assert_eq!(executor.count(), 1);
        changed(&source, "com.other").await;
        assert_eq!(executor.count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_changed_workflow_resets_state_on_reload() {
        let capped = workflow("once").with_config("actionMaximum", json!(1));
        let (source, executor) = element_source(vec![capped.clone()], RuleSettings::default()).await;
        changed(&source, "com.app").await;
        assert_eq!(source.activations("once"), Some(1));

        source
            .set_workflows(vec![capped.with_config("actionMaximum", json!(2))])
            .await;
        assert_eq!(source.activations("once"), Some(0));
        wait(1000).await;
        changed(&source, "com.app").await;
        assert_eq!(executor.count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_selector_skipped() {
        let bad = Workflow::new("bad", trigger_types::ELEMENT).with_config("selector", json!("[nope=1]"));
        let (source, _executor) = element_source(vec![bad, workflow("ok")], RuleSettings::default()).await;
        assert_eq!(source.activations("bad"), None);
        assert_eq!(source.activations("ok"), Some(0));
    }

    fn content_changed() -> SourceEvent {
        SourceEvent::ContentChanged(WindowEvent {
            package: "com.app".into(),
            activity: String::new(),
        })
    }

    fn listening(executor: &Arc<RecordingExecutor>, bus: &Arc<EventBus>) -> ListeningHandler<ElementSource> {
        let source = ElementSource::with_settings(Dispatcher::new(executor.clone()), screen(), RuleSettings::default());
        ListeningHandler::new(source, bus.clone())
    }

    #[tokio::test(start_paused = true)]
    async fn test_restarted_generation_starts_fresh() {
        let bus = Arc::new(EventBus::new());
        let executor = RecordingExecutor::new();
        let handler = listening(&executor, &bus);
        let capped = workflow("once").with_config("actionMaximum", json!(1));

        handler.add_workflow(capped.clone()).await;
        bus.fire(content_changed());
        settle().await;
        assert_eq!(executor.count(), 1);

        handler.remove_workflow("once").await;
        assert!(!handler.is_listening().await);
        assert_eq!(handler.source().activations("once"), None);

        handler.add_workflow(capped).await;
        assert_eq!(handler.source().activations("once"), Some(0));
        bus.fire(content_changed());
        settle().await;
        assert_eq!(executor.count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_removed_workflow_delayed_action_never_runs() {
        let bus = Arc::new(EventBus::new());
        let executor = RecordingExecutor::new();
        let handler = listening(&executor, &bus);
        let delayed = workflow("later").with_config("actionDelay", json!(500));

        handler.add_workflow(delayed.clone()).await;
        bus.fire(content_changed());
        settle().await;
        handler.remove_workflow("later").await;
        handler.add_workflow(delayed).await;

        wait(1000).await;
        assert_eq!(executor.count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delayed_fire_from_stopped_generation_is_dropped() {
        let (source, executor) =
            element_source(vec![workflow("later").with_config("actionDelay", json!(500))], RuleSettings::default())
                .await;
        source.on_start(2).await;

        source.inner.fire_delayed("later", Some(1), json!({"text": "Skip"}));
        settle().await;
        assert_eq!(executor.count(), 0);

        source.inner.fire_delayed("later", Some(2), json!({"text": "Skip"}));
        settle().await;
        assert_eq!(executor.count(), 1);
    }
}
