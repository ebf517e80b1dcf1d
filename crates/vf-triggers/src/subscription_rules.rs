//! Subscription rule trigger
//!
//! Each workflow points at a rule subscription. Rules are loaded in the
//! background; until a load finishes the workflow simply has no rules. On
//! every window or content change the rules that apply to the foreground
//! app and activity are evaluated in order, and the first one to fire (or
//! arm a delayed action) ends the pass for that workflow.

use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};
use vf_config::{ActivationResetPolicy, RuleSettings};
use vf_core::{trigger_types, EventKind, SourceEvent, TimerSet, TriggerPayload, WindowEvent, Workflow};
use vf_selector::{ElementSnapshot, UiNode};
use vf_subscription::{ResetMatch, Rule, SubscriptionLoader, SubscriptionSource};

use crate::dispatcher::Dispatcher;
use crate::lifecycle::TriggerSource;
use crate::ports::ScreenProvider;
use crate::rule_state::{RuleExecutionState, RuleStatus, RuleTiming};
use crate::services::TriggerServices;

struct RuleSlot {
    rule: Rule,
    state: RuleExecutionState,
    /// Scope key the state was last entered for
    scope: Option<String>,
}

impl RuleSlot {
    fn new(rule: Rule, default_cd_ms: u64) -> Self {
        let timing = RuleTiming::from_millis(
            rule.action_cd_ms.unwrap_or(default_cd_ms),
            rule.action_delay_ms,
            rule.match_delay_ms,
            rule.match_time_ms,
            rule.forced_time_ms,
            rule.action_maximum,
        );
        Self {
            rule,
            state: RuleExecutionState::new(timing),
            scope: None,
        }
    }

    fn scope_key(&self, window: &WindowEvent) -> String {
        match self.rule.reset_match {
            ResetMatch::Activity => format!("{}/{}", window.package, window.activity),
            ResetMatch::App => window.package.clone(),
            ResetMatch::Match => String::new(),
        }
    }
}

struct RuleSet {
    workflow: Workflow,
    /// Identifies the load whose rules are installed or awaited
    epoch: u64,
    rules: Vec<RuleSlot>,
    /// Keys of rules that triggered in the current app
    triggered_keys: HashSet<i64>,
}

/// What a fired rule hands to its workflow
struct Firing {
    element: Value,
    all_elements: Value,
}

type TimerKey = (String, usize);

struct Inner {
    sets: Mutex<IndexMap<String, RuleSet>>,
    window: Mutex<Option<WindowEvent>>,
    timers: TimerSet<TimerKey>,
    next_epoch: AtomicU64,
    dispatcher: Dispatcher,
    screen: Arc<dyn ScreenProvider>,
    loader: SubscriptionLoader,
    settings: RuleSettings,
}

impl Inner {
    fn sets(&self) -> MutexGuard<'_, IndexMap<String, RuleSet>> {
        self.sets.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn cancel_timers(&self, workflow_id: &str, rules: usize) {
        for index in 0..rules {
            self.timers.cancel(&(workflow_id.to_string(), index));
        }
    }

    /// Load a workflow's rules and install them if the set was not replaced meanwhile
    async fn load(self: Arc<Self>, workflow_id: String, source: SubscriptionSource, epoch: u64) {
        let rules = self.loader.load(&source).await;
        let default_cd = self.settings.default_action_cd_ms;

        let mut sets = self.sets();
        let Some(set) = sets.get_mut(&workflow_id).filter(|set| set.epoch == epoch) else {
            debug!(workflow_id = %workflow_id, epoch, "Subscription load superseded");
            return;
        };

        self.cancel_timers(&workflow_id, set.rules.len());
        let mut carried: HashMap<String, RuleExecutionState> = HashMap::new();
        if self.settings.activation_reset == ActivationResetPolicy::Never {
            for slot in set.rules.drain(..) {
                carried.insert(slot.rule.label(), slot.state);
            }
        }

        set.rules = rules
            .into_iter()
            .map(|rule| {
                let mut slot = RuleSlot::new(rule, default_cd);
                if let Some(mut state) = carried.remove(&slot.rule.label()) {
                    state.retime(*slot.state.timing());
                    state.disarm();
                    slot.state = state;
                }
                slot
            })
            .collect();
        set.triggered_keys.clear();
        info!(workflow_id = %workflow_id, source = %source, rules = set.rules.len(), "Subscription rules installed");
    }

    /// Track the foreground window; content events may omit the activity
    fn observe(&self, event: WindowEvent) -> (WindowEvent, bool) {
        let mut window = self.window.lock().unwrap_or_else(PoisonError::into_inner);
        let app_changed = window.as_ref().map_or(true, |w| w.package != event.package);
        let current = match window.as_ref() {
            Some(previous) if !app_changed && event.activity.is_empty() => previous.clone(),
            _ => event,
        };
        *window = Some(current.clone());
        (current, app_changed)
    }

    fn check(self: &Arc<Self>, event: WindowEvent) {
        let (window, app_changed) = self.observe(event);
        let mut sets = self.sets();

        if app_changed {
            trace!(package = %window.package, "Foreground app changed");
            for set in sets.values_mut() {
                set.triggered_keys.clear();
                if self.settings.activation_reset == ActivationResetPolicy::OnAppChange {
                    for slot in &mut set.rules {
                        slot.state.reset_counters();
                    }
                }
            }
        }

        let Some(screen) = self.screen.current_screen() else {
            trace!("No screen to check");
            return;
        };
        let root = screen.root();
        let now = Instant::now();

        for (workflow_id, set) in sets.iter_mut() {
            let RuleSet {
                workflow,
                epoch,
                rules,
                triggered_keys,
                ..
            } = set;

            for (index, slot) in rules.iter_mut().enumerate() {
                if !slot.rule.applies_to(&window.package, &window.activity) {
                    // A delayed action does not survive leaving the rule's window
                    if self.timers.cancel(&(workflow_id.clone(), index)) {
                        slot.state.disarm();
                    }
                    continue;
                }

                let scope = slot.scope_key(&window);
                if slot.scope.as_deref() != Some(scope.as_str()) {
                    self.timers.cancel(&(workflow_id.clone(), index));
                    slot.state.enter_scope(now);
                    slot.scope = Some(scope);
                }

                if !slot.rule.pre_keys.iter().all(|key| triggered_keys.contains(key)) {
                    continue;
                }
                let status = slot.state.status(now);
                if !status.is_ready() {
                    trace!(rule = %slot.rule.label(), ?status, "Rule not ready");
                    continue;
                }

                let Some(found) = slot.rule.selectors.evaluate(&root, slot.rule.match_options()) else {
                    continue;
                };
                slot.state.record_match(now);
                let snapshot = |node: &UiNode<'_>| serde_json::to_value(ElementSnapshot::capture(node)).unwrap_or_default();
                let firing = Firing {
                    element: snapshot(&found.target),
                    all_elements: Value::Array(found.all.iter().map(snapshot).collect()),
                };

                let delay = slot.state.timing().action_delay;
                if delay.is_zero() {
                    fire(&self.dispatcher, workflow, slot, triggered_keys, firing, now);
                } else {
                    debug!(
                        workflow_id = %workflow_id,
                        rule = %slot.rule.label(),
                        delay_ms = delay.as_millis() as u64,
                        "Rule matched, delaying"
                    );
                    slot.state.arm_delay();
                    let inner = Arc::clone(self);
                    let key = (workflow_id.clone(), index);
                    let epoch = *epoch;
                    self.timers.schedule(key.clone(), delay, async move {
                        inner.fire_delayed(key, epoch, firing);
                    });
                }
                break;
            }
        }
    }

    fn fire_delayed(&self, (workflow_id, index): TimerKey, epoch: u64, firing: Firing) {
        let now = Instant::now();
        let mut sets = self.sets();
        let Some(set) = sets.get_mut(&workflow_id).filter(|set| set.epoch == epoch) else {
            return;
        };
        let RuleSet {
            workflow,
            rules,
            triggered_keys,
            ..
        } = set;
        let Some(slot) = rules.get_mut(index) else {
            return;
        };

        slot.state.disarm();
        match slot.state.status(now) {
            RuleStatus::Ready => fire(&self.dispatcher, workflow, slot, triggered_keys, firing, now),
            status => debug!(rule = %slot.rule.label(), ?status, "Delayed rule action dropped"),
        }
    }
}

fn fire(
    dispatcher: &Dispatcher,
    workflow: &Workflow,
    slot: &mut RuleSlot,
    triggered_keys: &mut HashSet<i64>,
    firing: Firing,
    now: Instant,
) {
    let rule = &slot.rule;
    let mut payload = TriggerPayload::new(trigger_types::GKD)
        .with_var("element", firing.element)
        .with_var("all_elements", firing.all_elements)
        .with_var("rule_name", json!(rule.name))
        .with_var("rule_group", json!(rule.group));
    if let Some(key) = rule.key {
        payload = payload.with_var("rule_key", json!(key));
    }

    if dispatcher.dispatch_exclusive(workflow.id.clone(), workflow.clone(), payload) {
        debug!(workflow_id = %workflow.id, rule = %rule.label(), "Rule fired");
        if let Some(key) = rule.key {
            triggered_keys.insert(key);
        }
        slot.state.record_trigger(now);
    }
}

/// Rule subscription detector
pub struct SubscriptionRuleSource {
    inner: Arc<Inner>,
}

impl SubscriptionRuleSource {
    pub fn new(services: &TriggerServices) -> Self {
        Self::with_settings(
            services.dispatcher.clone(),
            services.screen.clone(),
            services.subscriptions.clone(),
            services.settings.rules.clone(),
        )
    }

    pub fn with_settings(
        dispatcher: Dispatcher,
        screen: Arc<dyn ScreenProvider>,
        loader: SubscriptionLoader,
        settings: RuleSettings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                sets: Mutex::new(IndexMap::new()),
                window: Mutex::new(None),
                timers: TimerSet::new(),
                next_epoch: AtomicU64::new(1),
                dispatcher,
                screen,
                loader,
                settings,
            }),
        }
    }

    /// Installed rules for a workflow, `None` if the workflow is unknown
    pub fn rule_count(&self, workflow_id: &str) -> Option<usize> {
        self.inner.sets().get(workflow_id).map(|set| set.rules.len())
    }

    /// Activations of one rule, by its `group/name` label
    pub fn activations(&self, workflow_id: &str, label: &str) -> Option<u32> {
        let sets = self.inner.sets();
        sets.get(workflow_id)?
            .rules
            .iter()
            .find(|slot| slot.rule.label() == label)
            .map(|slot| slot.state.activations())
    }
}

#[async_trait]
impl TriggerSource for SubscriptionRuleSource {
    fn trigger_type(&self) -> &'static str {
        trigger_types::GKD
    }

    fn event_kinds(&self) -> &'static [EventKind] {
        &[EventKind::WindowChanged, EventKind::ContentChanged]
    }

    async fn set_workflows(&self, workflows: Vec<Workflow>) {
        let mut loads = Vec::new();
        {
            let mut sets = self.inner.sets();
            let mut previous = std::mem::take(&mut *sets);

            for workflow in workflows {
                let config = &workflow.trigger_config;
                let Some(source) = SubscriptionSource::from_config(
                    config.get_str("subscription_url"),
                    config.get_str("subscription_file"),
                ) else {
                    warn!(workflow_id = %workflow.id, "Skipping rule trigger without a subscription");
                    continue;
                };
                let id = workflow.id.clone();

                match previous.shift_remove(&id) {
                    Some(set) if set.workflow == workflow => {
                        sets.insert(id, set);
                    }
                    old => {
                        let epoch = self.inner.next_epoch.fetch_add(1, Ordering::SeqCst);
                        // Keep the old rules around until the new load lands
                        let rules = old.map(|set| set.rules).unwrap_or_default();
                        loads.push((id.clone(), source.clone(), epoch));
                        sets.insert(
                            id,
                            RuleSet {
                                workflow,
                                epoch,
                                rules,
                                triggered_keys: HashSet::new(),
                            },
                        );
                    }
                }
            }

            for (id, set) in previous {
                self.inner.cancel_timers(&id, set.rules.len());
            }
        }

        for (workflow_id, source, epoch) in loads {
            debug!(workflow_id = %workflow_id, source = %source, epoch, "Loading subscription");
            tokio::spawn(Arc::clone(&self.inner).load(workflow_id, source, epoch));
        }
    }

    async fn on_event(&self, event: SourceEvent) {
        match event {
            SourceEvent::WindowChanged(window) | SourceEvent::ContentChanged(window) => {
                self.inner.check(window);
            }
            _ => {}
        }
    }

    async fn on_stop(&self) {
        self.inner.timers.cancel_all();
        *self.inner.window.lock().unwrap_or_else(PoisonError::into_inner) = None;
        let mut sets = self.inner.sets();
        for set in sets.values_mut() {
            set.triggered_keys.clear();
            for slot in &mut set.rules {
                slot.state.disarm();
                slot.scope = None;
            }
        }
    }
}
