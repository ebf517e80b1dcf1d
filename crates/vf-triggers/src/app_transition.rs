//! Foreground app open/close detection
//!
//! Raw window changes are noisy. System overlays and input methods are
//! ignored outright; a package that flashes up more than a few times a
//! second is a popup, not a transition; and a trip through the launcher is
//! only believed once it has lasted the debounce delay and the platform still
//! reports the launcher in front. Each package carries an open flag so open
//! and close alternate strictly.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Deserialize;
use serde_json::json;
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};
use vf_config::AppTransitionSettings;
use vf_core::{trigger_types, EventKind, SourceEvent, TimerSet, TriggerPayload, WindowEvent, Workflow};

use crate::dispatcher::Dispatcher;
use crate::error::{TriggerError, TriggerResult};
use crate::lifecycle::TriggerSource;
use crate::ports::ForegroundProvider;
use crate::services::TriggerServices;

/// `activity_name` value meaning "any activity, on app launch"
pub const ANY_ACTIVITY: &str = "LAUNCH";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
enum AppEvent {
    Open,
    Close,
}

impl AppEvent {
    fn as_str(&self) -> &'static str {
        match self {
            AppEvent::Open => "open",
            AppEvent::Close => "close",
        }
    }
}

fn default_event() -> AppEvent {
    AppEvent::Open
}

#[derive(Debug, Clone, Deserialize)]
struct AppTrigger {
    package_name: String,
    #[serde(default)]
    activity_name: Option<String>,
    #[serde(default = "default_event")]
    event: AppEvent,
}

impl AppTrigger {
    fn resolve(workflow: &Workflow) -> TriggerResult<Self> {
        let trigger: AppTrigger = workflow
            .trigger_config
            .resolve()
            .map_err(|e| TriggerError::invalid_config(&workflow.id, e))?;
        if trigger.package_name.trim().is_empty() {
            return Err(TriggerError::invalid_config(&workflow.id, "empty package_name"));
        }
        Ok(trigger)
    }

    /// Activity this trigger is pinned to, if any
    fn activity(&self) -> Option<&str> {
        self.activity_name
            .as_deref()
            .map(str::trim)
            .filter(|a| !a.is_empty() && *a != ANY_ACTIVITY)
    }

    fn fires_on(&self, transition: &Transition) -> bool {
        match transition {
            Transition::Opened(window) => {
                self.event == AppEvent::Open
                    && self.package_name == window.package
                    && self.activity().map_or(true, |a| activity_matches(a, &window.activity))
            }
            Transition::ActivityChanged(window) => {
                self.event == AppEvent::Open
                    && self.package_name == window.package
                    && self.activity().is_some_and(|a| activity_matches(a, &window.activity))
            }
            Transition::Closed(window) => {
                self.event == AppEvent::Close && self.package_name == window.package
            }
        }
    }
}

/// Full class name, or the `.Short` form relative to the package
fn activity_matches(configured: &str, activity: &str) -> bool {
    configured == activity || (configured.starts_with('.') && activity.ends_with(configured))
}

#[derive(Debug, Clone, PartialEq)]
enum Transition {
    Opened(WindowEvent),
    /// New activity inside the package already in front
    ActivityChanged(WindowEvent),
    Closed(WindowEvent),
}

impl Transition {
    fn window(&self) -> &WindowEvent {
        match self {
            Transition::Opened(w) | Transition::ActivityChanged(w) | Transition::Closed(w) => w,
        }
    }

    fn event(&self) -> AppEvent {
        match self {
            Transition::Closed(_) => AppEvent::Close,
            _ => AppEvent::Open,
        }
    }
}

#[derive(Debug, Default)]
struct Tracker {
    current: Option<WindowEvent>,
    open: HashSet<String>,
    recent: VecDeque<(String, Instant)>,
    last_event_at: Option<Instant>,
}

impl Tracker {
    fn switch_to(&mut self, window: WindowEvent) -> Vec<Transition> {
        let mut transitions = Vec::new();
        match &self.current {
            Some(current) if current.package == window.package => {
                if !window.activity.is_empty() && current.activity != window.activity {
                    transitions.push(Transition::ActivityChanged(window.clone()));
                }
            }
            _ => {
                if let Some(previous) = self.current.take() {
                    if self.open.remove(&previous.package) {
                        transitions.push(Transition::Closed(previous));
                    }
                }
                if self.open.insert(window.package.clone()) {
                    transitions.push(Transition::Opened(window.clone()));
                }
            }
        }
        self.current = Some(window);
        transitions
    }

    /// Record a sighting; true when the package is flashing like a popup
    fn is_popup(&mut self, package: &str, now: Instant, settings: &AppTransitionSettings) -> bool {
        let window = settings.popup_window();
        while self
            .recent
            .front()
            .is_some_and(|(_, at)| now.saturating_duration_since(*at) > window)
        {
            self.recent.pop_front();
        }
        let repeats = self.recent.iter().filter(|(p, _)| p == package).count();
        self.recent.push_back((package.to_string(), now));
        repeats >= settings.popup_max_repeats
    }
}

struct Inner {
    workflows: DashMap<String, (Workflow, AppTrigger)>,
    dispatcher: Dispatcher,
    settings: AppTransitionSettings,
    foreground: Arc<dyn ForegroundProvider>,
    tracker: Mutex<Tracker>,
    launcher: TimerSet<&'static str>,
}

const LAUNCHER_TIMER: &str = "launcher";

impl Inner {
    fn tracker(&self) -> MutexGuard<'_, Tracker> {
        self.tracker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn on_window(self: &Arc<Self>, window: WindowEvent) {
        if self.settings.is_ignored(&window.package) {
            trace!(package = %window.package, "Ignored package");
            return;
        }

        let now = Instant::now();
        {
            let mut tracker = self.tracker();
            if tracker.is_popup(&window.package, now, &self.settings) {
                debug!(package = %window.package, "Suppressing popup noise");
                return;
            }
            tracker.last_event_at = Some(now);
        }

        if self.settings.is_launcher(&window.package) {
            let inner = self.clone();
            self.launcher
                .schedule(LAUNCHER_TIMER, self.settings.launcher_debounce(), async move {
                    inner.confirm_launcher(window);
                });
            return;
        }

        self.launcher.cancel(&LAUNCHER_TIMER);
        let transitions = self.tracker().switch_to(window);
        self.emit(transitions);
    }

    /// The debounce elapsed; believe whatever the platform reports now
    fn confirm_launcher(&self, launcher: WindowEvent) {
        let window = match self.foreground.current_foreground() {
            Some(front) if !self.settings.is_ignored(&front.package) => {
                if !self.settings.is_launcher(&front.package) {
                    debug!(package = %front.package, "Launcher was only grazed");
                }
                front
            }
            _ => launcher,
        };
        let transitions = self.tracker().switch_to(window);
        self.emit(transitions);
    }

    /// Silently adopt the real foreground if events have dried up
    fn reconcile(&self) {
        let now = Instant::now();
        let mut tracker = self.tracker();
        if tracker
            .last_event_at
            .is_some_and(|at| now.saturating_duration_since(at) < self.settings.stale_after())
        {
            return;
        }
        let Some(front) = self.foreground.current_foreground() else {
            return;
        };
        if self.settings.is_ignored(&front.package)
            || tracker.current.as_ref().is_some_and(|c| c.package == front.package)
        {
            return;
        }

        debug!(
            from = tracker.current.as_ref().map(|c| c.package.as_str()).unwrap_or("-"),
            to = %front.package,
            "Foreground drifted, correcting without events"
        );
        if let Some(previous) = tracker.current.take() {
            tracker.open.remove(&previous.package);
        }
        tracker.open.insert(front.package.clone());
        tracker.current = Some(front);
        tracker.last_event_at = Some(now);
    }

    fn emit(&self, transitions: Vec<Transition>) {
        for transition in transitions {
            let window = transition.window();
            let event = transition.event();
            debug!(package = %window.package, activity = %window.activity, event = event.as_str(), "App transition");

            let matching: Vec<Workflow> = self
                .workflows
                .iter()
                .filter(|e| e.value().1.fires_on(&transition))
                .map(|e| e.value().0.clone())
                .collect();
            if matching.is_empty() {
                continue;
            }
            let payload = TriggerPayload::new(trigger_types::APP_START)
                .with_var("package_name", json!(window.package))
                .with_var("activity_name", json!(window.activity))
                .with_var("event", json!(event.as_str()));
            self.dispatcher.dispatch_all(matching, &payload);
        }
    }
}

/// Foreground app transition detector
pub struct AppTransitionSource {
    inner: Arc<Inner>,
    reconciler: Mutex<Option<JoinHandle<()>>>,
}

impl AppTransitionSource {
    pub fn new(services: &TriggerServices) -> Self {
        Self::with_settings(
            services.dispatcher.clone(),
            services.settings.app_transition.clone(),
            services.foreground.clone(),
        )
    }

    pub fn with_settings(
        dispatcher: Dispatcher,
        settings: AppTransitionSettings,
        foreground: Arc<dyn ForegroundProvider>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                workflows: DashMap::new(),
                dispatcher,
                settings,
                foreground,
                tracker: Mutex::new(Tracker::default()),
                launcher: TimerSet::new(),
            }),
            reconciler: Mutex::new(None),
        }
    }

    fn set_reconciler(&self, handle: Option<JoinHandle<()>>) {
        let mut slot = self.reconciler.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = std::mem::replace(&mut *slot, handle) {
            previous.abort();
        }
    }
}

#[async_trait]
impl TriggerSource for AppTransitionSource {
    fn trigger_type(&self) -> &'static str {
        trigger_types::APP_START
    }

    fn event_kinds(&self) -> &'static [EventKind] {
        &[EventKind::WindowChanged]
    }

    async fn set_workflows(&self, workflows: Vec<Workflow>) {
        self.inner.workflows.clear();
        for workflow in workflows {
            match AppTrigger::resolve(&workflow) {
                Ok(trigger) => {
                    self.inner.workflows.insert(workflow.id.clone(), (workflow, trigger));
                }
                Err(e) => warn!(error = %e, "Skipping app trigger"),
            }
        }
    }

    async fn on_start(&self, generation: u64) {
        let inner = self.inner.clone();
        let period = inner.settings.reconcile_interval();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            loop {
                ticker.tick().await;
                inner.reconcile();
            }
        });
        self.set_reconciler(Some(handle));
        info!(generation, "Foreground reconciliation scheduled");
    }

    async fn on_event(&self, event: SourceEvent) {
        if let SourceEvent::WindowChanged(window) = event {
            self.inner.on_window(window);
        }
    }

    async fn on_stop(&self) {
        self.set_reconciler(None);
        self.inner.launcher.cancel_all();
        *self.inner.tracker() = Tracker::default();
    }
}
