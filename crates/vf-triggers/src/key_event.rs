//! Hardware keys and the alert slider
//!
//! Key presses go through a [`TapClassifier`] keyed by `{device}-{key_code}`.
//! Slider moves are debounced per device and compared with the last settled
//! ringer mode.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};
use vf_config::KeyEventSettings;
use vf_core::{
    trigger_types, EventKind, KeyPress, SliderMoved, SourceEvent, TimerSet, TriggerPayload,
    Workflow,
};

use crate::dispatcher::Dispatcher;
use crate::error::{TriggerError, TriggerResult};
use crate::lifecycle::TriggerSource;
use crate::services::TriggerServices;
use crate::taps::{GestureSink, TapClassifier, TapGesture, TapInterest, TapTiming};

/// What a key workflow waits for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyAction {
    SingleClick,
    DoubleClick,
    TripleClick,
    LongPress,
    /// Fires on the first press, before the sequence is classified
    ShortPress,
    SlideUp,
    SlideDown,
}

impl KeyAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyAction::SingleClick => "single_click",
            KeyAction::DoubleClick => "double_click",
            KeyAction::TripleClick => "triple_click",
            KeyAction::LongPress => "long_press",
            KeyAction::ShortPress => "short_press",
            KeyAction::SlideUp => "slide_up",
            KeyAction::SlideDown => "slide_down",
        }
    }

    pub fn is_slider(&self) -> bool {
        matches!(self, KeyAction::SlideUp | KeyAction::SlideDown)
    }
}

impl From<TapGesture> for KeyAction {
    fn from(gesture: TapGesture) -> Self {
        match gesture {
            TapGesture::Immediate => KeyAction::ShortPress,
            TapGesture::Single => KeyAction::SingleClick,
            TapGesture::Double => KeyAction::DoubleClick,
            TapGesture::Triple => KeyAction::TripleClick,
            TapGesture::LongPress => KeyAction::LongPress,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct KeyTrigger {
    device: String,
    #[serde(default)]
    key_code: String,
    action_type: KeyAction,
}

impl KeyTrigger {
    fn resolve(workflow: &Workflow) -> TriggerResult<Self> {
        let trigger: KeyTrigger = workflow
            .trigger_config
            .resolve()
            .map_err(|e| TriggerError::invalid_config(&workflow.id, e))?;
        if trigger.device.trim().is_empty() {
            return Err(TriggerError::invalid_config(&workflow.id, "empty device"));
        }
        if !trigger.action_type.is_slider() && trigger.key_code.trim().is_empty() {
            return Err(TriggerError::invalid_config(&workflow.id, "empty key_code"));
        }
        Ok(trigger)
    }

    fn wants_key(&self, key: &KeyId) -> bool {
        !self.action_type.is_slider() && self.device == key.device && self.key_code == key.key_code
    }
}

/// Identity of one key on one input device
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyId {
    pub device: String,
    pub key_code: String,
}

impl std::fmt::Display for KeyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.device, self.key_code)
    }
}

type KeyWorkflows = Arc<DashMap<String, (Workflow, KeyTrigger)>>;

/// Key press and slider detector
pub struct KeyEventSource {
    workflows: KeyWorkflows,
    dispatcher: Dispatcher,
    classifier: TapClassifier<KeyId>,
    slider_debounce: Duration,
    slider_modes: Arc<DashMap<String, i32>>,
    slider_timers: TimerSet<String>,
}

impl KeyEventSource {
    pub fn new(services: &TriggerServices) -> Self {
        Self::with_settings(services.dispatcher.clone(), &services.settings.key_event)
    }

    pub fn with_settings(dispatcher: Dispatcher, settings: &KeyEventSettings) -> Self {
        let workflows: KeyWorkflows = Arc::new(DashMap::new());
        let timing = TapTiming {
            double_window: settings.double_click_window(),
            triple_window: settings.triple_window(),
            triple_grace: settings.triple_grace(),
            long_press: Some(settings.long_press()),
        };

        let sink_workflows = workflows.clone();
        let sink_dispatcher = dispatcher.clone();
        let sink: GestureSink<KeyId> = Arc::new(move |key: KeyId, gesture| {
            let action = KeyAction::from(gesture);
            debug!(key = %key, action = action.as_str(), "Key gesture");
            let matching = sink_workflows
                .iter()
                .filter(|e| e.value().1.wants_key(&key) && e.value().1.action_type == action)
                .map(|e| e.value().0.clone())
                .collect::<Vec<_>>();
            dispatch(&sink_dispatcher, matching, &key.device, &key.key_code, action);
        });

        Self {
            workflows,
            dispatcher,
            classifier: TapClassifier::new(timing, sink),
            slider_debounce: settings.slider_debounce(),
            slider_modes: Arc::new(DashMap::new()),
            slider_timers: TimerSet::new(),
        }
    }

    fn interest(&self, key: &KeyId) -> TapInterest {
        let mut interest = TapInterest::default();
        for entry in self.workflows.iter() {
            let trigger = &entry.value().1;
            if trigger.wants_key(key) {
                interest.immediate |= trigger.action_type == KeyAction::ShortPress;
                interest.triple |= trigger.action_type == KeyAction::TripleClick;
            }
        }
        interest
    }

    fn on_key(&self, press: KeyPress) {
        let key = KeyId {
            device: press.device,
            key_code: press.key_code,
        };
        if !self.workflows.iter().any(|e| e.value().1.wants_key(&key)) {
            trace!(key = %key, "No workflow for key");
            return;
        }
        let interest = self.interest(&key);
        self.classifier
            .on_tap(key, Duration::from_millis(press.hold_ms), interest);
    }

    fn on_slider(&self, moved: SliderMoved) {
        let modes = self.slider_modes.clone();
        let workflows = self.workflows.clone();
        let dispatcher = self.dispatcher.clone();
        let device = moved.device.clone();
        let mode = moved.ringer_mode;

        self.slider_timers
            .schedule(moved.device, self.slider_debounce, async move {
                let action = match modes.insert(device.clone(), mode) {
                    None => {
                        debug!(device = %device, mode, "Slider baseline recorded");
                        return;
                    }
                    Some(previous) if mode > previous => KeyAction::SlideUp,
                    Some(previous) if mode < previous => KeyAction::SlideDown,
                    Some(_) => return,
                };
                debug!(device = %device, mode, action = action.as_str(), "Slider moved");
                let matching = workflows
                    .iter()
                    .filter(|e| e.value().1.device == device && e.value().1.action_type == action)
                    .map(|e| e.value().0.clone())
                    .collect::<Vec<_>>();
                dispatch(&dispatcher, matching, &device, "", action);
            });
    }
}

fn dispatch(
    dispatcher: &Dispatcher,
    workflows: Vec<Workflow>,
    device: &str,
    key_code: &str,
    action: KeyAction,
) {
    if workflows.is_empty() {
        return;
    }
    let payload = TriggerPayload::new(trigger_types::KEY_EVENT)
        .with_var("device", json!(device))
        .with_var("key_code", json!(key_code))
        .with_var("action_type", json!(action.as_str()));
    dispatcher.dispatch_all(workflows, &payload);
}

#[async_trait]
impl TriggerSource for KeyEventSource {
    fn trigger_type(&self) -> &'static str {
        trigger_types::KEY_EVENT
    }

    fn event_kinds(&self) -> &'static [EventKind] {
        &[EventKind::Key, EventKind::Slider]
    }

    async fn set_workflows(&self, workflows: Vec<Workflow>) {
        self.workflows.clear();
        for workflow in workflows {
            match KeyTrigger::resolve(&workflow) {
                Ok(trigger) => {
                    self.workflows.insert(workflow.id.clone(), (workflow, trigger));
                }
                Err(e) => warn!(error = %e, "Skipping key trigger"),
            }
        }
    }

    async fn on_event(&self, event: SourceEvent) {
        match event {
            SourceEvent::Key(press) => self.on_key(press),
            SourceEvent::Slider(moved) => self.on_slider(moved),
            _ => {}
        }
    }

    async fn on_stop(&self) {
        self.classifier.clear();
        self.slider_timers.cancel_all();
        self.slider_modes.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::{ListeningHandler, TriggerHandler};
    use crate::testing::{settle, RecordingExecutor};
    use vf_event_bus::EventBus;

    const DEVICE: &str = "/dev/input/event0";

    fn workflow(id: &str, key_code: &str, action: &str) -> Workflow {
        Workflow::new(id, trigger_types::KEY_EVENT)
            .with_config("device", json!(DEVICE))
            .with_config("key_code", json!(key_code))
            .with_config("action_type", json!(action))
    }

    async fn source(workflows: Vec<Workflow>) -> (KeyEventSource, Arc<RecordingExecutor>) {
        let executor = RecordingExecutor::new();
        let source = KeyEventSource::with_settings(
            Dispatcher::new(executor.clone()),
            &KeyEventSettings::default(),
        );
        source.set_workflows(workflows).await;
        (source, executor)
    }

    async fn press(source: &KeyEventSource, key_code: &str, hold_ms: u64) {
        source
            .on_event(SourceEvent::Key(KeyPress {
                device: DEVICE.into(),
                key_code: key_code.into(),
                hold_ms,
            }))
            .await;
    }

    async fn slide(source: &KeyEventSource, mode: i32) {
        source
            .on_event(SourceEvent::Slider(SliderMoved {
                device: DEVICE.into(),
                ringer_mode: mode,
            }))
            .await;
    }

    async fn wait(ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_double_click_dispatches_only_double() {
        let (source, executor) = source(vec![
            workflow("single", "KEY_VOLUMEDOWN", "single_click"),
            workflow("double", "KEY_VOLUMEDOWN", "double_click"),
        ])
        .await;

        press(&source, "KEY_VOLUMEDOWN", 60).await;
        wait(150).await;
        press(&source, "KEY_VOLUMEDOWN", 60).await;
        wait(1000).await;

        assert_eq!(executor.workflow_ids(), vec!["double"]);
        assert_eq!(executor.vars("action_type"), vec![json!("double_click")]);
        assert_eq!(executor.vars("key_code"), vec![json!("KEY_VOLUMEDOWN")]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_triple_registered_wins() {
        let (source, executor) = source(vec![
            workflow("double", "KEY_VOLUMEUP", "double_click"),
            workflow("triple", "KEY_VOLUMEUP", "triple_click"),
        ])
        .await;

        for _ in 0..3 {
            press(&source, "KEY_VOLUMEUP", 40).await;
            wait(120).await;
        }
        wait(1000).await;
        assert_eq!(executor.workflow_ids(), vec!["triple"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_long_press_and_short_press() {
        let (source, executor) = source(vec![
            workflow("long", "KEY_POWER", "long_press"),
            workflow("short", "KEY_POWER", "short_press"),
        ])
        .await;

        press(&source, "KEY_POWER", 800).await;
        settle().await;
        assert_eq!(executor.workflow_ids(), vec!["long"]);

        press(&source, "KEY_POWER", 30).await;
        settle().await;
        assert_eq!(executor.workflow_ids(), vec!["long", "short"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_keys_ignored() {
        let (source, executor) = source(vec![workflow("a", "KEY_VOLUMEUP", "single_click")]).await;
        press(&source, "KEY_VOLUMEDOWN", 10).await;
        wait(1000).await;
        assert_eq!(executor.count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slider_baseline_then_direction() {
        let slider = |id: &str, action: &str| {
            Workflow::new(id, trigger_types::KEY_EVENT)
                .with_config("device", json!(DEVICE))
                .with_config("action_type", json!(action))
        };
        let (source, executor) = source(vec![slider("up", "slide_up"), slider("down", "slide_down")]).await;

        slide(&source, 1).await;
        wait(300).await;
        assert_eq!(executor.count(), 0);

        // Bounce settles on the last mode
        slide(&source, 0).await;
        wait(50).await;
        slide(&source, 2).await;
        wait(300).await;
        assert_eq!(executor.workflow_ids(), vec!["up"]);

        slide(&source, 0).await;
        wait(300).await;
        assert_eq!(executor.workflow_ids(), vec!["up", "down"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_config_is_skipped() {
        let bad = Workflow::new("bad", trigger_types::KEY_EVENT)
            .with_config("device", json!(DEVICE))
            .with_config("key_code", json!("KEY_A"))
            .with_config("action_type", json!("quadruple_click"));
        let (source, _executor) = source(vec![bad, workflow("ok", "KEY_A", "single_click")]).await;
        assert_eq!(source.workflows.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_cancels_pending_classification() {
        let (source, executor) = source(vec![workflow("a", "KEY_A", "single_click")]).await;
        press(&source, "KEY_A", 10).await;
        source.on_stop().await;
        wait(1000).await;
        assert_eq!(executor.count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stopped_handler_forgets_workflows() {
        let bus = Arc::new(EventBus::new());
        let executor = RecordingExecutor::new();
        let handler = ListeningHandler::new(
            KeyEventSource::with_settings(Dispatcher::new(executor.clone()), &KeyEventSettings::default()),
            bus,
        );

        handler.add_workflow(workflow("a", "KEY_A", "short_press")).await;
        assert_eq!(handler.source().workflows.len(), 1);
        handler.remove_workflow("a").await;
        assert!(handler.source().workflows.is_empty());

        press(handler.source(), "KEY_A", 10).await;
        settle().await;
        assert_eq!(executor.count(), 0);
    }

    #[test]
    fn test_key_id_display() {
        let key = KeyId {
            device: DEVICE.into(),
            key_code: "KEY_A".into(),
        };
        assert_eq!(key.to_string(), "/dev/input/event0-KEY_A");
    }
}
