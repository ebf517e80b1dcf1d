//! Knocks on the back of the device
//!
//! Accelerometer samples turn into taps when the change in magnitude between
//! consecutive samples exceeds the threshold; taps then feed the same
//! classifier as hardware keys, with a zero hold time.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Deserialize;
use serde_json::json;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace, warn};
use vf_config::BackTapSettings;
use vf_core::{trigger_types, EventKind, SourceEvent, TriggerPayload, Workflow};

use crate::dispatcher::Dispatcher;
use crate::error::{TriggerError, TriggerResult};
use crate::lifecycle::TriggerSource;
use crate::services::TriggerServices;
use crate::taps::{GestureSink, TapClassifier, TapGesture, TapInterest, TapTiming};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
enum TapType {
    Double,
    Triple,
}

impl TapType {
    fn as_str(&self) -> &'static str {
        match self {
            TapType::Double => "double",
            TapType::Triple => "triple",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct BackTapTrigger {
    #[serde(alias = "mode")]
    tap_type: TapType,
    #[serde(default)]
    sensitivity: Option<f64>,
}

impl BackTapTrigger {
    fn resolve(workflow: &Workflow) -> TriggerResult<Self> {
        workflow
            .trigger_config
            .resolve()
            .map_err(|e| TriggerError::invalid_config(&workflow.id, e))
    }
}

/// The device is the only tap source
const DEVICE: &str = "device";

#[derive(Debug, Default)]
struct Motion {
    last_sample: Option<[f64; 3]>,
    last_tap: Option<Instant>,
}

/// Accelerometer tap detector
pub struct BackTapSource {
    workflows: Arc<DashMap<String, (Workflow, BackTapTrigger)>>,
    settings: BackTapSettings,
    /// Threshold in effect for the current workflow set
    threshold: Mutex<f64>,
    motion: Mutex<Motion>,
    classifier: TapClassifier<&'static str>,
}

impl BackTapSource {
    pub fn new(services: &TriggerServices) -> Self {
        Self::with_settings(services.dispatcher.clone(), &services.settings.back_tap)
    }

    pub fn with_settings(dispatcher: Dispatcher, settings: &BackTapSettings) -> Self {
        let workflows: Arc<DashMap<String, (Workflow, BackTapTrigger)>> = Arc::new(DashMap::new());
        let timing = TapTiming {
            double_window: settings.double_tap_window(),
            triple_window: settings.triple_tap_window(),
            triple_grace: settings.triple_grace(),
            long_press: None,
        };

        let sink_workflows = workflows.clone();
        let sink: GestureSink<&'static str> = Arc::new(move |_device, gesture| {
            let tap_type = match gesture {
                TapGesture::Double => TapType::Double,
                TapGesture::Triple => TapType::Triple,
                _ => return,
            };
            debug!(tap_type = tap_type.as_str(), "Back tap");
            let matching: Vec<Workflow> = sink_workflows
                .iter()
                .filter(|e| e.value().1.tap_type == tap_type)
                .map(|e| e.value().0.clone())
                .collect();
            if matching.is_empty() {
                return;
            }
            let payload = TriggerPayload::new(trigger_types::BACK_TAP)
                .with_var("tap_type", json!(tap_type.as_str()));
            dispatcher.dispatch_all(matching, &payload);
        });

        Self {
            workflows,
            settings: settings.clone(),
            threshold: Mutex::new(settings.threshold()),
            motion: Mutex::new(Motion::default()),
            classifier: TapClassifier::new(timing, sink),
        }
    }

    fn threshold(&self) -> f64 {
        *self.threshold.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether this sample completes a tap
    fn detect_tap(&self, sample: [f64; 3]) -> bool {
        let threshold = self.threshold();
        let now = Instant::now();
        let mut motion = self.motion.lock().unwrap_or_else(PoisonError::into_inner);

        let Some(last) = motion.last_sample.replace(sample) else {
            return false;
        };
        let delta = ((sample[0] - last[0]).powi(2)
            + (sample[1] - last[1]).powi(2)
            + (sample[2] - last[2]).powi(2))
        .sqrt();
        if delta <= threshold {
            return false;
        }

        if let Some(last_tap) = motion.last_tap {
            if now.saturating_duration_since(last_tap) < self.settings.min_tap_interval() {
                trace!(delta, "Tap too close to the previous one");
                return false;
            }
        }
        motion.last_tap = Some(now);
        trace!(delta, threshold, "Tap detected");
        true
    }

    fn interest(&self) -> TapInterest {
        TapInterest {
            immediate: false,
            triple: self
                .workflows
                .iter()
                .any(|e| e.value().1.tap_type == TapType::Triple),
        }
    }
}

#[async_trait]
impl TriggerSource for BackTapSource {
    fn trigger_type(&self) -> &'static str {
        trigger_types::BACK_TAP
    }

    fn event_kinds(&self) -> &'static [EventKind] {
        &[EventKind::Accelerometer]
    }

    async fn set_workflows(&self, workflows: Vec<Workflow>) {
        self.workflows.clear();
        for workflow in workflows {
            match BackTapTrigger::resolve(&workflow) {
                Ok(trigger) => {
                    self.workflows.insert(workflow.id.clone(), (workflow, trigger));
                }
                Err(e) => warn!(error = %e, "Skipping back tap trigger"),
            }
        }

        // The most sensitive workflow decides
        let threshold = self
            .workflows
            .iter()
            .filter_map(|e| e.value().1.sensitivity)
            .map(|sensitivity| BackTapSettings { sensitivity, ..self.settings.clone() }.threshold())
            .fold(None, |min: Option<f64>, t| Some(min.map_or(t, |m| m.min(t))))
            .unwrap_or_else(|| self.settings.threshold());
        *self.threshold.lock().unwrap_or_else(PoisonError::into_inner) = threshold;
    }

    async fn on_event(&self, event: SourceEvent) {
        let SourceEvent::Accelerometer { x, y, z } = event else {
            return;
        };
        if self.detect_tap([x, y, z]) {
            self.classifier.on_tap(DEVICE, Duration::ZERO, self.interest());
        }
    }

    async fn on_stop(&self) {
        self.classifier.clear();
        *self.motion.lock().unwrap_or_else(PoisonError::into_inner) = Motion::default();
    }
}
