//! Trigger handlers for vFlow
//!
//! Each trigger type is a [`TriggerSource`] wrapped in a [`ListeningHandler`]:
//! the handler keeps the set of workflows bound to the type and subscribes
//! the source to the event bus only while that set is non-empty. The
//! [`TriggerEngine`] owns one handler per type in the [`TriggerRegistry`] and
//! keeps them in sync with the workflow store.
//!
//! Detectors:
//! - [`KeyEventSource`]: single/double/triple/long presses and the alert slider
//! - [`BackTapSource`]: knocks on the back of the device
//! - [`AppTransitionSource`]: app open/close with popup and launcher filtering
//! - [`GeofenceSource`]: circular fences with adaptive location cost
//! - [`NotificationSource`], [`SmsSource`], [`CallSource`]: content filters
//! - [`ElementSource`]: a selector matched on screen
//! - [`SubscriptionRuleSource`]: rules from a subscription document

mod app_transition;
mod back_tap;
mod content;
mod dispatcher;
mod element;
mod engine;
mod error;
mod fence_state;
mod geofence;
mod key_event;
mod lifecycle;
mod ports;
mod registry;
mod rule_state;
mod services;
mod subscription_rules;
mod taps;

#[cfg(test)]
mod testing;

pub use app_transition::{AppTransitionSource, ANY_ACTIVITY};
pub use back_tap::BackTapSource;
pub use content::{CallSource, CodeExtractor, NotificationSource, SmsSource};
pub use dispatcher::Dispatcher;
pub use element::ElementSource;
pub use engine::TriggerEngine;
pub use error::{TriggerError, TriggerResult};
pub use fence_state::{GeofenceStateStore, JsonFileGeofenceState, MemoryGeofenceState};
pub use geofence::{fence_id, haversine_m, GeofenceSource};
pub use key_event::{KeyAction, KeyEventSource, KeyId};
pub use lifecycle::{ListeningHandler, TriggerHandler, TriggerSource};
pub use ports::{
    ForegroundProvider, ForegroundSlot, LocationProvider, LocationTier, PassiveLocation, ScreenProvider, ScreenSlot,
};
pub use registry::{HandlerFactory, TriggerRegistry};
pub use rule_state::{RuleExecutionState, RuleStatus, RuleTiming};
pub use services::TriggerServices;
pub use subscription_rules::SubscriptionRuleSource;
pub use taps::{GestureSink, TapClassifier, TapGesture, TapInterest, TapTiming};
