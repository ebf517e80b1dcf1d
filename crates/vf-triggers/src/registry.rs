//! Trigger type → handler factory

use indexmap::IndexMap;
use std::sync::Arc;
use vf_core::trigger_types;

use crate::app_transition::AppTransitionSource;
use crate::back_tap::BackTapSource;
use crate::content::{CallSource, NotificationSource, SmsSource};
use crate::element::ElementSource;
use crate::geofence::GeofenceSource;
use crate::key_event::KeyEventSource;
use crate::lifecycle::{ListeningHandler, TriggerHandler, TriggerSource};
use crate::services::TriggerServices;
use crate::subscription_rules::SubscriptionRuleSource;

/// Builds the handler for one trigger type
pub type HandlerFactory = Arc<dyn Fn(&TriggerServices) -> Arc<dyn TriggerHandler> + Send + Sync>;

/// Static map of the trigger types the engine knows
#[derive(Clone, Default)]
pub struct TriggerRegistry {
    factories: IndexMap<&'static str, HandlerFactory>,
}

impl TriggerRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Every built-in trigger type
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register_source(trigger_types::KEY_EVENT, KeyEventSource::new);
        registry.register_source(trigger_types::BACK_TAP, BackTapSource::new);
        registry.register_source(trigger_types::APP_START, AppTransitionSource::new);
        registry.register_source(trigger_types::LOCATION, GeofenceSource::new);
        registry.register_source(trigger_types::NOTIFICATION, NotificationSource::new);
        registry.register_source(trigger_types::SMS, SmsSource::new);
        registry.register_source(trigger_types::CALL, CallSource::new);
        registry.register_source(trigger_types::ELEMENT, ElementSource::new);
        registry.register_source(trigger_types::GKD, SubscriptionRuleSource::new);
        registry
    }

    /// Register a factory, replacing any previous one for the type
    pub fn register<F>(&mut self, trigger_type: &'static str, factory: F)
    where
        F: Fn(&TriggerServices) -> Arc<dyn TriggerHandler> + Send + Sync + 'static,
    {
        self.factories.insert(trigger_type, Arc::new(factory));
    }

    /// Register a source wrapped in a [`ListeningHandler`]
    pub fn register_source<S, F>(&mut self, trigger_type: &'static str, build: F)
    where
        S: TriggerSource,
        F: Fn(&TriggerServices) -> S + Send + Sync + 'static,
    {
        self.register(trigger_type, move |services| {
            Arc::new(ListeningHandler::new(build(services), services.bus.clone()))
        });
    }

    pub fn contains(&self, trigger_type: &str) -> bool {
        self.factories.contains_key(trigger_type)
    }

    pub fn trigger_types(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.factories.keys().copied()
    }

    /// Instantiate one handler per registered type
    pub fn build(&self, services: &TriggerServices) -> IndexMap<&'static str, Arc<dyn TriggerHandler>> {
        self.factories
            .iter()
            .map(|(trigger_type, factory)| (*trigger_type, factory(services)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_cover_every_type() {
        let registry = TriggerRegistry::with_defaults();
        for trigger_type in [
            trigger_types::KEY_EVENT,
            trigger_types::BACK_TAP,
            trigger_types::APP_START,
            trigger_types::LOCATION,
            trigger_types::NOTIFICATION,
            trigger_types::SMS,
            trigger_types::CALL,
            trigger_types::ELEMENT,
            trigger_types::GKD,
        ] {
            assert!(registry.contains(trigger_type), "{trigger_type} missing");
        }
        assert_eq!(registry.trigger_types().count(), 9);
    }

    #[tokio::test]
    async fn test_built_handlers_report_their_type() {
        let services = crate::testing::services(crate::testing::RecordingExecutor::new());
        let handlers = TriggerRegistry::with_defaults().build(&services);
        for (trigger_type, handler) in &handlers {
            assert_eq!(handler.trigger_type(), *trigger_type);
        }
    }
}
