//! Shared collaborators handed to every handler factory

use std::sync::Arc;
use vf_config::EngineConfig;
use vf_core::{SharedExecutor, WindowEvent};
use vf_event_bus::SharedEventBus;
use vf_selector::UiTree;
use vf_subscription::{Fetch, OfflineFetcher, SubscriptionLoader};

use crate::dispatcher::Dispatcher;
use crate::fence_state::{GeofenceStateStore, MemoryGeofenceState};
use crate::ports::{ForegroundProvider, LocationProvider, PassiveLocation, ScreenProvider};

/// Everything a handler may need, constructed once at startup
#[derive(Clone)]
pub struct TriggerServices {
    pub bus: SharedEventBus,
    pub dispatcher: Dispatcher,
    pub settings: Arc<EngineConfig>,
    pub screen: Arc<dyn ScreenProvider>,
    pub foreground: Arc<dyn ForegroundProvider>,
    pub location: Arc<dyn LocationProvider>,
    pub geofence_state: Arc<dyn GeofenceStateStore>,
    pub subscriptions: SubscriptionLoader,
}

impl TriggerServices {
    /// Services with no screen, no foreground provider, passive location,
    /// in-memory geofence state and an offline subscription loader
    pub fn new(bus: SharedEventBus, executor: SharedExecutor, settings: EngineConfig) -> Self {
        let subscriptions = subscription_loader(&settings, Arc::new(OfflineFetcher));
        Self {
            bus,
            dispatcher: Dispatcher::new(executor),
            settings: Arc::new(settings),
            screen: Arc::new(NoScreen),
            foreground: Arc::new(NoForeground),
            location: Arc::new(PassiveLocation),
            geofence_state: Arc::new(MemoryGeofenceState::new()),
            subscriptions,
        }
    }

    pub fn with_screen(mut self, screen: Arc<dyn ScreenProvider>) -> Self {
        self.screen = screen;
        self
    }

    pub fn with_foreground(mut self, foreground: Arc<dyn ForegroundProvider>) -> Self {
        self.foreground = foreground;
        self
    }

    pub fn with_location(mut self, location: Arc<dyn LocationProvider>) -> Self {
        self.location = location;
        self
    }

    pub fn with_geofence_state(mut self, state: Arc<dyn GeofenceStateStore>) -> Self {
        self.geofence_state = state;
        self
    }

    /// Download subscriptions through `fetcher`, caching per the settings
    pub fn with_fetcher(mut self, fetcher: Arc<dyn Fetch>) -> Self {
        self.subscriptions = subscription_loader(&self.settings, fetcher);
        self
    }
}

fn subscription_loader(settings: &EngineConfig, fetcher: Arc<dyn Fetch>) -> SubscriptionLoader {
    SubscriptionLoader::new(
        settings.subscription.cache_dir.clone(),
        settings.subscription.ttl(),
        fetcher,
    )
}

struct NoScreen;

impl ScreenProvider for NoScreen {
    fn current_screen(&self) -> Option<Arc<UiTree>> {
        None
    }
}

struct NoForeground;

impl ForegroundProvider for NoForeground {
    fn current_foreground(&self) -> Option<WindowEvent> {
        None
    }
}
