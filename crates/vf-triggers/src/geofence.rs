//! Circular geofences with adaptive location cost
//!
//! Every accepted fix picks a location tier from the distance to the nearest
//! fence edge: far away only passive fixes are needed, closer in network
//! positioning, and near an edge satellite positioning. Tier changes are
//! rate limited and the old request is always removed before a new one is
//! made. Containment is persisted before dispatch so a repeated fix can never
//! fire the same crossing twice.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};
use vf_config::GeofenceSettings;
use vf_core::{trigger_types, EventKind, LocationFix, SourceEvent, TriggerPayload, Workflow};

use crate::dispatcher::Dispatcher;
use crate::error::{TriggerError, TriggerResult};
use crate::fence_state::GeofenceStateStore;
use crate::lifecycle::TriggerSource;
use crate::ports::{LocationProvider, LocationTier};
use crate::services::TriggerServices;

const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Great-circle distance in meters
pub fn haversine_m(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();
    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * a.sqrt().atan2((1.0 - a).sqrt())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
enum FenceEvent {
    Enter,
    Exit,
}

impl FenceEvent {
    fn as_str(&self) -> &'static str {
        match self {
            FenceEvent::Enter => "enter",
            FenceEvent::Exit => "exit",
        }
    }
}

/// One workflow's fence
#[derive(Debug, Clone)]
struct Fence {
    id: String,
    latitude: f64,
    longitude: f64,
    radius: f64,
    event: FenceEvent,
}

impl Fence {
    fn resolve(workflow: &Workflow) -> TriggerResult<Self> {
        let config = &workflow.trigger_config;
        let number = |key: &str| {
            config
                .get_f64(key)
                .ok_or_else(|| TriggerError::invalid_config(&workflow.id, format!("missing or invalid {key}")))
        };
        let latitude = number("latitude")?;
        let longitude = number("longitude")?;
        let radius = number("radius")?;
        if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
            return Err(TriggerError::invalid_config(&workflow.id, "coordinates out of range"));
        }
        if radius <= 0.0 {
            return Err(TriggerError::invalid_config(&workflow.id, "radius must be positive"));
        }
        let event = match config.get("event") {
            None => FenceEvent::Enter,
            Some(value) => serde_json::from_value(value.clone())
                .map_err(|e| TriggerError::invalid_config(&workflow.id, e))?,
        };

        Ok(Self {
            id: fence_id(&workflow.id, latitude, longitude, radius),
            latitude,
            longitude,
            radius,
            event,
        })
    }

    fn distance_m(&self, fix: &LocationFix) -> f64 {
        haversine_m(self.latitude, self.longitude, fix.latitude, fix.longitude)
    }
}

/// `{workflow}_{lat*1e4}_{lon*1e4}_{radius}`, truncated to integers
pub fn fence_id(workflow_id: &str, latitude: f64, longitude: f64, radius: f64) -> String {
    format!(
        "{}_{}_{}_{}",
        workflow_id,
        (latitude * 10_000.0) as i64,
        (longitude * 10_000.0) as i64,
        radius as i64
    )
}

#[derive(Debug, Default)]
struct Tracking {
    /// Listening generation, `None` while stopped
    generation: Option<u64>,
    last_fix: Option<(LocationFix, Instant)>,
    tier: Option<LocationTier>,
    last_switch: Option<Instant>,
}

/// Geofence enter/exit detector
pub struct GeofenceSource {
    fences: DashMap<String, (Workflow, Fence)>,
    dispatcher: Dispatcher,
    settings: GeofenceSettings,
    provider: Arc<dyn LocationProvider>,
    state: Arc<dyn GeofenceStateStore>,
    tracking: Mutex<Tracking>,
}

impl GeofenceSource {
    pub fn new(services: &TriggerServices) -> Self {
        Self::with_settings(
            services.dispatcher.clone(),
            services.settings.geofence.clone(),
            services.location.clone(),
            services.geofence_state.clone(),
        )
    }

    pub fn with_settings(
        dispatcher: Dispatcher,
        settings: GeofenceSettings,
        provider: Arc<dyn LocationProvider>,
        state: Arc<dyn GeofenceStateStore>,
    ) -> Self {
        Self {
            fences: DashMap::new(),
            dispatcher,
            settings,
            provider,
            state,
            tracking: Mutex::new(Tracking::default()),
        }
    }

    /// Tier currently requested from the provider
    pub async fn current_tier(&self) -> Option<LocationTier> {
        self.tracking.lock().await.tier
    }

    fn desired_tier(&self, edge_distance: f64) -> LocationTier {
        if edge_distance > self.settings.passive_beyond_m {
            LocationTier::Passive
        } else if edge_distance > self.settings.coarse_beyond_m {
            LocationTier::Coarse
        } else {
            LocationTier::Precise
        }
    }

    /// Replace the provider request, falling back to cheaper tiers
    async fn request(&self, tracking: &mut Tracking, wanted: LocationTier) {
        if tracking.tier.is_some() {
            self.provider.remove_updates().await;
            tracking.tier = None;
        }

        let mut candidate = Some(wanted);
        while let Some(tier) = candidate {
            match self.provider.request_updates(tier).await {
                Ok(()) => {
                    info!(
                        tier = %tier,
                        interval_s = tier.interval().as_secs(),
                        min_distance_m = tier.min_distance_m(),
                        "Location tier active"
                    );
                    tracking.tier = Some(tier);
                    return;
                }
                Err(e) => {
                    warn!(tier = %tier, error = %e, "Location tier refused, falling back");
                    candidate = tier.fallback();
                }
            }
        }
        warn!("No location tier available");
    }

    async fn on_fix(&self, fix: LocationFix) {
        let now = Instant::now();
        let mut tracking = self.tracking.lock().await;
        let Some(generation) = tracking.generation else {
            trace!("Fix while not listening");
            return;
        };

        if let Some((last, at)) = &tracking.last_fix {
            let elapsed = now.saturating_duration_since(*at);
            let moved = haversine_m(last.latitude, last.longitude, fix.latitude, fix.longitude);
            if elapsed < self.settings.min_interval() || moved < self.settings.min_distance_m {
                trace!(elapsed_ms = elapsed.as_millis() as u64, moved, "Fix deduplicated");
                return;
            }
        }
        tracking.last_fix = Some((fix, now));

        let fences: Vec<(Workflow, Fence)> = self.fences.iter().map(|e| e.value().clone()).collect();
        if fences.is_empty() {
            return;
        }

        let edge_distance = fences
            .iter()
            .map(|(_, fence)| (fence.distance_m(&fix) - fence.radius).abs())
            .fold(f64::INFINITY, f64::min);
        let wanted = self.desired_tier(edge_distance);
        if tracking.tier != Some(wanted) {
            let settled = tracking
                .last_switch
                .is_some_and(|at| now.saturating_duration_since(at) < self.settings.tier_hysteresis());
            if settled {
                trace!(wanted = %wanted, "Tier switch held back");
            } else {
                debug!(edge_distance, from = ?tracking.tier, to = %wanted, "Switching location tier");
                self.request(&mut tracking, wanted).await;
                tracking.last_switch = Some(now);
            }
        }

        // Held through dispatch so a stop cannot interleave
        for (workflow, fence) in fences {
            let distance = fence.distance_m(&fix);
            let inside = distance <= fence.radius;
            if inside == self.state.is_inside(&fence.id) {
                continue;
            }

            // Persist first; a duplicate fix must see the new state
            if let Err(e) = self.state.set_inside(&fence.id, inside) {
                warn!(fence_id = %fence.id, error = %e, "Containment not persisted");
            }
            let crossing = if inside { FenceEvent::Enter } else { FenceEvent::Exit };
            debug!(
                fence_id = %fence.id,
                distance,
                radius = fence.radius,
                event = crossing.as_str(),
                generation,
                "Fence boundary crossed"
            );
            if crossing != fence.event {
                continue;
            }

            let mut payload = TriggerPayload::new(trigger_types::LOCATION)
                .with_id(fence.id.clone())
                .with_var("latitude", json!(fix.latitude))
                .with_var("longitude", json!(fix.longitude))
                .with_var("fence_id", json!(fence.id))
                .with_var("event", json!(crossing.as_str()));
            if let Some(accuracy) = fix.accuracy {
                payload = payload.with_var("accuracy", json!(accuracy));
            }
            self.dispatcher.dispatch(workflow, payload);
        }
    }
}

#[async_trait]
impl TriggerSource for GeofenceSource {
    fn trigger_type(&self) -> &'static str {
        trigger_types::LOCATION
    }

    fn event_kinds(&self) -> &'static [EventKind] {
        &[EventKind::Location]
    }

    async fn set_workflows(&self, workflows: Vec<Workflow>) {
        self.fences.clear();
        for workflow in workflows {
            match Fence::resolve(&workflow) {
                Ok(fence) => {
                    self.fences.insert(workflow.id.clone(), (workflow, fence));
                }
                Err(e) => warn!(error = %e, "Skipping geofence"),
            }
        }
    }

    async fn on_start(&self, generation: u64) {
        let mut tracking = self.tracking.lock().await;
        *tracking = Tracking {
            generation: Some(generation),
            ..Tracking::default()
        };
        self.request(&mut tracking, LocationTier::Passive).await;
    }

    async fn on_event(&self, event: SourceEvent) {
        if let SourceEvent::Location(fix) = event {
            self.on_fix(fix).await;
        }
    }

    async fn on_stop(&self) {
        let mut tracking = self.tracking.lock().await;
        if tracking.tier.is_some() {
            self.provider.remove_updates().await;
        }
        *tracking = Tracking::default();
    }
}
