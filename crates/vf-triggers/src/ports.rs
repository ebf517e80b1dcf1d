//! Platform seams the detectors query
//!
//! Raw events arrive on the bus, but some detectors also need to ask the
//! platform something: the current UI tree, the app really in the
//! foreground, or a change of location update rate.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use vf_core::WindowEvent;
use vf_selector::UiTree;

use crate::error::TriggerResult;

/// Snapshot of the active window's node tree
pub trait ScreenProvider: Send + Sync {
    fn current_screen(&self) -> Option<Arc<UiTree>>;
}

/// Ask the platform which window is in the foreground right now
pub trait ForegroundProvider: Send + Sync {
    fn current_foreground(&self) -> Option<WindowEvent>;
}

/// Location update cost tier, cheapest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocationTier {
    /// Only fixes other apps already requested
    Passive,
    /// Network positioning
    Coarse,
    /// Satellite positioning
    Precise,
}

impl LocationTier {
    /// Requested update interval
    pub fn interval(&self) -> Duration {
        match self {
            LocationTier::Passive => Duration::ZERO,
            LocationTier::Coarse => Duration::from_secs(5 * 60),
            LocationTier::Precise => Duration::from_secs(60),
        }
    }

    /// Requested minimum displacement between updates in meters
    pub fn min_distance_m(&self) -> f64 {
        match self {
            LocationTier::Passive => 0.0,
            LocationTier::Coarse => 200.0,
            LocationTier::Precise => 50.0,
        }
    }

    /// Next cheaper tier to try when this one is refused
    pub fn fallback(&self) -> Option<LocationTier> {
        match self {
            LocationTier::Precise => Some(LocationTier::Coarse),
            LocationTier::Coarse => Some(LocationTier::Passive),
            LocationTier::Passive => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LocationTier::Passive => "passive",
            LocationTier::Coarse => "coarse",
            LocationTier::Precise => "precise",
        }
    }
}

impl std::fmt::Display for LocationTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Controls the rate of location fixes
///
/// Fixes themselves are delivered as events on the bus.
#[async_trait]
pub trait LocationProvider: Send + Sync {
    async fn request_updates(&self, tier: LocationTier) -> TriggerResult<()>;

    /// Returns once no more updates will be delivered for the previous request
    async fn remove_updates(&self);
}

/// Holds the most recent screen pushed by the OS bridge
#[derive(Default)]
pub struct ScreenSlot {
    tree: RwLock<Option<Arc<UiTree>>>,
}

impl ScreenSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn replace(&self, tree: UiTree) {
        *self.tree.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(tree));
    }

    pub fn clear(&self) {
        *self.tree.write().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

impl ScreenProvider for ScreenSlot {
    fn current_screen(&self) -> Option<Arc<UiTree>> {
        self.tree.read().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

/// Holds the last foreground window reported by the OS bridge
#[derive(Default)]
pub struct ForegroundSlot {
    window: RwLock<Option<WindowEvent>>,
}

impl ForegroundSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, window: WindowEvent) {
        *self.window.write().unwrap_or_else(PoisonError::into_inner) = Some(window);
    }
}

impl ForegroundProvider for ForegroundSlot {
    fn current_foreground(&self) -> Option<WindowEvent> {
        self.window.read().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

/// Location provider for hosts that push fixes without rate control
pub struct PassiveLocation;

#[async_trait]
impl LocationProvider for PassiveLocation {
    async fn request_updates(&self, _tier: LocationTier) -> TriggerResult<()> {
        Ok(())
    }

    async fn remove_updates(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use vf_selector::UiNodeSpec;

    #[test]
    fn test_fallback_chain_ends_at_passive() {
        let mut tier = LocationTier::Precise;
        let mut chain = vec![tier];
        while let Some(next) = tier.fallback() {
            chain.push(next);
            tier = next;
        }
        assert_eq!(
            chain,
            vec![LocationTier::Precise, LocationTier::Coarse, LocationTier::Passive]
        );
    }

    #[test]
    fn test_screen_slot_replace() {
        let slot = ScreenSlot::new();
        assert!(slot.current_screen().is_none());
        slot.replace(UiTree::build(UiNodeSpec::new("FrameLayout").with_package("com.a")));
        assert_eq!(
            slot.current_screen().unwrap().package(),
            Some("com.a")
        );
        slot.clear();
        assert!(slot.current_screen().is_none());
    }
}
