//! JSON-lines bridge from the platform layer
//!
//! Each input line is either a [`SourceEvent`] (tagged by `"event"`) or a
//! screen snapshot `{"screen": <node tree>}`. A snapshot replaces the screen
//! the rule triggers look at and counts as a content change in its package.

use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, trace, warn};
use vf_core::{SourceEvent, WindowEvent};
use vf_event_bus::SharedEventBus;
use vf_selector::{UiNodeSpec, UiTree};
use vf_triggers::{ForegroundSlot, ScreenSlot};

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Line {
    Screen {
        screen: UiNodeSpec,
        #[serde(default)]
        activity: Option<String>,
    },
    Event(SourceEvent),
}

/// Feeds parsed lines to the bus and the platform slots
pub struct Bridge {
    bus: SharedEventBus,
    screen: Arc<ScreenSlot>,
    foreground: Arc<ForegroundSlot>,
}

impl Bridge {
    pub fn new(bus: SharedEventBus, screen: Arc<ScreenSlot>, foreground: Arc<ForegroundSlot>) -> Self {
        Self { bus, screen, foreground }
    }

    /// Handle one input line; returns whether it was understood
    pub fn handle_line(&self, line: &str) -> bool {
        let line = line.trim();
        if line.is_empty() {
            return true;
        }

        match serde_json::from_str::<Line>(line) {
            Ok(Line::Screen { screen, activity }) => {
                let tree = UiTree::build(screen);
                let package = tree.package().unwrap_or_default().to_string();
                debug!(package = %package, nodes = tree.len(), "Screen snapshot");
                self.screen.replace(tree);
                self.fire(SourceEvent::ContentChanged(WindowEvent {
                    package,
                    activity: activity.unwrap_or_default(),
                }));
                true
            }
            Ok(Line::Event(event)) => {
                if let SourceEvent::WindowChanged(window) = &event {
                    self.foreground.set(window.clone());
                }
                self.fire(event);
                true
            }
            Err(e) => {
                warn!(error = %e, "Ignoring unreadable input line");
                false
            }
        }
    }

    fn fire(&self, event: SourceEvent) {
        let kind = event.kind();
        let receivers = self.bus.fire(event);
        trace!(%kind, receivers, "Event fired");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vf_core::EventKind;
    use vf_event_bus::EventBus;
    use vf_triggers::{ForegroundProvider, ScreenProvider};

    fn bridge() -> (Bridge, Arc<EventBus>, Arc<ScreenSlot>, Arc<ForegroundSlot>) {
        let bus = Arc::new(EventBus::new());
        let screen = Arc::new(ScreenSlot::new());
        let foreground = Arc::new(ForegroundSlot::new());
        (
            Bridge::new(bus.clone(), screen.clone(), foreground.clone()),
            bus,
            screen,
            foreground,
        )
    }

    #[test]
    fn test_event_line_is_fired() {
        let (bridge, bus, _screen, _foreground) = bridge();
        let mut rx = bus.subscribe(EventKind::Sms);

        assert!(bridge.handle_line(r#"{"event": "sms", "sender": "10086", "content": "hi"}"#));
        let event = rx.try_recv().unwrap();
        assert_eq!(event.kind(), EventKind::Sms);
    }

    #[test]
    fn test_window_line_updates_foreground() {
        let (bridge, _bus, _screen, foreground) = bridge();
        assert!(bridge.handle_line(
            r#"{"event": "window_changed", "package": "com.maps", "activity": "com.maps.Main"}"#
        ));
        assert_eq!(foreground.current_foreground().unwrap().package, "com.maps");
    }

    #[test]
    fn test_screen_line_replaces_screen() {
        let (bridge, bus, screen, _foreground) = bridge();
        let mut rx = bus.subscribe(EventKind::ContentChanged);

        let line = r#"{"screen": {"className": "android.widget.FrameLayout", "packageName": "com.video",
            "children": [{"className": "android.widget.Button", "text": "Skip"}]}}"#;
        assert!(bridge.handle_line(&line.replace('\n', " ")));

        assert_eq!(screen.current_screen().unwrap().len(), 2);
        match rx.try_recv().unwrap() {
            SourceEvent::ContentChanged(window) => assert_eq!(window.package, "com.video"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_garbage_is_rejected() {
        let (bridge, _bus, _screen, _foreground) = bridge();
        assert!(!bridge.handle_line("not json"));
        assert!(!bridge.handle_line(r#"{"event": "teleport"}"#));
        assert!(bridge.handle_line("   "));
    }
}
