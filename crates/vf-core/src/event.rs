//! Raw source events handed to the engine by the OS layer
//!
//! The engine never talks to sensors or system services itself. Whatever
//! bridges the platform converts callbacks into [`SourceEvent`]s and fires
//! them on the event bus; detectors subscribe to the [`EventKind`]s they need
//! while at least one workflow is interested.

use serde::{Deserialize, Serialize};

/// A raw event from one of the platform signal sources
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SourceEvent {
    /// A hardware key was released after being held for `hold_ms`
    Key(KeyPress),

    /// The alert slider moved to a new ringer mode
    Slider(SliderMoved),

    /// One accelerometer sample in m/s²
    Accelerometer { x: f64, y: f64, z: f64 },

    /// The foreground window changed
    WindowChanged(WindowEvent),

    /// Content inside the foreground window changed
    ContentChanged(WindowEvent),

    /// A location fix
    Location(LocationFix),

    /// A notification was posted
    Notification(NotificationPosted),

    /// An SMS arrived
    Sms(SmsReceived),

    /// Telephony call state changed
    CallState { state: CallState },
}

impl SourceEvent {
    /// The subscription kind this event is delivered under
    pub fn kind(&self) -> EventKind {
        match self {
            SourceEvent::Key(_) => EventKind::Key,
            SourceEvent::Slider(_) => EventKind::Slider,
            SourceEvent::Accelerometer { .. } => EventKind::Accelerometer,
            SourceEvent::WindowChanged(_) => EventKind::WindowChanged,
            SourceEvent::ContentChanged(_) => EventKind::ContentChanged,
            SourceEvent::Location(_) => EventKind::Location,
            SourceEvent::Notification(_) => EventKind::Notification,
            SourceEvent::Sms(_) => EventKind::Sms,
            SourceEvent::CallState { .. } => EventKind::CallState,
        }
    }
}

/// Discriminant of [`SourceEvent`], used as the event bus subscription key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Key,
    Slider,
    Accelerometer,
    WindowChanged,
    ContentChanged,
    Location,
    Notification,
    Sms,
    CallState,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EventKind::Key => "key",
            EventKind::Slider => "slider",
            EventKind::Accelerometer => "accelerometer",
            EventKind::WindowChanged => "window_changed",
            EventKind::ContentChanged => "content_changed",
            EventKind::Location => "location",
            EventKind::Notification => "notification",
            EventKind::Sms => "sms",
            EventKind::CallState => "call_state",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyPress {
    /// Input device path, e.g. `/dev/input/event0`
    pub device: String,
    /// Key code label as reported by the input layer, e.g. `KEY_VOLUMEDOWN`
    pub key_code: String,
    /// How long the key was held down
    #[serde(default)]
    pub hold_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SliderMoved {
    pub device: String,
    /// Ringer mode after the move: 0 silent, 1 vibrate, 2 normal
    pub ringer_mode: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowEvent {
    pub package: String,
    #[serde(default)]
    pub activity: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocationFix {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationPosted {
    pub package: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
    /// Platform notification key
    #[serde(default)]
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmsReceived {
    pub sender: String,
    pub content: String,
}

/// Telephony call state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallState {
    Ringing,
    Offhook,
    Idle,
}

impl CallState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallState::Ringing => "ringing",
            CallState::Offhook => "offhook",
            CallState::Idle => "idle",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_deserialize_tagged_events() {
        let event: SourceEvent = serde_json::from_value(json!({
            "event": "key",
            "device": "/dev/input/event0",
            "key_code": "KEY_VOLUMEUP",
            "hold_ms": 120
        }))
        .unwrap();
        assert_eq!(event.kind(), EventKind::Key);

        let event: SourceEvent = serde_json::from_value(json!({
            "event": "window_changed",
            "package": "com.example.app"
        }))
        .unwrap();
        match event {
            SourceEvent::WindowChanged(w) => {
                assert_eq!(w.package, "com.example.app");
                assert!(w.activity.is_empty());
            }
            other => panic!("unexpected event {other:?}"),
        }

        let event: SourceEvent =
            serde_json::from_value(json!({"event": "call_state", "state": "offhook"})).unwrap();
        assert_eq!(
            event,
            SourceEvent::CallState {
                state: CallState::Offhook
            }
        );
    }
}
