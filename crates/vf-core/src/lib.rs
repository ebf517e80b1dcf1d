//! Core types for vFlow
//!
//! This crate provides the fundamental types shared by every part of the
//! trigger engine: Workflow, TriggerPayload, Context, the raw SourceEvent
//! stream handed in by the OS layer, the workflow store and executor seams,
//! and keyed cancellable timers.

mod context;
mod event;
mod executor;
mod payload;
mod store;
mod timer;
mod workflow;

pub use context::Context;
pub use event::{
    CallState, EventKind, KeyPress, LocationFix, NotificationPosted, SliderMoved, SmsReceived,
    SourceEvent, WindowEvent,
};
pub use executor::{ExecutionError, ExecutionResult, SharedExecutor, WorkflowExecutor};
pub use payload::TriggerPayload;
pub use store::{MemoryWorkflowStore, SharedWorkflowStore, WorkflowChange, WorkflowStore};
pub use timer::TimerSet;
pub use workflow::{TriggerConfig, Workflow};

/// Trigger type identifiers understood by the engine
pub mod trigger_types {
    /// Hardware key presses and the alert slider
    pub const KEY_EVENT: &str = "vflow.trigger.key_event";

    /// Knocks on the back of the device detected from the accelerometer
    pub const BACK_TAP: &str = "vflow.trigger.back_tap";

    /// Foreground application opened or closed
    pub const APP_START: &str = "vflow.trigger.app_start";

    /// Geofence enter/exit
    pub const LOCATION: &str = "vflow.trigger.location";

    /// Posted notifications
    pub const NOTIFICATION: &str = "vflow.trigger.notification";

    /// Incoming SMS
    pub const SMS: &str = "vflow.trigger.sms";

    /// Phone call state changes
    pub const CALL: &str = "vflow.trigger.call";

    /// A single local selector matched on screen
    pub const ELEMENT: &str = "vflow.trigger.element";

    /// Rules from a remote or local rule subscription
    pub const GKD: &str = "vflow.trigger.gkd";
}
