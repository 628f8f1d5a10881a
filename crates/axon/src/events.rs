//! Event typing and the framework's own events.

use std::any::Any;
use std::path::PathBuf;

use crate::id::{ClassId, EventId};

/// Compile-time identity of an event type.
///
/// Attached by [`declare_event!`](crate::declare_event); the bus routes on
/// `EVENT_ID`, never on the Rust type.
pub trait EventType: Any + Send + Sync {
    const EVENT_ID: EventId;
    const NAME: &'static str;
}

/// Declare a struct as an event type.
///
/// ```ignore
/// pub struct SaveRequested { pub path: PathBuf }
/// axon::declare_event!(SaveRequested, "my-project-event-save-requested");
/// ```
#[macro_export]
macro_rules! declare_event {
    ($ty:ty, $uuid:literal) => {
        impl $crate::EventType for $ty {
            const EVENT_ID: $crate::EventId = $crate::EventId::from_uuid($uuid);
            const NAME: &'static str = stringify!($ty);
        }
    };
}

/// A library's init function ran to completion and its registrations are
/// committed.
#[derive(Debug, Clone)]
pub struct PluginLoaded {
    pub path: PathBuf,
}
crate::declare_event!(PluginLoaded, "axon-event-plugin-loaded-e0000001");

/// A library could not be mapped, exposed no entry point, or its init
/// failed; everything it registered has been rolled back.
#[derive(Debug, Clone)]
pub struct PluginLoadFailed {
    pub path: PathBuf,
    pub error: String,
}
crate::declare_event!(PluginLoadFailed, "axon-event-plugin-load-failed-e0000002");

/// A component class was registered.
#[derive(Debug, Clone)]
pub struct ComponentRegistered {
    pub class_id: ClassId,
    pub alias: Option<String>,
    /// Library that registered it; `None` for host-born entries.
    pub library: Option<PathBuf>,
    pub singleton: bool,
}
crate::declare_event!(ComponentRegistered, "axon-event-component-registered-e0000003");

/// A queued event callback panicked on the worker thread.
///
/// Fired synchronously from the worker; subscribe in direct mode only
/// (queued subscriptions to this event are coerced to direct).
#[derive(Debug, Clone)]
pub struct AsyncPanic {
    pub message: String,
}
crate::declare_event!(AsyncPanic, "axon-event-async-panic-e0000004");
