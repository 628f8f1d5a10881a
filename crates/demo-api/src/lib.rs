//! Interface contracts shared by the demo host and the demo plugins.
//!
//! Only traits and identities live here — implementations stay in the
//! plugins, the host resolves them through the manager.

use axon::Component;

/// A minimal demo component.
pub trait Simple: Component {
    fn simple_string(&self) -> String;
}
axon::declare_interface!(Simple, "axon-demo-simple-iid-a4736128", 1, 0);

/// A demo logging service.
pub trait Logger: Component {
    fn log(&self, message: &str);
}
axon::declare_interface!(Logger, "axon-demo-logger-iid-b1b542f8", 1, 0);
