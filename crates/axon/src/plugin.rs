//! Plugin-side SDK: the init context, the registrar, and the entry-point
//! macro.
//!
//! This crate is linked into every plugin as an rlib, so each dylib carries
//! its own copy of this module's statics. The host hands the ambient
//! manager and the plugin's own library guard across the boundary in an
//! [`InitContext`]; [`declare_plugin!`](crate::declare_plugin) caches both
//! in the plugin's statics before user registrations run, which is how
//! `Manager::active()` works from inside a freshly loaded library.

use std::any::Any;
use std::sync::{Arc, OnceLock};

use crate::component::ComponentClass;
use crate::error::RegistryError;
use crate::library::LibraryGuard;
use crate::manager::Manager;
use crate::registry::Registration;

/// Everything the host passes to a library's entry point.
///
/// Layout-compatible across host and plugins under the workspace's
/// same-compiler invariant; the pointer handed to the entry function must
/// not be retained after init returns.
pub struct InitContext {
    manager: Arc<Manager>,
    guard: LibraryGuard,
    error: Option<String>,
}

impl InitContext {
    pub(crate) fn new(manager: Arc<Manager>, guard: LibraryGuard) -> Self {
        Self {
            manager,
            guard,
            error: None,
        }
    }

    /// Cache the ambient manager and this library's guard in the plugin's
    /// own statics.
    #[doc(hidden)]
    pub fn adopt(&self) {
        crate::manager::set_active(&self.manager);
        let _ = PLUGIN_GUARD.set(self.guard.clone());
    }

    #[doc(hidden)]
    pub fn registrar(&self) -> Registrar<'_> {
        Registrar {
            manager: &self.manager,
        }
    }

    /// Report why init failed; the loader attaches it to the load-failure
    /// event.
    #[doc(hidden)]
    pub fn fail(&mut self, message: String) {
        self.error = Some(message);
    }

    pub(crate) fn take_error(&mut self) -> Option<String> {
        self.error.take()
    }
}

/// Per-plugin guard storage; each dylib has its own copy of this static.
static PLUGIN_GUARD: OnceLock<LibraryGuard> = OnceLock::new();

/// The guard on this plugin's own library, if running inside one.
pub fn plugin_guard() -> Option<LibraryGuard> {
    PLUGIN_GUARD.get().cloned()
}

/// Registration façade handed to a library's init function.
pub struct Registrar<'a> {
    pub(crate) manager: &'a Manager,
}

impl Registrar<'_> {
    /// Register a transient component under `alias`, optionally as the
    /// default provider of its interfaces.
    pub fn component<C: ComponentClass + Default>(
        &self,
        alias: &str,
        default: bool,
    ) -> Result<(), RegistryError> {
        self.manager
            .register(Registration::component_with(alias, C::default).default_provider(default))
    }

    /// [`component`](Self::component) with an explicit factory.
    pub fn component_with<C, F>(
        &self,
        alias: &str,
        default: bool,
        factory: F,
    ) -> Result<(), RegistryError>
    where
        C: ComponentClass,
        F: Fn() -> C + Send + Sync + 'static,
    {
        self.manager
            .register(Registration::component_with(alias, factory).default_provider(default))
    }

    /// Register a singleton service under `alias`, optionally as the
    /// default provider of its interfaces.
    pub fn service<C: ComponentClass + Default>(
        &self,
        alias: &str,
        default: bool,
    ) -> Result<(), RegistryError> {
        self.manager
            .register(Registration::service_with(alias, C::default).default_provider(default))
    }

    /// [`service`](Self::service) with an explicit factory.
    pub fn service_with<C, F>(
        &self,
        alias: &str,
        default: bool,
        factory: F,
    ) -> Result<(), RegistryError>
    where
        C: ComponentClass,
        F: Fn() -> C + Send + Sync + 'static,
    {
        self.manager
            .register(Registration::service_with(alias, factory).default_provider(default))
    }

    /// Full-control registration.
    pub fn register(&self, registration: Registration) -> Result<(), RegistryError> {
        self.manager.register(registration)
    }

    pub fn manager(&self) -> &Manager {
        self.manager
    }
}

/// Extract a printable message from a panic payload.
#[doc(hidden)]
pub fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&'static str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "opaque panic payload".to_string()
    }
}

/// Define a plugin's entry point.
///
/// Expands to the exported `axon_plugin_init` symbol the loader resolves:
/// it adopts the ambient manager, runs the body under `catch_unwind`, and
/// reports failures back through the context so the loader can roll the
/// library back.
///
/// ```ignore
/// axon::declare_plugin! {
///     fn register(reg: &axon::Registrar) -> Result<(), axon::RegistryError> {
///         reg.component::<SimpleImplA>("Simple.A", true)?;
///         reg.service::<LoggerService>("Logger.Default", true)?;
///         Ok(())
///     }
/// }
/// ```
#[macro_export]
macro_rules! declare_plugin {
    (fn register($reg:ident : $regty:ty) -> $ret:ty $body:block) => {
        #[no_mangle]
        pub unsafe extern "C" fn axon_plugin_init(
            ctx: *mut $crate::plugin::InitContext,
        ) -> i32 {
            fn __axon_register($reg: $regty) -> $ret $body

            let ctx = &mut *ctx;
            ctx.adopt();
            let outcome = ::std::panic::catch_unwind(::std::panic::AssertUnwindSafe(|| {
                __axon_register(&ctx.registrar())
            }));
            match outcome {
                ::std::result::Result::Ok(::std::result::Result::Ok(())) => 0,
                ::std::result::Result::Ok(::std::result::Result::Err(error)) => {
                    ctx.fail(error.to_string());
                    1
                }
                ::std::result::Result::Err(panic) => {
                    ctx.fail($crate::plugin::panic_message(panic));
                    1
                }
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_messages_survive_extraction() {
        let payload: Box<dyn Any + Send> = Box::new("static message");
        assert_eq!(panic_message(payload), "static message");

        let payload: Box<dyn Any + Send> = Box::new(format!("built {}", 42));
        assert_eq!(panic_message(payload), "built 42");

        let payload: Box<dyn Any + Send> = Box::new(17u8);
        assert_eq!(panic_message(payload), "opaque panic payload");
    }
}
