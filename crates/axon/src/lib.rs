//! axon — a cross-library component framework.
//!
//! Dynamic libraries register factories for typed components with a
//! process-wide [`Manager`]; the host and peer libraries resolve them back
//! as reference-counted [`Handle`]s. Language-level dynamic dispatch (RTTI,
//! exceptions, allocator identity) is not dependable between separately
//! linked images, so the cross-boundary protocol is reduced to a single
//! dispatched operation — a versioned interface query — plus reference
//! counting that stays coherent when a handle changes interface.
//!
//! # Same-compiler invariant
//!
//! The host and every plugin are built by the same `rustc` with the same
//! flags (the workspace builds them together). `repr(Rust)` layouts and
//! generic monomorphizations are then identical across all loaded images
//! and the global allocator is shared, so owned concrete data — `String`,
//! `Vec`, `Arc` — crosses the boundary freely. Code pointers do not:
//! anything that can outlive its origin (factories in the registry, event
//! callbacks, interface vtables inside handles) travels with a
//! [`LibraryGuard`] so the originating library is never unmapped while
//! referenced.
//!
//! # Map
//!
//! - [`ClassId`] / [`InterfaceId`] / [`EventId`]: compile-time FNV-1a-64
//!   identity.
//! - [`Component`] + [`declare_component!`]: the one-virtual-call query
//!   contract.
//! - [`Handle`]: typed views that alias one reference count per object.
//! - [`Manager`]: registry, resolver, loader, and event bus in one anchor;
//!   [`Manager::active`] is how a freshly loaded library finds it.
//! - [`EventBus`] / [`EventBusExt`]: typed pub/sub, direct or queued, with
//!   weak-subscriber lifetime tracking.
//! - [`declare_plugin!`]: the exported entry point a library needs.

mod bus;
mod component;
mod error;
mod events;
mod handle;
mod id;
mod library;
mod loader;
mod manager;
#[doc(hidden)]
pub mod plugin;
mod registry;

pub use bus::{
    Delivery, EventBus, EventBusExt, EventCallback, EventPayload, SenderKey, SenderRef,
    SubscriberKey, SubscriberRef,
};
pub use component::{
    check_version, Component, ComponentClass, Interface, InterfaceDescriptor, RawInterface,
};
pub use error::{RegistryError, ResolveError};
pub use events::{AsyncPanic, ComponentRegistered, EventType, PluginLoadFailed, PluginLoaded};
pub use handle::Handle;
pub use id::{hash_id, ClassId, EventId, InterfaceId, InterfaceVersion};
pub use library::LibraryGuard;
pub use loader::INIT_SYMBOL;
pub use manager::{ids, Manager, EVENT_BUS_ALIAS, INTROSPECT_ALIAS, MANAGER_ALIAS};
pub use plugin::{plugin_guard, InitContext, Registrar};
pub use registry::{ComponentDetails, FactoryFn, Introspect, Key, Registration};
