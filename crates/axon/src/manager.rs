//! The process-wide manager.
//!
//! One manager per process anchors everything: it owns the registry, the
//! resolver, the loader, and the event bus, and it is itself a registered
//! component — the default provider of the event-bus and introspection
//! interfaces — so collaborators are acquired the same way whether they
//! live in the host or in a loaded library.

use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock, Weak};

use parking_lot::{Mutex, RwLock};

use crate::bus::{
    BusCore, Delivery, EventBus, EventBusExt, EventCallback, EventPayload, SenderKey, SenderRef,
    SubscriberKey, SubscriberRef,
};
use crate::component::{Component, ComponentClass, Interface};
use crate::error::{RegistryError, ResolveError};
use crate::events::ComponentRegistered;
use crate::handle::Handle;
use crate::id::{ClassId, EventId, InterfaceId};
use crate::registry::{
    ComponentDetails, FactoryFn, Introspect, Key, Registration, RegistryState,
};

/// Well-known identifiers. These are public ABI: renumbering any of them is
/// a major version bump.
pub mod ids {
    use crate::id::ClassId;

    /// The manager's own implementation class.
    pub const MANAGER_CLASS: ClassId = ClassId::from_uuid("axon-core-manager-impl-c4a51d0e");

    /// Service id under which the event bus resolves.
    pub const EVENT_BUS_SERVICE: ClassId =
        ClassId::from_uuid("axon-core-event-bus-service-93b7f1aa");

    /// Service id under which the introspection surface resolves.
    pub const INTROSPECT_SERVICE: ClassId =
        ClassId::from_uuid("axon-core-introspect-service-5e0d86c3");
}

pub const MANAGER_ALIAS: &str = "axon.core.manager";
pub const EVENT_BUS_ALIAS: &str = "axon.core.eventbus";
pub const INTROSPECT_ALIAS: &str = "axon.core.introspect";

static ACTIVE: OnceLock<RwLock<Weak<Manager>>> = OnceLock::new();

fn active_slot() -> &'static RwLock<Weak<Manager>> {
    ACTIVE.get_or_init(|| RwLock::new(Weak::new()))
}

pub(crate) fn set_active(manager: &Arc<Manager>) {
    *active_slot().write() = Arc::downgrade(manager);
}

pub struct Manager {
    pub(crate) registry: Mutex<RegistryState>,
    pub(crate) bus: Arc<BusCore>,
    /// Serializes library loads; registrations tag the one open transaction.
    pub(crate) loading: Mutex<()>,
    pub(crate) weak_self: Weak<Manager>,
}

crate::declare_component!(Manager {
    class: "axon-core-manager-impl-c4a51d0e",
    interfaces: [EventBus, Introspect],
});

impl Manager {
    /// Construct the manager, publish it as the process-wide instance,
    /// start the event worker, and register the core services.
    pub fn create() -> Arc<Self> {
        let manager = Arc::new_cyclic(|weak| Manager {
            registry: Mutex::new(RegistryState::default()),
            bus: BusCore::new(),
            loading: Mutex::new(()),
            weak_self: weak.clone(),
        });
        set_active(&manager);
        manager.bus.start();
        manager.bootstrap();
        tracing::debug!("manager created and bootstrapped");
        manager
    }

    /// The process-wide active manager, if one is alive.
    ///
    /// Inside a plugin dylib this reads the plugin's own copy of the slot,
    /// populated at init time by [`declare_plugin!`](crate::declare_plugin);
    /// libraries never receive a raw manager pointer.
    pub fn active() -> Option<Arc<Manager>> {
        active_slot().read().upgrade()
    }

    /// Register the manager's own entries: its implementation class (the
    /// default provider of the bus and introspection interfaces) plus one
    /// service id per core interface.
    pub(crate) fn bootstrap(&self) {
        let weak = self.weak_self.clone();
        let factory: FactoryFn = Arc::new(move || {
            weak.upgrade().map(|manager| {
                let component: Arc<dyn Component> = manager;
                component
            })
        });
        let interfaces = Manager::interface_table();

        let entries = [
            (ids::MANAGER_CLASS, MANAGER_ALIAS, true),
            (ids::EVENT_BUS_SERVICE, EVENT_BUS_ALIAS, false),
            (ids::INTROSPECT_SERVICE, INTROSPECT_ALIAS, false),
        ];
        for (class_id, alias, default) in entries {
            self.register(
                Registration::raw(
                    class_id,
                    factory.clone(),
                    true,
                    Some(alias.to_string()),
                    interfaces.clone(),
                )
                .default_provider(default),
            )
            .expect("core registrations cannot conflict in an empty registry");
        }
    }

    // ── registration ──

    /// Register a component class.
    ///
    /// Inside a library's init call the registration joins that library's
    /// transaction; a later failure of the same init rolls it back.
    pub fn register(&self, registration: Registration) -> Result<(), RegistryError> {
        let details = {
            let mut registry = self.registry.lock();
            registry.insert(registration)?
        };
        tracing::debug!(class = %details.class_id, alias = ?details.alias, "component registered");
        // Best-effort, after the lock is released.
        self.fire_global(ComponentRegistered {
            class_id: details.class_id,
            alias: details.alias,
            library: details.source,
            singleton: details.singleton,
        });
        Ok(())
    }

    // ── resolution ──

    fn resolve_key(registry: &RegistryState, key: &Key) -> Result<ClassId, ResolveError> {
        match key {
            Key::Class(class_id) => Ok(*class_id),
            Key::Alias(alias) => registry
                .resolve_alias(alias)
                .ok_or_else(|| ResolveError::AliasNotFound(alias.clone())),
        }
    }

    /// Resolve a singleton service, constructing it on first use.
    ///
    /// The instance lives as long as at least one external handle holds it;
    /// after that a subsequent call reconstructs it. Factories must not call
    /// back into the resolver — the registry lock is held across the call.
    pub fn get_service<T>(&self, key: impl Into<Key>) -> Result<Handle<T>, ResolveError>
    where
        T: Interface + ?Sized,
    {
        let key = key.into();
        let mut registry = self.registry.lock();
        let class_id = Self::resolve_key(&registry, &key)?;
        let (guard, factory) = {
            let entry = registry
                .components
                .get(&class_id)
                .ok_or(ResolveError::ClassNotFound(class_id))?;
            if !entry.singleton {
                return Err(ResolveError::NotAService(class_id));
            }
            (entry.guard.clone(), entry.factory.clone())
        };

        let cached = registry
            .singletons
            .get(&class_id)
            .and_then(Weak::upgrade);
        let instance = match cached {
            Some(existing) => existing,
            None => {
                let fresh = factory().ok_or(ResolveError::FactoryFailed(class_id))?;
                registry.singletons.insert(class_id, Arc::downgrade(&fresh));
                fresh
            }
        };
        drop(registry);

        Handle::attach(instance, guard)
    }

    /// Construct a fresh transient instance; its lifetime is entirely the
    /// caller's.
    pub fn create_instance<T>(&self, key: impl Into<Key>) -> Result<Handle<T>, ResolveError>
    where
        T: Interface + ?Sized,
    {
        let key = key.into();
        let (class_id, guard, factory) = {
            let registry = self.registry.lock();
            let class_id = Self::resolve_key(&registry, &key)?;
            let entry = registry
                .components
                .get(&class_id)
                .ok_or(ResolveError::ClassNotFound(class_id))?;
            if entry.singleton {
                return Err(ResolveError::NotAComponent(class_id));
            }
            (class_id, entry.guard.clone(), entry.factory.clone())
        };

        // The factory runs without the registry lock held.
        let instance = factory().ok_or(ResolveError::FactoryFailed(class_id))?;
        Handle::attach(instance, guard)
    }

    /// Resolve the default provider of `T`, as a service or a fresh
    /// instance depending on how that provider is registered.
    pub fn get_default<T>(&self) -> Result<Handle<T>, ResolveError>
    where
        T: Interface + ?Sized,
    {
        let (class_id, singleton) = {
            let registry = self.registry.lock();
            let class_id = *registry
                .defaults
                .get(&T::IID)
                .ok_or(ResolveError::ClassNotFound(ClassId::NONE))?;
            let entry = registry
                .components
                .get(&class_id)
                .ok_or(ResolveError::ClassNotFound(class_id))?;
            (class_id, entry.singleton)
        };
        if singleton {
            self.get_service(class_id)
        } else {
            self.create_instance(class_id)
        }
    }

    // ── teardown ──

    /// Tear the registry down, release every library in reverse load order,
    /// then re-register the core services so the event bus and the query
    /// surface stay resolvable.
    ///
    /// Instances the host still holds keep their libraries mapped through
    /// their guards; the registry itself forgets everything.
    pub fn unload_all(&self) {
        // The worker drains outstanding queued deliveries before exiting,
        // so plugin callbacks never run against an unmapped library.
        self.bus.stop();

        let libraries = {
            let mut registry = self.registry.lock();
            self.bus.clear_all();
            registry.clear()
        };
        for (path, guard) in libraries.into_iter().rev() {
            tracing::debug!(path = %path.display(), "releasing library");
            drop(guard);
        }

        self.bus.start();
        self.bootstrap();
    }
}

impl Drop for Manager {
    fn drop(&mut self) {
        self.bus.stop();
        let libraries = {
            let mut registry = self.registry.lock();
            self.bus.clear_all();
            registry.clear()
        };
        for (path, guard) in libraries.into_iter().rev() {
            tracing::debug!(path = %path.display(), "releasing library at shutdown");
            drop(guard);
        }
    }
}

// =============================================================================
// Interface implementations
// =============================================================================

impl EventBus for Manager {
    fn subscribe_global_dyn(
        &self,
        event: EventId,
        subscriber: SubscriberRef,
        callback: EventCallback,
        mode: Delivery,
    ) {
        self.bus.subscribe_global(event, subscriber, callback, mode);
    }

    fn subscribe_to_sender_dyn(
        &self,
        sender: SenderRef,
        event: EventId,
        subscriber: SubscriberRef,
        callback: EventCallback,
        mode: Delivery,
    ) {
        self.bus
            .subscribe_to_sender(sender, event, subscriber, callback, mode);
    }

    fn fire_global_dyn(&self, event: EventId, payload: EventPayload) {
        self.bus.fire_global(event, payload);
    }

    fn fire_to_sender_dyn(&self, sender: SenderKey, event: EventId, payload: EventPayload) {
        self.bus.fire_to_sender(sender, event, payload);
    }

    fn has_global_subscribers(&self, event: EventId) -> bool {
        self.bus.has_global(event)
    }

    fn has_sender_subscribers(&self, sender: SenderKey, event: EventId) -> bool {
        self.bus.has_sender(sender, event)
    }

    fn unsubscribe_key(&self, subscriber: SubscriberKey) {
        self.bus.unsubscribe(subscriber);
    }
}

impl Introspect for Manager {
    fn components(&self) -> Vec<ComponentDetails> {
        let registry = self.registry.lock();
        registry
            .components
            .iter()
            .map(|(class_id, entry)| entry.details(*class_id))
            .collect()
    }

    fn component(&self, class_id: ClassId) -> Option<ComponentDetails> {
        let registry = self.registry.lock();
        registry
            .components
            .get(&class_id)
            .map(|entry| entry.details(class_id))
    }

    fn component_by_alias(&self, alias: &str) -> Option<ComponentDetails> {
        let registry = self.registry.lock();
        let class_id = registry.resolve_alias(alias)?;
        registry
            .components
            .get(&class_id)
            .map(|entry| entry.details(class_id))
    }

    fn implementors(&self, iid: InterfaceId) -> Vec<ComponentDetails> {
        let registry = self.registry.lock();
        registry
            .components
            .iter()
            .filter(|(_, entry)| entry.interfaces.iter().any(|d| d.iid == iid))
            .map(|(class_id, entry)| entry.details(*class_id))
            .collect()
    }

    fn loaded_libraries(&self) -> Vec<PathBuf> {
        let registry = self.registry.lock();
        registry.libraries.iter().map(|(path, _)| path.clone()).collect()
    }

    fn components_from(&self, library: &Path) -> Vec<ComponentDetails> {
        let registry = self.registry.lock();
        registry
            .components
            .iter()
            .filter(|(_, entry)| entry.source.as_deref() == Some(library))
            .map(|(class_id, entry)| entry.details(*class_id))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn well_known_class_id_matches_the_declared_component() {
        assert_eq!(Manager::CLASS_ID, ids::MANAGER_CLASS);
    }

    #[test]
    fn bootstrap_registers_the_core_services() {
        let manager = Manager::create();

        let bus = manager
            .get_service::<dyn EventBus>(ids::EVENT_BUS_SERVICE)
            .unwrap();
        assert!(!bus.has_global_subscribers(EventId::from_uuid("nothing")));

        let query = manager
            .get_service::<dyn Introspect>(EVENT_BUS_ALIAS)
            .unwrap();
        assert!(query.component(ids::MANAGER_CLASS).is_some());
        assert_eq!(query.components().len(), 3);
    }

    #[test]
    fn the_manager_is_the_default_for_its_interfaces() {
        let manager = Manager::create();
        let bus = manager.get_default::<dyn EventBus>().unwrap();
        let query = bus.cast::<dyn Introspect>().unwrap();
        let details = query.component(ids::MANAGER_CLASS).unwrap();
        assert!(details.default_provider);
        assert!(details.singleton);
    }

    #[test]
    fn active_returns_a_live_instance() {
        // Other tests may re-publish the ambient slot concurrently; all
        // this can assert is that creation makes some manager reachable.
        let _manager = Manager::create();
        assert!(Manager::active().is_some());
    }

    #[test]
    fn core_service_handles_share_the_manager() {
        let manager = Manager::create();
        let before = Arc::strong_count(&manager);
        let bus = manager
            .get_service::<dyn EventBus>(EVENT_BUS_ALIAS)
            .unwrap();
        assert_eq!(Arc::strong_count(&manager), before + 1);
        drop(bus);
        assert_eq!(Arc::strong_count(&manager), before);
    }
}
