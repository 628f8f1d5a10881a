//! Component registry: descriptors, aliases, defaults, provenance.
//!
//! The registry owns no live instances — it maps class ids to factories and
//! metadata, remembers which library contributed each entry, and tracks the
//! in-flight load transaction so a failing library can be rolled back as if
//! it had never been scanned.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use crate::component::{Component, ComponentClass, Interface, InterfaceDescriptor};
use crate::error::RegistryError;
use crate::id::{ClassId, InterfaceId};
use crate::library::LibraryGuard;

/// Factory for component instances.
///
/// `None` means the factory could not produce an instance (for example a
/// weak self-reference that no longer upgrades); the resolver reports it as
/// `FactoryFailed`.
pub type FactoryFn = Arc<dyn Fn() -> Option<Arc<dyn Component>> + Send + Sync>;

/// A lookup key: either a class id or a human-readable alias.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Key {
    Class(ClassId),
    Alias(String),
}

impl From<ClassId> for Key {
    fn from(id: ClassId) -> Self {
        Key::Class(id)
    }
}

impl From<&str> for Key {
    fn from(alias: &str) -> Self {
        Key::Alias(alias.to_string())
    }
}

impl From<String> for Key {
    fn from(alias: String) -> Self {
        Key::Alias(alias)
    }
}

/// Everything needed to register one component class.
pub struct Registration {
    pub class_id: ClassId,
    pub factory: FactoryFn,
    pub singleton: bool,
    pub alias: Option<String>,
    pub interfaces: Vec<InterfaceDescriptor>,
    pub default_provider: bool,
}

impl Registration {
    fn from_factory<C, F>(singleton: bool, alias: &str, factory: F) -> Self
    where
        C: ComponentClass,
        F: Fn() -> C + Send + Sync + 'static,
    {
        Self {
            class_id: C::CLASS_ID,
            factory: Arc::new(move || {
                let instance: Arc<dyn Component> = Arc::new(factory());
                Some(instance)
            }),
            singleton,
            alias: if alias.is_empty() {
                None
            } else {
                Some(alias.to_string())
            },
            interfaces: C::interface_table(),
            default_provider: false,
        }
    }

    /// A transient component: every resolution constructs a fresh instance.
    pub fn component_with<C, F>(alias: &str, factory: F) -> Self
    where
        C: ComponentClass,
        F: Fn() -> C + Send + Sync + 'static,
    {
        Self::from_factory(false, alias, factory)
    }

    /// A singleton service: resolutions share one cached instance.
    pub fn service_with<C, F>(alias: &str, factory: F) -> Self
    where
        C: ComponentClass,
        F: Fn() -> C + Send + Sync + 'static,
    {
        Self::from_factory(true, alias, factory)
    }

    /// Lowest-level constructor, used for the manager's own entries.
    pub fn raw(
        class_id: ClassId,
        factory: FactoryFn,
        singleton: bool,
        alias: Option<String>,
        interfaces: Vec<InterfaceDescriptor>,
    ) -> Self {
        Self {
            class_id,
            factory,
            singleton,
            alias,
            interfaces,
            default_provider: false,
        }
    }

    /// Mark this class as the default provider of every non-root interface
    /// it implements.
    pub fn default_provider(mut self, default: bool) -> Self {
        self.default_provider = default;
        self
    }
}

/// Public snapshot of one registry entry.
#[derive(Clone, Debug)]
pub struct ComponentDetails {
    pub class_id: ClassId,
    pub alias: Option<String>,
    pub singleton: bool,
    /// Library the entry came from; `None` for host-born entries.
    pub source: Option<PathBuf>,
    pub interfaces: Vec<InterfaceDescriptor>,
    pub default_provider: bool,
}

/// Registry introspection, resolvable as a component interface.
pub trait Introspect: Component {
    fn components(&self) -> Vec<ComponentDetails>;
    fn component(&self, class_id: ClassId) -> Option<ComponentDetails>;
    fn component_by_alias(&self, alias: &str) -> Option<ComponentDetails>;
    /// Every registered class exposing the given interface.
    fn implementors(&self, iid: InterfaceId) -> Vec<ComponentDetails>;
    fn loaded_libraries(&self) -> Vec<PathBuf>;
    fn components_from(&self, library: &Path) -> Vec<ComponentDetails>;
}

crate::declare_interface!(Introspect, "axon-core-introspect-iid-41c7a9b2", 1, 0);

pub(crate) struct ComponentEntry {
    pub factory: FactoryFn,
    pub singleton: bool,
    pub alias: Option<String>,
    pub source: Option<PathBuf>,
    pub guard: LibraryGuard,
    pub interfaces: Vec<InterfaceDescriptor>,
    pub default_provider: bool,
}

impl ComponentEntry {
    pub fn details(&self, class_id: ClassId) -> ComponentDetails {
        ComponentDetails {
            class_id,
            alias: self.alias.clone(),
            singleton: self.singleton,
            source: self.source.clone(),
            interfaces: self.interfaces.clone(),
            default_provider: self.default_provider,
        }
    }
}

/// The open load transaction: which library is registering, and what it has
/// registered so far.
pub(crate) struct LoadTransaction {
    pub path: PathBuf,
    pub guard: LibraryGuard,
    pub added: Vec<ClassId>,
}

#[derive(Default)]
pub(crate) struct RegistryState {
    pub components: HashMap<ClassId, ComponentEntry>,
    pub singletons: HashMap<ClassId, Weak<dyn Component>>,
    pub aliases: HashMap<String, ClassId>,
    pub defaults: HashMap<InterfaceId, ClassId>,
    /// Libraries in load order; unload releases them in reverse.
    pub libraries: Vec<(PathBuf, LibraryGuard)>,
    pub load: Option<LoadTransaction>,
}

impl RegistryState {
    /// Insert a registration, atomically: on any conflict nothing changes.
    pub fn insert(&mut self, reg: Registration) -> Result<ComponentDetails, RegistryError> {
        if self.components.contains_key(&reg.class_id) {
            return Err(RegistryError::DuplicateClass(reg.class_id));
        }

        let root_iid = <dyn Component as Interface>::IID;
        if reg.default_provider {
            for descriptor in reg.interfaces.iter().filter(|d| d.iid != root_iid) {
                if let Some(&existing) = self.defaults.get(&descriptor.iid) {
                    if existing != reg.class_id {
                        return Err(RegistryError::DuplicateDefault {
                            iid: descriptor.iid,
                            existing,
                        });
                    }
                }
            }
        }

        let (source, guard) = match &mut self.load {
            Some(tx) => {
                tx.added.push(reg.class_id);
                (Some(tx.path.clone()), tx.guard.clone())
            }
            None => (None, LibraryGuard::host()),
        };

        if let Some(alias) = &reg.alias {
            if let Some(previous) = self.aliases.insert(alias.clone(), reg.class_id) {
                tracing::warn!(%alias, %previous, now = %reg.class_id, "alias re-bound");
            }
        }

        if reg.default_provider {
            for descriptor in reg.interfaces.iter().filter(|d| d.iid != root_iid) {
                self.defaults.insert(descriptor.iid, reg.class_id);
            }
        }

        let entry = ComponentEntry {
            factory: reg.factory,
            singleton: reg.singleton,
            alias: reg.alias,
            source,
            guard,
            interfaces: reg.interfaces,
            default_provider: reg.default_provider,
        };
        let details = entry.details(reg.class_id);
        self.components.insert(reg.class_id, entry);
        Ok(details)
    }

    /// Erase every trace of the given classes — aliases and defaults that
    /// still point at them, cached singletons, and the descriptors.
    pub fn rollback(&mut self, added: &[ClassId]) {
        for class_id in added {
            self.aliases.retain(|_, target| target != class_id);
            self.defaults.retain(|_, target| target != class_id);
            self.singletons.remove(class_id);
            self.components.remove(class_id);
        }
    }

    pub fn resolve_alias(&self, alias: &str) -> Option<ClassId> {
        self.aliases.get(alias).copied()
    }

    /// Wipe all registry state, handing back the library guards so the
    /// caller can release them in reverse load order outside the lock.
    pub fn clear(&mut self) -> Vec<(PathBuf, LibraryGuard)> {
        self.components.clear();
        self.singletons.clear();
        self.aliases.clear();
        self.defaults.clear();
        self.load = None;
        std::mem::take(&mut self.libraries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Component;

    trait Probe: Component {}
    crate::declare_interface!(Probe, "axon-test-registry-probe-iid", 1, 0);

    #[derive(Default)]
    struct One;
    impl Probe for One {}
    crate::declare_component!(One {
        class: "axon-test-registry-one",
        interfaces: [Probe],
    });

    #[derive(Default)]
    struct Two;
    impl Probe for Two {}
    crate::declare_component!(Two {
        class: "axon-test-registry-two",
        interfaces: [Probe],
    });

    #[test]
    fn duplicate_class_is_rejected() {
        let mut state = RegistryState::default();
        state
            .insert(Registration::component_with("one", One::default))
            .unwrap();
        let err = state
            .insert(Registration::component_with("other", One::default))
            .unwrap_err();
        assert_eq!(err, RegistryError::DuplicateClass(One::CLASS_ID));
        // The original alias survives.
        assert_eq!(state.resolve_alias("one"), Some(One::CLASS_ID));
        assert_eq!(state.resolve_alias("other"), None);
    }

    #[test]
    fn second_default_for_an_interface_is_rejected_atomically() {
        let mut state = RegistryState::default();
        state
            .insert(Registration::component_with("one", One::default).default_provider(true))
            .unwrap();
        let err = state
            .insert(Registration::component_with("two", Two::default).default_provider(true))
            .unwrap_err();
        assert_eq!(
            err,
            RegistryError::DuplicateDefault {
                iid: <dyn Probe as Interface>::IID,
                existing: One::CLASS_ID,
            }
        );
        // The loser left nothing behind.
        assert_eq!(
            state.defaults.get(&<dyn Probe as Interface>::IID),
            Some(&One::CLASS_ID)
        );
        assert!(!state.components.contains_key(&Two::CLASS_ID));
        assert_eq!(state.resolve_alias("two"), None);
    }

    #[test]
    fn the_root_interface_never_gets_a_default() {
        let mut state = RegistryState::default();
        state
            .insert(Registration::component_with("one", One::default).default_provider(true))
            .unwrap();
        assert!(!state
            .defaults
            .contains_key(&<dyn Component as Interface>::IID));
    }

    #[test]
    fn registrations_inside_a_transaction_are_tracked_and_rolled_back() {
        let mut state = RegistryState::default();
        state.load = Some(LoadTransaction {
            path: PathBuf::from("/tmp/libdemo.so"),
            guard: LibraryGuard::host(),
            added: Vec::new(),
        });
        state
            .insert(Registration::component_with("one", One::default).default_provider(true))
            .unwrap();
        state
            .insert(Registration::service_with("two", Two::default))
            .unwrap();

        let tx = state.load.take().unwrap();
        assert_eq!(tx.added, vec![One::CLASS_ID, Two::CLASS_ID]);
        assert_eq!(
            state.components[&One::CLASS_ID].source.as_deref(),
            Some(Path::new("/tmp/libdemo.so"))
        );

        state.rollback(&tx.added);
        assert!(state.components.is_empty());
        assert!(state.aliases.is_empty());
        assert!(state.defaults.is_empty());
        assert!(state.singletons.is_empty());
    }
}
