//! Reference-counted, boundary-coherent typed handles.
//!
//! A [`Handle<T>`] pairs one owning reference (the shared control block of
//! the concrete object) with the interface view the caller asked for, plus
//! a guard on the library the object came from. Casting between interfaces
//! *aliases* the owner — every view of the same object shares one reference
//! count, so releasing the last handle destroys the implementation exactly
//! once, in the library that allocated it. There is no way to manufacture a
//! second count from a raw pointer through this API.

use std::sync::Arc;

use crate::component::{Component, Interface};
use crate::error::ResolveError;
use crate::library::LibraryGuard;

/// A typed, reference-counted view of a component.
pub struct Handle<T: ?Sized> {
    owner: Arc<dyn Component>,
    iface: *const T,
    guard: LibraryGuard,
}

// The interface pointer targets the allocation kept alive by `owner`;
// sharing or sending a handle shares `&T`.
unsafe impl<T: ?Sized + Sync> Send for Handle<T> {}
unsafe impl<T: ?Sized + Sync> Sync for Handle<T> {}

impl<T: Interface + ?Sized> Handle<T> {
    /// Run the versioned query against `owner` and bind the resulting view.
    pub(crate) fn attach(
        owner: Arc<dyn Component>,
        guard: LibraryGuard,
    ) -> Result<Self, ResolveError> {
        let raw = owner.query_raw(T::IID, T::VERSION)?;
        // Safety: iid equality pins the pointee type, and `owner` outlives
        // the pointer for as long as this handle exists.
        let iface = unsafe { raw.get::<T>() };
        Ok(Self { owner, iface, guard })
    }
}

impl<T: ?Sized> Handle<T> {
    /// Version-checked conversion to another interface of the same object.
    ///
    /// The result aliases this handle: same reference count, same library
    /// guard, different view.
    pub fn cast<U: Interface + ?Sized>(&self) -> Result<Handle<U>, ResolveError> {
        Handle::attach(self.owner.clone(), self.guard.clone())
    }

    /// Strong count of the underlying object, across all interface views.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.owner)
    }

    /// Guard on the library that produced this object.
    pub fn library(&self) -> &LibraryGuard {
        &self.guard
    }
}

impl<T: ?Sized> Clone for Handle<T> {
    fn clone(&self) -> Self {
        Self {
            owner: self.owner.clone(),
            iface: self.iface,
            guard: self.guard.clone(),
        }
    }
}

impl<T: ?Sized> std::ops::Deref for Handle<T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.iface }
    }
}

impl<T: ?Sized> std::fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Handle<{}>(refs: {})",
            std::any::type_name::<T>(),
            self.ref_count()
        )
    }
}
