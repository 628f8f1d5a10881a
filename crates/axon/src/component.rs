//! The base component contract: manual, versioned interface queries.
//!
//! `dynamic_cast`-style RTTI is not reliable between separately linked
//! images, so every component exposes exactly one dispatchable operation
//! across the boundary — [`Component::query_raw`] — and everything else is
//! derived from it. A query names an interface by id and the version the
//! caller was compiled against; the implementation either hands back a
//! type-erased pointer to its own interface view or a precise refusal.

use std::any::Any;
use std::mem::{size_of, MaybeUninit};
use std::ptr;

use crate::error::ResolveError;
use crate::id::{ClassId, InterfaceId, InterfaceVersion};

/// Compile-time identity of an interface contract.
///
/// Implemented for `dyn Trait` interface types by [`declare_interface!`];
/// the consts travel with the caller, so a cast always requests the version
/// the caller was built against.
///
/// [`declare_interface!`]: crate::declare_interface
pub trait Interface: 'static {
    const IID: InterfaceId;
    const NAME: &'static str;
    const VERSION: InterfaceVersion;
}

/// One interface a component exposes, as registry data.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InterfaceDescriptor {
    pub iid: InterfaceId,
    pub name: &'static str,
    pub version: InterfaceVersion,
}

impl InterfaceDescriptor {
    pub fn of<T: Interface + ?Sized>() -> Self {
        Self {
            iid: T::IID,
            name: T::NAME,
            version: T::VERSION,
        }
    }
}

/// Gate an interface request against the implementation's version.
///
/// `want.major` must match exactly; `want.minor` may be at most `have.minor`
/// (the caller must not require a feature level the implementation predates).
pub fn check_version(
    iid: InterfaceId,
    have: InterfaceVersion,
    want: InterfaceVersion,
) -> Result<(), ResolveError> {
    if have.major != want.major {
        return Err(ResolveError::VersionMajorMismatch {
            iid,
            have: have.major,
            want: want.major,
        });
    }
    if want.minor > have.minor {
        return Err(ResolveError::VersionMinorTooLow { iid, have, want });
    }
    Ok(())
}

/// The unified base of every interface and implementation.
///
/// Implementations never write `query_raw` by hand — [`declare_component!`]
/// generates it from the implemented-interface list.
///
/// [`declare_component!`]: crate::declare_component
pub trait Component: Any + Send + Sync {
    /// Look up an interface view of this object.
    ///
    /// The returned pointer is only valid while the caller holds an owning
    /// reference to the same underlying object; [`Handle`](crate::Handle)
    /// enforces that pairing.
    fn query_raw(
        &self,
        iid: InterfaceId,
        requested: InterfaceVersion,
    ) -> Result<RawInterface, ResolveError>;
}

impl Interface for dyn Component {
    const IID: InterfaceId = InterfaceId::from_uuid("axon-core-component-iid-9c41e6d0");
    const NAME: &'static str = "Component";
    const VERSION: InterfaceVersion = InterfaceVersion::new(1, 0);
}

/// Compile-time metadata of an implementation class.
///
/// Generated by [`declare_component!`](crate::declare_component) alongside
/// the [`Component`] impl.
pub trait ComponentClass: Component + Sized {
    const CLASS_ID: ClassId;

    /// Every interface this class exposes, root component interface first.
    fn interface_table() -> Vec<InterfaceDescriptor>;
}

/// A type-erased interface pointer — the result of a successful query.
///
/// Interface pointers are fat (`*const dyn Trait`), so the carrier holds up
/// to two words of pointer bytes. Writer and reader must agree on the
/// pointee type; agreement is what iid equality guarantees, the same way a
/// matching iid justifies the `static_cast` on a COM-style `void*`.
pub struct RawInterface {
    words: [usize; 2],
    len: usize,
}

impl std::fmt::Debug for RawInterface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawInterface").field("len", &self.len).finish_non_exhaustive()
    }
}

impl RawInterface {
    pub fn new<T: ?Sized>(iface: &T) -> Self {
        let ptr: *const T = iface;
        let len = size_of::<*const T>();
        assert!(len <= size_of::<[usize; 2]>());
        let mut words = [0usize; 2];
        // Byte copy keeps pointer provenance intact.
        unsafe {
            ptr::copy_nonoverlapping(
                &ptr as *const *const T as *const u8,
                words.as_mut_ptr() as *mut u8,
                len,
            );
        }
        Self { words, len }
    }

    /// Reconstruct the stored pointer.
    ///
    /// # Safety
    ///
    /// `T` must be exactly the type the pointer was stored with, and the
    /// owning object must still be alive when the pointer is dereferenced.
    pub unsafe fn get<T: ?Sized>(&self) -> *const T {
        debug_assert_eq!(self.len, size_of::<*const T>());
        let mut out = MaybeUninit::<*const T>::uninit();
        ptr::copy_nonoverlapping(
            self.words.as_ptr() as *const u8,
            out.as_mut_ptr() as *mut u8,
            size_of::<*const T>(),
        );
        out.assume_init()
    }
}

/// Declare a trait as a component interface.
///
/// Attaches the interface id (hashed from the UUID literal), a readable
/// name, and the contract version to the `dyn Trait` type:
///
/// ```ignore
/// pub trait Simple: axon::Component {
///     fn simple_string(&self) -> String;
/// }
/// axon::declare_interface!(Simple, "my-project-simple-iid-a4736128", 1, 0);
/// ```
#[macro_export]
macro_rules! declare_interface {
    ($trait_:ident, $uuid:literal, $major:literal, $minor:literal) => {
        impl $crate::Interface for dyn $trait_ {
            const IID: $crate::InterfaceId = $crate::InterfaceId::from_uuid($uuid);
            const NAME: &'static str = stringify!($trait_);
            const VERSION: $crate::InterfaceVersion =
                $crate::InterfaceVersion::new($major, $minor);
        }
    };
}

/// Declare an implementation class.
///
/// Generates the [`ComponentClass`] metadata and the [`Component`] impl
/// whose `query_raw` walks the interface list. The root component interface
/// is always included and need not be listed.
///
/// ```ignore
/// #[derive(Default)]
/// struct SimpleImplA;
/// impl Simple for SimpleImplA { /* … */ }
///
/// axon::declare_component!(SimpleImplA {
///     class: "my-project-simple-impl-a-94071767",
///     interfaces: [Simple],
/// });
/// ```
#[macro_export]
macro_rules! declare_component {
    ($ty:ty { class: $uuid:literal, interfaces: [$($iface:path),* $(,)?] $(,)? }) => {
        impl $crate::ComponentClass for $ty {
            const CLASS_ID: $crate::ClassId = $crate::ClassId::from_uuid($uuid);

            fn interface_table() -> ::std::vec::Vec<$crate::InterfaceDescriptor> {
                ::std::vec![
                    $crate::InterfaceDescriptor::of::<dyn $crate::Component>(),
                    $($crate::InterfaceDescriptor::of::<dyn $iface>(),)*
                ]
            }
        }

        impl $crate::Component for $ty {
            fn query_raw(
                &self,
                iid: $crate::InterfaceId,
                requested: $crate::InterfaceVersion,
            ) -> ::std::result::Result<$crate::RawInterface, $crate::ResolveError> {
                if iid == <dyn $crate::Component as $crate::Interface>::IID {
                    $crate::check_version(
                        iid,
                        <dyn $crate::Component as $crate::Interface>::VERSION,
                        requested,
                    )?;
                    let view: &dyn $crate::Component = self;
                    return ::std::result::Result::Ok($crate::RawInterface::new(view));
                }
                $(
                    if iid == <dyn $iface as $crate::Interface>::IID {
                        $crate::check_version(
                            iid,
                            <dyn $iface as $crate::Interface>::VERSION,
                            requested,
                        )?;
                        let view: &dyn $iface = self;
                        return ::std::result::Result::Ok($crate::RawInterface::new(view));
                    }
                )*
                ::std::result::Result::Err($crate::ResolveError::InterfaceNotImplemented(iid))
            }
        }
    };
}
