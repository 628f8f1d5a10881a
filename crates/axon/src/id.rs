//! Stable 64-bit identifiers for classes, interfaces, and events.
//!
//! An identifier is the FNV-1a-64 hash of a UUID-style string literal,
//! computed in const position at the point of declaration. The numeric value
//! *is* the identity: lookups compare `u64`s, never strings, and the same
//! literal produces the same id in every library. The hash constants are part
//! of the ABI — changing them silently severs identity across separately
//! built libraries.

use std::fmt;

const FNV_OFFSET_BASIS: u64 = 0xcbf29ce484222325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// FNV-1a-64 over the bytes of `s`. The empty string hashes to 0, the
/// reserved "none" value.
///
/// Intended for const position only; identifiers are never derived from
/// runtime strings.
pub const fn hash_id(s: &str) -> u64 {
    let bytes = s.as_bytes();
    if bytes.is_empty() {
        return 0;
    }
    let mut hash = FNV_OFFSET_BASIS;
    let mut i = 0;
    while i < bytes.len() {
        hash ^= bytes[i] as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
        i += 1;
    }
    hash
}

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(u64);

        impl $name {
            /// The reserved "none" value.
            pub const NONE: Self = Self(0);

            /// Derive an id from a UUID-style string literal.
            pub const fn from_uuid(uuid: &str) -> Self {
                Self(hash_id(uuid))
            }

            pub const fn from_raw(raw: u64) -> Self {
                Self(raw)
            }

            pub const fn raw(self) -> u64 {
                self.0
            }

            pub const fn is_none(self) -> bool {
                self.0 == 0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({:#018x})"), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{:#018x}", self.0)
            }
        }
    };
}

id_type! {
    /// Identity of a concrete implementation class.
    ClassId
}

id_type! {
    /// Identity of an interface contract.
    ///
    /// Same value space and algorithm as [`ClassId`], distinct role.
    InterfaceId
}

id_type! {
    /// Identity of an event type.
    EventId
}

/// Version of an interface contract.
///
/// Breaking ABI changes bump `major`; additive, backward-compatible changes
/// bump `minor`.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct InterfaceVersion {
    pub major: u32,
    pub minor: u32,
}

impl InterfaceVersion {
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }
}

impl fmt::Display for InterfaceVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}
