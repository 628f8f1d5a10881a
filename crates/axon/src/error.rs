//! Error types for registration and resolution.
//!
//! Resolution failures form a closed set: every resolver entry point either
//! returns a live typed handle or exactly one of these categories.
//! Registration conflicts are separate — they surface inside a library's
//! init function and abort that library's load.

use thiserror::Error;

use crate::id::{ClassId, InterfaceId, InterfaceVersion};

/// Why a component could not be resolved or cast.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("alias `{0}` is not registered")]
    AliasNotFound(String),

    #[error("class {0} is not registered")]
    ClassNotFound(ClassId),

    #[error("class {0} is a transient component; use create_instance")]
    NotAService(ClassId),

    #[error("class {0} is a singleton service; use get_service")]
    NotAComponent(ClassId),

    #[error("factory for class {0} produced no instance")]
    FactoryFailed(ClassId),

    #[error("interface {0} is not implemented by this component")]
    InterfaceNotImplemented(InterfaceId),

    #[error("interface {iid}: implementation has major version {have}, caller requires {want}")]
    VersionMajorMismatch {
        iid: InterfaceId,
        have: u32,
        want: u32,
    },

    #[error("interface {iid}: implementation is v{have}, caller requires at least v{want}")]
    VersionMinorTooLow {
        iid: InterfaceId,
        have: InterfaceVersion,
        want: InterfaceVersion,
    },

    #[error("internal error: {0}")]
    Internal(String),
}

/// Why a registration was rejected.
///
/// Propagating one of these out of a plugin's init function makes the loader
/// roll back everything that plugin registered.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("class {0} is already registered")]
    DuplicateClass(ClassId),

    #[error("interface {iid} already has a default provider ({existing})")]
    DuplicateDefault {
        iid: InterfaceId,
        existing: ClassId,
    },
}
