//! Unified error type for the leaf framework core.
//!
//! A single `Error` enum that every subsystem converts into, so that the
//! lifecycle controller, settings bridge and command surface all handle
//! failures the same way.  All variants are `Copy` so they can be passed
//! through leaf callbacks and logged without allocation.
//!
//! The command surface reports failures as negative errno-style codes;
//! [`Error::errno`] provides that mapping.

use core::fmt;

use crate::ports::StorageError;

// ---------------------------------------------------------------------------
// Top-level framework error
// ---------------------------------------------------------------------------

/// Every fallible operation in the core funnels into this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// A name lookup missed (variable, setting, leaf or command).
    NotFound,
    /// A kind-directed accessor was used against a value of another kind.
    TypeMismatch,
    /// The caller's output buffer cannot hold the value.
    BufferTooSmall,
    /// A string buffer could not be (re)allocated.
    AllocationFailure,
    /// A leaf was started before its init succeeded.
    NotReady,
    /// A second change subscriber was attached to a variable.
    AlreadyExists,
    /// The hardware behind a leaf is absent or not responding.
    DeviceUnavailable,
    /// Raw bytes had the wrong length for the value kind.
    InvalidLength { expected: usize, actual: usize },
    /// Text or bytes could not be decoded into the value kind.
    InvalidValue,
    /// A registry lock could not be acquired within its deadline.
    LockTimeout,
    /// The persistent storage collaborator failed.
    Storage(StorageError),
    /// A bus transaction inside a leaf failed.
    Io,
}

impl Error {
    /// Negative errno-style code used by the command surface.
    pub const fn errno(self) -> i32 {
        match self {
            Self::NotFound => -2,                                   // ENOENT
            Self::NotReady => -3,                                   // ESRCH
            Self::Io | Self::Storage(_) => -5,                      // EIO
            Self::BufferTooSmall => -7,                             // E2BIG
            Self::LockTimeout => -11,                               // EWOULDBLOCK
            Self::AllocationFailure => -12,                         // ENOMEM
            Self::AlreadyExists => -17,                             // EEXIST
            Self::DeviceUnavailable => -19,                         // ENODEV
            Self::TypeMismatch | Self::InvalidLength { .. } | Self::InvalidValue => -22, // EINVAL
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "not found"),
            Self::TypeMismatch => write!(f, "type mismatch"),
            Self::BufferTooSmall => write!(f, "buffer too small"),
            Self::AllocationFailure => write!(f, "allocation failed"),
            Self::NotReady => write!(f, "not ready"),
            Self::AlreadyExists => write!(f, "already exists"),
            Self::DeviceUnavailable => write!(f, "device unavailable"),
            Self::InvalidLength { expected, actual } => {
                write!(f, "invalid length {actual} (expected {expected})")
            }
            Self::InvalidValue => write!(f, "invalid value"),
            Self::LockTimeout => write!(f, "lock timeout"),
            Self::Storage(e) => write!(f, "storage: {e}"),
            Self::Io => write!(f, "bus I/O failed"),
        }
    }
}

impl std::error::Error for Error {}

impl From<StorageError> for Error {
    fn from(e: StorageError) -> Self {
        Self::Storage(e)
    }
}

impl From<std::collections::TryReserveError> for Error {
    fn from(_: std::collections::TryReserveError) -> Self {
        Self::AllocationFailure
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Framework-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
