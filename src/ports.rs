//! Port traits: the boundary between the framework core and the outside world.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ Registry / SettingsBridge (domain)
//! ```
//!
//! The flash-backed key/value subsystem is the only driven adapter the core
//! needs.  [`NvsAdapter`](crate::adapters::nvs::NvsAdapter) implements it on
//! ESP-IDF (and as an in-memory map on the host); integration tests bring
//! their own mock.
//!
//! ## Storage contract
//!
//! - Keys are namespaced; the settings bridge owns the `app` namespace.
//! - Write operations MUST be atomic, with no partial writes on power loss.
//!   The ESP-IDF NVS API guarantees this natively; in-memory simulation
//!   achieves it trivially.
//! - [`StoragePort::entries`] streams every key of one namespace so that the
//!   settings bridge can load values it does not know in advance.

// ───────────────────────────────────────────────────────────────
// Storage port (driven adapter: domain ↔ NVS / flash)
// ───────────────────────────────────────────────────────────────

/// One persisted key and its raw value bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEntry {
    pub key: String,
    pub value: Vec<u8>,
}

/// Persistent key-value storage for settings.
pub trait StoragePort {
    /// Read a value.  Returns the number of bytes written to `buf`.
    fn read(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError>;

    /// Write a value atomically.
    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError>;

    /// Delete a key.  Returns `Ok(())` even if the key didn't exist.
    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), StorageError>;

    /// Check whether a key exists without reading it.
    fn exists(&self, namespace: &str, key: &str) -> bool;

    /// Every key stored under `namespace`, in storage order.
    fn entries(&self, namespace: &str) -> Result<Vec<StoredEntry>, StorageError>;
}

// ───────────────────────────────────────────────────────────────
// Error types
// ───────────────────────────────────────────────────────────────

/// Errors from [`StoragePort`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageError {
    /// Requested key does not exist.
    NotFound,
    /// Storage partition is full.
    Full,
    /// Generic I/O error.
    IoError,
    /// Key or namespace is longer than the backend allows.
    KeyTooLong,
}

impl core::fmt::Display for StorageError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotFound => write!(f, "key not found"),
            Self::Full => write!(f, "storage full"),
            Self::IoError => write!(f, "I/O error"),
            Self::KeyTooLong => write!(f, "key too long"),
        }
    }
}
