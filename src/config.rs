//! Framework configuration parameters.
//!
//! Tunables for lock deadlines, naming and the settings namespace.  The
//! defaults match the values the firmware ships with; a board can override
//! them before building its [`Registry`](crate::registry::Registry).

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::ports::{StorageError, StoragePort};

/// Maximum length of a variable or setting name, in bytes.
pub const NAME_MAX: usize = 32;

/// Maximum number of dynamically registered leaf commands.
pub const LEAF_COMMANDS_MAX: usize = 20;

/// Storage namespace of the persisted [`CoreConfig`] blob.
pub const CONFIG_NAMESPACE: &str = "leafcore";
const CONFIG_KEY: &str = "corecfg";
const CONFIG_BLOB_MAX: usize = 128;

/// Core framework configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoreConfig {
    // --- Locking ---
    /// Bounded wait for the class/leaf registry lock (milliseconds)
    pub registry_lock_ms: u32,
    /// Bounded wait for the variable and settings list locks (milliseconds)
    pub value_lock_ms: u32,

    // --- Naming ---
    /// Prefix of the advertised device name (`<base>-<short id>`)
    pub name_base: heapless::String<12>,
    /// Storage namespace owned by the settings bridge
    pub settings_namespace: heapless::String<15>,

    // --- Wire bridge ---
    /// Longest string accepted from a wire write, in bytes
    pub string_write_max: u16,

    // --- Work queue ---
    /// Stack size of the work queue thread (KiB)
    pub worker_stack_kb: u16,
    /// Priority of the work queue thread
    pub worker_priority: u8,
}

impl CoreConfig {
    /// Registry lock deadline as a `Duration`.
    pub fn registry_lock_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(u64::from(self.registry_lock_ms))
    }

    /// Value list lock deadline as a `Duration`.
    pub fn value_lock_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(u64::from(self.value_lock_ms))
    }

    /// Read the persisted configuration, falling back to defaults when it is
    /// missing, corrupt or out of range.
    pub fn load(store: &dyn StoragePort) -> Self {
        let mut buf = [0u8; CONFIG_BLOB_MAX];
        let len = match store.read(CONFIG_NAMESPACE, CONFIG_KEY, &mut buf) {
            Ok(len) => len,
            Err(StorageError::NotFound) => {
                info!("no stored core config, using defaults");
                return Self::default();
            }
            Err(e) => {
                warn!("core config read failed ({}), using defaults", e);
                return Self::default();
            }
        };
        match postcard::from_bytes::<Self>(&buf[..len]) {
            Ok(cfg) => match cfg.validate() {
                Ok(()) => {
                    info!("core config loaded ({} bytes)", len);
                    cfg
                }
                Err(why) => {
                    warn!("stored core config rejected: {}", why);
                    Self::default()
                }
            },
            Err(_) => {
                warn!("stored core config is corrupted, using defaults");
                Self::default()
            }
        }
    }

    /// Validate and persist as a postcard blob.
    pub fn save(&self, store: &mut dyn StoragePort) -> Result<()> {
        self.validate().map_err(|why| {
            warn!("core config not saved: {}", why);
            Error::InvalidValue
        })?;
        let bytes = postcard::to_allocvec(self).map_err(|_| Error::InvalidValue)?;
        store.write(CONFIG_NAMESPACE, CONFIG_KEY, &bytes)?;
        Ok(())
    }

    /// Range-check every field.
    pub fn validate(&self) -> core::result::Result<(), &'static str> {
        if !(10..=5000).contains(&self.registry_lock_ms) {
            return Err("registry_lock_ms must be 10–5000");
        }
        if !(10..=5000).contains(&self.value_lock_ms) {
            return Err("value_lock_ms must be 10–5000");
        }
        if self.settings_namespace.is_empty() || self.settings_namespace.contains('/') {
            return Err("settings_namespace must be a single non-empty path segment");
        }
        if self.string_write_max == 0 {
            return Err("string_write_max must be non-zero");
        }
        if self.worker_stack_kb < 2 {
            return Err("worker_stack_kb must be at least 2");
        }
        Ok(())
    }
}

impl Default for CoreConfig {
    fn default() -> Self {
        let mut name_base = heapless::String::new();
        let _ = name_base.push_str("leaf");
        let mut settings_namespace = heapless::String::new();
        let _ = settings_namespace.push_str("app");
        Self {
            // Locking
            registry_lock_ms: 100,
            value_lock_ms: 500,

            // Naming
            name_base,
            settings_namespace,

            // Wire bridge
            string_write_max: 100,

            // Work queue
            worker_stack_kb: 8,
            worker_priority: 5,
        }
    }
}
