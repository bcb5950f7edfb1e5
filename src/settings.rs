//! Persistent settings bridge.
//!
//! Settings are variables kept in their own registry list and mirrored to
//! the key/value store under one namespace (`app` by default):
//!
//! ```text
//!   StoragePort ──entries("app")──▶ handle_set(name, bytes) ──▶ Setting
//!   Setting ──export(cb)──▶ (name, bytes) ──▶ StoragePort::write("app", name)
//! ```
//!
//! Stored bytes are the raw encoding of the value: little-endian scalars,
//! string bytes without a terminator.  Event-kind settings are never
//! persisted.
//!
//! Loading goes through [`Variable::set_raw`], so change subscribers attached
//! during leaf init see loaded values.

use std::sync::Arc;

use log::{error, info, warn};

use crate::error::{Error, Result};
use crate::ports::{StoragePort, StoredEntry};
use crate::registry::Registry;
use crate::value::{Value, ValueKind};
use crate::variable::{Variable, VariableRef};

// ───────────────────────────────────────────────────────────────
// Registry entry points
// ───────────────────────────────────────────────────────────────

impl Registry {
    /// Append settings to the settings list.
    pub fn register_settings(&self, items: &[VariableRef]) {
        info!("register {} settings", items.len());
        self.settings().register(items);
    }

    /// Create and register a setting at runtime.
    pub fn add_setting(&self, name: &str, initial: Value) -> Result<VariableRef> {
        let setting = Arc::new(Variable::new(name, initial).inspect_err(|e| {
            error!("add_setting {}: {}", name, e);
        })?);
        self.settings().register(std::slice::from_ref(&setting));
        Ok(setting)
    }

    /// Look up a setting.  Runtime variables are not searched.
    pub fn find_setting(&self, name: &str) -> Option<VariableRef> {
        self.settings().find(name)
    }

    /// Log every setting's description.
    pub fn settings_show(&self) {
        self.settings().show();
    }
}

// ───────────────────────────────────────────────────────────────
// Bridge
// ───────────────────────────────────────────────────────────────

/// Counters from one [`SettingsBridge::load`] pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LoadReport {
    pub loaded: usize,
    pub skipped: usize,
}

/// Maps the registry's settings list onto a [`StoragePort`] namespace.
#[derive(Debug, Clone, Copy)]
pub struct SettingsBridge<'a> {
    registry: &'a Registry,
}

impl<'a> SettingsBridge<'a> {
    pub fn new(registry: &'a Registry) -> Self {
        Self { registry }
    }

    pub fn namespace(&self) -> &str {
        &self.registry.config().settings_namespace
    }

    /// Display form of a setting's storage key, `<namespace>/<name>`.
    pub fn storage_key(&self, name: &str) -> String {
        format!("{}/{}", self.namespace(), name)
    }

    /// Apply one stored value.  `key` is relative to the namespace.
    ///
    /// Keys below a sub-path (`a/b`) belong to nobody here and are accepted
    /// without effect.  Unknown keys are `NotFound`; a length that does not
    /// fit the setting's kind is `InvalidLength`.
    pub fn handle_set(&self, key: &str, raw: &[u8]) -> Result<()> {
        info!("name={} len={}", key, raw.len());
        if let Some(setting) = self.registry.find_setting(key) {
            if setting.kind() == ValueKind::Event {
                error!("Unhandled setting type {}:{}", key, setting.kind());
                return Err(Error::InvalidValue);
            }
            return setting.set_raw(raw).inspect_err(|e| {
                error!("Incorrect value {}:{} ({})", key, raw.len(), e);
            });
        }
        if key.contains('/') {
            return Ok(());
        }
        Err(Error::NotFound)
    }

    /// End of a load pass.
    pub fn commit(&self) {
        info!("Application settings load completed.");
    }

    /// Call `cb(name, bytes)` for every persistable setting.
    ///
    /// A callback error is logged and the walk carries on; the last error
    /// is returned once every setting has been offered.
    pub fn export(&self, mut cb: impl FnMut(&str, &[u8]) -> Result<()>) -> Result<()> {
        info!("export keys under {} handler", self.namespace());
        let mut last = Ok(());
        for s in self.registry.settings().snapshot() {
            if s.kind() == ValueKind::Event {
                warn!("Unhandled type for setting {}", s.name());
                continue;
            }
            if let Err(e) = cb(s.name(), &s.get().to_bytes()) {
                error!("Setting export failed for {}: {}", self.storage_key(s.name()), e);
                last = Err(e);
            }
        }
        last
    }

    /// Stream every stored key of the namespace into the settings list.
    ///
    /// Unknown and malformed entries are logged and skipped.  Fails only if
    /// the store cannot be enumerated.
    pub fn load(&self, store: &dyn StoragePort) -> Result<LoadReport> {
        info!("load settings");
        let mut report = LoadReport::default();
        for StoredEntry { key, value } in store.entries(self.namespace())? {
            match self.handle_set(&key, &value) {
                Ok(()) => report.loaded += 1,
                Err(Error::NotFound) => {
                    warn!("Unhandled setting {}", self.storage_key(&key));
                    report.skipped += 1;
                }
                Err(e) => {
                    warn!("Skipping setting {}: {}", self.storage_key(&key), e);
                    report.skipped += 1;
                }
            }
        }
        self.commit();

        info!("Settings ready:");
        for s in self.registry.settings().snapshot() {
            info!("   {}", s.describe());
        }
        Ok(report)
    }

    /// Write one setting's current value.
    pub fn persist(&self, setting: &Variable, store: &mut dyn StoragePort) -> Result<()> {
        if setting.kind() == ValueKind::Event {
            return Err(Error::TypeMismatch);
        }
        store
            .write(self.namespace(), setting.name(), &setting.get().to_bytes())
            .map_err(Error::from)
    }

    /// Write every persistable setting.  Returns the number written.
    ///
    /// A failed write does not stop the pass.  If any write failed, the
    /// last error is returned after the remaining settings were written.
    pub fn save_all(&self, store: &mut dyn StoragePort) -> Result<usize> {
        let ns = self.namespace().to_owned();
        let mut written = 0;
        let rc = self.export(|name, bytes| {
            store.write(&ns, name, bytes)?;
            written += 1;
            Ok(())
        });
        info!("saved {} settings", written);
        rc.map(|()| written)
    }

    /// Parse `text` into `setting` and persist it immediately.
    ///
    /// A parse failure leaves the setting untouched.  A write failure is
    /// logged and returned; the new in-memory value is kept.
    pub fn set_and_persist(&self, setting: &Variable, text: &str, store: &mut dyn StoragePort) -> Result<()> {
        setting.set_from_str(text)?;
        self.persist(setting, store).inspect_err(|e| {
            error!(
                "Setting save failed for {}: {}",
                self.storage_key(setting.name()),
                e
            );
        })
    }

    /// Raw dump of the stored namespace, for diagnostics.
    pub fn list_stored(&self, store: &dyn StoragePort) -> Result<Vec<StoredEntry>> {
        Ok(store.entries(self.namespace())?)
    }
}
