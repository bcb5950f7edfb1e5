//! Settings leaf: owns the persistent store.
//!
//! Init binds the `setting` shell command to the store; start loads every
//! persisted value into the settings registered so far.  Boot it after the
//! leaves whose settings it should restore.

use std::sync::Arc;

use log::{error, info};

use crate::error::{Error, Result};
use crate::leaf::{Leaf, LeafCallbacks};
use crate::ports::StoragePort;
use crate::registry::Registry;
use crate::settings::SettingsBridge;
use crate::shell::{self, LeafCommand};

/// Class name the boot table registers.
pub const SETTINGS_CLASS: &str = "settings";

/// Leaf context: the store behind the settings namespace.
pub struct SettingsContext {
    store: Box<dyn StoragePort + Send>,
}

impl SettingsContext {
    pub fn new(store: impl StoragePort + Send + 'static) -> Self {
        Self { store: Box::new(store) }
    }

    pub fn store(&self) -> &dyn StoragePort {
        &*self.store
    }

    pub fn store_mut(&mut self) -> &mut dyn StoragePort {
        &mut *self.store
    }
}

/// Run `f` with the store of a settings leaf.
pub fn with_store<R>(leaf: &Leaf, f: impl FnOnce(&mut dyn StoragePort) -> R) -> Result<R> {
    leaf.context(|ctx: &mut SettingsContext| f(ctx.store_mut()))
        .ok_or(Error::DeviceUnavailable)
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SettingsLeaf;

impl LeafCallbacks for SettingsLeaf {
    fn init(&self, leaf: &Arc<Leaf>, registry: &Registry) -> Result<()> {
        if leaf.context(|_: &mut SettingsContext| ()).is_none() {
            error!("settings leaf {} has no store", leaf.name());
            return Err(Error::DeviceUnavailable);
        }
        let weak = Arc::downgrade(leaf);
        registry.register_command(LeafCommand::new("setting", "Persistent settings", move |r, args, out| {
            let Some(leaf) = weak.upgrade() else {
                return Error::DeviceUnavailable.errno();
            };
            with_store(&leaf, |store| shell::cmd_setting(r, store, args, out))
                .unwrap_or_else(Error::errno)
        }))
    }

    fn start(&self, leaf: &Arc<Leaf>, registry: &Registry) -> Result<()> {
        let report = with_store(leaf, |store| SettingsBridge::new(registry).load(store))??;
        info!("{}: loaded {} settings, skipped {}", leaf.name(), report.loaded, report.skipped);
        Ok(())
    }
}
