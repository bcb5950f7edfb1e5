//! Registry of leaf classes, leaves, variables and settings.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────── Registry ────────────────────────────┐
//! │ classes   : TimedMutex<Vec<Arc<LeafClass>>>   (registry deadline) │
//! │ leaves    : TimedMutex<Vec<Arc<Leaf>>>        (registry deadline) │
//! │ variables : ValueList                         (value deadline)    │
//! │ settings  : ValueList                         (value deadline)    │
//! │ commands  : TimedMutex<CommandTable>                              │
//! │ workq     : WorkQueue                                             │
//! └───────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Lists are append-only and hold `Arc` handles, so a lookup hands out a
//! clone and releases the lock before the caller touches the item.  Nothing
//! but appends and scans happens under a list lock; leaf callbacks always
//! run unlocked.
//!
//! Variables and settings are independent namespaces: a name may exist in
//! both, and [`Registry::find_variable`] never returns a setting.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Duration;

use log::{debug, error, info};

use crate::adapters::device_id::DeviceIdentity;
use crate::config::CoreConfig;
use crate::error::{Error, Result};
use crate::leaf::{Leaf, LeafClass};
use crate::shell::{CommandTable, LeafCommand};
use crate::sync::TimedMutex;
use crate::variable::VariableRef;
use crate::workq::WorkQueue;

// ───────────────────────────────────────────────────────────────
// Value lists
// ───────────────────────────────────────────────────────────────

/// An append-only list of variables or settings.
#[derive(Debug)]
pub struct ValueList {
    items: TimedMutex<Vec<VariableRef>>,
    timeout: Duration,
}

impl ValueList {
    pub fn new(label: &'static str, timeout: Duration) -> Self {
        Self {
            items: TimedMutex::new(label, Vec::new()),
            timeout,
        }
    }

    pub fn label(&self) -> &'static str {
        self.items.label()
    }

    /// Append every item.  Duplicate names are reported but kept; the first
    /// registration wins on lookup.
    pub fn register(&self, items: &[VariableRef]) {
        let mut list = self.items.lock_patiently(self.timeout);
        for (i, v) in items.iter().enumerate() {
            if list.iter().any(|existing| existing.name() == v.name()) {
                error!("duplicate {} name '{}'", self.label(), v.name());
            }
            debug!(
                "register {} {}/{}: {} kind={}",
                self.label(),
                i,
                items.len(),
                v.name(),
                v.kind()
            );
            list.push(Arc::clone(v));
        }
    }

    /// Exact-name lookup.
    pub fn find(&self, name: &str) -> Option<VariableRef> {
        self.items
            .lock_patiently(self.timeout)
            .iter()
            .find(|v| v.name() == name)
            .cloned()
    }

    /// Registration-ordered copy of the list.
    pub fn snapshot(&self) -> Vec<VariableRef> {
        self.items.lock_patiently(self.timeout).clone()
    }

    pub fn len(&self) -> usize {
        self.items.lock_patiently(self.timeout).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Log every item's description.
    pub fn show(&self) {
        for v in self.snapshot() {
            info!("{}", v.describe());
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Registry
// ───────────────────────────────────────────────────────────────

/// Process-wide catalogue of leaves and their values.
pub struct Registry {
    config: CoreConfig,
    classes: TimedMutex<Vec<Arc<LeafClass>>>,
    leaves: TimedMutex<Vec<Arc<Leaf>>>,
    variables: ValueList,
    settings: ValueList,
    commands: TimedMutex<CommandTable>,
    workq: WorkQueue,
    identity: Mutex<DeviceIdentity>,
    init_done: AtomicBool,
}

impl core::fmt::Debug for Registry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Registry")
            .field("initialised", &self.is_initialised())
            .field("variables", &self.variables.len())
            .field("settings", &self.settings.len())
            .finish_non_exhaustive()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(CoreConfig::default())
    }
}

static GLOBAL: OnceLock<Registry> = OnceLock::new();

impl Registry {
    pub fn new(config: CoreConfig) -> Self {
        let value_timeout = config.value_lock_timeout();
        Self {
            variables: ValueList::new("variable", value_timeout),
            settings: ValueList::new("setting", value_timeout),
            classes: TimedMutex::new("registry", Vec::new()),
            leaves: TimedMutex::new("registry", Vec::new()),
            commands: TimedMutex::new("command table", CommandTable::new()),
            workq: WorkQueue::new(),
            identity: Mutex::new(DeviceIdentity::default()),
            init_done: AtomicBool::new(false),
            config,
        }
    }

    /// The firmware-wide registry, created with default configuration on
    /// first use.
    pub fn global() -> &'static Registry {
        GLOBAL.get_or_init(Registry::default)
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn work_queue(&self) -> &WorkQueue {
        &self.workq
    }

    pub fn variables(&self) -> &ValueList {
        &self.variables
    }

    pub fn settings(&self) -> &ValueList {
        &self.settings
    }

    /// Reset the class and leaf lists and compute the device identity.
    ///
    /// Runs before any leaf exists, so the registry lock must be free; a
    /// held lock here is unrecoverable.
    pub fn initialise(&self) -> Result<()> {
        info!("registry initialise");
        let Some(mut classes) = self.classes.lock_timeout(Duration::ZERO) else {
            error!("registry mutex is held, that's impossible");
            return Err(Error::LockTimeout);
        };
        let Some(mut leaves) = self.leaves.lock_timeout(Duration::ZERO) else {
            error!("registry mutex is held, that's impossible");
            return Err(Error::LockTimeout);
        };
        classes.clear();
        leaves.clear();
        drop(leaves);
        drop(classes);

        let identity = DeviceIdentity::local(&self.config.name_base);
        *self.identity.lock().unwrap_or_else(PoisonError::into_inner) = identity;

        self.init_done.store(true, Ordering::Release);
        info!("registry initialise OK");
        Ok(())
    }

    pub fn is_initialised(&self) -> bool {
        self.init_done.load(Ordering::Acquire)
    }

    pub fn identity(&self) -> DeviceIdentity {
        self.identity
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    // ── Classes and leaves ────────────────────────────────────

    pub fn register_class(&self, class: &Arc<LeafClass>) {
        debug!("class register {}", class.name());
        let mut classes = self.classes.lock_patiently(self.config.registry_lock_timeout());
        if classes.iter().any(|c| c.name() == class.name()) {
            error!("duplicate class name '{}'", class.name());
        }
        classes.push(Arc::clone(class));
    }

    /// Append a leaf to the leaf list.  Normally reached through
    /// [`sys_init`](Registry::sys_init).
    pub fn register_leaf(&self, leaf: &Arc<Leaf>) {
        let mut leaves = self.leaves.lock_patiently(self.config.registry_lock_timeout());
        // re-init of an already listed leaf
        if leaves.iter().any(|l| Arc::ptr_eq(l, leaf)) {
            return;
        }
        if leaves.iter().any(|l| l.name() == leaf.name()) {
            error!("duplicate leaf name '{}'", leaf.name());
        }
        leaves.push(Arc::clone(leaf));
    }

    pub fn find_class(&self, name: &str) -> Option<Arc<LeafClass>> {
        self.classes
            .lock_patiently(self.config.registry_lock_timeout())
            .iter()
            .find(|c| c.name() == name)
            .cloned()
    }

    pub fn find_leaf(&self, name: &str) -> Option<Arc<Leaf>> {
        self.leaves
            .lock_patiently(self.config.registry_lock_timeout())
            .iter()
            .find(|l| l.name() == name)
            .cloned()
    }

    /// First leaf of `class` (any class if `None`) accepted by `pred`.
    ///
    /// `pred` runs with the leaf list locked and must not call back into the
    /// registry's leaf functions.
    pub fn find_leaf_by(&self, class: Option<&str>, pred: impl Fn(&Leaf) -> bool) -> Option<Arc<Leaf>> {
        self.leaves
            .lock_patiently(self.config.registry_lock_timeout())
            .iter()
            .filter(|l| class.is_none_or(|c| l.class().name() == c))
            .find(|l| pred(l))
            .cloned()
    }

    /// Registration-ordered copy of the leaf list.
    pub fn leaves(&self) -> Vec<Arc<Leaf>> {
        self.leaves
            .lock_patiently(self.config.registry_lock_timeout())
            .clone()
    }

    pub fn classes(&self) -> Vec<Arc<LeafClass>> {
        self.classes
            .lock_patiently(self.config.registry_lock_timeout())
            .clone()
    }

    // ── Variables ─────────────────────────────────────────────

    pub fn register_variables(&self, items: &[VariableRef]) {
        self.variables.register(items);
    }

    /// Look up a runtime variable.  Settings are not searched.
    pub fn find_variable(&self, name: &str) -> Option<VariableRef> {
        self.variables.find(name)
    }

    /// Log every variable's description.
    pub fn variables_show(&self) {
        self.variables.show();
    }

    // ── Leaf commands ─────────────────────────────────────────

    /// Add a command to the dynamic `leaf` command table.
    pub fn register_command(&self, command: LeafCommand) -> Result<()> {
        let mut table = self.commands.lock_patiently(self.config.registry_lock_timeout());
        table.insert(command)
    }

    pub fn find_command(&self, name: &str) -> Option<LeafCommand> {
        self.commands
            .lock_patiently(self.config.registry_lock_timeout())
            .find(name)
            .cloned()
    }

    /// Names of the registered leaf commands, sorted.
    pub fn command_names(&self) -> Vec<String> {
        self.commands
            .lock_patiently(self.config.registry_lock_timeout())
            .names()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::leaf::NoCallbacks;
    use crate::value::Value;
    use crate::variable::Variable;

    fn var(name: &str, v: Value) -> VariableRef {
        Arc::new(Variable::new(name, v).unwrap())
    }

    #[test]
    fn lookups_are_total() {
        let r = Registry::default();
        assert!(r.find_leaf("missing").is_none());
        assert!(r.find_variable("missing").is_none());
        assert!(r.settings().find("missing").is_none());
        assert!(r.find_leaf_by(None, |_| true).is_none());
    }

    #[test]
    fn duplicates_are_kept_first_wins() {
        let r = Registry::default();
        let a = var("x", Value::Byte(1));
        let b = var("x", Value::Byte(2));
        r.register_variables(&[a, b]);
        assert_eq!(r.variables().len(), 2);
        assert_eq!(r.find_variable("x").unwrap().get(), Value::Byte(1));
    }

    #[test]
    fn find_leaf_by_filters_class() {
        let r = Registry::default();
        let led = LeafClass::new("led", NoCallbacks);
        let kp = LeafClass::new("keypad", NoCallbacks);
        r.register_leaf(&Leaf::new("led0", &led));
        r.register_leaf(&Leaf::new("kp0", &kp));
        r.register_leaf(&Leaf::new("kp1", &kp));

        let found = r.find_leaf_by(Some("keypad"), |l| l.name().ends_with('1')).unwrap();
        assert_eq!(found.name(), "kp1");
        assert!(r.find_leaf_by(Some("led"), |l| l.name() == "kp0").is_none());
        assert_eq!(r.find_leaf_by(None, |_| true).unwrap().name(), "led0");
    }

    #[test]
    fn initialise_resets_lists_and_sets_identity() {
        let r = Registry::default();
        r.register_class(&LeafClass::new("led", NoCallbacks));
        assert!(!r.is_initialised());
        r.initialise().unwrap();
        assert!(r.is_initialised());
        assert!(r.classes().is_empty());
        assert_eq!(r.identity().name(), "leaf-cafe");
    }

    #[test]
    fn show_leaves_lists_intact() {
        let r = Registry::default();
        r.register_variables(&[var("a", Value::Bool(true)), var("b", Value::Str(String::new()))]);
        r.add_setting("c", Value::Int16(-1)).unwrap();
        r.variables_show();
        r.settings_show();
        assert_eq!(r.variables().len(), 2);
        assert_eq!(r.settings().len(), 1);
    }

    #[test]
    fn initialise_fails_when_lock_held() {
        let r = Registry::default();
        let _held = r.classes.lock_timeout(Duration::ZERO).unwrap();
        assert_eq!(r.initialise(), Err(Error::LockTimeout));
    }
}
