//! Priority-ordered boot table.
//!
//! Collects class registrations, leaf init/start steps and application hooks,
//! then runs them in priority order.  Bands keep every class registered
//! before any leaf inits, and every leaf inited before any leaf starts:
//!
//! ```text
//!   25 CLASS_REGISTER ─▶ 50 LEAF_INIT ─▶ 60 APP_INIT ─▶ 75 LEAF_START ─▶ 90 APP_START
//! ```
//!
//! Entries with equal priority run in insertion order.  A failing entry is
//! logged and recorded in the [`BootReport`]; the boot carries on.

use std::any::Any;
use std::sync::Arc;

use log::{info, warn};

use crate::error::{Error, Result};
use crate::leaf::{Leaf, LeafClass};
use crate::registry::Registry;

/// Priority bands.  Lower runs first.
pub struct BootPhase;

impl BootPhase {
    pub const CLASS_REGISTER: u8 = 25;
    pub const LEAF_INIT: u8 = 50;
    pub const APP_INIT: u8 = 60;
    pub const LEAF_START: u8 = 75;
    pub const APP_START: u8 = 90;
}

type Hook = Box<dyn FnOnce(&Registry) -> Result<()> + Send>;

enum Action {
    RegisterClass(Arc<LeafClass>),
    InitLeaf(Arc<Leaf>),
    StartLeaf(Arc<Leaf>),
    Hook(Hook),
}

struct Entry {
    priority: u8,
    label: String,
    action: Action,
}

/// Outcome of [`BootTable::run`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BootReport {
    /// Entries executed, failures included.
    pub ran: usize,
    /// Label and error of every failed entry, in execution order.
    pub failures: Vec<(String, Error)>,
}

impl BootReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Boot steps waiting to run.
#[derive(Default)]
pub struct BootTable {
    entries: Vec<Entry>,
}

impl BootTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Register `class` in the class band.
    pub fn define_class(&mut self, class: &Arc<LeafClass>) -> &mut Self {
        self.entries.push(Entry {
            priority: BootPhase::CLASS_REGISTER,
            label: format!("class {}", class.name()),
            action: Action::RegisterClass(Arc::clone(class)),
        });
        self
    }

    /// Create leaf `name` of `class` with init and start entries in their
    /// bands.
    pub fn define_leaf(&mut self, class: &Arc<LeafClass>, name: &str) -> Arc<Leaf> {
        let leaf = Leaf::new(name, class);
        self.push_leaf(&leaf);
        leaf
    }

    /// As [`define_leaf`](Self::define_leaf), with per-instance context.
    pub fn define_leaf_with<T: Any + Send>(&mut self, class: &Arc<LeafClass>, name: &str, context: T) -> Arc<Leaf> {
        let leaf = Leaf::with_context(name, class, context);
        self.push_leaf(&leaf);
        leaf
    }

    fn push_leaf(&mut self, leaf: &Arc<Leaf>) {
        self.entries.push(Entry {
            priority: BootPhase::LEAF_INIT,
            label: format!("init {}", leaf.name()),
            action: Action::InitLeaf(Arc::clone(leaf)),
        });
        self.entries.push(Entry {
            priority: BootPhase::LEAF_START,
            label: format!("start {}", leaf.name()),
            action: Action::StartLeaf(Arc::clone(leaf)),
        });
    }

    /// Application step at an arbitrary priority.
    pub fn hook(
        &mut self,
        priority: u8,
        label: &str,
        f: impl FnOnce(&Registry) -> Result<()> + Send + 'static,
    ) -> &mut Self {
        self.entries.push(Entry {
            priority,
            label: label.into(),
            action: Action::Hook(Box::new(f)),
        });
        self
    }

    /// Run every entry in priority order.
    ///
    /// The registry is initialised first if nothing has done so yet.
    pub fn run(mut self, registry: &Registry) -> BootReport {
        let mut report = BootReport::default();
        if !registry.is_initialised() {
            if let Err(e) = registry.initialise() {
                report.failures.push(("initialise".into(), e));
            }
        }

        // stable: equal priorities keep insertion order
        self.entries.sort_by_key(|e| e.priority);
        info!("boot: {} entries", self.entries.len());

        for entry in self.entries {
            let rc = match entry.action {
                Action::RegisterClass(class) => {
                    registry.register_class(&class);
                    Ok(())
                }
                Action::InitLeaf(leaf) => registry.sys_init(&leaf),
                Action::StartLeaf(leaf) if !leaf.is_ready() => {
                    warn!("boot: skipping start of {}, not ready", leaf.name());
                    Err(Error::NotReady)
                }
                Action::StartLeaf(leaf) => registry.sys_start(&leaf),
                Action::Hook(f) => f(registry),
            };
            report.ran += 1;
            if let Err(e) = rc {
                warn!("boot: {} (prio {}) failed: {}", entry.label, entry.priority, e);
                report.failures.push((entry.label, e));
            }
        }
        info!("boot: done, {} failures", report.failures.len());
        report
    }
}
