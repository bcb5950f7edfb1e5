//! Leaf classes and leaf instances.
//!
//! A *leaf class* is a driver type (e.g. "keypad"); a *leaf* is one instance
//! of it (e.g. "kp0").  Classes supply behaviour through [`LeafCallbacks`],
//! whose methods all default to success so a class only implements the
//! phases it cares about.
//!
//! ```text
//!   Unregistered ──sys_init──▶ Registered ──init ok──▶ Ready ⇄ Running
//!                                  │                     (start / stop)
//!                                  └── init failed: stays Registered
//! ```

use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::Result;
use crate::registry::Registry;

/// Lifecycle callbacks of a leaf class.
///
/// Each receives the leaf being driven and the registry, so callbacks can
/// register variables, look up peers and reach the work queue.
pub trait LeafCallbacks: Send + Sync {
    fn init(&self, _leaf: &Arc<Leaf>, _registry: &Registry) -> Result<()> {
        Ok(())
    }

    fn start(&self, _leaf: &Arc<Leaf>, _registry: &Registry) -> Result<()> {
        Ok(())
    }

    fn stop(&self, _leaf: &Arc<Leaf>, _registry: &Registry) -> Result<()> {
        Ok(())
    }

    fn pre_sleep(&self, _leaf: &Arc<Leaf>, _registry: &Registry) -> Result<()> {
        Ok(())
    }

    fn post_sleep(&self, _leaf: &Arc<Leaf>, _registry: &Registry) -> Result<()> {
        Ok(())
    }
}

/// Callbacks of a class that does nothing in any phase.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCallbacks;

impl LeafCallbacks for NoCallbacks {}

/// A registered driver type.
pub struct LeafClass {
    name: String,
    /// Display-only parent class name.
    parent: Option<String>,
    callbacks: Arc<dyn LeafCallbacks>,
}

impl core::fmt::Debug for LeafClass {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("LeafClass")
            .field("name", &self.name)
            .field("parent", &self.parent)
            .finish_non_exhaustive()
    }
}

impl LeafClass {
    pub fn new(name: &str, callbacks: impl LeafCallbacks + 'static) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            parent: None,
            callbacks: Arc::new(callbacks),
        })
    }

    pub fn with_parent(name: &str, parent: &str, callbacks: impl LeafCallbacks + 'static) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            parent: Some(parent.into()),
            callbacks: Arc::new(callbacks),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> Option<&str> {
        self.parent.as_deref()
    }

    pub fn callbacks(&self) -> &dyn LeafCallbacks {
        &*self.callbacks
    }
}

type Context = Box<dyn Any + Send>;

/// One driver instance.
pub struct Leaf {
    name: String,
    class: Arc<LeafClass>,
    ready: AtomicBool,
    running: AtomicBool,
    context: Mutex<Option<Context>>,
}

impl core::fmt::Debug for Leaf {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Leaf")
            .field("name", &self.name)
            .field("class", &self.class.name)
            .field("ready", &self.is_ready())
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl Leaf {
    pub fn new(name: &str, class: &Arc<LeafClass>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            class: Arc::clone(class),
            ready: AtomicBool::new(false),
            running: AtomicBool::new(false),
            context: Mutex::new(None),
        })
    }

    /// A leaf carrying per-instance driver state from the start.
    pub fn with_context<T: Any + Send>(name: &str, class: &Arc<LeafClass>, context: T) -> Arc<Self> {
        let leaf = Self::new(name, class);
        leaf.set_context(context);
        leaf
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn class(&self) -> &Arc<LeafClass> {
        &self.class
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub(crate) fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Release);
    }

    pub(crate) fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::Release);
    }

    /// Replace the per-instance context.
    pub fn set_context<T: Any + Send>(&self, context: T) {
        *self.context.lock().unwrap_or_else(PoisonError::into_inner) = Some(Box::new(context));
    }

    /// Run `f` against the context if it holds a `T`.
    ///
    /// Returns `None` when no context is set or it has another type.
    pub fn context<T: Any + Send, R>(&self, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        let mut guard = self.context.lock().unwrap_or_else(PoisonError::into_inner);
        guard.as_mut()?.downcast_mut::<T>().map(f)
    }

    /// `name: READY/FAILED RUNNING/STOPPED`
    pub fn status_line(&self) -> String {
        format!(
            "{}: {} {}",
            self.name,
            if self.is_ready() { "READY" } else { "FAILED" },
            if self.is_running() { "RUNNING" } else { "STOPPED" },
        )
    }
}
