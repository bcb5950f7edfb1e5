//! Deferred work queue.
//!
//! Change notifications and periodic leaf scans never run inside the caller
//! that triggered them.  They are submitted as [`WorkItem`]s to a
//! [`WorkQueue`] and executed later, either by a dedicated worker thread
//! ([`WorkQueue::spawn_worker`]) or cooperatively ([`WorkQueue::run_pending`],
//! used by host tests).
//!
//! ```text
//!  Variable::set ──submit()──▶ ┌────────────┐
//!  Leaf scan ─────schedule()─▶ │ ready FIFO │──▶ worker thread ──▶ handler()
//!                              │ delayed    │
//!                              └────────────┘
//! ```
//!
//! A work item that is already pending is not queued a second time, so a
//! burst of submissions collapses into one handler run.  The pending flag is
//! cleared just before the handler runs, so a submission made during the
//! handler queues it again.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::config::CoreConfig;

type Handler = Box<dyn Fn() + Send + Sync>;

struct WorkInner {
    label: &'static str,
    handler: Handler,
    pending: AtomicBool,
    queue: Weak<Shared>,
}

#[derive(Default)]
struct QueueState {
    ready: VecDeque<Arc<WorkInner>>,
    delayed: Vec<(Instant, Arc<WorkInner>)>,
    shutdown: bool,
}

#[derive(Default)]
struct Shared {
    state: Mutex<QueueState>,
    wake: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl QueueState {
    /// Move every expired delayed item onto the ready FIFO.
    fn promote_due(&mut self, now: Instant) {
        let mut i = 0;
        while i < self.delayed.len() {
            if self.delayed[i].0 <= now {
                let (_, item) = self.delayed.swap_remove(i);
                if !item.pending.swap(true, Ordering::AcqRel) {
                    self.ready.push_back(item);
                }
            } else {
                i += 1;
            }
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.delayed.iter().map(|(at, _)| *at).min()
    }

    fn remove_delayed(&mut self, item: &Arc<WorkInner>) -> bool {
        let before = self.delayed.len();
        self.delayed.retain(|(_, it)| !Arc::ptr_eq(it, item));
        self.delayed.len() != before
    }
}

// ───────────────────────────────────────────────────────────────
// Work items
// ───────────────────────────────────────────────────────────────

/// A handler bound to one queue.  Clones refer to the same item.
#[derive(Clone)]
pub struct WorkItem {
    inner: Arc<WorkInner>,
}

impl core::fmt::Debug for WorkItem {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("WorkItem")
            .field("label", &self.inner.label)
            .field("pending", &self.is_pending())
            .finish_non_exhaustive()
    }
}

impl WorkItem {
    pub fn label(&self) -> &'static str {
        self.inner.label
    }

    /// Whether the item sits on the ready FIFO.
    pub fn is_pending(&self) -> bool {
        self.inner.pending.load(Ordering::Acquire)
    }

    /// Queue the item for immediate execution.
    ///
    /// Returns `false` if it was already pending or the queue is gone.
    /// Never blocks on the handler.
    pub fn submit(&self) -> bool {
        let Some(shared) = self.inner.queue.upgrade() else {
            warn!("work '{}' submitted to a dropped queue", self.inner.label);
            return false;
        };
        let mut state = shared.lock();
        if state.shutdown || self.inner.pending.swap(true, Ordering::AcqRel) {
            return false;
        }
        state.ready.push_back(Arc::clone(&self.inner));
        shared.wake.notify_one();
        true
    }

    /// Run the item after `delay`.  No-op if it is already scheduled.
    pub fn schedule(&self, delay: Duration) -> bool {
        self.schedule_inner(delay, false)
    }

    /// Run the item after `delay`, replacing any earlier deadline.
    pub fn reschedule(&self, delay: Duration) -> bool {
        self.schedule_inner(delay, true)
    }

    fn schedule_inner(&self, delay: Duration, replace: bool) -> bool {
        let Some(shared) = self.inner.queue.upgrade() else {
            return false;
        };
        let mut state = shared.lock();
        if state.shutdown {
            return false;
        }
        let scheduled = state.delayed.iter().any(|(_, it)| Arc::ptr_eq(it, &self.inner));
        if scheduled {
            if !replace {
                return false;
            }
            state.remove_delayed(&self.inner);
        }
        state
            .delayed
            .push((Instant::now() + delay, Arc::clone(&self.inner)));
        shared.wake.notify_one();
        true
    }

    /// Drop any pending or scheduled run.  Returns whether one was removed.
    pub fn cancel(&self) -> bool {
        let Some(shared) = self.inner.queue.upgrade() else {
            return false;
        };
        let mut state = shared.lock();
        let mut removed = state.remove_delayed(&self.inner);
        if self.inner.pending.swap(false, Ordering::AcqRel) {
            state.ready.retain(|it| !Arc::ptr_eq(it, &self.inner));
            removed = true;
        }
        removed
    }
}

// ───────────────────────────────────────────────────────────────
// Queue
// ───────────────────────────────────────────────────────────────

/// Handle to a work queue.  Clones share the same queue.
#[derive(Clone, Default)]
pub struct WorkQueue {
    shared: Arc<Shared>,
}

impl core::fmt::Debug for WorkQueue {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("WorkQueue")
            .field("pending", &self.pending_len())
            .finish_non_exhaustive()
    }
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an item that runs `handler` on this queue.
    pub fn work_item(&self, label: &'static str, handler: impl Fn() + Send + Sync + 'static) -> WorkItem {
        WorkItem {
            inner: Arc::new(WorkInner {
                label,
                handler: Box::new(handler),
                pending: AtomicBool::new(false),
                queue: Arc::downgrade(&self.shared),
            }),
        }
    }

    /// Items ready to run now (delayed items excluded).
    pub fn pending_len(&self) -> usize {
        self.shared.lock().ready.len()
    }

    /// Items waiting on a deadline.
    pub fn scheduled_len(&self) -> usize {
        self.shared.lock().delayed.len()
    }

    /// Run every item that is ready now, including expired delayed items,
    /// on the calling thread.  Returns the number of handler runs.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        loop {
            let item = {
                let mut state = self.shared.lock();
                state.promote_due(Instant::now());
                match state.ready.pop_front() {
                    Some(item) => item,
                    None => return ran,
                }
            };
            Self::execute(&item);
            ran += 1;
        }
    }

    fn execute(item: &WorkInner) {
        item.pending.store(false, Ordering::Release);
        debug!("work '{}' running", item.label);
        (item.handler)();
    }

    /// Block until an item is runnable or the queue shuts down.
    fn next_blocking(&self) -> Option<Arc<WorkInner>> {
        let mut state = self.shared.lock();
        loop {
            if state.shutdown {
                return None;
            }
            let now = Instant::now();
            state.promote_due(now);
            if let Some(item) = state.ready.pop_front() {
                return Some(item);
            }
            state = match state.next_deadline() {
                Some(at) => {
                    self.shared
                        .wake
                        .wait_timeout(state, at.saturating_duration_since(now))
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
                None => self
                    .shared
                    .wake
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner),
            };
        }
    }

    /// Stop the worker thread and refuse further submissions.
    pub fn shutdown(&self) {
        let mut state = self.shared.lock();
        state.shutdown = true;
        for item in state.ready.drain(..) {
            item.pending.store(false, Ordering::Release);
        }
        state.delayed.clear();
        self.shared.wake.notify_all();
    }

    /// Spawn the thread that drains this queue until [`shutdown`](Self::shutdown).
    ///
    /// On ESP-IDF the thread is pinned to the application core with the
    /// given priority; on the host only the stack size applies.
    pub fn spawn_worker(
        &self,
        name: &'static str,
        priority: u8,
        stack_kb: usize,
    ) -> std::io::Result<std::thread::JoinHandle<()>> {
        let queue = self.clone();
        let body = move || {
            while let Some(item) = queue.next_blocking() {
                Self::execute(&item);
            }
            debug!("work queue worker exiting");
        };
        spawn_pinned(name, priority, stack_kb, body)
    }

    /// [`spawn_worker`](Self::spawn_worker) with the thread parameters of `config`.
    pub fn spawn_configured(
        &self,
        name: &'static str,
        config: &CoreConfig,
    ) -> std::io::Result<std::thread::JoinHandle<()>> {
        self.spawn_worker(name, config.worker_priority, usize::from(config.worker_stack_kb))
    }
}

/// Spawn `f` pinned to the APP core (core 1).
///
/// `esp_pthread_set_cfg` applies to the next thread created by the calling
/// thread, so the config/spawn pair must not interleave with other spawns.
#[cfg(target_os = "espidf")]
fn spawn_pinned(
    name: &'static str,
    priority: u8,
    stack_kb: usize,
    f: impl FnOnce() + Send + 'static,
) -> std::io::Result<std::thread::JoinHandle<()>> {
    let mut cname = [0u8; 16];
    let n = name.len().min(15);
    cname[..n].copy_from_slice(&name.as_bytes()[..n]);

    // SAFETY: called from the boot thread before any other spawn; `cname`
    // outlives the pthread_create inside `spawn` below.
    let ret = unsafe {
        let mut cfg = esp_idf_sys::esp_create_default_pthread_config();
        cfg.pin_to_core = 1;
        cfg.prio = i32::from(priority);
        cfg.stack_size = (stack_kb * 1024) as i32;
        cfg.thread_name = cname.as_ptr().cast();
        esp_idf_sys::esp_pthread_set_cfg(&cfg)
    };
    if ret != esp_idf_sys::ESP_OK as i32 {
        return Err(std::io::Error::other(format!("esp_pthread_set_cfg failed: {ret}")));
    }

    info!("Spawning '{}' on APP core (pri={}, stack={}KB)", name, priority, stack_kb);
    std::thread::Builder::new().name(name.into()).spawn(f)
}

#[cfg(not(target_os = "espidf"))]
fn spawn_pinned(
    name: &'static str,
    _priority: u8,
    stack_kb: usize,
    f: impl FnOnce() + Send + 'static,
) -> std::io::Result<std::thread::JoinHandle<()>> {
    info!("Spawning '{}' (sim, no core pinning, stack={}KB)", name, stack_kb);
    std::thread::Builder::new()
        .name(name.into())
        .stack_size(stack_kb * 1024)
        .spawn(f)
}
