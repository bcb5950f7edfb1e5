//! Typed variable cells.
//!
//! A [`Variable`] is a named cell whose payload kind is fixed at creation.
//! It is shared as [`VariableRef`] between the registry, the leaf that owns
//! it and any wire or storage bridge.  Each cell carries its own lock, so a
//! reader never observes a half-replaced string.
//!
//! Every successful mutation submits the optional change subscriber to its
//! work queue.  There is no value-equality suppression: setting the same
//! value twice notifies twice, unless the first notification is still
//! pending, in which case the queue coalesces them.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use log::{debug, info, warn};

use crate::config::NAME_MAX;
use crate::error::{Error, Result};
use crate::event_flags::EventFlags;
use crate::value::{Value, ValueKind, VarDef};
use crate::workq::WorkItem;

/// Shared handle to a registered variable or setting.
pub type VariableRef = Arc<Variable>;

/// Payload storage.  Strings own exactly `len + 1` bytes, NUL included.
enum Slot {
    Str(Box<[u8]>),
    Bool(bool),
    Byte(u8),
    Uint16(u16),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Event(EventFlags),
}

/// Copy `s` into a freshly allocated, exactly-sized, NUL-terminated buffer.
fn alloc_cstr(s: &str) -> Result<Box<[u8]>> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(s.len() + 1)?;
    buf.extend_from_slice(s.as_bytes());
    buf.push(0);
    Ok(buf.into_boxed_slice())
}

impl Slot {
    fn from_value(value: Value) -> Result<Self> {
        Ok(match value {
            Value::Str(s) => Self::Str(alloc_cstr(&s)?),
            Value::Bool(b) => Self::Bool(b),
            Value::Byte(v) => Self::Byte(v),
            Value::Uint16(v) => Self::Uint16(v),
            Value::Int16(v) => Self::Int16(v),
            Value::Int32(v) => Self::Int32(v),
            Value::Int64(v) => Self::Int64(v),
            Value::Event(bits) => {
                let ev = EventFlags::new();
                ev.set(bits);
                Self::Event(ev)
            }
        })
    }

    fn to_value(&self) -> Value {
        match self {
            Self::Str(buf) => {
                let bytes = &buf[..buf.len() - 1];
                Value::Str(String::from_utf8_lossy(bytes).into_owned())
            }
            Self::Bool(b) => Value::Bool(*b),
            Self::Byte(v) => Value::Byte(*v),
            Self::Uint16(v) => Value::Uint16(*v),
            Self::Int16(v) => Value::Int16(*v),
            Self::Int32(v) => Value::Int32(*v),
            Self::Int64(v) => Value::Int64(*v),
            Self::Event(ev) => Value::Event(ev.bits()),
        }
    }
}

/// A named, typed value cell with an optional change subscriber.
pub struct Variable {
    name: heapless::String<NAME_MAX>,
    kind: ValueKind,
    slot: Mutex<Slot>,
    on_change: Mutex<Option<WorkItem>>,
}

impl core::fmt::Debug for Variable {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Variable")
            .field("name", &self.name.as_str())
            .field("kind", &self.kind)
            .field("value", &self.get())
            .finish_non_exhaustive()
    }
}

impl Variable {
    /// Create a cell holding `initial`.
    ///
    /// Names longer than [`NAME_MAX`] are truncated with a warning.
    pub fn new(name: &str, initial: Value) -> Result<Self> {
        Ok(Self {
            name: bounded_name(name),
            kind: initial.kind(),
            slot: Mutex::new(Slot::from_value(initial)?),
            on_change: Mutex::new(None),
        })
    }

    /// Instantiate one definition row, optionally as `<prefix>_<name>`.
    pub fn from_def(def: &VarDef, prefix: Option<&str>) -> Result<VariableRef> {
        let initial = def.default.to_value();
        let var = match prefix {
            Some(p) => Self::new(&format!("{p}_{}", def.name), initial)?,
            None => Self::new(def.name, initial)?,
        };
        Ok(Arc::new(var))
    }

    /// Instantiate a whole definition table unchanged.
    pub fn from_defs(defs: &[VarDef]) -> Result<Vec<VariableRef>> {
        defs.iter().map(|d| Self::from_def(d, None)).collect()
    }

    /// Duplicate a definition table for one instance of a multi-instance
    /// leaf, prefixing every name with `prefix`.
    pub fn dup_defs(defs: &[VarDef], prefix: &str) -> Result<Vec<VariableRef>> {
        defs.iter().map(|d| Self::from_def(d, Some(prefix))).collect()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ValueKind {
        self.kind
    }

    fn slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Snapshot of the current value.
    pub fn get(&self) -> Value {
        self.slot().to_value()
    }

    /// `name=(kind)[value]`; an empty string prints as `[]`.
    pub fn describe(&self) -> String {
        format!("{}=({})[{}]", self.name, self.kind, self.get())
    }

    // ── Raw access ────────────────────────────────────────────

    /// Copy the raw value into `out`.
    ///
    /// Strings need room for the terminator (`out.len() > len`) and are
    /// written with it.  Scalars need at least their width and are written
    /// little-endian.  Nothing is written on failure.  Returns the payload
    /// length, excluding the terminator.
    pub fn get_raw(&self, out: &mut [u8]) -> Result<usize> {
        let slot = self.slot();
        let n = match &*slot {
            Slot::Str(buf) => {
                if out.len() < buf.len() {
                    return Err(Error::BufferTooSmall);
                }
                out[..buf.len()].copy_from_slice(buf);
                buf.len() - 1
            }
            other => {
                let bytes = other.to_value().to_bytes();
                if out.len() < bytes.len() {
                    return Err(Error::BufferTooSmall);
                }
                out[..bytes.len()].copy_from_slice(&bytes);
                bytes.len()
            }
        };
        debug!("GET {} ({} bytes)", self.name, n);
        Ok(n)
    }

    /// Store a value decoded from storage or wire bytes.
    pub fn set_raw(&self, raw: &[u8]) -> Result<()> {
        self.set(self.kind.decode(raw)?)
    }

    /// Store a value parsed from operator text.
    pub fn set_from_str(&self, text: &str) -> Result<()> {
        self.set(self.kind.parse(text)?)
    }

    // ── Typed access ──────────────────────────────────────────

    /// Replace the value.  The kind of `value` must match the cell's kind.
    pub fn set(&self, value: Value) -> Result<()> {
        if value.kind() != self.kind {
            warn!(
                "SET {}: {} value rejected by {} variable",
                self.name,
                value.kind(),
                self.kind
            );
            return Err(Error::TypeMismatch);
        }
        {
            let mut slot = self.slot();
            match (&mut *slot, &value) {
                (Slot::Event(ev), Value::Event(bits)) => ev.set(*bits),
                (Slot::Str(buf), Value::Str(s)) => {
                    // old buffer is released when replaced
                    *buf = alloc_cstr(s)?;
                }
                (slot, _) => *slot = Slot::from_value(value.clone())?,
            }
        }
        info!("SET {} <= {}", self.name, value);
        self.notify();
        Ok(())
    }

    pub fn get_bool(&self) -> Result<bool> {
        match *self.slot() {
            Slot::Bool(b) => Ok(b),
            _ => Err(Error::TypeMismatch),
        }
    }

    pub fn get_byte(&self) -> Result<u8> {
        match *self.slot() {
            Slot::Byte(v) => Ok(v),
            _ => Err(Error::TypeMismatch),
        }
    }

    pub fn get_u16(&self) -> Result<u16> {
        match *self.slot() {
            Slot::Uint16(v) => Ok(v),
            _ => Err(Error::TypeMismatch),
        }
    }

    pub fn get_i16(&self) -> Result<i16> {
        match *self.slot() {
            Slot::Int16(v) => Ok(v),
            _ => Err(Error::TypeMismatch),
        }
    }

    pub fn get_i32(&self) -> Result<i32> {
        match *self.slot() {
            Slot::Int32(v) => Ok(v),
            _ => Err(Error::TypeMismatch),
        }
    }

    pub fn get_i64(&self) -> Result<i64> {
        match *self.slot() {
            Slot::Int64(v) => Ok(v),
            _ => Err(Error::TypeMismatch),
        }
    }

    pub fn get_string(&self) -> Result<String> {
        match self.get() {
            Value::Str(s) => Ok(s),
            _ => Err(Error::TypeMismatch),
        }
    }

    pub fn set_bool(&self, v: bool) -> Result<()> {
        self.set(Value::Bool(v))
    }

    pub fn set_byte(&self, v: u8) -> Result<()> {
        self.set(Value::Byte(v))
    }

    pub fn set_u16(&self, v: u16) -> Result<()> {
        self.set(Value::Uint16(v))
    }

    pub fn set_i16(&self, v: i16) -> Result<()> {
        self.set(Value::Int16(v))
    }

    pub fn set_i32(&self, v: i32) -> Result<()> {
        self.set(Value::Int32(v))
    }

    pub fn set_i64(&self, v: i64) -> Result<()> {
        self.set(Value::Int64(v))
    }

    pub fn set_string(&self, v: &str) -> Result<()> {
        self.set(Value::Str(v.into()))
    }

    /// Add `delta` to an int64 counter and return the new value.
    pub fn inc_i64(&self, delta: i64) -> Result<i64> {
        let new = {
            let mut slot = self.slot();
            let Slot::Int64(v) = &mut *slot else {
                return Err(Error::TypeMismatch);
            };
            *v = v.wrapping_add(delta);
            *v
        };
        debug!("SET {} <= {}", self.name, new);
        self.notify();
        Ok(new)
    }

    // ── Events ────────────────────────────────────────────────

    /// Handle to the underlying event object of an event-kind cell.
    pub fn event_flags(&self) -> Result<EventFlags> {
        match &*self.slot() {
            Slot::Event(ev) => Ok(ev.clone()),
            _ => Err(Error::TypeMismatch),
        }
    }

    /// Replace the event bits.
    pub fn set_event(&self, bits: u32) -> Result<()> {
        self.set(Value::Event(bits))
    }

    /// OR `bits` into the event set and wake waiters.
    pub fn post_event(&self, bits: u32) -> Result<()> {
        self.event_flags()?.post(bits);
        debug!("POST {} <= {:#010x}", self.name, bits);
        self.notify();
        Ok(())
    }

    /// Wait for any bit of `mask`.  Returns the matched bits, 0 on timeout.
    ///
    /// The cell lock is not held while waiting.
    pub fn wait_event(&self, mask: u32, reset: bool, timeout: Option<Duration>) -> Result<u32> {
        Ok(self.event_flags()?.wait(mask, reset, timeout))
    }

    // ── Change notification ───────────────────────────────────

    /// Attach the single change subscriber.
    pub fn set_onchange(&self, work: WorkItem) -> Result<()> {
        let mut slot = self.on_change.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            warn!("{}: change subscriber already attached", self.name);
            return Err(Error::AlreadyExists);
        }
        *slot = Some(work);
        Ok(())
    }

    /// Detach and return the change subscriber.
    pub fn clear_onchange(&self) -> Option<WorkItem> {
        self.on_change
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    pub fn has_onchange(&self) -> bool {
        self.on_change
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    fn notify(&self) {
        let work = self
            .on_change
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(work) = work {
            work.submit();
        }
    }

    /// Bytes owned by a string payload, terminator included.
    pub fn allocated_len(&self) -> Option<usize> {
        match &*self.slot() {
            Slot::Str(buf) => Some(buf.len()),
            _ => None,
        }
    }
}

fn bounded_name(name: &str) -> heapless::String<NAME_MAX> {
    let mut out = heapless::String::new();
    for c in name.chars() {
        if out.push(c).is_err() {
            warn!("name '{}' truncated to '{}'", name, out);
            break;
        }
    }
    out
}
