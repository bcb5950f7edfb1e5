//! Generic GATT characteristic accessors for variables.
//!
//! A BLE stack binds one characteristic per variable and forwards reads and
//! writes here.  Values travel in their raw encoding (see
//! [`Value::to_bytes`]).
//!
//! - Reads must start at offset 0; the reply is clipped to the peer's MTU.
//! - Scalar writes may be partial: `data` is merged into the current raw
//!   value at `offset`, and `offset + data.len()` must fit the kind's width.
//! - String writes replace the tail from `offset`, bounded by the configured
//!   write limit.

use core::fmt;

use log::{info, warn};

use crate::value::{Value, ValueKind};
use crate::variable::Variable;

/// ATT protocol errors returned to the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttError {
    /// Offset or length outside the value.
    InvalidOffset,
    /// Payload is not a valid value of the variable's kind.
    ValueNotAllowed,
}

impl AttError {
    /// ATT error code on the wire.
    pub const fn code(self) -> u8 {
        match self {
            Self::InvalidOffset => 0x07,
            Self::ValueNotAllowed => 0x13,
        }
    }
}

impl fmt::Display for AttError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidOffset => write!(f, "invalid offset"),
            Self::ValueNotAllowed => write!(f, "value not allowed"),
        }
    }
}

/// Serve a characteristic read of at most `max_len` bytes.
pub fn read_variable(v: &Variable, offset: usize, max_len: usize) -> Result<Vec<u8>, AttError> {
    info!("read_variable {} len={} offset={}", v.describe(), max_len, offset);
    if offset != 0 {
        warn!("read_variable {}: offset reads are not supported", v.name());
        return Err(AttError::InvalidOffset);
    }
    let mut bytes = v.get().to_bytes();
    if bytes.len() > max_len {
        warn!("read_variable {}: value clipped to {} bytes", v.name(), max_len);
        bytes.truncate(max_len);
    }
    Ok(bytes)
}

/// Apply a characteristic write.  Returns the number of bytes consumed.
pub fn write_variable(v: &Variable, data: &[u8], offset: usize, string_max: usize) -> Result<usize, AttError> {
    let end = offset.checked_add(data.len()).ok_or(AttError::InvalidOffset)?;

    let new = match v.kind() {
        ValueKind::String => {
            if end > string_max {
                return Err(AttError::InvalidOffset);
            }
            let mut raw = v.get().to_bytes();
            if offset > raw.len() {
                return Err(AttError::InvalidOffset);
            }
            raw.truncate(offset);
            raw.extend_from_slice(data);
            let s = String::from_utf8(raw).map_err(|_| AttError::ValueNotAllowed)?;
            info!("write_string {} <= [{}]", v.name(), s);
            Value::Str(s)
        }
        ValueKind::Event => {
            warn!("Unhandled variable kind {}", v.kind());
            return Err(AttError::InvalidOffset);
        }
        kind => {
            let width = kind.width().unwrap_or(0);
            if end > width {
                return Err(AttError::InvalidOffset);
            }
            let mut raw = v.get().to_bytes();
            raw[offset..end].copy_from_slice(data);
            kind.decode(&raw).map_err(|_| AttError::ValueNotAllowed)?
        }
    };

    v.set(new).map_err(|e| {
        warn!("write_variable {} failed: {}", v.name(), e);
        AttError::ValueNotAllowed
    })?;
    Ok(data.len())
}
