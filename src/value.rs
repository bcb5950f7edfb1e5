//! Value kinds, tagged values and their encodings.
//!
//! Three representations of the same data:
//!
//! - [`Value`]: owned tagged union used by typed accessors.
//! - [`DefaultValue`]: `const`-constructible initial value in a [`VarDef`]
//!   table, so definition tables can be `static`.
//! - Raw bytes: little-endian scalars and unterminated string bytes.  This is
//!   both the storage format (`app/<name>`) and the wire format.
//!
//! Text parsing for the command surface lives here as well
//! ([`ValueKind::parse`]).

use core::fmt;

use crate::error::{Error, Result};

// ───────────────────────────────────────────────────────────────
// Kinds
// ───────────────────────────────────────────────────────────────

/// Closed set of payload kinds a variable can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    String,
    Bool,
    Byte,
    Uint16,
    Int16,
    Int32,
    Int64,
    /// Bitmask event object; the raw form is the current `u32` bit set.
    Event,
}

impl ValueKind {
    /// Display name used in descriptions: `name=(kind)[value]`.
    pub const fn name(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Bool => "bool",
            Self::Byte => "byte",
            Self::Uint16 => "uint16",
            Self::Int16 => "int16",
            Self::Int32 => "int32",
            Self::Int64 => "int64",
            Self::Event => "event",
        }
    }

    /// Fixed raw width in bytes; `None` for strings.
    pub const fn width(self) -> Option<usize> {
        match self {
            Self::String => None,
            Self::Bool | Self::Byte => Some(1),
            Self::Uint16 | Self::Int16 => Some(2),
            Self::Int32 | Self::Event => Some(4),
            Self::Int64 => Some(8),
        }
    }

    /// Decode raw bytes into a value of this kind.
    ///
    /// Scalars must be exactly [`width`](Self::width) bytes.  Strings accept
    /// any length of UTF-8; a single trailing NUL is tolerated.
    pub fn decode(self, raw: &[u8]) -> Result<Value> {
        if let Some(expected) = self.width() {
            if raw.len() != expected {
                return Err(Error::InvalidLength {
                    expected,
                    actual: raw.len(),
                });
            }
        }
        Ok(match self {
            Self::String => {
                let raw = raw.strip_suffix(&[0]).unwrap_or(raw);
                let s = core::str::from_utf8(raw).map_err(|_| Error::InvalidValue)?;
                Value::Str(s.into())
            }
            Self::Bool => Value::Bool(raw[0] != 0),
            Self::Byte => Value::Byte(raw[0]),
            Self::Uint16 => Value::Uint16(u16::from_le_bytes([raw[0], raw[1]])),
            Self::Int16 => Value::Int16(i16::from_le_bytes([raw[0], raw[1]])),
            Self::Int32 => Value::Int32(i32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]])),
            Self::Event => Value::Event(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]])),
            Self::Int64 => {
                let mut b = [0u8; 8];
                b.copy_from_slice(raw);
                Value::Int64(i64::from_le_bytes(b))
            }
        })
    }

    /// Parse operator text into a value of this kind.
    ///
    /// Booleans accept `true`, `on` and `1` as true and anything else as
    /// false.  Integers are strict decimal with a range check.  Events take
    /// decimal or `0x`-prefixed hex bits.  Strings are stored verbatim.
    pub fn parse(self, text: &str) -> Result<Value> {
        let t = text.trim();
        Ok(match self {
            Self::String => Value::Str(text.into()),
            Self::Bool => Value::Bool(matches!(t, "true" | "on" | "1")),
            Self::Byte => Value::Byte(parse_int(t)?),
            Self::Uint16 => Value::Uint16(parse_int(t)?),
            Self::Int16 => Value::Int16(parse_int(t)?),
            Self::Int32 => Value::Int32(parse_int(t)?),
            Self::Int64 => Value::Int64(parse_int(t)?),
            Self::Event => {
                let bits = match t.strip_prefix("0x").or_else(|| t.strip_prefix("0X")) {
                    Some(hex) => u32::from_str_radix(hex, 16).map_err(|_| Error::InvalidValue)?,
                    None => parse_int(t)?,
                };
                Value::Event(bits)
            }
        })
    }
}

fn parse_int<T: core::str::FromStr>(t: &str) -> Result<T> {
    t.parse().map_err(|_| Error::InvalidValue)
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ───────────────────────────────────────────────────────────────
// Values
// ───────────────────────────────────────────────────────────────

/// An owned value.  The variant always determines the [`ValueKind`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Str(String),
    Bool(bool),
    Byte(u8),
    Uint16(u16),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Event(u32),
}

impl Value {
    pub const fn kind(&self) -> ValueKind {
        match self {
            Self::Str(_) => ValueKind::String,
            Self::Bool(_) => ValueKind::Bool,
            Self::Byte(_) => ValueKind::Byte,
            Self::Uint16(_) => ValueKind::Uint16,
            Self::Int16(_) => ValueKind::Int16,
            Self::Int32(_) => ValueKind::Int32,
            Self::Int64(_) => ValueKind::Int64,
            Self::Event(_) => ValueKind::Event,
        }
    }

    /// Storage / wire encoding: little-endian scalars, string bytes without
    /// a terminator.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Self::Str(s) => s.as_bytes().to_vec(),
            Self::Bool(b) => vec![u8::from(*b)],
            Self::Byte(b) => vec![*b],
            Self::Uint16(v) => v.to_le_bytes().to_vec(),
            Self::Int16(v) => v.to_le_bytes().to_vec(),
            Self::Int32(v) => v.to_le_bytes().to_vec(),
            Self::Int64(v) => v.to_le_bytes().to_vec(),
            Self::Event(v) => v.to_le_bytes().to_vec(),
        }
    }
}

/// Formats the bracketed part of a description.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(s) => f.write_str(s),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Byte(v) => write!(f, "{v}"),
            Self::Uint16(v) => write!(f, "{v}"),
            Self::Int16(v) => write!(f, "{v}"),
            Self::Int32(v) => write!(f, "{v}"),
            Self::Int64(v) => write!(f, "{v}"),
            Self::Event(v) => write!(f, "{v:#010x}"),
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Definition tables
// ───────────────────────────────────────────────────────────────

/// Initial value of a variable definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefaultValue {
    Str(&'static str),
    Bool(bool),
    Byte(u8),
    Uint16(u16),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    /// Event objects always start with no bits set.
    Event,
}

impl DefaultValue {
    pub const fn kind(self) -> ValueKind {
        match self {
            Self::Str(_) => ValueKind::String,
            Self::Bool(_) => ValueKind::Bool,
            Self::Byte(_) => ValueKind::Byte,
            Self::Uint16(_) => ValueKind::Uint16,
            Self::Int16(_) => ValueKind::Int16,
            Self::Int32(_) => ValueKind::Int32,
            Self::Int64(_) => ValueKind::Int64,
            Self::Event => ValueKind::Event,
        }
    }

    pub fn to_value(self) -> Value {
        match self {
            Self::Str(s) => Value::Str(s.into()),
            Self::Bool(b) => Value::Bool(b),
            Self::Byte(v) => Value::Byte(v),
            Self::Uint16(v) => Value::Uint16(v),
            Self::Int16(v) => Value::Int16(v),
            Self::Int32(v) => Value::Int32(v),
            Self::Int64(v) => Value::Int64(v),
            Self::Event => Value::Event(0),
        }
    }
}

/// One row of a static variable definition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VarDef {
    pub name: &'static str,
    pub default: DefaultValue,
}

impl VarDef {
    pub const fn new(name: &'static str, default: DefaultValue) -> Self {
        Self { name, default }
    }

    pub const fn kind(&self) -> ValueKind {
        self.default.kind()
    }
}
