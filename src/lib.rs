//! Leafcore: leaf lifecycle registry, typed variables and persistent
//! settings for ESP32 firmware.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  BootTable (priority-ordered class / leaf / app hooks)       │
//! │                                                              │
//! │  Registry ── classes · leaves · variables · settings · cmds  │
//! │     │                                                        │
//! │     ├─ lifecycle: init / start / stop / sleep fan-out        │
//! │     ├─ Variable cells ── on-change ──▶ WorkQueue (worker)    │
//! │     └─ SettingsBridge ── StoragePort ──▶ NvsAdapter          │
//! │                                                              │
//! │  shell (text commands) · adapters::gatt (BLE accessors)      │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Pure logic builds and tests on the host.  ESP-IDF specifics sit behind
//! `#[cfg(target_os = "espidf")]` inside each module.

#![deny(unused_must_use)]

pub mod adapters;
pub mod boot;
pub mod config;
pub mod error;
pub mod event_flags;
pub mod leaf;
pub mod leaves;
pub mod lifecycle;
pub mod ports;
pub mod registry;
pub mod settings;
pub mod shell;
pub mod sync;
pub mod value;
pub mod variable;
pub mod workq;

pub use boot::{BootPhase, BootReport, BootTable};
pub use config::CoreConfig;
pub use error::{Error, Result};
pub use leaf::{Leaf, LeafCallbacks, LeafClass};
pub use registry::Registry;
pub use settings::SettingsBridge;
pub use value::{DefaultValue, Value, ValueKind, VarDef};
pub use variable::{Variable, VariableRef};
pub use workq::{WorkItem, WorkQueue};
