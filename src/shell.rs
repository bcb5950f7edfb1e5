//! Text command surface.
//!
//! ```text
//! status                      leaf readiness table
//! boot                        re-run registry initialisation
//! init|start|stop <leaf>      drive one leaf
//! value list|show             describe every variable
//! value get <name>
//! value set <name> <text>
//! setting ...                 settings, once the settings leaf registered it
//! leaf [<command> ...]        commands registered by leaves
//! ```
//!
//! Output goes to any `core::fmt::Write` sink.  Every command returns 0 or a
//! negative errno-style code.

use core::fmt::Write;
use std::sync::Arc;

use log::{debug, error};

use crate::config::LEAF_COMMANDS_MAX;
use crate::error::{Error, Result};
use crate::ports::StoragePort;
use crate::registry::Registry;
use crate::settings::SettingsBridge;

const EINVAL: i32 = -22;

/// Handler of a leaf-registered command.  Receives the arguments after the
/// command name.
pub type CommandHandler = Arc<dyn Fn(&Registry, &[&str], &mut dyn Write) -> i32 + Send + Sync>;

/// One entry of the dynamic command table.
#[derive(Clone)]
pub struct LeafCommand {
    pub name: String,
    pub help: String,
    pub handler: CommandHandler,
}

impl core::fmt::Debug for LeafCommand {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("LeafCommand")
            .field("name", &self.name)
            .field("help", &self.help)
            .finish_non_exhaustive()
    }
}

impl LeafCommand {
    pub fn new(
        name: &str,
        help: &str,
        handler: impl Fn(&Registry, &[&str], &mut dyn Write) -> i32 + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            help: help.into(),
            handler: Arc::new(handler),
        }
    }
}

/// Fixed-capacity command table, kept sorted by name for completion.
#[derive(Debug, Default)]
pub struct CommandTable {
    entries: heapless::Vec<LeafCommand, LEAF_COMMANDS_MAX>,
}

impl CommandTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert in name order, replacing an entry of the same name.  A full
    /// table is `AllocationFailure`.
    pub fn insert(&mut self, command: LeafCommand) -> Result<()> {
        debug!("command register {}", command.name);
        if let Some(existing) = self.entries.iter_mut().find(|c| c.name == command.name) {
            *existing = command;
            return Ok(());
        }
        let at = self
            .entries
            .iter()
            .position(|c| c.name > command.name)
            .unwrap_or(self.entries.len());
        self.entries.insert(at, command).map_err(|_| {
            error!("leaf command table is full");
            Error::AllocationFailure
        })
    }

    pub fn find(&self, name: &str) -> Option<&LeafCommand> {
        self.entries.iter().find(|c| c.name == name)
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|c| c.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ───────────────────────────────────────────────────────────────
// Dispatch
// ───────────────────────────────────────────────────────────────

/// Split `line` on whitespace and run it.
pub fn execute_line(registry: &Registry, line: &str, out: &mut dyn Write) -> i32 {
    let args: Vec<&str> = line.split_whitespace().collect();
    execute(registry, &args, out)
}

/// Run one command.  `args[0]` is the command name.
pub fn execute(registry: &Registry, args: &[&str], out: &mut dyn Write) -> i32 {
    debug!("shell {:?}", args);
    let Some((&cmd, rest)) = args.split_first() else {
        usage(out);
        return 0;
    };
    match cmd {
        "status" => cmd_status(registry, out),
        "boot" => cmd_boot(registry, out),
        "init" | "start" | "stop" => cmd_leaf_action(registry, cmd, rest, out),
        "value" => cmd_value(registry, rest, out),
        "leaf" => cmd_leaf(registry, rest, out),
        other => match registry.find_command(other) {
            Some(c) => (c.handler)(registry, rest, out),
            None => {
                usage(out);
                Error::NotFound.errno()
            }
        },
    }
}

fn usage(out: &mut dyn Write) {
    let _ = writeln!(out, "usage: <status|boot|init|start|stop|value|setting|leaf> ...");
}

fn cmd_status(registry: &Registry, out: &mut dyn Write) -> i32 {
    if !registry.is_initialised() {
        let _ = writeln!(out, "registry is not initialised");
        return 0;
    }
    let _ = writeln!(out, "registry is initialised");
    for leaf in registry.leaves() {
        let _ = writeln!(out, "{}", leaf.status_line());
    }
    0
}

fn cmd_boot(registry: &Registry, out: &mut dyn Write) -> i32 {
    match registry.initialise() {
        Ok(()) => {
            let _ = writeln!(out, "booted");
            0
        }
        Err(e) => {
            let _ = writeln!(out, "failed");
            e.errno()
        }
    }
}

fn cmd_leaf_action(registry: &Registry, action: &str, args: &[&str], out: &mut dyn Write) -> i32 {
    let [name] = args else {
        let _ = writeln!(out, "{action} <leaf>");
        return EINVAL;
    };
    let (rc, done) = match action {
        "init" => match registry.find_leaf(name) {
            Some(leaf) => (registry.sys_init(&leaf), "initialised"),
            None => (Err(Error::NotFound), ""),
        },
        "start" => (registry.start(name), "started"),
        _ => (registry.stop(name), "stopped"),
    };
    match rc {
        Ok(()) => {
            let _ = writeln!(out, "{done}");
            0
        }
        Err(Error::NotFound) => {
            let _ = writeln!(out, "No leaf named '{name}'");
            Error::NotFound.errno()
        }
        Err(e) => {
            let _ = writeln!(out, "failed");
            e.errno()
        }
    }
}

fn cmd_value(registry: &Registry, args: &[&str], out: &mut dyn Write) -> i32 {
    match args {
        [] | ["list" | "show"] => {
            for v in registry.variables().snapshot() {
                let _ = writeln!(out, "{}", v.describe());
            }
            0
        }
        ["get", name] => match registry.find_variable(name) {
            Some(v) => {
                let _ = writeln!(out, "{}", v.describe());
                0
            }
            None => {
                let _ = writeln!(out, "No value named '{name}'");
                Error::NotFound.errno()
            }
        },
        ["set", name, text @ ..] if !text.is_empty() => {
            let Some(v) = registry.find_variable(name) else {
                let _ = writeln!(out, "No value named '{name}'");
                return Error::NotFound.errno();
            };
            if v.set_from_str(&text.join(" ")).is_err() {
                let _ = writeln!(out, "Value update failed for '{name}'");
                return EINVAL;
            }
            let _ = writeln!(out, "{}", v.describe());
            0
        }
        _ => {
            let _ = writeln!(out, "value <list|get|set>");
            0
        }
    }
}

fn cmd_leaf(registry: &Registry, args: &[&str], out: &mut dyn Write) -> i32 {
    let Some((&name, rest)) = args.split_first() else {
        for name in registry.command_names() {
            let _ = writeln!(out, "{name}");
        }
        return 0;
    };
    match registry.find_command(name) {
        Some(c) => (c.handler)(registry, rest, out),
        None => {
            let _ = writeln!(out, "No leaf command named '{name}'");
            Error::NotFound.errno()
        }
    }
}

/// The `setting` command, bound to a store by the settings leaf.
pub fn cmd_setting(registry: &Registry, store: &mut dyn StoragePort, args: &[&str], out: &mut dyn Write) -> i32 {
    let bridge = SettingsBridge::new(registry);
    match args {
        [] | ["load"] => match bridge.load(store) {
            Ok(report) => {
                let _ = writeln!(out, "loaded {}, skipped {}", report.loaded, report.skipped);
                0
            }
            Err(e) => {
                let _ = writeln!(out, "load failed: {e}");
                e.errno()
            }
        },
        ["show"] => {
            for s in registry.settings().snapshot() {
                let _ = writeln!(out, "{}", s.describe());
            }
            0
        }
        ["list"] => match bridge.list_stored(store) {
            Ok(entries) => {
                for e in entries {
                    let _ = write!(out, "    {} len={} ", bridge.storage_key(&e.key), e.value.len());
                    for b in &e.value {
                        let _ = write!(out, "{b:02x} ");
                    }
                    let _ = writeln!(out);
                }
                0
            }
            Err(e) => {
                let _ = writeln!(out, "list failed: {e}");
                e.errno()
            }
        },
        ["save"] => match bridge.save_all(store) {
            Ok(n) => {
                let _ = writeln!(out, "saved {n}");
                0
            }
            Err(e) => {
                let _ = writeln!(out, "save failed: {e}");
                e.errno()
            }
        },
        ["get", name] => match registry.find_setting(name) {
            Some(s) => {
                let _ = writeln!(out, "{}", s.describe());
                0
            }
            None => {
                let _ = writeln!(out, "No setting named '{name}'");
                Error::NotFound.errno()
            }
        },
        ["set", name, text @ ..] if !text.is_empty() => {
            let Some(s) = registry.find_setting(name) else {
                let _ = writeln!(out, "No setting named '{name}'");
                return Error::NotFound.errno();
            };
            match bridge.set_and_persist(&s, &text.join(" "), store) {
                Ok(()) => {
                    let _ = writeln!(out, "updated: {}", s.describe());
                    0
                }
                Err(e) => {
                    let _ = writeln!(out, "Setting update failed for '{name}': error {}", e.errno());
                    EINVAL
                }
            }
        }
        _ => {
            let _ = writeln!(out, "setting <show|list|load|save|get|set>");
            0
        }
    }
}
