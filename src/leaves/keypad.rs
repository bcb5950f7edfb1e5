//! PCF8574 eight-key keypad leaf.
//!
//! Every instance duplicates the definition tables under its own name, so
//! `kp0` owns `kp0_ok`, `kp0_pins`, `kp0_event` and the settings `kp0_addr`,
//! `kp0_interval`.
//!
//! A delayed work item polls the expander every `interval` ms.  Keys pull
//! their pin low; each changed pin replaces the event bits with
//! `KP_EVENT_PRESS | key` or `KP_EVENT_RELEASE | key`.

use core::fmt::Write as _;
use core::marker::PhantomData;
use std::sync::{Arc, Weak};
use std::time::Duration;

use embedded_hal::i2c::{Error as _, I2c};
use log::{debug, error, info};

use crate::error::{Error, Result};
use crate::leaf::{Leaf, LeafCallbacks};
use crate::registry::Registry;
use crate::shell::LeafCommand;
use crate::value::{DefaultValue, VarDef};
use crate::variable::{Variable, VariableRef};
use crate::workq::WorkItem;

pub const KP_EVENT_PRESS: u32 = 0x0800_0000;
pub const KP_EVENT_RELEASE: u32 = 0x0400_0000;

/// Factory I2C address of a PCF8574.
pub const KP_DEFAULT_ADDR: u16 = 0x20;
/// Factory poll interval (ms).
pub const KP_DEFAULT_INTERVAL: i32 = 50;

const SETTING_ADDR: usize = 0;
const SETTING_INTERVAL: usize = 1;

const VALUE_OK: usize = 0;
const VALUE_PINS: usize = 1;
const VALUE_EVENT: usize = 2;

pub static KP_SETTINGS: &[VarDef] = &[
    VarDef::new("addr", DefaultValue::Uint16(KP_DEFAULT_ADDR)),
    VarDef::new("interval", DefaultValue::Int32(KP_DEFAULT_INTERVAL)),
];

pub static KP_VALUES: &[VarDef] = &[
    VarDef::new("ok", DefaultValue::Bool(false)),
    VarDef::new("pins", DefaultValue::Byte(0xFF)),
    VarDef::new("event", DefaultValue::Event),
];

/// Per-instance state, stored as the leaf context.
pub struct KeypadContext<I2C> {
    bus: I2C,
    settings: Vec<VariableRef>,
    values: Vec<VariableRef>,
    scan: Option<WorkItem>,
    scanning: bool,
}

impl<I2C: I2c> KeypadContext<I2C> {
    pub fn new(bus: I2C) -> Self {
        Self {
            bus,
            settings: Vec::new(),
            values: Vec::new(),
            scan: None,
            scanning: false,
        }
    }

    /// 7-bit bus address from the `addr` setting.
    fn addr(&self) -> Result<u8> {
        let raw = self.settings[SETTING_ADDR].get_u16().unwrap_or(KP_DEFAULT_ADDR);
        match u8::try_from(raw) {
            Ok(addr) if addr <= 0x7F => Ok(addr),
            _ => {
                error!("Keypad address {:#x} is not a 7-bit address", raw);
                Err(Error::InvalidValue)
            }
        }
    }

    fn interval(&self) -> Duration {
        let ms = self.settings[SETTING_INTERVAL]
            .get_i32()
            .unwrap_or(KP_DEFAULT_INTERVAL)
            .max(1);
        Duration::from_millis(ms as u64)
    }

    /// Read the expander once and publish pin changes.
    pub fn scan_once(&mut self) -> Result<()> {
        let mut buf = [0xFFu8];
        let addr = self.addr()?;
        self.bus.read(addr, &mut buf).map_err(|e| {
            error!("i2c read error {:?}", e.kind());
            Error::Io
        })?;

        let pins = &self.values[VALUE_PINS];
        let was = pins.get_byte()?;
        let now = buf[0];
        if now == was {
            return Ok(());
        }
        debug!("Keypad change {:02x} => {:02x}", was, now);
        pins.set_byte(now)?;

        let event = &self.values[VALUE_EVENT];
        for bit in 0..8 {
            let mask = 1u8 << bit;
            if was & mask == now & mask {
                continue;
            }
            if now & mask == 0 {
                info!("Button {} press", bit);
                event.set_event(KP_EVENT_PRESS | u32::from(mask))?;
            } else {
                debug!("Button {} release", bit);
                event.set_event(KP_EVENT_RELEASE | u32::from(mask))?;
            }
        }
        Ok(())
    }

    fn scan_tick(&mut self) {
        if let Err(e) = self.scan_once() {
            debug!("scan failed: {}", e);
        }
        if self.scanning {
            if let Some(scan) = &self.scan {
                scan.schedule(self.interval());
            }
        }
    }

    fn start_scan(&mut self) {
        self.scanning = true;
        if let Some(scan) = &self.scan {
            scan.reschedule(Duration::ZERO);
        }
    }

    fn stop_scan(&mut self) {
        self.scanning = false;
        if let Some(scan) = &self.scan {
            scan.cancel();
        }
    }
}

/// Class callbacks for keypads on bus type `I2C`.
pub struct Keypad<I2C> {
    _bus: PhantomData<fn() -> I2C>,
}

impl<I2C> Default for Keypad<I2C> {
    fn default() -> Self {
        Self { _bus: PhantomData }
    }
}

impl<I2C> Keypad<I2C> {
    pub fn new() -> Self {
        Self::default()
    }
}

fn with_ctx<I2C: I2c + Send + 'static, R>(
    leaf: &Leaf,
    f: impl FnOnce(&mut KeypadContext<I2C>) -> Result<R>,
) -> Result<R> {
    leaf.context(f).unwrap_or_else(|| {
        error!("Did not find leaf context for {}", leaf.name());
        Err(Error::DeviceUnavailable)
    })
}

impl<I2C: I2c + Send + 'static> LeafCallbacks for Keypad<I2C> {
    fn init(&self, leaf: &Arc<Leaf>, registry: &Registry) -> Result<()> {
        info!("keypad init {}", leaf.name());
        let fresh = with_ctx(leaf, |ctx: &mut KeypadContext<I2C>| Ok(ctx.values.is_empty()))?;
        let cells = if fresh {
            let settings = Variable::dup_defs(KP_SETTINGS, leaf.name())?;
            let values = Variable::dup_defs(KP_VALUES, leaf.name())?;
            registry.register_settings(&settings);
            registry.register_variables(&values);

            let weak: Weak<Leaf> = Arc::downgrade(leaf);
            let scan = registry.work_queue().work_item("kp_scan", move || {
                let Some(leaf) = weak.upgrade() else {
                    error!("kp not found");
                    return;
                };
                leaf.context(|ctx: &mut KeypadContext<I2C>| ctx.scan_tick());
            });
            Some((settings, values, scan))
        } else {
            None
        };

        with_ctx(leaf, |ctx: &mut KeypadContext<I2C>| {
            if let Some((settings, values, scan)) = cells {
                ctx.settings = settings;
                ctx.values = values;
                ctx.scan = Some(scan);
            }

            // all pins high: inputs with pull-up
            let addr = ctx.addr()?;
            ctx.bus.write(addr, &[0xFF]).map_err(|e| {
                error!("Failed to configure PCF8574 pins for input ({:?})", e.kind());
                Error::DeviceUnavailable
            })?;
            ctx.values[VALUE_OK].set_bool(true)?;
            info!("Keypad {} at {:#04x}", leaf.name(), addr);
            Ok(())
        })?;

        let weak = Arc::downgrade(leaf);
        registry.register_command(LeafCommand::new(leaf.name(), "Control keypad", move |_, args, out| {
            let Some(leaf) = weak.upgrade() else {
                return Error::DeviceUnavailable.errno();
            };
            keypad_command::<I2C>(&leaf, args, out)
        }))
    }

    fn start(&self, leaf: &Arc<Leaf>, _registry: &Registry) -> Result<()> {
        info!("keypad start {}", leaf.name());
        with_ctx(leaf, |ctx: &mut KeypadContext<I2C>| {
            ctx.start_scan();
            Ok(())
        })
    }

    fn stop(&self, leaf: &Arc<Leaf>, _registry: &Registry) -> Result<()> {
        info!("keypad stop {}", leaf.name());
        with_ctx(leaf, |ctx: &mut KeypadContext<I2C>| {
            ctx.stop_scan();
            Ok(())
        })
    }
}

fn keypad_command<I2C: I2c + Send + 'static>(leaf: &Leaf, args: &[&str], out: &mut dyn core::fmt::Write) -> i32 {
    let rc = with_ctx(leaf, |ctx: &mut KeypadContext<I2C>| {
        match args {
            ["scan"] => {
                info!("Doing immediate scan");
                ctx.scan_once()?;
            }
            ["stop"] => ctx.stop_scan(),
            ["start"] => ctx.start_scan(),
            ["addr", v @ ..] => {
                if let [text] = v {
                    ctx.settings[SETTING_ADDR].set_from_str(text)?;
                }
                let _ = writeln!(out, "{} addr={}", leaf.name(), ctx.addr()?);
            }
            ["interval", v @ ..] => {
                if let [text] = v {
                    ctx.settings[SETTING_INTERVAL].set_from_str(text)?;
                }
                let _ = writeln!(out, "{} interval={}", leaf.name(), ctx.interval().as_millis());
            }
            _ => {
                let _ = writeln!(
                    out,
                    "{} at {:02x} interval={} pins={:02x}",
                    leaf.name(),
                    ctx.addr()?,
                    ctx.interval().as_millis(),
                    ctx.values[VALUE_PINS].get_byte()?
                );
            }
        }
        Ok(())
    });
    rc.map_or_else(Error::errno, |()| 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::leaf::LeafClass;
    use embedded_hal::i2c::ErrorKind;
    use embedded_hal_mock::eh1::i2c::{Mock as I2cMock, Transaction as I2cTransaction};

    fn keypad(expectations: &[I2cTransaction]) -> (Registry, Arc<Leaf>, I2cMock) {
        let bus = I2cMock::new(expectations);
        let class = LeafClass::new("kp", Keypad::<I2cMock>::new());
        let leaf = Leaf::with_context("kp0", &class, KeypadContext::new(bus.clone()));
        (Registry::default(), leaf, bus)
    }

    #[test]
    fn init_registers_prefixed_values() {
        let (r, leaf, mut bus) = keypad(&[I2cTransaction::write(0x20, vec![0xFF])]);
        r.sys_init(&leaf).unwrap();
        assert_eq!(r.find_variable("kp0_ok").unwrap().get_bool(), Ok(true));
        assert_eq!(r.find_variable("kp0_pins").unwrap().get_byte(), Ok(0xFF));
        assert_eq!(r.find_setting("kp0_interval").unwrap().get_i32(), Ok(50));
        assert!(r.find_variable("kp0_addr").is_none());
        assert!(r.find_command("kp0").is_some());
        bus.done();
    }

    #[test]
    fn missing_expander_is_device_unavailable() {
        let (r, leaf, mut bus) =
            keypad(&[I2cTransaction::write(0x20, vec![0xFF]).with_error(ErrorKind::Other)]);
        assert_eq!(r.sys_init(&leaf), Err(Error::DeviceUnavailable));
        assert!(!r.leaf_is_ready("kp0"));
        assert_eq!(r.find_variable("kp0_ok").unwrap().get_bool(), Ok(false));
        bus.done();
    }

    #[test]
    fn scan_posts_press_and_release() {
        let (r, leaf, mut bus) = keypad(&[
            I2cTransaction::write(0x20, vec![0xFF]),
            I2cTransaction::read(0x20, vec![0xFE]),
            I2cTransaction::read(0x20, vec![0xFF]),
        ]);
        r.sys_init(&leaf).unwrap();
        let event = r.find_variable("kp0_event").unwrap();

        leaf.context(|ctx: &mut KeypadContext<I2cMock>| ctx.scan_once())
            .unwrap()
            .unwrap();
        assert_eq!(event.event_flags().unwrap().bits(), KP_EVENT_PRESS | 0x01);
        assert_eq!(r.find_variable("kp0_pins").unwrap().get_byte(), Ok(0xFE));

        leaf.context(|ctx: &mut KeypadContext<I2cMock>| ctx.scan_once())
            .unwrap()
            .unwrap();
        assert_eq!(event.event_flags().unwrap().bits(), KP_EVENT_RELEASE | 0x01);
        bus.done();
    }

    #[test]
    fn started_keypad_scans_from_work_queue() {
        let (r, leaf, mut bus) = keypad(&[
            I2cTransaction::write(0x20, vec![0xFF]),
            I2cTransaction::read(0x20, vec![0xFB]),
        ]);
        r.sys_init(&leaf).unwrap();
        r.sys_start(&leaf).unwrap();
        assert_eq!(r.work_queue().run_pending(), 1);
        r.stop("kp0").unwrap();
        assert_eq!(r.work_queue().scheduled_len(), 0);
        assert_eq!(
            r.find_variable("kp0_event").unwrap().event_flags().unwrap().bits(),
            KP_EVENT_PRESS | 0x04
        );
        bus.done();
    }

    #[test]
    fn shell_addr_updates_setting() {
        let (r, leaf, mut bus) = keypad(&[I2cTransaction::write(0x20, vec![0xFF])]);
        r.sys_init(&leaf).unwrap();
        let mut out = String::new();
        assert_eq!(crate::shell::execute_line(&r, "leaf kp0 addr 33", &mut out), 0);
        assert_eq!(out.trim(), "kp0 addr=33");
        assert_eq!(r.find_setting("kp0_addr").unwrap().get_u16(), Ok(33));
        bus.done();
    }

    #[test]
    fn wide_address_is_rejected_not_wrapped() {
        let (r, leaf, mut bus) = keypad(&[I2cTransaction::write(0x20, vec![0xFF])]);
        r.sys_init(&leaf).unwrap();
        let mut out = String::new();
        // 0x120 would wrap to the expander at 0x20
        assert_eq!(crate::shell::execute_line(&r, "leaf kp0 addr 288", &mut out), -22);
        assert_eq!(
            leaf.context(|ctx: &mut KeypadContext<I2cMock>| ctx.scan_once()),
            Some(Err(Error::InvalidValue))
        );
        r.find_setting("kp0_addr").unwrap().set_u16(0x80).unwrap();
        assert_eq!(r.sys_init(&leaf), Err(Error::InvalidValue));
        bus.done();
    }
}
