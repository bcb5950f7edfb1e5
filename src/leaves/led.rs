//! Status LED leaf.
//!
//! The pin follows `<leaf>_on` gated by the `<leaf>_duty` setting: the LED
//! is lit while `on` is true and `duty` is non-zero.  Both cells share one
//! change work item, so the pin is only touched from the work queue.
//! `<leaf>_blinks` counts off→lit transitions.

use core::fmt::Write as _;
use core::marker::PhantomData;
use std::sync::{Arc, Weak};

use embedded_hal::digital::{Error as _, OutputPin};
use log::{debug, error, info};

use crate::error::{Error, Result};
use crate::leaf::{Leaf, LeafCallbacks};
use crate::registry::Registry;
use crate::shell::LeafCommand;
use crate::value::{DefaultValue, VarDef};
use crate::variable::{Variable, VariableRef};

pub const LED_DEFAULT_DUTY: u8 = 50;

pub static LED_SETTINGS: &[VarDef] = &[VarDef::new("duty", DefaultValue::Byte(LED_DEFAULT_DUTY))];

pub static LED_VALUES: &[VarDef] = &[
    VarDef::new("ok", DefaultValue::Bool(false)),
    VarDef::new("on", DefaultValue::Bool(false)),
    VarDef::new("blinks", DefaultValue::Int64(0)),
];

const VALUE_OK: usize = 0;
const VALUE_ON: usize = 1;
const VALUE_BLINKS: usize = 2;

/// Per-instance state, stored as the leaf context.
pub struct LedContext<P> {
    pin: P,
    duty: Option<VariableRef>,
    values: Vec<VariableRef>,
    lit: bool,
}

impl<P: OutputPin> LedContext<P> {
    pub fn new(pin: P) -> Self {
        Self {
            pin,
            duty: None,
            values: Vec::new(),
            lit: false,
        }
    }

    pub fn is_lit(&self) -> bool {
        self.lit
    }

    fn wanted(&self) -> bool {
        let on = self.values.get(VALUE_ON).and_then(|v| v.get_bool().ok()).unwrap_or(false);
        let duty = self.duty.as_ref().and_then(|v| v.get_byte().ok()).unwrap_or(0);
        on && duty > 0
    }

    fn drive(&mut self, lit: bool) -> Result<()> {
        let rc = if lit { self.pin.set_high() } else { self.pin.set_low() };
        rc.map_err(|e| {
            error!("LED pin write failed ({:?})", e.kind());
            Error::Io
        })?;
        self.lit = lit;
        Ok(())
    }

    /// Bring the pin in line with the variables.
    pub fn apply(&mut self) -> Result<()> {
        let lit = self.wanted();
        if lit == self.lit {
            return Ok(());
        }
        debug!("LED {}", if lit { "on" } else { "off" });
        self.drive(lit)?;
        if lit {
            self.values[VALUE_BLINKS].inc_i64(1)?;
        }
        Ok(())
    }

    /// Force the pin low without touching `on`.
    pub fn dark(&mut self) -> Result<()> {
        self.drive(false)
    }
}

/// Class callbacks for LEDs on pin type `P`.
pub struct Led<P> {
    _pin: PhantomData<fn() -> P>,
}

impl<P> Default for Led<P> {
    fn default() -> Self {
        Self { _pin: PhantomData }
    }
}

impl<P> Led<P> {
    pub fn new() -> Self {
        Self::default()
    }
}

fn with_ctx<P: OutputPin + Send + 'static, R>(
    leaf: &Leaf,
    f: impl FnOnce(&mut LedContext<P>) -> Result<R>,
) -> Result<R> {
    leaf.context(f).unwrap_or(Err(Error::DeviceUnavailable))
}

impl<P: OutputPin + Send + 'static> LeafCallbacks for Led<P> {
    fn init(&self, leaf: &Arc<Leaf>, registry: &Registry) -> Result<()> {
        // a re-init keeps the cells and subscriber of the first pass
        if with_ctx(leaf, |ctx: &mut LedContext<P>| Ok(ctx.values.is_empty()))? {
            let mut settings = Variable::dup_defs(LED_SETTINGS, leaf.name())?;
            let values = Variable::dup_defs(LED_VALUES, leaf.name())?;
            registry.register_settings(&settings);
            registry.register_variables(&values);

            let weak: Weak<Leaf> = Arc::downgrade(leaf);
            let change = registry.work_queue().work_item("led_change", move || {
                let Some(leaf) = weak.upgrade() else {
                    return;
                };
                if !leaf.is_running() {
                    return;
                }
                if let Some(Err(e)) = leaf.context(|ctx: &mut LedContext<P>| ctx.apply()) {
                    error!("{}: {}", leaf.name(), e);
                }
            });
            values[VALUE_ON].set_onchange(change.clone())?;
            settings[0].set_onchange(change)?;

            with_ctx(leaf, |ctx: &mut LedContext<P>| {
                ctx.duty = settings.pop();
                ctx.values = values;
                Ok(())
            })?;
        }

        with_ctx(leaf, |ctx: &mut LedContext<P>| {
            ctx.dark()?;
            ctx.values[VALUE_OK].set_bool(true)?;
            info!("LED {} ready", leaf.name());
            Ok(())
        })
        .inspect_err(|_| error!("LED device '{}' not configured", leaf.name()))?;

        let weak = Arc::downgrade(leaf);
        registry.register_command(LeafCommand::new(leaf.name(), "Control status led", move |_, args, out| {
            let Some(leaf) = weak.upgrade() else {
                return Error::DeviceUnavailable.errno();
            };
            led_command::<P>(&leaf, args, out)
        }))
    }

    fn start(&self, leaf: &Arc<Leaf>, _registry: &Registry) -> Result<()> {
        with_ctx(leaf, |ctx: &mut LedContext<P>| ctx.apply())
    }

    fn stop(&self, leaf: &Arc<Leaf>, _registry: &Registry) -> Result<()> {
        with_ctx(leaf, |ctx: &mut LedContext<P>| ctx.dark())
    }

    fn pre_sleep(&self, leaf: &Arc<Leaf>, _registry: &Registry) -> Result<()> {
        with_ctx(leaf, |ctx: &mut LedContext<P>| ctx.dark())
    }

    fn post_sleep(&self, leaf: &Arc<Leaf>, _registry: &Registry) -> Result<()> {
        if !leaf.is_running() {
            return Ok(());
        }
        with_ctx(leaf, |ctx: &mut LedContext<P>| ctx.apply())
    }
}

fn led_command<P: OutputPin + Send + 'static>(leaf: &Leaf, args: &[&str], out: &mut dyn core::fmt::Write) -> i32 {
    let rc = with_ctx(leaf, |ctx: &mut LedContext<P>| {
        match args {
            ["on"] => ctx.values[VALUE_ON].set_bool(true)?,
            ["off"] => ctx.values[VALUE_ON].set_bool(false)?,
            ["duty", text] => {
                if let Some(duty) = &ctx.duty {
                    duty.set_from_str(text)?;
                }
            }
            _ => {}
        }
        let duty = ctx.duty.as_ref().map_or(0, |d| d.get_byte().unwrap_or(0));
        let _ = writeln!(
            out,
            "{} lit={} duty={} blinks={}",
            leaf.name(),
            ctx.lit,
            duty,
            ctx.values[VALUE_BLINKS].get_i64()?
        );
        Ok(())
    });
    rc.map_or_else(Error::errno, |()| 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::leaf::LeafClass;
    use embedded_hal_mock::eh1::digital::{Mock as PinMock, State, Transaction as PinTransaction};

    fn led(expectations: &[PinTransaction]) -> (Registry, Arc<Leaf>, PinMock) {
        let pin = PinMock::new(expectations);
        let class = LeafClass::new("led", Led::<PinMock>::new());
        let leaf = Leaf::with_context("led0", &class, LedContext::new(pin.clone()));
        (Registry::default(), leaf, pin)
    }

    #[test]
    fn init_drives_pin_low() {
        let (r, leaf, mut pin) = led(&[PinTransaction::set(State::Low)]);
        r.sys_init(&leaf).unwrap();
        assert_eq!(r.find_variable("led0_ok").unwrap().get_bool(), Ok(true));
        assert_eq!(r.find_setting("led0_duty").unwrap().get_byte(), Ok(LED_DEFAULT_DUTY));
        assert!(r.find_variable("led0_on").unwrap().has_onchange());
        pin.done();
    }

    #[test]
    fn on_change_lights_and_counts() {
        let (r, leaf, mut pin) = led(&[
            PinTransaction::set(State::Low),
            PinTransaction::set(State::High),
            PinTransaction::set(State::Low),
        ]);
        r.sys_init(&leaf).unwrap();
        r.sys_start(&leaf).unwrap();

        let on = r.find_variable("led0_on").unwrap();
        on.set_bool(true).unwrap();
        assert_eq!(r.work_queue().run_pending(), 1);
        assert_eq!(r.find_variable("led0_blinks").unwrap().get_i64(), Ok(1));

        // duty 0 gates the LED off
        r.find_setting("led0_duty").unwrap().set_byte(0).unwrap();
        assert_eq!(r.work_queue().run_pending(), 1);
        assert_eq!(leaf.context(|c: &mut LedContext<PinMock>| c.is_lit()), Some(false));
        pin.done();
    }

    #[test]
    fn stopped_led_ignores_changes() {
        let (r, leaf, mut pin) = led(&[PinTransaction::set(State::Low)]);
        r.sys_init(&leaf).unwrap();
        r.find_variable("led0_on").unwrap().set_bool(true).unwrap();
        r.work_queue().run_pending();
        pin.done();
    }

    #[test]
    fn missing_pin_context_fails_init() {
        let class = LeafClass::new("led", Led::<PinMock>::new());
        let leaf = Leaf::new("led1", &class);
        let r = Registry::default();
        assert_eq!(r.sys_init(&leaf), Err(Error::DeviceUnavailable));
    }

    #[test]
    fn shell_on_reports_state() {
        let (r, leaf, mut pin) = led(&[PinTransaction::set(State::Low), PinTransaction::set(State::High)]);
        r.sys_init(&leaf).unwrap();
        r.sys_start(&leaf).unwrap();
        let mut out = String::new();
        assert_eq!(crate::shell::execute_line(&r, "led0 on", &mut out), 0);
        r.work_queue().run_pending();
        out.clear();
        crate::shell::execute_line(&r, "leaf led0 show", &mut out);
        assert_eq!(out.trim(), "led0 lit=true duty=50 blinks=1");
        pin.done();
    }
}
