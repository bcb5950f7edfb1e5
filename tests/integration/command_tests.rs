//! Text shell over a booted registry with every reference leaf.

use embedded_hal_mock::eh1::digital::{Mock as PinMock, State, Transaction as PinTransaction};
use embedded_hal_mock::eh1::i2c::{Mock as I2cMock, Transaction as I2cTransaction};

use leafcore::leaves::keypad::{KP_EVENT_PRESS, Keypad, KeypadContext};
use leafcore::leaves::led::{Led, LedContext};
use leafcore::leaves::settings::{SETTINGS_CLASS, SettingsContext, SettingsLeaf};
use leafcore::shell::execute_line;
use leafcore::{BootTable, LeafClass, Registry};

use crate::mock_store::MockStore;

struct Rig {
    registry: Registry,
    store: MockStore,
    pin: PinMock,
    bus: I2cMock,
}

impl Rig {
    fn boot(pin: &[PinTransaction], bus: &[I2cTransaction]) -> Self {
        let rig = Self {
            registry: Registry::default(),
            store: MockStore::new(),
            pin: PinMock::new(pin),
            bus: I2cMock::new(bus),
        };
        let settings = LeafClass::new(SETTINGS_CLASS, SettingsLeaf);
        let led = LeafClass::new("led", Led::<PinMock>::new());
        let kp = LeafClass::with_parent("kp_pcf8574", "keypad", Keypad::<I2cMock>::new());

        let mut boot = BootTable::new();
        boot.define_class(&settings).define_class(&led).define_class(&kp);
        boot.define_leaf_with(&led, "led0", LedContext::new(rig.pin.clone()));
        boot.define_leaf_with(&kp, "kp0", KeypadContext::new(rig.bus.clone()));
        boot.define_leaf_with(&settings, "settings", SettingsContext::new(rig.store.clone()));
        let report = boot.run(&rig.registry);
        assert!(report.is_clean(), "{:?}", report.failures);
        // drop the first keypad poll queued by start
        rig.registry.work_queue().shutdown();
        rig
    }

    fn run(&self, line: &str) -> (i32, String) {
        let mut out = String::new();
        let rc = execute_line(&self.registry, line, &mut out);
        (rc, out)
    }

    fn done(mut self) {
        self.pin.done();
        self.bus.done();
    }
}

fn quiet_rig() -> Rig {
    Rig::boot(
        &[PinTransaction::set(State::Low)],
        &[I2cTransaction::write(0x20, vec![0xFF])],
    )
}

#[test]
fn status_lists_every_leaf() {
    let rig = quiet_rig();
    let (rc, out) = rig.run("status");
    assert_eq!(rc, 0);
    assert!(out.starts_with("registry is initialised"));
    assert!(out.contains("led0: READY RUNNING"));
    assert!(out.contains("kp0: READY RUNNING"));
    assert!(out.contains("settings: READY RUNNING"));
    rig.done();
}

#[test]
fn value_get_and_set() {
    let rig = quiet_rig();
    assert_eq!(rig.run("value get kp0_pins"), (0, "kp0_pins=(byte)[255]\n".into()));
    assert_eq!(rig.run("value set kp0_pins 12"), (0, "kp0_pins=(byte)[12]\n".into()));
    assert_eq!(rig.run("value get nope"), (-2, "No value named 'nope'\n".into()));
    assert_eq!(
        rig.run("value set kp0_pins lots"),
        (-22, "Value update failed for 'kp0_pins'\n".into())
    );
    // settings are not variables
    assert_eq!(rig.run("value get kp0_addr").0, -2);
    rig.done();
}

#[test]
fn setting_set_persists_leaf_settings() {
    let rig = quiet_rig();
    let (rc, out) = rig.run("setting set kp0_interval 75");
    assert_eq!(rc, 0);
    assert_eq!(out, "updated: kp0_interval=(int32)[75]\n");
    assert_eq!(rig.store.raw("app", "kp0_interval").unwrap(), 75i32.to_le_bytes());

    let (rc, out) = rig.run("setting set kp0_interval soon");
    assert_eq!(rc, -22);
    assert_eq!(out, "Setting update failed for 'kp0_interval': error -22\n");
    assert_eq!(rig.run("setting get missing").0, -2);
    rig.done();
}

#[test]
fn leaf_table_lists_registered_commands() {
    let rig = quiet_rig();
    let (rc, out) = rig.run("leaf");
    assert_eq!(rc, 0);
    assert_eq!(out, "kp0\nled0\nsetting\n");
    assert_eq!(rig.run("leaf nope").0, -2);
    rig.done();
}

#[test]
fn keypad_scan_from_shell_posts_press() {
    let rig = Rig::boot(
        &[PinTransaction::set(State::Low)],
        &[
            I2cTransaction::write(0x20, vec![0xFF]),
            I2cTransaction::read(0x20, vec![0x7F]),
        ],
    );
    assert_eq!(rig.run("kp0 scan").0, 0);
    let event = rig.registry.find_variable("kp0_event").unwrap();
    assert_eq!(event.event_flags().unwrap().bits(), KP_EVENT_PRESS | 0x80);
    let (_, out) = rig.run("kp0 show");
    assert_eq!(out, "kp0 at 20 interval=50 pins=7f\n");
    rig.done();
}

#[test]
fn init_of_unknown_leaf_is_not_found() {
    let rig = quiet_rig();
    assert_eq!(rig.run("init ghost"), (-2, "No leaf named 'ghost'\n".into()));
    assert_eq!(rig.run("stop kp0"), (0, "stopped\n".into()));
    assert!(!rig.registry.leaf_is_running("kp0"));
    rig.done();
}
