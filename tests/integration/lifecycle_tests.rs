//! Boot sequence and lifecycle state across many leaves.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use leafcore::{BootPhase, BootTable, Error, Leaf, LeafCallbacks, LeafClass, Registry, Result};

// ── Scripted class ────────────────────────────────────────────

/// Class whose init/start outcome is decided per leaf name.
struct Scripted {
    fail_init: &'static [&'static str],
    fail_start: &'static [&'static str],
    sleeps: Arc<AtomicUsize>,
}

impl LeafCallbacks for Scripted {
    fn init(&self, leaf: &Arc<Leaf>, _: &Registry) -> Result<()> {
        if self.fail_init.contains(&leaf.name()) {
            return Err(Error::DeviceUnavailable);
        }
        Ok(())
    }

    fn start(&self, leaf: &Arc<Leaf>, _: &Registry) -> Result<()> {
        if self.fail_start.contains(&leaf.name()) {
            return Err(Error::Io);
        }
        Ok(())
    }

    fn pre_sleep(&self, leaf: &Arc<Leaf>, _: &Registry) -> Result<()> {
        self.sleeps.fetch_add(1, Ordering::SeqCst);
        if leaf.name().ends_with("_1") {
            return Err(Error::NotReady);
        }
        Ok(())
    }
}

#[test]
fn led0_boots_ready_and_running() {
    let registry = Registry::default();
    let led = LeafClass::new("led", leafcore::leaf::NoCallbacks);
    let mut boot = BootTable::new();
    boot.define_class(&led);
    boot.define_leaf(&led, "led0");

    let report = boot.run(&registry);
    assert!(report.is_clean(), "{:?}", report.failures);
    assert!(registry.leaf_is_ready("led0"));
    assert!(registry.leaf_is_running("led0"));
}

#[test]
fn ready_and_running_follow_callbacks_across_classes() {
    const FAIL_INIT: &[&str] = &["c0_1", "c1_2", "c2_0"];
    const FAIL_START: &[&str] = &["c0_2", "c2_1"];

    let registry = Registry::default();
    let sleeps = Arc::new(AtomicUsize::new(0));
    let mut boot = BootTable::new();
    let mut names = Vec::new();

    for c in 0..3 {
        let class = LeafClass::new(
            &format!("class{c}"),
            Scripted {
                fail_init: FAIL_INIT,
                fail_start: FAIL_START,
                sleeps: Arc::clone(&sleeps),
            },
        );
        boot.define_class(&class);
        for l in 0..4 {
            let name = format!("c{c}_{l}");
            boot.define_leaf(&class, &name);
            names.push(name);
        }
    }

    let report = boot.run(&registry);
    // every failed init also fails its start step
    assert_eq!(report.failures.len(), FAIL_INIT.len() * 2 + FAIL_START.len());

    for name in &names {
        let ready = !FAIL_INIT.contains(&name.as_str());
        let running = ready && !FAIL_START.contains(&name.as_str());
        assert_eq!(registry.leaf_is_ready(name), ready, "{name} ready");
        assert_eq!(registry.leaf_is_running(name), running, "{name} running");
        assert!(!registry.leaf_is_running(name) || registry.leaf_is_ready(name));
    }

    // fan-out reaches every leaf and reports the last failure
    assert_eq!(registry.pre_sleep(), Err(Error::NotReady));
    assert_eq!(sleeps.load(Ordering::SeqCst), names.len());
}

#[test]
fn boot_runs_in_priority_order() {
    let registry = Registry::default();
    let order = Arc::new(std::sync::Mutex::new(Vec::new()));
    let mut boot = BootTable::new();

    for (prio, label) in [
        (BootPhase::APP_START, "app_start"),
        (BootPhase::APP_INIT, "app_init"),
        (BootPhase::APP_INIT, "app_init_2"),
    ] {
        let order = Arc::clone(&order);
        boot.hook(prio, label, move |_| {
            order.lock().unwrap().push(label);
            Ok(())
        });
    }
    let led = LeafClass::new("led", leafcore::leaf::NoCallbacks);
    boot.define_leaf(&led, "led0");
    {
        let order = Arc::clone(&order);
        boot.hook(BootPhase::LEAF_START + 1, "after_start", move |r| {
            assert!(r.leaf_is_running("led0"));
            order.lock().unwrap().push("after_start");
            Ok(())
        });
    }

    assert!(boot.run(&registry).is_clean());
    assert_eq!(
        *order.lock().unwrap(),
        ["app_init", "app_init_2", "after_start", "app_start"]
    );
}

#[test]
fn stop_and_restart_by_name() {
    let registry = Registry::default();
    let led = LeafClass::new("led", leafcore::leaf::NoCallbacks);
    let mut boot = BootTable::new();
    boot.define_leaf(&led, "led0");
    boot.run(&registry);

    registry.stop("led0").unwrap();
    assert!(registry.leaf_is_ready("led0"));
    assert!(!registry.leaf_is_running("led0"));
    registry.start("led0").unwrap();
    assert!(registry.leaf_is_running("led0"));

    assert_eq!(registry.start("nope"), Err(Error::NotFound));
    assert!(!registry.leaf_is_ready("nope"));
}
