//! Leafcore firmware: reference boot of the settings, LED and keypad leaves.
//!
//! ```text
//!  prio 25  register classes      settings · led · keypad
//!  prio 50  init leaves           led0 · kp0 · settings
//!  prio 60  app init              worker thread
//!  prio 75  start leaves          led0 · kp0 · settings (loads NVS)
//!  prio 90  app start             identity banner, heartbeat LED on
//! ```
//!
//! After boot the main thread serves the text shell on the console UART.
#![deny(unused_must_use)]

use std::io::BufRead;

use anyhow::Result;
use esp_idf_hal::gpio::{Gpio2, Output, PinDriver};
use esp_idf_hal::i2c::{I2cConfig, I2cDriver};
use esp_idf_hal::peripherals::Peripherals;
use esp_idf_hal::units::FromValueType;
use log::{info, warn};

use leafcore::adapters::nvs::NvsAdapter;
use leafcore::leaves::keypad::{Keypad, KeypadContext};
use leafcore::leaves::led::{Led, LedContext};
use leafcore::leaves::settings::{SettingsContext, SettingsLeaf, SETTINGS_CLASS};
use leafcore::{shell, BootPhase, BootTable, CoreConfig, LeafClass, Registry};

fn main() -> Result<()> {
    // ── 1. ESP-IDF bootstrap ──────────────────────────────────
    esp_idf_svc::sys::link_patches();
    esp_idf_logger::init()?;

    info!("Leafcore v{}", env!("CARGO_PKG_VERSION"));

    // ── 2. Peripherals ────────────────────────────────────────
    let peripherals = Peripherals::take()?;
    let led_pin = PinDriver::output(peripherals.pins.gpio2)?;
    let i2c = I2cDriver::new(
        peripherals.i2c0,
        peripherals.pins.gpio21,
        peripherals.pins.gpio22,
        &I2cConfig::new().baudrate(100.kHz().into()),
    )?;

    let nvs = NvsAdapter::new().unwrap_or_else(|e| {
        warn!("NVS init failed ({}), settings will not persist", e);
        NvsAdapter::default()
    });
    let config = CoreConfig::load(&nvs);
    let registry = Registry::new(config);

    // ── 3. Boot table ─────────────────────────────────────────
    let settings_class = LeafClass::new(SETTINGS_CLASS, SettingsLeaf);
    let led_class = LeafClass::new("led", Led::<PinDriver<'static, Gpio2, Output>>::new());
    let kp_class = LeafClass::with_parent("kp_pcf8574", "keypad", Keypad::<I2cDriver<'static>>::new());

    let mut boot = BootTable::new();
    boot.define_class(&settings_class)
        .define_class(&led_class)
        .define_class(&kp_class);
    boot.define_leaf_with(&led_class, "led0", LedContext::new(led_pin));
    boot.define_leaf_with(&kp_class, "kp0", KeypadContext::new(i2c));
    // last, so every other leaf has registered its settings before the load
    boot.define_leaf_with(&settings_class, "settings", SettingsContext::new(nvs));

    boot.hook(BootPhase::APP_INIT, "workq", |r| {
        r.work_queue().spawn_configured("leaf_workq", r.config()).map(|_| ()).map_err(|e| {
            warn!("work queue thread: {}", e);
            leafcore::Error::AllocationFailure
        })
    });
    boot.hook(BootPhase::APP_START, "banner", |r| {
        let id = r.identity();
        info!("Device {} ({})", id.name(), id.hex());
        r.find_variable("led0_on")
            .map_or(Ok(()), |on| on.set_bool(true))
    });

    let report = boot.run(&registry);
    if !report.is_clean() {
        for (label, e) in &report.failures {
            warn!("boot step {} failed: {}", label, e);
        }
    }

    // ── 4. Console shell ──────────────────────────────────────
    let mut out = String::new();
    for line in std::io::stdin().lock().lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        out.clear();
        let rc = shell::execute_line(&registry, &line, &mut out);
        print!("{out}");
        if rc != 0 {
            println!("rc={rc}");
        }
    }
    Ok(())
}
