//! Fuzz target: settings decode path.
//!
//! The first byte picks a stored key, the rest is the raw value as it would
//! come out of flash.  `handle_set` must never panic, and a rejected value
//! must leave the setting as it was.
//!
//! cargo fuzz run fuzz_settings_load

#![no_main]

use libfuzzer_sys::fuzz_target;
use leafcore::{Registry, SettingsBridge, Value};

const KEYS: [&str; 9] = [
    "name", "flag", "byte", "u16", "i16", "i32", "i64", "wake", "sub/key",
];

fuzz_target!(|data: &[u8]| {
    let Some((&pick, raw)) = data.split_first() else {
        return;
    };
    let registry = Registry::default();
    for (name, value) in [
        ("name", Value::Str("device".into())),
        ("flag", Value::Bool(false)),
        ("byte", Value::Byte(1)),
        ("u16", Value::Uint16(2)),
        ("i16", Value::Int16(-3)),
        ("i32", Value::Int32(4)),
        ("i64", Value::Int64(-5)),
        ("wake", Value::Event(0)),
    ] {
        let _ = registry.add_setting(name, value);
    }

    let key = KEYS[usize::from(pick) % KEYS.len()];
    let before = registry.find_setting(key).map(|s| s.get());
    let rc = SettingsBridge::new(&registry).handle_set(key, raw);

    if let (Err(_), Some(before)) = (rc, before) {
        let after = registry.find_setting(key).map(|s| s.get());
        assert_eq!(after, Some(before), "rejected value must not change {key}");
    }
});
