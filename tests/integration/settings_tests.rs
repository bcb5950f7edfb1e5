//! Settings persistence through the settings leaf and a mock store.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use leafcore::leaves::settings::{SETTINGS_CLASS, SettingsContext, SettingsLeaf, with_store};
use leafcore::{BootTable, Error, LeafClass, Registry, SettingsBridge, Value};

use crate::mock_store::MockStore;

/// Registry with the settings used by these tests plus a settings leaf
/// over `store`, booted.
fn boot_with(store: &MockStore) -> (Registry, Arc<leafcore::Leaf>) {
    let registry = Registry::default();
    registry.add_setting("wifi_ssid", Value::Str("none".into())).unwrap();
    registry.add_setting("volume", Value::Byte(3)).unwrap();
    registry.add_setting("offset", Value::Int32(-5)).unwrap();
    registry.add_setting("wake", Value::Event(0)).unwrap();

    let class = LeafClass::new(SETTINGS_CLASS, SettingsLeaf);
    let mut boot = BootTable::new();
    boot.define_class(&class);
    let leaf = boot.define_leaf_with(&class, "settings", SettingsContext::new(store.clone()));
    let report = boot.run(&registry);
    assert!(report.is_clean(), "{:?}", report.failures);
    (registry, leaf)
}

#[test]
fn persisted_values_survive_a_fresh_registry() {
    let store = MockStore::new();
    {
        let (registry, leaf) = boot_with(&store);
        registry.find_setting("wifi_ssid").unwrap().set_string("home-net").unwrap();
        registry.find_setting("offset").unwrap().set_i32(1234).unwrap();
        let saved = with_store(&leaf, |s| SettingsBridge::new(&registry).save_all(s)).unwrap();
        // the event setting is never exported
        assert_eq!(saved, Ok(3));
    }
    assert_eq!(store.raw("app", "wifi_ssid").unwrap(), b"home-net");
    assert!(store.raw("app", "wake").is_none());

    let (registry, _) = boot_with(&store);
    assert_eq!(registry.find_setting("wifi_ssid").unwrap().get_string().unwrap(), "home-net");
    assert_eq!(registry.find_setting("offset").unwrap().get_i32(), Ok(1234));
    assert_eq!(registry.find_setting("volume").unwrap().get_byte(), Ok(3));
}

#[test]
fn load_skips_unknown_and_malformed_keys() {
    let store = MockStore::new();
    store.seed("app", "volume", &[1, 2]);
    store.seed("app", "ghost", &[9]);
    store.seed("app", "nested/key", &[9]);
    store.seed("app", "wake", &[1, 0, 0, 0]);
    store.seed("other", "volume", &[7]);

    let (registry, leaf) = boot_with(&store);
    assert_eq!(registry.find_setting("volume").unwrap().get_byte(), Ok(3));

    let report = with_store(&leaf, |s| SettingsBridge::new(&registry).load(s))
        .unwrap()
        .unwrap();
    // only the sub-path key is accepted
    assert_eq!(report.loaded, 1);
    assert_eq!(report.skipped, 3);
}

#[test]
fn loading_notifies_subscribers() {
    let store = MockStore::new();
    store.seed("app", "volume", &[8]);

    let registry = Registry::default();
    let volume = registry.add_setting("volume", Value::Byte(3)).unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let h = Arc::clone(&hits);
    volume
        .set_onchange(registry.work_queue().work_item("volume", move || {
            h.fetch_add(1, Ordering::SeqCst);
        }))
        .unwrap();

    SettingsBridge::new(&registry).load(&store).unwrap();
    assert_eq!(registry.work_queue().run_pending(), 1);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert_eq!(volume.get_byte(), Ok(8));
}

#[test]
fn failed_write_keeps_new_value_in_memory() {
    let mut store = MockStore::new();
    let registry = Registry::default();
    let volume = registry.add_setting("volume", Value::Byte(3)).unwrap();
    let bridge = SettingsBridge::new(&registry);

    store.fail_writes(true);
    assert_eq!(
        bridge.set_and_persist(&volume, "9", &mut store),
        Err(Error::Storage(leafcore::ports::StorageError::Full))
    );
    assert_eq!(volume.get_byte(), Ok(9));
    assert_eq!(store.writes(), 0);

    store.fail_writes(false);
    assert_eq!(bridge.set_and_persist(&volume, "nine", &mut store), Err(Error::InvalidValue));
    assert_eq!(volume.get_byte(), Ok(9));
    bridge.set_and_persist(&volume, "10", &mut store).unwrap();
    assert_eq!(store.raw("app", "volume").unwrap(), [10]);
}

#[test]
fn variables_and_settings_are_separate_namespaces() {
    let registry = Registry::default();
    let setting = registry.add_setting("mode", Value::Byte(1)).unwrap();
    let value = leafcore::Variable::new("mode", Value::Bool(true)).map(Arc::new).unwrap();
    registry.register_variables(&[Arc::clone(&value)]);

    assert!(Arc::ptr_eq(&registry.find_setting("mode").unwrap(), &setting));
    assert!(Arc::ptr_eq(&registry.find_variable("mode").unwrap(), &value));
    assert!(registry.find_variable("absent").is_none());
    assert!(registry.find_setting("absent").is_none());
}

#[test]
fn battery_level_describes_after_text_set() {
    let registry = Registry::default();
    let v = leafcore::Variable::new("battery_level_percent", Value::Byte(0))
        .map(Arc::new)
        .unwrap();
    registry.register_variables(&[Arc::clone(&v)]);
    registry
        .find_variable("battery_level_percent")
        .unwrap()
        .set_from_str("55")
        .unwrap();
    assert_eq!(v.describe(), "battery_level_percent=(byte)[55]");
}
