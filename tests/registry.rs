//! Device registry public API

use scanlink_core::config::{FileSettingsStore, ScannerSettings, SettingsStore};
use scanlink_core::{DeviceRegistry, RegistryError};

#[test]
fn test_builtin_lookup_is_case_insensitive() {
    let registry = DeviceRegistry::new();
    let device = registry.lookup("1a86", "5723").expect("CH340 scanner is built in");
    assert_eq!(device.vendor_id, "1A86");
    assert_eq!(device.device_name, "Atol USB-HID scanner (CH340 based)");
    assert_eq!(registry.lookup_ids(0x1A86, 0x5723), Some(device));
}

#[test]
fn test_user_device_lifecycle() {
    let mut registry = DeviceRegistry::new();
    assert!(registry.lookup("ABCD", "0001").is_none());

    let added = registry.add_user_device("abcd", "0001").unwrap();
    assert_eq!(added.device_name, "Custom device (VID:0xABCD, PID:0x0001)");
    assert!(registry.is_known("ABCD", "0001"));
    assert!(registry.all_devices().contains_key("ABCD"));

    registry.remove_user_device("ABCD", "0001").unwrap();
    assert!(registry.user_devices().is_empty());
    assert_eq!(
        registry.remove_user_device("ABCD", "0001"),
        Err(RegistryError::NotFound {
            vid: "ABCD".into(),
            pid: "0001".into()
        })
    );
}

#[test]
fn test_rejects_builtin_and_malformed_ids() {
    let mut registry = DeviceRegistry::new();
    assert!(matches!(
        registry.add_user_device("1A86", "5723"),
        Err(RegistryError::Duplicate { .. })
    ));
    assert!(matches!(
        registry.add_user_device("1A8", "5723"),
        Err(RegistryError::Validation { .. })
    ));
    assert!(registry.user_devices().is_empty());
}

#[test]
fn test_user_table_survives_file_store() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileSettingsStore::new(dir.path().join("settings.json"));

    let mut registry = DeviceRegistry::new();
    registry.add_user_device("BEEF", "0042").unwrap();
    store
        .save(&ScannerSettings {
            auto_connect_enabled: true,
            user_devices: registry.user_devices().clone(),
        })
        .unwrap();

    let loaded = store.load().unwrap();
    assert!(loaded.auto_connect_enabled);
    let restored = DeviceRegistry::with_user_devices(loaded.user_devices);
    assert!(restored.lookup("beef", "0042").is_some());
}
