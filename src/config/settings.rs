//! Runtime configuration and persisted scanner settings

use crate::core::connection::DEFAULT_CLOSE_SETTLE_DELAY;
use crate::core::registry::DeviceTable;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// No platform configuration directory
    #[error("Could not determine configuration directory")]
    NoConfigDir,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Settings blob is not valid JSON
    #[error("Invalid settings: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration file is not valid TOML
    #[error("Invalid configuration: {0}")]
    TomlDe(#[from] toml::de::Error),

    /// Configuration could not be serialized
    #[error("Could not serialize configuration: {0}")]
    TomlSer(#[from] toml::ser::Error),
}

/// Application configuration (`config.toml`)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Serial and framing parameters
    pub scanner: ScannerConfig,
    /// Logging settings
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load config from the default location
    pub fn load() -> Result<Self, ConfigError> {
        let path = super::config_file().ok_or(ConfigError::NoConfigDir)?;
        Self::load_from(&path)
    }

    /// Load config from a file, falling back to defaults when it is absent
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            Ok(toml::from_str(&content)?)
        } else {
            Ok(Self::default())
        }
    }

    /// Save config to the default location
    pub fn save(&self) -> Result<(), ConfigError> {
        let path = super::config_file().ok_or(ConfigError::NoConfigDir)?;
        self.save_to(&path)
    }

    /// Save config to a file
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

/// Serial and framing parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// Baud rate used when opening the port
    pub baud_rate: u32,
    /// Silence that ends a frame (ms)
    pub inter_byte_timeout_ms: u64,
    /// Delay between auto-connect detection cycles (ms)
    pub reconnect_delay_ms: u64,
    /// Wait between releasing the reader and closing the port (ms)
    pub close_settle_delay_ms: u64,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            baud_rate: 9600,
            inter_byte_timeout_ms: 100,
            reconnect_delay_ms: 3000,
            close_settle_delay_ms: DEFAULT_CLOSE_SETTLE_DELAY.as_millis() as u64,
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
    /// Also write a daily-rolling log file into the log directory
    pub file: bool,
    /// Log directory override
    pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file: false,
            directory: None,
        }
    }
}

/// Persisted scanner settings
///
/// The blob holds exactly the auto-connect flag and the user device table;
/// built-in devices are never written.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScannerSettings {
    /// Auto-connect enabled
    #[serde(default)]
    pub auto_connect_enabled: bool,
    /// User-added devices
    #[serde(default)]
    pub user_devices: DeviceTable,
}

/// Load/save capability for [`ScannerSettings`]
#[cfg_attr(test, mockall::automock)]
pub trait SettingsStore: Send + Sync {
    /// Read the stored settings
    fn load(&self) -> Result<ScannerSettings, ConfigError>;

    /// Replace the stored settings
    fn save(&self, settings: &ScannerSettings) -> Result<(), ConfigError>;
}

/// Settings stored as a JSON file
#[derive(Debug, Clone)]
pub struct FileSettingsStore {
    path: PathBuf,
}

impl FileSettingsStore {
    /// Store backed by the given file
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at the platform data directory
    pub fn default_location() -> Result<Self, ConfigError> {
        super::settings_file()
            .map(Self::new)
            .ok_or(ConfigError::NoConfigDir)
    }

    /// Backing file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SettingsStore for FileSettingsStore {
    fn load(&self) -> Result<ScannerSettings, ConfigError> {
        if !self.path.exists() {
            return Ok(ScannerSettings::default());
        }
        let content = std::fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(ScannerSettings::default());
        }
        Ok(serde_json::from_str(&content)?)
    }

    fn save(&self, settings: &ScannerSettings) -> Result<(), ConfigError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(settings)?;
        std::fs::write(&self.path, content)?;
        Ok(())
    }
}

/// In-memory settings, used when nothing is persisted
#[derive(Debug, Default)]
pub struct MemorySettingsStore {
    settings: Mutex<ScannerSettings>,
}

impl MemorySettingsStore {
    /// Store seeded with the given settings
    pub fn new(settings: ScannerSettings) -> Self {
        Self {
            settings: Mutex::new(settings),
        }
    }

    /// Snapshot of the stored settings
    pub fn snapshot(&self) -> ScannerSettings {
        self.settings.lock().clone()
    }
}

impl SettingsStore for MemorySettingsStore {
    fn load(&self) -> Result<ScannerSettings, ConfigError> {
        Ok(self.settings.lock().clone())
    }

    fn save(&self, settings: &ScannerSettings) -> Result<(), ConfigError> {
        *self.settings.lock() = settings.clone();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::registry::DeviceRegistry;

    #[test]
    fn test_settings_blob_layout() {
        let mut registry = DeviceRegistry::new();
        registry.add_user_device("abcd", "0001").unwrap();
        let settings = ScannerSettings {
            auto_connect_enabled: true,
            user_devices: registry.user_devices().clone(),
        };

        let json: serde_json::Value = serde_json::to_value(&settings).unwrap();
        assert_eq!(json["autoConnectEnabled"], true);
        assert_eq!(json["userDevices"]["ABCD"]["vendorName"], "Vendor ABCD");
        assert_eq!(
            json["userDevices"]["ABCD"]["devices"]["0001"]["name"],
            "Custom device (VID:0xABCD, PID:0x0001)"
        );
        assert_eq!(json.as_object().unwrap().len(), 2);
    }

    #[test]
    fn test_file_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSettingsStore::new(dir.path().join("nested").join("settings.json"));

        assert_eq!(store.load().unwrap(), ScannerSettings::default());

        let mut registry = DeviceRegistry::new();
        registry.add_user_device("BEEF", "CAFE").unwrap();
        let settings = ScannerSettings {
            auto_connect_enabled: true,
            user_devices: registry.user_devices().clone(),
        };
        store.save(&settings).unwrap();
        assert_eq!(store.load().unwrap(), settings);
    }

    #[test]
    fn test_file_store_accepts_partial_blob() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"userDevices":{"ABCD":{"devices":{"0001":{}}}}}"#).unwrap();

        let settings = FileSettingsStore::new(&path).load().unwrap();
        assert!(!settings.auto_connect_enabled);
        assert!(settings.user_devices["ABCD"].devices.contains_key("0001"));
    }

    #[test]
    fn test_app_config_defaults_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.scanner.baud_rate, 9600);
        assert_eq!(config.scanner.inter_byte_timeout_ms, 100);
        assert_eq!(config.scanner.reconnect_delay_ms, 3000);
        assert_eq!(config.scanner.close_settle_delay_ms, 1000);

        std::fs::write(&path, "[scanner]\nbaud_rate = 115200\n").unwrap();
        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.scanner.baud_rate, 115200);
        assert_eq!(config.scanner.inter_byte_timeout_ms, 100);

        config.save_to(&path).unwrap();
        assert_eq!(AppConfig::load_from(&path).unwrap(), config);
    }
}
