//! Configuration module
//!
//! Handles the runtime configuration file and the persisted scanner settings

mod settings;

pub use settings::{
    AppConfig, ConfigError, FileSettingsStore, LoggingConfig, MemorySettingsStore, ScannerConfig,
    ScannerSettings, SettingsStore,
};

#[cfg(test)]
pub(crate) use settings::MockSettingsStore;

use directories::ProjectDirs;
use std::path::PathBuf;

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "scanlink", "Scanlink")
}

/// Get the application configuration directory
pub fn config_dir() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the application data directory
pub fn data_dir() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.data_dir().to_path_buf())
}

/// Get the log directory
pub fn log_dir() -> Option<PathBuf> {
    data_dir().map(|d| d.join("logs"))
}

/// Path of the runtime configuration file
pub fn config_file() -> Option<PathBuf> {
    config_dir().map(|d| d.join("config.toml"))
}

/// Path of the persisted settings blob
pub fn settings_file() -> Option<PathBuf> {
    data_dir().map(|d| d.join("settings.json"))
}
