use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Persisted user preferences.
#[derive(Serialize, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default = "default_input_device")]
    pub input_device: String,
    /// Start suppressing as soon as the app launches.
    #[serde(default)]
    pub auto_enable: bool,
}

fn default_input_device() -> String {
    "default".to_owned()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            input_device: default_input_device(),
            auto_enable: false,
        }
    }
}

impl AppConfig {
    /// Loads configuration from disk, or returns defaults if missing or
    /// unreadable.
    pub fn load() -> Self {
        if let Some(path) = config_path() {
            if let Ok(content) = fs::read_to_string(path) {
                if let Ok(cfg) = serde_json::from_str(&content) {
                    return cfg;
                }
            }
        }
        Self::default()
    }

    /// Saves configuration to disk, best effort.
    pub fn save(&self) {
        if let Some(path) = config_path() {
            if let Some(parent) = path.parent() {
                let _ = fs::create_dir_all(parent);
            }
            if let Ok(json) = serde_json::to_string_pretty(self) {
                let _ = fs::write(path, json);
            }
        }
    }
}

fn config_path() -> Option<PathBuf> {
    ProjectDirs::from("com", "quietmic", "quietmic")
        .map(|dirs| dirs.config_dir().join("config.json"))
}
