use crate::domain::decoder::DEFAULT_PLACEHOLDER;
use crate::domain::session::SessionConfig;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_false")]
    pub file_logging_enabled: bool,
    #[serde(default = "default_true")]
    pub console_logging_enabled: bool,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_prefix")]
    pub file_name_prefix: String,
    #[serde(default = "default_false")]
    pub show_file_line: bool,
    #[serde(default = "default_false")]
    pub show_thread_ids: bool,
    #[serde(default = "default_true")]
    pub show_target: bool,
    #[serde(default = "default_true")]
    pub ansi_colors: bool,
    #[serde(default = "default_rotation")]
    pub rotation: String, // "daily", "hourly", "minutely", "never"
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            file_logging_enabled: default_false(),
            console_logging_enabled: default_true(),
            log_dir: default_log_dir(),
            file_name_prefix: default_prefix(),
            show_file_line: default_false(),
            show_thread_ids: default_false(),
            show_target: default_true(),
            ansi_colors: default_true(),
            rotation: default_rotation(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}
fn default_log_dir() -> String {
    "logs".to_string()
}
fn default_prefix() -> String {
    "ble_session".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    // Logging Settings
    #[serde(default)]
    pub log_settings: LogSettings,

    // Scan Settings
    /// Service UUIDs to restrict scan results to; empty accepts everything
    #[serde(default)]
    pub scan_service_filter: Vec<String>,

    // Connection Settings
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: Option<u64>,
    #[serde(default = "default_true")]
    pub auto_bind: bool,

    // Display Settings
    #[serde(default = "default_placeholder")]
    pub placeholder_glyph: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_settings: LogSettings::default(),
            scan_service_filter: Vec::new(),
            connect_timeout_ms: default_connect_timeout_ms(),
            auto_bind: default_true(),
            placeholder_glyph: default_placeholder(),
        }
    }
}

fn default_connect_timeout_ms() -> Option<u64> {
    Some(10_000)
}
fn default_placeholder() -> String {
    DEFAULT_PLACEHOLDER.to_string()
}

impl Settings {
    /// Validate and convert into the runtime session configuration
    pub fn session_config(&self) -> anyhow::Result<SessionConfig> {
        let scan_filter = if self.scan_service_filter.is_empty() {
            None
        } else {
            let uuids = self
                .scan_service_filter
                .iter()
                .map(|s| {
                    Uuid::parse_str(s.trim())
                        .with_context(|| format!("Invalid service UUID in scan filter: '{}'", s))
                })
                .collect::<anyhow::Result<Vec<_>>>()?;
            Some(uuids)
        };

        if self.placeholder_glyph.trim().is_empty() {
            anyhow::bail!("placeholder_glyph must contain a visible character");
        }

        Ok(SessionConfig {
            scan_filter,
            auto_bind: self.auto_bind,
            placeholder: self.placeholder_glyph.clone(),
            connect_timeout: self
                .connect_timeout_ms
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis),
        })
    }
}

pub struct SettingsService {
    settings: Settings,
    settings_path: PathBuf,
}

impl SettingsService {
    pub fn new() -> anyhow::Result<Self> {
        let settings_path = Self::get_settings_path()?;
        Ok(Self::with_path(settings_path))
    }

    /// Load from an explicit location, falling back to defaults when the file
    /// is missing or unreadable
    pub fn with_path(settings_path: PathBuf) -> Self {
        let settings = match Self::load_from_file(&settings_path) {
            Ok(settings) => settings,
            Err(e) => {
                if settings_path.exists() {
                    eprintln!(
                        "Ignoring unreadable settings at {}: {}",
                        settings_path.display(),
                        e
                    );
                }
                Settings::default()
            }
        };

        Self {
            settings,
            settings_path,
        }
    }

    fn get_settings_path() -> anyhow::Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        path.push("BleSession");
        fs::create_dir_all(&path)?;
        path.push("settings.json");
        Ok(path)
    }

    fn load_from_file(path: &Path) -> anyhow::Result<Settings> {
        let contents = fs::read_to_string(path)?;
        let settings = serde_json::from_str(&contents)?;
        Ok(settings)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        if let Some(parent) = self.settings_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&self.settings)?;
        fs::write(&self.settings_path, json)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.settings_path
    }

    pub fn get(&self) -> &Settings {
        &self.settings
    }

    pub fn get_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }
}
