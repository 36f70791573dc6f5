use crate::domain::models::KnownGlasses;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_true")]
    pub file_logging_enabled: bool,
    #[serde(default = "default_true")]
    pub console_logging_enabled: bool,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_prefix")]
    pub file_name_prefix: String,
    #[serde(default = "default_true")]
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
            file_logging_enabled: default_true(),
            console_logging_enabled: default_true(),
            log_dir: default_log_dir(),
            file_name_prefix: default_prefix(),
            show_file_line: default_true(),
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
    "g1_glasses".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    // Logging Settings
    #[serde(default)]
    pub log_settings: LogSettings,

    // Pairing Settings
    #[serde(default = "default_name_filter")]
    pub name_filter: String,
    #[serde(default = "default_scan_timeout_secs")]
    pub scan_timeout_secs: u64,
    #[serde(default)]
    pub known_glasses: Option<KnownGlasses>,

    // Session Settings
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
    #[serde(default = "default_bmp_chunk_delay_ms")]
    pub bmp_chunk_delay_ms: u64,
    #[serde(default = "default_bmp_crc_delay_ms")]
    pub bmp_crc_delay_ms: u64,

    // Notification Settings
    #[serde(default = "default_app_identifier")]
    pub notification_app_identifier: String,
    #[serde(default = "default_display_name")]
    pub notification_display_name: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_settings: LogSettings::default(),
            name_filter: default_name_filter(),
            scan_timeout_secs: default_scan_timeout_secs(),
            known_glasses: None,
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            bmp_chunk_delay_ms: default_bmp_chunk_delay_ms(),
            bmp_crc_delay_ms: default_bmp_crc_delay_ms(),
            notification_app_identifier: default_app_identifier(),
            notification_display_name: default_display_name(),
        }
    }
}

impl Settings {
    /// The subset of settings the glasses session runs with.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            name_filter: self.name_filter.clone(),
            heartbeat_interval: Duration::from_secs(self.heartbeat_interval_secs.max(1)),
            bmp_chunk_delay: Duration::from_millis(self.bmp_chunk_delay_ms),
            bmp_crc_delay: Duration::from_millis(self.bmp_crc_delay_ms),
        }
    }
}

fn default_name_filter() -> String {
    "Even G1".to_string()
}
fn default_scan_timeout_secs() -> u64 {
    30
}
fn default_heartbeat_interval_secs() -> u64 {
    30
}
fn default_bmp_chunk_delay_ms() -> u64 {
    8
}
fn default_bmp_crc_delay_ms() -> u64 {
    100
}
fn default_app_identifier() -> String {
    "dev.g1glasses.cli".to_string()
}
fn default_display_name() -> String {
    "G1 Glasses".to_string()
}

/// Runtime configuration of a glasses session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub name_filter: String,
    pub heartbeat_interval: Duration,
    pub bmp_chunk_delay: Duration,
    pub bmp_crc_delay: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Settings::default().session_config()
    }
}

pub struct SettingsService {
    settings: Settings,
    settings_path: PathBuf,
}

impl SettingsService {
    pub fn new() -> anyhow::Result<Self> {
        let settings_path = Self::get_settings_path()?;
        Ok(Self::from_path(settings_path))
    }

    /// Load settings from an explicit path, falling back to defaults.
    pub fn from_path(settings_path: PathBuf) -> Self {
        let settings = match Self::load_from_file(&settings_path) {
            Ok(settings) => settings,
            Err(e) => {
                tracing::debug!("Using default settings ({}): {}", settings_path.display(), e);
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
        path.push("G1Glasses");
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
        let json = serde_json::to_string_pretty(&self.settings)?;
        fs::write(&self.settings_path, json)?;
        Ok(())
    }

    pub fn get(&self) -> &Settings {
        &self.settings
    }

    pub fn get_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }

    /// Remember a connected pair so it can be reconnected without scanning.
    pub fn set_known_glasses(&mut self, glasses: KnownGlasses) -> anyhow::Result<()> {
        if self.settings.known_glasses.as_ref() != Some(&glasses) {
            self.settings.known_glasses = Some(glasses);
            self.save()?;
        }
        Ok(())
    }

    pub fn forget_glasses(&mut self) -> anyhow::Result<()> {
        if self.settings.known_glasses.take().is_some() {
            self.save()?;
        }
        Ok(())
    }
}
