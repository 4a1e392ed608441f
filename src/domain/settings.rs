use crate::domain::models::PeerId;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Default SDP service name
pub const SDP_NAME: &str = "Rust Gamepad";
/// Default SDP service description
pub const SDP_DESCRIPTION: &str = "Bluetooth HID Device";
/// Default SDP provider name
pub const SDP_PROVIDER: &str = "bt_hid_gamepad";

#[derive(Debug, Clone, Serialize, Deserialize)]
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
    "bt_hid_gamepad".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    // Logging Settings
    #[serde(default)]
    pub log_settings: LogSettings,

    // Service record identity shown to hosts
    #[serde(default = "default_sdp_name")]
    pub sdp_name: String,
    #[serde(default = "default_sdp_description")]
    pub sdp_description: String,
    #[serde(default = "default_sdp_provider")]
    pub sdp_provider: String,

    // Reconnection
    #[serde(default = "default_true")]
    pub auto_connect_last_peer: bool,
    #[serde(default)]
    pub last_connected_peer: Option<PeerId>,
    #[serde(default)]
    pub known_peers: Vec<PeerId>,

    #[serde(default = "default_true")]
    pub battery_reporting_enabled: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_settings: LogSettings::default(),
            sdp_name: default_sdp_name(),
            sdp_description: default_sdp_description(),
            sdp_provider: default_sdp_provider(),
            auto_connect_last_peer: default_true(),
            last_connected_peer: None,
            known_peers: Vec::new(),
            battery_reporting_enabled: default_true(),
        }
    }
}

fn default_sdp_name() -> String {
    SDP_NAME.to_string()
}
fn default_sdp_description() -> String {
    SDP_DESCRIPTION.to_string()
}
fn default_sdp_provider() -> String {
    SDP_PROVIDER.to_string()
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

    /// Load from an explicit file, falling back to defaults when it is missing or unreadable.
    pub fn with_path(settings_path: impl Into<PathBuf>) -> Self {
        let settings_path = settings_path.into();
        let settings = Self::load_from_file(&settings_path).unwrap_or_default();

        Self {
            settings,
            settings_path,
        }
    }

    fn get_settings_path() -> anyhow::Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        path.push("BtHidGamepad");
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

    /// Record a host we connected to and persist the change.
    pub fn remember_peer(&mut self, peer: &PeerId) -> anyhow::Result<()> {
        let mut changed = false;
        if !self.settings.known_peers.contains(peer) {
            self.settings.known_peers.push(peer.clone());
            changed = true;
        }
        if self.settings.last_connected_peer.as_ref() != Some(peer) {
            self.settings.last_connected_peer = Some(peer.clone());
            changed = true;
        }
        if changed {
            self.save()?;
        }
        Ok(())
    }
}
