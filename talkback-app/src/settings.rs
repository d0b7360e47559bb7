//! Persistent application settings (JSON file in app data directory).

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use talkback_core::{audio::device::normalize_preference, EngineConfig, SessionConfig};

const MIN_FRAME_LEN: usize = 256;
const MAX_FRAME_LEN: usize = 16_384;
const MAX_GAIN: f32 = 4.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct AppSettings {
    pub preferred_input_device: Option<String>,
    pub preferred_output_device: Option<String>,
    pub input_gain: f32,
    pub output_gain: f32,
    pub frame_len: usize,
    pub model: String,
    pub voice_name: String,
    pub language_code: Option<String>,
    /// Loopback only: flag every Nth echo as an interruption. 0 disables.
    pub loopback_interrupt_every: u64,
}

impl Default for AppSettings {
    fn default() -> Self {
        let session = SessionConfig::default();
        Self {
            preferred_input_device: None,
            preferred_output_device: None,
            input_gain: 1.0,
            output_gain: 1.0,
            frame_len: EngineConfig::default().frame_len,
            model: session.model,
            voice_name: session.voice_name,
            language_code: None,
            loopback_interrupt_every: 0,
        }
    }
}

impl AppSettings {
    pub fn normalize(&mut self) {
        self.input_gain = normalize_gain(self.input_gain);
        self.output_gain = normalize_gain(self.output_gain);
        self.frame_len = normalize_frame_len(self.frame_len);
        self.preferred_input_device = normalize_preference(self.preferred_input_device.as_deref());
        self.preferred_output_device =
            normalize_preference(self.preferred_output_device.as_deref());
        self.language_code = normalize_preference(self.language_code.as_deref());

        let defaults = SessionConfig::default();
        if self.model.trim().is_empty() {
            self.model = defaults.model;
        } else {
            self.model = self.model.trim().to_string();
        }
        if self.voice_name.trim().is_empty() {
            self.voice_name = defaults.voice_name;
        } else {
            self.voice_name = self.voice_name.trim().to_string();
        }
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            frame_len: self.frame_len,
            preferred_input_device: self.preferred_input_device.clone(),
            preferred_output_device: self.preferred_output_device.clone(),
            input_gain: self.input_gain,
            output_gain: self.output_gain,
            session: SessionConfig {
                model: self.model.clone(),
                voice_name: self.voice_name.clone(),
                language_code: self.language_code.clone(),
            },
            ..EngineConfig::default()
        }
    }
}

fn normalize_gain(gain: f32) -> f32 {
    if gain.is_finite() {
        gain.clamp(0.0, MAX_GAIN)
    } else {
        1.0
    }
}

/// Nearest power of two within the supported range.
pub fn normalize_frame_len(raw: usize) -> usize {
    let clamped = raw.clamp(MIN_FRAME_LEN, MAX_FRAME_LEN);
    let upper = clamped.next_power_of_two();
    let lower = upper / 2;
    if upper - clamped <= clamped - lower || lower < MIN_FRAME_LEN {
        upper.min(MAX_FRAME_LEN)
    } else {
        lower
    }
}

pub fn default_settings_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("Talkback")
            .join("settings.json")
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                std::env::var_os("HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("/tmp"))
                    .join(".local")
                    .join("share")
            })
            .join("talkback")
            .join("settings.json")
    }
}

/// Missing or corrupt files fall back to defaults.
pub fn load_settings(path: &Path) -> AppSettings {
    let mut settings = fs::read_to_string(path)
        .ok()
        .and_then(|raw| serde_json::from_str::<AppSettings>(&raw).ok())
        .unwrap_or_default();
    settings.normalize();
    settings
}

pub fn save_settings(path: &Path, settings: &AppSettings) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(settings).map_err(std::io::Error::other)?;
    fs::write(path, json)
}
