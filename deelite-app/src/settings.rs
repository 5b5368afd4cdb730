//! Persistent host settings (JSON file in the app data directory).

use std::fs;
use std::path::{Path, PathBuf};

use deelite_core::{
    genai::{DEFAULT_REST_ENDPOINT, DEFAULT_TEXT_MODEL},
    transport::{DEFAULT_LIVE_ENDPOINT, DEFAULT_LIVE_MODEL, DEFAULT_SYSTEM_INSTRUCTION},
    SessionConfig, Voice,
};
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct AppSettings {
    pub api_key: Option<String>,
    pub voice: String,
    pub input_device: Option<String>,
    pub output_device: Option<String>,
    pub system_instruction: String,
    pub live_endpoint: String,
    pub live_model: String,
    pub rest_endpoint: String,
    pub text_model: String,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            voice: Voice::default().to_string(),
            input_device: None,
            output_device: None,
            system_instruction: DEFAULT_SYSTEM_INSTRUCTION.into(),
            live_endpoint: DEFAULT_LIVE_ENDPOINT.into(),
            live_model: DEFAULT_LIVE_MODEL.into(),
            rest_endpoint: DEFAULT_REST_ENDPOINT.into(),
            text_model: DEFAULT_TEXT_MODEL.into(),
        }
    }
}

impl AppSettings {
    pub fn normalize(&mut self) {
        let defaults = AppSettings::default();

        self.api_key = trimmed(self.api_key.take());
        self.input_device = trimmed(self.input_device.take());
        self.output_device = trimmed(self.output_device.take());
        self.voice = normalize_voice(&self.voice);

        if self.system_instruction.trim().is_empty() {
            self.system_instruction = defaults.system_instruction;
        }
        for (field, default) in [
            (&mut self.live_endpoint, defaults.live_endpoint),
            (&mut self.live_model, defaults.live_model),
            (&mut self.rest_endpoint, defaults.rest_endpoint),
            (&mut self.text_model, defaults.text_model),
        ] {
            let value = field.trim().to_string();
            *field = if value.is_empty() { default } else { value };
        }
    }

    /// Environment variables win over the file.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(key) = lookup("DEELITE_API_KEY").or_else(|| lookup("GEMINI_API_KEY")) {
            self.api_key = Some(key);
        }
        if let Some(voice) = lookup("DEELITE_VOICE") {
            self.voice = voice;
        }
        if let Some(endpoint) = lookup("DEELITE_LIVE_ENDPOINT") {
            self.live_endpoint = endpoint;
        }
        self.normalize();
    }

    pub fn voice(&self) -> Voice {
        self.voice.parse().unwrap_or_default()
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            endpoint: self.live_endpoint.clone(),
            api_key: self.api_key.clone().unwrap_or_default(),
            model: self.live_model.clone(),
            voice: self.voice(),
            system_instruction: self.system_instruction.clone(),
            ..SessionConfig::default()
        }
    }
}

fn trimmed(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Canonical voice name; unknown names fall back to the default voice.
pub fn normalize_voice(raw: &str) -> String {
    match raw.parse::<Voice>() {
        Ok(voice) => voice.to_string(),
        Err(e) => {
            if !raw.trim().is_empty() {
                warn!("{e}; using {}", Voice::default());
            }
            Voice::default().to_string()
        }
    }
}

pub fn data_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("Dee-Lite")
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
            .join("deelite")
    }
}

pub fn default_settings_path() -> PathBuf {
    data_dir().join("settings.json")
}

/// Missing or unreadable files yield defaults.
pub fn load_settings(path: &Path) -> AppSettings {
    let mut settings = match fs::read_to_string(path) {
        Ok(raw) => serde_json::from_str::<AppSettings>(&raw).unwrap_or_else(|e| {
            warn!(path = %path.display(), "ignoring malformed settings: {e}");
            AppSettings::default()
        }),
        Err(_) => AppSettings::default(),
    };
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
