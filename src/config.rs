use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;
use tracing::debug;

/// Environment variable that overrides `backend.base_url`.
pub const API_URL_ENV: &str = "VOXCHAT_API_URL";

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub playback: PlaybackConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub ui: UiConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackendConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub user_id: Option<String>,
    /// Request timeout. Unset means the HTTP client's own defaults.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

fn default_base_url() -> String {
    "http://localhost:8000".to_string()
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            user_id: None,
            timeout_ms: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AudioConfig {
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    #[serde(default = "default_channels")]
    pub channels: u8,
    /// Capture tool: "auto", "pw-record", "parecord" or "arecord".
    #[serde(default = "default_auto")]
    pub capture: String,
    #[serde(default = "default_temp_dir")]
    pub temp_dir: String,
}

fn default_sample_rate() -> u32 {
    16000
}

fn default_channels() -> u8 {
    1
}

fn default_auto() -> String {
    "auto".to_string()
}

fn default_temp_dir() -> String {
    std::env::temp_dir()
        .join("voxchat")
        .to_string_lossy()
        .to_string()
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            channels: default_channels(),
            capture: default_auto(),
            temp_dir: default_temp_dir(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PlaybackConfig {
    /// Player: "auto", "mpv", "ffplay", "pw-play", "paplay" or "aplay".
    #[serde(default = "default_auto")]
    pub player: String,
    #[serde(default = "default_language")]
    pub language: String,
}

fn default_language() -> String {
    "en".to_string()
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            player: default_auto(),
            language: default_language(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UploadConfig {
    /// Extensions suggested by the upload picker. Not enforced.
    #[serde(default = "default_accept")]
    pub accept: Vec<String>,
}

fn default_accept() -> Vec<String> {
    vec![".csv".to_string()]
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            accept: default_accept(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UiConfig {
    #[serde(default = "default_true")]
    pub show_notifications: bool,
    #[serde(default = "default_notification_timeout")]
    pub notification_timeout_ms: u64,
}

fn default_true() -> bool {
    true
}

fn default_notification_timeout() -> u64 {
    3000
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            show_notifications: true,
            notification_timeout_ms: default_notification_timeout(),
        }
    }
}

impl Config {
    pub async fn load(path: &Path) -> Result<Self> {
        Self::validate_config_path(path)?;

        if !path.exists() {
            debug!("Config file not found at {:?}, creating default", path);
            let config = Self::default();
            config.save(path).await?;
            return Ok(config);
        }

        let content = fs::read_to_string(path).await?;
        let config: Config = toml::from_str(&content)?;

        config.validate()?;

        Ok(config)
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        self.validate()?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let content = toml::to_string_pretty(self)?;
        fs::write(path, content).await?;
        Ok(())
    }

    /// Apply environment overrides. Called once at startup; the result is
    /// handed to every component as plain configuration.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(API_URL_ENV) {
            let url = url.trim();
            if !url.is_empty() {
                debug!("Backend base URL overridden by {}", API_URL_ENV);
                self.backend.base_url = url.to_string();
            }
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        use crate::error::VoxchatError;

        let base_url = self.backend.base_url.trim();
        if base_url.is_empty() {
            return Err(VoxchatError::Config("base_url cannot be empty".to_string()).into());
        }
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(VoxchatError::Config(format!(
                "base_url must start with http:// or https:// (got '{}')",
                base_url
            ))
            .into());
        }
        if let Some(timeout) = self.backend.timeout_ms {
            if !(1000..=300_000).contains(&timeout) {
                return Err(VoxchatError::Config(
                    "timeout_ms must be between 1000 and 300000".to_string(),
                )
                .into());
            }
        }

        if self.audio.sample_rate == 0 {
            return Err(
                VoxchatError::Config("sample_rate must be greater than 0".to_string()).into(),
            );
        }
        if self.audio.channels == 0 {
            return Err(VoxchatError::Config("channels must be greater than 0".to_string()).into());
        }
        if self.audio.temp_dir.contains("..") {
            return Err(VoxchatError::Config(
                "temp_dir cannot contain path traversal sequences".to_string(),
            )
            .into());
        }

        if self.playback.language.trim().is_empty() {
            return Err(VoxchatError::Config("playback language cannot be empty".to_string()).into());
        }

        if let Some(ext) = self.upload.accept.iter().find(|ext| !ext.starts_with('.')) {
            return Err(VoxchatError::Config(format!(
                "upload accept entries must start with '.' (got '{}')",
                ext
            ))
            .into());
        }

        if self.ui.notification_timeout_ms > 60_000 {
            return Err(VoxchatError::Config(
                "notification_timeout_ms cannot exceed 60000".to_string(),
            )
            .into());
        }

        Ok(())
    }

    fn validate_config_path(path: &Path) -> Result<()> {
        use crate::error::VoxchatError;

        let path_str = path.to_string_lossy();
        if path_str.contains("..") {
            return Err(VoxchatError::Config(
                "Config path cannot contain path traversal sequences".to_string(),
            )
            .into());
        }

        Ok(())
    }
}
