use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{AudioConfig, PlaybackConfig};
use crate::error::VoxchatError;

/// Local audio output for synthesized speech.
#[async_trait]
pub trait Player: Send + Sync {
    /// Play the payload to completion.
    async fn play(&self, audio: &[u8]) -> Result<(), VoxchatError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerTool {
    Mpv,
    Ffplay,
    PwPlay,
    Paplay,
    Aplay,
}

impl PlayerTool {
    /// Detection order for "auto": general decoders first, raw players last.
    pub const ALL: [PlayerTool; 5] = [
        PlayerTool::Mpv,
        PlayerTool::Ffplay,
        PlayerTool::PwPlay,
        PlayerTool::Paplay,
        PlayerTool::Aplay,
    ];

    pub fn binary(&self) -> &'static str {
        match self {
            PlayerTool::Mpv => "mpv",
            PlayerTool::Ffplay => "ffplay",
            PlayerTool::PwPlay => "pw-play",
            PlayerTool::Paplay => "paplay",
            PlayerTool::Aplay => "aplay",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|tool| tool.binary() == name)
    }

    pub fn args(&self, path: &Path) -> Vec<String> {
        let file = path.to_string_lossy().to_string();
        match self {
            PlayerTool::Mpv => vec!["--no-video".to_string(), "--really-quiet".to_string(), file],
            PlayerTool::Ffplay => vec![
                "-nodisp".to_string(),
                "-autoexit".to_string(),
                "-loglevel".to_string(),
                "quiet".to_string(),
                file,
            ],
            PlayerTool::PwPlay | PlayerTool::Paplay => vec![file],
            PlayerTool::Aplay => vec!["-q".to_string(), file],
        }
    }

    pub fn detect(preference: &str) -> Result<Self, VoxchatError> {
        if preference == "auto" {
            return Self::ALL
                .into_iter()
                .find(|tool| which::which(tool.binary()).is_ok())
                .ok_or_else(|| {
                    VoxchatError::Playback(
                        "no audio player found (install mpv, ffplay, pw-play, paplay or aplay)"
                            .to_string(),
                    )
                });
        }

        let tool = Self::from_name(preference).ok_or_else(|| {
            VoxchatError::Playback(format!("unknown audio player '{}'", preference))
        })?;
        if which::which(tool.binary()).is_err() {
            return Err(VoxchatError::Playback(format!(
                "audio player '{}' is not installed",
                tool.binary()
            )));
        }
        Ok(tool)
    }
}

/// Writes the payload to a temp file and runs an external player on it.
pub struct ProcessPlayer {
    preference: String,
    temp_dir: PathBuf,
}

impl ProcessPlayer {
    pub fn new(playback: &PlaybackConfig, audio: &AudioConfig) -> Self {
        Self {
            preference: playback.player.clone(),
            temp_dir: PathBuf::from(&audio.temp_dir),
        }
    }
}

#[async_trait]
impl Player for ProcessPlayer {
    async fn play(&self, audio: &[u8]) -> Result<(), VoxchatError> {
        if audio.is_empty() {
            return Err(VoxchatError::Playback("empty audio payload".to_string()));
        }

        let tool = PlayerTool::detect(&self.preference)?;

        tokio::fs::create_dir_all(&self.temp_dir).await?;
        let path = self
            .temp_dir
            .join(format!("speech_{}.audio", Uuid::new_v4()));
        tokio::fs::write(&path, audio).await?;

        info!("Playing {} bytes via {}", audio.len(), tool.binary());
        let output = Command::new(tool.binary())
            .args(tool.args(&path))
            .output()
            .await;

        if let Err(e) = tokio::fs::remove_file(&path).await {
            debug!("Failed to remove {}: {}", path.display(), e);
        }

        let output = output.map_err(|e| {
            VoxchatError::Playback(format!("failed to run {}: {}", tool.binary(), e))
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!("{} failed: {}", tool.binary(), stderr.trim());
            return Err(VoxchatError::Playback(format!(
                "{} exited with {}",
                tool.binary(),
                output.status
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct MockPlayer {
        pub played: Mutex<Vec<Vec<u8>>>,
        pub fail: bool,
    }

    #[async_trait]
    impl Player for MockPlayer {
        async fn play(&self, audio: &[u8]) -> Result<(), VoxchatError> {
            if self.fail {
                return Err(VoxchatError::Playback("device busy".to_string()));
            }
            self.played.lock().unwrap().push(audio.to_vec());
            Ok(())
        }
    }
}
