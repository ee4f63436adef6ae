use thiserror::Error;

#[derive(Error, Debug)]
pub enum VoxchatError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Microphone error: {0}")]
    Microphone(String),

    #[error("Playback error: {0}")]
    Playback(String),

    #[error("Notification error: {0}")]
    Notification(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
