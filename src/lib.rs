pub mod api;
pub mod app;
pub mod audio;
pub mod bubble;
pub mod config;
pub mod conversation;
pub mod error;
pub mod handler;
pub mod message;
pub mod notify;
pub mod playback;
pub mod recorder;
pub mod render;
pub mod tui;

pub use api::{Backend, HttpBackend};
pub use config::Config;
pub use conversation::Conversation;
pub use error::VoxchatError;
pub use notify::Notifier;
pub use recorder::VoiceRecorder;
