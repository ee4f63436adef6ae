use ratatui::widgets::ListState;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::api::{Backend, ChatReply, Transcription, UploadFile, UploadReply};
use crate::audio::Microphone;
use crate::bubble::{self, PlaybackTracker};
use crate::config::Config;
use crate::conversation::{Conversation, Exchange, UploadTicket};
use crate::error::VoxchatError;
use crate::message::{InputType, Message, MessageId};
use crate::notify::Notifier;
use crate::playback::Player;
use crate::recorder::{RecorderState, VoiceRecorder};
use crate::tui::{AppEvent, EventSender};

pub const MICROPHONE_ALERT: &str = "Could not access microphone. Please check permissions.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Focus {
    Input,
    Messages,
}

/// File chooser for uploads. Lists accepted files from one directory; a
/// typed path overrides the selection and is not filtered.
#[derive(Debug, Default)]
pub struct UploadPicker {
    pub dir: PathBuf,
    pub entries: Vec<PathBuf>,
    pub state: ListState,
    pub typed: String,
}

impl UploadPicker {
    pub async fn scan(dir: &Path, accept: &[String]) -> Self {
        let mut entries = Vec::new();
        match tokio::fs::read_dir(dir).await {
            Ok(mut reader) => {
                while let Ok(Some(entry)) = reader.next_entry().await {
                    let path = entry.path();
                    if path.is_file() && accepts(&path, accept) {
                        entries.push(path);
                    }
                }
            }
            Err(e) => warn!("Failed to list {}: {}", dir.display(), e),
        }
        entries.sort();

        let mut state = ListState::default();
        if !entries.is_empty() {
            state.select(Some(0));
        }

        Self {
            dir: dir.to_path_buf(),
            entries,
            state,
            typed: String::new(),
        }
    }

    pub fn nav_down(&mut self) {
        if self.entries.is_empty() {
            return;
        }
        let next = match self.state.selected() {
            Some(i) if i + 1 < self.entries.len() => i + 1,
            Some(i) => i,
            None => 0,
        };
        self.state.select(Some(next));
    }

    pub fn nav_up(&mut self) {
        if let Some(i) = self.state.selected() {
            self.state.select(Some(i.saturating_sub(1)));
        }
    }

    pub fn choice(&self) -> Option<PathBuf> {
        let typed = self.typed.trim();
        if !typed.is_empty() {
            let path = PathBuf::from(typed);
            return Some(if path.is_absolute() {
                path
            } else {
                self.dir.join(path)
            });
        }
        self.state
            .selected()
            .and_then(|i| self.entries.get(i))
            .cloned()
    }
}

/// True when `path` ends with one of the accepted extensions. Comparison
/// ignores case.
pub fn accepts(path: &Path, accept: &[String]) -> bool {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    accept
        .iter()
        .any(|ext| name.ends_with(&ext.to_ascii_lowercase()))
}

#[derive(Debug)]
pub enum Overlay {
    Alert(String),
    Upload(UploadPicker),
}

/// Capabilities the screen needs from the outside world.
pub struct Services {
    pub backend: Arc<dyn Backend>,
    pub player: Arc<dyn Player>,
    pub microphone: Box<dyn Microphone>,
    pub notifier: Notifier,
}

pub struct App {
    pub should_quit: bool,
    pub focus: Focus,

    // Input line
    pub input: String,
    pub cursor: usize,

    pub conversation: Conversation,
    pub recorder: VoiceRecorder,
    pub playback: PlaybackTracker,
    pub overlay: Option<Overlay>,

    // Message list
    pub selected: Option<usize>,
    pub scroll: u16,
    pub follow: bool,
    /// Set when the selection moved; the next draw scrolls it into view.
    pub reveal_selected: bool,

    pub animation_frame: u8,
    pub base_url: String,

    backend: Arc<dyn Backend>,
    player: Arc<dyn Player>,
    notifier: Notifier,
    language: String,
    accept: Vec<String>,
    events: EventSender,
}

/// Convert a character index to a byte index for UTF-8 safe editing.
fn char_to_byte_index(s: &str, char_idx: usize) -> usize {
    s.char_indices()
        .nth(char_idx)
        .map(|(i, _)| i)
        .unwrap_or(s.len())
}

impl App {
    pub fn new(config: &Config, services: Services, events: EventSender) -> Self {
        Self {
            should_quit: false,
            focus: Focus::Input,
            input: String::new(),
            cursor: 0,
            conversation: Conversation::new(config.backend.user_id.clone()),
            recorder: VoiceRecorder::new(services.microphone),
            playback: PlaybackTracker::default(),
            overlay: None,
            selected: None,
            scroll: 0,
            follow: true,
            reveal_selected: false,
            animation_frame: 0,
            base_url: config.backend.base_url.clone(),
            backend: services.backend,
            player: services.player,
            notifier: services.notifier,
            language: config.playback.language.clone(),
            accept: config.upload.accept.clone(),
            events,
        }
    }

    pub fn accept(&self) -> &[String] {
        &self.accept
    }

    // ---- Input line ----

    pub fn insert_char(&mut self, c: char) {
        let byte_pos = char_to_byte_index(&self.input, self.cursor);
        self.input.insert(byte_pos, c);
        self.cursor += 1;
    }

    pub fn backspace(&mut self) {
        if self.cursor > 0 {
            self.cursor -= 1;
            let byte_pos = char_to_byte_index(&self.input, self.cursor);
            self.input.remove(byte_pos);
        }
    }

    pub fn cursor_left(&mut self) {
        self.cursor = self.cursor.saturating_sub(1);
    }

    pub fn cursor_right(&mut self) {
        self.cursor = (self.cursor + 1).min(self.input.chars().count());
    }

    pub fn cursor_home(&mut self) {
        self.cursor = 0;
    }

    pub fn cursor_end(&mut self) {
        self.cursor = self.input.chars().count();
    }

    /// Enter on the input line. Disabled while a request is pending.
    pub fn submit_input(&mut self) {
        if self.conversation.is_pending() {
            debug!("Submit ignored while pending");
            return;
        }
        if self.input.trim().is_empty() {
            return;
        }

        let text = std::mem::take(&mut self.input);
        self.cursor = 0;
        if let Some(exchange) = self.conversation.begin_exchange(&text, InputType::Text) {
            self.spawn_chat(exchange);
        }
    }

    fn submit_transcript(&mut self, transcript: String) {
        if let Some(exchange) = self.conversation.begin_exchange(&transcript, InputType::Voice) {
            self.spawn_chat(exchange);
        }
    }

    fn spawn_chat(&mut self, exchange: Exchange) {
        self.follow = true;
        let backend = Arc::clone(&self.backend);
        let tx = self.events.clone();
        tokio::spawn(async move {
            let outcome = backend.send_message(exchange.request.clone()).await;
            let _ = tx.send(AppEvent::ChatSettled { exchange, outcome });
        });
    }

    pub fn settle_chat(&mut self, exchange: Exchange, outcome: Result<ChatReply, VoxchatError>) {
        self.conversation.finish_exchange(exchange, outcome);
        self.follow = true;
    }

    // ---- Upload ----

    pub async fn open_upload_picker(&mut self) {
        let dir = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        let picker = UploadPicker::scan(&dir, &self.accept).await;
        debug!("Upload picker found {} files", picker.entries.len());
        self.overlay = Some(Overlay::Upload(picker));
    }

    pub fn start_upload(&mut self, path: PathBuf) {
        self.overlay = None;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());
        let ticket = self.conversation.begin_upload(&name);
        self.follow = true;

        let backend = Arc::clone(&self.backend);
        let tx = self.events.clone();
        tokio::spawn(async move {
            let outcome = match UploadFile::from_path(&path).await {
                Ok(file) => backend.upload_file(file).await,
                Err(e) => Err(e),
            };
            let _ = tx.send(AppEvent::UploadSettled { ticket, outcome });
        });
    }

    pub fn settle_upload(&mut self, ticket: UploadTicket, outcome: Result<UploadReply, VoxchatError>) {
        self.conversation.finish_upload(ticket, outcome);
        self.follow = true;
    }

    // ---- Recording ----

    pub async fn toggle_recording(&mut self) {
        match self.recorder.state() {
            RecorderState::Idle => {
                if self.recorder.start().await.is_err() {
                    self.alert(MICROPHONE_ALERT);
                }
            }
            RecorderState::Recording => match self.recorder.finish().await {
                Some(Ok(clip)) => {
                    let backend = Arc::clone(&self.backend);
                    let tx = self.events.clone();
                    tokio::spawn(async move {
                        let outcome = backend.transcribe(clip).await;
                        let _ = tx.send(AppEvent::TranscriptionSettled(outcome));
                    });
                }
                Some(Err(e)) => {
                    let text = self.recorder.settle(Err(e));
                    self.submit_transcript(text);
                }
                None => {}
            },
            RecorderState::Processing => debug!("Record toggle ignored while processing"),
        }
    }

    pub fn settle_transcription(&mut self, outcome: Result<Transcription, VoxchatError>) {
        let text = self.recorder.settle(outcome);
        self.submit_transcript(text);
    }

    // ---- Playback ----

    pub fn selected_message(&self) -> Option<&Message> {
        self.selected
            .and_then(|i| self.conversation.messages().get(i))
    }

    pub fn play_selected(&mut self) {
        let Some(message) = self.selected_message().cloned() else {
            return;
        };
        if !self.playback.try_begin(&message) {
            return;
        }

        info!("Playing message {}", message.id);
        let backend = Arc::clone(&self.backend);
        let player = Arc::clone(&self.player);
        let language = self.language.clone();
        let tx = self.events.clone();
        tokio::spawn(async move {
            let outcome =
                bubble::speak(backend.as_ref(), player.as_ref(), &message.text, &language).await;
            let _ = tx.send(AppEvent::PlaybackSettled {
                id: message.id,
                outcome,
            });
        });
    }

    pub fn settle_playback(&mut self, id: MessageId, outcome: Result<(), VoxchatError>) {
        if let Err(e) = outcome {
            warn!("Playback of {} failed: {}", id, e);
        }
        self.playback.finish(&id);
    }

    // ---- Overlays and alerts ----

    pub fn alert(&mut self, message: &str) {
        self.overlay = Some(Overlay::Alert(message.to_string()));
        let notifier = self.notifier.clone();
        let message = message.to_string();
        tokio::spawn(async move {
            if let Err(e) = notifier.alert("voxchat", &message).await {
                warn!("Failed to deliver alert: {}", e);
            }
        });
    }

    pub fn dismiss_overlay(&mut self) {
        self.overlay = None;
    }

    // ---- Focus and navigation ----

    pub fn cycle_focus(&mut self) {
        self.focus = match self.focus {
            Focus::Input => {
                if self.selected.is_none() && !self.conversation.messages().is_empty() {
                    self.selected = Some(self.conversation.messages().len() - 1);
                }
                Focus::Messages
            }
            Focus::Messages => {
                self.follow = true;
                Focus::Input
            }
        };
    }

    pub fn select_next(&mut self) {
        let count = self.conversation.messages().len();
        if count == 0 {
            return;
        }
        self.selected = Some(match self.selected {
            Some(i) => (i + 1).min(count - 1),
            None => 0,
        });
        self.scroll_to_selected();
    }

    pub fn select_prev(&mut self) {
        if self.conversation.messages().is_empty() {
            return;
        }
        self.selected = Some(self.selected.map_or(0, |i| i.saturating_sub(1)));
        self.scroll_to_selected();
    }

    fn scroll_to_selected(&mut self) {
        if self.selected.is_some() {
            self.follow = false;
            self.reveal_selected = true;
        }
    }

    pub fn tick_animation(&mut self) {
        if self.conversation.is_pending() || self.recorder.state() != RecorderState::Idle {
            self.animation_frame = (self.animation_frame + 1) % 3;
        }
    }
}
