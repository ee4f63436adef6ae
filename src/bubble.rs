use std::collections::HashSet;
use tracing::{debug, info, warn};

use crate::api::Backend;
use crate::error::VoxchatError;
use crate::message::{InputType, Message, MessageId, Speaker};
use crate::playback::Player;

pub fn speaker_label(speaker: Speaker) -> &'static str {
    match speaker {
        Speaker::User => "You",
        Speaker::Assistant => "AI",
    }
}

pub fn origin_indicator(input_type: InputType) -> Option<&'static str> {
    match input_type {
        InputType::Text => None,
        InputType::Voice => Some("[voice]"),
        InputType::File => Some("[file]"),
    }
}

pub fn timestamp(message: &Message) -> String {
    message.timestamp.format("%H:%M").to_string()
}

/// The line above a bubble's text: label, origin, time, and for assistant
/// bubbles the play control.
pub fn header(message: &Message, playing: bool) -> String {
    let mut parts = vec![speaker_label(message.speaker).to_string()];
    if let Some(origin) = origin_indicator(message.input_type) {
        parts.push(origin.to_string());
    }
    parts.push(timestamp(message));
    if message.is_assistant() {
        parts.push(if playing { "♪ playing" } else { "[p] play" }.to_string());
    }
    parts.join(" ")
}

/// Which bubbles currently have audio in flight.
#[derive(Debug, Default)]
pub struct PlaybackTracker {
    playing: HashSet<MessageId>,
}

impl PlaybackTracker {
    /// Mark `message` as playing. False for user bubbles and for a bubble
    /// that is already playing.
    pub fn try_begin(&mut self, message: &Message) -> bool {
        if !message.is_assistant() {
            debug!("Play requested on user bubble {}", message.id);
            return false;
        }
        self.playing.insert(message.id.clone())
    }

    pub fn finish(&mut self, id: &MessageId) {
        self.playing.remove(id);
    }

    pub fn is_playing(&self, id: &MessageId) -> bool {
        self.playing.contains(id)
    }

    pub fn active(&self) -> usize {
        self.playing.len()
    }
}

/// Synthesize `text` and play it to completion.
pub async fn speak(
    backend: &dyn Backend,
    player: &dyn Player,
    text: &str,
    language: &str,
) -> Result<(), VoxchatError> {
    let audio = backend.synthesize(text, language).await.map_err(|e| {
        warn!("Speech synthesis failed: {}", e);
        e
    })?;
    info!("Synthesized {} bytes of speech", audio.len());
    player.play(&audio).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::mock::MockBackend;
    use crate::playback::mock::MockPlayer;
    use chrono::{Local, TimeZone};

    fn message_at(speaker: Speaker, input_type: InputType, hour: u32, minute: u32) -> Message {
        let mut message = Message::new(1, speaker, "text", input_type);
        message.timestamp = Local
            .with_ymd_and_hms(2024, 5, 1, hour, minute, 0)
            .single()
            .unwrap();
        message
    }

    #[test]
    fn test_user_header() {
        let message = message_at(Speaker::User, InputType::Voice, 9, 5);
        assert_eq!(header(&message, false), "You [voice] 09:05");

        let message = message_at(Speaker::User, InputType::File, 14, 30);
        assert_eq!(header(&message, false), "You [file] 14:30");
    }

    #[test]
    fn test_assistant_header_has_play_control() {
        let message = message_at(Speaker::Assistant, InputType::Text, 23, 59);
        assert_eq!(header(&message, false), "AI 23:59 [p] play");
        assert_eq!(header(&message, true), "AI 23:59 ♪ playing");
    }

    #[test]
    fn test_tracker_rejects_user_bubbles() {
        let mut tracker = PlaybackTracker::default();
        let message = Message::new(1, Speaker::User, "Hello", InputType::Text);
        assert!(!tracker.try_begin(&message));
        assert_eq!(tracker.active(), 0);
    }

    #[test]
    fn test_tracker_one_playback_per_bubble() {
        let mut tracker = PlaybackTracker::default();
        let first = Message::new(1, Speaker::Assistant, "one", InputType::Text);
        let second = Message::new(2, Speaker::Assistant, "two", InputType::Text);

        assert!(tracker.try_begin(&first));
        assert!(!tracker.try_begin(&first));
        assert!(tracker.try_begin(&second));
        assert_eq!(tracker.active(), 2);

        tracker.finish(&first.id);
        assert!(!tracker.is_playing(&first.id));
        assert!(tracker.is_playing(&second.id));
        assert!(tracker.try_begin(&first));
    }

    #[tokio::test]
    async fn test_speak_plays_synthesized_audio() {
        let backend = MockBackend::new().audio_ok(&[1, 2, 3]);
        let player = MockPlayer::default();

        speak(&backend, &player, "Hi there", "en").await.unwrap();

        assert_eq!(*player.played.lock().unwrap(), vec![vec![1, 2, 3]]);
        assert_eq!(
            *backend.synth_requests.lock().unwrap(),
            vec![("Hi there".to_string(), "en".to_string())]
        );
    }

    #[tokio::test]
    async fn test_speak_synthesis_failure_plays_nothing() {
        let backend = MockBackend::new();
        let player = MockPlayer::default();
        let mut tracker = PlaybackTracker::default();
        let message = Message::new(1, Speaker::Assistant, "Hi there", InputType::Text);

        assert!(tracker.try_begin(&message));
        let result = speak(&backend, &player, &message.text, "en").await;
        tracker.finish(&message.id);

        assert!(matches!(result, Err(VoxchatError::Backend(_))));
        assert!(player.played.lock().unwrap().is_empty());
        assert!(!tracker.is_playing(&message.id));
    }

    #[tokio::test]
    async fn test_speak_player_failure() {
        let backend = MockBackend::new().audio_ok(&[9]);
        let player = MockPlayer {
            fail: true,
            ..MockPlayer::default()
        };

        let result = speak(&backend, &player, "Hi", "en").await;
        assert!(matches!(result, Err(VoxchatError::Playback(_))));
    }
}
