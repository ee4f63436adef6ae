use anyhow::Result;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

use crate::app::{App, Focus, Overlay};
use crate::tui::AppEvent;

pub async fn handle_event(app: &mut App, event: AppEvent) -> Result<()> {
    match event {
        AppEvent::Key(key) => handle_key(app, key).await,
        AppEvent::Resize(_, _) => {}
        AppEvent::Tick => app.tick_animation(),
        AppEvent::ChatSettled { exchange, outcome } => app.settle_chat(exchange, outcome),
        AppEvent::UploadSettled { ticket, outcome } => app.settle_upload(ticket, outcome),
        AppEvent::TranscriptionSettled(outcome) => app.settle_transcription(outcome),
        AppEvent::PlaybackSettled { id, outcome } => app.settle_playback(id, outcome),
    }
    Ok(())
}

fn ctrl(key: &KeyEvent, c: char) -> bool {
    key.code == KeyCode::Char(c) && key.modifiers.contains(KeyModifiers::CONTROL)
}

async fn handle_key(app: &mut App, key: KeyEvent) {
    if ctrl(&key, 'c') {
        app.should_quit = true;
        return;
    }

    match app.overlay {
        Some(Overlay::Alert(_)) => {
            if matches!(key.code, KeyCode::Esc | KeyCode::Enter) {
                app.dismiss_overlay();
            }
            return;
        }
        Some(Overlay::Upload(_)) => {
            handle_upload_picker(app, key);
            return;
        }
        None => {}
    }

    if ctrl(&key, 'r') {
        if app.recorder.can_toggle() {
            app.toggle_recording().await;
        }
        return;
    }
    if ctrl(&key, 'u') {
        app.open_upload_picker().await;
        return;
    }
    if key.code == KeyCode::Tab {
        app.cycle_focus();
        return;
    }

    match app.focus {
        Focus::Input => handle_input(app, key),
        Focus::Messages => handle_messages(app, key),
    }
}

fn handle_input(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Enter => app.submit_input(),
        KeyCode::Backspace => app.backspace(),
        KeyCode::Left => app.cursor_left(),
        KeyCode::Right => app.cursor_right(),
        KeyCode::Home => app.cursor_home(),
        KeyCode::End => app.cursor_end(),
        KeyCode::Char(c) if !key.modifiers.contains(KeyModifiers::CONTROL) => {
            app.insert_char(c)
        }
        _ => {}
    }
}

fn handle_messages(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Char('j') | KeyCode::Down => app.select_next(),
        KeyCode::Char('k') | KeyCode::Up => app.select_prev(),
        KeyCode::Char('p') => app.play_selected(),
        KeyCode::Esc => app.cycle_focus(),
        _ => {}
    }
}

fn handle_upload_picker(app: &mut App, key: KeyEvent) {
    let Some(Overlay::Upload(picker)) = app.overlay.as_mut() else {
        return;
    };

    match key.code {
        KeyCode::Esc => app.dismiss_overlay(),
        KeyCode::Down => picker.nav_down(),
        KeyCode::Up => picker.nav_up(),
        KeyCode::Backspace => {
            picker.typed.pop();
        }
        KeyCode::Char(c) => picker.typed.push(c),
        KeyCode::Enter => {
            if let Some(path) = picker.choice() {
                app.start_upload(path);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::mock::MockBackend;
    use crate::app::test_support::harness;
    use crate::message::InputType;
    use crate::recorder::RecorderState;

    fn press(code: KeyCode) -> AppEvent {
        AppEvent::Key(KeyEvent::new(code, KeyModifiers::NONE))
    }

    fn press_ctrl(c: char) -> AppEvent {
        AppEvent::Key(KeyEvent::new(KeyCode::Char(c), KeyModifiers::CONTROL))
    }

    async fn type_text(app: &mut App, text: &str) {
        for c in text.chars() {
            handle_event(app, press(KeyCode::Char(c))).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_typed_message_round_trip() {
        let mut h = harness(MockBackend::new().chat_ok("Hi there", Some("s1")), false);

        type_text(&mut h.app, "Hello").await;
        handle_event(&mut h.app, press(KeyCode::Enter)).await.unwrap();
        assert!(h.app.input.is_empty());
        assert!(h.app.conversation.is_pending());

        let settled = h.rx.recv().await.unwrap();
        handle_event(&mut h.app, settled).await.unwrap();

        let texts: Vec<&str> = h
            .app
            .conversation
            .messages()
            .iter()
            .map(|m| m.text.as_str())
            .collect();
        assert_eq!(texts, vec!["Hello", "Hi there"]);
        assert_eq!(h.app.conversation.session().id(), Some("s1"));
        assert!(!h.app.conversation.is_pending());
    }

    #[tokio::test]
    async fn test_ctrl_c_quits() {
        let mut h = harness(MockBackend::new(), false);
        handle_event(&mut h.app, press_ctrl('c')).await.unwrap();
        assert!(h.app.should_quit);
    }

    #[tokio::test]
    async fn test_voice_turn_via_keys() {
        let mut h = harness(
            MockBackend::new()
                .transcription_ok("turn it off")
                .chat_ok("Done", None),
            false,
        );

        handle_event(&mut h.app, press_ctrl('r')).await.unwrap();
        assert_eq!(h.app.recorder.state(), RecorderState::Recording);
        handle_event(&mut h.app, press_ctrl('r')).await.unwrap();
        assert_eq!(h.app.recorder.state(), RecorderState::Processing);

        // Ignored while processing
        handle_event(&mut h.app, press_ctrl('r')).await.unwrap();
        assert_eq!(h.mic.open_count(), 1);

        let settled = h.rx.recv().await.unwrap();
        handle_event(&mut h.app, settled).await.unwrap();
        let settled = h.rx.recv().await.unwrap();
        handle_event(&mut h.app, settled).await.unwrap();

        let messages = h.app.conversation.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].input_type, InputType::Voice);
        assert_eq!(messages[1].text, "Done");
    }

    #[tokio::test]
    async fn test_alert_blocks_keys_until_dismissed() {
        let mut h = harness(MockBackend::new(), true);
        handle_event(&mut h.app, press_ctrl('r')).await.unwrap();
        assert!(matches!(h.app.overlay, Some(Overlay::Alert(_))));

        type_text(&mut h.app, "abc").await;
        assert!(h.app.input.is_empty());

        handle_event(&mut h.app, press(KeyCode::Esc)).await.unwrap();
        assert!(h.app.overlay.is_none());
        type_text(&mut h.app, "abc").await;
        assert_eq!(h.app.input, "abc");
    }

    #[tokio::test]
    async fn test_upload_picker_typed_path() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("data.csv");
        std::fs::write(&path, "a,b\n1,2\n").unwrap();

        let mut h = harness(MockBackend::new().upload_ok(42, &["a", "b"]), false);
        handle_event(&mut h.app, press_ctrl('u')).await.unwrap();
        assert!(matches!(h.app.overlay, Some(Overlay::Upload(_))));

        type_text(&mut h.app, &path.to_string_lossy()).await;
        handle_event(&mut h.app, press(KeyCode::Enter)).await.unwrap();
        assert!(h.app.overlay.is_none());

        let settled = h.rx.recv().await.unwrap();
        handle_event(&mut h.app, settled).await.unwrap();

        assert_eq!(h.app.conversation.uploaded_file(), Some("data.csv"));
        assert_eq!(
            h.app.conversation.messages()[1].text,
            "File uploaded successfully! Found 42 rows with columns: a, b"
        );
    }

    #[tokio::test]
    async fn test_tab_then_play() {
        let mut h = harness(MockBackend::new().chat_ok("Hi there", None), false);
        type_text(&mut h.app, "Hello").await;
        handle_event(&mut h.app, press(KeyCode::Enter)).await.unwrap();
        let settled = h.rx.recv().await.unwrap();
        handle_event(&mut h.app, settled).await.unwrap();

        handle_event(&mut h.app, press(KeyCode::Tab)).await.unwrap();
        assert_eq!(h.app.focus, Focus::Messages);
        assert_eq!(h.app.selected, Some(1));

        // 'p' plays rather than typing while the list has focus
        handle_event(&mut h.app, press(KeyCode::Char('p'))).await.unwrap();
        assert!(h.app.input.is_empty());
        assert_eq!(h.app.playback.active(), 1);

        let settled = h.rx.recv().await.unwrap();
        handle_event(&mut h.app, settled).await.unwrap();
        assert_eq!(h.app.playback.active(), 0);
        assert!(h.player.played.lock().unwrap().is_empty());
    }
}
