use ratatui::{
    layout::{Constraint, Layout, Rect},
    style::{Color, Modifier, Style, Stylize},
    text::{Line, Span, Text},
    widgets::{Block, Borders, Clear, List, ListItem, Paragraph, Wrap},
    Frame,
};

use crate::app::{App, Focus, Overlay, UploadPicker};
use crate::bubble;
use crate::message::{Message, Speaker};
use crate::recorder::RecorderState;

pub fn render(app: &mut App, frame: &mut Frame) {
    let area = frame.area();

    let [header_area, upload_area, chat_area, status_area, input_area] = Layout::vertical([
        Constraint::Length(1),
        Constraint::Length(1),
        Constraint::Min(0),
        Constraint::Length(1),
        Constraint::Length(3),
    ])
    .areas(area);

    render_header(app, frame, header_area);
    render_upload_panel(app, frame, upload_area);
    render_messages(app, frame, chat_area);
    render_status(app, frame, status_area);
    render_input(app, frame, input_area);

    match app.overlay.as_mut() {
        Some(Overlay::Alert(message)) => render_alert(message, frame, area),
        Some(Overlay::Upload(picker)) => render_upload_picker(picker, frame, area),
        None => {}
    }
}

fn render_header(app: &App, frame: &mut Frame, area: Rect) {
    let session = app
        .conversation
        .session()
        .id()
        .map(|id| format!(" session {} ", id))
        .unwrap_or_default();

    let title = Line::from(vec![
        Span::styled(" AI Assistant ", Style::default().fg(Color::Cyan).bold()),
        Span::styled(
            format!("v{} ", env!("CARGO_PKG_VERSION")),
            Style::default().fg(Color::Gray),
        ),
        Span::styled(app.base_url.clone(), Style::default().fg(Color::Gray)),
        Span::styled(session, Style::default().fg(Color::Green)),
    ]);

    let header = Paragraph::new(title).style(Style::default().bg(Color::DarkGray));
    frame.render_widget(header, area);
}

fn render_upload_panel(app: &App, frame: &mut Frame, area: Rect) {
    let mut spans = vec![Span::styled(
        format!(" Ctrl+U upload {} ", app.accept().join(" ")),
        Style::default().fg(Color::DarkGray),
    )];
    if let Some(file) = app.conversation.uploaded_file() {
        spans.push(Span::styled(
            format!("✓ {}", file),
            Style::default().fg(Color::Green),
        ));
    }
    frame.render_widget(Paragraph::new(Line::from(spans)), area);
}

/// Rows `lines` occupy once wrapped at `width`, measured by the widget itself.
fn rendered_height(lines: &[Line<'static>], width: u16) -> usize {
    Paragraph::new(lines.to_vec())
        .wrap(Wrap { trim: false })
        .line_count(width)
}

fn clamp_rows(rows: usize) -> u16 {
    u16::try_from(rows).unwrap_or(u16::MAX)
}

fn bubble_lines(message: &Message, playing: bool, highlighted: bool) -> Vec<Line<'static>> {
    let color = match message.speaker {
        Speaker::User => Color::Cyan,
        Speaker::Assistant => Color::Yellow,
    };
    let mut style = Style::default().fg(color).add_modifier(Modifier::BOLD);
    if highlighted {
        style = style.add_modifier(Modifier::REVERSED);
    }

    let mut lines = vec![Line::from(Span::styled(
        bubble::header(message, playing),
        style,
    ))];
    for line in message.text.split('\n') {
        lines.push(Line::from(line.to_string()));
    }
    lines.push(Line::default());
    lines
}

fn thinking_lines(frame: u8) -> Vec<Line<'static>> {
    let dots = ".".repeat(frame as usize + 1);
    vec![
        Line::from(Span::styled(
            "AI",
            Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
        )),
        Line::from(Span::styled(
            format!("Thinking{}", dots),
            Style::default().fg(Color::DarkGray).add_modifier(Modifier::ITALIC),
        )),
    ]
}

fn render_messages(app: &mut App, frame: &mut Frame, area: Rect) {
    let width = area.width.saturating_sub(2);
    let visible = area.height.saturating_sub(2) as usize;

    let focused = app.focus == Focus::Messages;
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(if focused { Color::Cyan } else { Color::DarkGray }))
        .title(if focused {
            " Messages (j/k select, p play, Esc back) "
        } else {
            " Messages (Tab to focus) "
        });

    if app.conversation.messages().is_empty() && !app.conversation.is_pending() {
        let welcome = Text::from(vec![
            Line::default(),
            Line::from("Welcome to AI Assistant! 👋").centered(),
            Line::from(Span::styled(
                "Upload a CSV file or start chatting to begin.",
                Style::default().fg(Color::DarkGray),
            ))
            .centered(),
        ]);
        frame.render_widget(Paragraph::new(welcome).block(block), area);
        return;
    }

    let bubbles: Vec<Vec<Line<'static>>> = app
        .conversation
        .messages()
        .iter()
        .enumerate()
        .map(|(i, message)| {
            let playing = app.playback.is_playing(&message.id);
            bubble_lines(message, playing, focused && app.selected == Some(i))
        })
        .collect();
    let heights: Vec<usize> = bubbles
        .iter()
        .map(|lines| rendered_height(lines, width))
        .collect();

    let mut lines: Vec<Line<'static>> = bubbles.into_iter().flatten().collect();
    let mut total: usize = heights.iter().sum();
    if app.conversation.is_pending() {
        let thinking = thinking_lines(app.animation_frame);
        total += rendered_height(&thinking, width);
        lines.extend(thinking);
    }

    if app.follow {
        app.reveal_selected = false;
        app.scroll = clamp_rows(total.saturating_sub(visible));
    } else if app.reveal_selected {
        app.reveal_selected = false;
        let index = app.selected.unwrap_or(0).min(heights.len());
        app.scroll = clamp_rows(heights[..index].iter().sum());
    }

    let chat = Paragraph::new(Text::from(lines))
        .block(block)
        .wrap(Wrap { trim: false })
        .scroll((app.scroll, 0));
    frame.render_widget(chat, area);
}

fn render_status(app: &App, frame: &mut Frame, area: Rect) {
    let (label, style) = match app.recorder.state() {
        RecorderState::Idle => (
            " ● Ctrl+R record ".to_string(),
            Style::default().fg(Color::DarkGray),
        ),
        RecorderState::Recording => (
            format!(" ● Recording{} Ctrl+R to stop ", ".".repeat(app.animation_frame as usize + 1)),
            Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
        ),
        RecorderState::Processing => (
            " ◌ Processing audio... ".to_string(),
            Style::default().fg(Color::Yellow),
        ),
    };

    let mut spans = vec![Span::styled(label, style)];
    if app.playback.active() > 0 {
        spans.push(Span::styled(
            format!(" ♪ {} playing ", app.playback.active()),
            Style::default().fg(Color::Magenta),
        ));
    }
    spans.push(Span::styled(
        " Ctrl+C quit ",
        Style::default().fg(Color::DarkGray),
    ));
    frame.render_widget(Paragraph::new(Line::from(spans)), area);
}

fn render_input(app: &App, frame: &mut Frame, area: Rect) {
    let focused = app.focus == Focus::Input && app.overlay.is_none();
    let pending = app.conversation.is_pending();
    let border = if pending {
        Color::DarkGray
    } else if focused {
        Color::Yellow
    } else {
        Color::Gray
    };

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border))
        .title(if pending { " Waiting for reply... " } else { " Message " });

    let inner_width = area.width.saturating_sub(2) as usize;
    let scroll_offset = if inner_width == 0 || app.cursor < inner_width {
        0
    } else {
        app.cursor - inner_width + 1
    };

    let content = if app.input.is_empty() {
        Span::styled("Type your message...", Style::default().fg(Color::DarkGray))
    } else {
        let visible: String = app
            .input
            .chars()
            .skip(scroll_offset)
            .take(inner_width)
            .collect();
        Span::styled(visible, Style::default().fg(Color::Cyan))
    };

    frame.render_widget(Paragraph::new(Line::from(content)).block(block), area);

    if focused && !pending {
        let cursor_x = (app.cursor - scroll_offset) as u16;
        frame.set_cursor_position((area.x + cursor_x + 1, area.y + 1));
    }
}

fn centered(area: Rect, width: u16, height: u16) -> Rect {
    let width = width.min(area.width.saturating_sub(4));
    let height = height.min(area.height.saturating_sub(2));
    let x = area.x + area.width.saturating_sub(width) / 2;
    let y = area.y + area.height.saturating_sub(height) / 2;
    Rect::new(x, y, width, height)
}

fn render_alert(message: &str, frame: &mut Frame, area: Rect) {
    let popup = centered(area, 50, 5);
    frame.render_widget(Clear, popup);

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Red))
        .title(" Alert (Esc to dismiss) ");
    let body = Paragraph::new(message.to_string())
        .block(block)
        .wrap(Wrap { trim: true });
    frame.render_widget(body, popup);
}

fn render_upload_picker(picker: &mut UploadPicker, frame: &mut Frame, area: Rect) {
    let rows = u16::try_from(picker.entries.len())
        .unwrap_or(u16::MAX)
        .saturating_add(5);
    let popup = centered(area, 60, rows);
    frame.render_widget(Clear, popup);

    let [list_area, path_area] =
        Layout::vertical([Constraint::Min(0), Constraint::Length(3)]).areas(popup);

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan))
        .title(format!(" Upload from {} ", picker.dir.display()));

    let items: Vec<ListItem> = if picker.entries.is_empty() {
        vec![ListItem::new(" No matching files ").style(Style::default().fg(Color::DarkGray))]
    } else {
        picker
            .entries
            .iter()
            .map(|path| {
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default();
                ListItem::new(format!(" {} ", name))
            })
            .collect()
    };

    let list = List::new(items)
        .block(block)
        .highlight_style(
            Style::default()
                .bg(Color::Blue)
                .fg(Color::White)
                .add_modifier(Modifier::BOLD),
        )
        .highlight_symbol("> ");
    frame.render_stateful_widget(list, list_area, &mut picker.state);

    let path_block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Yellow))
        .title(" Or type a path (Enter upload, Esc cancel) ");
    frame.render_widget(
        Paragraph::new(picker.typed.as_str()).block(path_block),
        path_area,
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::mock::MockBackend;
    use crate::api::ChatReply;
    use crate::app::test_support::harness;
    use crate::message::InputType;
    use ratatui::{backend::TestBackend, Terminal};

    fn draw(app: &mut App) -> String {
        let mut terminal = Terminal::new(TestBackend::new(80, 24)).unwrap();
        terminal.draw(|frame| render(app, frame)).unwrap();
        let buffer = terminal.backend().buffer().clone();
        buffer
            .content
            .chunks(buffer.area.width as usize)
            .map(|row| row.iter().map(|cell| cell.symbol()).collect::<String>())
            .collect::<Vec<_>>()
            .join("\n")
    }

    #[tokio::test]
    async fn test_welcome_when_empty() {
        let mut h = harness(MockBackend::new(), false);
        let screen = draw(&mut h.app);
        assert!(screen.contains("Upload a CSV file or start chatting to begin."));
        assert!(screen.contains("Type your message..."));
    }

    #[tokio::test]
    async fn test_pending_shows_thinking() {
        let mut h = harness(MockBackend::new(), false);
        h.app.conversation.begin_exchange("Hello", InputType::Text);
        let screen = draw(&mut h.app);
        assert!(screen.contains("You "));
        assert!(screen.contains("Thinking"));
        assert!(screen.contains("Waiting for reply"));
    }

    #[tokio::test]
    async fn test_alert_overlay_drawn() {
        let mut h = harness(MockBackend::new(), false);
        h.app.overlay = Some(Overlay::Alert("Microphone blocked".to_string()));
        let screen = draw(&mut h.app);
        assert!(screen.contains("Microphone blocked"));
    }

    fn exchange(app: &mut App, text: &str, reply: &str) {
        let exchange = app
            .conversation
            .begin_exchange(text, InputType::Text)
            .unwrap();
        app.conversation.finish_exchange(
            exchange,
            Ok(ChatReply {
                response: reply.to_string(),
                session_id: Some("s1".to_string()),
            }),
        );
    }

    #[tokio::test]
    async fn test_huge_reply_scrolls_without_overflow() {
        let mut h = harness(MockBackend::new(), false);
        exchange(&mut h.app, "dump", &"a\n".repeat(70_000));
        draw(&mut h.app);
        assert_eq!(h.app.scroll, u16::MAX);
    }

    #[tokio::test]
    async fn test_newest_reply_visible_after_wrapped_reply() {
        let mut h = harness(MockBackend::new(), false);
        let long = vec!["x".repeat(45); 12].join(" ");
        exchange(&mut h.app, "hi", &long);
        exchange(&mut h.app, "again", "LASTREPLY");
        let screen = draw(&mut h.app);
        assert!(screen.contains("LASTREPLY"));
    }

    #[tokio::test]
    async fn test_selected_bubble_scrolled_into_view() {
        let mut h = harness(MockBackend::new(), false);
        exchange(&mut h.app, "FIRSTQUESTION", &"line\n".repeat(40));
        exchange(&mut h.app, "again", "done");
        draw(&mut h.app);
        assert!(h.app.scroll > 0);

        h.app.focus = Focus::Messages;
        h.app.selected = Some(0);
        h.app.follow = false;
        h.app.reveal_selected = true;
        let screen = draw(&mut h.app);
        assert_eq!(h.app.scroll, 0);
        assert!(!h.app.reveal_selected);
        assert!(screen.contains("FIRSTQUESTION"));
    }

    #[tokio::test]
    async fn test_upload_picker_with_many_entries() {
        let mut h = harness(MockBackend::new(), false);
        let entries: Vec<_> = (0..70_000)
            .map(|i| std::path::PathBuf::from(format!("data-{}.csv", i)))
            .collect();
        let mut state = ratatui::widgets::ListState::default();
        state.select(Some(0));
        h.app.overlay = Some(Overlay::Upload(UploadPicker {
            dir: std::path::PathBuf::from("."),
            entries,
            state,
            typed: String::new(),
        }));
        let screen = draw(&mut h.app);
        assert!(screen.contains("data-0.csv"));
    }
}
