//! Terminal user interface components.
//!
//! A transport bar with volume and recording state, the piano keyboard,
//! and a line of key bindings.

mod keyboard;

use crate::app::App;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Paragraph};
use ratatui::Frame;

pub use keyboard::{layout_keys, render_keyboard, KEY_HEIGHT, WHITE_KEY_WIDTH};

/// Renders the complete UI and updates the key layout for mouse hit testing.
pub fn render(frame: &mut Frame, app: &mut App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),              // Transport
            Constraint::Length(KEY_HEIGHT + 2), // Keyboard
            Constraint::Length(1),              // Key bindings
            Constraint::Min(0),
        ])
        .split(frame.area());

    render_transport(frame, chunks[0], app);
    let layout = render_keyboard(frame, chunks[1], app);
    app.layout = layout;
    frame.render_widget(Paragraph::new(build_help_line()), chunks[2]);
}

/// Renders volume, recording state and the status message.
fn render_transport(frame: &mut Frame, area: Rect, app: &App) {
    let block = Block::default()
        .title(" keytone ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Gray));

    let inner = block.inner(area);
    frame.render_widget(block, area);

    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Length(16), // Recording
            Constraint::Length(24), // Volume
            Constraint::Min(20),    // Status
        ])
        .split(inner);

    let recording = if app.piano.is_recording() {
        Span::styled(
            " [*] REC ",
            Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
        )
    } else {
        Span::styled(" [.] IDLE ", Style::default().fg(Color::DarkGray))
    };
    frame.render_widget(Paragraph::new(Line::from(recording)), chunks[0]);

    let level = app.piano.volume();
    let filled = (level * 10.0).round() as usize;
    let volume = Line::from(vec![
        Span::styled("Vol: ", Style::default().fg(Color::DarkGray)),
        Span::styled("#".repeat(filled), Style::default().fg(Color::Green)),
        Span::styled(
            "-".repeat(10usize.saturating_sub(filled)),
            Style::default().fg(Color::DarkGray),
        ),
        Span::styled(
            format!(" {:>3.0}%", level * 100.0),
            Style::default()
                .fg(Color::White)
                .add_modifier(Modifier::BOLD),
        ),
    ]);
    frame.render_widget(Paragraph::new(volume), chunks[1]);

    if let Some((message, _)) = &app.status_message {
        frame.render_widget(
            Paragraph::new(Span::styled(
                message.as_str(),
                Style::default().fg(Color::Yellow),
            )),
            chunks[2],
        );
    }
}

/// Builds the key binding hint line.
fn build_help_line() -> Line<'static> {
    let key_style = Style::default().fg(Color::Yellow);
    let bracket_style = Style::default().fg(Color::DarkGray);
    let desc_style = Style::default().fg(Color::DarkGray);

    let mut spans = Vec::new();
    for (key, desc) in [
        ("Z-U", "Play "),
        ("[ ]", "Volume "),
        ("^R", "Record "),
        ("^S", "Stop "),
        ("^E", "Events "),
        ("Esc", "Quit"),
    ] {
        spans.push(Span::styled("[", bracket_style));
        spans.push(Span::styled(key, key_style));
        spans.push(Span::styled(format!("]{desc}"), desc_style));
    }
    Line::from(spans)
}
