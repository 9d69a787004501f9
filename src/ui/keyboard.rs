//! Piano keyboard display.
//!
//! Draws the two playable octaves as piano keys, each labelled with the
//! computer key that plays it. Sounding keys are highlighted.

use crate::app::{key_for_note, keyboard_notes, App, KeyboardLayout};
use crate::audio::engine::ActiveKeys;
use crate::note::NoteId;
use ratatui::layout::Rect;
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Paragraph};
use ratatui::Frame;

/// Width of a white key in columns.
pub const WHITE_KEY_WIDTH: u16 = 5;

/// Width of a black key in columns.
const BLACK_KEY_WIDTH: u16 = 3;

/// Height of the key area in rows.
pub const KEY_HEIGHT: u16 = 7;

/// Height of the black keys in rows.
const BLACK_KEY_HEIGHT: u16 = 4;

/// Places every key of the keyboard inside `area`.
///
/// Keys that would fall outside `area` are left out.
pub fn layout_keys(area: Rect) -> KeyboardLayout {
    let mut layout = KeyboardLayout {
        area,
        ..KeyboardLayout::default()
    };
    let height = area.height.min(KEY_HEIGHT);
    let right = area.x + area.width;
    let mut x = area.x;
    // A black key is placed once the white key after it fits.
    let mut pending = None;

    for note in keyboard_notes() {
        if note.is_black() {
            pending = Some(note);
            continue;
        }
        if x + WHITE_KEY_WIDTH > right {
            break;
        }
        if let Some(black) = pending.take() {
            // Straddles the boundary with the previous white key.
            let left = x.saturating_sub(BLACK_KEY_WIDTH / 2 + 1);
            let rect = Rect::new(left, area.y, BLACK_KEY_WIDTH, height.min(BLACK_KEY_HEIGHT));
            layout.black.push((black, rect));
        }
        layout.white.push((note, Rect::new(x, area.y, WHITE_KEY_WIDTH, height)));
        x += WHITE_KEY_WIDTH;
    }
    layout
}

fn key_style(note: &NoteId, active: bool) -> Style {
    if active {
        Style::default()
            .fg(Color::White)
            .bg(Color::Blue)
            .add_modifier(Modifier::BOLD)
    } else if note.is_black() {
        Style::default().fg(Color::White).bg(Color::Black)
    } else {
        Style::default().fg(Color::Black).bg(Color::White)
    }
}

/// Draws one key with its computer key label near the bottom edge.
fn render_key(frame: &mut Frame, note: &NoteId, rect: Rect, keys: &ActiveKeys) {
    let style = key_style(note, keys.is_active(note));
    let label = key_for_note(note)
        .map(|k| k.to_ascii_uppercase().to_string())
        .unwrap_or_default();

    let mut lines = vec![Line::raw(""); rect.height.saturating_sub(1) as usize];
    lines.push(Line::from(Span::styled(label, style.add_modifier(Modifier::BOLD))).centered());

    // White keys get a thin right edge so neighbours stay apart.
    let block = if note.is_black() {
        Block::default().style(style)
    } else {
        Block::default()
            .borders(Borders::RIGHT)
            .border_style(Style::default().fg(Color::DarkGray))
            .style(style)
    };
    frame.render_widget(Paragraph::new(lines).block(block), rect);
}

/// Renders the piano keyboard and returns where each key was drawn.
pub fn render_keyboard(frame: &mut Frame, area: Rect, app: &App) -> KeyboardLayout {
    let block = Block::default()
        .title(" Keyboard ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Gray));

    let inner = block.inner(area);
    frame.render_widget(block, area);

    let layout = layout_keys(inner);
    for (note, rect) in &layout.white {
        render_key(frame, note, *rect, &app.keys);
    }
    for (note, rect) in &layout.black {
        render_key(frame, note, *rect, &app.keys);
    }
    layout
}
