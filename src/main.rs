//! keytone - A sampled virtual piano for the terminal.
//!
//! Plays one audio sample per key, with a short fade on release. Sessions
//! can be recorded to WAV, and the played notes exported as a JSON event log.
//!
//! # Usage
//!
//! ```bash
//! cargo run -- --samples sounds --out recordings
//! ```
//!
//! Keys `Z`..`M` play C4 to B4, `Q`..`U` play C5 to B5.

use keytone::app::App;
use keytone::config::EngineConfig;
use keytone::ui;

use anyhow::{Context, Result};
use crossterm::event::{
    self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind, KeyModifiers,
    KeyboardEnhancementFlags, MouseButton, MouseEvent, MouseEventKind,
    PopKeyboardEnhancementFlags, PushKeyboardEnhancementFlags,
};
use crossterm::execute;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, supports_keyboard_enhancement, EnterAlternateScreen,
    LeaveAlternateScreen,
};
use ratatui::backend::CrosstermBackend;
use ratatui::Terminal;
use std::io::{self, Stdout};
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// Command-line options for the application.
struct CliOptions {
    /// Directory holding the note samples.
    samples: Option<PathBuf>,
    /// Directory that receives recordings.
    out: Option<PathBuf>,
    /// Starting volume, 0.0 to 1.0.
    volume: Option<f32>,
}

impl CliOptions {
    /// Parses command-line arguments.
    ///
    /// Supports:
    /// - `--samples <dir>` or `-s <dir>`: Sample directory
    /// - `--out <dir>` or `-o <dir>`: Where recordings are written
    /// - `--volume <level>` or `-v <level>`: Starting volume
    /// - `--help` or `-h`: Print help and exit
    fn parse() -> Result<Self> {
        let args: Vec<String> = std::env::args().collect();
        let mut options = Self {
            samples: None,
            out: None,
            volume: None,
        };
        let mut i = 1;

        while i < args.len() {
            match args[i].as_str() {
                "--samples" | "-s" => options.samples = Some(PathBuf::from(value(&args, &mut i)?)),
                "--out" | "-o" => options.out = Some(PathBuf::from(value(&args, &mut i)?)),
                "--volume" | "-v" => {
                    let raw = value(&args, &mut i)?;
                    let level: f32 = raw
                        .parse()
                        .with_context(|| format!("Invalid volume: {}", raw))?;
                    options.volume = Some(level);
                }
                "--help" | "-h" => {
                    eprint!(
                        "{}",
                        usage(args.first().map(String::as_str).unwrap_or("keytone"))
                    );
                    std::process::exit(0);
                }
                other => {
                    eprintln!("Unknown option: {}", other);
                    eprintln!("Use --help for usage information");
                    std::process::exit(1);
                }
            }
            i += 1;
        }

        Ok(options)
    }

    /// Applies the options on top of the default configuration.
    fn into_config(self) -> EngineConfig {
        let mut config = EngineConfig::default();
        if let Some(samples) = self.samples {
            config.sample_dir = samples;
        }
        if let Some(out) = self.out {
            config.download_dir = out;
        }
        if let Some(volume) = self.volume {
            config.initial_volume = volume;
        }
        config
    }
}

/// Help text, with defaults taken from [`EngineConfig::default`].
fn usage(program: &str) -> String {
    let defaults = EngineConfig::default();
    format!(
        "keytone - Sampled terminal piano

Usage: {program} [OPTIONS]

Options:
  -s, --samples DIR    Directory with <note>.{ext} samples (default: {samples})
  -o, --out DIR        Directory for recordings (default: {out})
  -v, --volume LEVEL   Starting volume from 0.0 to 1.0 (default: {volume:.1})
  -h, --help           Print this help message
",
        ext = defaults.sample_extension,
        samples = defaults.sample_dir.display(),
        out = defaults.download_dir.display(),
        volume = defaults.initial_volume,
    )
}

/// Returns the argument following option `i`, advancing past it.
fn value<'a>(args: &'a [String], i: &mut usize) -> Result<&'a str> {
    let option = &args[*i];
    *i += 1;
    args.get(*i)
        .map(String::as_str)
        .with_context(|| format!("{} requires an argument", option))
}

/// Main entry point.
fn main() -> Result<()> {
    // Parse CLI options first (before any terminal setup)
    let cli = CliOptions::parse()?;

    // Initialize logging (optional, for debugging)
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    // Without audio output nothing can work, so fail before touching the terminal.
    let mut app = App::new(cli.into_config()).context("Failed to initialize audio engine")?;
    app.preload();

    let mut terminal = setup_terminal().context("Failed to setup terminal")?;
    app.release_events = enable_release_events(&mut terminal);

    // Run main loop
    let result = run_app(&mut terminal, &mut app);
    app.release_all();

    // Restore terminal
    restore_terminal(&mut terminal).context("Failed to restore terminal")?;

    // Handle any errors from the main loop
    result
}

/// Sets up the terminal for TUI rendering.
fn setup_terminal() -> Result<Terminal<CrosstermBackend<Stdout>>> {
    enable_raw_mode().context("Failed to enable raw mode")?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)
        .context("Failed to enter alternate screen")?;
    let backend = CrosstermBackend::new(stdout);
    let terminal = Terminal::new(backend).context("Failed to create terminal")?;
    Ok(terminal)
}

/// Asks the terminal to report key releases. Returns whether it will.
fn enable_release_events(terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> bool {
    if !supports_keyboard_enhancement().unwrap_or(false) {
        return false;
    }
    execute!(
        terminal.backend_mut(),
        PushKeyboardEnhancementFlags(KeyboardEnhancementFlags::REPORT_EVENT_TYPES)
    )
    .is_ok()
}

/// Restores the terminal to its original state.
fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
    if supports_keyboard_enhancement().unwrap_or(false) {
        // Fails harmlessly if nothing was pushed.
        let _ = execute!(terminal.backend_mut(), PopKeyboardEnhancementFlags);
    }
    disable_raw_mode().context("Failed to disable raw mode")?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )
    .context("Failed to leave alternate screen")?;
    terminal.show_cursor().context("Failed to show cursor")?;
    Ok(())
}

/// Main application loop.
fn run_app(terminal: &mut Terminal<CrosstermBackend<Stdout>>, app: &mut App) -> Result<()> {
    loop {
        app.tick(Instant::now());

        terminal.draw(|frame| ui::render(frame, app))?;

        // Short timeout so loads, releases and the recording tap keep moving
        if event::poll(Duration::from_millis(16))? {
            match event::read()? {
                Event::Key(key) => match key.kind {
                    KeyEventKind::Press | KeyEventKind::Repeat => {
                        if handle_key(app, key.code, key.modifiers) {
                            break;
                        }
                    }
                    KeyEventKind::Release => {
                        if let KeyCode::Char(c) = key.code {
                            app.handle_key_release(c);
                        }
                    }
                },
                Event::Mouse(mouse) => handle_mouse(app, mouse),
                _ => {}
            }
        }
    }

    Ok(())
}

/// Handles mouse events on the keyboard.
fn handle_mouse(app: &mut App, mouse: MouseEvent) {
    match mouse.kind {
        MouseEventKind::Down(MouseButton::Left) => app.handle_pointer_down(mouse.column, mouse.row),
        MouseEventKind::Drag(MouseButton::Left) => app.handle_pointer_drag(mouse.column, mouse.row),
        MouseEventKind::Up(MouseButton::Left) => app.handle_pointer_up(),
        _ => {}
    }
}

/// Handles a key press event.
///
/// # Returns
///
/// `true` if the application should quit
fn handle_key(app: &mut App, code: KeyCode, modifiers: KeyModifiers) -> bool {
    let ctrl = modifiers.contains(KeyModifiers::CONTROL);
    match code {
        KeyCode::Esc => return true,
        KeyCode::Char('c') if ctrl => return true,
        KeyCode::Char('r') | KeyCode::Char('R') if ctrl => app.start_recording(),
        KeyCode::Char('s') | KeyCode::Char('S') if ctrl => app.stop_recording(),
        KeyCode::Char('e') | KeyCode::Char('E') if ctrl => app.export_event_log(),
        KeyCode::Char('[') => app.volume_down(),
        KeyCode::Char(']') => app.volume_up(),
        KeyCode::Char(c) if !ctrl => {
            app.handle_key_press(c, Instant::now());
        }
        _ => {}
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_shows_configured_defaults() {
        let defaults = EngineConfig::default();
        let text = usage("keytone");
        assert!(text.starts_with("keytone - Sampled terminal piano\n\nUsage: keytone [OPTIONS]"));
        assert!(text.contains(&format!("<note>.{} samples", defaults.sample_extension)));
        assert!(text.contains(&format!("(default: {})", defaults.sample_dir.display())));
        assert!(text.contains("(default: 1.0)"));
    }
}
