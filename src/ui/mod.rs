// Terminal UI - the face of ocarina
// The scheduler only talks to the `Renderer` trait; the ratatui screen sits
// behind the `tui` feature.

mod app; // control loop: input, commands, ticks
#[cfg(feature = "tui")]
mod view; // ratatui drawing

pub use app::App;
#[cfg(feature = "tui")]
pub use view::TerminalRenderer;

use std::time::Duration;

use crate::audio::{NodeId, Playlist};
use crate::error::Result;
use crate::playback::{PlaybackIntent, SchedulerPhase, SongData, ViewState};

/// Everything a renderer may show for one tick
pub struct RenderFrame<'a> {
    pub song: Option<&'a SongData>,
    pub playlist: &'a Playlist,
    pub current: Option<NodeId>,
    pub intent: &'a PlaybackIntent,
    pub view: &'a ViewState,
    pub phase: SchedulerPhase,
    pub volume: f32,
    pub playlist_duration: Option<Duration>,
    pub status: Option<&'a str>,
}

pub trait Renderer {
    fn render(&mut self, frame: &RenderFrame<'_>) -> Result<()>;
}

/// Draws nothing; used with `--no-ui` and in tests
#[derive(Debug, Default)]
pub struct NullRenderer {
    pub frames: usize,
}

impl Renderer for NullRenderer {
    fn render(&mut self, _frame: &RenderFrame<'_>) -> Result<()> {
        self.frames += 1;
        Ok(())
    }
}

/// Format a duration as m:ss or h:mm:ss
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs >= 3600 {
        format!("{}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
    } else {
        format!("{}:{:02}", secs / 60, secs % 60)
    }
}

#[cfg(feature = "tui")]
pub use terminal::{RawModeGuard, TerminalManager};

#[cfg(feature = "tui")]
mod terminal {
    use anyhow::Result;
    use crossterm::{
        cursor, execute,
        terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
    };
    use ratatui::{backend::CrosstermBackend, Terminal};
    use std::io;

    pub struct TerminalManager {
        terminal: Terminal<CrosstermBackend<io::Stdout>>,
        _cleanup_guard: CleanupGuard,
    }

    struct CleanupGuard;

    impl Drop for CleanupGuard {
        fn drop(&mut self) {
            // runs on panics too, so the shell gets its terminal back
            let _ = disable_raw_mode();

            let mut stdout = io::stdout();
            let _ = execute!(stdout, LeaveAlternateScreen, cursor::Show);
        }
    }

    impl TerminalManager {
        pub fn new() -> Result<Self> {
            // Ensure clean terminal state first
            let _ = disable_raw_mode();
            let mut stdout = io::stdout();
            let _ = execute!(stdout, LeaveAlternateScreen);

            // raw mode also gives the input decoder unbuffered, unechoed bytes
            enable_raw_mode()?;
            execute!(stdout, EnterAlternateScreen, cursor::Hide)?;
            let backend = CrosstermBackend::new(stdout);
            let mut terminal = Terminal::new(backend)?;
            terminal.clear()?;

            Ok(Self {
                terminal,
                _cleanup_guard: CleanupGuard,
            })
        }

        pub fn draw<F>(&mut self, f: F) -> io::Result<()>
        where
            F: FnOnce(&mut ratatui::Frame),
        {
            self.terminal.draw(f)?;
            Ok(())
        }
    }

    impl Drop for TerminalManager {
        fn drop(&mut self) {
            let _ = self.terminal.clear();
            let _ = self.terminal.show_cursor();
        }
    }

    /// Raw keyboard input without taking over the screen, for `--no-ui`.
    /// Keys arrive unbuffered and Ctrl-C reaches the input decoder as a byte.
    pub struct RawModeGuard;

    impl RawModeGuard {
        pub fn new() -> Result<Self> {
            enable_raw_mode()?;
            Ok(Self)
        }
    }

    impl Drop for RawModeGuard {
        fn drop(&mut self) {
            let _ = disable_raw_mode();
        }
    }
}
