pub mod loader;
pub mod recovery;
pub mod scheduler;

pub use loader::{LoadOutcome, SongData, SongLoader};
pub use recovery::{ErrorRecoveryWalker, RecoveryStep};
pub use scheduler::{PlaybackScheduler, SchedulerSettings, TickOutcome};

use std::time::{Duration, Instant};

use crate::audio::{NodeId, Playlist};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Stopped,
    Playing,
    Paused,
    Seeking,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RepeatMode {
    #[default]
    Off,
    One,
    All,
}

impl RepeatMode {
    pub fn cycle(self) -> Self {
        match self {
            RepeatMode::Off => RepeatMode::One,
            RepeatMode::One => RepeatMode::All,
            RepeatMode::All => RepeatMode::Off,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            RepeatMode::Off => "off",
            RepeatMode::One => "one",
            RepeatMode::All => "all",
        }
    }
}

/// What the user wants the transport to do, plus elapsed-time bookkeeping
#[derive(Debug, Clone)]
pub struct PlaybackIntent {
    pub transport: TransportState,
    pub elapsed: Duration,
    pub paused_for: Duration,
    /// Signed seek distance in milliseconds, applied once seek keys stop
    pub pending_seek_ms: i64,
    /// Transport to return to after a seek
    pub resume_as: TransportState,
    pub repeat: RepeatMode,
    pub shuffle: bool,
}

impl Default for PlaybackIntent {
    fn default() -> Self {
        Self {
            transport: TransportState::Stopped,
            elapsed: Duration::ZERO,
            paused_for: Duration::ZERO,
            pending_seek_ms: 0,
            resume_as: TransportState::Playing,
            repeat: RepeatMode::Off,
            shuffle: false,
        }
    }
}

impl PlaybackIntent {
    pub fn reset_time(&mut self) {
        self.elapsed = Duration::ZERO;
        self.paused_for = Duration::ZERO;
        self.pending_seek_ms = 0;
    }

    pub fn advance(&mut self, delta: Duration) {
        match self.transport {
            TransportState::Playing | TransportState::Seeking => self.elapsed += delta,
            TransportState::Paused => self.paused_for += delta,
            TransportState::Stopped => {}
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum View {
    #[default]
    Playlist,
    Track,
    KeyBindings,
}

#[derive(Debug, Clone, Default)]
pub struct ViewState {
    pub view: View,
    /// 0-based row highlighted in the playlist view
    pub chosen_row: usize,
}

impl ViewState {
    pub fn toggle(&mut self, view: View) {
        self.view = if self.view == view { View::Playlist } else { view };
    }

    pub fn move_by(&mut self, delta: isize, rows: usize) {
        let last = rows.saturating_sub(1) as isize;
        self.chosen_row = (self.chosen_row as isize + delta).clamp(0, last.max(0)) as usize;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerPhase {
    NoSong,
    LoadingFirst,
    Playing,
    PrefetchingNext,
    Transitioning,
    EndOfList,
}

/// Which node plays after the current one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NextSong {
    /// Not decided yet; the next prefetch resolves it from the play order
    #[default]
    Unset,
    /// Decided; `None` means the list ends after the current song
    Resolved(Option<NodeId>),
}

/// Session state owned by the scheduler for the whole run
#[derive(Debug)]
pub struct SessionContext {
    pub playlist: Playlist,
    pub current: Option<NodeId>,
    pub next: NextSong,
    pub last_played: Option<NodeId>,
    pub intent: PlaybackIntent,
    pub view: ViewState,
    pub waiting_for_playlist: bool,
    pub waiting_for_next: bool,
    /// Explicit song to start from while nothing is playing
    pub pending_start: Option<NodeId>,
    pub skipping: bool,
    pub transition_requested: bool,
    pub end_of_list: bool,
    pub quit_requested: bool,
    pub quit_after_stopping: bool,
    pub playlist_changed_at: Option<Instant>,
    pub playlist_duration: Option<Duration>,
    pub refresh: bool,
    pub status: Option<String>,
}

impl SessionContext {
    pub fn new(playlist: Playlist, quit_after_stopping: bool) -> Self {
        let waiting = !playlist.is_empty();
        let playlist_duration = playlist.total_duration();
        Self {
            playlist,
            current: None,
            next: NextSong::Unset,
            last_played: None,
            intent: PlaybackIntent::default(),
            view: ViewState::default(),
            waiting_for_playlist: waiting,
            waiting_for_next: false,
            pending_start: None,
            skipping: false,
            transition_requested: false,
            end_of_list: false,
            quit_requested: false,
            quit_after_stopping,
            playlist_changed_at: None,
            playlist_duration,
            refresh: true,
            status: None,
        }
    }

    pub fn mark_playlist_changed(&mut self, now: Instant) {
        self.playlist_changed_at = Some(now);
        self.refresh = true;
    }

    pub fn set_status(&mut self, status: impl Into<String>) {
        self.status = Some(status.into());
        self.refresh = true;
    }
}
