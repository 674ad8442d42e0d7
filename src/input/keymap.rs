use std::time::{Duration, Instant};

use tracing::debug;

use super::decoder::KeySequence;
use crate::config::{KeyBindings, TimingConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    PlayPause,
    Next,
    Prev,
    SeekForward,
    SeekBack,
    VolumeUp,
    VolumeDown,
    /// 1-based song number typed before the key, if any
    GotoSong(Option<usize>),
    GotoStart,
    GotoEnd,
    ToggleShuffle,
    ToggleRepeat,
    RemoveCurrent,
    SavePlaylist,
    ScrollUp,
    ScrollDown,
    NextPage,
    PrevPage,
    ShowPlaylist,
    ShowTrack,
    ShowKeyBindings,
    Quit,
}

#[derive(Debug, Clone)]
pub struct KeyRule {
    pub sequence: KeySequence,
    pub command: Command,
}

/// Lookup order for the default bindings; the first exact match wins
pub fn rules_from(keys: &KeyBindings) -> Vec<KeyRule> {
    let table = [
        (&keys.scroll_up_alt, Command::ScrollUp),
        (&keys.scroll_down_alt, Command::ScrollDown),
        (&keys.next_track_alt, Command::Next),
        (&keys.previous_track_alt, Command::Prev),
        (&keys.volume_up, Command::VolumeUp),
        (&keys.volume_up_alt, Command::VolumeUp),
        (&keys.volume_down, Command::VolumeDown),
        (&keys.toggle_pause, Command::PlayPause),
        (&keys.quit, Command::Quit),
        (&keys.toggle_shuffle, Command::ToggleShuffle),
        (&keys.goto_song, Command::GotoSong(None)),
        (&keys.seek_backward, Command::SeekBack),
        (&keys.seek_forward, Command::SeekForward),
        (&keys.toggle_repeat, Command::ToggleRepeat),
        (&keys.save_playlist, Command::SavePlaylist),
        (&keys.play_pause, Command::PlayPause),
        (&keys.previous_track, Command::Prev),
        (&keys.next_track, Command::Next),
        (&keys.goto_song_alt, Command::GotoSong(None)),
        (&keys.scroll_up, Command::ScrollUp),
        (&keys.scroll_down, Command::ScrollDown),
        (&keys.show_track, Command::ShowTrack),
        (&keys.show_keys, Command::ShowKeyBindings),
        (&keys.show_playlist, Command::ShowPlaylist),
        (&keys.end_of_playlist, Command::GotoEnd),
        (&keys.next_page, Command::NextPage),
        (&keys.prev_page, Command::PrevPage),
        (&keys.remove, Command::RemoveCurrent),
    ];

    table
        .into_iter()
        .filter(|(sequence, _)| !sequence.is_empty())
        .map(|(sequence, command)| KeyRule {
            sequence: KeySequence::from(sequence.as_str()),
            command,
        })
        .collect()
}

/// Keys that repeat while held; the input decoder drains their repeats
pub fn continuous_keys(keys: &KeyBindings) -> Vec<KeySequence> {
    [
        &keys.scroll_up,
        &keys.scroll_down,
        &keys.scroll_up_alt,
        &keys.scroll_down_alt,
        &keys.seek_backward,
        &keys.seek_forward,
        &keys.next_page,
        &keys.prev_page,
    ]
    .into_iter()
    .filter(|key| !key.is_empty())
    .map(|key| KeySequence::from(key.as_str()))
    .collect()
}

/// Digits typed ahead of a goto key, plus the pending half of the `gg` chord
#[derive(Debug)]
pub struct InputAccumulator {
    digits: String,
    max_digits: usize,
    g_pending: bool,
}

impl InputAccumulator {
    pub fn new(max_digits: usize) -> Self {
        Self {
            digits: String::new(),
            max_digits,
            g_pending: false,
        }
    }

    /// Extra digits beyond the cap are dropped
    pub fn push_digit(&mut self, digit: u8) {
        if self.digits.len() < self.max_digits {
            self.digits.push(digit as char);
        }
    }

    pub fn digits(&self) -> &str {
        &self.digits
    }

    pub fn has_digits(&self) -> bool {
        !self.digits.is_empty()
    }

    pub fn clear_digits(&mut self) {
        self.digits.clear();
    }

    pub fn take_number(&mut self) -> Option<usize> {
        let number = self.digits.parse().ok();
        self.digits.clear();
        number
    }

    pub fn is_g_pending(&self) -> bool {
        self.g_pending
    }
}

/// Rate limit for timing-gated commands. Skips and seeks share one clock, so
/// a skip right after a seek waits out the skip interval too.
#[derive(Debug)]
struct Cooldown {
    skip_interval: Duration,
    seek_interval: Duration,
    last_accepted: Option<Instant>,
}

impl Cooldown {
    fn new(skip_interval: Duration, seek_interval: Duration) -> Self {
        Self {
            skip_interval,
            seek_interval,
            last_accepted: None,
        }
    }

    fn try_accept(&mut self, interval: Duration, now: Instant) -> bool {
        let ready = self
            .last_accepted
            .map_or(true, |last| now.saturating_duration_since(last) >= interval);
        if ready {
            self.last_accepted = Some(now);
        }
        ready
    }
}

/// Turns key sequences into player commands.
///
/// Stateful: digits typed before a goto key select the song, `gg` jumps to the
/// start, and skip/seek/remove presses are rate limited.
#[derive(Debug)]
pub struct KeyEventMapper {
    rules: Vec<KeyRule>,
    accumulator: InputAccumulator,
    goto_keys: Vec<u8>,
    end_key: Option<u8>,
    cooldown: Cooldown,
}

impl KeyEventMapper {
    pub fn new(keys: &KeyBindings, timing: &TimingConfig) -> Self {
        let goto_keys = [&keys.goto_song, &keys.goto_song_alt]
            .into_iter()
            .filter_map(|key| key.bytes().next())
            .collect();

        Self {
            rules: rules_from(keys),
            accumulator: InputAccumulator::new(timing.max_goto_digits),
            goto_keys,
            end_key: keys.end_of_playlist.bytes().next(),
            cooldown: Cooldown::new(timing.skip_cooldown(), timing.seek_cooldown()),
        }
    }

    pub fn accumulator(&self) -> &InputAccumulator {
        &self.accumulator
    }

    pub fn map(&mut self, sequence: &KeySequence, now: Instant) -> Option<Command> {
        let bytes = sequence.as_bytes();
        let first = sequence.first_byte()?;

        let mut command = self
            .rules
            .iter()
            .find(|rule| rule.sequence.as_bytes() == bytes)
            .map(|rule| rule.command);

        if first == b'g' && command.is_none() {
            if self.accumulator.g_pending {
                self.accumulator.g_pending = false;
                command = Some(Command::GotoStart);
            } else {
                self.accumulator.g_pending = true;
            }
        }

        if first.is_ascii_digit() {
            self.accumulator.push_digit(first);
        } else {
            for &byte in bytes {
                if byte.is_ascii_digit() {
                    self.accumulator.push_digit(byte);
                } else if Some(byte) == self.end_key {
                    command = Some(Command::GotoEnd);
                    break;
                } else if self.goto_keys.contains(&byte) {
                    command = Some(Command::GotoSong(None));
                    break;
                } else {
                    self.accumulator.clear_digits();
                    break;
                }
            }
        }

        command = match command {
            Some(Command::Next | Command::Prev)
                if !self.cooldown.try_accept(self.cooldown.skip_interval, now) =>
            {
                debug!("Skip ignored, too soon after the last one");
                None
            }
            Some(Command::SeekBack | Command::SeekForward | Command::RemoveCurrent)
                if !self.cooldown.try_accept(self.cooldown.seek_interval, now) =>
            {
                None
            }
            other => other,
        };

        if !matches!(command, None | Some(Command::GotoSong(_)) | Some(Command::GotoEnd)) {
            self.accumulator.clear_digits();
        }

        if first != b'g' {
            self.accumulator.g_pending = false;
        }

        match command {
            Some(Command::GotoSong(_)) => Some(Command::GotoSong(self.accumulator.take_number())),
            Some(Command::GotoEnd) if self.accumulator.has_digits() => {
                Some(Command::GotoSong(self.accumulator.take_number()))
            }
            other => other,
        }
    }
}
