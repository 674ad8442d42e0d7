use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::Line,
    widgets::{Block, Borders, Gauge, List, ListItem, ListState, Paragraph},
    Frame,
};

use super::{format_duration, RenderFrame, Renderer, TerminalManager};
use crate::config::KeyBindings;
use crate::error::Result;
use crate::input::keymap::rules_from;
use crate::input::{Command, KeySequence};
use crate::playback::{SchedulerPhase, TransportState, View};

/// Draws the player with ratatui
pub struct TerminalRenderer {
    terminal: TerminalManager,
    key_help: Vec<(String, &'static str)>,
}

impl TerminalRenderer {
    pub fn new(terminal: TerminalManager, keys: &KeyBindings) -> Self {
        let key_help = rules_from(keys)
            .into_iter()
            .map(|rule| (key_label(&rule.sequence), describe(rule.command)))
            .collect();

        Self { terminal, key_help }
    }
}

impl Renderer for TerminalRenderer {
    fn render(&mut self, frame: &RenderFrame<'_>) -> Result<()> {
        let key_help = &self.key_help;
        self.terminal.draw(|f| draw_frame(f, frame, key_help))?;
        Ok(())
    }
}

fn draw_frame(f: &mut Frame, frame: &RenderFrame<'_>, key_help: &[(String, &'static str)]) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Header
            Constraint::Min(0),    // Main content
            Constraint::Length(3), // Progress
        ])
        .split(f.area());

    render_header(f, chunks[0], frame);

    match frame.view.view {
        View::Playlist => render_playlist(f, chunks[1], frame),
        View::Track => render_track(f, chunks[1], frame),
        View::KeyBindings => render_keys(f, chunks[1], key_help),
    }

    render_progress(f, chunks[2], frame);
}

fn render_header(f: &mut Frame, area: Rect, frame: &RenderFrame<'_>) {
    let mut text = String::from("ocarina");
    if let Some(song) = frame.song {
        let now = song.now_playing();
        text = format!("{}  |  {} - {}", text, now.artist, now.title);
    }
    if let Some(status) = frame.status {
        text = format!("{}  |  {}", text, status);
    }

    let header = Paragraph::new(text)
        .style(Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD))
        .block(Block::default().borders(Borders::ALL));
    f.render_widget(header, area);
}

fn render_playlist(f: &mut Frame, area: Rect, frame: &RenderFrame<'_>) {
    let items: Vec<ListItem> = frame
        .playlist
        .iter()
        .enumerate()
        .map(|(index, node)| {
            let is_current = frame.current == Some(node.id);
            let prefix = if is_current { "> " } else { "  " };
            let content = format!(
                "{}{:>3}. {} - {}",
                prefix,
                index + 1,
                node.track.display_artist(),
                node.track.display_title()
            );

            let style = if is_current {
                Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)
            } else {
                Style::default()
            };
            ListItem::new(content).style(style)
        })
        .collect();

    let mut title = format!("Playlist ({} songs", frame.playlist.len());
    if let Some(total) = frame.playlist_duration {
        title = format!("{}, {}", title, format_duration(total));
    }
    title.push(')');

    let list = List::new(items)
        .block(Block::default().borders(Borders::ALL).title(title))
        .highlight_style(Style::default().bg(Color::DarkGray));

    let mut state = ListState::default();
    if !frame.playlist.is_empty() {
        state.select(Some(frame.view.chosen_row));
    }
    f.render_stateful_widget(list, area, &mut state);
}

fn render_track(f: &mut Frame, area: Rect, frame: &RenderFrame<'_>) {
    let lines: Vec<Line> = match frame.song {
        Some(song) => {
            let now = song.now_playing();
            let mut lines = vec![
                Line::from(format!("Title:  {}", now.title)),
                Line::from(format!("Artist: {}", now.artist)),
                Line::from(format!("Album:  {}", now.album)),
            ];
            if let Some(year) = song.metadata.year {
                lines.push(Line::from(format!("Year:   {}", year)));
            }
            if let Some(genre) = &song.metadata.genre {
                lines.push(Line::from(format!("Genre:  {}", genre)));
            }
            if let Some(pcm) = &song.pcm {
                lines.push(Line::from(format!("Format: {} Hz, {} ch", pcm.sample_rate, pcm.channels)));
            }
            lines.push(Line::from(format!("File:   {}", song.file_path.display())));
            if let Some(art) = &now.art_path {
                lines.push(Line::from(format!("Cover:  {}", art.display())));
            }
            lines
        }
        None => vec![Line::from("Nothing playing")],
    };

    let info = Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title("Track"));
    f.render_widget(info, area);
}

fn render_keys(f: &mut Frame, area: Rect, key_help: &[(String, &'static str)]) {
    let items: Vec<ListItem> = key_help
        .iter()
        .map(|(key, what)| ListItem::new(format!("{:>8}  {}", key, what)))
        .collect();

    let list = List::new(items).block(Block::default().borders(Borders::ALL).title("Keys"));
    f.render_widget(list, area);
}

fn render_progress(f: &mut Frame, area: Rect, frame: &RenderFrame<'_>) {
    let state = match (frame.phase, frame.intent.transport) {
        (SchedulerPhase::EndOfList, _) => "End of playlist",
        (SchedulerPhase::NoSong, _) => "Stopped",
        (_, TransportState::Paused) => "Paused",
        (_, TransportState::Seeking) => "Seeking",
        (_, TransportState::Stopped) => "Stopped",
        (_, TransportState::Playing) => "Playing",
    };

    let elapsed = frame.intent.elapsed;
    let duration = frame.song.and_then(|song| song.duration);
    let ratio = match duration {
        Some(total) if !total.is_zero() => (elapsed.as_secs_f64() / total.as_secs_f64()).clamp(0.0, 1.0),
        _ => 0.0,
    };

    let mut label = format!(
        "{}  {} / {}  vol {}%  repeat {}",
        state,
        format_duration(elapsed),
        duration.map(format_duration).unwrap_or_else(|| "--:--".into()),
        (frame.volume * 100.0).round() as u32,
        frame.intent.repeat.label()
    );
    if frame.intent.shuffle {
        label.push_str("  shuffle");
    }

    let gauge = Gauge::default()
        .block(Block::default().borders(Borders::ALL))
        .gauge_style(Style::default().fg(Color::Green))
        .ratio(ratio)
        .label(label);
    f.render_widget(gauge, area);
}

fn key_label(sequence: &KeySequence) -> String {
    match sequence.as_bytes() {
        b"\x1b[A" => "Up".into(),
        b"\x1b[B" => "Down".into(),
        b"\x1b[C" => "Right".into(),
        b"\x1b[D" => "Left".into(),
        b"\x1b[5~" => "PgUp".into(),
        b"\x1b[6~" => "PgDn".into(),
        b"\x1b[3~" => "Del".into(),
        b"\n" | b"\r" => "Enter".into(),
        _ => sequence.to_string(),
    }
}

fn describe(command: Command) -> &'static str {
    match command {
        Command::PlayPause => "play / pause",
        Command::Next => "next song",
        Command::Prev => "previous song",
        Command::SeekForward => "seek forward",
        Command::SeekBack => "seek back",
        Command::VolumeUp => "volume up",
        Command::VolumeDown => "volume down",
        Command::GotoSong(_) => "play song (type its number first)",
        Command::GotoStart => "first song (gg)",
        Command::GotoEnd => "last song",
        Command::ToggleShuffle => "shuffle",
        Command::ToggleRepeat => "repeat off / one / all",
        Command::RemoveCurrent => "remove current song",
        Command::SavePlaylist => "save playlist",
        Command::ScrollUp => "scroll up",
        Command::ScrollDown => "scroll down",
        Command::NextPage => "page down",
        Command::PrevPage => "page up",
        Command::ShowPlaylist => "playlist view",
        Command::ShowTrack => "track info",
        Command::ShowKeyBindings => "this help",
        Command::Quit => "quit",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escape_sequences_get_readable_labels() {
        assert_eq!(key_label(&KeySequence::from("\x1b[C")), "Right");
        assert_eq!(key_label(&KeySequence::from("\r")), "Enter");
        assert_eq!(key_label(&KeySequence::from("q")), "q");
    }
}
