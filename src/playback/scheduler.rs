// Tick-driven playback scheduler
// Owns the session, decides when to load, prefetch, recover and switch songs.
// Everything here runs on the control loop; the decoder worker only touches
// the loader's slots.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use super::loader::{LoadOutcome, SongData, SongLoader};
use super::recovery::{ErrorRecoveryWalker, RecoveryStep};
use super::{NextSong, RepeatMode, SchedulerPhase, SessionContext, TransportState, View};
use crate::audio::{DeviceHandle, NodeId, PlaylistStore, Track};
use crate::config::Config;
use crate::input::Command;
use crate::integration::DesktopIntegration;
use crate::ui::{RenderFrame, Renderer};

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub seek_step: Duration,
    pub volume_step: f32,
    pub rebuild_delay: Duration,
    pub page_size: usize,
    pub playlist_path: Option<PathBuf>,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            seek_step: Duration::from_secs(5),
            volume_step: 0.05,
            rebuild_delay: Duration::from_millis(3000),
            page_size: 10,
            playlist_path: None,
        }
    }
}

impl SchedulerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            seek_step: Duration::from_secs(config.audio.seek_step_secs),
            volume_step: config.audio.volume_step,
            rebuild_delay: config.timing.playlist_rebuild_delay(),
            page_size: 10,
            playlist_path: Some(config.playlist_path.clone()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Continue,
    Quit,
}

pub struct PlaybackScheduler {
    ctx: SessionContext,
    loader: SongLoader,
    walker: ErrorRecoveryWalker,
    device: DeviceHandle,
    integration: Box<dyn DesktopIntegration>,
    renderer: Box<dyn Renderer>,
    store: Box<dyn PlaylistStore>,
    settings: SchedulerSettings,
    phase: SchedulerPhase,
    // node whose load was issued last; recovery starts from it
    loading_node: Option<NodeId>,
    last_tick: Option<Instant>,
    last_rendered_second: Option<u64>,
    seek_input: bool,
}

impl PlaybackScheduler {
    pub fn new(
        ctx: SessionContext,
        loader: SongLoader,
        device: DeviceHandle,
        integration: Box<dyn DesktopIntegration>,
        renderer: Box<dyn Renderer>,
        store: Box<dyn PlaylistStore>,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            ctx,
            loader,
            walker: ErrorRecoveryWalker::new(),
            device,
            integration,
            renderer,
            store,
            settings,
            phase: SchedulerPhase::NoSong,
            loading_node: None,
            last_tick: None,
            last_rendered_second: None,
            seek_input: false,
        }
    }

    pub fn context(&self) -> &SessionContext {
        &self.ctx
    }

    pub fn phase(&self) -> SchedulerPhase {
        self.phase
    }

    pub fn loader(&self) -> &SongLoader {
        &self.loader
    }

    pub fn volume(&self) -> f32 {
        self.device.with(|device| device.volume())
    }

    /// Input is not polled while a song is being loaded
    pub fn is_loading(&self) -> bool {
        self.loader.is_loading() || self.phase == SchedulerPhase::LoadingFirst
    }

    pub fn handle(&mut self, command: Command, now: Instant) {
        debug!("Command {:?}", command);
        match command {
            Command::PlayPause => self.toggle_pause(),
            Command::Next => self.skip_forward(),
            Command::Prev => self.skip_back(),
            Command::SeekForward => self.queue_seek(self.settings.seek_step.as_millis() as i64),
            Command::SeekBack => self.queue_seek(-(self.settings.seek_step.as_millis() as i64)),
            Command::VolumeUp => self.change_volume(self.settings.volume_step),
            Command::VolumeDown => self.change_volume(-self.settings.volume_step),
            Command::GotoSong(Some(number)) => self.goto_number(number),
            Command::GotoSong(None) => self.goto_number(self.ctx.view.chosen_row + 1),
            Command::GotoStart => self.goto_number(1),
            Command::GotoEnd => match self.ctx.playlist.tail() {
                Some(tail) => self.skip_to(tail),
                None => self.ctx.set_status("Playlist is empty"),
            },
            Command::ToggleShuffle => self.toggle_shuffle(now),
            Command::ToggleRepeat => self.toggle_repeat(),
            Command::RemoveCurrent => self.remove_current(now),
            Command::SavePlaylist => self.save_playlist(),
            Command::ScrollUp => self.scroll(-1),
            Command::ScrollDown => self.scroll(1),
            Command::NextPage => self.scroll(self.settings.page_size as isize),
            Command::PrevPage => self.scroll(-(self.settings.page_size as isize)),
            Command::ShowPlaylist => self.show(View::Playlist),
            Command::ShowTrack => self.show(View::Track),
            Command::ShowKeyBindings => self.show(View::KeyBindings),
            Command::Quit => {
                info!("Quit requested");
                self.ctx.quit_requested = true;
            }
        }
    }

    pub fn tick(&mut self, now: Instant) -> TickOutcome {
        let delta = self
            .last_tick
            .map(|last| now.saturating_duration_since(last))
            .unwrap_or_default();
        self.last_tick = Some(now);
        self.ctx.intent.advance(delta);

        if self.ctx.intent.transport == TransportState::Seeking && !self.seek_input {
            self.flush_seek();
        }
        self.seek_input = false;

        self.refresh_player();

        if let Some(changed_at) = self.ctx.playlist_changed_at {
            if now.saturating_duration_since(changed_at) >= self.settings.rebuild_delay {
                self.rebuild_playlist();
            }
        }

        if !self.ctx.playlist.is_empty() {
            let mut recovered = false;
            if self.ctx.current.is_none() {
                self.start_if_requested();
            } else if self.loader.has_errors() {
                self.recovery_step();
                recovered = true;
            } else if !self.loader.is_loaded() {
                self.prefetch_next();
            }

            if self.walker.is_active() && self.loader_settled() && !self.loader.has_errors() {
                debug!("Recovered after {} attempts", self.walker.attempts());
                self.walker.reset();
            }

            if !recovered && self.should_transition() {
                self.prepare_next_song();
            }
        }

        if self.ctx.quit_requested {
            TickOutcome::Quit
        } else {
            TickOutcome::Continue
        }
    }

    /// Add tracks at the end; a stopped player resumes after the last song it played
    pub fn append_tracks(&mut self, tracks: Vec<Track>, now: Instant) {
        if tracks.is_empty() {
            return;
        }
        let count = tracks.len();
        for track in tracks {
            self.ctx.playlist.push_back(track);
        }
        self.ctx.mark_playlist_changed(now);
        info!("Appended {} songs", count);

        match self.phase {
            SchedulerPhase::EndOfList => self.ctx.waiting_for_next = true,
            SchedulerPhase::NoSong => self.ctx.waiting_for_playlist = true,
            _ => {
                // the list used to end after the current song
                if self.ctx.next == NextSong::Resolved(None) && !self.ctx.skipping {
                    self.invalidate_prefetch();
                }
            }
        }
    }

    pub fn shutdown(&mut self) {
        info!("Shutting down playback");
        self.device.with(|device| device.destroy());
        self.loader.shutdown();
        self.integration.notify_stopped();
        self.ctx.intent.transport = TransportState::Stopped;
        self.persist_playlist();
    }

    fn start_if_requested(&mut self) {
        let target = if let Some(target) = self.ctx.pending_start.take() {
            Some(target)
        } else if self.ctx.waiting_for_next {
            let playlist = &self.ctx.playlist;
            self.ctx
                .last_played
                .and_then(|last| playlist.next_of(last).or(Some(last).filter(|id| playlist.contains(*id))))
                .or(playlist.tail())
        } else if self.ctx.waiting_for_playlist {
            self.ctx.playlist.head()
        } else {
            None
        };

        if let Some(target) = target.filter(|id| self.ctx.playlist.contains(*id)) {
            self.start_playback(target);
        }
    }

    fn start_playback(&mut self, node: NodeId) {
        let Some(track) = self.ctx.playlist.track(node).cloned() else {
            return;
        };

        self.phase = SchedulerPhase::LoadingFirst;
        self.ctx.waiting_for_playlist = false;
        self.ctx.waiting_for_next = false;
        self.ctx.end_of_list = false;
        self.ctx.skipping = false;
        self.ctx.transition_requested = false;
        self.ctx.current = Some(node);
        self.ctx.next = NextSong::Unset;
        self.ctx.intent.reset_time();
        self.walker.reset();
        self.loading_node = Some(node);

        info!("Starting playback at '{}'", track.display_title());
        if let Err(e) = self.loader.load_first(node, &track) {
            warn!("First song failed to load: {}", e);
            self.ctx.set_status(format!("Could not play '{}'", track.display_title()));
            self.phase = SchedulerPhase::Transitioning;
            return;
        }

        let Some(song) = self.loader.active_song() else {
            self.phase = SchedulerPhase::Transitioning;
            return;
        };
        if !self.start_device(&song) {
            self.finish_list();
            return;
        }

        self.ctx.intent.transport = TransportState::Playing;
        self.ctx.refresh = true;
        self.integration.notify_started();
        self.phase = SchedulerPhase::Playing;
    }

    fn prefetch_next(&mut self) {
        if self.ctx.next != NextSong::Unset || self.loader.is_loading() {
            return;
        }

        let next = self.successor_of_current();
        self.ctx.next = NextSong::Resolved(next);
        match next {
            Some(node) => {
                self.issue_load(node);
                self.phase = SchedulerPhase::PrefetchingNext;
            }
            None => {
                debug!("Nothing after the current song");
                self.loader.mark_loaded();
            }
        }
    }

    fn recovery_step(&mut self) {
        let Some(failed) = self.loading_node.or(self.ctx.current) else {
            self.loader.clear_errors();
            return;
        };
        self.walker.begin(failed);

        match self.walker.step(&self.ctx.playlist) {
            RecoveryStep::Attempt(node) => {
                self.ctx.next = NextSong::Resolved(Some(node));
                self.issue_load(node);
            }
            RecoveryStep::Exhausted => {
                self.ctx.next = NextSong::Resolved(None);
                self.loader.clear_errors();
                self.loader.mark_loaded();
                self.ctx.set_status("No playable songs left");
            }
        }
    }

    fn should_transition(&self) -> bool {
        let active = matches!(
            self.phase,
            SchedulerPhase::Playing | SchedulerPhase::PrefetchingNext | SchedulerPhase::Transitioning
        );
        if !active || self.loader.has_errors() {
            return false;
        }
        self.ctx.transition_requested || self.device.with(|device| device.is_playback_finished())
    }

    fn prepare_next_song(&mut self) {
        self.phase = SchedulerPhase::Transitioning;

        let target = match self.ctx.next {
            NextSong::Resolved(next) => next,
            NextSong::Unset => self.successor_of_current(),
        };
        let Some(target) = target.filter(|id| self.ctx.playlist.contains(*id)) else {
            self.finish_list();
            return;
        };

        let incoming_matches = self
            .loader
            .incoming_song()
            .map_or(false, |song| song.node == target);
        if !incoming_matches && !self.loader.is_loading() {
            // the song ended before its prefetch was issued
            self.ctx.next = NextSong::Resolved(Some(target));
            self.issue_load(target);
        }

        match self.loader.finish_loading() {
            LoadOutcome::Ready => {}
            LoadOutcome::Failed => {
                debug!("Next song failed, leaving it to recovery");
                return;
            }
            LoadOutcome::TimedOut => {
                debug!("Next song still loading, trying again next tick");
                return;
            }
        }

        let Some(song) = self.loader.incoming_song().filter(|song| song.node == target) else {
            self.issue_load(target);
            return;
        };
        if !song.is_playable() {
            self.issue_load(target);
            return;
        }

        let previous = self.ctx.current;
        let skipping = self.ctx.skipping;
        if let Some(previous) = previous.filter(|id| self.ctx.playlist.contains(*id)) {
            self.ctx.last_played = Some(previous);
        }

        self.ctx.current = Some(target);
        self.ctx.intent.reset_time();
        if !self.start_device(&song) {
            self.finish_list();
            return;
        }
        self.ctx.intent.transport = TransportState::Playing;

        let repeat_same = self.ctx.intent.repeat == RepeatMode::One && previous == Some(target) && !skipping;
        if repeat_same {
            self.loader.swap_active();
        } else {
            self.loader.unload_previous(Some(song.track_id), skipping);
        }

        self.ctx.next = NextSong::Unset;
        self.ctx.skipping = false;
        self.ctx.transition_requested = false;
        self.ctx.refresh = true;
        self.ctx.status = None;
        self.walker.reset();
        self.phase = SchedulerPhase::Playing;

        info!("Now playing {} '{}'", target, song.now_playing().title);
    }

    /// Create the device on `song`, retrying once after a failure
    fn start_device(&mut self, song: &SongData) -> bool {
        let volume = self.device.with(|device| device.volume());
        let first = self.device.with(|device| device.create(song));
        let Err(e) = first else {
            return true;
        };

        warn!("Audio device failed, recreating: {}", e);
        let retry = self.device.with(|device| {
            device.destroy();
            let result = device.create(song);
            device.set_volume(volume);
            result
        });
        match retry {
            Ok(()) => true,
            Err(e) => {
                error!("Audio device unavailable: {}", e);
                self.ctx.set_status(format!("Audio device error: {}", e));
                false
            }
        }
    }

    fn finish_list(&mut self) {
        info!("End of playlist");
        self.ctx.end_of_list = true;
        if let Some(current) = self.ctx.current.filter(|id| self.ctx.playlist.contains(*id)) {
            self.ctx.last_played = Some(current);
        }
        self.ctx.current = None;
        self.ctx.next = NextSong::Unset;
        self.ctx.skipping = false;
        self.ctx.transition_requested = false;
        self.ctx.intent.transport = TransportState::Stopped;
        self.ctx.intent.reset_time();
        self.ctx.view.view = View::Playlist;
        self.ctx.view.chosen_row = self.ctx.playlist.len().saturating_sub(1);
        self.ctx.refresh = true;

        self.device.with(|device| device.destroy());
        self.loader.reset();
        self.walker.reset();
        self.loading_node = None;
        self.integration.notify_stopped();
        self.phase = SchedulerPhase::EndOfList;

        if self.ctx.quit_after_stopping {
            info!("Quitting after the last song");
            self.ctx.quit_requested = true;
        }
    }

    fn successor_of_current(&self) -> Option<NodeId> {
        let current = self.ctx.current?;
        let playlist = &self.ctx.playlist;
        match self.ctx.intent.repeat {
            RepeatMode::One => Some(current).filter(|id| playlist.contains(*id)),
            RepeatMode::All => playlist.next_of(current).or(playlist.head()),
            RepeatMode::Off => playlist.next_of(current),
        }
    }

    fn issue_load(&mut self, node: NodeId) {
        let Some(track) = self.ctx.playlist.track(node).cloned() else {
            return;
        };
        self.loading_node = Some(node);
        self.loader.load_next(node, &track);
    }

    fn invalidate_prefetch(&mut self) {
        self.ctx.next = NextSong::Unset;
        self.walker.reset();
        self.loader.rearm();
    }

    fn loader_settled(&self) -> bool {
        self.loader.is_loaded() && !self.loader.is_loading()
    }

    fn skip_to(&mut self, target: NodeId) {
        if self.ctx.current.is_none() {
            self.ctx.pending_start = Some(target);
            return;
        }

        self.ctx.skipping = true;
        self.ctx.transition_requested = true;
        self.ctx.next = NextSong::Resolved(Some(target));
        self.walker.reset();
        self.issue_load(target);
        self.ctx.refresh = true;
    }

    fn skip_forward(&mut self) {
        let Some(current) = self.ctx.current else {
            self.start_from_stop();
            return;
        };
        let playlist = &self.ctx.playlist;
        let next = match self.ctx.intent.repeat {
            RepeatMode::All => playlist.next_of(current).or(playlist.head()),
            _ => playlist.next_of(current),
        };
        match next {
            Some(next) => self.skip_to(next),
            None => self.ctx.set_status("Already at the last song"),
        }
    }

    fn skip_back(&mut self) {
        let Some(current) = self.ctx.current else {
            self.start_from_stop();
            return;
        };
        let playlist = &self.ctx.playlist;
        let prev = match self.ctx.intent.repeat {
            RepeatMode::All => playlist.prev_of(current).or(playlist.tail()),
            _ => playlist.prev_of(current),
        };
        // the first song restarts
        let target = prev.unwrap_or(current);
        if playlist.contains(target) {
            self.skip_to(target);
        }
    }

    fn start_from_stop(&mut self) {
        if self.ctx.end_of_list {
            self.ctx.waiting_for_next = true;
        } else {
            self.ctx.waiting_for_playlist = true;
        }
    }

    fn goto_number(&mut self, number: usize) {
        match self.ctx.playlist.node_at(number) {
            Some(node) => self.skip_to(node),
            None => self.ctx.set_status(format!("No song number {}", number)),
        }
    }

    fn toggle_pause(&mut self) {
        match self.ctx.intent.transport {
            TransportState::Playing => {
                self.device.with(|device| device.pause());
                self.ctx.intent.transport = TransportState::Paused;
            }
            TransportState::Paused => match self.device.with(|device| device.resume()) {
                Ok(()) => self.ctx.intent.transport = TransportState::Playing,
                Err(e) => warn!("Could not resume: {}", e),
            },
            TransportState::Seeking => {}
            TransportState::Stopped => self.start_from_stop(),
        }
        self.ctx.refresh = true;
    }

    fn queue_seek(&mut self, delta_ms: i64) {
        if self.ctx.current.is_none() || self.ctx.skipping {
            return;
        }
        if self.ctx.intent.transport != TransportState::Seeking {
            self.ctx.intent.resume_as = self.ctx.intent.transport;
            self.ctx.intent.transport = TransportState::Seeking;
        }
        self.ctx.intent.pending_seek_ms += delta_ms;
        self.seek_input = true;
        self.ctx.refresh = true;
    }

    fn flush_seek(&mut self) {
        let intent = &mut self.ctx.intent;
        let delta = std::mem::take(&mut intent.pending_seek_ms);
        intent.transport = intent.resume_as;

        let elapsed = intent.elapsed.as_millis() as i64;
        let target = Duration::from_millis((elapsed + delta).max(0) as u64);
        let duration = self.loader.active_song().and_then(|song| song.duration);

        if duration.map_or(false, |duration| target >= duration) {
            debug!("Seek past the end, moving on");
            // same path as the song running out
            self.ctx.transition_requested = true;
            return;
        }

        match self.device.with(|device| device.seek(target)) {
            Ok(()) => {
                self.ctx.intent.elapsed = target;
                self.ctx.refresh = true;
            }
            Err(e) => warn!("Seek failed: {}", e),
        }
    }

    fn change_volume(&mut self, delta: f32) {
        let volume = self.device.with(|device| {
            let volume = (device.volume() + delta).clamp(0.0, 1.0);
            device.set_volume(volume);
            volume
        });
        self.ctx.set_status(format!("Volume {}%", (volume * 100.0).round() as u32));
    }

    fn toggle_shuffle(&mut self, now: Instant) {
        let shuffle = !self.ctx.intent.shuffle;
        self.ctx.intent.shuffle = shuffle;
        if shuffle {
            let current = self.ctx.current;
            self.ctx.playlist.shuffle(current, &mut rand::thread_rng());
        } else {
            self.ctx.playlist.unshuffle();
        }
        if !self.ctx.skipping {
            self.invalidate_prefetch();
        }
        self.ctx.mark_playlist_changed(now);
        self.ctx.set_status(if shuffle { "Shuffle on" } else { "Shuffle off" });
    }

    fn toggle_repeat(&mut self) {
        self.ctx.intent.repeat = self.ctx.intent.repeat.cycle();
        if !self.ctx.skipping && self.ctx.current.is_some() {
            self.invalidate_prefetch();
        }
        self.ctx
            .set_status(format!("Repeat {}", self.ctx.intent.repeat.label()));
    }

    fn remove_current(&mut self, now: Instant) {
        let Some(current) = self.ctx.current else {
            return;
        };
        let successor = self.ctx.playlist.next_of(current);
        if let Some(track) = self.ctx.playlist.remove(current) {
            self.loader.mark_deleted(track.id);
            info!("Removed '{}' from the playlist", track.display_title());
        }
        if self.ctx.last_played == Some(current) {
            self.ctx.last_played = None;
        }
        self.ctx.mark_playlist_changed(now);

        match successor {
            Some(next) => self.skip_to(next),
            None => {
                self.ctx.skipping = true;
                self.ctx.next = NextSong::Resolved(None);
                self.ctx.transition_requested = true;
            }
        }
    }

    fn save_playlist(&mut self) {
        let Some(path) = self.settings.playlist_path.clone() else {
            self.ctx.set_status("No playlist path configured");
            return;
        };
        match self.store.persist(&path, &self.ctx.playlist) {
            Ok(()) => self.ctx.set_status(format!("Saved playlist to {}", path.display())),
            Err(e) => {
                warn!("Saving playlist failed: {}", e);
                self.ctx.set_status(format!("Could not save playlist: {}", e));
            }
        }
    }

    fn persist_playlist(&mut self) {
        let Some(path) = self.settings.playlist_path.as_ref() else {
            return;
        };
        if self.ctx.playlist.is_empty() {
            return;
        }
        if let Err(e) = self.store.persist(path, &self.ctx.playlist) {
            warn!("Saving playlist on exit failed: {}", e);
        }
    }

    fn scroll(&mut self, delta: isize) {
        let rows = self.ctx.playlist.len();
        self.ctx.view.move_by(delta, rows);
        self.ctx.refresh = true;
    }

    fn show(&mut self, view: View) {
        self.ctx.view.toggle(view);
        self.ctx.refresh = true;
    }

    /// Coalesced work after the playlist stopped changing
    fn rebuild_playlist(&mut self) {
        self.ctx.playlist_changed_at = None;
        self.ctx.playlist_duration = self.ctx.playlist.total_duration();

        let rows = self.ctx.playlist.len();
        if self.ctx.view.chosen_row >= rows {
            self.ctx.view.chosen_row = rows.saturating_sub(1);
        }

        if let NextSong::Resolved(Some(next)) = self.ctx.next {
            if !self.ctx.skipping && !self.ctx.playlist.contains(next) {
                debug!("Prefetched {} left the playlist", next);
                self.invalidate_prefetch();
            }
        }

        debug!("Rebuilt playlist view ({} songs)", rows);
        self.ctx.refresh = true;
    }

    fn refresh_player(&mut self) {
        if self.ctx.skipping || self.ctx.intent.transport == TransportState::Seeking {
            return;
        }

        let song = self.loader.active_song();
        let second = self.ctx.intent.elapsed.as_secs();
        if !self.ctx.refresh && self.last_rendered_second == Some(second) {
            return;
        }

        if self.ctx.refresh {
            if let (Some(song), Some(current)) = (song.as_ref(), self.ctx.current) {
                if song.is_playable() && song.node == current {
                    self.integration
                        .notify_metadata_changed(&song.now_playing(), current);
                }
            }
        }

        let volume = self.device.with(|device| device.volume());
        let shown = song.as_ref().filter(|song| Some(song.node) == self.ctx.current);
        let frame = RenderFrame {
            song: shown,
            playlist: &self.ctx.playlist,
            current: self.ctx.current,
            intent: &self.ctx.intent,
            view: &self.ctx.view,
            phase: self.phase,
            volume,
            playlist_duration: self.ctx.playlist_duration,
            status: self.ctx.status.as_deref(),
        };
        if let Err(e) = self.renderer.render(&frame) {
            warn!("Render failed: {}", e);
        }

        self.ctx.refresh = false;
        self.last_rendered_second = Some(second);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::device::testing::{FakeDevice, FakeDeviceState};
    use crate::audio::{DecoderPool, PcmBuffer, Playlist, TrackDecoder};
    use crate::error::{PlayerError, Result};
    use crate::integration::testing::{Event, RecordingIntegration};
    use crate::playback::loader::SongData;
    use crate::ui::NullRenderer;
    use parking_lot::Mutex;
    use std::path::Path;
    use std::sync::{mpsc, Arc};
    use uuid::Uuid;

    /// Files named `bad*` fail; everything else decodes to two seconds of silence.
    /// With a gate, `slow*` files block until the test sends on it.
    #[derive(Default)]
    struct ScriptedDecoder {
        attempts: Mutex<Vec<String>>,
        gate: Option<Mutex<mpsc::Receiver<()>>>,
    }

    impl TrackDecoder for ScriptedDecoder {
        fn decode(&self, node: NodeId, track: &Track) -> Result<SongData> {
            let name = track.display_title();
            self.attempts.lock().push(name.clone());
            if name.starts_with("slow") {
                if let Some(gate) = &self.gate {
                    let _ = gate.lock().recv();
                }
            }
            if name.starts_with("bad") {
                return Err(PlayerError::decode(&track.file_path, "unreadable"));
            }
            Ok(SongData::decoded(node, track, PcmBuffer::new(1, 10, vec![0; 20])))
        }
    }

    #[derive(Default)]
    struct MemoryStore {
        saved: Arc<Mutex<Vec<usize>>>,
    }

    impl PlaylistStore for MemoryStore {
        fn persist(&self, _path: &Path, playlist: &Playlist) -> Result<()> {
            self.saved.lock().push(playlist.len());
            Ok(())
        }

        fn load(&self, _path: &Path) -> Result<Playlist> {
            Ok(Playlist::new("memory"))
        }
    }

    struct Harness {
        scheduler: PlaybackScheduler,
        device: Arc<Mutex<FakeDeviceState>>,
        decoder: Arc<ScriptedDecoder>,
        events: Arc<Mutex<Vec<Event>>>,
        saved: Arc<Mutex<Vec<usize>>>,
        tracks: Vec<Track>,
        now: Instant,
    }

    impl Harness {
        fn new(names: &[&str]) -> Self {
            let decoder = Arc::new(ScriptedDecoder::default());
            let pool = DecoderPool::inline(decoder.clone());
            Self::build(names, decoder, pool)
        }

        /// Decodes on the worker thread; `slow*` files wait for `gate`
        fn threaded(names: &[&str], gate: mpsc::Receiver<()>) -> Self {
            let decoder = Arc::new(ScriptedDecoder {
                gate: Some(Mutex::new(gate)),
                ..Default::default()
            });
            let pool = DecoderPool::spawn(decoder.clone()).unwrap();
            Self::build(names, decoder, pool)
        }

        fn build(names: &[&str], decoder: Arc<ScriptedDecoder>, pool: DecoderPool) -> Self {
            let tracks: Vec<Track> = names
                .iter()
                .map(|name| Track::new(PathBuf::from(format!("{}.ogg", name))))
                .collect();
            let playlist = Playlist::from_tracks("test", tracks.clone());

            let loader = SongLoader::new(pool, 2, Duration::from_millis(1));
            let fake = FakeDevice::default();
            let device = fake.state.clone();
            let integration = RecordingIntegration::default();
            let events = integration.events.clone();
            let store = MemoryStore::default();
            let saved = store.saved.clone();

            let settings = SchedulerSettings {
                playlist_path: Some(PathBuf::from("session.json")),
                ..Default::default()
            };
            let scheduler = PlaybackScheduler::new(
                SessionContext::new(playlist, false),
                loader,
                DeviceHandle::new(fake),
                Box::new(integration),
                Box::new(NullRenderer::default()),
                Box::new(store),
                settings,
            );

            Self {
                scheduler,
                device,
                decoder,
                events,
                saved,
                tracks,
                now: Instant::now(),
            }
        }

        fn tick(&mut self) -> TickOutcome {
            self.now += Duration::from_millis(100);
            self.scheduler.tick(self.now)
        }

        fn handle(&mut self, command: Command) {
            self.scheduler.handle(command, self.now);
        }

        fn finish_song(&mut self) {
            self.device.lock().finished = true;
        }

        fn playing(&self) -> Option<Uuid> {
            self.device.lock().playing
        }

        fn id(&self, index: usize) -> Uuid {
            self.tracks[index].id
        }

        fn node(&self, index: usize) -> NodeId {
            self.scheduler.context().playlist.node_at(index + 1).unwrap()
        }

        fn attempts(&self) -> Vec<String> {
            self.decoder.attempts.lock().clone()
        }

        fn wait_for_load(&self) {
            for _ in 0..500 {
                if !self.scheduler.loader().is_loading() {
                    return;
                }
                std::thread::sleep(Duration::from_millis(2));
            }
            panic!("load never finished");
        }

        /// The active slot always backs the current song while playing
        fn assert_active_slot_matches(&self) {
            let current = self.scheduler.context().current.unwrap();
            let active = self.scheduler.loader().active_song().unwrap();
            assert_eq!(active.node, current);
            assert_eq!(Some(active.track_id), self.playing());
        }
    }

    #[test]
    fn first_tick_starts_the_head() {
        let mut h = Harness::new(&["a", "b", "c"]);
        h.tick();

        assert_eq!(h.scheduler.phase(), SchedulerPhase::Playing);
        assert_eq!(h.playing(), Some(h.id(0)));
        assert_eq!(h.scheduler.context().intent.transport, TransportState::Playing);
        assert_eq!(h.events.lock()[0], Event::Started);
        h.assert_active_slot_matches();
    }

    #[test]
    fn songs_play_in_order_and_list_ends() {
        let mut h = Harness::new(&["a", "b"]);
        h.tick();
        h.tick();
        assert_eq!(h.scheduler.phase(), SchedulerPhase::PrefetchingNext);
        assert!(h.scheduler.loader().is_loaded());

        h.finish_song();
        h.tick();
        assert_eq!(h.playing(), Some(h.id(1)));
        assert_eq!(h.scheduler.context().current, Some(h.node(1)));
        assert_eq!(h.scheduler.context().last_played, Some(h.node(0)));
        h.assert_active_slot_matches();

        h.tick();
        h.finish_song();
        h.tick();
        assert_eq!(h.scheduler.phase(), SchedulerPhase::EndOfList);
        assert!(h.scheduler.context().current.is_none());
        assert_eq!(h.playing(), None);
        assert!(h.events.lock().contains(&Event::Stopped));
        assert_eq!(h.scheduler.context().view.chosen_row, 1);
    }

    #[test]
    fn metadata_is_relayed_once_per_song() {
        let mut h = Harness::new(&["a", "b"]);
        h.tick();
        h.tick();
        h.tick();

        let a = h.id(0);
        let relays = h
            .events
            .lock()
            .iter()
            .filter(|event| matches!(event, Event::Metadata(id, _) if *id == a))
            .count();
        assert_eq!(relays, 1);
    }

    #[test]
    fn failed_song_is_skipped_by_recovery() {
        let mut h = Harness::new(&["a", "bad", "c"]);
        h.tick(); // start a
        h.tick(); // prefetch bad, fails
        assert!(h.scheduler.loader().has_errors());

        h.finish_song();
        h.tick(); // recovery loads c, no transition in the same tick
        assert_eq!(h.playing(), Some(h.id(0)));
        assert_eq!(h.attempts(), vec!["a", "bad", "c"]);

        h.tick();
        assert_eq!(h.playing(), Some(h.id(2)));
        assert_eq!(h.scheduler.context().current, Some(h.node(2)));
        h.assert_active_slot_matches();
    }

    #[test]
    fn recovery_never_interrupts_a_playing_song() {
        let mut h = Harness::new(&["a", "bad", "c"]);
        h.tick();
        h.tick();
        h.tick();
        h.tick();

        // a keeps playing; c waits in the other slot
        assert_eq!(h.playing(), Some(h.id(0)));
        assert_eq!(h.scheduler.context().next, NextSong::Resolved(Some(h.node(2))));

        h.finish_song();
        h.tick();
        assert_eq!(h.playing(), Some(h.id(2)));
    }

    #[test]
    fn all_bad_playlist_gives_up_after_len_minus_one_steps() {
        let names = ["bad1", "bad2", "bad3", "bad4"];
        let mut h = Harness::new(&names);

        h.tick(); // first load fails
        assert_eq!(h.scheduler.phase(), SchedulerPhase::Transitioning);
        assert_eq!(h.attempts().len(), 1);

        for step in 1..names.len() {
            h.tick();
            assert_eq!(h.attempts().len(), 1 + step, "one attempt per tick");
        }

        h.tick(); // walker finds no successor
        assert_eq!(h.attempts().len(), names.len());
        assert_eq!(h.scheduler.context().next, NextSong::Resolved(None));

        h.tick();
        assert_eq!(h.scheduler.phase(), SchedulerPhase::EndOfList);
        assert_eq!(h.attempts().len(), names.len());
        assert_eq!(h.playing(), None);
    }

    #[test]
    fn recovery_restarts_from_the_failed_song_after_a_success() {
        let mut h = Harness::new(&["a", "bad", "c", "d"]);
        h.tick(); // start a
        h.tick(); // prefetch bad, fails
        h.tick(); // recovery loads c
        assert!(!h.scheduler.walker.is_active());

        h.handle(Command::ToggleRepeat);
        h.tick(); // repeat one prefetches a
        h.handle(Command::ToggleRepeat);
        h.tick(); // repeat all prefetches bad again
        h.tick(); // recovery walks from bad, not from c

        assert_eq!(h.attempts(), vec!["a", "bad", "c", "a", "bad", "c"]);
        assert_eq!(h.scheduler.context().next, NextSong::Resolved(Some(h.node(2))));
        assert_eq!(h.scheduler.walker.attempts(), 0);
    }

    #[test]
    fn slow_song_plays_once_its_load_lands() {
        let (release, gate) = mpsc::channel();
        let mut h = Harness::threaded(&["a", "slow", "c"], gate);
        h.tick(); // start a
        h.handle(Command::Next);
        h.tick(); // waits out finish_loading, slow is still decoding

        assert_eq!(h.playing(), Some(h.id(0)));
        assert!(!h.scheduler.loader().has_errors());
        assert_eq!(h.scheduler.context().next, NextSong::Resolved(Some(h.node(1))));

        release.send(()).unwrap();
        h.wait_for_load();
        h.tick();

        assert_eq!(h.playing(), Some(h.id(1)));
        assert_eq!(h.attempts(), vec!["a", "slow"]);
        h.assert_active_slot_matches();
    }

    #[test]
    fn playlist_rebuild_waits_for_changes_to_settle() {
        let mut h = Harness::new(&["a", "b", "c"]);
        h.tick();
        h.tick(); // prefetch b
        let (b, c) = (h.node(1), h.node(2));
        assert_eq!(h.scheduler.context().next, NextSong::Resolved(Some(b)));
        assert_eq!(h.scheduler.context().playlist_duration, None);

        let timed = |name: &str, secs: u64| {
            let mut track = Track::new(PathBuf::from(format!("{}.ogg", name)));
            track.duration = Some(Duration::from_secs(secs));
            track
        };

        h.scheduler.append_tracks(vec![timed("x", 60)], h.now);
        for _ in 0..10 {
            h.tick();
        }
        h.scheduler.append_tracks(vec![timed("y", 30)], h.now);
        h.scheduler.ctx.playlist.remove(b);
        h.scheduler.ctx.mark_playlist_changed(h.now);

        for _ in 0..29 {
            h.tick();
        }
        assert!(h.scheduler.context().playlist_changed_at.is_some());
        assert_eq!(h.scheduler.context().playlist_duration, None);
        assert_eq!(h.scheduler.context().next, NextSong::Resolved(Some(b)));

        h.tick(); // three seconds after the last change
        assert!(h.scheduler.context().playlist_changed_at.is_none());
        assert_eq!(h.scheduler.context().playlist_duration, Some(Duration::from_secs(90)));
        // b left the list, so its prefetch is dropped and c loads instead
        assert_eq!(h.scheduler.context().next, NextSong::Resolved(Some(c)));
        assert_eq!(h.attempts().last().map(String::as_str), Some("c"));

        h.scheduler.ctx.playlist_duration = None;
        for _ in 0..40 {
            h.tick();
        }
        assert_eq!(h.scheduler.context().playlist_duration, None);
    }

    #[test]
    fn next_skips_immediately() {
        let mut h = Harness::new(&["a", "b", "c"]);
        h.tick();
        h.tick();
        h.handle(Command::Next);
        h.tick();

        assert_eq!(h.playing(), Some(h.id(1)));
        assert!(!h.scheduler.context().skipping);
        h.assert_active_slot_matches();
    }

    #[test]
    fn goto_number_plays_that_song() {
        let mut h = Harness::new(&["a", "b", "c", "d", "e"]);
        h.tick();
        h.handle(Command::GotoSong(Some(4)));
        h.tick();

        assert_eq!(h.playing(), Some(h.id(3)));
        assert_eq!(h.scheduler.context().current, Some(h.node(3)));
        h.assert_active_slot_matches();

        h.handle(Command::GotoSong(Some(9)));
        assert!(h.scheduler.context().status.as_deref().unwrap().contains("9"));
    }

    #[test]
    fn enter_without_number_plays_chosen_row() {
        let mut h = Harness::new(&["a", "b", "c"]);
        h.tick();
        h.handle(Command::ScrollDown);
        h.handle(Command::ScrollDown);
        h.handle(Command::GotoSong(None));
        h.tick();
        assert_eq!(h.playing(), Some(h.id(2)));
    }

    #[test]
    fn prev_on_first_song_restarts_it() {
        let mut h = Harness::new(&["a", "b"]);
        h.tick();
        h.handle(Command::Prev);
        h.tick();

        assert_eq!(h.playing(), Some(h.id(0)));
        assert_eq!(h.device.lock().created.len(), 2);
        h.assert_active_slot_matches();
    }

    #[test]
    fn repeat_one_replays_without_decoding_again() {
        let mut h = Harness::new(&["a", "b"]);
        h.tick();
        h.handle(Command::ToggleRepeat);
        assert_eq!(h.scheduler.context().intent.repeat, RepeatMode::One);
        h.tick(); // prefetch a again

        for _ in 0..3 {
            h.finish_song();
            h.tick();
            assert_eq!(h.playing(), Some(h.id(0)));
            h.assert_active_slot_matches();
        }
        assert_eq!(h.attempts(), vec!["a", "a"]);
    }

    #[test]
    fn repeat_all_wraps_to_head() {
        let mut h = Harness::new(&["a", "b"]);
        h.tick();
        h.handle(Command::ToggleRepeat);
        h.handle(Command::ToggleRepeat);
        assert_eq!(h.scheduler.context().intent.repeat, RepeatMode::All);

        h.tick();
        h.finish_song();
        h.tick(); // b
        h.tick();
        h.finish_song();
        h.tick(); // back to a
        assert_eq!(h.playing(), Some(h.id(0)));
    }

    #[test]
    fn seek_is_applied_when_keys_stop() {
        let mut h = Harness::new(&["a", "b"]);
        h.tick();
        h.handle(Command::SeekForward);
        h.tick();
        assert!(h.device.lock().seeks.is_empty());
        assert_eq!(h.scheduler.context().intent.transport, TransportState::Seeking);

        h.tick();
        assert_eq!(h.scheduler.context().intent.transport, TransportState::Playing);
        // songs are two seconds long, so five seconds forward moves on
        assert_eq!(h.playing(), Some(h.id(1)));
    }

    #[test]
    fn seek_back_inside_the_song() {
        let mut h = Harness::new(&["a"]);
        h.tick();
        h.tick();
        h.handle(Command::SeekBack);
        h.tick();
        h.tick();

        assert_eq!(h.device.lock().seeks, vec![Duration::ZERO]);
        assert_eq!(h.playing(), Some(h.id(0)));
    }

    #[test]
    fn remove_current_moves_to_successor() {
        let mut h = Harness::new(&["a", "b", "c"]);
        h.tick();
        h.handle(Command::RemoveCurrent);
        h.tick();

        assert_eq!(h.scheduler.context().playlist.len(), 2);
        assert_eq!(h.playing(), Some(h.id(1)));
        h.assert_active_slot_matches();
    }

    #[test]
    fn appending_after_end_resumes_with_new_songs() {
        let mut h = Harness::new(&["a"]);
        h.tick();
        h.finish_song();
        h.tick();
        assert_eq!(h.scheduler.phase(), SchedulerPhase::EndOfList);

        let extra = Track::new(PathBuf::from("z.ogg"));
        let extra_id = extra.id;
        h.scheduler.append_tracks(vec![extra], h.now);
        h.tick();

        assert_eq!(h.playing(), Some(extra_id));
        assert_eq!(h.scheduler.phase(), SchedulerPhase::Playing);
    }

    #[test]
    fn quit_after_stopping_ends_the_loop() {
        let mut h = Harness::new(&["a"]);
        h.scheduler.ctx.quit_after_stopping = true;
        h.tick();
        h.finish_song();
        assert_eq!(h.tick(), TickOutcome::Quit);
    }

    #[test]
    fn pause_and_resume_track_time() {
        let mut h = Harness::new(&["a"]);
        h.tick();
        h.handle(Command::PlayPause);
        assert!(h.device.lock().paused);
        h.tick();
        h.tick();
        assert_eq!(h.scheduler.context().intent.paused_for, Duration::from_millis(200));

        h.handle(Command::PlayPause);
        assert!(!h.device.lock().paused);
        assert_eq!(h.scheduler.context().intent.transport, TransportState::Playing);
    }

    #[test]
    fn volume_moves_in_steps() {
        let mut h = Harness::new(&["a"]);
        h.device.lock().volume = 0.5;
        h.handle(Command::VolumeUp);
        assert!((h.device.lock().volume - 0.55).abs() < 1e-6);
        h.handle(Command::VolumeDown);
        h.handle(Command::VolumeDown);
        assert!((h.device.lock().volume - 0.45).abs() < 1e-6);
    }

    #[test]
    fn device_failure_retries_then_stops() {
        let mut h = Harness::new(&["a", "b"]);
        h.device.lock().fail_creates = 1;
        h.tick();
        assert_eq!(h.playing(), Some(h.id(0)));

        h.tick();
        h.device.lock().fail_creates = 2;
        h.finish_song();
        h.tick();
        assert_eq!(h.scheduler.phase(), SchedulerPhase::EndOfList);
    }

    #[test]
    fn shutdown_persists_and_reports_stop() {
        let mut h = Harness::new(&["a", "b"]);
        h.tick();
        h.handle(Command::Quit);
        assert_eq!(h.tick(), TickOutcome::Quit);

        h.scheduler.shutdown();
        assert_eq!(*h.saved.lock(), vec![2]);
        assert_eq!(h.playing(), None);
        assert_eq!(h.events.lock().last(), Some(&Event::Stopped));
    }

    #[test]
    fn shuffle_invalidates_the_prefetch() {
        let mut h = Harness::new(&["a", "b", "c", "d"]);
        h.tick();
        h.tick();
        assert!(matches!(h.scheduler.context().next, NextSong::Resolved(Some(_))));

        h.handle(Command::ToggleShuffle);
        assert_eq!(h.scheduler.context().next, NextSong::Unset);
        assert_eq!(h.scheduler.context().playlist.head(), Some(h.node(0)));
        assert!(!h.scheduler.loader().is_loaded());
    }
}
