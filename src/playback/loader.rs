// Double-buffered song loading
// One slot feeds the audio device while the other is filled in the background.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::audio::{DecoderPool, NodeId, PcmBuffer, Track, TrackMetadata};
use crate::error::{PlayerError, Result};
use crate::integration::NowPlaying;

/// Everything the device and the renderer need to know about a loaded song
#[derive(Debug, Clone)]
pub struct SongData {
    pub node: NodeId,
    pub track_id: Uuid,
    pub file_path: PathBuf,
    pub metadata: TrackMetadata,
    pub cover_art_path: Option<PathBuf>,
    pub duration: Option<Duration>,
    pub pcm: Option<Arc<PcmBuffer>>,
    pub has_errors: bool,
    /// The song's node was removed from the playlist while loaded
    pub deleted: bool,
}

impl SongData {
    pub fn decoded(node: NodeId, track: &Track, pcm: PcmBuffer) -> Self {
        let duration = Some(pcm.duration()).filter(|d| !d.is_zero()).or(track.duration);
        Self {
            node,
            track_id: track.id,
            file_path: track.file_path.clone(),
            metadata: track.metadata.clone(),
            cover_art_path: track.find_cover_art(),
            duration,
            pcm: Some(Arc::new(pcm)),
            has_errors: false,
            deleted: false,
        }
    }

    pub fn failed(node: NodeId, track_id: Uuid, file_path: PathBuf) -> Self {
        Self {
            node,
            track_id,
            file_path,
            metadata: TrackMetadata::default(),
            cover_art_path: None,
            duration: None,
            pcm: None,
            has_errors: true,
            deleted: false,
        }
    }

    pub fn is_playable(&self) -> bool {
        !self.has_errors && !self.deleted && self.pcm.is_some()
    }

    pub fn now_playing(&self) -> NowPlaying {
        let stem = self
            .file_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("Unknown")
            .to_string();

        NowPlaying {
            track_id: self.track_id,
            title: self.metadata.title.clone().unwrap_or(stem),
            artist: self.metadata.artist.clone().unwrap_or_else(|| "Unknown Artist".into()),
            album: self.metadata.album.clone().unwrap_or_else(|| "Unknown Album".into()),
            art_path: self.cover_art_path.clone(),
            duration: self.duration,
        }
    }
}

#[derive(Debug, Default)]
pub struct SongDataSlot {
    pub song: Option<SongData>,
    /// Bumped whenever the slot is claimed or released; completions carrying
    /// an older generation are discarded.
    pub generation: u64,
}

/// Shared between the scheduler and the decoder worker
#[derive(Debug, Default)]
pub struct LoadingState {
    slots: Mutex<[SongDataSlot; 2]>,
    loading: AtomicBool,
    loaded_next: AtomicBool,
    failed: AtomicBool,
}

/// Claim on one slot for a single background load
#[derive(Debug)]
pub struct LoadTicket {
    state: Arc<LoadingState>,
    slot: usize,
    generation: u64,
    node: NodeId,
    track_id: Uuid,
    file_path: PathBuf,
}

impl LoadTicket {
    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn complete(self, result: Result<SongData>) {
        let failed = {
            let mut slots = self.state.slots.lock();
            let slot = &mut slots[self.slot];
            if slot.generation != self.generation {
                debug!(
                    "Dropping stale load of {} for slot {}",
                    self.file_path.display(),
                    slot_name(self.slot)
                );
                return;
            }

            match result {
                Ok(song) => {
                    slot.song = Some(song);
                    false
                }
                Err(e) => {
                    warn!("Load into slot {} failed: {}", slot_name(self.slot), e);
                    slot.song = Some(SongData::failed(self.node, self.track_id, self.file_path.clone()));
                    true
                }
            }
        };

        self.state.failed.store(failed, Ordering::SeqCst);
        if !failed {
            self.state.loaded_next.store(true, Ordering::SeqCst);
        }
        self.state.loading.store(false, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    Ready,
    Failed,
    TimedOut,
}

pub struct SongLoader {
    state: Arc<LoadingState>,
    pool: DecoderPool,
    active: usize,
    load_epoch: u64,
    released_epoch: Option<u64>,
    finish_retries: u32,
    finish_interval: Duration,
}

impl SongLoader {
    pub fn new(pool: DecoderPool, finish_retries: u32, finish_interval: Duration) -> Self {
        Self {
            state: Arc::new(LoadingState::default()),
            pool,
            active: 0,
            load_epoch: 0,
            released_epoch: None,
            finish_retries,
            finish_interval,
        }
    }

    pub fn active_slot(&self) -> usize {
        self.active
    }

    pub fn incoming_slot(&self) -> usize {
        1 - self.active
    }

    pub fn is_loading(&self) -> bool {
        self.state.loading.load(Ordering::SeqCst)
    }

    /// The incoming slot holds the next song, or nothing needs prefetching
    pub fn is_loaded(&self) -> bool {
        self.state.loaded_next.load(Ordering::SeqCst)
    }

    pub fn has_errors(&self) -> bool {
        self.state.failed.load(Ordering::SeqCst)
    }

    pub fn mark_loaded(&self) {
        self.state.loaded_next.store(true, Ordering::SeqCst);
    }

    /// Forget the current prefetch so the next tick loads again
    pub fn rearm(&self) {
        self.state.loaded_next.store(false, Ordering::SeqCst);
    }

    pub fn clear_errors(&self) {
        self.state.failed.store(false, Ordering::SeqCst);
    }

    /// Synchronously load the first song into slot A and make it active
    pub fn load_first(&mut self, node: NodeId, track: &Track) -> Result<()> {
        self.load_epoch += 1;
        self.active = 0;
        self.state.loading.store(true, Ordering::SeqCst);
        self.state.loaded_next.store(false, Ordering::SeqCst);
        self.state.failed.store(false, Ordering::SeqCst);

        {
            let mut slots = self.state.slots.lock();
            slots[0].generation += 1;
            slots[0].song = None;
        }

        let result = self.pool.decode_blocking(node, track);
        let failed = result.is_err();
        {
            let mut slots = self.state.slots.lock();
            slots[0].song = Some(match &result {
                Ok(song) => song.clone(),
                Err(_) => SongData::failed(node, track.id, track.file_path.clone()),
            });
        }

        self.state.failed.store(failed, Ordering::SeqCst);
        self.state.loading.store(false, Ordering::SeqCst);

        match result {
            Ok(_) => {
                info!("Loaded first song '{}' into slot A", track.display_title());
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Start filling the incoming slot in the background
    pub fn load_next(&mut self, node: NodeId, track: &Track) {
        self.load_epoch += 1;
        let slot = self.incoming_slot();

        self.state.loaded_next.store(false, Ordering::SeqCst);
        self.state.failed.store(false, Ordering::SeqCst);
        self.state.loading.store(true, Ordering::SeqCst);

        let generation = {
            let mut slots = self.state.slots.lock();
            slots[slot].generation += 1;
            slots[slot].song = None;
            slots[slot].generation
        };

        debug!("Loading '{}' into slot {}", track.display_title(), slot_name(slot));
        let ticket = LoadTicket {
            state: Arc::clone(&self.state),
            slot,
            generation,
            node,
            track_id: track.id,
            file_path: track.file_path.clone(),
        };
        self.pool.decode_into(ticket, track.clone());
    }

    /// Wait a bounded time for an in-flight load. Afterwards the next song
    /// counts as loaded either way; a load that is still running keeps its
    /// slot and lands whenever the worker finishes it.
    pub fn finish_loading(&self) -> LoadOutcome {
        let mut tries = 0;
        while self.is_loading() && tries < self.finish_retries {
            thread::sleep(self.finish_interval);
            tries += 1;
        }

        let outcome = if self.has_errors() {
            LoadOutcome::Failed
        } else if self.is_loading() {
            LoadOutcome::TimedOut
        } else {
            LoadOutcome::Ready
        };

        if outcome == LoadOutcome::TimedOut {
            let err = PlayerError::TimeoutExhausted {
                waited: self.finish_interval * self.finish_retries,
            };
            warn!("{}", err);
        }
        self.mark_loaded();

        outcome
    }

    /// Release the slot that no longer backs the current song and make the
    /// other one active. Repeated calls without a new load in between do nothing.
    pub fn unload_previous(&mut self, current_track: Option<Uuid>, skipping: bool) -> bool {
        if self.released_epoch == Some(self.load_epoch) {
            return false;
        }

        let mut slots = self.state.slots.lock();
        let current_deleted = slots.iter().any(|slot| {
            slot.song
                .as_ref()
                .map_or(false, |song| song.deleted && Some(song.track_id) == current_track)
        });

        let slot = &mut slots[self.active];
        let stale = skipping
            || current_track.is_none()
            || current_deleted
            || slot
                .song
                .as_ref()
                .map_or(false, |song| Some(song.track_id) != current_track);

        if !stale {
            return false;
        }

        slot.song = None;
        slot.generation += 1;
        drop(slots);

        debug!("Released slot {}", slot_name(self.active));
        self.active = 1 - self.active;
        self.released_epoch = Some(self.load_epoch);
        self.state.loaded_next.store(false, Ordering::SeqCst);
        true
    }

    /// Repeat-one: the incoming slot holds a copy of the current song, so
    /// the slots trade places and both stay filled.
    pub fn swap_active(&mut self) {
        self.active = 1 - self.active;
        self.released_epoch = Some(self.load_epoch);
    }

    pub fn active_song(&self) -> Option<SongData> {
        self.state.slots.lock()[self.active].song.clone()
    }

    pub fn incoming_song(&self) -> Option<SongData> {
        self.state.slots.lock()[self.incoming_slot()].song.clone()
    }

    /// Flag every slot holding `track_id` as removed from the playlist
    pub fn mark_deleted(&self, track_id: Uuid) {
        let mut slots = self.state.slots.lock();
        for song in slots.iter_mut().filter_map(|slot| slot.song.as_mut()) {
            if song.track_id == track_id {
                song.deleted = true;
            }
        }
    }

    /// Empty both slots and start over from slot A
    pub fn reset(&mut self) {
        {
            let mut slots = self.state.slots.lock();
            for slot in slots.iter_mut() {
                slot.song = None;
                slot.generation += 1;
            }
        }
        self.active = 0;
        self.load_epoch += 1;
        self.released_epoch = None;
        self.state.loading.store(false, Ordering::SeqCst);
        self.state.loaded_next.store(false, Ordering::SeqCst);
        self.state.failed.store(false, Ordering::SeqCst);
    }

    pub fn shutdown(&mut self) {
        if self.is_loading() {
            self.finish_loading();
        }
        self.pool.reset_all();
        self.reset();
    }
}

fn slot_name(slot: usize) -> char {
    if slot == 0 {
        'A'
    } else {
        'B'
    }
}
