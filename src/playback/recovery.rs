use tracing::{debug, warn};

use crate::audio::{NodeId, Playlist};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryStep {
    /// Try loading this node next
    Attempt(NodeId),
    /// No playable successor; the list ends after the current song
    Exhausted,
}

/// Walks forward from a song that failed to load, one node per tick, until
/// something loads or the playlist runs out.
///
/// The walk is bounded by the playlist length, so a list where every file is
/// broken gives up after visiting each node once.
#[derive(Debug, Default)]
pub struct ErrorRecoveryWalker {
    cursor: Option<NodeId>,
    attempts: usize,
}

impl ErrorRecoveryWalker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.cursor.is_some()
    }

    pub fn attempts(&self) -> usize {
        self.attempts
    }

    /// Start walking from `failed` unless a walk is already under way
    pub fn begin(&mut self, failed: NodeId) {
        if self.cursor.is_none() {
            debug!("Starting recovery after {}", failed);
            self.cursor = Some(failed);
            self.attempts = 0;
        }
    }

    pub fn step(&mut self, playlist: &Playlist) -> RecoveryStep {
        let Some(from) = self.cursor else {
            return RecoveryStep::Exhausted;
        };

        if self.attempts >= playlist.len() {
            warn!("Gave up after {} load attempts", self.attempts);
            self.reset();
            return RecoveryStep::Exhausted;
        }

        match playlist.next_of(from) {
            Some(next) => {
                self.cursor = Some(next);
                self.attempts += 1;
                debug!("Recovery attempt {} at {}", self.attempts, next);
                RecoveryStep::Attempt(next)
            }
            None => {
                warn!("No playable song after {}", from);
                self.reset();
                RecoveryStep::Exhausted
            }
        }
    }

    pub fn reset(&mut self) {
        self.cursor = None;
        self.attempts = 0;
    }
}
