use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::track::Track;
use crate::error::{PlayerError, Result};

/// Stable handle to a node. Ids are never reused within one playlist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(u64);

impl NodeId {
    #[cfg(test)]
    pub(crate) fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone)]
pub struct PlaylistNode {
    pub id: NodeId,
    pub track: Track,
    prev: Option<NodeId>,
    next: Option<NodeId>,
}

impl PlaylistNode {
    pub fn prev(&self) -> Option<NodeId> {
        self.prev
    }

    pub fn next(&self) -> Option<NodeId> {
        self.next
    }
}

/// Doubly linked play order over an arena that owns every node.
///
/// Links are plain ids, so traversal never keeps a removed node alive: looking
/// up an id after `remove` simply yields `None`.
#[derive(Debug, Clone, Default)]
pub struct Playlist {
    pub name: String,
    nodes: HashMap<NodeId, PlaylistNode>,
    head: Option<NodeId>,
    tail: Option<NodeId>,
    next_id: u64,
    // play order before shuffling, restored by `unshuffle`
    original_order: Option<Vec<NodeId>>,
}

impl Playlist {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn from_tracks(name: impl Into<String>, tracks: impl IntoIterator<Item = Track>) -> Self {
        let mut playlist = Self::new(name);
        for track in tracks {
            playlist.push_back(track);
        }
        playlist
    }

    pub fn push_back(&mut self, track: Track) -> NodeId {
        let id = NodeId(self.next_id);
        self.next_id += 1;

        let node = PlaylistNode {
            id,
            track,
            prev: self.tail,
            next: None,
        };

        match self.tail.and_then(|tail| self.nodes.get_mut(&tail)) {
            Some(tail) => tail.next = Some(id),
            None => self.head = Some(id),
        }
        self.tail = Some(id);
        self.nodes.insert(id, node);

        if let Some(order) = self.original_order.as_mut() {
            order.push(id);
        }
        id
    }

    /// Unlink and drop a node, returning its track
    pub fn remove(&mut self, id: NodeId) -> Option<Track> {
        let node = self.nodes.remove(&id)?;

        match node.prev.and_then(|prev| self.nodes.get_mut(&prev)) {
            Some(prev) => prev.next = node.next,
            None => self.head = node.next,
        }
        match node.next.and_then(|next| self.nodes.get_mut(&next)) {
            Some(next) => next.prev = node.prev,
            None => self.tail = node.prev,
        }

        if let Some(order) = self.original_order.as_mut() {
            order.retain(|other| *other != id);
        }

        debug!("Removed {} '{}' from playlist", id, node.track.display_title());
        Some(node.track)
    }

    pub fn get(&self, id: NodeId) -> Option<&PlaylistNode> {
        self.nodes.get(&id)
    }

    pub fn track(&self, id: NodeId) -> Option<&Track> {
        self.nodes.get(&id).map(|node| &node.track)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn head(&self) -> Option<NodeId> {
        self.head
    }

    pub fn tail(&self) -> Option<NodeId> {
        self.tail
    }

    pub fn next_of(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.get(&id).and_then(|node| node.next)
    }

    pub fn prev_of(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.get(&id).and_then(|node| node.prev)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> PlaylistIter<'_> {
        PlaylistIter {
            playlist: self,
            cursor: self.head,
        }
    }

    pub fn ids(&self) -> Vec<NodeId> {
        self.iter().map(|node| node.id).collect()
    }

    /// Node at a 1-based position, the way songs are numbered on screen
    pub fn node_at(&self, position: usize) -> Option<NodeId> {
        if position == 0 {
            return None;
        }
        self.iter().nth(position - 1).map(|node| node.id)
    }

    /// 1-based position of a node
    pub fn position_of(&self, id: NodeId) -> Option<usize> {
        self.iter().position(|node| node.id == id).map(|index| index + 1)
    }

    pub fn is_shuffled(&self) -> bool {
        self.original_order.is_some()
    }

    /// Randomize play order. `keep_first` (usually the current song) is moved
    /// to the head so playback continues from it.
    pub fn shuffle<R: Rng + ?Sized>(&mut self, keep_first: Option<NodeId>, rng: &mut R) {
        let mut order = self.ids();
        if self.original_order.is_none() {
            self.original_order = Some(order.clone());
        }

        order.shuffle(rng);
        if let Some(first) = keep_first {
            if let Some(index) = order.iter().position(|id| *id == first) {
                order.swap(0, index);
            }
        }
        self.relink(&order);
        info!("Shuffled playlist '{}' ({} songs)", self.name, order.len());
    }

    pub fn unshuffle(&mut self) {
        if let Some(order) = self.original_order.take() {
            self.relink(&order);
            info!("Restored original order of playlist '{}'", self.name);
        }
    }

    pub fn total_duration(&self) -> Option<Duration> {
        let total: Duration = self.iter().filter_map(|node| node.track.duration).sum();
        if total.is_zero() {
            None
        } else {
            Some(total)
        }
    }

    fn relink(&mut self, order: &[NodeId]) {
        let order: Vec<NodeId> = order
            .iter()
            .copied()
            .filter(|id| self.nodes.contains_key(id))
            .collect();

        for (index, id) in order.iter().enumerate() {
            if let Some(node) = self.nodes.get_mut(id) {
                node.prev = index.checked_sub(1).map(|prev| order[prev]);
                node.next = order.get(index + 1).copied();
            }
        }
        self.head = order.first().copied();
        self.tail = order.last().copied();
    }
}

pub struct PlaylistIter<'a> {
    playlist: &'a Playlist,
    cursor: Option<NodeId>,
}

impl<'a> Iterator for PlaylistIter<'a> {
    type Item = &'a PlaylistNode;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.playlist.nodes.get(&self.cursor?)?;
        self.cursor = node.next;
        Some(node)
    }
}

/// Where the session playlist is saved on exit and read back on startup
pub trait PlaylistStore {
    fn persist(&self, path: &Path, playlist: &Playlist) -> Result<()>;
    fn load(&self, path: &Path) -> Result<Playlist>;
}

#[derive(Debug, Serialize, Deserialize)]
struct PlaylistFile {
    name: String,
    saved_at: chrono::DateTime<chrono::Utc>,
    tracks: Vec<Track>,
}

/// Stores playlists as pretty-printed JSON
#[derive(Debug, Default, Clone)]
pub struct JsonPlaylistStore;

impl PlaylistStore for JsonPlaylistStore {
    fn persist(&self, path: &Path, playlist: &Playlist) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = PlaylistFile {
            name: playlist.name.clone(),
            saved_at: chrono::Utc::now(),
            tracks: playlist.iter().map(|node| node.track.clone()).collect(),
        };
        let json = serde_json::to_string_pretty(&file)?;
        fs::write(path, json)?;

        info!("Saved playlist '{}' ({} songs) to {}", playlist.name, file.tracks.len(), path.display());
        Ok(())
    }

    fn load(&self, path: &Path) -> Result<Playlist> {
        let content = fs::read_to_string(path)
            .map_err(|e| PlayerError::Playlist(format!("failed to read {}: {}", path.display(), e)))?;
        let file: PlaylistFile = serde_json::from_str(&content)?;

        info!("Loaded playlist '{}' ({} songs) from {}", file.name, file.tracks.len(), path.display());
        Ok(Playlist::from_tracks(file.name, file.tracks))
    }
}
