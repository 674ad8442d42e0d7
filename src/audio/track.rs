use super::AudioFormat;
use id3::TagLike;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub id: Uuid,
    pub file_path: PathBuf,
    pub metadata: TrackMetadata,
    pub format: AudioFormat,
    pub file_size: u64,
    pub duration: Option<Duration>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackMetadata {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub album_artist: Option<String>,
    pub track_number: Option<u32>,
    pub year: Option<u32>,
    pub genre: Option<String>,
    pub duration_ms: Option<u64>,
}

impl Track {
    pub fn new(file_path: PathBuf) -> Self {
        let format = file_path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(AudioFormat::from_extension)
            .unwrap_or(AudioFormat::Unknown);

        Self {
            id: Uuid::new_v4(),
            file_path,
            metadata: TrackMetadata::default(),
            format,
            file_size: 0,
            duration: None,
        }
    }

    pub fn with_metadata(mut self, metadata: TrackMetadata) -> Self {
        self.metadata = metadata;
        if let Some(duration_ms) = self.metadata.duration_ms {
            self.duration = Some(Duration::from_millis(duration_ms));
        }
        self
    }

    pub fn display_title(&self) -> String {
        self.metadata.title.clone().unwrap_or_else(|| {
            self.file_path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .unwrap_or("Unknown")
                .to_string()
        })
    }

    pub fn display_artist(&self) -> String {
        self.metadata
            .artist
            .clone()
            .unwrap_or_else(|| "Unknown Artist".to_string())
    }

    pub fn display_album(&self) -> String {
        self.metadata
            .album
            .clone()
            .unwrap_or_else(|| "Unknown Album".to_string())
    }

    pub fn is_playable(&self) -> bool {
        self.format.is_supported() && self.file_path.exists()
    }

    /// Look for the usual cover image names next to the audio file
    pub fn find_cover_art(&self) -> Option<PathBuf> {
        const NAMES: [&str; 6] = [
            "cover.jpg",
            "cover.png",
            "folder.jpg",
            "folder.png",
            "front.jpg",
            "album.jpg",
        ];

        let dir = self.file_path.parent().unwrap_or_else(|| Path::new("."));
        NAMES
            .iter()
            .map(|name| dir.join(name))
            .find(|candidate| candidate.is_file())
    }
}

impl TrackMetadata {
    pub fn from_id3_tag(tag: &id3::Tag) -> Self {
        Self {
            title: tag.title().map(|s| s.to_string()),
            artist: tag.artist().map(|s| s.to_string()),
            album: tag.album().map(|s| s.to_string()),
            album_artist: tag.album_artist().map(|s| s.to_string()),
            track_number: tag.track(),
            year: tag.year().map(|y| y as u32),
            genre: tag.genre().map(|s| s.to_string()),
            duration_ms: tag.duration().map(|d| d as u64),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn title_falls_back_to_file_stem() {
        let track = Track::new(PathBuf::from("/music/01 - Intro.flac"));
        assert_eq!(track.display_title(), "01 - Intro");
        assert_eq!(track.display_artist(), "Unknown Artist");
        assert_eq!(track.format, AudioFormat::Flac);
    }

    #[test]
    fn metadata_duration_is_copied() {
        let track = Track::new(PathBuf::from("a.mp3")).with_metadata(TrackMetadata {
            title: Some("Song".into()),
            duration_ms: Some(61_000),
            ..Default::default()
        });
        assert_eq!(track.duration, Some(Duration::from_secs(61)));
        assert_eq!(track.display_title(), "Song");
    }

    #[test]
    fn cover_art_is_found_next_to_track() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("folder.jpg"), b"jpg").unwrap();
        let track = Track::new(dir.path().join("song.mp3"));
        assert_eq!(track.find_cover_art(), Some(dir.path().join("folder.jpg")));
    }
}
