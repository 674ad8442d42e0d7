use super::{AudioFormat, Track, TrackMetadata};
use anyhow::Result;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Turns files and directories into playable tracks with tag metadata
#[derive(Clone)]
pub struct MusicScanner {
    supported_extensions: Vec<String>,
}

impl MusicScanner {
    pub fn new() -> Self {
        Self {
            supported_extensions: ["mp3", "flac", "ogg", "oga", "opus", "mp4", "m4a", "aac", "wav"]
                .iter()
                .map(|ext| ext.to_string())
                .collect(),
        }
    }

    /// Resolve command line arguments: files are taken as-is, directories are
    /// walked recursively in sorted order.
    pub fn scan_paths(&self, paths: &[PathBuf]) -> Result<Vec<Track>> {
        let mut tracks = Vec::new();

        for path in paths {
            if path.is_dir() {
                tracks.extend(self.scan_directory(path)?);
            } else if path.is_file() && self.is_supported_file(path) {
                tracks.push(self.create_track_from_file(path)?);
            } else {
                warn!("Skipping '{}': not a supported audio file or directory", path.display());
            }
        }

        Ok(tracks)
    }

    pub fn scan_directory<P: AsRef<Path>>(&self, path: P) -> Result<Vec<Track>> {
        let mut tracks = Vec::new();

        let walker = WalkDir::new(path)
            .follow_links(true)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|entry| entry.ok());

        for entry in walker {
            let path = entry.path();
            if !entry.file_type().is_file() {
                continue;
            }

            // Skip hidden files (dotfiles)
            if path
                .file_name()
                .and_then(|n| n.to_str())
                .map_or(false, |n| n.starts_with('.'))
            {
                continue;
            }

            // Skip empty files or files > 1GB
            if let Ok(metadata) = fs::metadata(path) {
                if metadata.len() == 0 || metadata.len() > 1_000_000_000 {
                    continue;
                }
            }

            if self.is_supported_file(path) {
                match self.create_track_from_file(path) {
                    Ok(track) => tracks.push(track),
                    Err(e) => debug!("Could not read {}: {}", path.display(), e),
                }
            }
        }

        Ok(tracks)
    }

    pub fn scan_directories(&self, paths: &[PathBuf]) -> Result<Vec<Track>> {
        let mut all_tracks = Vec::new();

        for path in paths.iter().filter(|path| path.exists()) {
            all_tracks.append(&mut self.scan_directory(path)?);
        }

        Ok(all_tracks)
    }

    fn is_supported_file(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| {
                let normalized = ext.to_ascii_lowercase();
                self.supported_extensions.contains(&normalized)
            })
            .unwrap_or(false)
    }

    fn create_track_from_file(&self, path: &Path) -> Result<Track> {
        let metadata = fs::metadata(path)?;

        let mut track = Track::new(path.to_path_buf());
        track.file_size = metadata.len();

        // Tags are best effort; the filename is the fallback title
        let tags = match &track.format {
            AudioFormat::Mp3 => self.extract_id3_metadata(path).ok(),
            AudioFormat::Mp4 => self.extract_mp4_metadata(path).ok(),
            _ => None,
        };
        if let Some(tags) = tags {
            track = track.with_metadata(tags);
        }

        Ok(track)
    }

    fn extract_id3_metadata(&self, path: &Path) -> Result<TrackMetadata> {
        let tag = id3::Tag::read_from_path(path)?;
        Ok(TrackMetadata::from_id3_tag(&tag))
    }

    fn extract_mp4_metadata(&self, path: &Path) -> Result<TrackMetadata> {
        let tag = mp4ameta::Tag::read_from_path(path)?;

        Ok(TrackMetadata {
            title: tag.title().map(|s| s.to_string()),
            artist: tag.artist().map(|s| s.to_string()),
            album: tag.album().map(|s| s.to_string()),
            album_artist: tag.album_artist().map(|s| s.to_string()),
            track_number: tag.track_number().map(|t| t as u32),
            year: tag.year().and_then(|y| y.parse().ok()),
            genre: tag.genre().map(|s| s.to_string()),
            duration_ms: tag.duration().map(|d| d.as_millis() as u64),
        })
    }
}

impl Default for MusicScanner {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directory_scan_skips_hidden_empty_and_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b.mp3"), b"not really audio").unwrap();
        fs::write(dir.path().join("a.flac"), b"not really audio").unwrap();
        fs::write(dir.path().join(".hidden.mp3"), b"x").unwrap();
        fs::write(dir.path().join("empty.ogg"), b"").unwrap();
        fs::write(dir.path().join("notes.txt"), b"text").unwrap();

        let tracks = MusicScanner::new().scan_directory(dir.path()).unwrap();
        let names: Vec<String> = tracks.iter().map(|t| t.display_title()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn scan_paths_accepts_single_files() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("song.wav");
        fs::write(&file, b"RIFF").unwrap();

        let scanner = MusicScanner::new();
        let tracks = scanner
            .scan_paths(&[file.clone(), dir.path().join("missing.mp3")])
            .unwrap();
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].file_path, file);
        assert_eq!(tracks[0].file_size, 4);
    }
}
