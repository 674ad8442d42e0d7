pub mod decoder;
pub mod device;
pub mod playlist;
pub mod scanner;
pub mod track;

pub use decoder::{DecoderPool, TrackDecoder};
pub use device::{AudioDevice, DeviceHandle};
pub use playlist::{JsonPlaylistStore, NodeId, Playlist, PlaylistNode, PlaylistStore};
pub use scanner::MusicScanner;
pub use track::{Track, TrackMetadata};

use std::time::Duration;

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum AudioFormat {
    Mp3,
    Flac,
    Ogg,
    Mp4,
    Wav,
    Unknown,
}

impl AudioFormat {
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_lowercase().as_str() {
            "mp3" => AudioFormat::Mp3,
            "flac" => AudioFormat::Flac,
            "ogg" | "oga" | "opus" => AudioFormat::Ogg,
            "mp4" | "m4a" | "aac" => AudioFormat::Mp4,
            "wav" => AudioFormat::Wav,
            _ => AudioFormat::Unknown,
        }
    }

    pub fn is_supported(&self) -> bool {
        !matches!(self, AudioFormat::Unknown)
    }
}

/// Fully decoded interleaved samples for one track.
///
/// Slots share these behind an `Arc`, so a repeat or a seek replays the same
/// buffer instead of decoding the file again.
#[derive(Clone, PartialEq)]
pub struct PcmBuffer {
    pub channels: u16,
    pub sample_rate: u32,
    pub samples: Vec<i16>,
}

impl std::fmt::Debug for PcmBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PcmBuffer")
            .field("channels", &self.channels)
            .field("sample_rate", &self.sample_rate)
            .field("samples", &self.samples.len())
            .finish()
    }
}

impl PcmBuffer {
    pub fn new(channels: u16, sample_rate: u32, samples: Vec<i16>) -> Self {
        Self {
            channels,
            sample_rate,
            samples,
        }
    }

    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.samples.len() / self.channels as usize
    }

    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.frames() as f64 / self.sample_rate as f64)
    }

    /// Sample index of the frame boundary closest to `position`, clamped to the end
    pub fn sample_offset(&self, position: Duration) -> usize {
        let frame = (position.as_secs_f64() * self.sample_rate as f64) as usize;
        (frame * self.channels as usize).min(self.samples.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_detection_is_case_insensitive() {
        assert_eq!(AudioFormat::from_extension("MP3"), AudioFormat::Mp3);
        assert_eq!(AudioFormat::from_extension("m4a"), AudioFormat::Mp4);
        assert!(!AudioFormat::from_extension("txt").is_supported());
    }

    #[test]
    fn pcm_duration_and_offsets() {
        let pcm = PcmBuffer::new(2, 10, vec![0; 40]);
        assert_eq!(pcm.frames(), 20);
        assert_eq!(pcm.duration(), Duration::from_secs(2));
        assert_eq!(pcm.sample_offset(Duration::from_millis(500)), 10);
        assert_eq!(pcm.sample_offset(Duration::from_secs(9)), 40);
    }
}
