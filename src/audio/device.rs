use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::Result;
use crate::playback::loader::SongData;

/// Output side of the player. One song plays at a time; `create` replaces
/// whatever was playing before.
pub trait AudioDevice {
    fn create(&mut self, song: &SongData) -> Result<()>;
    fn destroy(&mut self);
    fn resume(&mut self) -> Result<()>;
    fn pause(&mut self);
    /// Jump to `position` from the start of the current song
    fn seek(&mut self, position: Duration) -> Result<()>;
    fn set_volume(&mut self, volume: f32);
    fn volume(&self) -> f32;
    /// True once the current song has drained, or when nothing was created
    fn is_playback_finished(&self) -> bool;
}

/// Shared access to the device. Never lock it while holding the loader's slots.
#[derive(Clone)]
pub struct DeviceHandle {
    inner: Arc<Mutex<Box<dyn AudioDevice>>>,
}

impl DeviceHandle {
    pub fn new(device: impl AudioDevice + 'static) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Box::new(device))),
        }
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut dyn AudioDevice) -> R) -> R {
        let mut device = self.inner.lock();
        f(device.as_mut())
    }
}

#[cfg(feature = "audio")]
pub use rodio_device::RodioDevice;

#[cfg(feature = "audio")]
mod rodio_device {
    use std::sync::Arc;
    use std::time::Duration;

    use rodio::{OutputStream, OutputStreamHandle, Sink, Source};
    use tracing::{debug, info};

    use super::AudioDevice;
    use crate::audio::PcmBuffer;
    use crate::error::{PlayerError, Result};
    use crate::playback::loader::SongData;

    /// Replays a shared decoded buffer from a sample offset
    struct PcmSource {
        pcm: Arc<PcmBuffer>,
        position: usize,
    }

    impl Iterator for PcmSource {
        type Item = i16;

        fn next(&mut self) -> Option<i16> {
            let sample = self.pcm.samples.get(self.position).copied()?;
            self.position += 1;
            Some(sample)
        }
    }

    impl Source for PcmSource {
        fn current_frame_len(&self) -> Option<usize> {
            None
        }

        fn channels(&self) -> u16 {
            self.pcm.channels
        }

        fn sample_rate(&self) -> u32 {
            self.pcm.sample_rate
        }

        fn total_duration(&self) -> Option<Duration> {
            Some(self.pcm.duration())
        }
    }

    pub struct RodioDevice {
        _stream: OutputStream,
        stream_handle: OutputStreamHandle,
        sink: Option<Sink>,
        pcm: Option<Arc<PcmBuffer>>,
        volume: f32,
        paused: bool,
    }

    impl RodioDevice {
        pub fn new(volume: f32) -> Result<Self> {
            let (stream, stream_handle) =
                OutputStream::try_default().map_err(|e| PlayerError::Device(e.to_string()))?;
            info!("Opened default audio output");

            Ok(Self {
                _stream: stream,
                stream_handle,
                sink: None,
                pcm: None,
                volume: volume.clamp(0.0, 1.0),
                paused: false,
            })
        }

        fn start_at(&mut self, pcm: Arc<PcmBuffer>, position: usize) -> Result<()> {
            let sink = Sink::try_new(&self.stream_handle).map_err(|e| PlayerError::Device(e.to_string()))?;
            sink.set_volume(self.volume);
            sink.append(PcmSource {
                pcm: Arc::clone(&pcm),
                position,
            });
            if self.paused {
                sink.pause();
            }

            if let Some(old) = self.sink.replace(sink) {
                old.stop();
            }
            self.pcm = Some(pcm);
            Ok(())
        }
    }

    impl AudioDevice for RodioDevice {
        fn create(&mut self, song: &SongData) -> Result<()> {
            let pcm = song
                .pcm
                .clone()
                .ok_or_else(|| PlayerError::Device(format!("{} has no decoded audio", song.file_path.display())))?;
            self.paused = false;
            self.start_at(pcm, 0)?;
            debug!("Audio device playing {}", song.file_path.display());
            Ok(())
        }

        fn destroy(&mut self) {
            if let Some(sink) = self.sink.take() {
                sink.stop();
            }
            self.pcm = None;
            self.paused = false;
        }

        fn resume(&mut self) -> Result<()> {
            let sink = self
                .sink
                .as_ref()
                .ok_or_else(|| PlayerError::Device("nothing to resume".into()))?;
            sink.play();
            self.paused = false;
            Ok(())
        }

        fn pause(&mut self) {
            if let Some(sink) = &self.sink {
                sink.pause();
            }
            self.paused = true;
        }

        fn seek(&mut self, position: Duration) -> Result<()> {
            let pcm = self
                .pcm
                .clone()
                .ok_or_else(|| PlayerError::Device("nothing to seek in".into()))?;
            let offset = pcm.sample_offset(position);
            self.start_at(pcm, offset)
        }

        fn set_volume(&mut self, volume: f32) {
            self.volume = volume.clamp(0.0, 1.0);
            if let Some(sink) = &self.sink {
                sink.set_volume(self.volume);
            }
        }

        fn volume(&self) -> f32 {
            self.volume
        }

        fn is_playback_finished(&self) -> bool {
            self.sink.as_ref().map_or(true, |sink| sink.empty())
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::error::PlayerError;
    use uuid::Uuid;

    /// What the scheduler did to the fake device
    #[derive(Debug, Default)]
    pub struct FakeDeviceState {
        pub playing: Option<Uuid>,
        pub created: Vec<Uuid>,
        pub finished: bool,
        pub paused: bool,
        pub destroyed: usize,
        pub seeks: Vec<Duration>,
        pub volume: f32,
        pub fail_creates: usize,
    }

    #[derive(Clone, Default)]
    pub struct FakeDevice {
        pub state: Arc<Mutex<FakeDeviceState>>,
    }

    impl AudioDevice for FakeDevice {
        fn create(&mut self, song: &SongData) -> Result<()> {
            let mut state = self.state.lock();
            if state.fail_creates > 0 {
                state.fail_creates -= 1;
                return Err(PlayerError::Device("no output".into()));
            }
            state.playing = Some(song.track_id);
            state.created.push(song.track_id);
            state.finished = false;
            state.paused = false;
            Ok(())
        }

        fn destroy(&mut self) {
            let mut state = self.state.lock();
            state.playing = None;
            state.destroyed += 1;
        }

        fn resume(&mut self) -> Result<()> {
            self.state.lock().paused = false;
            Ok(())
        }

        fn pause(&mut self) {
            self.state.lock().paused = true;
        }

        fn seek(&mut self, position: Duration) -> Result<()> {
            self.state.lock().seeks.push(position);
            Ok(())
        }

        fn set_volume(&mut self, volume: f32) {
            self.state.lock().volume = volume.clamp(0.0, 1.0);
        }

        fn volume(&self) -> f32 {
            self.state.lock().volume
        }

        fn is_playback_finished(&self) -> bool {
            let state = self.state.lock();
            state.playing.is_none() || state.finished
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::FakeDevice;
    use super::*;
    use crate::audio::{NodeId, PcmBuffer, Track};
    use std::path::PathBuf;

    #[test]
    fn handle_shares_one_device() {
        let fake = FakeDevice::default();
        let handle = DeviceHandle::new(fake.clone());
        let other = handle.clone();

        let track = Track::new(PathBuf::from("a.wav"));
        let song = SongData::decoded(NodeId::from_raw(0), &track, PcmBuffer::new(1, 4, vec![0; 4]));

        assert!(handle.with(|device| device.is_playback_finished()));
        other.with(|device| device.create(&song)).unwrap();
        assert!(!handle.with(|device| device.is_playback_finished()));
        assert_eq!(fake.state.lock().playing, Some(track.id));

        handle.with(|device| device.set_volume(1.7));
        assert_eq!(other.with(|device| device.volume()), 1.0);
    }
}
