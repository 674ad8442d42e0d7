use std::time::{Duration, Instant};

use anyhow::Result;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, trace};

use crate::config::Config;
use crate::input::keymap::continuous_keys;
use crate::input::{ByteSource, Command, InputEvent, InputSequenceDecoder, KeyEventMapper, StdinSource};
use crate::playback::{PlaybackScheduler, TickOutcome};

const CTRL_C: &[u8] = &[0x03];

/// The control loop: poll input, apply commands, tick the scheduler
pub struct App<S = StdinSource> {
    scheduler: PlaybackScheduler,
    input: InputSequenceDecoder<S>,
    keymap: KeyEventMapper,
    tick_interval: Duration,
}

impl App<StdinSource> {
    pub fn new(scheduler: PlaybackScheduler, config: &Config) -> Self {
        Self::with_source(scheduler, config, StdinSource::new())
    }
}

impl<S: ByteSource> App<S> {
    pub fn with_source(scheduler: PlaybackScheduler, config: &Config, source: S) -> Self {
        Self {
            scheduler,
            input: InputSequenceDecoder::new(
                source,
                continuous_keys(&config.keys),
                config.timing.input_throttle(),
            ),
            keymap: KeyEventMapper::new(&config.keys, &config.timing),
            tick_interval: config.timing.tick_interval(),
        }
    }

    pub async fn run(&mut self) -> Result<()> {
        info!("Control loop running every {:?}", self.tick_interval);

        let mut ticker = interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let now = Instant::now();

            if !self.scheduler.is_loading() {
                self.poll_input(now);
            }

            if self.scheduler.tick(now) == TickOutcome::Quit {
                break;
            }
        }

        self.scheduler.shutdown();
        Ok(())
    }

    pub fn scheduler(&self) -> &PlaybackScheduler {
        &self.scheduler
    }

    /// Carry settings changed during the session back into the config
    pub fn save_settings(&self, config: &mut Config) {
        config.audio.volume = self.scheduler.volume();
    }

    fn poll_input(&mut self, now: Instant) {
        let InputEvent::Key { sequence, held } = self.input.poll() else {
            return;
        };

        if sequence.as_bytes() == CTRL_C {
            self.scheduler.handle(Command::Quit, now);
            return;
        }

        match self.keymap.map(&sequence, now) {
            Some(command) => self.scheduler.handle(command, now),
            None if held => trace!("Held key {} mapped to nothing", sequence),
            None => debug!("Unmapped key {}", sequence),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::device::testing::FakeDevice;
    use crate::audio::{DecoderPool, DeviceHandle, JsonPlaylistStore, PcmBuffer, Playlist, Track, TrackDecoder};
    use crate::input::decoder::testing::ScriptedSource;
    use crate::integration::LogIntegration;
    use crate::playback::{SchedulerSettings, SessionContext, SongData, SongLoader};
    use crate::ui::NullRenderer;
    use std::path::PathBuf;
    use std::sync::Arc;

    struct Silence;

    impl TrackDecoder for Silence {
        fn decode(&self, node: crate::audio::NodeId, track: &Track) -> crate::error::Result<SongData> {
            Ok(SongData::decoded(node, track, PcmBuffer::new(1, 100, vec![0; 1000])))
        }
    }

    fn app(keys: &[u8]) -> App<ScriptedSource> {
        let mut config = Config::default();
        config.timing.tick_interval_ms = 1;
        config.timing.input_throttle_ms = 0;

        let playlist = Playlist::from_tracks("app", vec![Track::new(PathBuf::from("one.ogg"))]);
        let scheduler = PlaybackScheduler::new(
            SessionContext::new(playlist, false),
            SongLoader::new(DecoderPool::inline(Arc::new(Silence)), 2, Duration::from_millis(1)),
            DeviceHandle::new(FakeDevice::default()),
            Box::new(LogIntegration::default()),
            Box::new(NullRenderer::default()),
            Box::new(JsonPlaylistStore),
            SchedulerSettings::default(),
        );
        App::with_source(scheduler, &config, ScriptedSource::with(keys))
    }

    #[tokio::test]
    async fn quit_key_stops_the_loop() {
        let mut app = app(b"q");
        app.run().await.unwrap();
        assert!(app.scheduler().context().quit_requested);
    }

    #[test]
    fn volume_changes_reach_the_config() {
        let mut app = app(b"");
        app.scheduler.handle(Command::VolumeUp, Instant::now());
        app.scheduler.handle(Command::VolumeUp, Instant::now());

        let mut config = Config::default();
        app.save_settings(&mut config);
        assert!((config.audio.volume - 0.10).abs() < 1e-6);
    }

    #[tokio::test]
    async fn ctrl_c_quits() {
        let mut app = app(&[0x03]);
        app.run().await.unwrap();
        assert!(app.scheduler().context().quit_requested);
    }
}
