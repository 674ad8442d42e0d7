// Desktop integration hooks
// The scheduler reports song changes and start/stop here; what happens with
// them (log lines, desktop notifications) is up to the implementation.

use std::path::PathBuf;
use std::time::Duration;

use tracing::info;
use uuid::Uuid;

use crate::audio::NodeId;

#[derive(Debug, Clone, PartialEq)]
pub struct NowPlaying {
    pub track_id: Uuid,
    pub title: String,
    pub artist: String,
    pub album: String,
    pub art_path: Option<PathBuf>,
    pub duration: Option<Duration>,
}

pub trait DesktopIntegration {
    fn notify_metadata_changed(&mut self, now_playing: &NowPlaying, current: NodeId);
    fn notify_started(&mut self);
    fn notify_stopped(&mut self);
}

/// Writes every event to the log
#[derive(Debug, Default)]
pub struct LogIntegration {
    last_track: Option<Uuid>,
}

impl DesktopIntegration for LogIntegration {
    fn notify_metadata_changed(&mut self, now_playing: &NowPlaying, current: NodeId) {
        if self.last_track == Some(now_playing.track_id) {
            return;
        }
        self.last_track = Some(now_playing.track_id);
        info!(
            "Now playing {}: {} - {} ({})",
            current, now_playing.artist, now_playing.title, now_playing.album
        );
    }

    fn notify_started(&mut self) {
        info!("Playback started");
    }

    fn notify_stopped(&mut self) {
        self.last_track = None;
        info!("Playback stopped");
    }
}

#[cfg(feature = "notify")]
pub use desktop::NotifyIntegration;

#[cfg(feature = "notify")]
mod desktop {
    use notify_rust::{Notification, Timeout};
    use tracing::debug;
    use uuid::Uuid;

    use super::{DesktopIntegration, LogIntegration, NowPlaying};
    use crate::audio::NodeId;

    /// Shows a desktop notification on every song change
    #[derive(Debug, Default)]
    pub struct NotifyIntegration {
        log: LogIntegration,
        last_track: Option<Uuid>,
    }

    impl DesktopIntegration for NotifyIntegration {
        fn notify_metadata_changed(&mut self, now_playing: &NowPlaying, current: NodeId) {
            self.log.notify_metadata_changed(now_playing, current);
            if self.last_track == Some(now_playing.track_id) {
                return;
            }
            self.last_track = Some(now_playing.track_id);

            let mut notification = Notification::new();
            notification
                .appname("ocarina")
                .summary(&now_playing.title)
                .body(&format!("{} - {}", now_playing.artist, now_playing.album))
                .timeout(Timeout::Milliseconds(4000));
            if let Some(art) = now_playing.art_path.as_ref().and_then(|p| p.to_str()) {
                notification.icon(art);
            }
            if let Err(e) = notification.show() {
                debug!("Desktop notification failed: {}", e);
            }
        }

        fn notify_started(&mut self) {
            self.log.notify_started();
        }

        fn notify_stopped(&mut self) {
            self.last_track = None;
            self.log.notify_stopped();
        }
    }
}
