// ocarina - terminal music player core
// Input decoding, double-buffered loading and a tick-driven scheduler

pub mod audio;       // tracks, playlist, decoding, output device
pub mod config;      // settings and key bindings
pub mod error;       // player error type
pub mod input;       // raw key sequences -> commands
pub mod integration; // desktop notifications and friends
pub mod playback;    // loader, recovery, scheduler
pub mod ui;          // renderer seam and terminal interface

pub use audio::{MusicScanner, Playlist, Track, TrackMetadata};
pub use config::Config;
pub use error::{PlayerError, Result};
pub use input::Command;
pub use playback::{PlaybackScheduler, SessionContext, SongLoader};
