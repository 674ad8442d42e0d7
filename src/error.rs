// Error taxonomy for the playback core
// Decode failures feed the recovery walker, device failures end the list,
// timeouts defer the decision to the next tick.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlayerError {
    /// A slot failed to produce playable audio
    #[error("failed to decode '{}': {reason}", path.display())]
    Decode { path: PathBuf, reason: String },

    /// Audio device creation or resume failed
    #[error("audio device error: {0}")]
    Device(String),

    /// The bounded wait in `finish_loading` ran out
    #[error("loading did not finish within {waited:?}")]
    TimeoutExhausted { waited: Duration },

    #[error("playlist error: {0}")]
    Playlist(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PlayerError {
    pub fn decode(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::Decode {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, PlayerError>;
