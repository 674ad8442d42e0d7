// Configuration management for ocarina
// Handles loading/saving settings, with sensible defaults when config is missing

use anyhow::{Context, Result};
use dirs::config_dir;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub music_directories: Vec<PathBuf>,
    /// Session playlist, saved on exit and with the save-playlist key
    pub playlist_path: PathBuf,
    pub log_dir: PathBuf,
    pub quit_after_stopping: bool,
    pub audio: AudioSettings,
    pub timing: TimingConfig,
    pub keys: KeyBindings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioSettings {
    pub volume: f32,      // 0.0 to 1.0
    pub volume_step: f32, // per volume key press
    pub seek_step_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub tick_interval_ms: u64,
    pub skip_cooldown_ms: u64,
    pub seek_cooldown_ms: u64,
    pub playlist_rebuild_delay_ms: u64,
    pub finish_loading_retries: u32,
    pub finish_loading_interval_ms: u64,
    pub input_throttle_ms: u64,
    pub max_goto_digits: usize,
}

/// Every binding is the exact byte sequence the terminal sends, escape
/// sequences included. An empty string disables the binding.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyBindings {
    pub scroll_up_alt: String,
    pub scroll_down_alt: String,
    pub next_track_alt: String,
    pub previous_track_alt: String,
    pub volume_up: String,
    pub volume_up_alt: String,
    pub volume_down: String,
    pub toggle_pause: String,
    pub quit: String,
    pub toggle_shuffle: String,
    pub goto_song: String,
    pub seek_backward: String,
    pub seek_forward: String,
    pub toggle_repeat: String,
    pub save_playlist: String,
    pub play_pause: String,
    pub previous_track: String,
    pub next_track: String,
    pub goto_song_alt: String,
    pub scroll_up: String,
    pub scroll_down: String,
    pub show_track: String,
    pub show_keys: String,
    pub show_playlist: String,
    pub end_of_playlist: String,
    pub next_page: String,
    pub prev_page: String,
    pub remove: String,
}

impl Default for Config {
    fn default() -> Self {
        let config_dir = Self::base_dir();

        Self {
            music_directories: vec![dirs::audio_dir().unwrap_or_else(|| PathBuf::from("~/Music"))],
            playlist_path: config_dir.join("session.json"),
            log_dir: config_dir.join("logs"),
            quit_after_stopping: false,
            audio: AudioSettings::default(),
            timing: TimingConfig::default(),
            keys: KeyBindings::default(),
        }
    }
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            volume: 0.7,
            volume_step: 0.05,
            seek_step_secs: 5,
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 100,
            skip_cooldown_ms: 500,
            seek_cooldown_ms: 100,
            playlist_rebuild_delay_ms: 3000,
            finish_loading_retries: 20,
            finish_loading_interval_ms: 100,
            input_throttle_ms: 10,
            max_goto_digits: 9,
        }
    }
}

impl TimingConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }

    pub fn skip_cooldown(&self) -> Duration {
        Duration::from_millis(self.skip_cooldown_ms)
    }

    pub fn seek_cooldown(&self) -> Duration {
        Duration::from_millis(self.seek_cooldown_ms)
    }

    pub fn playlist_rebuild_delay(&self) -> Duration {
        Duration::from_millis(self.playlist_rebuild_delay_ms)
    }

    pub fn finish_loading_interval(&self) -> Duration {
        Duration::from_millis(self.finish_loading_interval_ms)
    }

    pub fn input_throttle(&self) -> Duration {
        Duration::from_millis(self.input_throttle_ms)
    }
}

impl Default for KeyBindings {
    fn default() -> Self {
        Self {
            scroll_up_alt: "k".into(),
            scroll_down_alt: "j".into(),
            next_track_alt: "l".into(),
            previous_track_alt: "h".into(),
            volume_up: "+".into(),
            volume_up_alt: "=".into(),
            volume_down: "-".into(),
            toggle_pause: "p".into(),
            quit: "q".into(),
            toggle_shuffle: "s".into(),
            goto_song: "\n".into(),
            seek_backward: "a".into(),
            seek_forward: "d".into(),
            toggle_repeat: "r".into(),
            save_playlist: "x".into(),
            play_pause: " ".into(),
            previous_track: "\x1b[D".into(),
            next_track: "\x1b[C".into(),
            goto_song_alt: "\r".into(),
            scroll_up: "\x1b[A".into(),
            scroll_down: "\x1b[B".into(),
            show_track: "i".into(),
            show_keys: "?".into(),
            show_playlist: "v".into(),
            end_of_playlist: "G".into(),
            next_page: "\x1b[6~".into(),
            prev_page: "\x1b[5~".into(),
            remove: "\x1b[3~".into(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            let config = Config::default();
            config.save()?;
            Ok(config)
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;

        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?
            .join("ocarina");

        Ok(config_dir.join("config.toml"))
    }

    fn base_dir() -> PathBuf {
        config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("ocarina")
    }
}
