// ocarina - Terminal Music Player
// Plays files and directories given on the command line, or picks up the
// playlist saved by the last session.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use ocarina::audio::decoder::RodioTrackDecoder;
use ocarina::audio::device::RodioDevice;
use ocarina::audio::{DecoderPool, DeviceHandle, JsonPlaylistStore, PlaylistStore};
use ocarina::integration::DesktopIntegration;
use ocarina::playback::{SchedulerSettings, SessionContext, SongLoader};
use ocarina::ui::{App, NullRenderer, RawModeGuard, Renderer, TerminalManager, TerminalRenderer};
use ocarina::{Config, MusicScanner, PlaybackScheduler, Playlist};

#[derive(Parser)]
#[command(name = "ocarina")]
#[command(about = "A terminal music player with gapless song changes")]
struct Args {
    /// Files or directories to play; without any, the saved playlist is resumed
    paths: Vec<PathBuf>,

    /// Quit when the playlist ends
    #[arg(long)]
    quit_on_stop: bool,

    /// Enable developer logging (keeps stderr)
    #[arg(long)]
    dev: bool,

    /// Run without drawing the interface
    #[arg(long)]
    no_ui: bool,
}

fn init_logging(log_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("Failed to create log directory {}", log_dir.display()))?;

    // Daily rotating file appender
    let file_appender = tracing_appender::rolling::daily(log_dir, "ocarina.log");
    let (file_writer, _guard) = tracing_appender::non_blocking(file_appender);

    let base_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,ocarina=debug"));

    let subscriber = tracing_subscriber::fmt()
        .with_writer(file_writer)
        .with_target(true)
        .with_level(true)
        .with_ansi(false)
        .with_env_filter(base_filter)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    // Keep the writer alive for the whole run
    std::mem::forget(_guard);

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let mut config = Config::load()?;
    if args.quit_on_stop {
        config.quit_after_stopping = true;
    }

    init_logging(&config.log_dir)?;
    info!("ocarina starting up");

    let store = JsonPlaylistStore;
    let playlist = build_playlist(&args, &config, &store)?;
    if playlist.is_empty() {
        eprintln!("No music found. Pass files or directories, or set music_directories in the config.");
        return Ok(());
    }
    info!("Playlist '{}' has {} songs", playlist.name, playlist.len());

    let pool = DecoderPool::spawn(Arc::new(RodioTrackDecoder))?;
    let loader = SongLoader::new(
        pool,
        config.timing.finish_loading_retries,
        config.timing.finish_loading_interval(),
    );
    let device = DeviceHandle::new(RodioDevice::new(config.audio.volume)?);

    // without the screen we still need raw keys; restored when main returns
    let _raw_input = if args.no_ui { Some(RawModeGuard::new()?) } else { None };
    let renderer: Box<dyn Renderer> = if args.no_ui {
        Box::new(NullRenderer::default())
    } else {
        Box::new(TerminalRenderer::new(TerminalManager::new()?, &config.keys))
    };

    let scheduler = PlaybackScheduler::new(
        SessionContext::new(playlist, config.quit_after_stopping),
        loader,
        device,
        desktop_integration(),
        renderer,
        Box::new(store),
        SchedulerSettings::from_config(&config),
    );

    // ALSA and friends like to print to stderr, which wrecks the screen.
    // Startup errors above still reach the user.
    if !args.dev {
        debug!("Redirecting stderr to suppress backend noise");
        if let Err(e) = redirect_stderr_to_null() {
            warn!("Could not redirect stderr: {}", e);
        }
    }

    let mut app = App::new(scheduler, &config);
    app.run().await?;
    app.save_settings(&mut config);

    // App owns the renderer; drop it first so the terminal is restored
    drop(app);
    config.save()?;
    info!("ocarina shut down cleanly");

    Ok(())
}

fn build_playlist(args: &Args, config: &Config, store: &JsonPlaylistStore) -> Result<Playlist> {
    let scanner = MusicScanner::new();

    if !args.paths.is_empty() {
        let tracks = scanner.scan_paths(&args.paths)?;
        return Ok(Playlist::from_tracks("command line", tracks));
    }

    if config.playlist_path.exists() {
        match store.load(&config.playlist_path) {
            Ok(playlist) if !playlist.is_empty() => return Ok(playlist),
            Ok(_) => debug!("Saved playlist is empty"),
            Err(e) => warn!("Could not load saved playlist: {}", e),
        }
    }

    let tracks = scanner.scan_directories(&config.music_directories)?;
    Ok(Playlist::from_tracks("library", tracks))
}

#[cfg(feature = "notify")]
fn desktop_integration() -> Box<dyn DesktopIntegration> {
    Box::new(ocarina::integration::NotifyIntegration::default())
}

#[cfg(not(feature = "notify"))]
fn desktop_integration() -> Box<dyn DesktopIntegration> {
    Box::new(ocarina::integration::LogIntegration::default())
}

/// Redirect stderr to /dev/null to suppress ALSA error messages that interfere with TUI
fn redirect_stderr_to_null() -> Result<()> {
    unsafe {
        let null_fd = libc::open(b"/dev/null\0".as_ptr() as *const libc::c_char, libc::O_WRONLY);
        if null_fd == -1 {
            return Err(anyhow::anyhow!("Failed to open /dev/null"));
        }

        if libc::dup2(null_fd, libc::STDERR_FILENO) == -1 {
            libc::close(null_fd);
            return Err(anyhow::anyhow!("Failed to redirect stderr"));
        }

        libc::close(null_fd);
    }

    Ok(())
}
