//! Tracing setup: console output plus `debug.log` in the data directory.
//!
//! Keep the returned guard alive for the lifetime of the program, otherwise
//! buffered file output is lost.

use std::fs;
use std::path::PathBuf;

use directories::ProjectDirs;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info,wgpu_hal=warn,wgpu_core=warn,naga=warn,iced_wgpu=warn";
const LOG_FILE: &str = "debug.log";

pub fn init() -> Option<WorkerGuard> {
    let env_filter = match std::env::var("RUST_LOG") {
        Ok(val) => EnvFilter::new(val),
        Err(_) => EnvFilter::new(DEFAULT_FILTER),
    };

    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true);

    let (file_layer, guard) = match open_log_file() {
        Some(file) => {
            let (non_blocking, guard) = tracing_appender::non_blocking(file);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(true)
                .with_thread_ids(true);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let installed = tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init();
    if let Err(e) = installed {
        eprintln!("logging already initialized: {e}");
    }

    if let Some(path) = log_dir() {
        tracing::debug!(dir = %path.display(), "file logging enabled");
    }
    guard
}

fn log_dir() -> Option<PathBuf> {
    ProjectDirs::from("com", "ytdlp-desktop", "YtDlpDesktop").map(|dirs| dirs.data_dir().join("logs"))
}

fn open_log_file() -> Option<fs::File> {
    let dir = log_dir()?;
    if let Err(e) = fs::create_dir_all(&dir) {
        eprintln!("failed to create log directory {}: {e}", dir.display());
        return None;
    }
    fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join(LOG_FILE))
        .map_err(|e| eprintln!("failed to open {LOG_FILE}: {e}"))
        .ok()
}
