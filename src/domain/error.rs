use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AppError {
    #[error("Invalid video URL: {0}")]
    InvalidInput(String),

    #[error("Download folder is missing or not writable: {0}")]
    InvalidOutputDir(String),

    #[error("yt-dlp is not available: {0}")]
    ToolUnavailable(String),

    #[error("Failed to start yt-dlp: {0}")]
    SpawnFailed(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Config error: {0}")]
    Config(String),
}
