use std::path::PathBuf;

/// Environment variable that points at a specific yt-dlp executable.
pub const TOOL_PATH_ENV: &str = "YTDLP_PATH";

/// Where to find the external downloader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolConfig {
    pub program: PathBuf,
}

impl ToolConfig {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Uses `YTDLP_PATH` when set, otherwise relies on the search path.
    pub fn from_env() -> Self {
        match std::env::var_os(TOOL_PATH_ENV) {
            Some(path) if !path.is_empty() => Self::new(path),
            _ => Self::default(),
        }
    }

    pub fn display_name(&self) -> String {
        self.program.to_string_lossy().to_string()
    }
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self::new("yt-dlp")
    }
}
