use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// Title reported for a task that never revealed one.
pub const UNKNOWN_TITLE: &str = "unknown video";

/// Identifier of one requested download. Allocated monotonically and never
/// reused while the process is alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl TaskId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Task-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityTier {
    #[default]
    Best,
    Max1080,
    Max720,
    AudioMp3,
}

impl QualityTier {
    pub const ALL: [QualityTier; 4] = [
        QualityTier::Best,
        QualityTier::Max1080,
        QualityTier::Max720,
        QualityTier::AudioMp3,
    ];

    /// Height cap for the capped-resolution tiers.
    pub fn max_height(self) -> Option<u32> {
        match self {
            QualityTier::Max1080 => Some(1080),
            QualityTier::Max720 => Some(720),
            QualityTier::Best | QualityTier::AudioMp3 => None,
        }
    }
}

impl fmt::Display for QualityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            QualityTier::Best => "Best quality",
            QualityTier::Max1080 => "Up to 1080p",
            QualityTier::Max720 => "Up to 720p",
            QualityTier::AudioMp3 => "Audio only (MP3)",
        };
        f.write_str(label)
    }
}

/// Browser whose cookies are handed to yt-dlp when nothing was configured.
pub fn default_browser() -> &'static str {
    if cfg!(target_os = "macos") {
        "safari"
    } else if cfg!(windows) {
        "edge"
    } else {
        "firefox"
    }
}

/// Format ids picked from a `-F` listing. When any is set it replaces the
/// quality tier.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormatCodes {
    pub video: String,
    pub audio: String,
}

impl FormatCodes {
    /// `video+audio`, or whichever one is set. `None` when both are blank.
    pub fn selector(&self) -> Option<String> {
        match (self.video.trim(), self.audio.trim()) {
            ("", "") => None,
            (video, "") => Some(video.to_string()),
            ("", audio) => Some(audio.to_string()),
            (video, audio) => Some(format!("{video}+{audio}")),
        }
    }
}

/// Options shared by every URL of a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadOptions {
    pub quality: QualityTier,
    pub subtitles: bool,
    pub browser: String,
    pub playlist: bool,
    pub format_codes: FormatCodes,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            quality: QualityTier::Best,
            subtitles: false,
            browser: default_browser().to_string(),
            playlist: false,
            format_codes: FormatCodes::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskOutcome {
    Completed,
    AlreadyExisted,
    Canceled,
    Failed,
}

impl TaskOutcome {
    pub fn is_success(self) -> bool {
        matches!(self, TaskOutcome::Completed | TaskOutcome::AlreadyExisted)
    }
}

impl fmt::Display for TaskOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TaskOutcome::Completed => "completed",
            TaskOutcome::AlreadyExisted => "already existed",
            TaskOutcome::Canceled => "canceled",
            TaskOutcome::Failed => "failed",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskPhase {
    Created,
    Running,
    Finished(TaskOutcome),
}

impl TaskPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskPhase::Finished(_))
    }
}

/// Position inside a playlist, 1-based. The total may not be known yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ItemPosition {
    pub current: u32,
    pub total: Option<u32>,
}

impl fmt::Display for ItemPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.total {
            Some(total) => write!(f, "item {} of {}", self.current, total),
            None => write!(f, "item {}", self.current),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub title: String,
    pub path: PathBuf,
    pub timestamp: DateTime<Local>,
    pub status: TaskOutcome,
}
