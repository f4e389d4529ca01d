pub mod error;
pub mod model;

pub use error::AppError;
pub use model::{
    default_browser, DownloadOptions, FormatCodes, HistoryEntry, ItemPosition, QualityTier, TaskId, TaskOutcome,
    TaskPhase, UNKNOWN_TITLE,
};
