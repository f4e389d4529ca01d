use std::fs;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::application::HistorySink;
use crate::domain::{default_browser, AppError, DownloadOptions, FormatCodes, HistoryEntry, QualityTier};
use crate::utils::default_download_dir;

const CONFIG_FILE: &str = "config.json";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormatSettings {
    pub quality: QualityTier,
    pub subtitles: bool,
    pub playlist: bool,
    pub format_codes: FormatCodes,
}

/// Everything persisted between runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub last_download_path: PathBuf,
    pub browser: String,
    pub format_settings: FormatSettings,
    pub download_history: Vec<HistoryEntry>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            last_download_path: default_download_dir(),
            browser: default_browser().to_string(),
            format_settings: FormatSettings::default(),
            download_history: Vec::new(),
        }
    }
}

/// JSON backed settings. Every change is written through.
#[derive(Debug)]
pub struct ConfigStore {
    path: PathBuf,
    settings: Settings,
}

impl ConfigStore {
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("com", "ytdlp-desktop", "YtDlpDesktop")
            .map(|dirs| dirs.config_dir().join(CONFIG_FILE))
    }

    /// Reads `path`, creating it with defaults when it does not exist yet.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, AppError> {
        let path = path.into();
        if !path.exists() {
            let store = Self::with_defaults(path);
            store.save()?;
            info!(path = %store.path.display(), "created default config");
            return Ok(store);
        }

        let raw = fs::read_to_string(&path)
            .map_err(|e| AppError::Config(format!("{}: {}", path.display(), e)))?;
        let settings = serde_json::from_str(&raw)
            .map_err(|e| AppError::Config(format!("{}: {}", path.display(), e)))?;
        debug!(path = %path.display(), "config loaded");
        Ok(Self { path, settings })
    }

    pub fn load_default() -> Result<Self, AppError> {
        let path = Self::default_path()
            .ok_or_else(|| AppError::Config("no home directory".to_string()))?;
        Self::load(path)
    }

    /// An in-memory store that will write to `path` on the next change.
    pub fn with_defaults(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            settings: Settings::default(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn update(&mut self, f: impl FnOnce(&mut Settings)) -> Result<(), AppError> {
        f(&mut self.settings);
        self.save()
    }

    /// Writes `config.tmp` next to the target and renames it over the old file.
    pub fn save(&self) -> Result<(), AppError> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir).map_err(|e| AppError::Config(e.to_string()))?;
        }
        let json = serde_json::to_string_pretty(&self.settings)
            .map_err(|e| AppError::Config(e.to_string()))?;

        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, json).map_err(|e| AppError::Config(e.to_string()))?;
        fs::rename(&tmp, &self.path).map_err(|e| AppError::Config(e.to_string()))?;
        Ok(())
    }

    pub fn download_options(&self) -> DownloadOptions {
        let format = &self.settings.format_settings;
        DownloadOptions {
            quality: format.quality,
            subtitles: format.subtitles,
            browser: self.settings.browser.clone(),
            playlist: format.playlist,
            format_codes: format.format_codes.clone(),
        }
    }

    /// Newest first.
    pub fn recent_history(&self, limit: usize) -> Vec<HistoryEntry> {
        self.settings
            .download_history
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn clear_history(&mut self) -> Result<(), AppError> {
        self.update(|settings| settings.download_history.clear())
    }
}

impl HistorySink for ConfigStore {
    fn record(&mut self, entry: HistoryEntry) -> Result<(), AppError> {
        self.update(|settings| settings.download_history.push(entry))
    }

    fn remember_choices(
        &mut self,
        output_dir: &Path,
        options: &DownloadOptions,
    ) -> Result<(), AppError> {
        self.update(|settings| {
            settings.last_download_path = output_dir.to_path_buf();
            settings.browser = options.browser.clone();
            settings.format_settings = FormatSettings {
                quality: options.quality,
                subtitles: options.subtitles,
                playlist: options.playlist,
                format_codes: options.format_codes.clone(),
            };
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TaskOutcome;
    use chrono::{Duration, Local};

    fn entry(title: &str, minutes_ago: i64) -> HistoryEntry {
        HistoryEntry {
            title: title.to_string(),
            path: PathBuf::from("/tmp"),
            timestamp: Local::now() - Duration::minutes(minutes_ago),
            status: TaskOutcome::Completed,
        }
    }

    #[test]
    fn test_missing_file_is_created_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE);

        let store = ConfigStore::load(&path).unwrap();
        assert!(path.exists());
        assert_eq!(store.settings().browser, default_browser());
        assert!(store.settings().download_history.is_empty());
        assert!(!dir.path().join("nested").join("config.tmp").exists());
    }

    #[test]
    fn test_corrupt_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        fs::write(&path, "{ not json").unwrap();

        assert!(matches!(ConfigStore::load(&path), Err(AppError::Config(_))));
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        fs::write(&path, r#"{ "browser": "chrome" }"#).unwrap();

        let store = ConfigStore::load(&path).unwrap();
        assert_eq!(store.settings().browser, "chrome");
        assert_eq!(store.settings().format_settings, FormatSettings::default());
    }

    #[test]
    fn test_history_survives_reload_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);

        let mut store = ConfigStore::load(&path).unwrap();
        for (i, title) in ["a", "b", "c"].iter().enumerate() {
            store.record(entry(title, 10 - i as i64)).unwrap();
        }

        let reloaded = ConfigStore::load(&path).unwrap();
        let titles: Vec<String> = reloaded
            .recent_history(2)
            .into_iter()
            .map(|e| e.title)
            .collect();
        assert_eq!(titles, vec!["c", "b"]);
    }

    #[test]
    fn test_clear_history() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = ConfigStore::load(dir.path().join(CONFIG_FILE)).unwrap();
        store.record(entry("a", 1)).unwrap();
        store.clear_history().unwrap();

        let reloaded = ConfigStore::load(store.path()).unwrap();
        assert!(reloaded.recent_history(10).is_empty());
    }

    #[test]
    fn test_remembered_choices_become_download_options() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = ConfigStore::load(dir.path().join(CONFIG_FILE)).unwrap();
        let options = DownloadOptions {
            quality: QualityTier::Max720,
            subtitles: true,
            browser: "chrome".to_string(),
            playlist: true,
            format_codes: FormatCodes {
                video: "137".to_string(),
                audio: "140".to_string(),
            },
        };

        store.remember_choices(dir.path(), &options).unwrap();

        let reloaded = ConfigStore::load(store.path()).unwrap();
        assert_eq!(reloaded.download_options(), options);
        assert_eq!(reloaded.settings().last_download_path, dir.path());
    }
}
