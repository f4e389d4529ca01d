use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::process::Stdio;

use thiserror::Error;
use tokio::process::Command;

use super::models::ToolConfig;
use crate::domain::{DownloadOptions, FormatCodes, QualityTier};

/// Directories appended to `PATH` so yt-dlp is found when the app is launched
/// from a desktop shell with a stripped environment.
pub const FALLBACK_SEARCH_PATH: &[&str] = &["/usr/local/bin", "/usr/bin", "/bin", "/opt/homebrew/bin"];

const SINGLE_FILE_TEMPLATE: &str = "%(title)s.%(ext)s";
const PLAYLIST_FILE_TEMPLATE: &str = "%(playlist_title)s/%(playlist_index)s - %(title)s.%(ext)s";

#[derive(Error, Debug)]
pub enum ToolError {
    #[error("failed to launch {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: String,
        stderr: String,
    },
}

pub type Result<T> = std::result::Result<T, ToolError>;

/// Builds the argument list for one download. The URL is always last.
pub fn build_args(url: &str, options: &DownloadOptions) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "--cookies-from-browser".into(),
        options.browser.clone(),
        "--newline".into(),
        "--no-overwrites".into(),
        "-o".into(),
    ];

    args.push(if options.playlist {
        PLAYLIST_FILE_TEMPLATE.into()
    } else {
        SINGLE_FILE_TEMPLATE.into()
    });

    if let Some(selector) = options.format_codes.selector() {
        args.push("-f".into());
        args.push(selector);
    } else {
        push_quality_args(&mut args, options.quality);
    }

    if options.subtitles {
        args.extend(
            ["--write-subs", "--sub-langs", "all", "--convert-subs", "srt"]
                .iter()
                .map(|s| s.to_string()),
        );
    }

    args.push(if options.playlist {
        "--yes-playlist".into()
    } else {
        "--no-playlist".into()
    });

    args.push(url.to_string());
    args
}

fn push_quality_args(args: &mut Vec<String>, quality: QualityTier) {
    match quality {
        QualityTier::Best => {}
        QualityTier::Max1080 | QualityTier::Max720 => {
            let height = quality.max_height().unwrap_or(1080);
            args.push("-f".into());
            args.push(format!(
                "bestvideo[height<={height}]+bestaudio/best[height<={height}]"
            ));
        }
        QualityTier::AudioMp3 => {
            args.extend(
                ["-x", "--audio-format", "mp3", "--audio-quality", "192K"]
                    .iter()
                    .map(|s| s.to_string()),
            );
        }
    }
}

/// `current` with every missing fallback directory appended.
pub fn search_path(current: Option<OsString>) -> OsString {
    let mut dirs: Vec<PathBuf> = current
        .as_deref()
        .map(|value| std::env::split_paths(value).collect())
        .unwrap_or_default();

    for fallback in FALLBACK_SEARCH_PATH {
        let fallback = Path::new(fallback);
        if !dirs.iter().any(|dir| dir == fallback) {
            dirs.push(fallback.to_path_buf());
        }
    }

    std::env::join_paths(&dirs).unwrap_or_else(|_| current.unwrap_or_default())
}

/// A command for the tool with piped output, the augmented search path and,
/// when given, the working directory set.
pub fn command<I, S>(tool: &ToolConfig, working_dir: Option<&Path>, args: I) -> Command
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut cmd = Command::new(&tool.program);
    cmd.args(args)
        .env("PATH", search_path(std::env::var_os("PATH")))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = working_dir {
        cmd.current_dir(dir);
    }
    configure_for_background(&mut cmd);
    cmd
}

#[cfg(windows)]
fn configure_for_background(cmd: &mut Command) {
    // Keep console windows from popping up for every download.
    const CREATE_NO_WINDOW: u32 = 0x0800_0000;
    cmd.creation_flags(CREATE_NO_WINDOW);
}

#[cfg(not(windows))]
fn configure_for_background(_cmd: &mut Command) {}

/// Liveness check: `<tool> --version` must exit 0. Returns the version line.
pub async fn check_version(tool: &ToolConfig) -> Result<String> {
    let output = command(tool, None, ["--version"])
        .output()
        .await
        .map_err(|source| ToolError::Launch {
            program: tool.display_name(),
            source,
        })?;

    if !output.status.success() {
        return Err(ToolError::Failed {
            program: tool.display_name(),
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    let text = String::from_utf8_lossy(&output.stdout);
    Ok(text.lines().next().unwrap_or_default().trim().to_string())
}

/// Runs `-F` for a URL and returns stdout followed by stderr, whatever the
/// exit status.
pub async fn list_formats(tool: &ToolConfig, url: &str, browser: &str) -> Result<String> {
    let output = command(tool, None, ["--cookies-from-browser", browser, "-F", url])
        .output()
        .await
        .map_err(|source| ToolError::Launch {
            program: tool.display_name(),
            source,
        })?;

    let mut text = String::from_utf8_lossy(&output.stdout).to_string();
    text.push_str(&String::from_utf8_lossy(&output.stderr));
    Ok(text)
}

/// Drops the `[info]` tag yt-dlp puts in front of its format table headers.
pub fn clean_format_listing(raw: &str) -> String {
    raw.lines()
        .map(|line| match line.split_once("[info]") {
            Some((_, rest)) => rest.trim(),
            None => line,
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(quality: QualityTier) -> DownloadOptions {
        DownloadOptions {
            quality,
            subtitles: false,
            browser: "firefox".to_string(),
            playlist: false,
            format_codes: FormatCodes::default(),
        }
    }

    #[test]
    fn test_best_quality_adds_no_format_filter() {
        let args = build_args("https://youtube.com/watch?v=X", &options(QualityTier::Best));
        assert_eq!(
            args,
            vec![
                "--cookies-from-browser",
                "firefox",
                "--newline",
                "--no-overwrites",
                "-o",
                "%(title)s.%(ext)s",
                "--no-playlist",
                "https://youtube.com/watch?v=X",
            ]
        );
    }

    #[test]
    fn test_capped_quality_uses_height_filter() {
        let args = build_args("https://youtube.com/watch?v=X", &options(QualityTier::Max720));
        let pos = args.iter().position(|a| a == "-f").unwrap();
        assert_eq!(
            args[pos + 1],
            "bestvideo[height<=720]+bestaudio/best[height<=720]"
        );
        assert!(!args.contains(&"-x".to_string()));
    }

    #[test]
    fn test_audio_only_extracts_mp3() {
        let args = build_args("https://youtube.com/watch?v=X", &options(QualityTier::AudioMp3));
        for expected in ["-x", "--audio-format", "mp3", "--audio-quality", "192K"] {
            assert!(args.contains(&expected.to_string()), "missing {expected}");
        }
        assert!(!args.contains(&"-f".to_string()));
    }

    #[test]
    fn test_format_codes_replace_quality_tier() {
        let mut opts = options(QualityTier::AudioMp3);
        opts.format_codes = FormatCodes {
            video: "137".to_string(),
            audio: "140".to_string(),
        };
        let args = build_args("https://youtube.com/watch?v=X", &opts);
        let pos = args.iter().position(|a| a == "-f").unwrap();
        assert_eq!(args[pos + 1], "137+140");
        assert_eq!(args.iter().filter(|a| *a == "-f").count(), 1);
        assert!(!args.contains(&"-x".to_string()));

        opts.format_codes.video.clear();
        let args = build_args("https://youtube.com/watch?v=X", &opts);
        let pos = args.iter().position(|a| a == "-f").unwrap();
        assert_eq!(args[pos + 1], "140");
        assert_eq!(args.last().unwrap(), "https://youtube.com/watch?v=X");
    }

    #[test]
    fn test_format_listing_loses_info_tags() {
        let raw = "[youtube] X: Downloading webpage\n\
                   [info] Available formats for X:\n\
                   ID  EXT   RESOLUTION\n\
                   137 mp4   1920x1080";
        let cleaned = clean_format_listing(raw);
        let lines: Vec<&str> = cleaned.lines().map(str::trim).collect();
        assert_eq!(lines[0], "[youtube] X: Downloading webpage");
        assert_eq!(lines[1], "Available formats for X:");
        assert_eq!(lines[3], "137 mp4   1920x1080");
        assert!(!cleaned.contains("[info]"));
    }

    #[test]
    fn test_subtitles_and_playlist_flags() {
        let mut opts = options(QualityTier::Best);
        opts.subtitles = true;
        opts.playlist = true;
        let args = build_args("https://youtube.com/playlist?list=L", &opts);

        assert!(args.contains(&"--write-subs".to_string()));
        assert!(args.contains(&"--convert-subs".to_string()));
        assert!(args.contains(&"all".to_string()));
        assert!(args.contains(&"--yes-playlist".to_string()));
        assert!(args.contains(&PLAYLIST_FILE_TEMPLATE.to_string()));
        assert_eq!(args.last().unwrap(), "https://youtube.com/playlist?list=L");
    }

    #[test]
    fn test_search_path_appends_missing_dirs_once() {
        let current = std::env::join_paths(["/home/me/bin", "/usr/bin"]).unwrap();
        let path = search_path(Some(current));
        let dirs: Vec<PathBuf> = std::env::split_paths(&path).collect();

        assert_eq!(dirs[0], PathBuf::from("/home/me/bin"));
        assert_eq!(dirs.iter().filter(|d| *d == Path::new("/usr/bin")).count(), 1);
        for fallback in FALLBACK_SEARCH_PATH {
            assert!(dirs.iter().any(|d| d == Path::new(fallback)));
        }
    }

    #[test]
    fn test_search_path_without_existing_path() {
        let path = search_path(None);
        let dirs: Vec<PathBuf> = std::env::split_paths(&path).collect();
        assert_eq!(dirs.len(), FALLBACK_SEARCH_PATH.len());
    }

    #[tokio::test]
    async fn test_version_check_reports_missing_tool() {
        let tool = ToolConfig::new("/nonexistent/definitely-not-yt-dlp");
        let err = check_version(&tool).await.unwrap_err();
        assert!(matches!(err, ToolError::Launch { .. }));
    }
}
