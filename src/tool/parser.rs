//! Line parser for yt-dlp's human readable output.
//!
//! yt-dlp's console output is not a stable format, so every function here is
//! total: anything that does not match degrades to [`ToolEvent::Message`].

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::domain::UNKNOWN_TITLE;

const PLAYLIST_STARTED: &str = "Downloading playlist:";
const PLAYLIST_FINISHED: &str = "Finished downloading playlist:";
const DESTINATION: &str = "Destination:";
const ALREADY_DOWNLOADED: &str = "has already been downloaded";

static ITEM_COUNTERS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Downloading (?:item|video) (\S+) of (\S+)").expect("valid regex"));
// `.f137` style format ids yt-dlp leaves on intermediate files.
static FORMAT_ID_SUFFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\.[A-Za-z][0-9]+$").expect("valid regex"));
static BRACKET_SUFFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s*\[[^\[\]]*\]$").expect("valid regex"));

#[derive(Debug, Clone, PartialEq)]
pub struct ProgressSnapshot {
    /// 0 to 100, unrounded.
    pub percent: f64,
    pub size: String,
    pub speed: String,
    pub eta: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ToolEvent {
    PlaylistStarted { name: String },
    PlaylistFinished { name: String },
    PlaylistItem { index: u32, total: u32 },
    Destination { title: String },
    AlreadyDownloaded { title: String },
    Progress(ProgressSnapshot),
    /// A recognized line whose payload could not be read.
    Warning(String),
    Message(String),
}

impl fmt::Display for ToolEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolEvent::PlaylistStarted { name } => write!(f, "Downloading playlist: {name}"),
            ToolEvent::PlaylistFinished { name } => write!(f, "Finished playlist: {name}"),
            ToolEvent::PlaylistItem { index, total } => write!(f, "Item {index} of {total}"),
            ToolEvent::Destination { title } => write!(f, "Downloading: {title}"),
            ToolEvent::AlreadyDownloaded { title } => write!(f, "Already downloaded: {title}"),
            ToolEvent::Progress(p) => write!(
                f,
                "{:.1}% of {} at {}, ETA {}",
                p.percent, p.size, p.speed, p.eta
            ),
            ToolEvent::Warning(text) | ToolEvent::Message(text) => f.write_str(text),
        }
    }
}

/// Classifies one line of stdout.
pub fn parse_line(line: &str) -> ToolEvent {
    let line = line.trim();

    if let Some(name) = text_after(line, PLAYLIST_FINISHED) {
        return ToolEvent::PlaylistFinished { name };
    }
    if let Some(name) = text_after(line, PLAYLIST_STARTED) {
        return ToolEvent::PlaylistStarted { name };
    }
    if let Some(caps) = ITEM_COUNTERS.captures(line) {
        return item_counters(line, &caps);
    }
    if let Some(path) = text_after(line, DESTINATION) {
        return ToolEvent::Destination {
            title: title_from_path(&path),
        };
    }
    if let Some(idx) = line.find(ALREADY_DOWNLOADED) {
        let path = strip_tag(&line[..idx]);
        return ToolEvent::AlreadyDownloaded {
            title: title_from_path(path),
        };
    }
    if let Some(progress) = parse_progress(line) {
        return ToolEvent::Progress(progress);
    }

    ToolEvent::Message(line.to_string())
}

fn text_after(line: &str, marker: &str) -> Option<String> {
    line.find(marker)
        .map(|idx| line[idx + marker.len()..].trim().to_string())
}

/// Drops a leading `[download]` style tag.
fn strip_tag(line: &str) -> &str {
    let line = line.trim();
    if line.starts_with('[') {
        if let Some(end) = line.find(']') {
            return line[end + 1..].trim();
        }
    }
    line
}

fn item_counters(line: &str, caps: &regex::Captures<'_>) -> ToolEvent {
    let index = caps[1].parse::<u32>().ok();
    let total = caps[2].parse::<u32>().ok();

    match index.zip(total) {
        Some((index, total)) if index >= 1 && index <= total => {
            ToolEvent::PlaylistItem { index, total }
        }
        _ => ToolEvent::Warning(format!("unreadable playlist item counters: {line}")),
    }
}

/// Percent at token `i`, size at `i + 2`, speed at `i + 4`, ETA at `i + 6`.
/// The offsets follow yt-dlp's fixed progress layout:
/// `[download]  23.4% of 50.75MiB at 2.52MiB/s ETA 00:15`.
fn parse_progress(line: &str) -> Option<ProgressSnapshot> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let idx = tokens.iter().position(|token| token.contains('%'))?;

    let percent = tokens[idx].trim_end_matches('%').parse::<f64>().ok()?;
    if !(0.0..=100.0).contains(&percent) {
        return None;
    }

    let size = tokens.get(idx + 2)?;
    let speed = tokens.get(idx + 4)?;
    let eta = tokens.get(idx + 6)?;

    Some(ProgressSnapshot {
        percent,
        size: size.to_string(),
        speed: speed.to_string(),
        eta: eta.to_string(),
    })
}

/// Title candidate for a path announced by the tool: last path component
/// without its extension, then cleaned.
pub fn title_from_path(path: &str) -> String {
    let path = path.trim().trim_matches('"');
    let file_name = path
        .rsplit(|c| c == '/' || c == '\\')
        .next()
        .unwrap_or(path);
    let stem = match file_name.rsplit_once('.') {
        Some((stem, _ext)) => stem,
        None => file_name,
    };
    clean_title(stem)
}

/// Strips trailing `[...]` groups and `.f137` format ids. Falls back to the
/// raw candidate, then to [`UNKNOWN_TITLE`], when nothing is left.
pub fn clean_title(candidate: &str) -> String {
    let mut cleaned = candidate.trim().to_string();
    loop {
        let next = strip_decorations(&cleaned);
        if next == cleaned {
            break;
        }
        cleaned = next;
    }

    if !cleaned.is_empty() {
        cleaned
    } else if !candidate.trim().is_empty() {
        candidate.trim().to_string()
    } else {
        UNKNOWN_TITLE.to_string()
    }
}

fn strip_decorations(title: &str) -> String {
    let without_tags = BRACKET_SUFFIX.replace(title, "");
    let without_format = FORMAT_ID_SUFFIX.replace(without_tags.trim_end(), "");
    without_format.trim().to_string()
}
