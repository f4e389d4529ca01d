use std::path::{Path, PathBuf};

use directories::UserDirs;
use url::Url;

use crate::domain::AppError;

const WRITE_MARKER: &str = ".ytdlp-desktop-write-test";

/// The user's download directory, falling back to `~/Downloads` and then to
/// the current directory.
pub fn default_download_dir() -> PathBuf {
    match UserDirs::new() {
        Some(dirs) => dirs
            .download_dir()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| dirs.home_dir().join("Downloads")),
        None => PathBuf::from("."),
    }
}

/// Splits pasted text into URL candidates, one per whitespace separated token.
pub fn split_urls(input: &str) -> Vec<String> {
    input.split_whitespace().map(str::to_string).collect()
}

/// Accepts http(s) URLs with a host.
pub fn is_valid_url(candidate: &str) -> bool {
    match Url::parse(candidate) {
        Ok(url) => matches!(url.scheme(), "http" | "https") && url.host_str().is_some(),
        Err(_) => false,
    }
}

/// Validated URLs of a pasted batch.
pub fn parse_urls(input: &str) -> Result<Vec<String>, AppError> {
    let urls = split_urls(input);
    if urls.is_empty() {
        return Err(AppError::InvalidInput("no URL given".to_string()));
    }
    if let Some(bad) = urls.iter().find(|url| !is_valid_url(url)) {
        return Err(AppError::InvalidInput(bad.clone()));
    }
    Ok(urls)
}

/// The directory must exist and accept a new file.
pub fn ensure_writable_dir(dir: &Path) -> Result<(), AppError> {
    if !dir.is_dir() {
        return Err(AppError::InvalidOutputDir(dir.display().to_string()));
    }

    let marker = dir.join(WRITE_MARKER);
    std::fs::write(&marker, b"")
        .map_err(|e| AppError::InvalidOutputDir(format!("{}: {}", dir.display(), e)))?;
    std::fs::remove_file(&marker).map_err(|e| AppError::Io(e.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_urls_skips_blank_tokens() {
        let urls = split_urls("  https://a.example/x \n\n\thttps://b.example/y  \n");
        assert_eq!(urls, vec!["https://a.example/x", "https://b.example/y"]);
        assert!(split_urls(" \n ").is_empty());
    }

    #[test]
    fn test_url_validation() {
        assert!(is_valid_url("https://www.youtube.com/watch?v=X"));
        assert!(is_valid_url("http://youtu.be/X"));
        assert!(!is_valid_url("ftp://example.com/file"));
        assert!(!is_valid_url("not a url"));
        assert!(!is_valid_url("dQw4w9WgXcQ"));
    }

    #[test]
    fn test_parse_urls_reports_first_invalid() {
        let err = parse_urls("https://a.example/x nope").unwrap_err();
        assert_eq!(err, AppError::InvalidInput("nope".to_string()));
        assert!(matches!(parse_urls(""), Err(AppError::InvalidInput(_))));
    }

    #[test]
    fn test_writable_dir_check() {
        let dir = tempfile::tempdir().unwrap();
        ensure_writable_dir(dir.path()).unwrap();
        assert!(!dir.path().join(WRITE_MARKER).exists());

        let missing = dir.path().join("missing");
        assert!(matches!(
            ensure_writable_dir(&missing),
            Err(AppError::InvalidOutputDir(_))
        ));
    }
}
