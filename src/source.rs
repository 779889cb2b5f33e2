//! Batch input parsing
//!
//! The input is a UTF-8 list with one `url[,password]` per line. Blank lines and
//! lines starting with `#` are ignored.

use crate::error::{Error, Result};
use crate::types::LinkRecord;
use std::path::Path;
use tracing::{debug, info};

/// Read and parse the batch input list
///
/// Fails with [`Error::SourceUnavailable`] when the file cannot be opened or is
/// not valid UTF-8. That error is fatal for the whole run.
pub async fn read_links(path: &Path) -> Result<Vec<LinkRecord>> {
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| Error::SourceUnavailable {
            path: path.to_path_buf(),
            source,
        })?;

    let links = parse_links(&text);
    info!(path = %path.display(), count = links.len(), "read link list");
    Ok(links)
}

/// Parse an input list already held in memory
///
/// Each line is split on the first comma only, so passwords may contain commas.
/// Lines whose url is empty are skipped silently.
#[must_use]
pub fn parse_links(text: &str) -> Vec<LinkRecord> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);

    text.lines()
        .enumerate()
        .filter_map(|(idx, line)| parse_line(line).map(|(url, password)| (idx + 1, url, password)))
        .map(|(line, url, password)| LinkRecord {
            url,
            password,
            line,
        })
        .collect()
}

fn parse_line(line: &str) -> Option<(String, String)> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }

    let (url, password) = match line.split_once(',') {
        Some((url, password)) => (url.trim(), password.trim()),
        None => (line, ""),
    };

    if url.is_empty() {
        debug!(line, "skipping line without url");
        return None;
    }

    Some((url.to_string(), password.to_string()))
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_with_password() {
        let links = parse_links("https://host/f,1234");
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].url, "https://host/f");
        assert_eq!(links[0].password, "1234");
        assert_eq!(links[0].line, 1);
    }

    #[test]
    fn url_without_password() {
        let links = parse_links("https://host/f");
        assert_eq!(links[0].url, "https://host/f");
        assert_eq!(links[0].password, "");
    }

    #[test]
    fn comments_and_blank_lines_are_ignored() {
        let text = "# header\n\n   \nhttps://host/a\n  # indented comment\nhttps://host/b,pw\n";
        let links = parse_links(text);
        let urls: Vec<_> = links.iter().map(|l| l.url.as_str()).collect();
        assert_eq!(urls, ["https://host/a", "https://host/b"]);
        assert_eq!(links[0].line, 4);
        assert_eq!(links[1].line, 6);
    }

    #[test]
    fn whitespace_around_fields_is_trimmed() {
        let links = parse_links("  https://host/f  ,  ab12  ");
        assert_eq!(links[0].url, "https://host/f");
        assert_eq!(links[0].password, "ab12");
    }

    #[test]
    fn only_first_comma_splits() {
        let links = parse_links("https://host/f,pa,ss");
        assert_eq!(links[0].password, "pa,ss");
    }

    #[test]
    fn empty_url_is_skipped() {
        let links = parse_links(",1234\n https://host/ok");
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].url, "https://host/ok");
    }

    #[test]
    fn crlf_and_bom_are_tolerated() {
        let links = parse_links("\u{feff}https://host/a,1\r\nhttps://host/b\r\n");
        assert_eq!(links.len(), 2);
        assert_eq!(links[0].url, "https://host/a");
        assert_eq!(links[0].password, "1");
        assert_eq!(links[1].url, "https://host/b");
    }

    #[test]
    fn trailing_comma_yields_empty_password() {
        let links = parse_links("https://host/f,");
        assert_eq!(links[0].password, "");
    }

    #[tokio::test]
    async fn missing_file_is_source_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let result = read_links(&dir.path().join("nope.txt")).await;
        assert!(matches!(result, Err(Error::SourceUnavailable { .. })));
    }

    #[tokio::test]
    async fn reads_links_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("links.txt");
        tokio::fs::write(&path, "https://host/a,1\n#x\nhttps://host/b\n")
            .await
            .unwrap();
        let links = read_links(&path).await.unwrap();
        assert_eq!(links.len(), 2);
        assert_eq!(links[1], LinkRecord {
            url: "https://host/b".into(),
            password: String::new(),
            line: 3,
        });
    }
}
