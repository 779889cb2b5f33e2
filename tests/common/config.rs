//! Scratch workspaces and configurations for batch tests

use sharelink_dl::config::{BrowserConfig, DelayRange, PathConfig, RetryConfig};
use sharelink_dl::{BatchDownloader, Config};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

use super::engine::ScriptedEngine;

/// A temporary directory laid out like a working directory of the binary
pub struct Workspace {
    /// Keeps the directory alive
    pub dir: TempDir,
}

impl Workspace {
    /// Create an empty workspace
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("create temp dir"),
        }
    }

    /// Path inside the workspace
    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Write the link list
    pub fn write_links(&self, text: &str) {
        std::fs::write(self.path("links.txt"), text).expect("write links");
    }

    /// Pre-populate the succeeded ledger as if an earlier run had finished these
    pub fn write_succeeded(&self, urls: &[&str]) {
        let text: String = urls.iter().map(|u| format!("{u}\n")).collect();
        std::fs::write(self.path("processed.txt"), text).expect("write ledger");
    }

    /// Lines of a ledger file, empty when it does not exist
    pub fn ledger_lines(&self, name: &str) -> Vec<String> {
        read_lines(&self.path(name))
    }

    /// Files saved in the download directory, sorted
    pub fn downloads(&self) -> Vec<String> {
        let Ok(entries) = std::fs::read_dir(self.path("downloads")) else {
            return Vec::new();
        };
        let mut names: Vec<String> = entries
            .map(|e| e.expect("dir entry").file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    /// Configuration with every path inside the workspace and no delays
    pub fn config(&self, concurrency: usize, max_retries: u32) -> Config {
        Config {
            concurrency,
            paths: PathConfig {
                links_file: self.path("links.txt"),
                download_dir: self.path("downloads"),
                succeeded_ledger: self.path("processed.txt"),
                failed_ledger: self.path("failed.txt"),
            },
            retry: RetryConfig {
                max_retries,
                delay_first: DelayRange::zero(),
                delay_retry: DelayRange::zero(),
            },
            browser: BrowserConfig {
                debug_dir: self.path("page_html"),
                ..BrowserConfig::default()
            },
            ..Config::default()
        }
    }

    /// Downloader over a scripted engine
    pub fn downloader(&self, engine: &Arc<ScriptedEngine>, concurrency: usize, max_retries: u32) -> BatchDownloader {
        BatchDownloader::new(self.config(concurrency, max_retries), engine.clone())
            .expect("valid test config")
    }
}

fn read_lines(path: &Path) -> Vec<String> {
    match std::fs::read_to_string(path) {
        Ok(text) => text.lines().map(str::to_string).collect(),
        Err(_) => Vec::new(),
    }
}
