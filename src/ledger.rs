//! Durable resume ledger
//!
//! Two append-only text files record the terminal state of links:
//! - the succeeded ledger, one `url` per line, consulted at startup so a re-run
//!   never downloads the same link twice
//! - the failed ledger, one `url[,password]` per line, purely informational
//!
//! All writers go through a single [`ResumeLedger`]. Appends are serialized by an
//! internal mutex and synced to disk before the call returns, so a record that
//! was acknowledged survives a crash.

use crate::error::{Error, Result};
use crate::source::parse_links;
use crate::types::LinkRecord;
use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Open append handles plus the urls written during this run
#[derive(Default)]
struct LedgerWriter {
    succeeded: Option<File>,
    failed: Option<File>,
    recorded: HashSet<String>,
}

/// Single-writer access to the succeeded and failed ledgers
pub struct ResumeLedger {
    succeeded_path: PathBuf,
    failed_path: PathBuf,
    writer: Mutex<LedgerWriter>,
}

impl ResumeLedger {
    /// Create a ledger over the two files
    ///
    /// Nothing is created on disk until the first record is written.
    pub fn open(succeeded_path: impl Into<PathBuf>, failed_path: impl Into<PathBuf>) -> Self {
        Self {
            succeeded_path: succeeded_path.into(),
            failed_path: failed_path.into(),
            writer: Mutex::new(LedgerWriter::default()),
        }
    }

    /// Path of the succeeded ledger
    pub fn succeeded_path(&self) -> &Path {
        &self.succeeded_path
    }

    /// Path of the failed ledger
    pub fn failed_path(&self) -> &Path {
        &self.failed_path
    }

    /// Start a new run
    ///
    /// Urls recorded by an earlier run of this ledger may be recorded again.
    pub async fn begin_run(&self) {
        self.writer.lock().await.recorded.clear();
    }

    /// Load the set of urls that already succeeded in earlier runs
    ///
    /// A missing ledger is an empty set.
    pub async fn load(&self) -> Result<HashSet<String>> {
        let text = match tokio::fs::read_to_string(&self.succeeded_path).await {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(HashSet::new()),
            Err(source) => {
                return Err(Error::Ledger {
                    path: self.succeeded_path.clone(),
                    source,
                });
            }
        };

        let processed: HashSet<String> = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();

        if !processed.is_empty() {
            info!(
                count = processed.len(),
                path = %self.succeeded_path.display(),
                "loaded previously downloaded links"
            );
        }
        Ok(processed)
    }

    /// Read back the failed ledger
    ///
    /// Entries from earlier runs are included and may repeat.
    pub async fn failed_entries(&self) -> Result<Vec<LinkRecord>> {
        match tokio::fs::read_to_string(&self.failed_path).await {
            Ok(text) => Ok(parse_links(&text)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
            Err(source) => Err(Error::Ledger {
                path: self.failed_path.clone(),
                source,
            }),
        }
    }

    /// Durably record a successful download
    ///
    /// Returns `false` without writing if the url was already recorded
    /// (succeeded or failed) earlier in this run.
    pub async fn record_success(&self, url: &str) -> Result<bool> {
        let mut writer = self.writer.lock().await;
        if writer.recorded.contains(url) {
            warn!(url, "link already recorded in this run, not recording success");
            return Ok(false);
        }

        let line = format!("{url}\n");
        let LedgerWriter { succeeded, .. } = &mut *writer;
        append_line(succeeded, &self.succeeded_path, &line).await?;
        writer.recorded.insert(url.to_string());
        debug!(url, "recorded success");
        Ok(true)
    }

    /// Durably record a link that exhausted its retry budget
    ///
    /// Returns `false` without writing if the url was already recorded
    /// (succeeded or failed) earlier in this run.
    pub async fn record_failure(&self, url: &str, password: &str) -> Result<bool> {
        let mut writer = self.writer.lock().await;
        if writer.recorded.contains(url) {
            warn!(url, "link already recorded in this run, not recording failure");
            return Ok(false);
        }

        let line = if password.is_empty() {
            format!("{url}\n")
        } else {
            format!("{url},{password}\n")
        };
        let LedgerWriter { failed, .. } = &mut *writer;
        append_line(failed, &self.failed_path, &line).await?;
        writer.recorded.insert(url.to_string());
        debug!(url, "recorded failure");
        Ok(true)
    }
}

/// Append one line, opening the file on first use, and sync it to disk
async fn append_line(handle: &mut Option<File>, path: &Path, line: &str) -> Result<()> {
    let ledger_err = |source| Error::Ledger {
        path: path.to_path_buf(),
        source,
    };

    if handle.is_none() {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await.map_err(ledger_err)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(ledger_err)?;
        *handle = Some(file);
    }

    let Some(file) = handle.as_mut() else {
        return Err(Error::Other(format!("ledger {} not open", path.display())));
    };

    file.write_all(line.as_bytes()).await.map_err(ledger_err)?;
    file.flush().await.map_err(ledger_err)?;
    file.sync_data().await.map_err(ledger_err)?;
    Ok(())
}
