//! Core types and events

use crate::error::AttemptError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One entry of the batch input
///
/// Identity is the `url`; the password is not part of it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkRecord {
    /// Share link
    pub url: String,
    /// Extraction password, empty when the link has none
    pub password: String,
    /// 1-based line number in the input list (0 when built in code)
    #[serde(default)]
    pub line: usize,
}

impl LinkRecord {
    /// Create a record that did not come from an input file
    pub fn new(url: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            password: password.into(),
            line: 0,
        }
    }

    /// Whether the link needs an extraction password
    pub fn has_password(&self) -> bool {
        !self.password.is_empty()
    }
}

/// Result of a single download attempt
#[derive(Debug)]
pub enum AttemptOutcome {
    /// The artifact was saved at this path
    Success(PathBuf),
    /// The attempt failed; another attempt may be made if budget remains
    Retryable(AttemptError),
}

/// Terminal result of a link's whole retry cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkOutcome {
    /// Downloaded
    Succeeded {
        /// Where the artifact was saved
        path: PathBuf,
        /// Attempts consumed, including the successful one
        attempts: u32,
        /// Whether the succeeded ledger holds the url; if not, a later run
        /// downloads it again
        recorded: bool,
    },
    /// Retry budget exhausted
    Failed {
        /// Reason reported by the last attempt
        reason: String,
        /// Attempts consumed
        attempts: u32,
        /// Whether the failed ledger holds the url
        recorded: bool,
    },
}

impl LinkOutcome {
    /// Whether this is the success variant
    pub fn is_success(&self) -> bool {
        matches!(self, LinkOutcome::Succeeded { .. })
    }

    /// Attempts consumed by the link
    pub fn attempts(&self) -> u32 {
        match self {
            LinkOutcome::Succeeded { attempts, .. } | LinkOutcome::Failed { attempts, .. } => {
                *attempts
            }
        }
    }

    /// Whether the outcome reached its ledger
    pub fn is_recorded(&self) -> bool {
        match self {
            LinkOutcome::Succeeded { recorded, .. } | LinkOutcome::Failed { recorded, .. } => {
                *recorded
            }
        }
    }
}

/// Aggregate result of a batch run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// Links read from the input
    pub total: usize,
    /// Links skipped because the succeeded ledger already lists them
    pub skipped: usize,
    /// Links downloaded in this run
    pub succeeded: usize,
    /// Links that exhausted their retry budget in this run
    pub failed: usize,
    /// Links left undispatched because the run was cancelled
    pub cancelled: usize,
    /// Terminal links whose ledger write failed (included in `succeeded`/`failed`)
    pub unrecorded: usize,
    /// Where failed links were recorded
    pub failed_ledger: PathBuf,
}

impl RunSummary {
    /// Links that were handed to the scheduler
    pub fn scheduled(&self) -> usize {
        self.total - self.skipped
    }
}

/// Events emitted during a batch run
///
/// Subscribe through [`ProgressReporter::subscribe`](crate::progress::ProgressReporter::subscribe)
/// or [`BatchDownloader::subscribe`](crate::BatchDownloader::subscribe).
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A worker picked up a link
    LinkStarted {
        /// Share link
        url: String,
    },

    /// An attempt failed and will be retried if budget remains
    AttemptFailed {
        /// Share link
        url: String,
        /// 1-based attempt number
        attempt: u32,
        /// Failure reason
        error: String,
    },

    /// Link downloaded
    LinkSucceeded {
        /// Share link
        url: String,
        /// Saved artifact
        path: PathBuf,
        /// Whether the success reached the succeeded ledger
        recorded: bool,
    },

    /// Link exhausted its retry budget
    LinkFailed {
        /// Share link
        url: String,
        /// Reason of the last attempt
        error: String,
        /// Whether the failure reached the failed ledger
        recorded: bool,
    },

    /// A link reached a terminal state
    Progress {
        /// Terminal links so far
        completed: usize,
        /// Links scheduled in this run
        total: usize,
    },

    /// The batch finished
    RunComplete {
        /// Links downloaded
        succeeded: usize,
        /// Links failed
        failed: usize,
    },
}
