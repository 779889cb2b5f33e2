//! Error types for sharelink-dl
//!
//! Errors come in two layers:
//! - [`Error`] - run-level failures returned from the public API. Only
//!   [`Error::SourceUnavailable`] (and configuration errors) end a batch run.
//! - [`AttemptError`] - the reason a single download attempt failed. These are
//!   always contained inside one link's retry cycle and end up in the failed
//!   ledger once the retry budget is spent.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for sharelink-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for sharelink-dl
#[derive(Debug, Error)]
pub enum Error {
    /// The batch input could not be opened or read
    #[error("link source {path} unavailable: {source}")]
    SourceUnavailable {
        /// Path of the input list
        path: PathBuf,
        /// Underlying I/O failure
        #[source]
        source: std::io::Error,
    },

    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "concurrency")
        key: Option<String>,
    },

    /// A resume ledger file could not be read or appended to
    #[error("ledger {path}: {source}")]
    Ledger {
        /// Ledger file involved
        path: PathBuf,
        /// Underlying I/O failure
        #[source]
        source: std::io::Error,
    },

    /// Page automation engine failure outside of a download attempt (e.g. launch)
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Failures reported by a page automation engine
///
/// One variant per step of the engine contract, so the orchestration layer can
/// log which step of the page flow broke without knowing anything about selectors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// The browsing context could not be started or a page could not be opened
    #[error("engine launch failed: {0}")]
    Launch(String),

    /// Host unreachable, navigation rejected, or page never settled
    #[error("navigation failed: {0}")]
    Navigation(String),

    /// The embedded content frame was not found or has no document
    #[error("content frame not found: {0}")]
    FrameNotFound(String),

    /// None of the retrieval trigger matchers matched inside the frame
    #[error("download trigger not found: {0}")]
    TriggerNotFound(String),

    /// The trigger was activated but no download was observed
    #[error("no download event: {0}")]
    NoDownloadEvent(String),

    /// An engine-side wait expired
    #[error("timed out during {step}")]
    Timeout {
        /// The step that was waiting
        step: String,
    },

    /// Anything else the engine could not classify
    #[error("{0}")]
    Other(String),
}

/// Why a single download attempt failed
#[derive(Debug, Error)]
pub enum AttemptError {
    /// A step of the page flow failed
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// The per-page operation timeout elapsed
    #[error("{step} exceeded {timeout_secs}s")]
    Timeout {
        /// The step that overran
        step: &'static str,
        /// The configured bound in seconds
        timeout_secs: u64,
    },

    /// The artifact could not be written to disk
    #[error("failed to persist {path}: {reason}")]
    Persist {
        /// Destination (or intended destination) of the artifact
        path: PathBuf,
        /// The reason the write failed
        reason: String,
    },
}
