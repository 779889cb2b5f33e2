//! Capability interface of the page automation engine
//!
//! The orchestration code only sees these traits. Each step of the page flow
//! has its own method and its own failure variant in
//! [`EngineError`](crate::error::EngineError):
//!
//! ```text
//! PageEngine::open_page -> PageHandle::navigate
//!                       -> PageHandle::submit_credential   (best effort)
//!                       -> PageHandle::locate_content_frame -> FrameHandle
//!                       -> FrameHandle::locate_trigger      -> TriggerHandle
//!                       -> TriggerHandle::activate_and_capture -> DownloadArtifact
//! ```

use crate::config::BrowserConfig;
use crate::error::EngineError;
use async_trait::async_trait;
use std::pin::Pin;
use std::time::Duration;
use tokio::io::AsyncRead;

/// Timing knobs handed to every page an engine opens
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageOptions {
    /// Upper bound on any single page operation
    pub operation_timeout: Duration,
    /// Pause after navigation so client-side scripts can render
    pub settle_delay: Duration,
    /// How long to look for a password prompt
    pub credential_timeout: Duration,
    /// How long to wait for the content frame and its trigger
    pub frame_timeout: Duration,
}

impl PageOptions {
    /// Derive page options from the browser configuration
    pub fn from_config(config: &BrowserConfig) -> Self {
        Self {
            operation_timeout: config.page_timeout,
            settle_delay: config.settle_delay,
            credential_timeout: config.credential_timeout,
            frame_timeout: config.frame_timeout,
        }
    }
}

impl Default for PageOptions {
    fn default() -> Self {
        Self::from_config(&BrowserConfig::default())
    }
}

/// What happened when a password was offered to the page
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialOutcome {
    /// A password prompt was found and the password submitted
    Submitted,
    /// No password prompt was found; the page may not need one
    NoPrompt,
    /// The page still asks for the password after submitting it
    Rejected(String),
}

/// A download captured from the page, not yet written to disk
pub struct DownloadArtifact {
    /// File name proposed by the host
    pub suggested_name: String,
    /// Byte stream of the file
    pub reader: Pin<Box<dyn AsyncRead + Send>>,
}

impl DownloadArtifact {
    /// Wrap a byte stream
    pub fn new(suggested_name: impl Into<String>, reader: impl AsyncRead + Send + 'static) -> Self {
        Self {
            suggested_name: suggested_name.into(),
            reader: Box::pin(reader),
        }
    }

    /// Artifact backed by an in-memory buffer
    pub fn from_bytes(suggested_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self::new(suggested_name, std::io::Cursor::new(bytes))
    }
}

impl std::fmt::Debug for DownloadArtifact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadArtifact")
            .field("suggested_name", &self.suggested_name)
            .finish_non_exhaustive()
    }
}

/// A shared browsing context that hands out isolated pages
///
/// Implementations must allow concurrent `open_page` calls; each returned page
/// is owned by exactly one worker.
#[async_trait]
pub trait PageEngine: Send + Sync {
    /// Open a fresh page
    async fn open_page(&self, options: &PageOptions) -> Result<Box<dyn PageHandle>, EngineError>;

    /// Human-readable name for logging
    fn name(&self) -> &'static str;
}

/// One open page, used for one download attempt
#[async_trait]
pub trait PageHandle: Send {
    /// Load `url` and wait for the page to settle
    ///
    /// Fails with [`EngineError::Navigation`] or [`EngineError::Timeout`].
    async fn navigate(&mut self, url: &str) -> Result<(), EngineError>;

    /// Offer the extraction password, if the page asks for one
    ///
    /// Never fails the caller: a missing prompt or a failed submit is reported
    /// through the returned [`CredentialOutcome`].
    async fn submit_credential(&mut self, password: &str) -> CredentialOutcome;

    /// Find the embedded content frame and wait for it to settle
    ///
    /// Fails with [`EngineError::FrameNotFound`].
    async fn locate_content_frame(&mut self) -> Result<Box<dyn FrameHandle>, EngineError>;

    /// Snapshot of the current document, for debug artifacts
    async fn html(&mut self) -> Option<String> {
        None
    }

    /// Release the page
    ///
    /// Always callable and idempotent.
    async fn close(&mut self);
}

/// The embedded document holding the retrieval trigger
#[async_trait]
pub trait FrameHandle: Send {
    /// Find the retrieval trigger, trying the engine's matchers in order
    ///
    /// Fails with [`EngineError::TriggerNotFound`].
    async fn locate_trigger(&mut self) -> Result<Box<dyn TriggerHandle>, EngineError>;
}

/// The element that starts the download
#[async_trait]
pub trait TriggerHandle: Send {
    /// Activate the trigger and capture the resulting download
    ///
    /// Fails with [`EngineError::NoDownloadEvent`].
    async fn activate_and_capture(&mut self) -> Result<DownloadArtifact, EngineError>;
}
