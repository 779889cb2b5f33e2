//! One download attempt against one share link
//!
//! A [`DownloadSession`] opens a fresh page from the shared engine, walks the
//! page flow step by step and streams the captured artifact to a reserved path.
//! Each step is bounded by the per-page operation timeout and the page is closed
//! before the attempt returns, whatever happened.

use crate::config::BrowserConfig;
use crate::engine::{CredentialOutcome, DownloadArtifact, PageEngine, PageHandle, PageOptions};
use crate::error::{AttemptError, EngineError};
use crate::naming::NameResolver;
use crate::types::{AttemptOutcome, LinkRecord};
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWriteExt, ReadBuf};
use tokio::time::{Instant, Sleep};
use tracing::{debug, info, warn};

/// Everything an attempt needs, cheap to clone into workers
#[derive(Clone)]
pub struct DownloadSession {
    engine: Arc<dyn PageEngine>,
    resolver: Arc<NameResolver>,
    options: PageOptions,
    debug_dir: Option<PathBuf>,
}

impl DownloadSession {
    /// Create a session factory over a shared engine and resolver
    pub fn new(engine: Arc<dyn PageEngine>, resolver: Arc<NameResolver>, config: &BrowserConfig) -> Self {
        Self {
            engine,
            resolver,
            options: PageOptions::from_config(config),
            debug_dir: config
                .save_debug_artifacts
                .then(|| config.debug_dir.clone()),
        }
    }

    /// Run one attempt for `link`
    ///
    /// `attempt` is 1-based and only used for logging and debug artifact names.
    pub async fn attempt(&self, link: &LinkRecord, attempt: u32) -> AttemptOutcome {
        let mut page = match self.bounded("open page", self.engine.open_page(&self.options)).await {
            Ok(page) => page,
            Err(e) => return AttemptOutcome::Retryable(e),
        };

        let result = self.drive(page.as_mut(), link).await;

        if result.is_err()
            && let Some(dir) = &self.debug_dir
        {
            save_snapshot(page.as_mut(), dir, &link.url, attempt).await;
        }
        page.close().await;

        match result {
            Ok(path) => {
                info!(url = %link.url, attempt, path = %path.display(), "download saved");
                AttemptOutcome::Success(path)
            }
            Err(e) => AttemptOutcome::Retryable(e),
        }
    }

    async fn drive(&self, page: &mut dyn PageHandle, link: &LinkRecord) -> Result<PathBuf, AttemptError> {
        self.bounded("navigate", page.navigate(&link.url)).await?;

        if link.has_password() {
            match tokio::time::timeout(self.options.operation_timeout, page.submit_credential(&link.password))
                .await
            {
                Ok(CredentialOutcome::Submitted) => debug!(url = %link.url, "password submitted"),
                Ok(CredentialOutcome::NoPrompt) => {
                    debug!(url = %link.url, "no password prompt, continuing")
                }
                Ok(CredentialOutcome::Rejected(reason)) => {
                    warn!(url = %link.url, reason = %reason, "extraction password rejected")
                }
                Err(_) => debug!(url = %link.url, "password step timed out, continuing"),
            }
        }

        let mut frame = self
            .bounded("locate content frame", page.locate_content_frame())
            .await?;
        let mut trigger = self
            .bounded("locate download trigger", frame.locate_trigger())
            .await?;
        let artifact = self
            .bounded("capture download", trigger.activate_and_capture())
            .await?;

        self.persist(artifact).await
    }

    /// Stream the artifact into a freshly reserved path
    ///
    /// The whole transfer may take as long as it needs, but a stream that
    /// yields nothing for one operation timeout fails the attempt.
    async fn persist(&self, artifact: DownloadArtifact) -> Result<PathBuf, AttemptError> {
        let path = self.resolver.resolve(&artifact.suggested_name).await?;
        let mut reader = IdleTimeout::new(artifact.reader, self.options.operation_timeout);

        match write_artifact(&path, &mut reader).await {
            Ok(bytes) => {
                debug!(path = %path.display(), bytes, "artifact written");
                Ok(path)
            }
            Err(e) => {
                self.resolver.release(&path).await;
                if e.kind() == io::ErrorKind::TimedOut {
                    return Err(AttemptError::Timeout {
                        step: "persist",
                        timeout_secs: self.options.operation_timeout.as_secs(),
                    });
                }
                Err(AttemptError::Persist {
                    path,
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Run one page step under the operation timeout
    async fn bounded<T>(
        &self,
        step: &'static str,
        operation: impl Future<Output = Result<T, EngineError>>,
    ) -> Result<T, AttemptError> {
        match tokio::time::timeout(self.options.operation_timeout, operation).await {
            Ok(result) => result.map_err(AttemptError::from),
            Err(_) => Err(AttemptError::Timeout {
                step,
                timeout_secs: self.options.operation_timeout.as_secs(),
            }),
        }
    }
}

async fn write_artifact<R>(path: &Path, reader: &mut R) -> io::Result<u64>
where
    R: AsyncRead + Unpin,
{
    let mut file = tokio::fs::File::create(path).await?;
    let bytes = tokio::io::copy(reader, &mut file).await?;
    file.flush().await?;
    file.sync_all().await?;
    Ok(bytes)
}

/// Reader that fails with `TimedOut` once the inner reader stays idle for `idle`
struct IdleTimeout<R> {
    inner: R,
    idle: Duration,
    deadline: Pin<Box<Sleep>>,
}

impl<R> IdleTimeout<R> {
    fn new(inner: R, idle: Duration) -> Self {
        Self {
            inner,
            idle,
            deadline: Box::pin(tokio::time::sleep(idle)),
        }
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for IdleTimeout<R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = &mut *self;
        match Pin::new(&mut this.inner).poll_read(cx, buf) {
            Poll::Ready(result) => {
                this.deadline.as_mut().reset(Instant::now() + this.idle);
                Poll::Ready(result)
            }
            Poll::Pending => match this.deadline.as_mut().poll(cx) {
                Poll::Ready(()) => Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "download stream stalled",
                ))),
                Poll::Pending => Poll::Pending,
            },
        }
    }
}

/// Best-effort dump of the page document after a failed attempt
async fn save_snapshot(page: &mut dyn PageHandle, dir: &Path, url: &str, attempt: u32) {
    let Some(html) = page.html().await else {
        return;
    };
    let path = dir.join(format!("{}_attempt{attempt}.html", NameResolver::sanitize(url)));
    let written = async {
        tokio::fs::create_dir_all(dir).await?;
        tokio::fs::write(&path, html).await
    }
    .await;
    match written {
        Ok(()) => debug!(url, path = %path.display(), "saved page snapshot"),
        Err(e) => debug!(url, error = %e, "could not save page snapshot"),
    }
}
