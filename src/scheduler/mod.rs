//! Bounded-concurrency scheduler for a batch of links
//!
//! Links are dispatched in input order. A link is only handed to a worker once a
//! permit is free, and the worker keeps its permit for the whole retry cycle, so
//! at most `concurrency` links (and therefore pages) are in flight at any time.
//! Terminal outcomes are written to the ledger and reported as they happen.

use crate::error::AttemptError;
use crate::ledger::ResumeLedger;
use crate::progress::ProgressReporter;
use crate::retry::{RetryPolicy, run_with_policy};
use crate::session::DownloadSession;
use crate::types::{AttemptOutcome, LinkOutcome, LinkRecord};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Counts produced by one scheduling pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScheduleReport {
    /// Links that reached `Succeeded`
    pub succeeded: usize,
    /// Links that reached `Failed`, including crashed workers
    pub failed: usize,
    /// Links never dispatched because of cancellation
    pub cancelled: usize,
    /// Terminal links whose ledger write did not happen
    pub unrecorded: usize,
}

/// Runs links through their retry cycles under a permit pool
pub struct Scheduler {
    concurrency: usize,
    worker: Arc<Worker>,
    cancel: CancellationToken,
}

/// State shared by all workers of a pass
struct Worker {
    policy: RetryPolicy,
    session: DownloadSession,
    ledger: Arc<ResumeLedger>,
    progress: Arc<ProgressReporter>,
}

impl Scheduler {
    /// Create a scheduler running at most `concurrency` links at a time
    ///
    /// A `concurrency` of zero is treated as one.
    pub fn new(
        concurrency: usize,
        policy: RetryPolicy,
        session: DownloadSession,
        ledger: Arc<ResumeLedger>,
        progress: Arc<ProgressReporter>,
    ) -> Self {
        Self {
            concurrency: concurrency.max(1),
            worker: Arc::new(Worker {
                policy,
                session,
                ledger,
                progress,
            }),
            cancel: CancellationToken::new(),
        }
    }

    /// Stop dispatching when `token` is cancelled
    ///
    /// Links already in flight run to completion.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Process every link and wait for all workers
    pub async fn run(&self, links: Vec<LinkRecord>) -> ScheduleReport {
        let total = links.len();
        let permits = Arc::new(Semaphore::new(self.concurrency));
        let mut workers = JoinSet::new();
        let mut report = ScheduleReport::default();
        let mut dispatched = 0;

        info!(links = total, concurrency = self.concurrency, "starting batch");

        for link in links {
            let permit = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                permit = Arc::clone(&permits).acquire_owned() => permit.ok(),
            };
            let Some(permit) = permit else {
                break;
            };

            // Reap finished workers so outcomes are counted as they happen
            while let Some(joined) = workers.try_join_next() {
                report.record(joined, &self.worker.progress);
            }

            dispatched += 1;
            let worker = Arc::clone(&self.worker);
            workers.spawn(async move {
                let _permit = permit;
                worker.process(link).await
            });
        }

        report.cancelled = total - dispatched;
        if report.cancelled > 0 {
            info!(
                cancelled = report.cancelled,
                "dispatch stopped, waiting for links in flight"
            );
        }

        while let Some(joined) = workers.join_next().await {
            report.record(joined, &self.worker.progress);
        }

        report
    }
}

impl ScheduleReport {
    fn record(
        &mut self,
        joined: Result<LinkOutcome, tokio::task::JoinError>,
        progress: &ProgressReporter,
    ) {
        match joined {
            Ok(outcome) => {
                if outcome.is_success() {
                    self.succeeded += 1;
                } else {
                    self.failed += 1;
                }
                if !outcome.is_recorded() {
                    self.unrecorded += 1;
                }
            }
            Err(e) => {
                // The link never reached the ledger; count it so totals still add up
                error!(error = %e, "worker crashed");
                self.failed += 1;
                self.unrecorded += 1;
                progress.advance();
            }
        }
    }
}

impl Worker {
    /// Run one link to a terminal state and record it
    async fn process(&self, link: LinkRecord) -> LinkOutcome {
        debug!(url = %link.url, line = link.line, "link dispatched");
        self.progress.link_started(&link.url);

        let report = run_with_policy(&self.policy, &link.url, |attempt| {
            self.attempt(&link, attempt)
        })
        .await;

        let outcome = match report.result {
            Ok(path) => {
                let recorded = match self.ledger.record_success(&link.url).await {
                    Ok(written) => written,
                    Err(e) => {
                        error!(url = %link.url, error = %e, "could not record success");
                        false
                    }
                };
                if !recorded {
                    warn!(
                        url = %link.url,
                        "download missing from the succeeded ledger, a later run repeats it"
                    );
                }
                LinkOutcome::Succeeded {
                    path,
                    attempts: report.attempts,
                    recorded,
                }
            }
            Err(e) => {
                let recorded = match self.ledger.record_failure(&link.url, &link.password).await {
                    Ok(written) => written,
                    Err(write_err) => {
                        error!(url = %link.url, error = %write_err, "could not record failure");
                        false
                    }
                };
                LinkOutcome::Failed {
                    reason: e.to_string(),
                    attempts: report.attempts,
                    recorded,
                }
            }
        };

        self.progress.link_finished(&link.url, &outcome);
        outcome
    }

    async fn attempt(
        &self,
        link: &LinkRecord,
        attempt: u32,
    ) -> Result<PathBuf, AttemptError> {
        match self.session.attempt(link, attempt).await {
            AttemptOutcome::Success(path) => Ok(path),
            AttemptOutcome::Retryable(e) => {
                self.progress.attempt_failed(&link.url, attempt, &e);
                Err(e)
            }
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
