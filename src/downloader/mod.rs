//! Batch driver tying the components together
//!
//! [`BatchDownloader::run`] reads the link list, drops links the succeeded
//! ledger already holds, hands the rest to the [`Scheduler`] and summarizes the
//! outcome. It owns the shared pieces (ledger, name resolver, progress) so that
//! every worker of a run writes through the same instances.

use crate::config::Config;
use crate::engine::PageEngine;
use crate::error::Result;
use crate::ledger::ResumeLedger;
use crate::naming::NameResolver;
use crate::progress::ProgressReporter;
use crate::retry::RetryPolicy;
use crate::scheduler::Scheduler;
use crate::session::DownloadSession;
use crate::source::read_links;
use crate::types::{Event, LinkRecord, RunSummary};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Resumable batch downloader over a page automation engine
pub struct BatchDownloader {
    config: Arc<Config>,
    engine: Arc<dyn PageEngine>,
    ledger: Arc<ResumeLedger>,
    resolver: Arc<NameResolver>,
    progress: Arc<ProgressReporter>,
    cancel: CancellationToken,
}

impl BatchDownloader {
    /// Create a downloader
    ///
    /// The configuration is validated here and never changes afterwards.
    ///
    /// # Example
    ///
    /// ```no_run
    /// # #[cfg(feature = "chromium")]
    /// # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
    /// use sharelink_dl::engine::ChromiumEngine;
    /// use sharelink_dl::{BatchDownloader, Config};
    /// use std::sync::Arc;
    ///
    /// let config = Config::default();
    /// let engine = Arc::new(ChromiumEngine::launch(&config.browser).await?);
    /// let downloader = BatchDownloader::new(config, engine.clone())?;
    ///
    /// let mut events = downloader.subscribe();
    /// tokio::spawn(async move {
    ///     while let Ok(event) = events.recv().await {
    ///         println!("{event:?}");
    ///     }
    /// });
    ///
    /// let summary = downloader.run().await?;
    /// println!("{} downloaded, {} failed", summary.succeeded, summary.failed);
    /// engine.close().await;
    /// # Ok(())
    /// # }
    /// ```
    pub fn new(config: Config, engine: Arc<dyn PageEngine>) -> Result<Self> {
        config.validate()?;

        let ledger = Arc::new(ResumeLedger::open(
            &config.paths.succeeded_ledger,
            &config.paths.failed_ledger,
        ));
        let resolver = Arc::new(NameResolver::new(&config.paths.download_dir));

        Ok(Self {
            config: Arc::new(config),
            engine,
            ledger,
            resolver,
            progress: Arc::new(ProgressReporter::default()),
            cancel: CancellationToken::new(),
        })
    }

    /// Subscribe to batch events
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.progress.subscribe()
    }

    /// Active configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Ledger shared by all workers
    pub fn ledger(&self) -> &ResumeLedger {
        &self.ledger
    }

    /// Progress of the current run
    pub fn progress(&self) -> &ProgressReporter {
        &self.progress
    }

    /// Token that stops dispatching new links when cancelled
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop dispatching; links in flight finish normally
    pub fn cancel(&self) {
        info!("cancellation requested");
        self.cancel.cancel();
    }

    /// Process the configured link list
    ///
    /// An unreadable list is fatal; everything after that is isolated per link.
    pub async fn run(&self) -> Result<RunSummary> {
        let links = read_links(&self.config.paths.links_file).await?;
        self.run_links(links).await
    }

    /// Process an already parsed link list
    pub async fn run_links(&self, links: Vec<LinkRecord>) -> Result<RunSummary> {
        let mut summary = RunSummary {
            failed_ledger: self.ledger.failed_path().to_path_buf(),
            ..RunSummary::default()
        };

        if links.is_empty() {
            info!("no links to process");
            return Ok(summary);
        }

        let links = dedupe(links);
        summary.total = links.len();

        self.ledger.begin_run().await;
        let processed = self.ledger.load().await?;
        let pending: Vec<LinkRecord> = links
            .into_iter()
            .filter(|link| !processed.contains(&link.url))
            .collect();
        summary.skipped = summary.total - pending.len();

        if pending.is_empty() {
            info!(skipped = summary.skipped, "every link was already downloaded");
            return Ok(summary);
        }
        info!(
            pending = pending.len(),
            skipped = summary.skipped,
            engine = self.engine.name(),
            "links left to download"
        );

        self.progress.reset(pending.len());
        let session = DownloadSession::new(
            Arc::clone(&self.engine),
            Arc::clone(&self.resolver),
            &self.config.browser,
        );
        let scheduler = Scheduler::new(
            self.config.concurrency,
            RetryPolicy::new(&self.config.retry),
            session,
            Arc::clone(&self.ledger),
            Arc::clone(&self.progress),
        )
        .with_cancellation(self.cancel.clone());

        let report = scheduler.run(pending).await;
        summary.succeeded = report.succeeded;
        summary.failed = report.failed;
        summary.cancelled = report.cancelled;
        summary.unrecorded = report.unrecorded;

        info!(
            succeeded = summary.succeeded,
            failed = summary.failed,
            cancelled = summary.cancelled,
            skipped = summary.skipped,
            "batch complete"
        );
        if summary.unrecorded > 0 {
            warn!(
                unrecorded = summary.unrecorded,
                "some outcomes are missing from the ledgers, a later run repeats those links"
            );
        }
        if summary.failed > 0 {
            info!(
                path = %summary.failed_ledger.display(),
                "failed links recorded for a later run"
            );
        }

        self.progress.emit(Event::RunComplete {
            succeeded: summary.succeeded,
            failed: summary.failed,
        });
        Ok(summary)
    }
}

/// Keep the first record of every url
fn dedupe(links: Vec<LinkRecord>) -> Vec<LinkRecord> {
    let mut seen = HashSet::new();
    links
        .into_iter()
        .filter(|link| {
            let first = seen.insert(link.url.clone());
            if !first {
                warn!(url = %link.url, line = link.line, "duplicate link ignored");
            }
            first
        })
        .collect()
}
