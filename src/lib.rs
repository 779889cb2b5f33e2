//! # sharelink-dl
//!
//! Resumable batch downloader for password-protected share links whose download
//! trigger only appears inside a script-rendered embedded frame.
//!
//! ## Design Philosophy
//!
//! - **Resumable** - a durable ledger makes re-runs skip finished links
//! - **Bounded** - a fixed permit pool caps pages in flight; every page step has a timeout
//! - **Engine-agnostic** - the batch logic drives a narrow trait seam ([`engine`]);
//!   a Chromium implementation ships behind the `chromium` feature
//! - **Event-driven** - consumers subscribe to [`Event`]s instead of polling
//!
//! ## Quick Start
//!
//! ```no_run
//! # #[cfg(feature = "chromium")]
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! use sharelink_dl::engine::ChromiumEngine;
//! use sharelink_dl::source::read_links;
//! use sharelink_dl::{BatchDownloader, Config};
//! use std::sync::Arc;
//!
//! let config = Config {
//!     concurrency: 2,
//!     ..Default::default()
//! };
//! let links = read_links(&config.paths.links_file).await?;
//! let engine = Arc::new(ChromiumEngine::launch(&config.browser).await?);
//! let downloader = BatchDownloader::new(config, engine.clone())?;
//!
//! let summary = sharelink_dl::run_until_signal(&downloader, links).await?;
//! println!("{} downloaded, {} failed", summary.succeeded, summary.failed);
//!
//! engine.close().await;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration types
pub mod config;
/// Batch driver
pub mod downloader;
/// Page automation engines
pub mod engine;
/// Error types
pub mod error;
/// Durable resume ledger
pub mod ledger;
/// Collision-free artifact naming
pub mod naming;
/// Progress tracking and events
pub mod progress;
/// Per-link retry state machine
pub mod retry;
/// Bounded-concurrency scheduling
pub mod scheduler;
/// Single download attempts
pub mod session;
/// Link list parsing
pub mod source;
/// Core types and events
pub mod types;

// Re-export commonly used types
pub use config::{BrowserConfig, Config, DelayRange, PathConfig, RetryConfig};
pub use downloader::BatchDownloader;
pub use error::{AttemptError, EngineError, Error, Result};
pub use ledger::ResumeLedger;
pub use naming::NameResolver;
pub use progress::ProgressReporter;
pub use retry::{IsRetryable, RetryPolicy};
pub use scheduler::{ScheduleReport, Scheduler};
pub use session::DownloadSession;
pub use types::{AttemptOutcome, Event, LinkOutcome, LinkRecord, RunSummary};

/// Run an already parsed link list, stopping dispatch on the first termination signal
///
/// Links in flight when the signal arrives finish normally and are recorded;
/// links not yet dispatched stay out of both ledgers and are picked up by the
/// next run. SIGINT and SIGTERM stop the run on unix, Ctrl+C elsewhere.
pub async fn run_until_signal(
    downloader: &BatchDownloader,
    links: Vec<LinkRecord>,
) -> Result<RunSummary> {
    let token = downloader.cancellation_token();
    let watcher = tokio::spawn(async move {
        tokio::select! {
            _ = wait_for_signal() => {
                tracing::warn!("stopping after links in flight");
                token.cancel();
            }
            _ = token.cancelled() => {}
        }
    });

    let result = downloader.run_links(links).await;
    watcher.abort();
    result
}

/// Resolve on the first interrupt or terminate signal
async fn wait_for_signal() {
    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "cannot listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "cannot listen for SIGTERM, Ctrl+C only");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = interrupt => tracing::info!("interrupted"),
        _ = terminate => tracing::info!("terminated"),
    }
}
