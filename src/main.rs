//! Command-line front end: batch-download share links with a Chromium engine.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use sharelink_dl::engine::ChromiumEngine;
use sharelink_dl::source::read_links;
use sharelink_dl::{BatchDownloader, Config, Event};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Debug, Parser)]
#[command(name = "sharelink-dl", version)]
#[command(about = "Resumable batch downloader for password-protected share links")]
struct Cli {
    /// JSON configuration file; missing fields take their defaults
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Link list, one `url[,password]` per line
    #[arg(long, value_name = "FILE")]
    links: Option<PathBuf>,

    /// Directory downloaded files are saved to
    #[arg(long, value_name = "DIR")]
    output: Option<PathBuf>,

    /// Links processed at the same time
    #[arg(long, value_name = "N")]
    concurrency: Option<usize>,

    /// Extra attempts per link after the first one
    #[arg(long, value_name = "N")]
    max_retries: Option<u32>,

    /// Run the browser without a window
    #[arg(long, default_value_t = false)]
    headless: bool,

    /// Debug logging and page snapshots of failed attempts
    #[arg(long, default_value_t = false)]
    debug: bool,

    /// Log file, written next to the console output
    #[arg(long, value_name = "FILE", default_value = "downloader.log")]
    log_file: PathBuf,
}

impl Cli {
    /// Configuration file overlaid with command-line flags
    fn resolve_config(&self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::load(path)
                .with_context(|| format!("loading config {}", path.display()))?,
            None => Config::default(),
        };

        if let Some(links) = &self.links {
            config.paths.links_file = links.clone();
        }
        if let Some(output) = &self.output {
            config.paths.download_dir = output.clone();
        }
        if let Some(concurrency) = self.concurrency {
            config.concurrency = concurrency;
        }
        if let Some(max_retries) = self.max_retries {
            config.retry.max_retries = max_retries;
        }
        if self.headless {
            config.browser.headless = true;
        }
        if self.debug {
            config.log_level = "debug".to_string();
            config.browser.save_debug_artifacts = true;
        }

        config.validate()?;
        Ok(config)
    }
}

/// Console plus file logging; `RUST_LOG` wins over the configured level
fn init_logging(level: &str, log_file: &Path) -> Result<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .with_context(|| format!("invalid log level {level:?}"))?;

    let directory = log_file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let file_name = log_file
        .file_name()
        .context("log file path has no file name")?;
    let (file_writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::never(directory, file_name));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(fmt::layer().with_ansi(false).with_writer(file_writer))
        .try_init()
        .context("installing log subscriber")?;

    Ok(guard)
}

/// Render batch events as a progress bar until the run completes
fn spawn_progress_bar(mut events: broadcast::Receiver<Event>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.green} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {wide_msg}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-"),
        );

        loop {
            match events.recv().await {
                Ok(Event::LinkStarted { url }) => bar.set_message(url),
                Ok(Event::LinkFailed { url, error, .. }) => {
                    bar.println(format!("failed: {url} ({error})"));
                }
                Ok(Event::Progress { completed, total }) => {
                    bar.set_length(total as u64);
                    bar.set_position(completed as u64);
                }
                Ok(Event::RunComplete { .. }) | Err(RecvError::Closed) => break,
                Ok(_) | Err(RecvError::Lagged(_)) => {}
            }
        }
        bar.finish_and_clear();
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = cli.resolve_config()?;
    let _log_guard = init_logging(&config.log_level, &cli.log_file)?;

    // Nothing to do means no browser and no ledger writes
    let links = read_links(&config.paths.links_file).await?;
    if links.is_empty() {
        info!(path = %config.paths.links_file.display(), "link list is empty, nothing to do");
        return Ok(());
    }

    let engine = Arc::new(
        ChromiumEngine::launch(&config.browser)
            .await
            .context("launching browser")?,
    );
    let downloader = BatchDownloader::new(config, engine.clone())?;
    let progress_bar = spawn_progress_bar(downloader.subscribe());

    let result = sharelink_dl::run_until_signal(&downloader, links).await;

    drop(downloader);
    progress_bar.await.ok();
    engine.close().await;

    let summary = result?;
    println!(
        "done: {} downloaded, {} failed, {} skipped{}",
        summary.succeeded,
        summary.failed,
        summary.skipped,
        if summary.cancelled > 0 {
            format!(", {} not started", summary.cancelled)
        } else {
            String::new()
        }
    );
    if summary.failed > 0 {
        println!("failed links: {}", summary.failed_ledger.display());
    }
    if summary.unrecorded > 0 {
        println!(
            "warning: {} outcome(s) could not be written to the ledgers, see the log",
            summary.unrecorded
        );
    }
    Ok(())
}
