//! Configuration types for sharelink-dl
//!
//! A [`Config`] is built once (defaults, a JSON file, or CLI overrides) and then
//! handed to the [`BatchDownloader`](crate::BatchDownloader) by value. Nothing in
//! the crate mutates it afterwards.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Input, output and ledger locations
///
/// Used as a flattened sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PathConfig {
    /// Batch input list, one `url[,password]` per line (default: "links.txt")
    #[serde(default = "default_links_file")]
    pub links_file: PathBuf,

    /// Directory downloaded artifacts are written to (default: "./downloads")
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,

    /// Ledger of links that already downloaded successfully (default: "processed.txt")
    #[serde(default = "default_succeeded_ledger")]
    pub succeeded_ledger: PathBuf,

    /// Ledger of links that exhausted their retry budget (default: "failed.txt")
    #[serde(default = "default_failed_ledger")]
    pub failed_ledger: PathBuf,
}

impl Default for PathConfig {
    fn default() -> Self {
        Self {
            links_file: default_links_file(),
            download_dir: default_download_dir(),
            succeeded_ledger: default_succeeded_ledger(),
            failed_ledger: default_failed_ledger(),
        }
    }
}

/// Inclusive range a randomized delay is drawn from
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct DelayRange {
    /// Lower bound, in seconds
    #[serde(with = "secs_f64_serde")]
    pub min: Duration,
    /// Upper bound, in seconds
    #[serde(with = "secs_f64_serde")]
    pub max: Duration,
}

impl DelayRange {
    /// Range from whole seconds
    pub const fn from_secs(min: u64, max: u64) -> Self {
        Self {
            min: Duration::from_secs(min),
            max: Duration::from_secs(max),
        }
    }

    /// A range that always yields zero (useful in tests)
    pub const fn zero() -> Self {
        Self {
            min: Duration::ZERO,
            max: Duration::ZERO,
        }
    }
}

/// Retry budget and pacing for a single link
///
/// Used as a flattened sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Additional attempts allowed after the first (default: 2)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay before the first attempt of every link (default: 2-5 seconds)
    ///
    /// Applied even when the attempt ends up succeeding, which throttles the
    /// request rate against the host.
    #[serde(default = "default_delay_first")]
    pub delay_first: DelayRange,

    /// Delay before every retry, independent of the attempt number (default: 5-10 seconds)
    #[serde(default = "default_delay_retry")]
    pub delay_retry: DelayRange,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            delay_first: default_delay_first(),
            delay_retry: default_delay_retry(),
        }
    }
}

/// Page automation settings
///
/// Used as a flattened sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BrowserConfig {
    /// Run the browser without a visible window (default: false)
    #[serde(default)]
    pub headless: bool,

    /// Save the page HTML after each failed attempt (default: false)
    #[serde(default)]
    pub save_debug_artifacts: bool,

    /// Directory for debug HTML snapshots (default: "./page_html")
    #[serde(default = "default_debug_dir")]
    pub debug_dir: PathBuf,

    /// Upper bound on every page operation of an attempt (default: 60 seconds)
    #[serde(default = "default_page_timeout", with = "duration_serde")]
    pub page_timeout: Duration,

    /// Pause after navigation so client-side scripts can render (default: 3 seconds)
    #[serde(default = "default_settle_delay", with = "duration_serde")]
    pub settle_delay: Duration,

    /// How long to look for a password prompt (default: 5 seconds)
    #[serde(default = "default_credential_timeout", with = "duration_serde")]
    pub credential_timeout: Duration,

    /// How long to wait for the content frame and its trigger (default: 30 seconds)
    #[serde(default = "default_frame_timeout", with = "duration_serde")]
    pub frame_timeout: Duration,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: false,
            save_debug_artifacts: false,
            debug_dir: default_debug_dir(),
            page_timeout: default_page_timeout(),
            settle_delay: default_settle_delay(),
            credential_timeout: default_credential_timeout(),
            frame_timeout: default_frame_timeout(),
        }
    }
}

/// Main configuration for a batch run
///
/// Sub-configs are flattened, so the JSON form is a single flat object:
///
/// ```json
/// { "concurrency": 3, "max_retries": 2, "delay_first": { "min": 2, "max": 5 } }
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Links processed simultaneously (default: 3, recommended 1-5)
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Log filter directive used by the binary (default: "info")
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Input, output and ledger locations
    #[serde(flatten)]
    pub paths: PathConfig,

    /// Retry budget and pacing
    #[serde(flatten)]
    pub retry: RetryConfig,

    /// Page automation settings
    #[serde(flatten)]
    pub browser: BrowserConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            log_level: default_log_level(),
            paths: PathConfig::default(),
            retry: RetryConfig::default(),
            browser: BrowserConfig::default(),
        }
    }
}

impl Config {
    /// Load a configuration from a JSON file and validate it
    ///
    /// Missing keys take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| Error::Config {
            message: format!("cannot read {}: {}", path.display(), e),
            key: None,
        })?;
        let config: Config = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the scheduler or retry policy cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(config_error("concurrency must be at least 1", "concurrency"));
        }
        for (key, range) in [
            ("delay_first", &self.retry.delay_first),
            ("delay_retry", &self.retry.delay_retry),
        ] {
            if range.min > range.max {
                return Err(config_error(
                    format!(
                        "{key}: min ({:?}) is greater than max ({:?})",
                        range.min, range.max
                    ),
                    key,
                ));
            }
        }
        if self.browser.page_timeout.is_zero() {
            return Err(config_error("page_timeout must be non-zero", "page_timeout"));
        }
        Ok(())
    }

    /// Total attempts a link may consume (first attempt plus retries)
    pub fn max_attempts(&self) -> u32 {
        self.retry.max_retries.saturating_add(1)
    }
}

fn config_error(message: impl Into<String>, key: &str) -> Error {
    Error::Config {
        message: message.into(),
        key: Some(key.to_string()),
    }
}

fn default_links_file() -> PathBuf {
    PathBuf::from("links.txt")
}

fn default_download_dir() -> PathBuf {
    PathBuf::from("./downloads")
}

fn default_succeeded_ledger() -> PathBuf {
    PathBuf::from("processed.txt")
}

fn default_failed_ledger() -> PathBuf {
    PathBuf::from("failed.txt")
}

fn default_debug_dir() -> PathBuf {
    PathBuf::from("./page_html")
}

fn default_concurrency() -> usize {
    3
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_retries() -> u32 {
    2
}

fn default_delay_first() -> DelayRange {
    DelayRange::from_secs(2, 5)
}

fn default_delay_retry() -> DelayRange {
    DelayRange::from_secs(5, 10)
}

fn default_page_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_settle_delay() -> Duration {
    Duration::from_secs(3)
}

fn default_credential_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_frame_timeout() -> Duration {
    Duration::from_secs(30)
}

// Duration serialization helper
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// Fractional-seconds Duration helper for delay bounds
mod secs_f64_serde {
    use serde::{Deserialize, Deserializer, Serializer, de::Error};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_f64(duration.as_secs_f64())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(D::Error::custom)
    }
}
