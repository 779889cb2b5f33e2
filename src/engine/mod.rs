//! Page automation engines
//!
//! The batch orchestration never talks to a browser directly. It drives the
//! trait seam in [`traits`], which models one page flow as a chain of steps
//! (navigate, credential, content frame, trigger, capture). Engines:
//!
//! - [`ChromiumEngine`]: drives a real Chromium over the DevTools protocol
//!   (feature `chromium`)
//!
//! Tests plug in scripted engines through the same traits.
//!
//! ## Usage
//!
//! ```no_run
//! # #[cfg(feature = "chromium")]
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! use sharelink_dl::config::BrowserConfig;
//! use sharelink_dl::engine::{ChromiumEngine, PageEngine, PageOptions};
//!
//! let config = BrowserConfig::default();
//! let engine = ChromiumEngine::launch(&config).await?;
//! let mut page = engine.open_page(&PageOptions::from_config(&config)).await?;
//! page.navigate("https://example.com/s/abc").await?;
//! page.close().await;
//! engine.close().await;
//! # Ok(())
//! # }
//! ```

#[cfg(feature = "chromium")]
mod chromium;
mod traits;

#[cfg(feature = "chromium")]
pub use chromium::ChromiumEngine;
pub use traits::{
    CredentialOutcome, DownloadArtifact, FrameHandle, PageEngine, PageHandle, PageOptions,
    TriggerHandle,
};
