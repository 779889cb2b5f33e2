//! Chromium engine over the DevTools protocol
//!
//! One browser process is shared by all workers; every attempt gets its own tab.
//! The content frame is opened by navigating the attempt's tab to the frame
//! document, and the download is captured by fetching the trigger's link target
//! with the tab's cookies.

use super::traits::{
    CredentialOutcome, DownloadArtifact, FrameHandle, PageEngine, PageHandle, PageOptions,
    TriggerHandle,
};
use crate::config::BrowserConfig;
use crate::error::EngineError;
use async_trait::async_trait;
use chromiumoxide::{Browser, BrowserConfig as LaunchConfig, Element, Page};
use futures::{StreamExt, TryStreamExt};
use reqwest::header::{self, HeaderMap};
use std::future::Future;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::io::StreamReader;
use tracing::{debug, info, warn};
use url::Url;

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                          (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Pause after submitting the password before checking the result
const SUBMIT_SETTLE: Duration = Duration::from_secs(2);

const PASSWORD_INPUT: &str = r#"input[type="password"]"#;
const CONTENT_FRAME: &str = "iframe.ifr2";

/// Button labels that submit the password form
const SUBMIT_LABELS: &[&str] = &["确 定", "提取文件"];

/// Ways to recognize the retrieval trigger, tried in order
#[derive(Debug, Clone, Copy)]
enum TriggerMatcher {
    /// Anchor whose visible text contains the label
    Text(&'static str),
    /// CSS selector
    Css(&'static str),
}

const TRIGGER_MATCHERS: &[TriggerMatcher] = &[
    TriggerMatcher::Text("普通下载"),
    TriggerMatcher::Text("点击下载"),
    TriggerMatcher::Css("a.download-btn"),
    TriggerMatcher::Css(r#"a[href*="file"]"#),
    TriggerMatcher::Css(r#"a[href*="lanrar"]"#),
];

fn cdp_err(kind: fn(String) -> EngineError) -> impl Fn(chromiumoxide::error::CdpError) -> EngineError {
    move |e| kind(e.to_string())
}

/// Shared Chromium browser
pub struct ChromiumEngine {
    browser: Mutex<Browser>,
    handler: Mutex<Option<JoinHandle<()>>>,
    http: reqwest::Client,
}

impl ChromiumEngine {
    /// Start a browser according to `config`
    pub async fn launch(config: &BrowserConfig) -> Result<Self, EngineError> {
        let mut builder = LaunchConfig::builder()
            .window_size(1280, 800)
            .request_timeout(config.page_timeout)
            .arg("--disable-blink-features=AutomationControlled")
            .arg(format!("--user-agent={USER_AGENT}"));
        if !config.headless {
            builder = builder.with_head();
        }
        let launch_config = builder.build().map_err(EngineError::Launch)?;

        let (browser, mut handler) = Browser::launch(launch_config)
            .await
            .map_err(cdp_err(EngineError::Launch))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!(error = %e, "browser handler stopped");
                    break;
                }
            }
        });

        // Stalled bodies are bounded by the session's idle read timeout
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(config.page_timeout)
            .build()
            .map_err(|e| EngineError::Launch(format!("http client: {e}")))?;

        info!(headless = config.headless, "browser launched");

        Ok(Self {
            browser: Mutex::new(browser),
            handler: Mutex::new(Some(handler_task)),
            http,
        })
    }

    /// Shut the browser down
    ///
    /// Pages still open are closed with it.
    pub async fn close(&self) {
        let mut browser = self.browser.lock().await;
        if let Err(e) = browser.close().await {
            debug!(error = %e, "browser close failed");
        }
        if let Err(e) = browser.wait().await {
            debug!(error = %e, "browser did not exit cleanly");
        }
        if let Some(task) = self.handler.lock().await.take() {
            task.abort();
        }
        info!("browser closed");
    }
}

#[async_trait]
impl PageEngine for ChromiumEngine {
    async fn open_page(&self, options: &PageOptions) -> Result<Box<dyn PageHandle>, EngineError> {
        let page = self
            .browser
            .lock()
            .await
            .new_page("about:blank")
            .await
            .map_err(cdp_err(EngineError::Launch))?;

        Ok(Box::new(ChromiumPage {
            page: Some(page),
            options: *options,
            http: self.http.clone(),
        }))
    }

    fn name(&self) -> &'static str {
        "chromium"
    }
}

struct ChromiumPage {
    page: Option<Page>,
    options: PageOptions,
    http: reqwest::Client,
}

impl ChromiumPage {
    fn active(&self) -> Result<Page, EngineError> {
        self.page
            .clone()
            .ok_or_else(|| EngineError::Other("page already closed".into()))
    }
}

#[async_trait]
impl PageHandle for ChromiumPage {
    async fn navigate(&mut self, url: &str) -> Result<(), EngineError> {
        let page = self.active()?;
        load(&page, url, self.options.settle_delay).await
    }

    async fn submit_credential(&mut self, password: &str) -> CredentialOutcome {
        let Ok(active) = self.active() else {
            return CredentialOutcome::NoPrompt;
        };
        let page = &active;

        let Some(input) = poll_until(self.options.credential_timeout, || async move {
            page.find_element(PASSWORD_INPUT).await.ok()
        })
        .await
        else {
            return CredentialOutcome::NoPrompt;
        };

        if let Err(e) = fill(&input, password).await {
            warn!(error = %e, "could not enter password");
            return CredentialOutcome::NoPrompt;
        }

        let Some(submit) =
            poll_until(self.options.credential_timeout, || async move { find_submit(page).await })
                .await
        else {
            debug!("password entered but no submit control found");
            return CredentialOutcome::NoPrompt;
        };

        if let Err(e) = submit.click().await {
            warn!(error = %e, "could not submit password");
            return CredentialOutcome::NoPrompt;
        }
        tokio::time::sleep(SUBMIT_SETTLE).await;

        // A prompt that is still there with no frame behind it means the host said no
        let prompt_left = page.find_element(PASSWORD_INPUT).await.is_ok();
        let frame_shown = page.find_element(CONTENT_FRAME).await.is_ok();
        if prompt_left && !frame_shown {
            return CredentialOutcome::Rejected("password prompt still shown after submit".into());
        }
        CredentialOutcome::Submitted
    }

    async fn locate_content_frame(&mut self) -> Result<Box<dyn FrameHandle>, EngineError> {
        let active = self.active()?;
        let page = &active;

        let Some(frame) = poll_until(self.options.frame_timeout, || async move {
            page.find_element(CONTENT_FRAME).await.ok()
        })
        .await
        else {
            return Err(EngineError::FrameNotFound(format!(
                "no {CONTENT_FRAME} within {}s",
                self.options.frame_timeout.as_secs()
            )));
        };

        let src = frame
            .attribute("src")
            .await
            .map_err(cdp_err(EngineError::FrameNotFound))?
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| EngineError::FrameNotFound("frame has no document source".into()))?;

        let base = current_url(page).await?;
        let frame_url = base
            .join(src.trim())
            .map_err(|e| EngineError::FrameNotFound(format!("bad frame source {src:?}: {e}")))?;

        debug!(frame = %frame_url, "opening content frame");
        load(page, frame_url.as_str(), self.options.settle_delay)
            .await
            .map_err(|e| EngineError::FrameNotFound(e.to_string()))?;

        Ok(Box::new(ChromiumFrame {
            page: active,
            options: self.options,
            http: self.http.clone(),
        }))
    }

    async fn html(&mut self) -> Option<String> {
        let page = self.active().ok()?;
        page.content().await.ok()
    }

    async fn close(&mut self) {
        if let Some(page) = self.page.take()
            && let Err(e) = page.close().await
        {
            debug!(error = %e, "page close failed");
        }
    }
}

struct ChromiumFrame {
    page: Page,
    options: PageOptions,
    http: reqwest::Client,
}

#[async_trait]
impl FrameHandle for ChromiumFrame {
    async fn locate_trigger(&mut self) -> Result<Box<dyn TriggerHandle>, EngineError> {
        let page = &self.page;
        let Some((matcher, element)) =
            poll_until(self.options.frame_timeout, || async move { find_trigger(page).await }).await
        else {
            return Err(EngineError::TriggerNotFound(format!(
                "no matcher hit within {}s",
                self.options.frame_timeout.as_secs()
            )));
        };
        debug!(?matcher, "download trigger found");

        let href = element
            .attribute("href")
            .await
            .map_err(cdp_err(EngineError::TriggerNotFound))?
            .map(|h| h.trim().to_string())
            .filter(|h| !h.is_empty() && !h.starts_with("javascript:"))
            .ok_or_else(|| EngineError::NoDownloadEvent("trigger has no link target".into()))?;

        let frame_url = current_url(page).await?;
        let target = frame_url
            .join(&href)
            .map_err(|e| EngineError::NoDownloadEvent(format!("bad link target {href:?}: {e}")))?;

        let cookies = page
            .get_cookies()
            .await
            .map(|cookies| {
                cookies
                    .iter()
                    .map(|c| format!("{}={}", c.name, c.value))
                    .collect::<Vec<_>>()
                    .join("; ")
            })
            .unwrap_or_default();

        Ok(Box::new(ChromiumTrigger {
            target,
            referer: frame_url,
            cookies,
            http: self.http.clone(),
        }))
    }
}

struct ChromiumTrigger {
    target: Url,
    referer: Url,
    cookies: String,
    http: reqwest::Client,
}

#[async_trait]
impl TriggerHandle for ChromiumTrigger {
    async fn activate_and_capture(&mut self) -> Result<DownloadArtifact, EngineError> {
        let mut request = self
            .http
            .get(self.target.clone())
            .header(header::REFERER, self.referer.as_str());
        if !self.cookies.is_empty() {
            request = request.header(header::COOKIE, &self.cookies);
        }

        let response = request
            .send()
            .await
            .map_err(|e| EngineError::NoDownloadEvent(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(EngineError::NoDownloadEvent(format!("host answered {status}")));
        }
        if is_html(response.headers()) {
            return Err(EngineError::NoDownloadEvent(
                "host answered with a page instead of a file".into(),
            ));
        }

        let name = suggested_filename(response.headers(), response.url());
        debug!(name, url = %response.url(), "download captured");

        let stream = response.bytes_stream().map_err(std::io::Error::other);
        Ok(DownloadArtifact::new(name, StreamReader::new(stream)))
    }
}

/// Navigate and give client-side scripts time to render
async fn load(page: &Page, url: &str, settle: Duration) -> Result<(), EngineError> {
    page.goto(url).await.map_err(cdp_err(EngineError::Navigation))?;
    if let Err(e) = page.wait_for_navigation().await {
        debug!(url, error = %e, "page did not report navigation end");
    }
    tokio::time::sleep(settle).await;
    Ok(())
}

async fn current_url(page: &Page) -> Result<Url, EngineError> {
    let raw = page
        .url()
        .await
        .map_err(cdp_err(EngineError::Navigation))?
        .ok_or_else(|| EngineError::Navigation("page has no url".into()))?;
    Url::parse(&raw).map_err(|e| EngineError::Navigation(format!("bad page url {raw:?}: {e}")))
}

async fn fill(input: &Element, text: &str) -> Result<(), chromiumoxide::error::CdpError> {
    input.click().await?;
    input.type_str(text).await?;
    Ok(())
}

async fn find_submit(page: &Page) -> Option<Element> {
    if let Ok(buttons) = page.find_elements("button").await {
        for button in buttons {
            if let Ok(Some(text)) = button.inner_text().await
                && SUBMIT_LABELS.iter().any(|label| text.contains(label))
            {
                return Some(button);
            }
        }
    }
    page.find_element(r#"input[type="submit"]"#).await.ok()
}

async fn find_trigger(page: &Page) -> Option<(TriggerMatcher, Element)> {
    for matcher in TRIGGER_MATCHERS {
        match *matcher {
            TriggerMatcher::Text(label) => {
                let Ok(anchors) = page.find_elements("a").await else {
                    continue;
                };
                for anchor in anchors {
                    if let Ok(Some(text)) = anchor.inner_text().await
                        && text.contains(label)
                    {
                        return Some((*matcher, anchor));
                    }
                }
            }
            TriggerMatcher::Css(selector) => {
                if let Ok(element) = page.find_element(selector).await {
                    return Some((*matcher, element));
                }
            }
        }
    }
    None
}

/// Re-run `probe` until it yields a value or `deadline` elapses
async fn poll_until<T, F, Fut>(deadline: Duration, mut probe: F) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let give_up = Instant::now() + deadline;
    loop {
        if let Some(value) = probe().await {
            return Some(value);
        }
        if Instant::now() >= give_up {
            return None;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

fn is_html(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim_start().starts_with("text/html"))
}

/// File name from `Content-Disposition`, falling back to the last url segment
///
/// `filename*=` (RFC 5987) wins over `filename=`.
fn suggested_filename(headers: &HeaderMap, url: &Url) -> String {
    if let Some(value) = headers
        .get(header::CONTENT_DISPOSITION)
        .and_then(|v| v.to_str().ok())
    {
        let mut plain = None;
        for part in value.split(';') {
            let part = part.trim();
            if let Some(encoded) = part.strip_prefix("filename*=") {
                // charset'lang'encoded-filename
                let encoded = encoded.rsplit('\'').next().unwrap_or(encoded);
                if let Ok(decoded) = urlencoding::decode(encoded.trim_matches('"'))
                    && !decoded.is_empty()
                {
                    return decoded.into_owned();
                }
            } else if let Some(name) = part.strip_prefix("filename=") {
                let name = name.trim_matches('"');
                if !name.is_empty() {
                    plain = Some(name.to_string());
                }
            }
        }
        if let Some(name) = plain {
            return name;
        }
    }

    if let Some(last) = url.path_segments().and_then(|mut s| s.next_back())
        && !last.is_empty()
    {
        return urlencoding::decode(last)
            .map(|s| s.into_owned())
            .unwrap_or_else(|_| last.to_string());
    }

    "download".to_string()
}
