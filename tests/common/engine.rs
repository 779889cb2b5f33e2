//! Scripted in-memory page engine
//!
//! Every url succeeds unless a plan says otherwise. A plan fails one step of the
//! page flow for the first N attempts of a url, which is enough to drive the
//! retry and ledger paths without a browser.

use async_trait::async_trait;
use sharelink_dl::EngineError;
use sharelink_dl::engine::{
    CredentialOutcome, DownloadArtifact, FrameHandle, PageEngine, PageHandle, PageOptions,
    TriggerHandle,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Step of the page flow a plan breaks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Host unreachable
    Navigate,
    /// Content frame missing
    Frame,
    /// No trigger inside the frame
    Trigger,
    /// Trigger activated but nothing downloaded
    Capture,
}

#[derive(Debug, Clone)]
struct Plan {
    fail_first: u32,
    step: Step,
}

#[derive(Default)]
struct State {
    plans: Mutex<HashMap<String, Plan>>,
    names: Mutex<HashMap<String, String>>,
    hold: Mutex<Duration>,
    attempts: Mutex<HashMap<String, u32>>,
    passwords: Mutex<Vec<(String, String)>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    opened: AtomicUsize,
    closed: AtomicUsize,
}

/// Engine whose behavior is scripted per url
#[derive(Default)]
pub struct ScriptedEngine {
    state: Arc<State>,
}

impl ScriptedEngine {
    /// Engine on which every url downloads on the first attempt
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail `step` on the first `attempts` attempts of `url`
    ///
    /// `u32::MAX` fails forever.
    pub fn fail(self, url: &str, attempts: u32, step: Step) -> Self {
        self.state.plans.lock().unwrap().insert(
            url.to_string(),
            Plan {
                fail_first: attempts,
                step,
            },
        );
        self
    }

    /// Serve `url` under a fixed file name
    pub fn serve_name(self, url: &str, name: &str) -> Self {
        self.state
            .names
            .lock()
            .unwrap()
            .insert(url.to_string(), name.to_string());
        self
    }

    /// Keep each page busy for `hold` during navigation
    pub fn hold(self, hold: Duration) -> Self {
        *self.state.hold.lock().unwrap() = hold;
        self
    }

    /// Wrap for sharing with a downloader
    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Attempts made against `url`
    pub fn attempts(&self, url: &str) -> u32 {
        self.state
            .attempts
            .lock()
            .unwrap()
            .get(url)
            .copied()
            .unwrap_or(0)
    }

    /// Attempts made against any url
    pub fn total_attempts(&self) -> u32 {
        self.state.attempts.lock().unwrap().values().sum()
    }

    /// `(url, password)` pairs offered to password prompts
    pub fn passwords(&self) -> Vec<(String, String)> {
        self.state.passwords.lock().unwrap().clone()
    }

    /// Highest number of pages open at the same time
    pub fn peak_in_flight(&self) -> usize {
        self.state.peak.load(Ordering::SeqCst)
    }

    /// Pages currently open
    pub fn in_flight(&self) -> usize {
        self.state.in_flight.load(Ordering::SeqCst)
    }

    /// Pages opened so far
    pub fn opened(&self) -> usize {
        self.state.opened.load(Ordering::SeqCst)
    }

    /// Pages closed so far
    pub fn closed(&self) -> usize {
        self.state.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PageEngine for ScriptedEngine {
    async fn open_page(&self, _options: &PageOptions) -> Result<Box<dyn PageHandle>, EngineError> {
        self.state.opened.fetch_add(1, Ordering::SeqCst);
        let now = self.state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.peak.fetch_max(now, Ordering::SeqCst);
        Ok(Box::new(ScriptedPage {
            state: Arc::clone(&self.state),
            url: String::new(),
            failing: None,
            open: true,
        }))
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

struct ScriptedPage {
    state: Arc<State>,
    url: String,
    failing: Option<Step>,
    open: bool,
}

#[async_trait]
impl PageHandle for ScriptedPage {
    async fn navigate(&mut self, url: &str) -> Result<(), EngineError> {
        self.url = url.to_string();
        let attempt = {
            let mut attempts = self.state.attempts.lock().unwrap();
            let count = attempts.entry(url.to_string()).or_insert(0);
            *count += 1;
            *count
        };
        self.failing = self
            .state
            .plans
            .lock()
            .unwrap()
            .get(url)
            .filter(|plan| attempt <= plan.fail_first)
            .map(|plan| plan.step);

        let hold = *self.state.hold.lock().unwrap();
        if !hold.is_zero() {
            tokio::time::sleep(hold).await;
        }

        if self.failing == Some(Step::Navigate) {
            return Err(EngineError::Navigation(format!("{url} unreachable")));
        }
        Ok(())
    }

    async fn submit_credential(&mut self, password: &str) -> CredentialOutcome {
        self.state
            .passwords
            .lock()
            .unwrap()
            .push((self.url.clone(), password.to_string()));
        CredentialOutcome::Submitted
    }

    async fn locate_content_frame(&mut self) -> Result<Box<dyn FrameHandle>, EngineError> {
        if self.failing == Some(Step::Frame) {
            return Err(EngineError::FrameNotFound("no content frame".into()));
        }
        let name = self
            .state
            .names
            .lock()
            .unwrap()
            .get(&self.url)
            .cloned()
            .unwrap_or_else(|| format!("{}.bin", self.url.rsplit('/').next().unwrap_or("file")));
        Ok(Box::new(ScriptedFrame {
            failing: self.failing,
            name,
            body: self.url.clone().into_bytes(),
        }))
    }

    async fn html(&mut self) -> Option<String> {
        Some(format!("<html><body>{}</body></html>", self.url))
    }

    async fn close(&mut self) {
        if self.open {
            self.open = false;
            self.state.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.state.closed.fetch_add(1, Ordering::SeqCst);
        }
    }
}

struct ScriptedFrame {
    failing: Option<Step>,
    name: String,
    body: Vec<u8>,
}

#[async_trait]
impl FrameHandle for ScriptedFrame {
    async fn locate_trigger(&mut self) -> Result<Box<dyn TriggerHandle>, EngineError> {
        if self.failing == Some(Step::Trigger) {
            return Err(EngineError::TriggerNotFound("no matcher hit".into()));
        }
        Ok(Box::new(ScriptedTrigger {
            failing: self.failing,
            name: self.name.clone(),
            body: self.body.clone(),
        }))
    }
}

struct ScriptedTrigger {
    failing: Option<Step>,
    name: String,
    body: Vec<u8>,
}

#[async_trait]
impl TriggerHandle for ScriptedTrigger {
    async fn activate_and_capture(&mut self) -> Result<DownloadArtifact, EngineError> {
        if self.failing == Some(Step::Capture) {
            return Err(EngineError::NoDownloadEvent("nothing captured".into()));
        }
        Ok(DownloadArtifact::from_bytes(self.name.clone(), self.body.clone()))
    }
}
