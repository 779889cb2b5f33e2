use super::*;
use crate::config::{BrowserConfig, DelayRange, RetryConfig};
use crate::engine::{
    CredentialOutcome, DownloadArtifact, FrameHandle, PageEngine, PageHandle, PageOptions,
    TriggerHandle,
};
use crate::error::EngineError;
use crate::naming::NameResolver;
use crate::types::Event;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Engine whose pages fail, hang or panic according to the url they visit
#[derive(Default)]
struct Scripted {
    /// Fail the first N attempts of a url
    failures: HashMap<String, u32>,
    /// Urls whose worker panics
    panics: HashSet<String>,
    /// How long each navigation takes
    hold: Duration,
    attempts: Mutex<HashMap<String, u32>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    closed: AtomicUsize,
}

impl Scripted {
    fn attempts_of(&self, url: &str) -> u32 {
        self.attempts.lock().unwrap().get(url).copied().unwrap_or(0)
    }
}

struct ScriptedEngine(Arc<Scripted>);

#[async_trait]
impl PageEngine for ScriptedEngine {
    async fn open_page(&self, _options: &PageOptions) -> Result<Box<dyn PageHandle>, EngineError> {
        let now = self.0.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.0.peak.fetch_max(now, Ordering::SeqCst);
        Ok(Box::new(ScriptedPage {
            script: Arc::clone(&self.0),
            url: String::new(),
            open: true,
        }))
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

struct ScriptedPage {
    script: Arc<Scripted>,
    url: String,
    open: bool,
}

#[async_trait]
impl PageHandle for ScriptedPage {
    async fn navigate(&mut self, url: &str) -> Result<(), EngineError> {
        self.url = url.to_string();
        let attempt = {
            let mut attempts = self.script.attempts.lock().unwrap();
            let count = attempts.entry(url.to_string()).or_insert(0);
            *count += 1;
            *count
        };
        tokio::time::sleep(self.script.hold).await;

        if self.script.panics.contains(url) {
            panic!("scripted panic for {url}");
        }
        if attempt <= self.script.failures.get(url).copied().unwrap_or(0) {
            return Err(EngineError::Navigation(format!("scripted failure {attempt}")));
        }
        Ok(())
    }

    async fn submit_credential(&mut self, _password: &str) -> CredentialOutcome {
        CredentialOutcome::NoPrompt
    }

    async fn locate_content_frame(&mut self) -> Result<Box<dyn FrameHandle>, EngineError> {
        Ok(Box::new(ScriptedFrame {
            name: format!("{}.bin", self.url.rsplit('/').next().unwrap_or("file")),
        }))
    }

    async fn close(&mut self) {
        if self.open {
            self.open = false;
            self.script.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.script.closed.fetch_add(1, Ordering::SeqCst);
        }
    }
}

struct ScriptedFrame {
    name: String,
}

#[async_trait]
impl FrameHandle for ScriptedFrame {
    async fn locate_trigger(&mut self) -> Result<Box<dyn TriggerHandle>, EngineError> {
        Ok(Box::new(ScriptedTrigger {
            name: self.name.clone(),
        }))
    }
}

struct ScriptedTrigger {
    name: String,
}

#[async_trait]
impl TriggerHandle for ScriptedTrigger {
    async fn activate_and_capture(&mut self) -> Result<DownloadArtifact, EngineError> {
        Ok(DownloadArtifact::from_bytes(self.name.clone(), b"data".to_vec()))
    }
}

struct Harness {
    script: Arc<Scripted>,
    ledger: Arc<ResumeLedger>,
    progress: Arc<ProgressReporter>,
    scheduler: Scheduler,
}

fn harness(dir: &Path, script: Scripted, concurrency: usize, max_retries: u32) -> Harness {
    let script = Arc::new(script);
    let engine: Arc<dyn PageEngine> = Arc::new(ScriptedEngine(Arc::clone(&script)));
    let ledger = Arc::new(ResumeLedger::open(
        dir.join("processed.txt"),
        dir.join("failed.txt"),
    ));
    let progress = Arc::new(ProgressReporter::default());
    let policy = RetryPolicy::new(&RetryConfig {
        max_retries,
        delay_first: DelayRange::zero(),
        delay_retry: DelayRange::zero(),
    });
    let session = DownloadSession::new(
        engine,
        Arc::new(NameResolver::new(dir.join("downloads"))),
        &BrowserConfig::default(),
    );
    let scheduler = Scheduler::new(
        concurrency,
        policy,
        session,
        Arc::clone(&ledger),
        Arc::clone(&progress),
    );
    Harness {
        script,
        ledger,
        progress,
        scheduler,
    }
}

fn links(n: usize) -> Vec<LinkRecord> {
    (0..n)
        .map(|i| LinkRecord::new(format!("https://host/s/{i}"), ""))
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_in_flight_links_never_exceed_concurrency() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(
        dir.path(),
        Scripted {
            hold: Duration::from_secs(1),
            ..Scripted::default()
        },
        3,
        0,
    );
    h.progress.reset(10);

    let report = h.scheduler.run(links(10)).await;

    assert_eq!(report.succeeded, 10);
    assert_eq!(h.script.peak.load(Ordering::SeqCst), 3);
    assert_eq!(h.script.in_flight.load(Ordering::SeqCst), 0);
    assert_eq!(h.script.closed.load(Ordering::SeqCst), 10);
    assert_eq!(h.progress.completed(), 10);
}

#[tokio::test]
async fn test_concurrency_of_one_is_sequential() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(dir.path(), Scripted::default(), 1, 0);

    let report = h.scheduler.run(links(4)).await;

    assert_eq!(report.succeeded, 4);
    assert_eq!(h.script.peak.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_retry_then_succeed_is_recorded_once() {
    let dir = tempfile::tempdir().unwrap();
    let url = "https://host/s/0".to_string();
    let h = harness(
        dir.path(),
        Scripted {
            failures: HashMap::from([(url.clone(), 2)]),
            ..Scripted::default()
        },
        2,
        2,
    );

    let report = h.scheduler.run(links(1)).await;

    assert_eq!(report.succeeded, 1);
    assert_eq!(report.failed, 0);
    assert_eq!(h.script.attempts_of(&url), 3);
    assert!(h.ledger.load().await.unwrap().contains(&url));
    assert!(h.ledger.failed_entries().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_exhausted_link_goes_to_failed_ledger_only() {
    let dir = tempfile::tempdir().unwrap();
    let url = "https://host/s/0".to_string();
    let h = harness(
        dir.path(),
        Scripted {
            failures: HashMap::from([(url.clone(), u32::MAX)]),
            ..Scripted::default()
        },
        2,
        2,
    );

    let report = h.scheduler.run(vec![LinkRecord::new(url.clone(), "pw")]).await;

    assert_eq!(report.failed, 1);
    assert_eq!(h.script.attempts_of(&url), 3);
    assert!(h.ledger.load().await.unwrap().is_empty());
    let failed = h.ledger.failed_entries().await.unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].url, url);
    assert_eq!(failed[0].password, "pw");
}

#[tokio::test]
async fn test_worker_panic_counts_as_failure_without_stopping_others() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(
        dir.path(),
        Scripted {
            panics: HashSet::from(["https://host/s/1".to_string()]),
            ..Scripted::default()
        },
        2,
        0,
    );
    h.progress.reset(3);

    let report = h.scheduler.run(links(3)).await;

    assert_eq!(report.succeeded, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(h.progress.completed(), 3);
    assert_eq!(h.ledger.load().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_cancelled_before_start_dispatches_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let token = CancellationToken::new();
    token.cancel();
    let mut h = harness(dir.path(), Scripted::default(), 2, 0);
    h.scheduler = h.scheduler.with_cancellation(token);

    let report = h.scheduler.run(links(5)).await;

    assert_eq!(report, ScheduleReport {
        succeeded: 0,
        failed: 0,
        cancelled: 5,
        unrecorded: 0,
    });
    assert_eq!(h.script.attempts.lock().unwrap().len(), 0);
    assert!(!dir.path().join("processed.txt").exists());
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_lets_in_flight_links_finish() {
    let dir = tempfile::tempdir().unwrap();
    let token = CancellationToken::new();
    let mut h = harness(
        dir.path(),
        Scripted {
            hold: Duration::from_secs(10),
            ..Scripted::default()
        },
        2,
        0,
    );
    h.scheduler = h.scheduler.with_cancellation(token.clone());

    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        token.cancel();
    });
    let report = h.scheduler.run(links(6)).await;
    canceller.await.unwrap();

    assert_eq!(report.succeeded, 2);
    assert_eq!(report.cancelled, 4);
    assert_eq!(h.ledger.load().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_success_already_in_this_runs_ledger_is_reported_unrecorded() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(dir.path(), Scripted::default(), 1, 0);
    let mut events = h.progress.subscribe();
    assert!(h.ledger.record_failure("https://host/s/0", "").await.unwrap());

    let report = h.scheduler.run(links(1)).await;

    assert_eq!(report.succeeded, 1);
    assert_eq!(report.unrecorded, 1);
    assert!(h.ledger.load().await.unwrap().is_empty());
    let mut unrecorded_success = false;
    while let Ok(event) = events.try_recv() {
        if let Event::LinkSucceeded { recorded, .. } = event {
            unrecorded_success = !recorded;
        }
    }
    assert!(unrecorded_success);
}

#[tokio::test]
async fn test_new_run_on_same_ledger_records_again() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(dir.path(), Scripted::default(), 1, 0);
    assert!(h.ledger.record_failure("https://host/s/0", "").await.unwrap());
    h.ledger.begin_run().await;

    let report = h.scheduler.run(links(1)).await;

    assert_eq!(report.succeeded, 1);
    assert_eq!(report.unrecorded, 0);
    assert!(h.ledger.load().await.unwrap().contains("https://host/s/0"));
}
