//! Batch progress tracking and event broadcasting

use crate::error::AttemptError;
use crate::types::{Event, LinkOutcome};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::broadcast;
use tracing::info;

/// Capacity of the event channel; slow subscribers lag instead of blocking workers
const EVENT_CHANNEL_CAPACITY: usize = 1000;

/// Counts terminal links out of the scheduled total and broadcasts [`Event`]s
///
/// Shared by every worker. The completed counter only ever grows and never
/// exceeds the total.
pub struct ProgressReporter {
    completed: AtomicUsize,
    total: AtomicUsize,
    event_tx: broadcast::Sender<Event>,
}

impl ProgressReporter {
    /// Create a reporter expecting `total` links
    pub fn new(total: usize) -> Self {
        let (event_tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            completed: AtomicUsize::new(0),
            total: AtomicUsize::new(total),
            event_tx,
        }
    }

    /// Start a new batch of `total` links
    pub fn reset(&self, total: usize) {
        self.completed.store(0, Ordering::SeqCst);
        self.total.store(total, Ordering::SeqCst);
    }

    /// Links that reached a terminal state
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    /// Links in the current batch
    pub fn total(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }

    /// Count one more terminal link and return the new count
    ///
    /// Saturates at the total.
    pub fn advance(&self) -> usize {
        let total = self.total();
        let previous = self
            .completed
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |done| {
                (done < total).then_some(done + 1)
            })
            .unwrap_or(total);
        let completed = (previous + 1).min(total);
        self.emit(Event::Progress { completed, total });
        completed
    }

    /// Subscribe to batch events
    ///
    /// Events sent before subscribing are not replayed.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Send an event to current subscribers, if any
    pub fn emit(&self, event: Event) {
        self.event_tx.send(event).ok();
    }

    pub(crate) fn link_started(&self, url: &str) {
        self.emit(Event::LinkStarted {
            url: url.to_string(),
        });
    }

    pub(crate) fn attempt_failed(&self, url: &str, attempt: u32, error: &AttemptError) {
        self.emit(Event::AttemptFailed {
            url: url.to_string(),
            attempt,
            error: error.to_string(),
        });
    }

    /// Report a terminal outcome and advance the counter
    pub(crate) fn link_finished(&self, url: &str, outcome: &LinkOutcome) {
        match outcome {
            LinkOutcome::Succeeded { path, recorded, .. } => self.emit(Event::LinkSucceeded {
                url: url.to_string(),
                path: path.clone(),
                recorded: *recorded,
            }),
            LinkOutcome::Failed {
                reason, recorded, ..
            } => self.emit(Event::LinkFailed {
                url: url.to_string(),
                error: reason.clone(),
                recorded: *recorded,
            }),
        }
        let completed = self.advance();
        info!(
            url,
            success = outcome.is_success(),
            recorded = outcome.is_recorded(),
            completed,
            total = self.total(),
            "link finished"
        );
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new(0)
    }
}
