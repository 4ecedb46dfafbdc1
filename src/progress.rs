//! Progress events published while a job runs.
//!
//! The pipeline never renders anything itself; it hands events to a
//! [`ProgressSink`] supplied by the caller.

use serde::Serialize;
use std::sync::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use crate::job::JobState;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressEvent {
    pub phase: JobState,
    /// Files examined so far while scanning; objects to dispatch afterwards
    pub found: usize,
    /// Objects staged (scanning) or dispatched (dispatching) so far
    pub completed: usize,
    /// Known only once staging has finished
    pub total: Option<usize>,
    pub current_file: Option<String>,
}

impl ProgressEvent {
    pub fn scanning(found: usize, staged: usize, current_file: Option<String>) -> Self {
        Self {
            phase: JobState::Scanning,
            found,
            completed: staged,
            total: None,
            current_file,
        }
    }

    pub fn dispatching(completed: usize, total: usize, current_file: Option<String>) -> Self {
        Self {
            phase: JobState::Dispatching,
            found: total,
            completed,
            total: Some(total),
            current_file,
        }
    }

    pub fn phase(phase: JobState, found: usize, completed: usize) -> Self {
        Self {
            phase,
            found,
            completed,
            total: None,
            current_file: None,
        }
    }

    /// Completion ratio, when the total is known
    pub fn fraction(&self) -> Option<f64> {
        match self.total {
            Some(0) => Some(1.0),
            Some(total) => Some(self.completed as f64 / total as f64),
            None => None,
        }
    }
}

/// Receives progress events; implementations must not block for long
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: ProgressEvent);
}

impl ProgressSink for mpsc::UnboundedSender<ProgressEvent> {
    fn emit(&self, event: ProgressEvent) {
        // the consumer may have stopped listening; the job carries on regardless
        let _ = self.send(event);
    }
}

/// Keeps every event, for inspection in tests
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<ProgressEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

impl ProgressSink for RecordingSink {
    fn emit(&self, event: ProgressEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

/// Writes events to the debug log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl ProgressSink for LogSink {
    fn emit(&self, event: ProgressEvent) {
        debug!(
            phase = ?event.phase,
            found = event.found,
            completed = event.completed,
            total = ?event.total,
            file = event.current_file.as_deref().unwrap_or(""),
            "progress"
        );
    }
}
