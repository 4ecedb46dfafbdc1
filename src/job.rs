//! Transfer job orchestration: stage, dispatch, clean up.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dimse::Connector;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::destination::{Destination, DestinationConfig};
use crate::error::TransferError;
use crate::models::{ObjectOutcome, TransferOutcome};
use crate::progress::{ProgressEvent, ProgressSink};
use crate::stager::Stager;
use crate::storage::{FilesystemStorage, WorkingDir};

/// Lifecycle of a transfer job.
///
/// Jobs that fail or are cancelled after their working directory exists
/// pass through `Cleaning` before reaching their terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Idle,
    Scanning,
    Staged,
    Dispatching,
    Cleaning,
    Done,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Done | JobState::Failed | JobState::Cancelled)
    }

    pub fn can_transition_to(&self, next: JobState) -> bool {
        use JobState::*;
        match (self, next) {
            (from, _) if from.is_terminal() => false,
            (_, Failed) => true,
            (Idle, Scanning)
            | (Scanning, Staged)
            | (Scanning, Cleaning)
            | (Staged, Dispatching)
            | (Dispatching, Cleaning)
            | (Cleaning, Done)
            | (Cleaning, Cancelled) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            JobState::Idle => "idle",
            JobState::Scanning => "scanning",
            JobState::Staged => "staged",
            JobState::Dispatching => "dispatching",
            JobState::Cleaning => "cleaning",
            JobState::Done => "done",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Why a job ended in `Failed`, and where
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobFailure {
    pub phase: JobState,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobResult {
    pub job_id: Uuid,
    pub source: PathBuf,
    pub destination: String,
    pub files_found: usize,
    pub files_staged: usize,
    pub files_dispatched: usize,
    /// Outcomes other than `Accepted`, from staging and dispatch together
    pub files_failed: usize,
    pub outcomes: Vec<ObjectOutcome>,
    pub final_state: JobState,
    pub failure: Option<JobFailure>,
    /// Removed by the time the result is returned
    pub working_dir: Option<PathBuf>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl JobResult {
    pub fn is_success(&self) -> bool {
        self.final_state == JobState::Done && self.files_failed == 0
    }
}

/// One stage, dispatch and cleanup run from a source tree to a destination
pub struct TransferJob {
    id: Uuid,
    source: PathBuf,
    destination: DestinationConfig,
    storage: FilesystemStorage,
    connector: Option<Arc<dyn Connector>>,
}

impl TransferJob {
    pub fn new(
        source: impl Into<PathBuf>,
        destination: DestinationConfig,
        storage: FilesystemStorage,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            source: source.into(),
            destination,
            storage,
            connector: None,
        }
    }

    /// Use `connector` instead of the native client for PACS destinations
    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Run the job to completion on a background task
    pub fn spawn(self) -> JobHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let id = self.id;
        let sink: Arc<dyn ProgressSink> = Arc::new(tx);
        let join = tokio::spawn(self.run(sink, cancel.clone()));
        JobHandle {
            id,
            progress: rx,
            cancel,
            join,
        }
    }

    /// Run the job on the current task.
    ///
    /// Never returns an error: failures are reported in the result with the
    /// phase they happened in, and the working directory is always removed.
    pub async fn run(self, sink: Arc<dyn ProgressSink>, cancel: CancellationToken) -> JobResult {
        let mut run = JobRun::new(&self, sink.clone());
        info!(
            "Job {}: {} -> {}",
            self.id,
            self.source.display(),
            run.result.destination
        );

        if let Err(e) = self.destination.validate() {
            run.fail(TransferError::from(e));
            return run.finish();
        }

        run.enter(JobState::Scanning);
        let working = match self.storage.create_working_dir(self.id) {
            Ok(working) => working,
            Err(e) => {
                run.fail(TransferError::from(e));
                return run.finish();
            }
        };
        run.result.working_dir = Some(working.path().to_path_buf());

        self.stage_and_dispatch(&mut run, &working, sink.clone(), &cancel)
            .await;

        run.enter(JobState::Cleaning);
        info!("Phase 3: cleaning up");
        if working.close().is_err() {
            // already logged; the destination result stands
            debug!("Job {} leaves its working directory behind", self.id);
        }
        run.finish()
    }

    async fn stage_and_dispatch(
        &self,
        run: &mut JobRun,
        working: &WorkingDir,
        sink: Arc<dyn ProgressSink>,
        cancel: &CancellationToken,
    ) {
        info!("Phase 1: caching files from {}", self.source.display());
        let stager = Stager::new(working.path());
        let source = self.source.clone();
        let stage_sink = sink.clone();
        let stage_cancel = cancel.clone();
        let staged = tokio::task::spawn_blocking(move || {
            stager.stage(&source, stage_sink.as_ref(), &stage_cancel)
        })
        .await
        .map_err(TransferError::from)
        .and_then(|result| result);

        let report = match staged {
            Ok(report) => report,
            Err(e) => {
                run.fail(e);
                return;
            }
        };
        run.result.files_found = report.counts.found;
        run.result.files_staged = report.counts.staged;
        run.result.outcomes.extend(report.skipped);
        if report.cancelled || cancel.is_cancelled() {
            info!("Job {} cancelled before dispatch", self.id);
            run.cancelled = true;
            return;
        }

        run.enter(JobState::Staged);
        run.enter(JobState::Dispatching);
        info!(
            "Phase 2: exporting {} objects to {}",
            report.objects.len(),
            run.result.destination
        );
        let destination = Destination::from_config(&self.destination, self.connector.clone());
        match destination
            .dispatch(&report.objects, sink.as_ref(), cancel)
            .await
        {
            Ok(dispatch) => {
                run.result.files_dispatched = dispatch.accepted();
                run.result.outcomes.extend(dispatch.outcomes);
                run.cancelled = dispatch.cancelled;
            }
            Err(e) => run.fail(e),
        }
    }
}

/// Mutable state of one run; only the task running the job touches it
struct JobRun {
    state: JobState,
    cancelled: bool,
    sink: Arc<dyn ProgressSink>,
    result: JobResult,
}

impl JobRun {
    fn new(job: &TransferJob, sink: Arc<dyn ProgressSink>) -> Self {
        let now = Utc::now();
        Self {
            state: JobState::Idle,
            cancelled: false,
            sink,
            result: JobResult {
                job_id: job.id,
                source: job.source.clone(),
                destination: job.destination.describe(),
                files_found: 0,
                files_staged: 0,
                files_dispatched: 0,
                files_failed: 0,
                outcomes: Vec::new(),
                final_state: JobState::Idle,
                failure: None,
                working_dir: None,
                started_at: now,
                finished_at: now,
            },
        }
    }

    fn enter(&mut self, next: JobState) {
        if !self.state.can_transition_to(next) {
            warn!("Unexpected job transition {} -> {}", self.state, next);
        }
        debug!("Job {}: {} -> {}", self.result.job_id, self.state, next);
        self.state = next;
        self.sink.emit(ProgressEvent::phase(
            next,
            self.result.files_found,
            self.completed(),
        ));
    }

    fn fail(&mut self, error: TransferError) {
        error!("Job {} failed while {}: {}", self.result.job_id, self.state, error);
        self.result.failure = Some(JobFailure {
            phase: self.state,
            message: error.to_string(),
        });
    }

    fn completed(&self) -> usize {
        match self.state {
            JobState::Scanning | JobState::Staged => self.result.files_staged,
            _ => self.result.files_dispatched,
        }
    }

    fn finish(mut self) -> JobResult {
        let terminal = if self.result.failure.is_some() {
            JobState::Failed
        } else if self.cancelled {
            JobState::Cancelled
        } else {
            JobState::Done
        };
        self.enter(terminal);

        self.result.final_state = terminal;
        self.result.files_failed = self
            .result
            .outcomes
            .iter()
            .filter(|o| !matches!(o.outcome, TransferOutcome::Accepted))
            .count();
        self.result.finished_at = Utc::now();
        info!(
            found = self.result.files_found,
            staged = self.result.files_staged,
            dispatched = self.result.files_dispatched,
            failed = self.result.files_failed,
            "Job {} finished: {}",
            self.result.job_id,
            terminal
        );
        self.result
    }
}

/// A job running on a background task
pub struct JobHandle {
    pub id: Uuid,
    progress: mpsc::UnboundedReceiver<ProgressEvent>,
    cancel: CancellationToken,
    join: JoinHandle<JobResult>,
}

impl JobHandle {
    /// Next progress event; `None` once the job has finished
    pub async fn next_event(&mut self) -> Option<ProgressEvent> {
        self.progress.recv().await
    }

    /// Ask the job to stop before its next object
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn wait(self) -> Result<JobResult, TransferError> {
        Ok(self.join.await?)
    }
}
