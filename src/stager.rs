//! Staging: the single pass over the source media.
//!
//! Every regular file below the source root is classified by the
//! validator; objects are copied verbatim into the job's working
//! directory as `object_NNNNNN.dcm`. The source is never read again
//! after this pass.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::TransferError;
use crate::models::{staged_file_name, ObjectOutcome, SourceEntry, StagedObject, TransferOutcome};
use crate::progress::{ProgressEvent, ProgressSink};
use crate::storage::StorageError;
use crate::validator::is_dicom_object;

/// Counters reported at the end of a staging pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StageCounts {
    /// Regular files examined
    pub found: usize,
    pub staged: usize,
    pub not_dicom: usize,
    /// Objects that passed validation but could not be copied
    pub skipped: usize,
}

#[derive(Debug, Default)]
pub struct StageReport {
    /// Staged objects in ascending sequence order
    pub objects: Vec<StagedObject>,
    pub counts: StageCounts,
    pub skipped: Vec<ObjectOutcome>,
    /// The walk stopped early on cancellation
    pub cancelled: bool,
}

/// Copies validated objects from a source tree into a working directory
#[derive(Debug, Clone)]
pub struct Stager {
    working_dir: PathBuf,
}

impl Stager {
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
        }
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    /// Walk `source_root` and stage every DICOM object found.
    ///
    /// Blocking; callers on the async runtime run it under `spawn_blocking`.
    /// Only a missing source root or an unusable working directory fail the
    /// whole pass. Symlinks are followed; link cycles are reported and skipped.
    pub fn stage(
        &self,
        source_root: &Path,
        sink: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<StageReport, TransferError> {
        if !source_root.is_dir() {
            return Err(TransferError::SourceMissing(source_root.to_path_buf()));
        }
        fs::create_dir_all(&self.working_dir).map_err(StorageError::from)?;

        info!(
            "Staging objects from {} into {}",
            source_root.display(),
            self.working_dir.display()
        );

        let mut report = StageReport::default();
        let mut sequence: u32 = 0;

        let walker = WalkDir::new(source_root)
            .follow_links(true)
            .sort_by_file_name()
            .into_iter()
            // never re-stage our own output when the working dir sits inside the source
            .filter_entry(|e| !e.path().starts_with(&self.working_dir));

        for entry in walker {
            if cancel.is_cancelled() {
                info!("Staging cancelled after {} files", report.counts.found);
                report.cancelled = true;
                break;
            }

            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    if let Some(ancestor) = e.loop_ancestor() {
                        warn!("Skipping symlink cycle back to {}", ancestor.display());
                    } else {
                        warn!("Cannot read entry during scan: {}", e);
                    }
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }

            let candidate = SourceEntry {
                path: entry.path().to_path_buf(),
                size: entry.metadata().map(|m| m.len()).unwrap_or(0),
            };
            report.counts.found += 1;

            if !is_dicom_object(&candidate.path) {
                debug!("Not a DICOM object: {}", candidate.path.display());
                report.counts.not_dicom += 1;
                sink.emit(self.event(&report, &candidate));
                continue;
            }

            match self.copy_object(&candidate, sequence) {
                Ok(object) => {
                    debug!(
                        sequence = object.sequence,
                        size = object.size,
                        "Staged {}",
                        candidate.path.display()
                    );
                    report.objects.push(object);
                    report.counts.staged += 1;
                    sequence += 1;
                }
                Err(e) => {
                    warn!("Failed to stage {}: {}", candidate.path.display(), e);
                    report.counts.skipped += 1;
                    report.skipped.push(ObjectOutcome {
                        sequence: None,
                        source: candidate.path.clone(),
                        outcome: TransferOutcome::Skipped(e.to_string()),
                    });
                }
            }
            sink.emit(self.event(&report, &candidate));
        }

        info!(
            found = report.counts.found,
            staged = report.counts.staged,
            not_dicom = report.counts.not_dicom,
            skipped = report.counts.skipped,
            "Staging finished"
        );
        Ok(report)
    }

    fn copy_object(&self, entry: &SourceEntry, sequence: u32) -> std::io::Result<StagedObject> {
        let staged_path = self.working_dir.join(staged_file_name(sequence));
        match fs::copy(&entry.path, &staged_path) {
            Ok(size) => Ok(StagedObject {
                source: entry.path.clone(),
                staged_path,
                sequence,
                size,
            }),
            Err(e) => {
                // the sequence number is reused, so a partial copy must not linger
                let _ = fs::remove_file(&staged_path);
                Err(e)
            }
        }
    }

    fn event(&self, report: &StageReport, entry: &SourceEntry) -> ProgressEvent {
        ProgressEvent::scanning(
            report.counts.found,
            report.counts.staged,
            entry
                .path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned()),
        )
    }
}
