use std::path::{Path, PathBuf};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::destination::{file_label, in_sequence_order, DispatchReport};
use crate::error::TransferError;
use crate::models::{export_file_name, ObjectOutcome, StagedObject, TransferOutcome};
use crate::progress::{ProgressEvent, ProgressSink};

/// Copies staged objects into a directory as `export_NNNNNN.dcm`.
///
/// Existing files with the same name are overwritten, so repeating a
/// dispatch yields the same destination contents.
#[derive(Debug, Clone)]
pub struct FolderBackend {
    root: PathBuf,
}

impl FolderBackend {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn dispatch(
        &self,
        objects: &[StagedObject],
        sink: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<DispatchReport, TransferError> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|source| TransferError::DestinationUnavailable {
                path: self.root.clone(),
                source,
            })?;

        let ordered = in_sequence_order(objects);
        let total = ordered.len();
        let mut report = DispatchReport::default();
        info!("Copying {} objects to {}", total, self.root.display());

        for object in ordered {
            if cancel.is_cancelled() {
                info!("Folder export cancelled after {} objects", report.outcomes.len());
                report.cancelled = true;
                break;
            }

            let target = self.root.join(export_file_name(object.sequence));
            let outcome = match tokio::fs::copy(&object.staged_path, &target).await {
                Ok(bytes) => {
                    debug!(sequence = object.sequence, bytes, "Exported {}", target.display());
                    TransferOutcome::Accepted
                }
                Err(e) => {
                    warn!("Failed to export {}: {}", target.display(), e);
                    TransferOutcome::Rejected(e.to_string())
                }
            };
            report.outcomes.push(ObjectOutcome {
                sequence: Some(object.sequence),
                source: object.source.clone(),
                outcome,
            });
            sink.emit(ProgressEvent::dispatching(
                report.outcomes.len(),
                total,
                file_label(object),
            ));
        }

        Ok(report)
    }
}
