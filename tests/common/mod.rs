#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use dicom_core::{DataElement, PrimitiveValue, VR};
use dicom_dictionary_std::{tags, uids};
use dicom_importer::models::{staged_file_name, StagedObject};
use dicom_importer::progress::{ProgressEvent, ProgressSink};
use dicom_importer::JobState;
use dicom_object::{FileMetaTableBuilder, InMemDicomObject};
use dimse::{
    AcceptedContext, Association, AssociationRequest, Connector, DimseError, DimseStatus,
    StoreRequest,
};
use tokio_util::sync::CancellationToken;

/// Write a small Part 10 CT object
pub fn write_object(path: &Path, sop_instance_uid: &str) {
    let mut obj = InMemDicomObject::new_empty();
    obj.put(DataElement::new(
        tags::SOP_CLASS_UID,
        VR::UI,
        PrimitiveValue::from(uids::CT_IMAGE_STORAGE),
    ));
    obj.put(DataElement::new(
        tags::SOP_INSTANCE_UID,
        VR::UI,
        PrimitiveValue::from(sop_instance_uid),
    ));
    obj.put(DataElement::new(tags::PATIENT_NAME, VR::PN, PrimitiveValue::from("TEST^PATIENT")));
    obj.put(DataElement::new(tags::PATIENT_ID, VR::LO, PrimitiveValue::from("PID001")));
    obj.put(DataElement::new(tags::MODALITY, VR::CS, PrimitiveValue::from("CT")));

    let file = obj
        .with_meta(
            FileMetaTableBuilder::new()
                .transfer_syntax(uids::EXPLICIT_VR_LITTLE_ENDIAN)
                .media_storage_sop_class_uid(uids::CT_IMAGE_STORAGE)
                .media_storage_sop_instance_uid(sop_instance_uid),
        )
        .expect("build file meta");
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    file.write_to_file(path).expect("write Part 10 file");
}

/// Write a file that is not a DICOM object
pub fn write_other(path: &Path, contents: &[u8]) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, contents).unwrap();
}

/// Source tree with `n` objects spread over two series directories
pub fn source_tree(root: &Path, n: usize) -> Vec<PathBuf> {
    (0..n)
        .map(|i| {
            let path = root.join(format!("SERIES{}", i % 2)).join(format!("IM{:04}", i));
            write_object(&path, &format!("1.2.826.0.1.3680043.2.1125.{}", i + 1));
            path
        })
        .collect()
}

/// Staged objects written straight into `dir`, bypassing the stager
pub fn staged_objects(dir: &Path, n: u32) -> Vec<StagedObject> {
    (0..n)
        .map(|sequence| {
            let staged_path = dir.join(staged_file_name(sequence));
            write_object(&staged_path, &format!("1.2.826.0.1.3680043.2.1125.{}", sequence + 1));
            StagedObject {
                source: PathBuf::from(format!("/media/cdrom/IM{:04}", sequence)),
                size: std::fs::metadata(&staged_path).unwrap().len(),
                staged_path,
                sequence,
            }
        })
        .collect()
}

/// Sorted file names in `dir`
pub fn file_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

/// What the mock peer does with one C-STORE
#[derive(Debug, Clone, Copy)]
pub enum StoreStep {
    Status(u16),
    Hang,
    Drop,
}

/// Scripted in-memory peer
#[derive(Default)]
pub struct MockConnector {
    pub reject_association: bool,
    pub hang_association: bool,
    pub echo_status: u16,
    /// Keyed by 1-based store call number; unscripted calls succeed
    pub script: HashMap<usize, StoreStep>,
    pub associations: Arc<AtomicUsize>,
    pub stores: Arc<AtomicUsize>,
    pub releases: Arc<AtomicUsize>,
    pub proposed: Arc<Mutex<Vec<AssociationRequest>>>,
}

impl MockConnector {
    pub fn accepting() -> Self {
        Self::default()
    }

    pub fn rejecting() -> Self {
        Self {
            reject_association: true,
            ..Default::default()
        }
    }

    pub fn hanging() -> Self {
        Self {
            hang_association: true,
            ..Default::default()
        }
    }

    pub fn with_step(mut self, call: usize, step: StoreStep) -> Self {
        self.script.insert(call, step);
        self
    }

    pub fn association_count(&self) -> usize {
        self.associations.load(Ordering::SeqCst)
    }

    pub fn store_count(&self) -> usize {
        self.stores.load(Ordering::SeqCst)
    }

    pub fn release_count(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn associate(&self, request: AssociationRequest) -> dimse::Result<Box<dyn Association>> {
        self.associations.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut proposed) = self.proposed.lock() {
            proposed.push(request.clone());
        }
        if self.hang_association {
            std::future::pending::<()>().await;
        }
        if self.reject_association {
            return Err(DimseError::AssociationRejected(
                "called AE title not recognized".into(),
            ));
        }

        let accepted = request
            .contexts
            .iter()
            .enumerate()
            .map(|(i, pc)| AcceptedContext {
                id: (2 * i + 1) as u8,
                abstract_syntax: pc.abstract_syntax.clone(),
                transfer_syntax: pc.transfer_syntaxes[0].clone(),
            })
            .collect();

        Ok(Box::new(MockAssociation {
            accepted,
            echo_status: self.echo_status,
            script: self.script.clone(),
            stores: self.stores.clone(),
            releases: self.releases.clone(),
        }))
    }
}

struct MockAssociation {
    accepted: Vec<AcceptedContext>,
    echo_status: u16,
    script: HashMap<usize, StoreStep>,
    stores: Arc<AtomicUsize>,
    releases: Arc<AtomicUsize>,
}

#[async_trait]
impl Association for MockAssociation {
    fn accepted_contexts(&self) -> &[AcceptedContext] {
        &self.accepted
    }

    async fn store(&mut self, _request: &StoreRequest) -> dimse::Result<DimseStatus> {
        let call = self.stores.fetch_add(1, Ordering::SeqCst) + 1;
        match self.script.get(&call).copied() {
            Some(StoreStep::Status(code)) => Ok(DimseStatus::from_code(code)),
            Some(StoreStep::Hang) => std::future::pending().await,
            Some(StoreStep::Drop) => Err(DimseError::AssociationClosed("peer aborted".into())),
            None => Ok(DimseStatus::Success),
        }
    }

    async fn echo(&mut self) -> dimse::Result<DimseStatus> {
        Ok(DimseStatus::from_code(self.echo_status))
    }

    async fn release(&mut self) -> dimse::Result<()> {
        self.releases.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Cancels the job once `after` objects have been dispatched
pub struct CancelAfter {
    pub token: CancellationToken,
    pub after: usize,
    pub events: Mutex<Vec<ProgressEvent>>,
}

impl CancelAfter {
    pub fn new(token: CancellationToken, after: usize) -> Self {
        Self {
            token,
            after,
            events: Mutex::new(Vec::new()),
        }
    }
}

impl ProgressSink for CancelAfter {
    fn emit(&self, event: ProgressEvent) {
        if event.phase == JobState::Dispatching && event.completed >= self.after && event.total.is_some() {
            self.token.cancel();
        }
        self.events.lock().unwrap().push(event);
    }
}
