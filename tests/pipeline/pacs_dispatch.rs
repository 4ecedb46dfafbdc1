#[path = "../common/mod.rs"]
mod common;

use std::sync::Arc;
use std::time::Duration;

use dicom_importer::destination::PacsBackend;
use dicom_importer::progress::RecordingSink;
use dicom_importer::{PacsConfig, TransferError, TransferOutcome};
use dimse::{Connector, DimseError};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use common::{staged_objects, MockConnector, StoreStep};

fn pacs() -> PacsConfig {
    PacsConfig::new("DICOM_IMPORTER", "ANY-SCP", "127.0.0.1", 11112)
        .with_store_timeout(Duration::from_secs(5))
        .with_connect_timeout(Duration::from_secs(2))
}

fn backend(mock: &Arc<MockConnector>) -> PacsBackend {
    let connector: Arc<dyn Connector> = mock.clone();
    PacsBackend::new(pacs(), connector)
}

#[tokio::test]
async fn test_refused_association_fails_fast() {
    let staging = TempDir::new().unwrap();
    let objects = staged_objects(staging.path(), 3);
    let mock = Arc::new(MockConnector::rejecting());

    let result = backend(&mock)
        .dispatch(&objects, &RecordingSink::new(), &CancellationToken::new())
        .await;

    match result {
        Err(TransferError::Association { peer, source }) => {
            assert_eq!(peer, "ANY-SCP@127.0.0.1:11112");
            assert!(matches!(source, DimseError::AssociationRejected(_)));
        }
        other => panic!("expected association error, got {:?}", other.map(|r| r.outcomes)),
    }
    assert_eq!(mock.association_count(), 1);
    assert_eq!(mock.store_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_timed_out_store_is_rejected_and_loop_continues() {
    let staging = TempDir::new().unwrap();
    let objects = staged_objects(staging.path(), 4);
    let mock = Arc::new(MockConnector::accepting().with_step(2, StoreStep::Hang));

    let report = backend(&mock)
        .dispatch(&objects, &RecordingSink::new(), &CancellationToken::new())
        .await
        .unwrap();

    let outcomes: Vec<TransferOutcome> = report.outcomes.iter().map(|o| o.outcome.clone()).collect();
    assert_eq!(
        outcomes,
        vec![
            TransferOutcome::Accepted,
            TransferOutcome::Rejected("timeout".into()),
            TransferOutcome::Accepted,
            TransferOutcome::Accepted,
        ]
    );
    assert_eq!(mock.store_count(), 4);
    assert_eq!(mock.association_count(), 1);
    assert_eq!(mock.release_count(), 1);
}

#[tokio::test]
async fn test_failure_and_warning_statuses_are_rejected() {
    let staging = TempDir::new().unwrap();
    let objects = staged_objects(staging.path(), 3);
    let mock = Arc::new(
        MockConnector::accepting()
            .with_step(1, StoreStep::Status(0xA700))
            .with_step(3, StoreStep::Status(0xB000)),
    );

    let report = backend(&mock)
        .dispatch(&objects, &RecordingSink::new(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        report.outcomes[0].outcome,
        TransferOutcome::Rejected("status failure (0xA700)".into())
    );
    assert_eq!(report.outcomes[1].outcome, TransferOutcome::Accepted);
    assert_eq!(
        report.outcomes[2].outcome,
        TransferOutcome::Rejected("status warning (0xB000)".into())
    );
    assert_eq!(report.accepted(), 1);
}

#[tokio::test]
async fn test_one_association_with_one_context_per_class() {
    let staging = TempDir::new().unwrap();
    let objects = staged_objects(staging.path(), 5);
    let mock = Arc::new(MockConnector::accepting());

    let report = backend(&mock)
        .dispatch(&objects, &RecordingSink::new(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.accepted(), 5);
    assert_eq!(mock.association_count(), 1);
    let proposed = mock.proposed.lock().unwrap();
    assert_eq!(proposed[0].calling_ae_title, "DICOM_IMPORTER");
    assert_eq!(proposed[0].node.ae_title, "ANY-SCP");
    assert_eq!(proposed[0].contexts.len(), 1);
}

#[tokio::test]
async fn test_objects_sent_in_sequence_order() {
    let staging = TempDir::new().unwrap();
    let mut objects = staged_objects(staging.path(), 3);
    objects.reverse();
    let mock = Arc::new(MockConnector::accepting());

    let report = backend(&mock)
        .dispatch(&objects, &RecordingSink::new(), &CancellationToken::new())
        .await
        .unwrap();

    let sequences: Vec<Option<u32>> = report.outcomes.iter().map(|o| o.sequence).collect();
    assert_eq!(sequences, vec![Some(0), Some(1), Some(2)]);
}

#[tokio::test]
async fn test_lost_association_rejects_the_rest() {
    let staging = TempDir::new().unwrap();
    let objects = staged_objects(staging.path(), 4);
    let mock = Arc::new(MockConnector::accepting().with_step(2, StoreStep::Drop));

    let report = backend(&mock)
        .dispatch(&objects, &RecordingSink::new(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.outcomes.len(), 4);
    assert_eq!(report.accepted(), 1);
    assert_eq!(mock.store_count(), 2);
    assert!(matches!(
        &report.outcomes[3].outcome,
        TransferOutcome::Rejected(reason) if reason.starts_with("association lost")
    ));
    assert_eq!(mock.release_count(), 0);
}

#[tokio::test]
async fn test_unreadable_staged_file_is_rejected_without_store() {
    let staging = TempDir::new().unwrap();
    let objects = staged_objects(staging.path(), 2);
    std::fs::write(&objects[0].staged_path, b"truncated").unwrap();
    let mock = Arc::new(MockConnector::accepting());

    let report = backend(&mock)
        .dispatch(&objects, &RecordingSink::new(), &CancellationToken::new())
        .await
        .unwrap();

    assert!(matches!(report.outcomes[0].outcome, TransferOutcome::Rejected(_)));
    assert_eq!(report.outcomes[1].outcome, TransferOutcome::Accepted);
    assert_eq!(mock.store_count(), 1);
}

#[tokio::test]
async fn test_nothing_to_send_skips_association() {
    let mock = Arc::new(MockConnector::accepting());
    let report = backend(&mock)
        .dispatch(&[], &RecordingSink::new(), &CancellationToken::new())
        .await
        .unwrap();
    assert!(report.outcomes.is_empty());
    assert_eq!(mock.association_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_hanging_negotiation_is_bounded() {
    let staging = TempDir::new().unwrap();
    let objects = staged_objects(staging.path(), 1);
    let mock = Arc::new(MockConnector::hanging());

    let started = tokio::time::Instant::now();
    let result = backend(&mock)
        .dispatch(&objects, &RecordingSink::new(), &CancellationToken::new())
        .await;

    assert!(matches!(
        result,
        Err(TransferError::Association {
            source: DimseError::Timeout(_),
            ..
        })
    ));
    assert!(started.elapsed() >= Duration::from_secs(2));
    assert!(started.elapsed() < Duration::from_secs(3));
    assert_eq!(mock.store_count(), 0);
}
