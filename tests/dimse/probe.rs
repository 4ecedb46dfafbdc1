#[path = "../common/mod.rs"]
mod common;

use std::net::TcpListener;
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};

use dicom_dictionary_std::uids;
use dicom_ul::association::server::ServerAssociationOptions;

use dicom_importer::{PacsConfig, Prober, TransferError};
use dimse::{Connector, DimseError};

use common::MockConnector;

fn pacs(port: u16) -> PacsConfig {
    PacsConfig::new("DICOM_IMPORTER", "ANY-SCP", "127.0.0.1", port)
        .with_connect_timeout(Duration::from_secs(3))
        .with_store_timeout(Duration::from_secs(3))
}

fn prober(mock: &Arc<MockConnector>) -> Prober {
    let connector: Arc<dyn Connector> = mock.clone();
    Prober::new(connector)
}

#[tokio::test]
async fn test_successful_echo() {
    let mock = Arc::new(MockConnector::accepting());
    assert!(prober(&mock).probe(&pacs(11112)).await.unwrap());
    assert_eq!(mock.release_count(), 1);

    let proposed = mock.proposed.lock().unwrap();
    assert_eq!(proposed[0].contexts.len(), 1);
    assert_eq!(proposed[0].contexts[0].abstract_syntax, "1.2.840.10008.1.1");
}

#[tokio::test]
async fn test_failure_status_reports_false() {
    let mock = Arc::new(MockConnector {
        echo_status: 0x0110,
        ..Default::default()
    });
    assert!(!prober(&mock).probe(&pacs(11112)).await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_unanswered_negotiation_times_out() {
    let mock = Arc::new(MockConnector::hanging());
    let started = tokio::time::Instant::now();

    let result = prober(&mock).probe(&pacs(11112)).await;
    assert!(matches!(
        result,
        Err(TransferError::Association {
            source: DimseError::Timeout(_),
            ..
        })
    ));
    assert!(started.elapsed() < Duration::from_secs(4));
}

#[tokio::test(start_paused = true)]
async fn test_rejections_are_retried_with_backoff() {
    let mock = Arc::new(MockConnector::rejecting());
    let started = tokio::time::Instant::now();

    let result = prober(&mock).with_retries(2).probe(&pacs(11112)).await;
    assert!(matches!(result, Err(TransferError::Association { .. })));
    assert_eq!(mock.association_count(), 3);
    // 2s + 4s of backoff
    assert!(started.elapsed() >= Duration::from_secs(6));
}

#[tokio::test]
async fn test_invalid_config_is_rejected_before_connecting() {
    let mock = Arc::new(MockConnector::accepting());
    let mut config = pacs(11112);
    config.host = String::new();

    let result = prober(&mock).probe(&config).await;
    assert!(matches!(result, Err(TransferError::Config(_))));
    assert_eq!(mock.association_count(), 0);
}

#[tokio::test]
async fn test_unreachable_host_fails_within_timeout() {
    // bind then drop to find a port nothing listens on
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let config = pacs(port);

    let started = Instant::now();
    let result = Prober::new(config.connector()).probe(&config).await;
    assert!(matches!(result, Err(TransferError::Association { .. })));
    assert!(started.elapsed() < Duration::from_secs(4));
}

#[tokio::test]
async fn test_silent_peer_echo_times_out() {
    // a real acceptor that negotiates, then never answers the C-ECHO
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let (done_tx, done_rx) = mpsc::channel::<()>();
    let peer = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let association = ServerAssociationOptions::new()
            .accept_any()
            .with_abstract_syntax(uids::VERIFICATION)
            .establish(stream)
            .unwrap();
        let _ = done_rx.recv_timeout(Duration::from_secs(30));
        drop(association);
    });

    let config = PacsConfig::new("DICOM_IMPORTER", "ANY-SCP", "127.0.0.1", port)
        .with_connect_timeout(Duration::from_secs(2))
        .with_store_timeout(Duration::from_secs(2));

    let started = Instant::now();
    let result = Prober::new(config.connector()).probe(&config).await;
    let elapsed = started.elapsed();

    assert!(matches!(
        result,
        Err(TransferError::Timeout {
            operation: "C-ECHO",
            ..
        })
    ));
    assert!(elapsed >= Duration::from_secs(2));
    assert!(elapsed < Duration::from_secs(5), "took {:?}", elapsed);

    done_tx.send(()).unwrap();
    peer.join().unwrap();
}
