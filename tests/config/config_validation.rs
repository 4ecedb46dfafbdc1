use dicom_importer::config::{Config, ConfigError};
use dicom_importer::{DestinationConfig, PacsConfig};
use tempfile::TempDir;

fn write_config(dir: &TempDir, contents: &str) -> std::path::PathBuf {
    let path = dir.path().join("importer.toml");
    std::fs::write(&path, contents).unwrap();
    path
}

#[test]
fn test_load_from_file() {
    let dir = TempDir::new().unwrap();
    let path = write_config(
        &dir,
        r#"
        [staging]
        root = "/tmp/importer-staging"

        [pacs]
        remote_ae_title = "ORTHANC"
        host = "192.168.1.20"
        port = 4242
        store_timeout_ms = 10000
        "#,
    );

    let config = Config::from_file(&path).expect("config loads");
    assert_eq!(config.pacs.remote_ae_title, "ORTHANC");
    assert_eq!(config.pacs.local_ae_title, "DICOM_IMPORTER");
    assert_eq!(config.pacs.store_timeout().as_secs(), 10);
    assert_eq!(config.staging.root.to_str(), Some("/tmp/importer-staging"));
}

#[test]
fn test_missing_file() {
    let dir = TempDir::new().unwrap();
    let result = Config::from_file(dir.path().join("absent.toml"));
    assert!(matches!(result, Err(ConfigError::Read { .. })));
}

#[test]
fn test_malformed_toml() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "[pacs\nport = ");
    assert!(matches!(Config::from_file(&path), Err(ConfigError::Parse(_))));
}

#[test]
fn test_out_of_range_port_in_file() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "[pacs]\nport = 70000\n");
    assert!(matches!(Config::from_file(&path), Err(ConfigError::Parse(_))));
}

#[test]
fn test_invalid_pdu_size() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "[pacs]\nmax_pdu = 1024\n");
    assert!(matches!(
        Config::from_file(&path),
        Err(ConfigError::Invalid { field: "pacs.max_pdu", .. })
    ));
}

#[test]
fn test_all_four_pacs_fields_required() {
    for (local, remote, host, port) in [
        ("", "ANY-SCP", "127.0.0.1", "11112"),
        ("DICOM_IMPORTER", "", "127.0.0.1", "11112"),
        ("DICOM_IMPORTER", "ANY-SCP", "", "11112"),
        ("DICOM_IMPORTER", "ANY-SCP", "127.0.0.1", ""),
    ] {
        assert!(
            PacsConfig::parse(local, remote, host, port).is_err(),
            "accepted {:?}",
            (local, remote, host, port)
        );
    }
}

#[test]
fn test_destination_validation() {
    let ok = DestinationConfig::Pacs(PacsConfig::parse("A", "B", "h", "104").unwrap());
    assert!(ok.validate().is_ok());

    let bad = DestinationConfig::Folder {
        path: std::path::PathBuf::new(),
    };
    assert!(bad.validate().is_err());
}
