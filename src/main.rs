use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use dicom_importer::config::Config;
use dicom_importer::info::ObjectSummary;
use dicom_importer::stager::Stager;
use dicom_importer::storage::FilesystemStorage;
use dicom_importer::{
    init_logging, DestinationConfig, JobResult, JobState, PacsConfig, Prober, ProgressEvent,
    ProgressSink, TransferJob, TransferOutcome,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(
    name = "dicom-importer",
    version,
    about = "Stage DICOM objects from slow media and deliver them to a folder or a PACS"
)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Copy every DICOM object under SOURCE into STAGING
    Import { source: PathBuf, staging: PathBuf },
    /// Stage objects from SOURCE and export them into DESTINATION
    ExportFolder {
        source: PathBuf,
        destination: PathBuf,
    },
    /// Stage objects from SOURCE and send them to a PACS with C-STORE
    ExportPacs {
        source: PathBuf,
        host: String,
        port: String,
        ae_title: String,
        client_ae_title: Option<String>,
        /// Per-object store timeout
        #[arg(long)]
        store_timeout_secs: Option<u64>,
    },
    /// Check that a PACS answers C-ECHO
    TestPacs {
        host: String,
        port: String,
        ae_title: String,
        client_ae_title: Option<String>,
        /// Retries on connection failures, with exponential backoff
        #[arg(long, default_value_t = 0)]
        retries: u32,
    },
    /// Print a summary of one DICOM file
    Info {
        file: PathBuf,
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    init_logging(&config.logging)?;

    match cli.cmd {
        Cmd::Import { source, staging } => import(source, staging).await,
        Cmd::ExportFolder {
            source,
            destination,
        } => {
            let destination = DestinationConfig::Folder { path: destination };
            run_job(&config, source, destination).await
        }
        Cmd::ExportPacs {
            source,
            host,
            port,
            ae_title,
            client_ae_title,
            store_timeout_secs,
        } => {
            let mut pacs = pacs_config(&config, &host, &port, &ae_title, client_ae_title)?;
            if let Some(secs) = store_timeout_secs {
                pacs = pacs.with_store_timeout(Duration::from_secs(secs));
            }
            run_job(&config, source, DestinationConfig::Pacs(pacs)).await
        }
        Cmd::TestPacs {
            host,
            port,
            ae_title,
            client_ae_title,
            retries,
        } => {
            let pacs = pacs_config(&config, &host, &port, &ae_title, client_ae_title)?;
            let prober = Prober::new(pacs.connector()).with_retries(retries);
            match prober.probe(&pacs).await {
                Ok(true) => {
                    println!("C-ECHO to {} succeeded", pacs.remote_node().describe());
                    Ok(ExitCode::SUCCESS)
                }
                Ok(false) => {
                    println!("{} answered C-ECHO with a failure status", pacs.remote_node().describe());
                    Ok(ExitCode::FAILURE)
                }
                Err(e) => {
                    eprintln!("Connection test failed: {}", e);
                    Ok(ExitCode::FAILURE)
                }
            }
        }
        Cmd::Info { file, json } => {
            let summary = ObjectSummary::read(&file)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                print!("{}", summary);
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// CLI values first, then the config file for anything not given
fn pacs_config(
    config: &Config,
    host: &str,
    port: &str,
    ae_title: &str,
    client_ae_title: Option<String>,
) -> anyhow::Result<PacsConfig> {
    let local = client_ae_title.unwrap_or_else(|| config.pacs.local_ae_title.clone());
    let mut pacs = PacsConfig::parse(&local, ae_title, host, port)?;
    pacs.connect_timeout_ms = config.pacs.connect_timeout_ms;
    pacs.store_timeout_ms = config.pacs.store_timeout_ms;
    pacs.max_pdu = config.pacs.max_pdu;
    Ok(pacs)
}

async fn import(source: PathBuf, staging: PathBuf) -> anyhow::Result<ExitCode> {
    let (tx, mut rx) = mpsc::unbounded_channel::<ProgressEvent>();
    let cancel = CancellationToken::new();
    let stage_cancel = cancel.clone();
    let stager = Stager::new(staging);

    let task = tokio::task::spawn_blocking(move || {
        let sink: &dyn ProgressSink = &tx;
        stager.stage(&source, sink, &stage_cancel)
    });

    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Some(event) => render(&event),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                eprintln!("Cancelling...");
                cancel.cancel();
            }
        }
    }

    let report = task.await??;
    println!(
        "Found {} files, staged {}, not DICOM {}, skipped {}",
        report.counts.found, report.counts.staged, report.counts.not_dicom, report.counts.skipped
    );
    for skipped in &report.skipped {
        println!("  {}: {}", skipped.source.display(), skipped.outcome);
    }
    Ok(if report.cancelled || report.counts.skipped > 0 {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

async fn run_job(
    config: &Config,
    source: PathBuf,
    destination: DestinationConfig,
) -> anyhow::Result<ExitCode> {
    let storage = FilesystemStorage::new(&config.staging.root)?;
    let mut handle = TransferJob::new(source, destination, storage).spawn();

    loop {
        tokio::select! {
            event = handle.next_event() => match event {
                Some(event) => render(&event),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                eprintln!("Cancelling after the current object...");
                handle.cancel();
            }
        }
    }

    let result = handle.wait().await?;
    print_summary(&result);
    Ok(match result.final_state {
        JobState::Done if result.files_failed == 0 => ExitCode::SUCCESS,
        JobState::Done => ExitCode::from(2),
        _ => ExitCode::FAILURE,
    })
}

fn render(event: &ProgressEvent) {
    let file = event.current_file.as_deref().unwrap_or("");
    match (event.phase, event.total) {
        (JobState::Scanning, _) => {
            println!("[scanning] {} found, {} staged  {}", event.found, event.completed, file)
        }
        (JobState::Dispatching, Some(total)) => {
            println!("[exporting] {}/{}  {}", event.completed, total, file)
        }
        (phase, _) => println!("[{}]", phase),
    }
}

fn print_summary(result: &JobResult) {
    println!();
    println!("Job {} {}", result.job_id, result.final_state);
    println!("  Destination: {}", result.destination);
    println!("  Found:       {}", result.files_found);
    println!("  Staged:      {}", result.files_staged);
    println!("  Dispatched:  {}", result.files_dispatched);
    println!("  Failed:      {}", result.files_failed);
    if let Some(failure) = &result.failure {
        println!("  Error while {}: {}", failure.phase, failure.message);
    }
    for outcome in result
        .outcomes
        .iter()
        .filter(|o| !matches!(o.outcome, TransferOutcome::Accepted))
    {
        println!("  {}: {}", outcome.source.display(), outcome.outcome);
    }
}
