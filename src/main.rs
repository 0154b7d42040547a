// =============================================================================
// main.rs — FINGERPRINTS, THE BATCH EDITION
// =============================================================================
//
// Reads insert requests as JSON lines, one per line:
//
//   {"userID":"user_0","ipAddress":"64.233.191.255","userAgent":"...","acceptLanguage":"en-US"}
//
// from FINGERPRINTS_INPUT (or stdin), records them, then prints every
// fingerprint shared by two or more users as a JSON array on stdout.
// Ctrl+C stops ingestion or the scan wherever it is.
// =============================================================================

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use fingerprints::{into_groups, Config, Controller, DuplicateGroup, FingerprintError, Identifiers};

/// One line of input.
#[derive(Debug, Deserialize)]
struct InsertRequest {
    #[serde(rename = "userID")]
    user_id: String,
    #[serde(flatten)]
    identifiers: Identifiers,
}

#[derive(Debug, Default)]
struct IngestTally {
    lines: u64,
    inserted: u64,
    skipped: u64,
    rejected: u64,
    malformed: u64,
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_filter));

    // Logs go to stderr; stdout carries the report
    if config.log_json {
        fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(io::stderr)
            .with_target(true)
            .init();
    } else {
        fmt()
            .with_env_filter(filter)
            .with_writer(io::stderr)
            .with_target(true)
            .with_thread_names(true)
            .init();
    }
}

fn open_input(path: Option<&Path>) -> Result<Box<dyn BufRead>> {
    Ok(match path {
        Some(path) => Box::new(BufReader::new(
            File::open(path).with_context(|| format!("opening input {}", path.display()))?,
        )),
        None => Box::new(BufReader::new(io::stdin())),
    })
}

fn ingest(
    controller: &Controller,
    input: Box<dyn BufRead>,
    shutdown: &watch::Receiver<bool>,
) -> Result<IngestTally> {
    let mut tally = IngestTally::default();

    for (n, line) in input.lines().enumerate() {
        if *shutdown.borrow() {
            warn!(lines = tally.lines, "Shutdown during ingestion — stopping early");
            break;
        }

        let line = line.context("reading input")?;
        if line.trim().is_empty() {
            continue;
        }
        tally.lines += 1;

        let request: InsertRequest = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(err) => {
                tally.malformed += 1;
                warn!(line = n + 1, error = %err, "Malformed input line skipped");
                continue;
            }
        };

        match controller.insert(&request.user_id, request.identifiers) {
            Ok(true) => tally.inserted += 1,
            Ok(false) => tally.skipped += 1,
            Err(FingerprintError::Validation(_)) => tally.rejected += 1,
            Err(err) => return Err(err).context("recording fingerprint"),
        }
    }

    Ok(tally)
}

/// Ingest, scan, then close the store no matter how the first two went, so
/// the snapshot keeps whatever was recorded before a failure or Ctrl+C.
///
/// `Ok(None)` means the scan was cancelled and there is no report.
fn run(
    controller: &Controller,
    input: Box<dyn BufRead>,
    shutdown: &watch::Receiver<bool>,
) -> Result<Option<Vec<DuplicateGroup>>> {
    let outcome = ingest_and_scan(controller, input, shutdown);
    let closed = controller.close().context("closing fingerprint store");

    let groups = outcome?;
    closed?;
    Ok(groups)
}

fn ingest_and_scan(
    controller: &Controller,
    input: Box<dyn BufRead>,
    shutdown: &watch::Receiver<bool>,
) -> Result<Option<Vec<DuplicateGroup>>> {
    let tally = ingest(controller, input, shutdown)?;
    info!(
        lines = tally.lines,
        inserted = tally.inserted,
        skipped = tally.skipped,
        rejected = tally.rejected,
        malformed = tally.malformed,
        "Ingestion finished"
    );

    match controller.get_duplicates_until(shutdown) {
        Ok(duplicates) => Ok(Some(into_groups(duplicates))),
        Err(FingerprintError::Cancelled { scanned }) => {
            warn!(scanned, "Shutdown before the scan finished — no report");
            Ok(None)
        }
        Err(err) => Err(err).context("scanning for duplicates"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env();
    init_tracing(&config);

    info!(
        snapshot = ?config.snapshot_path,
        input = ?config.input_path,
        "Fingerprints starting"
    );

    let controller = Arc::new(Controller::open(&config).context("opening fingerprint store")?);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => warn!("Shutdown signal received"),
            Err(err) => error!(error = %err, "Signal listener error"),
        }
        let _ = shutdown_tx.send(true);
    });

    let worker = Arc::clone(&controller);
    let input_path = config.input_path.clone();
    let report = tokio::task::spawn_blocking(move || -> Result<_> {
        let input = open_input(input_path.as_deref())?;
        run(&worker, input, &shutdown_rx)
    })
    .await
    .context("worker task failed")??;

    let stats = controller.stats();
    match report {
        Some(groups) => {
            println!("{}", serde_json::to_string_pretty(&groups)?);
            info!(
                inserted = stats.entries_inserted,
                skipped = stats.duplicates_skipped,
                races = stats.races_caught,
                groups = groups.len(),
                "Done"
            );
        }
        None => info!(
            inserted = stats.entries_inserted,
            skipped = stats.duplicates_skipped,
            "Stopped early"
        ),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use fingerprints::{MemoryStore, Relationship};
    use std::io::Cursor;
    use std::path::PathBuf;

    const UA: &str = "Mozilla/5.0 (X11; Linux x86_64) Gecko/20100101 Firefox/121.0";

    fn snapshot_path(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "fingerprints-cli-{}-{}-{}.json",
            tag,
            std::process::id(),
            Utc::now().timestamp_nanos_opt().unwrap_or_default()
        ))
    }

    fn controller_at(path: &Path) -> Controller {
        Controller::open(&Config {
            snapshot_path: Some(path.to_path_buf()),
            ..Config::default()
        })
        .unwrap()
    }

    fn input(text: &str) -> Box<dyn BufRead> {
        Box::new(Cursor::new(text.as_bytes().to_vec()))
    }

    fn line(user: &str) -> String {
        format!(
            r#"{{"userID":"{user}","ipAddress":"10.0.0.1","userAgent":"{UA}","acceptLanguage":"en"}}"#
        )
    }

    #[test]
    fn test_run_reports_duplicates_and_saves() {
        let path = snapshot_path("report");
        let c = controller_at(&path);
        let (_tx, rx) = watch::channel(false);

        let text = format!("{}\n\nnot json\n{}\n", line("user_0"), line("user_1"));
        let groups = run(&c, input(&text), &rx).unwrap().unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].users.len(), 2);

        let saved = MemoryStore::open(&Relationship::ALL, &path).unwrap();
        assert_eq!(saved.len(), 2);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_shutdown_still_saves_the_snapshot() {
        let path = snapshot_path("shutdown");
        let c = controller_at(&path);
        c.insert("user_0", Identifiers::new("10.0.0.1", UA, "en")).unwrap();

        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();

        // Ingestion stops at once and the scan is cancelled, which is not a failure
        let report = run(&c, input(&line("user_1")), &rx).unwrap();
        assert!(report.is_none());

        let saved = MemoryStore::open(&Relationship::ALL, &path).unwrap();
        assert_eq!(saved.len(), 1);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_ingest_failure_still_saves_the_snapshot() {
        let path = snapshot_path("failure");
        let c = controller_at(&path);
        let (_tx, rx) = watch::channel(false);

        // A valid line, then bytes that are not UTF-8
        let mut bytes = format!("{}\n", line("user_0")).into_bytes();
        bytes.extend_from_slice(&[0xff, 0xfe, b'\n']);
        assert!(run(&c, Box::new(Cursor::new(bytes)), &rx).is_err());

        let saved = MemoryStore::open(&Relationship::ALL, &path).unwrap();
        assert_eq!(saved.len(), 1);
        let _ = std::fs::remove_file(&path);
    }
}
