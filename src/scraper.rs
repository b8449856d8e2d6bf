//! External scraper orchestration. The scraper is a separate executable that
//! receives a JSON job on stdin and prints a JSON array of product records
//! on stdout. This module owns the process plumbing: spawn, feed, watch for
//! stalls, enforce the overall time budget, and parse the output.

use crate::media::MediaStore;
use crate::models::{ProductRecord, ProductSource, Shop, SyncReport};
use crate::olx::client::MarketplaceApi;
use crate::store::Stores;
use serde_json::json;
use std::collections::BTreeSet;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::time::{Instant, timeout};
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct ScrapeJob {
    pub command: String,
    pub args: Vec<String>,
    /// Storefront URL handed to the scraper.
    pub url: String,
    pub max_count: Option<usize>,
    /// Source ids the scraper should not re-visit.
    pub skip_source_ids: BTreeSet<String>,
    /// Overall wall-clock budget.
    pub timeout: Duration,
    /// Maximum silence between output lines before the run is declared dead.
    pub stall_after: Duration,
}

impl ScrapeJob {
    pub fn new(command: &str, url: &str) -> Self {
        Self {
            command: command.to_string(),
            args: Vec::new(),
            url: url.to_string(),
            max_count: None,
            skip_source_ids: BTreeSet::new(),
            timeout: Duration::from_secs(1800),
            stall_after: Duration::from_secs(120),
        }
    }
}

#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("failed to spawn scraper: {0}")]
    Spawn(String),
    #[error("scraper silent for {waited_secs}s after {lines} output lines")]
    Stalled { waited_secs: u64, lines: usize },
    #[error("scraper exceeded the {0}s time budget")]
    TimedOut(u64),
    #[error("scraper exited with status {status}: {stderr}")]
    Failed { status: i32, stderr: String },
    #[error("scraper output is not a product record list: {0}")]
    Malformed(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Runs the scraper to completion and parses its stdout.
pub async fn run_scrape(shop: &Shop, job: &ScrapeJob) -> Result<Vec<ProductRecord>, ScrapeError> {
    let deadline = Instant::now() + job.timeout;
    let mut child = Command::new(&job.command)
        .args(&job.args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|err| ScrapeError::Spawn(err.to_string()))?;

    let config = json!({
        "username": shop.olx_username,
        "password": shop.olx_password,
        "url": job.url,
        "max_count": job.max_count,
        "skip_source_ids": job.skip_source_ids,
    });
    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(config.to_string().as_bytes()).await?;
        // Closing stdin signals the scraper that the job is complete.
        drop(stdin);
    }

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| ScrapeError::Spawn("stdout not captured".to_string()))?;
    let mut lines = BufReader::new(stdout).lines();
    let mut collected = String::new();
    let mut line_count = 0usize;

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            child.kill().await.ok();
            return Err(ScrapeError::TimedOut(job.timeout.as_secs()));
        }
        let wait = job.stall_after.min(remaining);
        match timeout(wait, lines.next_line()).await {
            Ok(Ok(Some(line))) => {
                collected.push_str(&line);
                collected.push('\n');
                line_count += 1;
            }
            Ok(Ok(None)) => break,
            Ok(Err(err)) => {
                child.kill().await.ok();
                return Err(err.into());
            }
            Err(_) => {
                child.kill().await.ok();
                if wait == remaining {
                    return Err(ScrapeError::TimedOut(job.timeout.as_secs()));
                }
                return Err(ScrapeError::Stalled {
                    waited_secs: wait.as_secs(),
                    lines: line_count,
                });
            }
        }
    }

    let remaining = deadline.saturating_duration_since(Instant::now());
    let status = match timeout(remaining, child.wait()).await {
        Ok(result) => result?,
        Err(_) => {
            child.kill().await.ok();
            return Err(ScrapeError::TimedOut(job.timeout.as_secs()));
        }
    };
    if !status.success() {
        let mut stderr = String::new();
        if let Some(mut pipe) = child.stderr.take() {
            pipe.read_to_string(&mut stderr).await.ok();
        }
        return Err(ScrapeError::Failed {
            status: status.code().unwrap_or(-1),
            stderr: stderr.trim().to_string(),
        });
    }

    let records: Vec<ProductRecord> = serde_json::from_str(collected.trim())
        .map_err(|err| ScrapeError::Malformed(err.to_string()))?;
    info!(
        target = "olx.scraper",
        shop = %shop.name,
        records = records.len(),
        "scrape_finished"
    );
    Ok(records)
}

/// Scrapes and feeds the records straight into the importer. A scrape
/// failure yields a report with one failure rather than an error, so
/// scheduled runs degrade the same way other batches do.
pub async fn scrape_and_import(
    api: &dyn MarketplaceApi,
    stores: &Stores,
    media: &dyn MediaStore,
    shop: &Shop,
    job: &ScrapeJob,
) -> SyncReport {
    match run_scrape(shop, job).await {
        Ok(records) => {
            crate::import::import_records(api, stores, media, shop, ProductSource::Scraper, records)
                .await
        }
        Err(err) => {
            warn!(target = "olx.scraper", shop = %shop.name, error = %err, "scrape_failed");
            let mut report = SyncReport::default();
            report.record_failure(format!("scrape: {err}"));
            report
        }
    }
}
