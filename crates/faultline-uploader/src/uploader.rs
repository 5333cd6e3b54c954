//! Minidump discovery and upload
//!
//! Per-dump state machine: `discovered → known (queued) → uploaded
//! (deleted)`, or `discovered → evicted (deleted)` for dumps past
//! retention. The known-set is the sole reentrancy guard: scanning and
//! known-set mutation happen on one logical timeline (`&mut self`),
//! never concurrently.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use faultline_core::config::CollectorConfig;
use faultline_core::Event;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::layout::{looks_like_minidump, DumpLayout};

/// Form field carrying the raw dump bytes
const DUMP_FIELD: &str = "upload_file_minidump";

/// Form field carrying the JSON sidecar event
const SIDECAR_FIELD: &str = "sentry";

/// Errors from a single upload attempt
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Failed to serialize sidecar event: {0}")]
    Sidecar(#[from] serde_json::Error),

    #[error("Collector rejected upload with status {0}")]
    Rejected(reqwest::StatusCode),

    #[error("Collector rate limited the upload")]
    RateLimited { retry_after: Option<Duration> },
}

/// A dump file queued for upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MinidumpDescriptor {
    /// Absolute path of the dump file
    pub path: PathBuf,
    /// When discovery first saw the file
    pub discovered_at: DateTime<Utc>,
    /// File creation time (mtime proxies creation time; birth time is
    /// unavailable on some Linux filesystems)
    pub created_at: DateTime<Utc>,
}

/// Discovers, dedupes, age-evicts, and uploads crash dumps.
pub struct MinidumpUploader {
    client: reqwest::Client,
    endpoint: String,
    crashes_dir: PathBuf,
    layout: DumpLayout,
    retention: Duration,
    /// Uploads still allowed this session
    remaining: u32,
    /// Paths queued or in flight; a dump is never rediscovered while
    /// it is in here
    known: HashSet<PathBuf>,
    pending: Vec<MinidumpDescriptor>,
    /// Set while the collector's rate limit is in effect
    retry_gate: Option<tokio::time::Instant>,
}

impl MinidumpUploader {
    /// Creates an uploader using the layout of the current host OS.
    pub fn new(
        collector: &CollectorConfig,
        crashes_dir: PathBuf,
        retention_days: u32,
        max_per_session: u32,
    ) -> Self {
        Self::with_layout(
            collector,
            crashes_dir,
            retention_days,
            max_per_session,
            DumpLayout::for_host_os(),
        )
    }

    /// Creates an uploader with an explicit layout.
    pub fn with_layout(
        collector: &CollectorConfig,
        crashes_dir: PathBuf,
        retention_days: u32,
        max_per_session: u32,
        layout: DumpLayout,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: collector.minidump_url(),
            crashes_dir,
            layout,
            retention: Duration::from_secs(u64::from(retention_days) * 24 * 3600),
            remaining: max_per_session,
            known: HashSet::new(),
            pending: Vec::new(),
            retry_gate: None,
        }
    }

    /// Scans the crash directory and queues unseen dumps for upload.
    ///
    /// Dumps older than retention are deleted immediately without ever
    /// entering the known-set. Returns the newly queued descriptors.
    pub async fn discover_new(&mut self) -> Vec<MinidumpDescriptor> {
        let paths = self.layout.scan(&self.crashes_dir).await;
        debug!(count = paths.len(), "Scanned crash directory");

        let now = SystemTime::now();
        let mut fresh = Vec::new();

        for path in paths {
            if self.known.contains(&path) {
                continue;
            }

            let Ok(metadata) = tokio::fs::metadata(&path).await else {
                continue;
            };
            let created = metadata.modified().unwrap_or(now);
            let age = now.duration_since(created).unwrap_or_default();

            if age > self.retention {
                info!(
                    path = %path.display(),
                    age_days = age.as_secs() / 86_400,
                    "Evicting dump past retention"
                );
                if let Err(e) = tokio::fs::remove_file(&path).await {
                    warn!(path = %path.display(), error = %e, "Could not delete stale dump");
                }
                continue;
            }

            self.known.insert(path.clone());
            let descriptor = MinidumpDescriptor {
                path,
                discovered_at: Utc::now(),
                created_at: DateTime::<Utc>::from(created),
            };
            info!(path = %descriptor.path.display(), "Queued minidump for upload");
            self.pending.push(descriptor.clone());
            fresh.push(descriptor);
        }

        fresh
    }

    /// Attempts to upload every queued dump, enriched with `event`.
    ///
    /// The enriching event is the merged breadcrumbs/context captured
    /// at discovery time: the crash that produced a dump predates this
    /// process's knowledge of its own state. Transient failures leave
    /// the dump queued for the next poll. Returns the number of dumps
    /// delivered.
    pub async fn upload_pending(&mut self, event: &Event) -> usize {
        if let Some(gate) = self.retry_gate {
            if tokio::time::Instant::now() < gate {
                debug!("Skipping upload attempts while rate limited");
                return 0;
            }
            self.retry_gate = None;
        }

        let queued: Vec<_> = self.pending.drain(..).collect();
        let mut retained = Vec::new();
        let mut uploaded = 0;
        let mut gated = false;

        for dump in queued {
            if gated {
                retained.push(dump);
                continue;
            }

            if self.remaining == 0 {
                info!(path = %dump.path.display(), "Session upload limit reached, deleting dump");
                self.delete_and_forget(&dump.path).await;
                continue;
            }

            let bytes = match tokio::fs::read(&dump.path).await {
                Ok(bytes) => self.layout.pre_process(bytes),
                Err(e) => {
                    warn!(path = %dump.path.display(), error = %e, "Dump vanished before upload");
                    self.known.remove(&dump.path);
                    continue;
                }
            };

            if !looks_like_minidump(&bytes) {
                warn!(path = %dump.path.display(), "Dropping dump that appears invalid");
                self.delete_and_forget(&dump.path).await;
                continue;
            }

            match self.send(&dump, bytes, event).await {
                Ok(()) => {
                    info!(path = %dump.path.display(), "Uploaded minidump");
                    self.remaining -= 1;
                    uploaded += 1;
                    self.delete_and_forget(&dump.path).await;
                }
                Err(UploadError::RateLimited { retry_after }) => {
                    let delay = retry_after.unwrap_or(Duration::from_secs(60));
                    warn!(delay_secs = delay.as_secs(), "Collector rate limited uploads");
                    self.retry_gate = Some(tokio::time::Instant::now() + delay);
                    retained.push(dump);
                    gated = true;
                }
                Err(e) => {
                    warn!(path = %dump.path.display(), error = %e, "Upload failed, will retry next poll");
                    retained.push(dump);
                }
            }
        }

        self.pending = retained;
        uploaded
    }

    /// One discovery-and-upload cycle.
    pub async fn poll(&mut self, event: &Event) -> usize {
        self.discover_new().await;
        self.upload_pending(event).await
    }

    /// Number of dumps queued for upload.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Uploads still allowed this session.
    pub fn remaining_this_session(&self) -> u32 {
        self.remaining
    }

    async fn send(
        &self,
        dump: &MinidumpDescriptor,
        bytes: Vec<u8>,
        event: &Event,
    ) -> Result<(), UploadError> {
        let filename = dump
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "minidump.dmp".to_string());

        let sidecar = serde_json::to_string(event)?;
        let form = reqwest::multipart::Form::new()
            .part(
                DUMP_FIELD,
                reqwest::multipart::Part::bytes(bytes)
                    .file_name(filename)
                    .mime_str("application/octet-stream")?,
            )
            .text(SIDECAR_FIELD, sidecar);

        let response = self.client.post(&self.endpoint).multipart(form).send().await?;
        let status = response.status();

        if status.is_success() {
            Ok(())
        } else if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs);
            Err(UploadError::RateLimited { retry_after })
        } else {
            Err(UploadError::Rejected(status))
        }
    }

    async fn delete_and_forget(&mut self, path: &PathBuf) {
        if let Err(e) = tokio::fs::remove_file(path).await {
            warn!(path = %path.display(), error = %e, "Could not delete dump");
        }
        self.known.remove(path);
    }
}
