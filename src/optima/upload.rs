use super::client::{BillUploadApi, Operation, StartOutcome};
use super::OptimaError;
use crate::inventory::FileInventory;
use crate::output::validate_gzip;
use crate::window::{days_in_month, InvoiceWindow};
use md5::{Digest, Md5};
use regex::Regex;
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("Optima request failed: {0}")]
    Optima(#[from] OptimaError),

    #[error("start rejected with HTTP {status}: {message}")]
    StartRejected { status: u16, message: String },

    #[error("conflict response does not name the open bill upload: {body}")]
    ConflictIdMissing { body: String },

    #[error("gave up after aborting {attempts} conflicting bill uploads")]
    TooManyConflicts { attempts: u32 },

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path} is not a valid gzip file: {source}")]
    InvalidGzip {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("MD5 mismatch for {path}: local {local}, remote {remote}")]
    Md5Mismatch {
        path: PathBuf,
        local: String,
        remote: String,
    },
}

pub type Result<T> = std::result::Result<T, UploadError>;

/// How a month's bill upload ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonthOutcome {
    Committed { files: usize },
    /// Not attempted; not a failure
    Skipped { reason: String },
    /// A file failed and the bill upload was aborted
    Aborted { reason: String },
    /// Start, commit or abort failed
    Failed { reason: String },
}

impl MonthOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, MonthOutcome::Aborted { .. } | MonthOutcome::Failed { .. })
    }
}

impl fmt::Display for MonthOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MonthOutcome::Committed { files } => write!(f, "committed ({} files)", files),
            MonthOutcome::Skipped { reason } => write!(f, "skipped ({})", reason),
            MonthOutcome::Aborted { reason } => write!(f, "aborted ({})", reason),
            MonthOutcome::Failed { reason } => write!(f, "failed ({})", reason),
        }
    }
}

#[derive(Debug, Default)]
pub struct UploadReport {
    pub months: Vec<(String, MonthOutcome)>,
}

impl UploadReport {
    pub fn failed(&self) -> bool {
        self.months.iter().any(|(_, o)| o.is_failure())
    }

    pub fn outcome(&self, month: &str) -> Option<&MonthOutcome> {
        self.months.iter().find(|(m, _)| m == month).map(|(_, o)| o)
    }
}

fn conflict_id_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"an existing billUpload \(ID: ([0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12})")
            .expect("static regex")
    })
}

/// Extracts the id of the open bill upload from a 409 response body.
pub fn conflict_upload_id(body: &str) -> Option<&str> {
    conflict_id_regex()
        .captures(body)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

pub fn md5_hex(bytes: &[u8]) -> String {
    format!("{:x}", Md5::digest(bytes))
}

/// Drives one bill upload per invoice month: start, upload every file, then
/// commit, or abort when any file fails.
pub struct UploadManager<'a, A: BillUploadApi> {
    api: &'a A,
    rate_limit_backoff: Duration,
    max_conflict_retries: u32,
}

impl<'a, A: BillUploadApi> UploadManager<'a, A> {
    pub fn new(api: &'a A, rate_limit_backoff: Duration, max_conflict_retries: u32) -> Self {
        Self {
            api,
            rate_limit_backoff,
            max_conflict_retries,
        }
    }

    /// Processes every month of the inventory in ascending order. A month
    /// that is not the current one is only uploaded once every one of its
    /// days has at least one file.
    pub async fn upload_all(&self, inventory: &FileInventory, window: &InvoiceWindow) -> UploadReport {
        let mut report = UploadReport::default();

        for (month, files) in inventory.months() {
            let outcome = match gate(month, files, inventory, window) {
                Some(reason) => {
                    info!(month = %month, reason = %reason, "Skipping month");
                    MonthOutcome::Skipped { reason }
                }
                None => self.upload_month(month, files).await,
            };

            if outcome.is_failure() {
                error!(month = %month, outcome = %outcome, "Bill upload failed");
            } else {
                info!(month = %month, outcome = %outcome, "Bill upload finished");
            }
            report.months.push((month.to_string(), outcome));
        }

        report
    }

    pub async fn upload_month(&self, month: &str, files: &BTreeSet<PathBuf>) -> MonthOutcome {
        let upload_id = match self.start(month).await {
            Ok(id) => id,
            Err(e) => return MonthOutcome::Failed { reason: e.to_string() },
        };
        info!(month = %month, upload_id = %upload_id, files = files.len(), "Started bill upload");

        match self.upload_files(&upload_id, files).await {
            Ok(count) => match self.api.operation(&upload_id, Operation::Commit).await {
                Ok(()) => {
                    info!(month = %month, upload_id = %upload_id, "Committed bill upload");
                    MonthOutcome::Committed { files: count }
                }
                Err(e) => MonthOutcome::Failed {
                    reason: format!("commit failed: {}", e),
                },
            },
            Err(e) => {
                warn!(month = %month, upload_id = %upload_id, error = %e, "Aborting bill upload");
                match self.api.operation(&upload_id, Operation::Abort).await {
                    Ok(()) => MonthOutcome::Aborted { reason: e.to_string() },
                    Err(abort_err) => MonthOutcome::Failed {
                        reason: format!("{}; abort failed: {}", e, abort_err),
                    },
                }
            }
        }
    }

    /// Starts a bill upload, waiting out rate limits and aborting a bill
    /// upload left open by an earlier run.
    async fn start(&self, month: &str) -> Result<String> {
        let mut conflicts = 0u32;

        loop {
            match self.api.start(month).await? {
                StartOutcome::Started(id) => return Ok(id),
                StartOutcome::RateLimited => {
                    warn!(
                        month = %month,
                        backoff = ?self.rate_limit_backoff,
                        "Bill upload start rate limited, retrying"
                    );
                    tokio::time::sleep(self.rate_limit_backoff).await;
                }
                StartOutcome::Conflict(body) => {
                    if conflicts >= self.max_conflict_retries {
                        return Err(UploadError::TooManyConflicts { attempts: conflicts });
                    }
                    conflicts += 1;

                    let stale = conflict_upload_id(&body)
                        .ok_or_else(|| UploadError::ConflictIdMissing { body: body.clone() })?;
                    warn!(month = %month, upload_id = %stale, "Aborting open bill upload");
                    self.api.operation(stale, Operation::Abort).await?;
                }
                StartOutcome::Rejected { status, message } => {
                    return Err(UploadError::StartRejected { status, message });
                }
            }
        }
    }

    async fn upload_files(&self, upload_id: &str, files: &BTreeSet<PathBuf>) -> Result<usize> {
        for path in files {
            self.upload_file(upload_id, path).await?;
        }
        Ok(files.len())
    }

    async fn upload_file(&self, upload_id: &str, path: &Path) -> Result<()> {
        validate_gzip(path).map_err(|source| UploadError::InvalidGzip {
            path: path.to_path_buf(),
            source,
        })?;

        let bytes = tokio::fs::read(path).await.map_err(|source| UploadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let local = md5_hex(&bytes);
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let response = self.api.upload_file(upload_id, &name, bytes).await?;
        if !response.md5.eq_ignore_ascii_case(&local) {
            return Err(UploadError::Md5Mismatch {
                path: path.to_path_buf(),
                local,
                remote: response.md5,
            });
        }

        info!(path = %path.display(), md5 = %local, "Uploaded file");
        Ok(())
    }
}

/// Returns why a month must be skipped, if it must.
fn gate(month: &str, files: &BTreeSet<PathBuf>, inventory: &FileInventory, window: &InvoiceWindow) -> Option<String> {
    if files.is_empty() {
        return Some("no files".to_string());
    }
    if window.is_current_month(month) {
        return None;
    }

    let have = inventory.distinct_days(month);
    match days_in_month(month) {
        Some(expected) if have == expected as usize => None,
        Some(expected) => Some(format!("{} of {} days have files", have, expected)),
        None => Some("invalid month".to_string()),
    }
}
