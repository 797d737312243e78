//! Batch ingestion shared by both transports.
//!
//! Transport adapters turn a request into an ordered list of `(original name, payload)` pairs,
//! where each payload is a future resolving to the decoded bytes or a per-file failure.
//! [`ingest_batch`] drives those through a [`FileStore`] with bounded concurrency and returns one
//! [`FileReport`] per input, in submission order. [`UploadResult::from_reports`] then splits the
//! reports into stored and failed files for the response.
//!
//! Per-file failures never abort the batch; only request-level [`crate::errors::Error`]s do, and
//! those are raised by the adapters before anything reaches this module.

pub mod decode;

use std::future::Future;

use bytes::Bytes;
use futures::{StreamExt, stream};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};
use utoipa::ToSchema;

use crate::storage::{FileStore, StorageError, StoredFile};

/// Which adapter a batch came through. Used for messages, logs and metric labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Form,
    Structured,
}

impl Transport {
    pub fn as_str(&self) -> &'static str {
        match self {
            Transport::Form => "form",
            Transport::Structured => "structured",
        }
    }
}

/// Why a single file was not stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Payload was not valid base64
    InvalidEncoding,
    /// File exceeded the per-file size limit
    PayloadTooLarge,
    /// Declared size disagreed with the decoded size (only when rejection is enabled)
    SizeMismatch,
    /// Name rejected or the write failed
    StorageError,
    /// Anything unanticipated
    InternalError,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::InvalidEncoding => "invalid_encoding",
            FailureKind::PayloadTooLarge => "payload_too_large",
            FailureKind::SizeMismatch => "size_mismatch",
            FailureKind::StorageError => "storage_error",
            FailureKind::InternalError => "internal_error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileFailure {
    pub kind: FailureKind,
    /// User-safe description
    pub message: String,
}

impl FileFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<StorageError> for FileFailure {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::InvalidName { .. } => FileFailure::new(FailureKind::StorageError, err.to_string()),
            // I/O details stay in the logs
            StorageError::Io(_) => FileFailure::new(FailureKind::StorageError, "Failed to store file"),
        }
    }
}

/// Outcome for one submitted file.
#[derive(Debug, Clone)]
pub struct FileReport {
    pub original_name: String,
    /// Client-asserted size, echoed only
    pub declared_size: Option<u64>,
    pub outcome: Result<StoredFile, FileFailure>,
}

/// One file waiting to be ingested.
pub struct PendingFile<F> {
    pub original_name: String,
    pub declared_size: Option<u64>,
    pub payload: F,
}

impl<F> PendingFile<F> {
    pub fn new(original_name: impl Into<String>, payload: F) -> Self {
        Self {
            original_name: original_name.into(),
            declared_size: None,
            payload,
        }
    }

    pub fn with_declared_size(mut self, declared_size: Option<u64>) -> Self {
        self.declared_size = declared_size;
        self
    }
}

/// Resolve and store each pending file, at most `concurrency` at a time.
///
/// Reports come back in submission order regardless of completion order. All work runs on the
/// calling task, so dropping the returned future (client disconnect) abandons every in-flight
/// write.
pub async fn ingest_batch<F>(
    store: &dyn FileStore,
    transport: Transport,
    files: Vec<PendingFile<F>>,
    concurrency: usize,
) -> Vec<FileReport>
where
    F: Future<Output = Result<Bytes, FileFailure>>,
{
    stream::iter(files.into_iter().map(|pending| async move {
        let outcome = match pending.payload.await {
            Ok(bytes) => store.store(&pending.original_name, bytes).await.map_err(|e| {
                error!(
                    transport = transport.as_str(),
                    original_name = %pending.original_name,
                    error = %e,
                    "Failed to store file"
                );
                FileFailure::from(e)
            }),
            Err(failure) => {
                warn!(
                    transport = transport.as_str(),
                    original_name = %pending.original_name,
                    kind = failure.kind.as_str(),
                    "Rejected file: {}",
                    failure.message
                );
                Err(failure)
            }
        };

        let outcome_label = match &outcome {
            Ok(_) => "stored",
            Err(failure) => failure.kind.as_str(),
        };
        metrics::counter!("intake_files_total", "transport" => transport.as_str(), "outcome" => outcome_label).increment(1);

        FileReport {
            original_name: pending.original_name,
            declared_size: pending.declared_size,
            outcome,
        }
    }))
    .buffered(concurrency.max(1))
    .collect()
    .await
}

/// Uploader metadata carried through the structured transport unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Uploader {
    pub name: String,
    pub email: String,
}

/// A stored file together with what the client claimed about it.
#[derive(Debug, Clone)]
pub struct StoredEntry {
    pub file: StoredFile,
    pub declared_size: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct FailedEntry {
    pub original_name: String,
    pub failure: FileFailure,
}

/// Per-request result, split into successes and failures, both in submission order.
#[derive(Debug, Clone)]
pub struct UploadResult {
    pub stored: Vec<StoredEntry>,
    pub failed: Vec<FailedEntry>,
    pub uploader: Option<Uploader>,
}

impl UploadResult {
    pub fn from_reports(reports: Vec<FileReport>, uploader: Option<Uploader>) -> Self {
        let mut stored = Vec::new();
        let mut failed = Vec::new();

        for report in reports {
            match report.outcome {
                Ok(file) => stored.push(StoredEntry {
                    file,
                    declared_size: report.declared_size,
                }),
                Err(failure) => failed.push(FailedEntry {
                    original_name: report.original_name,
                    failure,
                }),
            }
        }

        Self { stored, failed, uploader }
    }

    pub fn total(&self) -> usize {
        self.stored.len() + self.failed.len()
    }
}
