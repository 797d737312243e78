use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::ingest::{FailureKind, Transport, UploadResult, Uploader};

/// Body of `POST /upload/structured`
#[derive(Debug, Deserialize, Serialize, ToSchema)]
pub struct StructuredUploadRequest {
    pub user: Uploader,
    /// Absent or empty is rejected with "No file uploaded"
    #[serde(default)]
    pub files: Option<Vec<DescribedFile>>,
}

/// One base64-encoded file
#[derive(Debug, Deserialize, Serialize, ToSchema)]
pub struct DescribedFile {
    pub name: String,
    /// Client-declared size in bytes. Echoed back, never trusted.
    #[serde(default)]
    pub size: Option<u64>,
    /// Base64 payload, optionally as a full `data:` URL
    pub base64: String,
    /// Client-declared content type
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

/// Per-batch result returned by both upload endpoints
#[derive(Debug, Deserialize, Serialize, ToSchema)]
pub struct UploadResponse {
    pub message: String,
    /// Uploader metadata, structured transport only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<Uploader>,
    /// Stored files, in submission order
    pub files: Vec<StoredFileResponse>,
    /// Files that could not be stored, in submission order. Omitted when empty.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed: Vec<FailedFileResponse>,
}

#[derive(Debug, Clone, Deserialize, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StoredFileResponse {
    /// Generated storage name
    pub filename: String,
    pub original_name: String,
    /// Bytes actually written
    pub size: u64,
    /// Path the file can be fetched from
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub declared_size: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize, ToSchema)]
pub struct FailedFileResponse {
    /// Original name as submitted
    pub filename: String,
    pub error: FailureKind,
    pub message: String,
}

impl UploadResponse {
    pub fn from_result(transport: Transport, result: UploadResult) -> Self {
        let message = match (result.stored.is_empty(), result.failed.is_empty()) {
            (false, true) => match transport {
                Transport::Form => "Files uploaded successfully",
                Transport::Structured => "File uploaded successfully",
            },
            (false, false) => "Some files could not be uploaded",
            (true, _) => "No files were uploaded",
        };

        Self {
            message: message.to_string(),
            user: result.uploader,
            files: result
                .stored
                .into_iter()
                .map(|entry| StoredFileResponse {
                    filename: entry.file.generated_name,
                    original_name: entry.file.original_name,
                    size: entry.file.byte_size,
                    path: entry.file.relative_path,
                    declared_size: entry.declared_size,
                })
                .collect(),
            failed: result
                .failed
                .into_iter()
                .map(|entry| FailedFileResponse {
                    filename: entry.original_name,
                    error: entry.failure.kind,
                    message: entry.failure.message,
                })
                .collect(),
        }
    }
}
