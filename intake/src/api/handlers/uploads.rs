use std::future::ready;

use axum::{
    Json,
    extract::{
        State,
        multipart::{Field, Multipart, MultipartError, MultipartRejection},
        rejection::JsonRejection,
    },
    http::StatusCode,
};
use bytes::{Bytes, BytesMut};
use tracing::{debug, error, instrument, warn};

use crate::{
    AppState,
    api::models::uploads::{DescribedFile, StructuredUploadRequest, UploadResponse},
    errors::{Error, ErrorResponse, Result},
    ingest::{
        FailureKind, FileFailure, PendingFile, Transport, UploadResult,
        decode::{check_declared_size, decode_payload},
        ingest_batch,
    },
};

fn too_large_message(max_request_size: u64) -> String {
    format!(
        "Request body exceeds maximum allowed size of {} bytes ({} MB)",
        max_request_size,
        max_request_size / (1024 * 1024)
    )
}

fn file_too_large(max_file_size: u64) -> FileFailure {
    FileFailure::new(
        FailureKind::PayloadTooLarge,
        format!(
            "File size exceeds maximum allowed size of {} bytes ({} MB)",
            max_file_size,
            max_file_size / (1024 * 1024)
        ),
    )
}

fn multipart_error(e: MultipartError, max_request_size: u64) -> Error {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        Error::PayloadTooLarge {
            message: too_large_message(max_request_size),
        }
    } else {
        Error::MalformedRequest {
            message: format!("Failed to parse multipart data: {}", e.body_text()),
        }
    }
}

/// Buffer one file field, giving up on the file (not the request) once it passes `max_file_size`.
async fn read_file_field(
    mut field: Field<'_>,
    max_file_size: u64,
    max_request_size: u64,
) -> Result<std::result::Result<Bytes, FileFailure>> {
    let mut buffer = BytesMut::new();

    while let Some(chunk) = field
        .chunk()
        .await
        .map_err(|e| multipart_error(e, max_request_size))?
    {
        if (buffer.len() + chunk.len()) as u64 > max_file_size {
            // The rest of the field is skipped by the next call to next_field
            return Ok(Err(file_too_large(max_file_size)));
        }
        buffer.extend_from_slice(&chunk);
    }

    Ok(Ok(buffer.freeze()))
}

#[utoipa::path(
    post,
    path = "/upload/form",
    tag = "uploads",
    summary = "Upload files (multipart)",
    description = "Upload one or more files as multipart/form-data. Every part named `files` is stored \
                   under a freshly generated name; other parts are ignored. Files that cannot be stored \
                   are listed under `failed` without affecting the rest of the batch.",
    request_body(
        content_type = "multipart/form-data",
        description = "One or more file parts under the `files` field"
    ),
    responses(
        (status = 200, description = "Batch processed", body = UploadResponse),
        (status = 400, description = "Malformed body or no files", body = ErrorResponse),
        (status = 413, description = "Request body too large", body = ErrorResponse),
        (status = 429, description = "Upload capacity exhausted", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
#[instrument(skip_all, fields(transport = "form", files = tracing::field::Empty))]
pub async fn upload_form(
    State(state): State<AppState>,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> Result<Json<UploadResponse>> {
    let mut multipart = multipart.map_err(|e| Error::MalformedRequest {
        message: format!("Failed to parse multipart data: {}", e.body_text()),
    })?;

    let field_name = state.config.uploads.form_field.as_str();
    let limits = &state.config.limits.uploads;
    let mut files = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e, limits.max_request_size))?
    {
        if field.name() != Some(field_name) {
            debug!("Ignoring multipart field {:?}", field.name());
            continue;
        }

        let original_name = field.file_name().unwrap_or_default().to_string();
        debug!(
            original_name = %original_name,
            content_type = ?field.content_type(),
            "Reading file part"
        );

        let payload = read_file_field(field, limits.max_file_size, limits.max_request_size).await?;
        files.push(PendingFile::new(original_name, ready(payload)));
    }

    if files.is_empty() {
        return Err(Error::NoFilesProvided);
    }
    tracing::Span::current().record("files", files.len());

    let reports = ingest_batch(
        state.store.as_ref(),
        Transport::Form,
        files,
        state.config.storage.write_concurrency,
    )
    .await;

    let result = UploadResult::from_reports(reports, None);
    debug!(stored = result.stored.len(), failed = result.failed.len(), "Form upload finished");

    Ok(Json(UploadResponse::from_result(Transport::Form, result)))
}

/// Decode off the async runtime, then reconcile the declared size.
async fn decode_described(
    file: DescribedFile,
    max_file_size: u64,
    reject_size_mismatch: bool,
) -> std::result::Result<Bytes, FileFailure> {
    let DescribedFile {
        name,
        size,
        base64,
        content_type,
    } = file;
    debug!(original_name = %name, content_type = ?content_type, "Decoding file payload");

    let bytes = match tokio::task::spawn_blocking(move || decode_payload(&base64, max_file_size)).await {
        Ok(decoded) => decoded?,
        Err(e) => {
            error!(original_name = %name, error = %e, "Decode task failed");
            return Err(FileFailure::new(FailureKind::InternalError, "Failed to decode file"));
        }
    };

    let actual = bytes.len() as u64;
    if let Some(declared) = size
        && declared != actual
    {
        warn!(original_name = %name, declared, actual, "Declared size does not match decoded size");
    }
    check_declared_size(size, actual, reject_size_mismatch)?;

    Ok(bytes)
}

#[utoipa::path(
    post,
    path = "/upload/structured",
    tag = "uploads",
    summary = "Upload files (JSON)",
    description = "Upload files as base64 payloads with uploader metadata. Uploader metadata is echoed \
                   back unchanged. Each file is decoded independently, so an invalid payload fails only \
                   that file.",
    request_body(content = StructuredUploadRequest, content_type = "application/json"),
    responses(
        (status = 200, description = "Batch processed", body = UploadResponse),
        (status = 400, description = "Malformed body or no files", body = ErrorResponse),
        (status = 413, description = "Request body too large", body = ErrorResponse),
        (status = 429, description = "Upload capacity exhausted", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
#[instrument(skip_all, fields(transport = "structured", files = tracing::field::Empty))]
pub async fn upload_structured(
    State(state): State<AppState>,
    payload: std::result::Result<Json<StructuredUploadRequest>, JsonRejection>,
) -> Result<Json<UploadResponse>> {
    let limits = &state.config.limits.uploads;

    let Json(request) = payload.map_err(|e| {
        if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
            Error::PayloadTooLarge {
                message: too_large_message(limits.max_request_size),
            }
        } else {
            Error::MalformedRequest {
                message: e.body_text(),
            }
        }
    })?;

    let StructuredUploadRequest { user, files } = request;
    let files = files.unwrap_or_default();
    if files.is_empty() {
        return Err(Error::NoFilesProvided);
    }
    tracing::Span::current().record("files", files.len());

    let reject_size_mismatch = state.config.uploads.reject_size_mismatch;
    let pending = files
        .into_iter()
        .map(|file| {
            let original_name = file.name.clone();
            let declared_size = file.size;
            PendingFile::new(original_name, decode_described(file, limits.max_file_size, reject_size_mismatch))
                .with_declared_size(declared_size)
        })
        .collect();

    let reports = ingest_batch(
        state.store.as_ref(),
        Transport::Structured,
        pending,
        state.config.storage.write_concurrency,
    )
    .await;

    let result = UploadResult::from_reports(reports, Some(user));
    debug!(stored = result.stored.len(), failed = result.failed.len(), "Structured upload finished");

    Ok(Json(UploadResponse::from_result(Transport::Structured, result)))
}
