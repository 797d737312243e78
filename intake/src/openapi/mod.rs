//! OpenAPI documentation for the upload API.
//!
//! Served as JSON at `/openapi.json` and rendered with Scalar at `/docs`.

use utoipa::OpenApi;

use crate::{
    api::{
        handlers::uploads,
        models::uploads::{DescribedFile, FailedFileResponse, StoredFileResponse, StructuredUploadRequest, UploadResponse},
    },
    errors::ErrorResponse,
    ingest::{FailureKind, Uploader},
};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "intake",
        description = "File ingestion service. Accepts files as multipart form data or as base64 payloads \
                       inside JSON, stores each under a generated name and reports a per-file outcome."
    ),
    paths(uploads::upload_form, uploads::upload_structured),
    components(schemas(
        StructuredUploadRequest,
        DescribedFile,
        Uploader,
        UploadResponse,
        StoredFileResponse,
        FailedFileResponse,
        FailureKind,
        ErrorResponse,
    )),
    tags(
        (name = "uploads", description = "Upload files through either transport"),
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_lists_both_transports() {
        let doc = ApiDoc::openapi();

        assert!(doc.paths.paths.contains_key("/upload/form"));
        assert!(doc.paths.paths.contains_key("/upload/structured"));

        let schemas = &doc.components.as_ref().unwrap().schemas;
        assert!(schemas.contains_key("UploadResponse"));
        assert!(schemas.contains_key("FailureKind"));
    }
}
