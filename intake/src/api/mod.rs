//! API layer for HTTP request handling and data models.
//!
//! - **[`handlers`]**: Axum route handlers for the upload endpoints
//! - **[`models`]**: Request/response data structures
//!
//! # API Structure
//!
//! - `POST /upload/form` (alias `/api/simple-upload`): multipart upload, files under `files`
//! - `POST /upload/structured` (alias `/api/complex-upload`): JSON with uploader metadata and
//!   base64-encoded files
//! - `GET /uploads/{name}`: stored files, when `storage.serve_files` is enabled
//!
//! The OpenAPI document is served at `/openapi.json`, with a viewer at `/docs`.

pub mod handlers;
pub mod models;
