//! HTTP request handlers.
//!
//! - [`uploads`]: the two transport adapters (multipart and JSON/base64)
//!
//! # Error Handling
//!
//! Handlers return [`crate::errors::Error`] for request-level failures, which converts to an HTTP
//! status and a JSON `{"error": ...}` body. Per-file failures are part of the success response.

pub mod uploads;
