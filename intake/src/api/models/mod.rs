//! Request/response data structures for the upload API.

pub mod uploads;
