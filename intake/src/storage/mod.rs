//! Persistence of uploaded bytes.
//!
//! A [`FileStore`] takes a caller-supplied original name and a byte buffer and persists the bytes
//! under a wholly generated physical name. The original name only ever contributes its
//! extension, and only after [`sanitize_name`] has reduced it to a single path segment, so
//! uploads cannot escape the storage root or collide with each other.
//!
//! - [`local::LocalFileStore`]: filesystem implementation rooted at a configured directory

pub mod local;

use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use thiserror::Error as ThisError;
use uuid::Uuid;

pub use local::LocalFileStore;

/// Suffix of the hidden temporary files a write goes through before it is renamed into place.
pub const PART_SUFFIX: &str = ".part";

/// Record of one persisted file. Created once per successful store, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredFile {
    /// Physical name inside the storage root: `<uuid><extension>`
    pub generated_name: String,
    /// Name exactly as the client sent it
    pub original_name: String,
    /// Number of bytes actually written
    pub byte_size: u64,
    /// Caller-facing path, e.g. `/uploads/<generated_name>`
    pub relative_path: String,
}

#[derive(ThisError, Debug)]
pub enum StorageError {
    /// The original name reduces to something that cannot name a file
    #[error("invalid file name {name:?}")]
    InvalidName { name: String },

    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Persists byte buffers under collision-free generated names.
#[async_trait]
pub trait FileStore: Send + Sync {
    /// Store `bytes`, deriving only the extension from `original_name`.
    async fn store(&self, original_name: &str, bytes: Bytes) -> Result<StoredFile, StorageError>;
}

/// Reduce a client-supplied name to its final path segment.
///
/// Both `/` and `\` are treated as separators regardless of platform, so `../../etc/passwd` and
/// `..\..\boot.ini` lose their directory parts. Segments that still refer to a directory (`.` or
/// `..`) and names containing NUL are rejected.
pub fn sanitize_name(original_name: &str) -> Result<&str, StorageError> {
    let segment = original_name
        .rsplit(|c| c == '/' || c == '\\')
        .next()
        .unwrap_or_default();

    if segment == "." || segment == ".." || segment.contains('\0') {
        return Err(StorageError::InvalidName {
            name: original_name.to_string(),
        });
    }

    Ok(segment)
}

/// Extension of an already sanitized name, including the leading dot.
///
/// A leading dot alone does not start an extension (`.bashrc` has none), and the extension is
/// otherwise returned verbatim (`a.tar.gz` -> `.gz`, `notes.` -> `.`).
pub fn extension(segment: &str) -> &str {
    match segment.rfind('.') {
        Some(0) | None => "",
        Some(idx) => &segment[idx..],
    }
}

/// Generate a fresh physical name for `original_name`.
pub fn generated_name(original_name: &str) -> Result<String, StorageError> {
    let segment = sanitize_name(original_name)?;
    Ok(format!("{}{}", Uuid::new_v4(), extension(segment)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_strips_traversal() {
        assert_eq!(sanitize_name("../../etc/passwd").unwrap(), "passwd");
        assert_eq!(sanitize_name("..\\..\\windows\\win.ini").unwrap(), "win.ini");
        assert_eq!(sanitize_name("/abs/path/photo.png").unwrap(), "photo.png");
        assert_eq!(sanitize_name("photo.png").unwrap(), "photo.png");
    }

    #[test]
    fn test_sanitize_rejects_directory_segments() {
        assert!(matches!(sanitize_name(".."), Err(StorageError::InvalidName { .. })));
        assert!(matches!(sanitize_name("a/.."), Err(StorageError::InvalidName { .. })));
        assert!(matches!(sanitize_name("."), Err(StorageError::InvalidName { .. })));
        assert!(matches!(sanitize_name("evil\0.png"), Err(StorageError::InvalidName { .. })));
    }

    #[test]
    fn test_sanitize_allows_empty_name() {
        assert_eq!(sanitize_name("").unwrap(), "");
        assert_eq!(sanitize_name("dir/").unwrap(), "");
    }

    #[test]
    fn test_extension() {
        assert_eq!(extension("a.png"), ".png");
        assert_eq!(extension("archive.tar.gz"), ".gz");
        assert_eq!(extension("README"), "");
        assert_eq!(extension(".bashrc"), "");
        assert_eq!(extension("notes."), ".");
        assert_eq!(extension("Photo.JPEG"), ".JPEG");
        assert_eq!(extension(""), "");
    }

    #[test]
    fn test_generated_name_keeps_extension() {
        let name = generated_name("a.png").unwrap();
        assert!(name.ends_with(".png"));
        let id = name.trim_end_matches(".png");
        assert!(Uuid::parse_str(id).is_ok());
    }

    #[test]
    fn test_generated_name_without_extension() {
        let name = generated_name("Makefile").unwrap();
        assert!(!name.contains('.'));
        assert!(Uuid::parse_str(&name).is_ok());
    }

    #[test]
    fn test_generated_name_never_contains_original_name() {
        let name = generated_name("../../etc/passwd").unwrap();
        assert!(!name.contains("passwd"));
        assert!(!name.contains('/'));
        assert!(Uuid::parse_str(&name).is_ok());
    }

    #[test]
    fn test_generated_names_are_unique() {
        let first = generated_name("a.png").unwrap();
        let second = generated_name("a.png").unwrap();
        assert_ne!(first, second);
    }
}
