//! Base64 payload decoding for the structured transport.

use base64::{
    Engine as _, alphabet,
    engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig},
};
use bytes::Bytes;

use super::{FailureKind, FileFailure};

const LENIENT_PADDING: GeneralPurposeConfig =
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent);

/// Standard alphabet, padding optional.
const PAYLOAD_ENGINE: GeneralPurpose = GeneralPurpose::new(&alphabet::STANDARD, LENIENT_PADDING);

/// URL-safe alphabet (`-` and `_`), padding optional.
const URL_SAFE_PAYLOAD_ENGINE: GeneralPurpose = GeneralPurpose::new(&alphabet::URL_SAFE, LENIENT_PADDING);

/// Strip a `data:<mime>;base64,` prefix if the client sent a whole data URL.
pub fn strip_data_url(payload: &str) -> &str {
    if payload.starts_with("data:")
        && let Some((_, data)) = payload.split_once(";base64,")
    {
        return data;
    }
    payload
}

/// Exact decoded length of a well-formed base64 string.
fn decoded_len(encoded: &str) -> u64 {
    let unpadded = encoded.trim_end_matches('=').len() as u64;
    unpadded * 3 / 4
}

/// Decode one file payload, refusing it before decoding when it would exceed `max_file_size`.
pub fn decode_payload(payload: &str, max_file_size: u64) -> Result<Bytes, FileFailure> {
    let payload = strip_data_url(payload);

    // MIME-style line breaks are tolerated
    let compact: String;
    let payload = if payload.bytes().any(|b| b.is_ascii_whitespace()) {
        compact = payload.chars().filter(|c| !c.is_ascii_whitespace()).collect();
        compact.as_str()
    } else {
        payload
    };

    let expected = decoded_len(payload);
    if expected > max_file_size {
        return Err(FileFailure::new(
            FailureKind::PayloadTooLarge,
            format!(
                "File size exceeds maximum allowed size of {} bytes ({} MB)",
                max_file_size,
                max_file_size / (1024 * 1024)
            ),
        ));
    }

    // The two alphabets only differ in `+/` versus `-_`
    let engine = if payload.bytes().any(|b| b == b'-' || b == b'_') {
        &URL_SAFE_PAYLOAD_ENGINE
    } else {
        &PAYLOAD_ENGINE
    };

    engine
        .decode(payload)
        .map(Bytes::from)
        .map_err(|e| FileFailure::new(FailureKind::InvalidEncoding, format!("Invalid base64 payload: {e}")))
}

/// Compare the client's declared size with what was actually decoded.
///
/// The decoded size is authoritative. A mismatch only fails the file when `reject` is set.
pub fn check_declared_size(declared: Option<u64>, actual: u64, reject: bool) -> Result<(), FileFailure> {
    match declared {
        Some(declared) if declared != actual && reject => Err(FileFailure::new(
            FailureKind::SizeMismatch,
            format!("Declared size {declared} does not match decoded size {actual}"),
        )),
        _ => Ok(()),
    }
}
