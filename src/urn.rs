// URN derivation for uploaded objects. Downstream translation requests
// identify a source object by the base64 of its `objectId`.

use crate::error::{Result, UploadError};
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine as _;

/// Standard base64 with padding.
pub fn encode(object_id: &str) -> String {
    STANDARD.encode(object_id.as_bytes())
}

/// URL-safe form: `+` becomes `-`, `/` becomes `_`, no `=` padding.
pub fn safe_encode(object_id: &str) -> String {
    URL_SAFE_NO_PAD.encode(object_id.as_bytes())
}

pub fn decode(urn: &str) -> Result<String> {
    let bytes = STANDARD
        .decode(urn)
        .map_err(|e| UploadError::InvalidArgument(format!("invalid URN {}: {}", urn, e)))?;
    into_utf8(bytes)
}

/// Accepts the URL-safe form with or without its padding stripped.
pub fn safe_decode(urn: &str) -> Result<String> {
    let bytes = URL_SAFE_NO_PAD
        .decode(urn.trim_end_matches('='))
        .map_err(|e| UploadError::InvalidArgument(format!("invalid URN {}: {}", urn, e)))?;
    into_utf8(bytes)
}

fn into_utf8(bytes: Vec<u8>) -> Result<String> {
    String::from_utf8(bytes).map_err(|e| UploadError::InvalidArgument(format!("URN is not UTF-8: {}", e)))
}
