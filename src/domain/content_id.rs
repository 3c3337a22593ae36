//! Content identity derivation.
//!
//! The upstream encodes a stable image name inside the relative URL base,
//! e.g. `/th?id=OHR.MilwaukeeHall_ROW0871854348`. The component between the
//! `OHR.` (or `id=`) marker and the first `_` identifies the physical image
//! regardless of the region or date it was served for, which makes it the
//! deduplication key for variants and blobs. A provider format change is the
//! most likely way to silently break dedup, so this lives here as a pure
//! function with its own test matrix.

/// Derive the stable content identity from an upstream URL base.
///
/// Falls back to the upstream content hash when extraction yields an empty
/// string, so every descriptor always has a usable identity.
pub fn derive_content_id(url_base: &str, content_hash: &str) -> String {
    let start = if let Some(idx) = url_base.find("OHR.") {
        idx + 4
    } else if let Some(idx) = url_base.find("id=") {
        idx + 3
    } else {
        0
    };

    let remainder = &url_base[start..];
    let end = remainder.find('_').unwrap_or(remainder.len());
    let name = &remainder[..end];

    if name.is_empty() {
        content_hash.to_string()
    } else {
        name.to_string()
    }
}
