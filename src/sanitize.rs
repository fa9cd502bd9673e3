#![forbid(unsafe_code)]

//! Turns extractor-reported titles into safe, unique file names.

use crate::identifier::DownloadId;

/// Prefix of every stored file name.
pub const FILENAME_PREFIX: &str = "tiktok";
/// Substituted when a title sanitizes to nothing.
pub const FALLBACK_TITLE: &str = "video";
/// Used when the extractor reports no usable extension.
pub const FALLBACK_EXTENSION: &str = "mp4";
/// Maximum number of characters kept from a title.
pub const MAX_TITLE_CHARS: usize = 50;

/// Normalizes an arbitrary title into a single path-segment-safe token.
///
/// - Drops every character that is not alphanumeric, whitespace or `-`
/// - Keeps at most [`MAX_TITLE_CHARS`] characters of what remains
/// - Trims, then collapses each whitespace run into one `_`
/// - Falls back to [`FALLBACK_TITLE`] when nothing is left
pub fn sanitize_title(title: &str) -> String {
    let kept: String = title
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace() || *c == '-')
        .take(MAX_TITLE_CHARS)
        .collect();

    let collapsed = kept.split_whitespace().collect::<Vec<_>>().join("_");

    if collapsed.is_empty() {
        FALLBACK_TITLE.to_string()
    } else {
        collapsed
    }
}

/// Reduces an extension to ASCII alphanumerics, lowercase.
pub fn sanitize_extension(ext: &str) -> String {
    let cleaned: String = ext
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .take(16)
        .collect::<String>()
        .to_ascii_lowercase();
    if cleaned.is_empty() {
        FALLBACK_EXTENSION.to_string()
    } else {
        cleaned
    }
}

/// `<prefix>_<id>_<sanitized-title>.<ext>`; the embedded id keeps names unique
/// even when two titles sanitize identically.
pub fn compose_filename(id: &DownloadId, title: &str, ext: &str) -> String {
    format!(
        "{FILENAME_PREFIX}_{id}_{}.{}",
        sanitize_title(title),
        sanitize_extension(ext)
    )
}
