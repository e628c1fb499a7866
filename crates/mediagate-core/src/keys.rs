//! Key classification for staged uploads.
//!
//! Staged objects live under [`PENDING_SCAN_PREFIX`]; stripping the prefix gives the
//! key the object occupies once promoted. Promotion and quarantine both derive their
//! destination from [`get_final_key`], so the two can never disagree.

use crate::constants::{PENDING_SCAN_PREFIX, QUARANTINE_PREFIX};

/// True iff `key` sits under the staging prefix.
pub fn is_pending_scan(key: &str) -> bool {
    key.starts_with(PENDING_SCAN_PREFIX)
}

/// Returns `key` with the staging prefix stripped, or `key` unchanged when it has none.
pub fn get_final_key(key: &str) -> &str {
    key.strip_prefix(PENDING_SCAN_PREFIX).unwrap_or(key)
}

/// Destination key inside the quarantine bucket, preserving the final relative path.
pub fn quarantine_key(key: &str) -> String {
    format!("{}{}", QUARANTINE_PREFIX, get_final_key(key))
}

/// Lower-cased extension of the last path segment, if any.
pub fn extension(key: &str) -> Option<String> {
    let file_name = key.rsplit('/').next().unwrap_or(key);
    file_name
        .rsplit_once('.')
        .filter(|(stem, ext)| !stem.is_empty() && !ext.is_empty())
        .map(|(_, ext)| ext.to_lowercase())
}
