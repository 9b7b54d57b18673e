//! Whitelist file parsing.
//!
//! One key per line: the key is the first 40 characters, lines shorter than
//! that are ignored. The beacon-whitelist flavor additionally carries a
//! free-form comment after a one-character separator at column 41.

use std::fs;
use std::path::Path;

use crate::consts::KEY_Z85_LEN;

/// Read keys from a whitelist file, one per line.
///
/// # Errors
///
/// Propagates IO errors; malformed lines are skipped, not errors.
pub fn read_keys(path: impl AsRef<Path>) -> std::io::Result<Vec<String>> {
    let text = fs::read_to_string(path)?;
    Ok(text
        .lines()
        .filter(|line| line.chars().count() >= KEY_Z85_LEN)
        .map(|line| line.chars().take(KEY_Z85_LEN).collect())
        .collect())
}

/// Read keys with display-only comments from a whitelist file.
///
/// The comment is everything after character position 41 (position 40 holds
/// a separator and is discarded). Lines without a comment yield an empty one.
///
/// # Errors
///
/// Propagates IO errors; malformed lines are skipped, not errors.
pub fn read_keys_with_comments(path: impl AsRef<Path>) -> std::io::Result<Vec<(String, String)>> {
    let text = fs::read_to_string(path)?;
    Ok(text
        .lines()
        .filter(|line| line.chars().count() >= KEY_Z85_LEN)
        .map(|line| {
            let key = line.chars().take(KEY_Z85_LEN).collect();
            let comment = line.chars().skip(KEY_Z85_LEN + 1).collect();
            (key, comment)
        })
        .collect())
}
