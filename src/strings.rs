//! String helpers: the length pre-filter and content hashing.

use sha2::{Digest, Sha256};

/// Whether two strings are close enough in length to be worth scoring.
///
/// The ratio of the shorter length to the longer one, as a percentage, must be at least
/// `str_len_delta_pct`. Two empty strings have no defined ratio and are never eligible.
pub fn check_str_len(left: &str, right: &str, str_len_delta_pct: f64) -> bool {
    let left_len = left.chars().count() as f64;
    let right_len = right.chars().count() as f64;

    let ratio = if left_len > right_len {
        right_len / left_len
    } else {
        left_len / right_len
    };

    // NaN (0/0) compares false
    ratio * 100.0 >= str_len_delta_pct
}

/// Uppercase hex SHA-256 of a row's projected string.
pub fn content_hash(projected: &str) -> String {
    let digest = Sha256::digest(projected.as_bytes());
    hex::encode_upper(digest)
}
