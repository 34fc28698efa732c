//! Content hashing for evidence fragments and audit payloads.

use sha2::{Digest, Sha256};

/// Lowercase hex SHA-256 of the UTF-8 text.
///
/// Used as the evidence `doc_hash` and wherever audit records need to refer
/// to text without carrying it.
pub fn doc_hash(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}
