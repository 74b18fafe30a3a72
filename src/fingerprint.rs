//! Content fingerprinting for ingestion-time deduplication.
//!
//! A fingerprint is the SHA-256 of the article's normalized text. Because it
//! hashes content rather than location, it catches republished or mirrored
//! articles that a URL check would miss. The fingerprint is the sole
//! deduplication mechanism; the storage layer enforces uniqueness with
//! insert-if-absent semantics.

use sha2::{Digest, Sha256};

/// Compute the deterministic content fingerprint of raw article text.
pub fn fingerprint(text: &str) -> String {
    let normalized = normalize(text);
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Lowercase and collapse all whitespace runs to single spaces, so that
/// markup-only differences between copies of the same article hash equal.
pub fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deterministic() {
        let a = fingerprint("The quick brown fox.");
        let b = fingerprint("The quick brown fox.");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_whitespace_and_case_insensitive() {
        let a = fingerprint("The quick\n\nbrown   fox.");
        let b = fingerprint("the QUICK brown fox.");
        assert_eq!(a, b);
    }

    #[test]
    fn test_different_content_differs() {
        assert_ne!(fingerprint("alpha"), fingerprint("beta"));
    }

    #[test]
    fn test_empty() {
        // Hashing empty input is fine; the ingestion path skips empty bodies
        // before fingerprinting.
        assert_eq!(fingerprint(""), fingerprint("   \n\t "));
    }
}
