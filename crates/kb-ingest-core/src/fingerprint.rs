//! Content fingerprinting.
//!
//! A fingerprint is the SHA-256 of the match-normalized text followed by
//! the sorted, de-duplicated attachment URLs. Two units with the same
//! visible text and the same attachment set hash identically regardless
//! of attachment order, casing, or emphasis markup.
//!
//! Accidental collisions are not handled; the hash space is treated as
//! collision-free.

use sha2::{Digest, Sha256};

use crate::models::{Attachment, Fingerprint};
use crate::normalize::normalize_for_match;

/// Compute the fingerprint of a unit's visible content.
pub fn fingerprint(text: &str, attachments: &[Attachment]) -> Fingerprint {
    let mut urls: Vec<&str> = attachments.iter().map(|a| a.url.as_str()).collect();
    urls.sort_unstable();
    urls.dedup();

    let mut hasher = Sha256::new();
    hasher.update(normalize_for_match(text).as_bytes());
    for url in urls {
        hasher.update([0u8]);
        hasher.update(url.as_bytes());
    }
    Fingerprint(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn att(url: &str) -> Attachment {
        Attachment {
            name: "f".to_string(),
            url: url.to_string(),
            content_type: String::new(),
            size: 0,
        }
    }

    #[test]
    fn attachment_order_does_not_matter() {
        let a = fingerprint("hello", &[att("https://a"), att("https://b")]);
        let b = fingerprint("hello", &[att("https://b"), att("https://a")]);
        assert_eq!(a, b);
    }

    #[test]
    fn formatting_does_not_matter() {
        assert_eq!(
            fingerprint("*Deploy*  done", &[]),
            fingerprint("deploy done", &[])
        );
    }

    #[test]
    fn attachments_change_fingerprint() {
        assert_ne!(
            fingerprint("hello", &[]),
            fingerprint("hello", &[att("https://a")])
        );
        assert_ne!(
            fingerprint("hello", &[att("https://a")]),
            fingerprint("hello", &[att("https://b")])
        );
    }

    #[test]
    fn text_boundary_is_not_ambiguous() {
        // "ab" + [] must differ from "a" + ["b"]-like splits.
        assert_ne!(fingerprint("ab", &[]), fingerprint("a", &[att("b")]));
    }

    #[test]
    fn hex_sha256_shape() {
        let fp = fingerprint("x", &[]);
        assert_eq!(fp.as_str().len(), 64);
        assert!(fp.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }
}
