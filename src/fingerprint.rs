//! Request fingerprinting.
//!
//! A fingerprint is the cache key for a question asked under a specific
//! context: the normalized question text plus the identity of whatever the
//! question is asked against (file content hash, connection id, schema
//! version). Any change in context state changes the fingerprint, so stale
//! cache entries die implicitly without explicit invalidation.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Identity of the context a question is evaluated against.
///
/// `file_hash` is a content hash of the attached file, if any.
/// `connection` is (connection identifier, schema version token), if any.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContextIdentity {
    pub file_hash: Option<String>,
    pub connection: Option<(String, String)>,
}

/// Deterministic cache key for a (question, context) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Compute the fingerprint. Pure and deterministic: equal normalized
    /// question text under equal context identity always hashes the same.
    pub fn compute(question: &str, context: &ContextIdentity) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(normalize_question(question).as_bytes());
        hasher.update([0x1f]);
        if let Some(ref hash) = context.file_hash {
            hasher.update(hash.as_bytes());
        }
        hasher.update([0x1f]);
        if let Some((ref conn, ref version)) = context.connection {
            hasher.update(conn.as_bytes());
            hasher.update([0x1e]);
            hasher.update(version.as_bytes());
        }
        let digest = hasher.finalize();
        Fingerprint(hex_encode(&digest))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lowercase, trim, collapse whitespace runs, strip trailing punctuation.
pub fn normalize_question(question: &str) -> String {
    let collapsed = question
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    collapsed
        .trim_end_matches(|c: char| matches!(c, '?' | '!' | '.' | ',' | ';' | ':'))
        .trim()
        .to_string()
}

pub(crate) fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{:02x}", b));
    }
    out
}
