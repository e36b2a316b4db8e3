//! Canonical template encoding and content hashing.
//!
//! Semantically identical templates must always hash identically, whatever
//! the field order they were written in; this is what keeps a no-op spec edit
//! from minting a new revision.

use sha2::{Digest, Sha256};

/// Number of digest bytes kept in a template hash (10 hex characters).
const HASH_BYTES: usize = 5;

/// A short content hash of a canonicalized template, used as revision name
/// suffix.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TemplateHash(String);

impl TemplateHash {
    /// Hash canonical template bytes.
    ///
    /// A non-zero `collision_count` is mixed in as a salt so that a name
    /// collision can be resolved by bumping the count and hashing again.
    pub fn compute(canonical: &[u8], collision_count: u32) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(canonical);
        if collision_count > 0 {
            hasher.update(collision_count.to_be_bytes());
        }
        let digest = hasher.finalize();
        Self(hex::encode(&digest[..HASH_BYTES]))
    }

    /// Get the hash string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TemplateHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Produce canonical JSON (sorted keys, no extra whitespace).
pub fn canonical_json(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Object(map) => {
            let mut pairs: Vec<_> = map.iter().collect();
            pairs.sort_by_key(|(k, _)| *k);
            let inner: Vec<String> = pairs
                .iter()
                .map(|(k, v)| format!("\"{}\":{}", escape_json_string(k), canonical_json(v)))
                .collect();
            format!("{{{}}}", inner.join(","))
        }
        serde_json::Value::Array(arr) => {
            let inner: Vec<String> = arr.iter().map(canonical_json).collect();
            format!("[{}]", inner.join(","))
        }
        serde_json::Value::String(s) => format!("\"{}\"", escape_json_string(s)),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::Bool(b) => b.to_string(),
        serde_json::Value::Null => "null".to_string(),
    }
}

fn escape_json_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => {
                out.push_str(&format!("\\u{:04x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out
}
