//! Cache key derivation
//!
//! Keys are BLAKE3 digests over the request kind and a canonical rendering of
//! the payload: object members are visited in sorted key order, so two
//! payloads that differ only in member order map to the same row.

use blake3::Hasher;
use serde_json::Value;

use crate::routing::RequestKind;

/// Prefix shared by every cache row in the store
pub const CACHE_KEY_PREFIX: &str = "cache:";

/// Bytes of the digest kept in the key
const KEY_DIGEST_BYTES: usize = 16;

/// Derive the store key for a request
#[must_use]
pub fn cache_key(kind: RequestKind, payload: &Value) -> String {
    let mut hasher = Hasher::new();
    hasher.update(kind.as_str().as_bytes());
    hasher.update(b"|");
    hash_canonical(&mut hasher, payload);

    let digest = hasher.finalize();
    format!(
        "{CACHE_KEY_PREFIX}{}",
        hex::encode(&digest.as_bytes()[..KEY_DIGEST_BYTES])
    )
}

fn hash_canonical(hasher: &mut Hasher, value: &Value) {
    match value {
        Value::Object(map) => {
            let mut members: Vec<(&String, &Value)> = map.iter().collect();
            members.sort_unstable_by(|a, b| a.0.cmp(b.0));

            hasher.update(b"{");
            for (i, (name, member)) in members.into_iter().enumerate() {
                if i > 0 {
                    hasher.update(b",");
                }
                hash_string(hasher, name);
                hasher.update(b":");
                hash_canonical(hasher, member);
            }
            hasher.update(b"}");
        }
        Value::Array(items) => {
            hasher.update(b"[");
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    hasher.update(b",");
                }
                hash_canonical(hasher, item);
            }
            hasher.update(b"]");
        }
        Value::String(s) => hash_string(hasher, s),
        // Scalars render identically regardless of map ordering
        scalar => {
            hasher.update(scalar.to_string().as_bytes());
        }
    }
}

fn hash_string(hasher: &mut Hasher, s: &str) {
    // Serialize through Value so quoting and escaping match JSON exactly
    hasher.update(Value::String(s.to_string()).to_string().as_bytes());
}
