use serde::Serialize;
use sha2::{Digest, Sha256};

/// Recursively sort object keys for stable hashing.
pub fn sort_json(v: serde_json::Value) -> serde_json::Value {
    match v {
        serde_json::Value::Object(map) => {
            let mut keys: Vec<_> = map.keys().cloned().collect();
            keys.sort();
            let mut new_map = serde_json::Map::new();
            for k in keys {
                let child = map.get(&k).cloned().unwrap_or(serde_json::Value::Null);
                new_map.insert(k, sort_json(child));
            }
            serde_json::Value::Object(new_map)
        }
        serde_json::Value::Array(arr) => serde_json::Value::Array(arr.into_iter().map(sort_json).collect()),
        other => other,
    }
}

/// Compact canonical JSON (sorted keys, no whitespace).
pub fn canonical_json(value: &serde_json::Value) -> String {
    sort_json(value.clone()).to_string()
}

/// Canonical JSON for any serializable value.
pub fn canonical_json_of<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let v = serde_json::to_value(value)?;
    Ok(canonical_json(&v))
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Hash of a JSON payload over its canonical form.
pub fn payload_hash(value: &serde_json::Value) -> String {
    sha256_hex(canonical_json(value).as_bytes())
}
