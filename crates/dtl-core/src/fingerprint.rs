use crate::{sha256_hex, Fingerprint};

/// Fingerprints are truncated to this many hex characters.
pub const FINGERPRINT_LEN: usize = 16;

/// Collapse whitespace runs and lowercase, so cosmetic differences map to one fingerprint.
pub fn normalize_query(query: &str) -> String {
    query.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

pub fn fingerprint(query: &str) -> Fingerprint {
    let digest = sha256_hex(normalize_query(query).as_bytes());
    Fingerprint(digest[..FINGERPRINT_LEN].to_string())
}

/// Schema check for fingerprints carried in bundles and records.
pub fn is_well_formed(fp: &Fingerprint) -> bool {
    let s = fp.as_str();
    !s.is_empty() && s.len() <= 64 && s.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase())
}
