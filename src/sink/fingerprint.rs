use sha2::{Digest, Sha256};

/// Collapses whitespace and lowercases text so cosmetic differences between
/// pages do not defeat deduplication
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Computes the dedup fingerprint of a record's primary text within a scope
///
/// The scope key is part of the digest, so the same text in two scopes yields
/// two distinct fingerprints.
pub fn fingerprint(scope_key: &str, primary_text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(scope_key.as_bytes());
    hasher.update([0u8]);
    hasher.update(normalize_text(primary_text).as_bytes());
    hex::encode(hasher.finalize())
}
