use weave_core::ids::UnitHash;

/// BLAKE3 hash of arbitrary bytes, truncated to 32 bytes (it already is 32).
pub fn blake3_hash(data: &[u8]) -> [u8; 32] {
    *blake3::hash(data).as_bytes()
}

/// Derive a [`UnitHash`] from a unit's canonical body bytes.
pub fn unit_hash_from_bytes(body_bytes: &[u8]) -> UnitHash {
    UnitHash::from_bytes(blake3_hash(body_bytes))
}

/// SHA-256, used by the formula evaluator's `sha256(...)` operator.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    use sha2::Digest;
    let mut hasher = sha2::Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// SHA-1, used by the formula evaluator's `sha1(...)` operator (legacy interop only).
pub fn sha1(data: &[u8]) -> [u8; 20] {
    use sha1::Digest;
    let mut hasher = sha1::Sha1::new();
    hasher.update(data);
    hasher.finalize().into()
}
