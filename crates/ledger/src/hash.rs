use serde::Serialize;
use sha3::{Digest, Sha3_256};

/// Canonical 32-byte digest used for every on-chain identifier.
pub type Hash32 = [u8; 32];

pub const HASH_SIZE: usize = 32;
pub const ZERO_HASH: Hash32 = [0u8; 32];

#[inline]
pub fn is_zero(h: &Hash32) -> bool {
    h == &ZERO_HASH
}

/// Hash a byte slice into a 32-byte digest.
#[inline]
pub fn hash_bytes(data: &[u8]) -> Hash32 {
    let mut hasher = Sha3_256::new();
    hasher.update(data);
    let out = hasher.finalize();
    let mut h = [0u8; 32];
    h.copy_from_slice(&out);
    h
}

/// Hash the concatenation of several byte slices without an intermediate copy.
pub fn hash_concat(parts: &[&[u8]]) -> Hash32 {
    let mut hasher = Sha3_256::new();
    for p in parts {
        hasher.update(p);
    }
    let out = hasher.finalize();
    let mut h = [0u8; 32];
    h.copy_from_slice(&out);
    h
}

/// Hash two 32-byte nodes (left||right) -> 32-byte node.
#[inline(always)]
pub fn hash_pair(left: &Hash32, right: &Hash32) -> Hash32 {
    hash_concat(&[left, right])
}

/// Canonical digest of a serde structure. The bincode encoding of the chain
/// types is total, so this cannot fail for well-formed values.
pub fn hash_of<T: Serialize>(value: &T) -> Hash32 {
    let bytes = bincode::serialize(value).expect("bincode encoding of chain types is total");
    hash_bytes(&bytes)
}

/// Short hex form for log lines.
pub fn short_hex(h: &Hash32) -> String {
    hex::encode(&h[..4])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_is_stable() {
        assert_eq!(hash_bytes(b""), hash_concat(&[]));
        assert_ne!(hash_bytes(b""), ZERO_HASH);
    }

    #[test]
    fn pair_matches_concat() {
        let a = hash_bytes(b"a");
        let b = hash_bytes(b"b");
        assert_eq!(hash_pair(&a, &b), hash_concat(&[&a, &b]));
    }
}
