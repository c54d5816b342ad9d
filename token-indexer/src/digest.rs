//! Hashing for ledger state digests
//!
//! - SHA-256 over raw bytes
//! - Binary Merkle root over leaf hashes (odd levels duplicate the last hash)
//!
//! Two indexers that processed the same chain must produce the same root.

use sha2::{Digest, Sha256};

/// Hash arbitrary bytes using SHA-256
pub fn hash_bytes(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Create a Merkle root from leaf hashes
///
/// An empty list has the all-zero root.
pub fn merkle_root(leaves: &[[u8; 32]]) -> [u8; 32] {
    if leaves.is_empty() {
        return [0u8; 32];
    }

    let mut current_level: Vec<[u8; 32]> = leaves.to_vec();

    while current_level.len() > 1 {
        current_level = current_level
            .chunks(2)
            .map(|pair| {
                let left = &pair[0];
                // Duplicate last hash if odd number
                let right = pair.get(1).unwrap_or(left);

                let mut hasher = Sha256::new();
                hasher.update(left);
                hasher.update(right);
                hasher.finalize().into()
            })
            .collect();
    }

    current_level[0]
}

/// Lowercase hex rendering of a digest
pub fn to_hex(digest: &[u8; 32]) -> String {
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_bytes_deterministic() {
        assert_eq!(hash_bytes(b"bSTXS1000"), hash_bytes(b"bSTXS1000"));
        assert_ne!(hash_bytes(b"bSTXS1000"), hash_bytes(b"bSTXS1001"));
    }

    #[test]
    fn test_merkle_root_shapes() {
        assert_eq!(merkle_root(&[]), [0u8; 32]);

        let a = hash_bytes(b"a");
        let b = hash_bytes(b"b");
        let c = hash_bytes(b"c");
        assert_eq!(merkle_root(&[a]), a);

        // Odd count duplicates the last leaf
        assert_eq!(merkle_root(&[a, b, c]), merkle_root(&[a, b, c, c]));

        // Order matters
        assert_ne!(merkle_root(&[a, b]), merkle_root(&[b, a]));
    }

    #[test]
    fn test_to_hex() {
        let digest = [0xabu8; 32];
        assert_eq!(to_hex(&digest).len(), 64);
        assert!(to_hex(&digest).starts_with("abab"));
    }
}
