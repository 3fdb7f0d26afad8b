//! Hashing utilities for the whitelist commitment.
//!
//! Leaves and internal nodes are hashed under distinct one-byte domain prefixes so that
//! no internal node can be reinterpreted as a leaf (and vice versa).

use crate::constants::{INTERNAL_PREFIX, LEAF_PREFIX};
use crate::types::IdentityAddress;
use alloy_primitives::{keccak256 as alloy_keccak256, B256};

/// Compute keccak256 hash of input data.
///
/// # Example
///
/// ```
/// use whitelist_core::hashing::keccak256;
///
/// let hash = keccak256(b"hello");
/// assert_eq!(hash.len(), 32);
/// ```
pub fn keccak256(data: &[u8]) -> B256 {
    alloy_keccak256(data)
}

/// Compute the leaf hash for raw address bytes: `keccak256(0x00 || bytes)`.
pub fn leaf_hash_bytes(bytes: &[u8]) -> B256 {
    let mut data = Vec::with_capacity(1 + bytes.len());
    data.push(LEAF_PREFIX);
    data.extend_from_slice(bytes);

    keccak256(&data)
}

/// Compute the leaf hash for a normalized identity address.
///
/// The address is hashed as its canonical lowercase ASCII form (`0x` + 40 hex digits).
///
/// # Example
///
/// ```
/// use whitelist_core::{leaf_hash, IdentityAddress};
///
/// let a: IdentityAddress = "0xABCDEF1234567890ABCDEF1234567890ABCDEF12".parse().unwrap();
/// let b: IdentityAddress = "0xabcdef1234567890abcdef1234567890abcdef12".parse().unwrap();
/// assert_eq!(leaf_hash(&a), leaf_hash(&b));
/// ```
pub fn leaf_hash(address: &IdentityAddress) -> B256 {
    leaf_hash_bytes(address.as_bytes())
}

/// Compute the internal node hash: `keccak256(0x01 || left || right)`.
///
/// This is positional: swapping `left` and `right` yields a different hash.
pub fn internal_hash(left: &B256, right: &B256) -> B256 {
    let mut data = Vec::with_capacity(65);
    data.push(INTERNAL_PREFIX);
    data.extend_from_slice(left.as_ref());
    data.extend_from_slice(right.as_ref());

    keccak256(&data)
}

/// Sentinel root of an empty whitelist: the leaf-domain hash of the empty string.
pub fn empty_root() -> B256 {
    leaf_hash_bytes(&[])
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::hex;

    #[test]
    fn test_keccak256() {
        // Keccak256 vectors (not SHA3-256!)
        let expected = B256::from(hex!(
            "c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470"
        ));
        assert_eq!(keccak256(b""), expected);

        let expected = B256::from(hex!(
            "4e03657aea45a94fc7d47ba826c8d667c0d1e6e33a64a036ec44f58fa12d6c45"
        ));
        assert_eq!(keccak256(b"abc"), expected);
    }

    #[test]
    fn test_leaf_hash_includes_prefix() {
        let address: IdentityAddress = "0x1234567890abcdef1234567890abcdef12345678"
            .parse()
            .unwrap();

        let mut expected_preimage = vec![LEAF_PREFIX];
        expected_preimage.extend_from_slice(b"0x1234567890abcdef1234567890abcdef12345678");

        assert_eq!(leaf_hash(&address), keccak256(&expected_preimage));
        assert_ne!(leaf_hash(&address), keccak256(address.as_bytes()));
    }

    #[test]
    fn test_internal_hash_is_positional() {
        let left = B256::from([0xaa; 32]);
        let right = B256::from([0xbb; 32]);

        let mut expected_preimage = vec![INTERNAL_PREFIX];
        expected_preimage.extend_from_slice(left.as_ref());
        expected_preimage.extend_from_slice(right.as_ref());

        assert_eq!(internal_hash(&left, &right), keccak256(&expected_preimage));
        assert_ne!(internal_hash(&left, &right), internal_hash(&right, &left));
    }

    #[test]
    fn test_empty_root_is_leaf_domain_hash_of_empty_string() {
        assert_eq!(empty_root(), keccak256(&[LEAF_PREFIX]));
        assert_ne!(empty_root(), B256::ZERO);
    }

    #[test]
    fn test_leaf_and_internal_domains_do_not_collide() {
        // A 65-byte "address" shaped like an internal preimage must not reproduce the node hash.
        let left = B256::from([0x01; 32]);
        let right = B256::from([0x02; 32]);
        let mut forged = Vec::with_capacity(64);
        forged.extend_from_slice(left.as_ref());
        forged.extend_from_slice(right.as_ref());

        assert_ne!(leaf_hash_bytes(&forged), internal_hash(&left, &right));
    }
}
