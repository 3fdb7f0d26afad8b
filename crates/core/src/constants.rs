//! Canonical constants for the whitelist commitment format and the Idena RPC vocabulary.
//!
//! Changing any hash prefix changes every published root.

/// Domain prefix for leaf hashes: `keccak256(0x00 || address)`.
pub const LEAF_PREFIX: u8 = 0x00;

/// Domain prefix for internal node hashes: `keccak256(0x01 || left || right)`.
pub const INTERNAL_PREFIX: u8 = 0x01;

/// Number of hex digits after the `0x` prefix of an identity address.
pub const ADDRESS_HEX_LEN: usize = 40;

/// Fractional digits of an iDNA amount (1 iDNA = 10^18 atto).
pub const STAKE_DECIMALS: usize = 18;

/// Default minimum stake (whole iDNA) for whitelist eligibility.
pub const DEFAULT_MIN_STAKE_IDNA: u64 = 10_000;

/// Bulk identity listing RPC method.
pub const RPC_METHOD_IDENTITIES: &str = "dna_identities";

/// Single identity lookup RPC method.
pub const RPC_METHOD_IDENTITY: &str = "dna_identity";
