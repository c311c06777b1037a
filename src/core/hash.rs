//! Protocol Hashing
//!
//! Provides deterministic, domain-separated hashing for:
//! - Deposit commitments (the "root" of a deposit block)
//! - Transaction hashes, Merkle leaves and confirmation digests
//! - Address derivation from public keys
//! - Whole-state digests for replay verification

use alloy_primitives::Address;
use sha2::{Digest, Sha256};

/// Hash output type (256 bits / 32 bytes)
pub type Hash32 = [u8; 32];

/// The all-zero hash, used as the "absent block" sentinel.
pub const ZERO_HASH: Hash32 = [0u8; 32];

const DEPOSIT_DOMAIN: &[u8] = b"PLASMA_DEPOSIT_V1";
const TX_DOMAIN: &[u8] = b"PLASMA_TX_V1";
const LEAF_DOMAIN: &[u8] = b"PLASMA_TX_LEAF_V1";
const CONFIRM_DOMAIN: &[u8] = b"PLASMA_CONFIRM_V1";
const ADDRESS_DOMAIN: &[u8] = b"PLASMA_ADDRESS_V1";
const STATE_DOMAIN: &[u8] = b"PLASMA_ROOT_CHAIN_STATE_V1";

/// Deterministic hasher for protocol values.
///
/// Wraps SHA-256 with helpers for the integer and address types the
/// root chain stores. Integers are written big-endian so that digests
/// match the byte layout of the packed identifiers.
pub struct ChainHasher {
    hasher: Sha256,
}

impl ChainHasher {
    /// Create a new hasher with domain separator.
    pub fn new(domain: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(domain);
        Self { hasher }
    }

    /// Create hasher for the full root chain state.
    pub fn for_state() -> Self {
        Self::new(STATE_DOMAIN)
    }

    /// Update with raw bytes.
    #[inline]
    pub fn update_bytes(&mut self, bytes: &[u8]) {
        self.hasher.update(bytes);
    }

    /// Update with a u8 value.
    #[inline]
    pub fn update_u8(&mut self, value: u8) {
        self.hasher.update([value]);
    }

    /// Update with a u64 value (big-endian).
    #[inline]
    pub fn update_u64(&mut self, value: u64) {
        self.hasher.update(value.to_be_bytes());
    }

    /// Update with a u128 value (big-endian).
    #[inline]
    pub fn update_u128(&mut self, value: u128) {
        self.hasher.update(value.to_be_bytes());
    }

    /// Update with a 20-byte address.
    #[inline]
    pub fn update_address(&mut self, address: &Address) {
        self.hasher.update(address.as_slice());
    }

    /// Finalize and return the hash.
    pub fn finalize(self) -> Hash32 {
        self.hasher.finalize().into()
    }
}

/// Compute a simple hash of arbitrary data.
pub fn hash_bytes(data: &[u8]) -> Hash32 {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Compute hash with domain separator.
pub fn hash_with_domain(domain: &[u8], data: &[u8]) -> Hash32 {
    let mut hasher = Sha256::new();
    hasher.update(domain);
    hasher.update(data);
    hasher.finalize().into()
}

/// Commitment recorded as the root of a deposit block.
///
/// Layout: `depositor || 0x00 * 31 || token || amount_be16`. The 31-byte
/// pad separates the two addresses so that no (depositor, token) pair can
/// be shifted into another.
pub fn deposit_hash(depositor: &Address, token: &Address, amount: u128) -> Hash32 {
    let mut hasher = ChainHasher::new(DEPOSIT_DOMAIN);
    hasher.update_address(depositor);
    hasher.update_bytes(&[0u8; 31]);
    hasher.update_address(token);
    hasher.update_u128(amount);
    hasher.finalize()
}

/// Hash of an encoded child-chain transaction.
pub fn tx_hash(tx_bytes: &[u8]) -> Hash32 {
    hash_with_domain(TX_DOMAIN, tx_bytes)
}

/// Merkle leaf of a signed transaction: `H(tx_hash || sig1 || sig2)`.
pub fn leaf_hash(tx_hash: &Hash32, sig1: &[u8], sig2: &[u8]) -> Hash32 {
    let mut hasher = ChainHasher::new(LEAF_DOMAIN);
    hasher.update_bytes(tx_hash);
    hasher.update_bytes(sig1);
    hasher.update_bytes(sig2);
    hasher.finalize()
}

/// Digest an input owner signs to confirm inclusion in a committed block.
pub fn confirmation_hash(tx_hash: &Hash32, block_root: &Hash32) -> Hash32 {
    let mut hasher = ChainHasher::new(CONFIRM_DOMAIN);
    hasher.update_bytes(tx_hash);
    hasher.update_bytes(block_root);
    hasher.finalize()
}

/// Derive a 20-byte address from an uncompressed public key (x || y).
pub fn address_from_public_key(public_key_xy: &[u8]) -> Address {
    let digest = hash_with_domain(ADDRESS_DOMAIN, public_key_xy);
    Address::from_slice(&digest[12..])
}

// =============================================================================
// TESTS
// =============================================================================
