//! Recoverable Signatures
//!
//! 65-byte secp256k1 signatures (`r || s || v`, `v ∈ {27, 28}`) over a
//! 32-byte prehash. The root chain never sees public keys: it recovers the
//! signer's address from the signature and compares addresses.

use alloy_primitives::Address;
use k256::ecdsa::{RecoveryId, Signature as EcdsaSignature, SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::hash::{address_from_public_key, Hash32};

/// Length of an encoded signature.
pub const SIGNATURE_LEN: usize = 65;

/// Offset added to the recovery id in the `v` byte.
const V_OFFSET: u8 = 27;

/// Signature errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    /// Wrong byte length.
    #[error("invalid signature length {0}")]
    InvalidLength(usize),
    /// `v` byte is not 27 or 28.
    #[error("invalid recovery id byte {0}")]
    InvalidRecoveryId(u8),
    /// The empty (all-zero) signature was supplied where one is required.
    #[error("signature is empty")]
    Empty,
    /// `r`/`s` are not a valid signature or recovery failed.
    #[error("signature recovery failed")]
    RecoveryFailed,
    /// Private key bytes are not a valid scalar.
    #[error("invalid signing key")]
    InvalidKey,
}

/// A 65-byte recoverable signature.
///
/// The all-zero value stands for "no signature" (e.g. the second slot of a
/// single-input transaction).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Signature(#[serde(with = "signature_bytes")] pub [u8; SIGNATURE_LEN]);

impl Signature {
    /// The absent signature.
    pub const EMPTY: Signature = Signature([0u8; SIGNATURE_LEN]);

    /// Parse from a byte slice.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, SignatureError> {
        let raw: [u8; SIGNATURE_LEN] = bytes
            .try_into()
            .map_err(|_| SignatureError::InvalidLength(bytes.len()))?;
        Ok(Self(raw))
    }

    /// Raw bytes.
    pub fn as_bytes(&self) -> &[u8; SIGNATURE_LEN] {
        &self.0
    }

    /// Is this the absent signature?
    pub fn is_empty(&self) -> bool {
        self.0 == [0u8; SIGNATURE_LEN]
    }

    /// Recover the signer's address for `digest`.
    pub fn recover(&self, digest: &Hash32) -> Result<Address, SignatureError> {
        if self.is_empty() {
            return Err(SignatureError::Empty);
        }

        let v = self.0[64];
        let recovery_id = v
            .checked_sub(V_OFFSET)
            .and_then(RecoveryId::from_byte)
            .ok_or(SignatureError::InvalidRecoveryId(v))?;

        let signature = EcdsaSignature::from_slice(&self.0[..64])
            .map_err(|_| SignatureError::RecoveryFailed)?;

        let key = VerifyingKey::recover_from_prehash(digest, &signature, recovery_id)
            .map_err(|_| SignatureError::RecoveryFailed)?;

        Ok(public_key_address(&key))
    }
}

impl Default for Signature {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl std::fmt::Debug for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Signature(0x{}..)", hex::encode(&self.0[..8]))
    }
}

/// Address of a verifying key.
pub fn public_key_address(key: &VerifyingKey) -> Address {
    let point = key.to_encoded_point(false);
    // Skip the 0x04 SEC1 tag.
    address_from_public_key(&point.as_bytes()[1..])
}

/// A signing identity: private key plus its derived address.
#[derive(Clone)]
pub struct Signer {
    key: SigningKey,
    address: Address,
}

impl Signer {
    /// Build from 32 private key bytes.
    pub fn from_bytes(secret: &[u8]) -> Result<Self, SignatureError> {
        let key = SigningKey::from_slice(secret).map_err(|_| SignatureError::InvalidKey)?;
        let address = public_key_address(key.verifying_key());
        Ok(Self { key, address })
    }

    /// Address controlled by this signer.
    pub fn address(&self) -> Address {
        self.address
    }

    /// Sign a 32-byte digest.
    pub fn sign(&self, digest: &Hash32) -> Result<Signature, SignatureError> {
        let (signature, recovery_id) = self
            .key
            .sign_prehash_recoverable(digest)
            .map_err(|_| SignatureError::RecoveryFailed)?;

        let mut raw = [0u8; SIGNATURE_LEN];
        raw[..64].copy_from_slice(&signature.to_bytes());
        raw[64] = recovery_id.to_byte() + V_OFFSET;
        Ok(Signature(raw))
    }
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signer").field("address", &self.address).finish()
    }
}

mod signature_bytes {
    use super::SIGNATURE_LEN;
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8; SIGNATURE_LEN], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_bytes(bytes)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; SIGNATURE_LEN], D::Error> {
        let bytes: Vec<u8> = Vec::deserialize(d)?;
        bytes
            .as_slice()
            .try_into()
            .map_err(|_| D::Error::invalid_length(bytes.len(), &"65 bytes"))
    }
}
