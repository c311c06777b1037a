//! Exit Evidence Verification
//!
//! Decides whether a transaction is included in a committed block and
//! whether its input owners confirmed that specific block. Every check
//! fails closed: malformed input is a rejection, never a pass.

use alloy_primitives::Address;
use thiserror::Error;
use tracing::debug;

use crate::core::hash::{confirmation_hash, Hash32};
use crate::core::signature::{Signature, SignatureError};
use crate::core::transaction::{Transaction, TxSignatures, SLOTS};
use crate::proof::merkle::{MerkleProof, DEFAULT_DEPTH};

/// Reasons evidence is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvidenceError {
    /// Transaction bytes do not decode.
    #[error("malformed transaction: {0}")]
    MalformedTransaction(String),
    /// Proof bytes have the wrong length.
    #[error("malformed proof: expected {expected} bytes, got {got}")]
    MalformedProof {
        /// Required byte length.
        expected: usize,
        /// Supplied byte length.
        got: usize,
    },
    /// Proof does not lead to the committed root.
    #[error("transaction not included in block root")]
    NotIncluded,
    /// Referenced block has no committed root.
    #[error("block {0} has no committed root")]
    MissingRoot(u64),
    /// Number of confirmation signatures does not match the input count.
    #[error("expected {expected} confirmation signatures, got {got}")]
    ConfirmationCount {
        /// Inputs requiring confirmation.
        expected: usize,
        /// Confirmations supplied.
        got: usize,
    },
    /// A transaction or confirmation signature does not recover.
    #[error("bad signature for input {input}: {source}")]
    BadSignature {
        /// Input slot.
        input: usize,
        /// Underlying failure.
        #[source]
        source: SignatureError,
    },
    /// Confirmation signer is not the input owner.
    #[error("confirmation for input {input} signed by {confirmed}, input owner is {owner}")]
    SignerMismatch {
        /// Input slot.
        input: usize,
        /// Address recovered from the transaction signature.
        owner: Address,
        /// Address recovered from the confirmation signature.
        confirmed: Address,
    },
    /// Spending transaction does not reference the expected output.
    #[error("spending transaction does not reference the exiting output")]
    InputMismatch,
    /// Claimed output slot is unusable.
    #[error("output slot {0} is not spendable")]
    BadOutputIndex(u16),
}

/// Verifies inclusion and confirmation evidence against committed roots.
#[derive(Clone, Copy, Debug)]
pub struct ProofVerifier {
    depth: usize,
}

impl Default for ProofVerifier {
    fn default() -> Self {
        Self::new(DEFAULT_DEPTH)
    }
}

impl ProofVerifier {
    /// Create a verifier for trees of the given height.
    pub fn new(depth: usize) -> Self {
        Self { depth }
    }

    /// Tree height this verifier expects.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Check that `leaf` sits at `tx_index` under `root`.
    pub fn verify_inclusion(
        &self,
        leaf: &Hash32,
        tx_index: u32,
        root: &Hash32,
        proof: &[u8],
    ) -> Result<(), EvidenceError> {
        let proof = MerkleProof::from_bytes(tx_index as u64, proof, self.depth).ok_or(
            EvidenceError::MalformedProof {
                expected: self.depth * 32,
                got: proof.len(),
            },
        )?;

        if !proof.verify(root, leaf) {
            debug!(tx_index, "inclusion proof does not reach root");
            return Err(EvidenceError::NotIncluded);
        }

        Ok(())
    }

    /// Check that every input owner of `tx` confirmed `root`.
    ///
    /// The owner of input `i` is whoever produced transaction signature `i`;
    /// confirmation `i` must recover to the same address over the
    /// confirmation digest of (tx hash, root). A single-input transaction
    /// needs exactly one confirmation, a two-input transaction exactly two.
    /// Returns the confirmed input owners.
    pub fn verify_confirmation(
        &self,
        tx: &Transaction,
        root: &Hash32,
        tx_sigs: &TxSignatures,
        confirmations: &[Signature],
    ) -> Result<Vec<Address>, EvidenceError> {
        let tx_hash = tx.hash();
        let expected = tx.input_count();

        if confirmations.len() != expected || expected == 0 {
            return Err(EvidenceError::ConfirmationCount {
                expected,
                got: confirmations.len(),
            });
        }

        let digest = confirmation_hash(&tx_hash, root);
        let mut owners = Vec::with_capacity(expected);
        let used = (0..SLOTS).filter(|i| !tx.inputs[*i].is_empty());

        for (input, confirmation) in used.zip(confirmations) {
            let tx_sig = tx_sigs
                .get(input)
                .ok_or(EvidenceError::BadSignature {
                    input,
                    source: SignatureError::Empty,
                })?;
            let owner = tx_sig
                .recover(&tx_hash)
                .map_err(|source| EvidenceError::BadSignature { input, source })?;
            let confirmed = confirmation
                .recover(&digest)
                .map_err(|source| EvidenceError::BadSignature { input, source })?;

            if owner != confirmed {
                return Err(EvidenceError::SignerMismatch {
                    input,
                    owner,
                    confirmed,
                });
            }
            owners.push(owner);
        }

        Ok(owners)
    }

    /// Check that `signature` is `expected`'s confirmation of `root` for the
    /// transaction hashed to `tx_hash`.
    pub fn verify_confirmed_by(
        &self,
        tx_hash: &Hash32,
        root: &Hash32,
        signature: &Signature,
        expected: &Address,
    ) -> Result<(), EvidenceError> {
        let digest = confirmation_hash(tx_hash, root);
        let confirmed = signature
            .recover(&digest)
            .map_err(|source| EvidenceError::BadSignature { input: 0, source })?;

        if confirmed != *expected {
            return Err(EvidenceError::SignerMismatch {
                input: 0,
                owner: *expected,
                confirmed,
            });
        }
        Ok(())
    }
}
