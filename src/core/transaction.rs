//! Child-Chain Transactions
//!
//! The root chain only ever sees transactions as opaque bytes submitted with
//! an exit or a challenge. This module decodes those bytes into the fixed
//! two-input / two-output shape and exposes what the exit game inspects:
//! the outputs being claimed and the inputs being spent.

use alloy_primitives::Address;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::hash::{self, Hash32};
use crate::core::signature::{Signature, SignatureError, Signer};
use crate::core::utxo::{UtxoId, UtxoIdError};

/// Number of input and output slots in a transaction.
pub const SLOTS: usize = 2;

/// Transaction errors.
#[derive(Debug, Error)]
pub enum TransactionError {
    /// Bytes are not a valid encoding.
    #[error("transaction decode failed: {0}")]
    Decode(String),
    /// Slot index outside 0..2.
    #[error("slot index {0} out of range")]
    SlotOutOfRange(usize),
    /// Referenced input slot is empty.
    #[error("input slot {0} is empty")]
    EmptyInput(usize),
    /// Input does not form a valid utxo id.
    #[error("invalid input reference: {0}")]
    InvalidInput(#[from] UtxoIdError),
    /// Signing failed.
    #[error("signing failed: {0}")]
    Signing(#[from] SignatureError),
}

/// Reference to an output being spent. Block 0 marks an empty slot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInput {
    /// Block of the spent output.
    pub block_number: u64,
    /// Transaction index of the spent output.
    pub tx_index: u32,
    /// Output index of the spent output.
    pub output_index: u16,
}

impl TxInput {
    /// Spend the given output.
    pub fn spend(utxo: UtxoId) -> Self {
        Self {
            block_number: utxo.block_number,
            tx_index: utxo.tx_index,
            output_index: utxo.output_index,
        }
    }

    /// Is this slot empty?
    pub fn is_empty(&self) -> bool {
        self.block_number == 0
    }

    /// Id of the spent output.
    pub fn utxo_id(&self) -> Result<UtxoId, UtxoIdError> {
        UtxoId::new(self.block_number, self.tx_index, self.output_index)
    }
}

/// A newly created output.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    /// Owner of the output.
    pub owner: Address,
    /// Value carried by the output.
    pub amount: u128,
}

/// A child-chain transaction.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Spent outputs.
    pub inputs: [TxInput; SLOTS],
    /// Token moved by the transaction.
    pub token: Address,
    /// Created outputs.
    pub outputs: [TxOutput; SLOTS],
}

impl Transaction {
    /// Single-input, single-output transfer.
    pub fn transfer(input: UtxoId, token: Address, owner: Address, amount: u128) -> Self {
        Self {
            inputs: [TxInput::spend(input), TxInput::default()],
            token,
            outputs: [TxOutput { owner, amount }, TxOutput::default()],
        }
    }

    /// Encode to wire bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        bincode::serialize(self).expect("Transaction serialization should not fail")
    }

    /// Decode from wire bytes.
    ///
    /// Only the canonical encoding is accepted, so the hash of `data` always
    /// equals [`Transaction::hash`] of the result.
    pub fn from_bytes(data: &[u8]) -> Result<Self, TransactionError> {
        let tx: Self =
            bincode::deserialize(data).map_err(|e| TransactionError::Decode(e.to_string()))?;
        if tx.to_bytes() != data {
            return Err(TransactionError::Decode("non-canonical encoding".into()));
        }
        Ok(tx)
    }

    /// Hash of the encoded transaction.
    pub fn hash(&self) -> Hash32 {
        hash::tx_hash(&self.to_bytes())
    }

    /// Number of non-empty inputs.
    pub fn input_count(&self) -> usize {
        self.inputs.iter().filter(|i| !i.is_empty()).count()
    }

    /// Output at `index`.
    pub fn output(&self, index: usize) -> Result<&TxOutput, TransactionError> {
        self.outputs
            .get(index)
            .ok_or(TransactionError::SlotOutOfRange(index))
    }

    /// Utxo spent by input `index`.
    pub fn spent_utxo(&self, index: usize) -> Result<UtxoId, TransactionError> {
        let input = self
            .inputs
            .get(index)
            .ok_or(TransactionError::SlotOutOfRange(index))?;
        if input.is_empty() {
            return Err(TransactionError::EmptyInput(index));
        }
        Ok(input.utxo_id()?)
    }

    /// Sign with one signer per non-empty input.
    ///
    /// Empty input slots get [`Signature::EMPTY`].
    pub fn sign(&self, signers: [Option<&Signer>; SLOTS]) -> Result<TxSignatures, TransactionError> {
        let digest = self.hash();
        let mut sigs = [Signature::EMPTY; SLOTS];
        for (slot, signer) in signers.iter().enumerate() {
            if let Some(signer) = signer {
                sigs[slot] = signer.sign(&digest)?;
            }
        }
        Ok(TxSignatures::new(sigs[0], sigs[1]))
    }
}

/// The two transaction signatures committed in the Merkle leaf.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxSignatures {
    /// Signature of input 0's owner.
    pub first: Signature,
    /// Signature of input 1's owner (empty for single-input transactions).
    pub second: Signature,
}

impl TxSignatures {
    /// Build from both slots.
    pub fn new(first: Signature, second: Signature) -> Self {
        Self { first, second }
    }

    /// Signature for input `index`.
    pub fn get(&self, index: usize) -> Option<&Signature> {
        match index {
            0 => Some(&self.first),
            1 => Some(&self.second),
            _ => None,
        }
    }

    /// Merkle leaf for a transaction with these signatures.
    pub fn leaf(&self, tx_hash: &Hash32) -> Hash32 {
        hash::leaf_hash(tx_hash, self.first.as_bytes(), self.second.as_bytes())
    }
}
