//! UTXO Identity Codec
//!
//! Every spendable output is addressed by a flat integer derived from its
//! coordinates instead of by reference:
//!
//! ```text
//! utxo = block_number * 1_000_000_000 + tx_index * 10_000 + output_index
//! ```
//!
//! The packed form gives O(1) map lookups and a total order that the exit
//! queue uses as its tie-break. Block 0 is never committed, so its id space
//! is free for fee-exit pseudo-outputs.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Multiplier for the block-number part of a packed id.
pub const BLOCK_OFFSET: u128 = 1_000_000_000;

/// Multiplier for the transaction-index part of a packed id.
pub const TX_OFFSET: u128 = 10_000;

/// Exclusive upper bound for a transaction index.
pub const MAX_TX_INDEX: u32 = (BLOCK_OFFSET / TX_OFFSET) as u32;

/// Exclusive upper bound for an output index.
pub const MAX_OUTPUT_INDEX: u16 = TX_OFFSET as u16;

/// Codec errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UtxoIdError {
    /// Transaction index does not fit its field.
    #[error("tx index {0} out of range (max {max})", max = MAX_TX_INDEX - 1)]
    TxIndexOutOfRange(u32),
    /// Output index does not fit its field.
    #[error("output index {0} out of range (max {max})", max = MAX_OUTPUT_INDEX - 1)]
    OutputIndexOutOfRange(u16),
    /// Packed value has a block part wider than 64 bits.
    #[error("packed utxo id {0} has an out-of-range block number")]
    BlockOutOfRange(u128),
    /// Fee exit counter reached the first real block.
    #[error("fee exit counter {0} exhausted the fee id space")]
    FeeSpaceExhausted(u64),
}

/// Canonical identity of a spendable output.
///
/// Field order matches the packing order, so the derived `Ord` agrees with
/// the order of [`UtxoId::encode`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UtxoId {
    /// Block that contains the creating transaction.
    pub block_number: u64,
    /// Position of the transaction within its block.
    pub tx_index: u32,
    /// Output slot within the transaction.
    pub output_index: u16,
}

impl UtxoId {
    /// Create an id, validating field widths.
    pub fn new(block_number: u64, tx_index: u32, output_index: u16) -> Result<Self, UtxoIdError> {
        if tx_index >= MAX_TX_INDEX {
            return Err(UtxoIdError::TxIndexOutOfRange(tx_index));
        }
        if output_index >= MAX_OUTPUT_INDEX {
            return Err(UtxoIdError::OutputIndexOutOfRange(output_index));
        }
        Ok(Self {
            block_number,
            tx_index,
            output_index,
        })
    }

    /// The single output of a deposit block.
    pub const fn deposit(block_number: u64) -> Self {
        Self {
            block_number,
            tx_index: 0,
            output_index: 0,
        }
    }

    /// Pseudo-id for the `counter`-th fee exit (lives in block 0).
    pub fn fee(counter: u64) -> Result<Self, UtxoIdError> {
        if counter as u128 >= BLOCK_OFFSET {
            return Err(UtxoIdError::FeeSpaceExhausted(counter));
        }
        Self::decode(counter as u128)
    }

    /// Pack into a single integer.
    #[inline]
    pub fn encode(&self) -> u128 {
        self.block_number as u128 * BLOCK_OFFSET
            + self.tx_index as u128 * TX_OFFSET
            + self.output_index as u128
    }

    /// Unpack from a single integer. Exact inverse of [`UtxoId::encode`].
    pub fn decode(packed: u128) -> Result<Self, UtxoIdError> {
        let block = packed / BLOCK_OFFSET;
        let block_number =
            u64::try_from(block).map_err(|_| UtxoIdError::BlockOutOfRange(packed))?;
        let rest = packed % BLOCK_OFFSET;
        Ok(Self {
            block_number,
            tx_index: (rest / TX_OFFSET) as u32,
            output_index: (rest % TX_OFFSET) as u16,
        })
    }

    /// Is this a fee-exit pseudo-id?
    pub fn is_fee(&self) -> bool {
        self.block_number == 0
    }
}

impl fmt::Display for UtxoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.block_number, self.tx_index, self.output_index
        )
    }
}

impl From<UtxoId> for u128 {
    fn from(id: UtxoId) -> Self {
        id.encode()
    }
}

impl TryFrom<u128> for UtxoId {
    type Error = UtxoIdError;

    fn try_from(packed: u128) -> Result<Self, Self::Error> {
        Self::decode(packed)
    }
}
