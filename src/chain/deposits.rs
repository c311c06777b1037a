//! Deposit Ledger
//!
//! A deposit mints a synthetic one-output transaction and commits its hash
//! as the root of its own block. The hash is the whole commitment: a
//! deposit exit authenticates by recomputing it from the claimant's
//! address, so no Merkle proof is needed.

use std::collections::BTreeMap;

use alloy_primitives::Address;
use serde::{Deserialize, Serialize};

use crate::chain::blocks::BlockRegistry;
use crate::chain::error::ExitGameError;
use crate::core::hash::deposit_hash;
use crate::core::utxo::UtxoId;

/// What was deposited into a deposit block.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositRecord {
    /// Address that deposited (and owns the output).
    pub depositor: Address,
    /// Deposited token.
    pub token: Address,
    /// Deposited amount.
    pub amount: u128,
}

/// Deposits indexed by their block number.
#[derive(Clone, Debug, Default)]
pub struct DepositLedger {
    records: BTreeMap<u64, DepositRecord>,
}

impl DepositLedger {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a deposit and commit its hash as a new deposit block.
    pub fn deposit(
        &mut self,
        blocks: &mut BlockRegistry,
        depositor: Address,
        token: Address,
        amount: u128,
        timestamp: u64,
    ) -> Result<u64, ExitGameError> {
        if amount == 0 {
            return Err(ExitGameError::ZeroAmount);
        }

        let root = deposit_hash(&depositor, &token, amount);
        let block_number = blocks.record_deposit(root, timestamp)?;
        self.records.insert(
            block_number,
            DepositRecord {
                depositor,
                token,
                amount,
            },
        );
        Ok(block_number)
    }

    /// Deposit recorded in `block_number`.
    pub fn get(&self, block_number: u64) -> Option<&DepositRecord> {
        self.records.get(&block_number)
    }

    /// Check that `caller` may exit deposit output `utxo` claiming
    /// (`token`, `amount`).
    ///
    /// The final word is the committed hash: it must equal
    /// `deposit_hash(caller, token, amount)`.
    pub fn authenticate(
        &self,
        blocks: &BlockRegistry,
        utxo: UtxoId,
        caller: &Address,
        token: &Address,
        amount: u128,
    ) -> Result<&DepositRecord, ExitGameError> {
        if utxo != UtxoId::deposit(utxo.block_number)
            || !blocks.is_deposit_block(utxo.block_number)
        {
            return Err(ExitGameError::NotDepositOutput(utxo));
        }

        let block = blocks
            .committed(utxo.block_number)
            .ok_or(ExitGameError::UnknownBlock(utxo.block_number))?;
        let record = self
            .get(utxo.block_number)
            .ok_or(ExitGameError::UnknownBlock(utxo.block_number))?;

        if record.depositor != *caller {
            return Err(ExitGameError::Forbidden {
                caller: *caller,
                utxo,
            });
        }
        if record.token != *token {
            return Err(ExitGameError::WrongToken {
                expected: record.token,
                claimed: *token,
            });
        }
        if record.amount != amount {
            return Err(ExitGameError::BadAmount {
                expected: record.amount,
                claimed: amount,
            });
        }
        if block.root != deposit_hash(caller, token, amount) {
            return Err(ExitGameError::Forbidden {
                caller: *caller,
                utxo,
            });
        }

        Ok(record)
    }

    /// Deposits in block-number order.
    pub fn iter(&self) -> impl Iterator<Item = (&u64, &DepositRecord)> {
        self.records.iter()
    }
}
