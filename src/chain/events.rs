//! Root Chain Events
//!
//! Emitted by every successful state transition, in call order, for
//! observers and journals.

use std::fmt;

use alloy_primitives::Address;
use serde::{Deserialize, Serialize};

use crate::chain::exits::ExitKind;
use crate::core::hash::Hash32;
use crate::core::utxo::UtxoId;

/// Render a unix timestamp for logs.
pub fn format_timestamp(timestamp: u64) -> String {
    i64::try_from(timestamp)
        .ok()
        .and_then(|secs| chrono::DateTime::from_timestamp(secs, 0))
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| timestamp.to_string())
}

/// Observable state changes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RootChainEvent {
    /// Funds entered custody and a deposit block was committed.
    Deposit {
        /// Depositing address.
        depositor: Address,
        /// Deposit block number.
        block_number: u64,
        /// Deposited token.
        token: Address,
        /// Deposited amount.
        amount: u128,
    },

    /// Operator committed a child-chain block.
    BlockSubmitted {
        /// Assigned block number.
        block_number: u64,
        /// Committed root.
        root: Hash32,
        /// Commit time.
        timestamp: u64,
    },

    /// An exit entered the queue.
    ExitStarted {
        /// Who started it.
        exitor: Address,
        /// Exiting output.
        utxo: UtxoId,
        /// How it was started.
        kind: ExitKind,
        /// Token of the output.
        token: Address,
        /// Claimed amount.
        amount: u128,
        /// Earliest finalization time.
        exitable_at: u64,
    },

    /// A live exit was proven spent.
    ExitChallenged {
        /// Cancelled exit.
        utxo: UtxoId,
        /// Bond recipient.
        challenger: Address,
        /// Forfeited bond.
        bond: u128,
    },

    /// A live exit was paid out.
    ExitFinalized {
        /// Paid exit.
        utxo: UtxoId,
        /// Recipient.
        owner: Address,
        /// Token paid.
        token: Address,
        /// Amount paid, bond excluded.
        amount: u128,
    },
}

impl RootChainEvent {
    /// Output the event concerns, if any.
    pub fn utxo(&self) -> Option<UtxoId> {
        match self {
            Self::Deposit { block_number, .. } => Some(UtxoId::deposit(*block_number)),
            Self::BlockSubmitted { .. } => None,
            Self::ExitStarted { utxo, .. }
            | Self::ExitChallenged { utxo, .. }
            | Self::ExitFinalized { utxo, .. } => Some(*utxo),
        }
    }
}

impl fmt::Display for RootChainEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Deposit {
                depositor,
                block_number,
                token,
                amount,
            } => write!(
                f,
                "deposit of {amount} (token {token}) by {depositor} in block {block_number}"
            ),
            Self::BlockSubmitted {
                block_number,
                root,
                timestamp,
            } => write!(
                f,
                "block {block_number} submitted with root 0x{}.. at {}",
                hex::encode(&root[..8]),
                format_timestamp(*timestamp)
            ),
            Self::ExitStarted {
                exitor,
                utxo,
                kind,
                amount,
                exitable_at,
                ..
            } => write!(
                f,
                "{kind:?} exit on {utxo} by {exitor} for {amount}, exitable {}",
                format_timestamp(*exitable_at)
            ),
            Self::ExitChallenged {
                utxo,
                challenger,
                bond,
            } => write!(f, "exit on {utxo} challenged by {challenger}, bond {bond}"),
            Self::ExitFinalized {
                utxo,
                owner,
                token,
                amount,
            } => write!(f, "exit on {utxo} paid {amount} (token {token}) to {owner}"),
        }
    }
}
