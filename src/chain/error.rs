//! Exit game error taxonomy.
//!
//! Every variant is a synchronous rejection of the whole call: state is left
//! exactly as it was before the call.

use alloy_primitives::Address;
use thiserror::Error;

use crate::core::utxo::{UtxoId, UtxoIdError};
use crate::proof::verify::EvidenceError;

/// Rejections raised by root chain operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExitGameError {
    /// Operator-only action attempted by someone else.
    #[error("caller {caller} is not the operator")]
    Unauthorized {
        /// Rejected caller.
        caller: Address,
    },

    /// Caller does not own the referenced output.
    #[error("caller {caller} does not own output {utxo}")]
    Forbidden {
        /// Rejected caller.
        caller: Address,
        /// Output the caller tried to exit.
        utxo: UtxoId,
    },

    /// An exit slot already exists for this output.
    #[error("an exit already exists for {0}")]
    Conflict(UtxoId),

    /// Attached bond differs from the required exit bond.
    #[error("exit bond must be exactly {required}, got {paid}")]
    InsufficientBond {
        /// Required bond.
        required: u128,
        /// Attached value.
        paid: u128,
    },

    /// Claimed or attached amount does not match.
    #[error("amount mismatch: expected {expected}, got {claimed}")]
    BadAmount {
        /// Amount on record (or value attached).
        expected: u128,
        /// Amount claimed.
        claimed: u128,
    },

    /// Zero-value deposit or exit.
    #[error("amount must be non-zero")]
    ZeroAmount,

    /// Claimed token differs from the deposited token.
    #[error("token mismatch: deposited {expected}, claimed {claimed}")]
    WrongToken {
        /// Deposited token.
        expected: Address,
        /// Claimed token.
        claimed: Address,
    },

    /// Proof, transaction or signature evidence failed verification.
    #[error("bad evidence: {0}")]
    BadEvidence(#[from] EvidenceError),

    /// Target exit does not exist or is no longer live.
    #[error("no live exit for {0}")]
    NoSuchExit(UtxoId),

    /// Referenced block has not been committed.
    #[error("block {0} is not committed")]
    UnknownBlock(u64),

    /// Output is not the single output of a deposit block.
    #[error("{0} is not a deposit output")]
    NotDepositOutput(UtxoId),

    /// No deposit block numbers left before the next child block.
    #[error("deposit limit reached before child block {0}")]
    DepositLimitReached(u64),

    /// Payout would overdraw protocol custody.
    #[error("custody of token {token} holds {available}, payouts need {required}")]
    InsufficientCustody {
        /// Token being paid out.
        token: Address,
        /// Balance held.
        available: u128,
        /// Total owed.
        required: u128,
    },

    /// Identifier outside the codec's range.
    #[error("invalid utxo id: {0}")]
    InvalidUtxo(#[from] UtxoIdError),

    /// Balance arithmetic overflowed.
    #[error("balance overflow")]
    Overflow,
}
