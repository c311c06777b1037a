//! Call log and replay.
//!
//! Every state transition is an explicit [`RootChainCall`] carrying its
//! [`CallContext`], so a run can be journaled as JSON and replayed into an
//! identical state. Replays are checked with [`RootChain::state_hash`].

use alloy_primitives::Address;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::chain::error::ExitGameError;
use crate::chain::events::RootChainEvent;
use crate::chain::exits::ExitSignatures;
use crate::chain::root_chain::RootChain;
use crate::chain::vault::Payout;
use crate::config::{ConfigError, RootChainConfig};
use crate::core::hash::Hash32;
use crate::core::signature::Signature;
use crate::core::transaction::TxSignatures;
use crate::core::utxo::UtxoId;

/// Who is calling, what value they attach, and when.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallContext {
    /// Caller address.
    pub sender: Address,
    /// Native value attached to the call.
    pub value: u128,
    /// Unix time the call executes at.
    pub timestamp: u64,
}

impl CallContext {
    /// Context with no attached value.
    pub fn new(sender: Address, timestamp: u64) -> Self {
        Self {
            sender,
            value: 0,
            timestamp,
        }
    }

    /// Attach `value`.
    pub fn with_value(mut self, value: u128) -> Self {
        self.value = value;
        self
    }
}

/// A state-changing root chain call.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RootChainCall {
    /// Move `amount` of `token` into custody as a new deposit block.
    Deposit {
        /// Depositor and attached value.
        ctx: CallContext,
        /// Deposited token.
        token: Address,
        /// Deposited amount.
        amount: u128,
    },
    /// Operator commits a child-chain block root.
    SubmitBlock {
        /// Must come from the operator.
        ctx: CallContext,
        /// Merkle root of the block's transactions.
        root: Hash32,
    },
    /// Exit a deposit output.
    StartDepositExit {
        /// Depositor with the exit bond attached.
        ctx: CallContext,
        /// Deposit output.
        utxo: UtxoId,
        /// Token deposited.
        token: Address,
        /// Amount deposited.
        amount: u128,
    },
    /// Operator exits accumulated fees.
    StartFeeExit {
        /// Operator with the exit bond attached.
        ctx: CallContext,
        /// Fee token.
        token: Address,
        /// Fee amount claimed.
        amount: u128,
    },
    /// Exit a child-chain output with inclusion evidence.
    StartExit {
        /// Output owner with the exit bond attached.
        ctx: CallContext,
        /// Exiting output.
        utxo: UtxoId,
        /// Canonical transaction bytes.
        tx_bytes: Vec<u8>,
        /// Merkle proof of the transaction's leaf.
        proof: Vec<u8>,
        /// Transaction signatures and input confirmations.
        signatures: ExitSignatures,
    },
    /// Prove an exiting output was spent.
    ChallengeExit {
        /// Challenger, who receives the bond.
        ctx: CallContext,
        /// Position of the spending transaction.
        challenging: UtxoId,
        /// Input of the spend that references the exit.
        input_index: u8,
        /// Canonical spending transaction bytes.
        tx_bytes: Vec<u8>,
        /// Merkle proof of the spend's leaf.
        proof: Vec<u8>,
        /// Signatures committed in the spend's leaf.
        signatures: TxSignatures,
        /// Exit owner's confirmation of the spend.
        confirmation: Signature,
    },
    /// Pay due exits in every token.
    FinalizeExits {
        /// Any caller.
        ctx: CallContext,
    },
    /// Pay due exits in one token.
    FinalizeTokenExits {
        /// Any caller.
        ctx: CallContext,
        /// Queue to finalize.
        token: Address,
    },
}

impl RootChainCall {
    /// Context the call runs under.
    pub fn context(&self) -> &CallContext {
        match self {
            Self::Deposit { ctx, .. }
            | Self::SubmitBlock { ctx, .. }
            | Self::StartDepositExit { ctx, .. }
            | Self::StartFeeExit { ctx, .. }
            | Self::StartExit { ctx, .. }
            | Self::ChallengeExit { ctx, .. }
            | Self::FinalizeExits { ctx }
            | Self::FinalizeTokenExits { ctx, .. } => ctx,
        }
    }

    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Deposit { .. } => "deposit",
            Self::SubmitBlock { .. } => "submit_block",
            Self::StartDepositExit { .. } => "start_deposit_exit",
            Self::StartFeeExit { .. } => "start_fee_exit",
            Self::StartExit { .. } => "start_exit",
            Self::ChallengeExit { .. } => "challenge_exit",
            Self::FinalizeExits { .. } => "finalize_exits",
            Self::FinalizeTokenExits { .. } => "finalize_token_exits",
        }
    }
}

/// What a successful call produced.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallOutcome {
    /// Number of the committed block.
    Block(u64),
    /// Output whose exit was started.
    ExitStarted(UtxoId),
    /// Bond paid to the challenger.
    Challenged(Payout),
    /// Transfers made by finalization.
    Finalized(Vec<Payout>),
}

/// Result of replaying a call log.
#[derive(Debug)]
pub struct ReplayResult {
    /// State after the last call.
    pub chain: RootChain,
    /// Per-call outcome, in order.
    pub outcomes: Vec<Result<CallOutcome, ExitGameError>>,
    /// Every event emitted, in order.
    pub events: Vec<RootChainEvent>,
}

impl ReplayResult {
    /// Number of rejected calls.
    pub fn rejected(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_err()).count()
    }
}

/// Apply `calls` to a fresh root chain.
///
/// Rejected calls are recorded and skipped, exactly as they were when the
/// log was produced.
pub fn replay(config: RootChainConfig, calls: &[RootChainCall]) -> Result<ReplayResult, ConfigError> {
    let mut chain = RootChain::new(config)?;
    let mut outcomes = Vec::with_capacity(calls.len());

    for call in calls {
        let outcome = chain.apply(call);
        if let Err(e) = &outcome {
            debug!("Replayed {} rejected: {}", call.name(), e);
        }
        outcomes.push(outcome);
    }

    let events = chain.drain_events();
    info!(
        "Replayed {} calls, {} events, state 0x{}",
        calls.len(),
        events.len(),
        hex::encode(chain.state_hash())
    );

    Ok(ReplayResult {
        chain,
        outcomes,
        events,
    })
}
