//! Exit Registry
//!
//! Owns the exit record for every output that ever had an exit started,
//! plus one priority queue per token. Mutating operations are split in two:
//!
//! ```text
//!   check_*  (&self)      validate everything, build a plan, touch nothing
//!      │
//!      ▼
//!   register / apply_challenge / finalize  (&mut self)  apply the plan
//! ```
//!
//! so the controller can settle custody between the two steps and a
//! rejected call leaves no trace.
//!
//! A slot is never freed. Once an output has had an exit it can never get
//! another one, whether the first was challenged or paid out.

use std::collections::BTreeMap;

use alloy_primitives::Address;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::chain::blocks::BlockRegistry;
use crate::chain::call::CallContext;
use crate::chain::deposits::DepositLedger;
use crate::chain::error::ExitGameError;
use crate::chain::queue::{ExitPriority, ExitQueue};
use crate::chain::vault::{Payout, Vault, NATIVE_TOKEN};
use crate::core::signature::Signature;
use crate::core::transaction::{Transaction, TxSignatures};
use crate::core::utxo::UtxoId;
use crate::proof::verify::{EvidenceError, ProofVerifier};

/// How an exit was started.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitKind {
    /// Exit of a deposit output, authenticated by the deposit hash.
    Deposit,
    /// Exit of a child-chain output, authenticated by inclusion proof.
    Standard,
    /// Operator exit of accumulated fees.
    Fee,
}

impl ExitKind {
    fn tag(self) -> u8 {
        match self {
            Self::Deposit => 0,
            Self::Standard => 1,
            Self::Fee => 2,
        }
    }
}

/// Why an exit stopped being live.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Closure {
    /// Proven spent; the bond went to `challenger`.
    Challenged {
        /// Who proved the spend.
        challenger: Address,
    },
    /// Paid out.
    Finalized,
}

/// Lifecycle of an exit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitState {
    /// Waiting in the queue.
    Live {
        /// Receives the payout.
        owner: Address,
        /// Token of the exiting output.
        token: Address,
    },
    /// No longer payable.
    Closed(Closure),
}

/// An exit record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exit {
    /// How it was started.
    pub kind: ExitKind,
    /// Claimed amount (kept after closing).
    pub amount: u128,
    /// Bond posted by the exitor.
    pub bond: u128,
    /// Earliest finalization time.
    pub exitable_at: u64,
    /// Lifecycle state.
    pub state: ExitState,
}

impl Exit {
    /// Whether the exit can still be challenged or paid.
    pub fn is_live(&self) -> bool {
        matches!(self.state, ExitState::Live { .. })
    }

    /// Public view: owner and token read as zero once closed.
    pub fn view(&self) -> ExitView {
        let (owner, token) = match self.state {
            ExitState::Live { owner, token } => (owner, token),
            ExitState::Closed(_) => (Address::ZERO, Address::ZERO),
        };
        ExitView {
            owner,
            token,
            amount: self.amount,
        }
    }
}

/// What `exits(utxo)` reports.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitView {
    /// Live owner, or zero.
    pub owner: Address,
    /// Live token, or zero.
    pub token: Address,
    /// Claimed amount.
    pub amount: u128,
}

/// Signatures accompanying a standard exit.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitSignatures {
    /// Transaction signatures committed in the leaf.
    pub tx: TxSignatures,
    /// One confirmation per non-empty input, in input order.
    pub confirmations: Vec<Signature>,
}

/// Exit bond and challenge window.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExitRules {
    /// Exact bond every exit must attach.
    pub exit_bond: u128,
    /// Seconds between starting an exit and its eligibility.
    pub exit_period: u64,
}

/// A validated exit, ready to register.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExitClaim {
    /// Exiting output.
    pub utxo: UtxoId,
    /// How it was started.
    pub kind: ExitKind,
    /// Exitor.
    pub owner: Address,
    /// Token of the output.
    pub token: Address,
    /// Claimed amount.
    pub amount: u128,
    /// Attached bond.
    pub bond: u128,
    /// Earliest finalization time.
    pub exitable_at: u64,
}

impl ExitClaim {
    /// Queue key for this claim.
    pub fn priority(&self) -> ExitPriority {
        ExitPriority::new(self.exitable_at, self.utxo)
    }
}

/// A validated challenge, ready to apply.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChallengePlan {
    /// Exit being cancelled.
    pub exit: UtxoId,
    /// Its owner.
    pub owner: Address,
    /// Who receives the bond.
    pub challenger: Address,
    /// Bond forfeited.
    pub bond: u128,
}

impl ChallengePlan {
    /// Bond transfer to the challenger.
    pub fn reward(&self) -> Payout {
        Payout {
            recipient: self.challenger,
            token: NATIVE_TOKEN,
            amount: self.bond,
        }
    }
}

/// An exit closed by finalization.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalizedExit {
    /// Exited output.
    pub utxo: UtxoId,
    /// Paid owner.
    pub owner: Address,
    /// Token paid.
    pub token: Address,
    /// Amount paid.
    pub amount: u128,
    /// Bond returned.
    pub bond: u128,
}

impl FinalizedExit {
    /// Transfers owed to the owner. Bonds are always native.
    pub fn payouts(&self) -> Result<Vec<Payout>, ExitGameError> {
        if self.token == NATIVE_TOKEN {
            let total = self
                .amount
                .checked_add(self.bond)
                .ok_or(ExitGameError::Overflow)?;
            return Ok(vec![Payout {
                recipient: self.owner,
                token: NATIVE_TOKEN,
                amount: total,
            }]);
        }

        Ok(vec![
            Payout {
                recipient: self.owner,
                token: self.token,
                amount: self.amount,
            },
            Payout {
                recipient: self.owner,
                token: NATIVE_TOKEN,
                amount: self.bond,
            },
        ])
    }
}

/// Exit records and per-token queues.
#[derive(Clone, Debug)]
pub struct ExitRegistry {
    rules: ExitRules,
    exits: BTreeMap<UtxoId, Exit>,
    queues: BTreeMap<Address, ExitQueue>,
    next_fee_exit: u64,
}

impl ExitRegistry {
    /// Create an empty registry.
    pub fn new(rules: ExitRules) -> Self {
        Self {
            rules,
            exits: BTreeMap::new(),
            queues: BTreeMap::new(),
            next_fee_exit: 1,
        }
    }

    /// Bond and challenge window in force.
    pub fn rules(&self) -> &ExitRules {
        &self.rules
    }

    /// Exit record for `utxo`.
    pub fn get(&self, utxo: &UtxoId) -> Option<&Exit> {
        self.exits.get(utxo)
    }

    /// Public view of `utxo`'s exit; zero if none was ever started.
    pub fn view(&self, utxo: &UtxoId) -> ExitView {
        self.get(utxo).map(Exit::view).unwrap_or_default()
    }

    /// Counter the next fee exit will use.
    pub fn current_fee_exit(&self) -> u64 {
        self.next_fee_exit
    }

    /// Queue for `token`.
    pub fn queue(&self, token: &Address) -> Option<&ExitQueue> {
        self.queues.get(token)
    }

    /// Head of `token`'s queue.
    pub fn next_exit(&self, token: &Address) -> Option<ExitPriority> {
        self.queue(token).and_then(|q| q.peek().copied())
    }

    /// Tokens with a queue, ascending.
    pub fn tokens(&self) -> Vec<Address> {
        self.queues.keys().copied().collect()
    }

    /// Exit records in utxo order.
    pub fn iter(&self) -> impl Iterator<Item = (&UtxoId, &Exit)> {
        self.exits.iter()
    }

    /// Non-empty queues in token order.
    pub fn queues(&self) -> impl Iterator<Item = (&Address, &ExitQueue)> {
        self.queues.iter().filter(|(_, q)| !q.is_empty())
    }

    fn check_bond(&self, paid: u128) -> Result<(), ExitGameError> {
        if paid != self.rules.exit_bond {
            return Err(ExitGameError::InsufficientBond {
                required: self.rules.exit_bond,
                paid,
            });
        }
        Ok(())
    }

    fn ensure_vacant(&self, utxo: UtxoId) -> Result<(), ExitGameError> {
        if self.exits.contains_key(&utxo) {
            return Err(ExitGameError::Conflict(utxo));
        }
        Ok(())
    }

    fn exitable_at(&self, now: u64, extra: u64) -> Result<u64, ExitGameError> {
        now.checked_add(self.rules.exit_period)
            .and_then(|t| t.checked_add(extra))
            .ok_or(ExitGameError::Overflow)
    }

    /// Validate a deposit exit by `ctx.sender`.
    pub fn check_deposit_exit(
        &self,
        ctx: &CallContext,
        blocks: &BlockRegistry,
        deposits: &DepositLedger,
        utxo: UtxoId,
        token: Address,
        amount: u128,
    ) -> Result<ExitClaim, ExitGameError> {
        self.check_bond(ctx.value)?;
        if amount == 0 {
            return Err(ExitGameError::ZeroAmount);
        }
        self.ensure_vacant(utxo)?;
        deposits.authenticate(blocks, utxo, &ctx.sender, &token, amount)?;

        Ok(ExitClaim {
            utxo,
            kind: ExitKind::Deposit,
            owner: ctx.sender,
            token,
            amount,
            bond: ctx.value,
            exitable_at: self.exitable_at(ctx.timestamp, 0)?,
        })
    }

    /// Validate an operator fee exit.
    ///
    /// Fee exits sort one second behind any ordinary exit started at the
    /// same moment.
    pub fn check_fee_exit(
        &self,
        ctx: &CallContext,
        operator: &Address,
        token: Address,
        amount: u128,
    ) -> Result<ExitClaim, ExitGameError> {
        if ctx.sender != *operator {
            return Err(ExitGameError::Unauthorized { caller: ctx.sender });
        }
        self.check_bond(ctx.value)?;
        if amount == 0 {
            return Err(ExitGameError::ZeroAmount);
        }
        let utxo = UtxoId::fee(self.next_fee_exit)?;
        self.ensure_vacant(utxo)?;

        Ok(ExitClaim {
            utxo,
            kind: ExitKind::Fee,
            owner: ctx.sender,
            token,
            amount,
            bond: ctx.value,
            exitable_at: self.exitable_at(ctx.timestamp, 1)?,
        })
    }

    /// Validate a standard exit of a child-chain output.
    #[allow(clippy::too_many_arguments)]
    pub fn check_standard_exit(
        &self,
        ctx: &CallContext,
        blocks: &BlockRegistry,
        verifier: &ProofVerifier,
        utxo: UtxoId,
        tx_bytes: &[u8],
        proof: &[u8],
        signatures: &ExitSignatures,
    ) -> Result<ExitClaim, ExitGameError> {
        self.check_bond(ctx.value)?;
        self.ensure_vacant(utxo)?;

        let block = blocks
            .committed(utxo.block_number)
            .ok_or(ExitGameError::UnknownBlock(utxo.block_number))?;
        let tx = Transaction::from_bytes(tx_bytes)
            .map_err(|e| EvidenceError::MalformedTransaction(e.to_string()))?;

        let output = *tx
            .output(utxo.output_index as usize)
            .map_err(|_| EvidenceError::BadOutputIndex(utxo.output_index))?;
        if output.owner != ctx.sender {
            return Err(ExitGameError::Forbidden {
                caller: ctx.sender,
                utxo,
            });
        }
        if output.amount == 0 {
            return Err(ExitGameError::ZeroAmount);
        }

        let leaf = signatures.tx.leaf(&tx.hash());
        verifier.verify_inclusion(&leaf, utxo.tx_index, &block.root, proof)?;
        verifier.verify_confirmation(&tx, &block.root, &signatures.tx, &signatures.confirmations)?;

        Ok(ExitClaim {
            utxo,
            kind: ExitKind::Standard,
            owner: ctx.sender,
            token: tx.token,
            amount: output.amount,
            bond: ctx.value,
            exitable_at: self.exitable_at(ctx.timestamp, 0)?,
        })
    }

    /// Record a validated claim and queue it.
    pub fn register(&mut self, claim: ExitClaim) -> ExitPriority {
        let priority = claim.priority();
        self.exits.insert(
            claim.utxo,
            Exit {
                kind: claim.kind,
                amount: claim.amount,
                bond: claim.bond,
                exitable_at: claim.exitable_at,
                state: ExitState::Live {
                    owner: claim.owner,
                    token: claim.token,
                },
            },
        );
        self.queues.entry(claim.token).or_default().insert(priority);
        if claim.kind == ExitKind::Fee {
            self.next_fee_exit += 1;
        }

        info!(
            "Exit started on {} ({:?}) for {} of token {}, exitable at {}",
            claim.utxo, claim.kind, claim.amount, claim.token, claim.exitable_at
        );
        priority
    }

    /// Validate a challenge.
    ///
    /// `challenging` locates the spending transaction (its output index is
    /// ignored). Input `input_index` of that transaction names the exit
    /// under attack, and `confirmation` must be the exit owner's
    /// confirmation of the block that includes the spend.
    #[allow(clippy::too_many_arguments)]
    pub fn check_challenge(
        &self,
        ctx: &CallContext,
        blocks: &BlockRegistry,
        verifier: &ProofVerifier,
        challenging: UtxoId,
        input_index: u8,
        tx_bytes: &[u8],
        proof: &[u8],
        tx_signatures: &TxSignatures,
        confirmation: &Signature,
    ) -> Result<ChallengePlan, ExitGameError> {
        let tx = Transaction::from_bytes(tx_bytes)
            .map_err(|e| EvidenceError::MalformedTransaction(e.to_string()))?;
        let target = tx
            .spent_utxo(input_index as usize)
            .map_err(|_| EvidenceError::InputMismatch)?;

        let exit = self
            .exits
            .get(&target)
            .ok_or(ExitGameError::NoSuchExit(target))?;
        let owner = match exit.state {
            ExitState::Live { owner, .. } => owner,
            ExitState::Closed(_) => return Err(ExitGameError::NoSuchExit(target)),
        };

        let block = blocks
            .committed(challenging.block_number)
            .ok_or(EvidenceError::MissingRoot(challenging.block_number))?;
        let tx_hash = tx.hash();
        verifier.verify_confirmed_by(&tx_hash, &block.root, confirmation, &owner)?;
        verifier.verify_inclusion(
            &tx_signatures.leaf(&tx_hash),
            challenging.tx_index,
            &block.root,
            proof,
        )?;

        Ok(ChallengePlan {
            exit: target,
            owner,
            challenger: ctx.sender,
            bond: exit.bond,
        })
    }

    /// Close the challenged exit. Its queue entry is discarded lazily.
    pub fn apply_challenge(&mut self, plan: &ChallengePlan) {
        if let Some(exit) = self.exits.get_mut(&plan.exit) {
            exit.state = ExitState::Closed(Closure::Challenged {
                challenger: plan.challenger,
            });
            info!("Exit on {} challenged by {}", plan.exit, plan.challenger);
        }
    }

    /// Pay out live exits in `tokens` eligible at `now`, in queue order.
    ///
    /// Closed entries reaching the head are dropped without payout. Each
    /// token's queue stops at the first exit custody cannot cover; that exit
    /// stays at the head and later tokens are still processed.
    pub fn finalize(
        &mut self,
        tokens: &[Address],
        now: u64,
        vault: &mut Vault,
    ) -> Vec<FinalizedExit> {
        let mut finalized = Vec::new();

        for token in tokens {
            let Some(queue) = self.queues.get_mut(token) else {
                continue;
            };
            while let Some(head) = queue.peek().copied() {
                if !head.is_due(now) {
                    break;
                }
                let utxo = head.utxo();
                let Some(exit) = self.exits.get_mut(&utxo) else {
                    queue.pop();
                    continue;
                };
                let ExitState::Live { owner, token: paid } = exit.state else {
                    debug!("Dropping closed exit {} from queue", utxo);
                    queue.pop();
                    continue;
                };

                let done = FinalizedExit {
                    utxo,
                    owner,
                    token: paid,
                    amount: exit.amount,
                    bond: exit.bond,
                };
                if let Err(e) = done.payouts().and_then(|p| vault.pay(&p)) {
                    warn!("Exit on {} stalled at the head of {}: {}", utxo, token, e);
                    break;
                }

                queue.pop();
                exit.state = ExitState::Closed(Closure::Finalized);
                info!(
                    "Exit on {} finalized: {} of token {} to {}",
                    utxo, done.amount, done.token, done.owner
                );
                finalized.push(done);
            }
        }
        finalized
    }
}

/// Stable one-byte tags used when hashing exit state.
pub(crate) fn state_tag(exit: &Exit) -> (u8, u8) {
    let state = match exit.state {
        ExitState::Live { .. } => 0,
        ExitState::Closed(Closure::Challenged { .. }) => 1,
        ExitState::Closed(Closure::Finalized) => 2,
    };
    (exit.kind.tag(), state)
}
