//! Exit Game Controller
//!
//! The single entry point for every state transition. Each operation
//! validates completely before it mutates anything:
//!
//! ```text
//!   call ──► check (registries, verifier) ──► settle custody ──► commit ──► event
//!               │ any failure
//!               └──────────► Err, state untouched
//! ```
//!
//! Callers serialize access (`&mut self`); the async service does so with a
//! single lock.

use alloy_primitives::Address;
use tracing::{info, warn};

use crate::chain::blocks::{BlockRegistry, PlasmaBlock};
use crate::chain::call::{CallContext, CallOutcome, RootChainCall};
use crate::chain::deposits::DepositLedger;
use crate::chain::error::ExitGameError;
use crate::chain::events::{format_timestamp, RootChainEvent};
use crate::chain::exits::{
    state_tag, Closure, Exit, ExitClaim, ExitRegistry, ExitRules, ExitSignatures, ExitState,
    ExitView, FinalizedExit,
};
use crate::chain::queue::ExitPriority;
use crate::chain::vault::{Payout, Vault, NATIVE_TOKEN};
use crate::config::{ConfigError, RootChainConfig};
use crate::core::hash::{ChainHasher, Hash32};
use crate::core::signature::Signature;
use crate::core::transaction::TxSignatures;
use crate::core::utxo::UtxoId;
use crate::proof::verify::ProofVerifier;

/// Root chain state and the operations that change it.
#[derive(Debug)]
pub struct RootChain {
    config: RootChainConfig,
    verifier: ProofVerifier,
    blocks: BlockRegistry,
    deposits: DepositLedger,
    exits: ExitRegistry,
    vault: Vault,
    events: Vec<RootChainEvent>,
}

impl RootChain {
    /// Create an empty root chain.
    pub fn new(config: RootChainConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        info!(
            "Root chain up: operator {}, bond {}, exit period {}s, interval {}",
            config.operator, config.exit_bond, config.exit_period, config.child_block_interval
        );

        Ok(Self {
            verifier: ProofVerifier::new(config.merkle_depth),
            blocks: BlockRegistry::new(config.child_block_interval),
            deposits: DepositLedger::new(),
            exits: ExitRegistry::new(ExitRules {
                exit_bond: config.exit_bond,
                exit_period: config.exit_period,
            }),
            vault: Vault::new(),
            events: Vec::new(),
            config,
        })
    }

    /// Parameters in force.
    pub fn config(&self) -> &RootChainConfig {
        &self.config
    }

    // =========================================================================
    // Blocks and deposits
    // =========================================================================

    /// Take `amount` of `token` into custody and commit a deposit block.
    pub fn deposit(
        &mut self,
        ctx: &CallContext,
        token: Address,
        amount: u128,
    ) -> Result<u64, ExitGameError> {
        if ctx.value != amount {
            return Err(ExitGameError::BadAmount {
                expected: ctx.value,
                claimed: amount,
            });
        }
        self.vault.checked_credit(&token, amount)?;

        let block_number =
            self.deposits
                .deposit(&mut self.blocks, ctx.sender, token, amount, ctx.timestamp)?;
        self.vault.credit(token, amount)?;

        info!(
            "Deposit of {} (token {}) by {} in block {}",
            amount, token, ctx.sender, block_number
        );
        self.events.push(RootChainEvent::Deposit {
            depositor: ctx.sender,
            block_number,
            token,
            amount,
        });
        Ok(block_number)
    }

    /// Commit an operator block root.
    pub fn submit_block(&mut self, ctx: &CallContext, root: Hash32) -> Result<u64, ExitGameError> {
        let block_number =
            self.blocks
                .record_submission(&ctx.sender, &self.config.operator, root, ctx.timestamp)?;

        info!(
            "Block {} submitted at {} (root 0x{})",
            block_number,
            format_timestamp(ctx.timestamp),
            hex::encode(root)
        );
        self.events.push(RootChainEvent::BlockSubmitted {
            block_number,
            root,
            timestamp: ctx.timestamp,
        });
        Ok(block_number)
    }

    // =========================================================================
    // Exits
    // =========================================================================

    /// Start an exit of a deposit output.
    pub fn start_deposit_exit(
        &mut self,
        ctx: &CallContext,
        utxo: UtxoId,
        token: Address,
        amount: u128,
    ) -> Result<ExitPriority, ExitGameError> {
        let claim = self
            .exits
            .check_deposit_exit(ctx, &self.blocks, &self.deposits, utxo, token, amount)?;
        self.commit_exit(claim)
    }

    /// Start an operator fee exit.
    pub fn start_fee_exit(
        &mut self,
        ctx: &CallContext,
        token: Address,
        amount: u128,
    ) -> Result<ExitPriority, ExitGameError> {
        let claim = self
            .exits
            .check_fee_exit(ctx, &self.config.operator, token, amount)?;
        self.commit_exit(claim)
    }

    /// Start an exit of an output created in an operator block.
    pub fn start_exit(
        &mut self,
        ctx: &CallContext,
        utxo: UtxoId,
        tx_bytes: &[u8],
        proof: &[u8],
        signatures: &ExitSignatures,
    ) -> Result<ExitPriority, ExitGameError> {
        let claim = self.exits.check_standard_exit(
            ctx,
            &self.blocks,
            &self.verifier,
            utxo,
            tx_bytes,
            proof,
            signatures,
        )?;
        self.commit_exit(claim)
    }

    fn commit_exit(&mut self, claim: ExitClaim) -> Result<ExitPriority, ExitGameError> {
        self.vault.credit(NATIVE_TOKEN, claim.bond)?;
        let priority = self.exits.register(claim);

        self.events.push(RootChainEvent::ExitStarted {
            exitor: claim.owner,
            utxo: claim.utxo,
            kind: claim.kind,
            token: claim.token,
            amount: claim.amount,
            exitable_at: claim.exitable_at,
        });
        Ok(priority)
    }

    /// Cancel a live exit by proving its output was spent.
    ///
    /// Returns the bond transfer made to the challenger.
    #[allow(clippy::too_many_arguments)]
    pub fn challenge_exit(
        &mut self,
        ctx: &CallContext,
        challenging: UtxoId,
        input_index: u8,
        tx_bytes: &[u8],
        proof: &[u8],
        signatures: &TxSignatures,
        confirmation: &Signature,
    ) -> Result<Payout, ExitGameError> {
        let plan = self.exits.check_challenge(
            ctx,
            &self.blocks,
            &self.verifier,
            challenging,
            input_index,
            tx_bytes,
            proof,
            signatures,
            confirmation,
        )?;
        let reward = plan.reward();
        self.vault.pay(&[reward])?;
        self.exits.apply_challenge(&plan);

        self.events.push(RootChainEvent::ExitChallenged {
            utxo: plan.exit,
            challenger: plan.challenger,
            bond: plan.bond,
        });
        Ok(reward)
    }

    /// Pay out every due exit across all token queues.
    pub fn finalize_exits(&mut self, ctx: &CallContext) -> Result<Vec<Payout>, ExitGameError> {
        let tokens = self.exits.tokens();
        self.finalize(&tokens, ctx.timestamp)
    }

    /// Pay out every due exit in `token`'s queue.
    pub fn finalize_token_exits(
        &mut self,
        ctx: &CallContext,
        token: Address,
    ) -> Result<Vec<Payout>, ExitGameError> {
        self.finalize(&[token], ctx.timestamp)
    }

    fn finalize(&mut self, tokens: &[Address], now: u64) -> Result<Vec<Payout>, ExitGameError> {
        let finalized = self.exits.finalize(tokens, now, &mut self.vault);

        let mut payouts = Vec::new();
        for done in &finalized {
            payouts.extend(done.payouts()?);
            self.events.push(finalized_event(done));
        }
        if !finalized.is_empty() {
            info!(
                "Finalized {} exits at {}",
                finalized.len(),
                format_timestamp(now)
            );
        }
        Ok(payouts)
    }

    // =========================================================================
    // Call log
    // =========================================================================

    /// Dispatch one logged call.
    pub fn apply(&mut self, call: &RootChainCall) -> Result<CallOutcome, ExitGameError> {
        let outcome = match call {
            RootChainCall::Deposit { ctx, token, amount } => {
                self.deposit(ctx, *token, *amount).map(CallOutcome::Block)
            }
            RootChainCall::SubmitBlock { ctx, root } => {
                self.submit_block(ctx, *root).map(CallOutcome::Block)
            }
            RootChainCall::StartDepositExit {
                ctx,
                utxo,
                token,
                amount,
            } => self
                .start_deposit_exit(ctx, *utxo, *token, *amount)
                .map(|p| CallOutcome::ExitStarted(p.utxo())),
            RootChainCall::StartFeeExit { ctx, token, amount } => self
                .start_fee_exit(ctx, *token, *amount)
                .map(|p| CallOutcome::ExitStarted(p.utxo())),
            RootChainCall::StartExit {
                ctx,
                utxo,
                tx_bytes,
                proof,
                signatures,
            } => self
                .start_exit(ctx, *utxo, tx_bytes, proof, signatures)
                .map(|p| CallOutcome::ExitStarted(p.utxo())),
            RootChainCall::ChallengeExit {
                ctx,
                challenging,
                input_index,
                tx_bytes,
                proof,
                signatures,
                confirmation,
            } => self
                .challenge_exit(
                    ctx,
                    *challenging,
                    *input_index,
                    tx_bytes,
                    proof,
                    signatures,
                    confirmation,
                )
                .map(CallOutcome::Challenged),
            RootChainCall::FinalizeExits { ctx } => {
                self.finalize_exits(ctx).map(CallOutcome::Finalized)
            }
            RootChainCall::FinalizeTokenExits { ctx, token } => self
                .finalize_token_exits(ctx, *token)
                .map(CallOutcome::Finalized),
        };

        if let Err(e) = &outcome {
            warn!(
                "{} from {} rejected: {}",
                call.name(),
                call.context().sender,
                e
            );
        }
        outcome
    }

    /// Take every event emitted since the last drain.
    pub fn drain_events(&mut self) -> Vec<RootChainEvent> {
        std::mem::take(&mut self.events)
    }

    /// Events emitted since the last drain.
    pub fn events(&self) -> &[RootChainEvent] {
        &self.events
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Number the next deposit block will get.
    pub fn deposit_block(&self) -> u64 {
        self.blocks.next_deposit_block()
    }

    /// Number the next operator block will get.
    pub fn current_child_block(&self) -> u64 {
        self.blocks.current_child_block()
    }

    /// Root and time of `block_number`; zero if never committed.
    pub fn plasma_block(&self, block_number: u64) -> PlasmaBlock {
        self.blocks.get(block_number)
    }

    /// Public view of `utxo`'s exit.
    pub fn exit(&self, utxo: &UtxoId) -> ExitView {
        self.exits.view(utxo)
    }

    /// Full exit record for `utxo`.
    pub fn exit_record(&self, utxo: &UtxoId) -> Option<&Exit> {
        self.exits.get(utxo)
    }

    /// Head of `token`'s queue as (output, exitable_at).
    pub fn next_exit(&self, token: &Address) -> Option<(UtxoId, u64)> {
        self.exits
            .next_exit(token)
            .map(|p| (p.utxo(), p.exitable_at()))
    }

    /// Counter the next fee exit will use.
    pub fn current_fee_exit(&self) -> u64 {
        self.exits.current_fee_exit()
    }

    /// Bond every exit must attach.
    pub fn exit_bond(&self) -> u128 {
        self.config.exit_bond
    }

    /// Amount of `token` held in custody.
    pub fn custody(&self, token: &Address) -> u128 {
        self.vault.balance(token)
    }

    /// Digest of all persisted state.
    pub fn state_hash(&self) -> Hash32 {
        let mut hasher = ChainHasher::for_state();

        hasher.update_u64(self.blocks.current_child_block());
        hasher.update_u64(self.blocks.current_deposit_index());
        hasher.update_u64(self.exits.current_fee_exit());

        hasher.update_u64(self.blocks.len() as u64);
        for (number, block) in self.blocks.iter() {
            hasher.update_u64(*number);
            hasher.update_bytes(&block.root);
            hasher.update_u64(block.timestamp);
        }

        for (number, record) in self.deposits.iter() {
            hasher.update_u64(*number);
            hasher.update_address(&record.depositor);
            hasher.update_address(&record.token);
            hasher.update_u128(record.amount);
        }

        for (utxo, exit) in self.exits.iter() {
            let (kind, state) = state_tag(exit);
            hasher.update_u128(utxo.encode());
            hasher.update_u8(kind);
            hasher.update_u8(state);
            hasher.update_u128(exit.amount);
            hasher.update_u128(exit.bond);
            hasher.update_u64(exit.exitable_at);
            match exit.state {
                ExitState::Live { owner, token } => {
                    hasher.update_address(&owner);
                    hasher.update_address(&token);
                }
                ExitState::Closed(Closure::Challenged { challenger }) => {
                    hasher.update_address(&challenger);
                }
                ExitState::Closed(Closure::Finalized) => {}
            }
        }

        for (token, queue) in self.exits.queues() {
            hasher.update_address(token);
            hasher.update_u64(queue.len() as u64);
            for priority in queue.sorted() {
                hasher.update_bytes(&priority.key().to_be_bytes::<32>());
            }
        }

        for (token, balance) in self.vault.iter() {
            hasher.update_address(token);
            hasher.update_u128(*balance);
        }

        hasher.finalize()
    }
}

fn finalized_event(done: &FinalizedExit) -> RootChainEvent {
    RootChainEvent::ExitFinalized {
        utxo: done.utxo,
        owner: done.owner,
        token: done.token,
        amount: done.amount,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::exits::ExitKind;
    use crate::core::hash::deposit_hash;
    use crate::core::transaction::{Transaction, TxInput};
    use crate::proof::verify::EvidenceError;
    use crate::test_utils::*;
    use crate::EXIT_PERIOD;

    fn chain() -> RootChain {
        RootChain::new(test_config()).unwrap()
    }

    fn deposit(chain: &mut RootChain, owner: &Address, amount: u128) -> u64 {
        chain
            .deposit(&CallContext::new(*owner, T0).with_value(amount), NATIVE_TOKEN, amount)
            .unwrap()
    }

    fn bonded(sender: Address, timestamp: u64) -> CallContext {
        CallContext::new(sender, timestamp).with_value(BOND)
    }

    /// Alice deposits, then spends the deposit to `to` in operator block 1000.
    fn spend_deposit_in_block(chain: &mut RootChain, to: Address) -> (SignedTx, TestBlock) {
        let alice = alice();
        let block = deposit(chain, &alice.address(), 100);
        let spend = sign_tx(
            Transaction::transfer(UtxoId::deposit(block), NATIVE_TOKEN, to, 100),
            [Some(&alice), None],
        );
        let built = build_block(&[&spend]);
        chain
            .submit_block(&CallContext::new(operator().address(), T0 + 10), built.root)
            .unwrap();
        (spend, built)
    }

    // -------------------------------------------------------------------------
    // Deposits and blocks
    // -------------------------------------------------------------------------

    #[test]
    fn test_deposit() {
        let mut chain = chain();
        let owner = alice().address();

        assert_eq!(chain.deposit_block(), 1);
        assert_eq!(deposit(&mut chain, &owner, 100), 1);

        let block = chain.plasma_block(1);
        assert_eq!(block.root, deposit_hash(&owner, &NATIVE_TOKEN, 100));
        assert_eq!(block.timestamp, T0);
        assert_eq!(chain.deposit_block(), 2);
        assert_eq!(chain.custody(&NATIVE_TOKEN), 100);
        assert!(matches!(
            chain.drain_events().as_slice(),
            [RootChainEvent::Deposit { block_number: 1, amount: 100, .. }]
        ));
    }

    #[test]
    fn test_deposit_amount_must_match_value() {
        let mut chain = chain();
        let ctx = CallContext::new(alice().address(), T0).with_value(99);

        assert_eq!(
            chain.deposit(&ctx, NATIVE_TOKEN, 100),
            Err(ExitGameError::BadAmount {
                expected: 99,
                claimed: 100
            })
        );
        assert_eq!(
            chain.deposit(&CallContext::new(alice().address(), T0), NATIVE_TOKEN, 0),
            Err(ExitGameError::ZeroAmount)
        );
        assert_eq!(chain.deposit_block(), 1);
        assert_eq!(chain.custody(&NATIVE_TOKEN), 0);
    }

    #[test]
    fn test_deposit_blocks_are_consecutive() {
        let mut chain = chain();
        let owner = alice().address();
        for expected in 1..=20u64 {
            assert_eq!(chain.deposit_block(), expected);
            let block = deposit(&mut chain, &owner, expected as u128);
            assert_eq!(block, expected);
            assert_eq!(
                chain.plasma_block(block).root,
                deposit_hash(&owner, &NATIVE_TOKEN, expected as u128)
            );
        }
    }

    #[test]
    fn test_submit_block() {
        let mut chain = chain();
        let root = [0x11; 32];

        let number = chain
            .submit_block(&CallContext::new(operator().address(), T0), root)
            .unwrap();
        assert_eq!(number, 1000);
        assert_eq!(chain.plasma_block(1000).root, root);
        assert_eq!(chain.current_child_block(), 2000);
        assert_eq!(chain.deposit_block(), 1001);

        assert_eq!(
            chain.submit_block(&CallContext::new(alice().address(), T0), root),
            Err(ExitGameError::Unauthorized {
                caller: alice().address()
            })
        );
        assert_eq!(chain.current_child_block(), 2000);
    }

    // -------------------------------------------------------------------------
    // Deposit exits
    // -------------------------------------------------------------------------

    #[test]
    fn test_start_deposit_exit() {
        let mut chain = chain();
        let owner = alice().address();
        let block = deposit(&mut chain, &owner, 100);
        let utxo = UtxoId::deposit(block);

        let priority = chain
            .start_deposit_exit(&bonded(owner, T0 + 5), utxo, NATIVE_TOKEN, 100)
            .unwrap();

        assert_eq!(priority.exitable_at(), T0 + 5 + EXIT_PERIOD);
        assert_eq!(
            chain.exit(&utxo),
            ExitView {
                owner,
                token: NATIVE_TOKEN,
                amount: 100
            }
        );
        assert_eq!(
            chain.next_exit(&NATIVE_TOKEN),
            Some((utxo, T0 + 5 + EXIT_PERIOD))
        );
        assert_eq!(chain.custody(&NATIVE_TOKEN), 100 + BOND);
        assert_eq!(chain.exit_record(&utxo).unwrap().kind, ExitKind::Deposit);
    }

    #[test]
    fn test_start_deposit_exit_rejections() {
        let mut chain = chain();
        let owner = alice().address();
        let block = deposit(&mut chain, &owner, 100);
        let utxo = UtxoId::deposit(block);
        let before = chain.state_hash();

        // Not the depositor.
        assert_eq!(
            chain.start_deposit_exit(&bonded(bob().address(), T0), utxo, NATIVE_TOKEN, 100),
            Err(ExitGameError::Forbidden {
                caller: bob().address(),
                utxo
            })
        );
        // Wrong amount.
        assert_eq!(
            chain.start_deposit_exit(&bonded(owner, T0), utxo, NATIVE_TOKEN, 101),
            Err(ExitGameError::BadAmount {
                expected: 100,
                claimed: 101
            })
        );
        // Wrong bond.
        assert_eq!(
            chain.start_deposit_exit(
                &CallContext::new(owner, T0).with_value(BOND + 1),
                utxo,
                NATIVE_TOKEN,
                100
            ),
            Err(ExitGameError::InsufficientBond {
                required: BOND,
                paid: BOND + 1
            })
        );
        // Block that was never committed.
        let missing = UtxoId::deposit(block * 2);
        assert_eq!(
            chain.start_deposit_exit(&bonded(owner, T0), missing, NATIVE_TOKEN, 100),
            Err(ExitGameError::UnknownBlock(block * 2))
        );
        // Not a deposit output.
        let standard = UtxoId::new(1000, 0, 0).unwrap();
        assert_eq!(
            chain.start_deposit_exit(&bonded(owner, T0), standard, NATIVE_TOKEN, 100),
            Err(ExitGameError::NotDepositOutput(standard))
        );

        assert_eq!(chain.state_hash(), before);
        assert!(chain.next_exit(&NATIVE_TOKEN).is_none());
    }

    #[test]
    fn test_duplicate_exit_conflicts() {
        let mut chain = chain();
        let owner = alice().address();
        let block = deposit(&mut chain, &owner, 100);
        let utxo = UtxoId::deposit(block);

        chain
            .start_deposit_exit(&bonded(owner, T0), utxo, NATIVE_TOKEN, 100)
            .unwrap();
        assert_eq!(
            chain.start_deposit_exit(&bonded(owner, T0 + 1), utxo, NATIVE_TOKEN, 100),
            Err(ExitGameError::Conflict(utxo))
        );
        // Same answer for a caller who never owned the deposit.
        assert_eq!(
            chain.start_deposit_exit(&bonded(bob().address(), T0 + 1), utxo, NATIVE_TOKEN, 100),
            Err(ExitGameError::Conflict(utxo))
        );
        assert_eq!(chain.custody(&NATIVE_TOKEN), 100 + BOND);
    }

    #[test]
    fn test_finalized_output_cannot_exit_again() {
        let mut chain = chain();
        let owner = alice().address();
        let block = deposit(&mut chain, &owner, 100);
        let utxo = UtxoId::deposit(block);

        chain
            .start_deposit_exit(&bonded(owner, T0), utxo, NATIVE_TOKEN, 100)
            .unwrap();
        chain
            .finalize_exits(&CallContext::new(owner, T0 + EXIT_PERIOD))
            .unwrap();

        assert_eq!(
            chain.start_deposit_exit(&bonded(owner, T0 + EXIT_PERIOD), utxo, NATIVE_TOKEN, 100),
            Err(ExitGameError::Conflict(utxo))
        );
    }

    // -------------------------------------------------------------------------
    // Fee exits
    // -------------------------------------------------------------------------

    #[test]
    fn test_start_fee_exit() {
        let mut chain = chain();
        let op = operator().address();
        assert_eq!(chain.current_fee_exit(), 1);

        let priority = chain
            .start_fee_exit(&bonded(op, T0), NATIVE_TOKEN, 50)
            .unwrap();

        assert_eq!(priority.utxo(), UtxoId::fee(1).unwrap());
        assert_eq!(priority.exitable_at(), T0 + EXIT_PERIOD + 1);
        assert_eq!(chain.current_fee_exit(), 2);
        assert_eq!(chain.exit(&priority.utxo()).owner, op);

        assert_eq!(
            chain.start_fee_exit(&bonded(alice().address(), T0), NATIVE_TOKEN, 50),
            Err(ExitGameError::Unauthorized {
                caller: alice().address()
            })
        );
        assert_eq!(chain.current_fee_exit(), 2);
    }

    #[test]
    fn test_user_exit_beats_fee_exit_started_together() {
        let mut chain = chain();
        let owner = alice().address();
        deposit(&mut chain, &owner, 100);
        chain
            .submit_block(&CallContext::new(operator().address(), T0), [1; 32])
            .unwrap();
        let late = deposit(&mut chain, &owner, 100);
        assert_eq!(late, 1001);

        chain
            .start_fee_exit(&bonded(operator().address(), T0), NATIVE_TOKEN, 10)
            .unwrap();
        chain
            .start_deposit_exit(&bonded(owner, T0), UtxoId::deposit(late), NATIVE_TOKEN, 100)
            .unwrap();

        // Fee ids are tiny but the extra second puts them behind.
        assert_eq!(
            chain.next_exit(&NATIVE_TOKEN),
            Some((UtxoId::deposit(late), T0 + EXIT_PERIOD))
        );
    }

    // -------------------------------------------------------------------------
    // Standard exits
    // -------------------------------------------------------------------------

    #[test]
    fn test_start_exit() {
        let mut chain = chain();
        let bob = bob();
        let (spend, built) = spend_deposit_in_block(&mut chain, bob.address());
        let confirmation = confirm(&alice(), &spend, &built.root);
        let utxo = UtxoId::new(1000, 0, 0).unwrap();

        chain
            .start_exit(
                &bonded(bob.address(), T0 + 20),
                utxo,
                &spend.bytes,
                &built.proofs[0],
                &ExitSignatures {
                    tx: spend.sigs,
                    confirmations: vec![confirmation],
                },
            )
            .unwrap();

        assert_eq!(
            chain.exit(&utxo),
            ExitView {
                owner: bob.address(),
                token: NATIVE_TOKEN,
                amount: 100
            }
        );
        assert_eq!(chain.exit_record(&utxo).unwrap().kind, ExitKind::Standard);
    }

    #[test]
    fn test_start_exit_two_inputs() {
        let mut chain = chain();
        let (alice, bob, carol) = (alice(), bob(), carol());
        let first = deposit(&mut chain, &alice.address(), 60);
        let second = deposit(&mut chain, &bob.address(), 40);

        let mut tx = Transaction::transfer(UtxoId::deposit(first), NATIVE_TOKEN, carol.address(), 100);
        tx.inputs[1] = TxInput::spend(UtxoId::deposit(second));
        let merge = sign_tx(tx, [Some(&alice), Some(&bob)]);
        let built = build_block(&[&merge]);
        chain
            .submit_block(&CallContext::new(operator().address(), T0), built.root)
            .unwrap();

        let utxo = UtxoId::new(1000, 0, 0).unwrap();
        let only_alice = ExitSignatures {
            tx: merge.sigs,
            confirmations: vec![confirm(&alice, &merge, &built.root)],
        };
        assert_eq!(
            chain.start_exit(&bonded(carol.address(), T0), utxo, &merge.bytes, &built.proofs[0], &only_alice),
            Err(ExitGameError::BadEvidence(EvidenceError::ConfirmationCount {
                expected: 2,
                got: 1
            }))
        );

        let both = ExitSignatures {
            tx: merge.sigs,
            confirmations: vec![
                confirm(&alice, &merge, &built.root),
                confirm(&bob, &merge, &built.root),
            ],
        };
        assert!(chain
            .start_exit(&bonded(carol.address(), T0), utxo, &merge.bytes, &built.proofs[0], &both)
            .is_ok());
    }

    #[test]
    fn test_start_exit_rejections() {
        let mut chain = chain();
        let bob = bob();
        let (spend, built) = spend_deposit_in_block(&mut chain, bob.address());
        let signatures = ExitSignatures {
            tx: spend.sigs,
            confirmations: vec![confirm(&alice(), &spend, &built.root)],
        };
        let utxo = UtxoId::new(1000, 0, 0).unwrap();
        let before = chain.state_hash();

        // Caller does not own the output.
        assert_eq!(
            chain.start_exit(&bonded(carol().address(), T0), utxo, &spend.bytes, &built.proofs[0], &signatures),
            Err(ExitGameError::Forbidden {
                caller: carol().address(),
                utxo
            })
        );

        // Proof for the wrong position.
        let wrong_position = UtxoId::new(1000, 1, 0).unwrap();
        assert_eq!(
            chain.start_exit(&bonded(bob.address(), T0), wrong_position, &spend.bytes, &built.proofs[0], &signatures),
            Err(ExitGameError::BadEvidence(EvidenceError::NotIncluded))
        );

        // Truncated proof.
        assert!(matches!(
            chain.start_exit(&bonded(bob.address(), T0), utxo, &spend.bytes, &built.proofs[0][..64], &signatures),
            Err(ExitGameError::BadEvidence(EvidenceError::MalformedProof { .. }))
        ));

        // Confirmation by someone other than the input owner.
        let forged = ExitSignatures {
            tx: spend.sigs,
            confirmations: vec![confirm(&bob, &spend, &built.root)],
        };
        assert!(matches!(
            chain.start_exit(&bonded(bob.address(), T0), utxo, &spend.bytes, &built.proofs[0], &forged),
            Err(ExitGameError::BadEvidence(EvidenceError::SignerMismatch { .. }))
        ));

        // Block never committed.
        let uncommitted = UtxoId::new(2000, 0, 0).unwrap();
        assert_eq!(
            chain.start_exit(&bonded(bob.address(), T0), uncommitted, &spend.bytes, &built.proofs[0], &signatures),
            Err(ExitGameError::UnknownBlock(2000))
        );

        // Garbage transaction bytes.
        assert!(matches!(
            chain.start_exit(&bonded(bob.address(), T0), utxo, &[1, 2, 3], &built.proofs[0], &signatures),
            Err(ExitGameError::BadEvidence(EvidenceError::MalformedTransaction(_)))
        ));

        // Empty second output.
        let empty_output = UtxoId::new(1000, 0, 1).unwrap();
        assert!(chain
            .start_exit(&bonded(bob.address(), T0), empty_output, &spend.bytes, &built.proofs[0], &signatures)
            .is_err());

        // Output slot the transaction does not have.
        let no_slot = UtxoId::new(1000, 0, 2).unwrap();
        assert_eq!(
            chain.start_exit(&bonded(bob.address(), T0), no_slot, &spend.bytes, &built.proofs[0], &signatures),
            Err(ExitGameError::BadEvidence(EvidenceError::BadOutputIndex(2)))
        );

        assert_eq!(chain.state_hash(), before);
    }

    // -------------------------------------------------------------------------
    // Challenges
    // -------------------------------------------------------------------------

    #[test]
    fn test_challenge_exit() {
        let mut chain = chain();
        let (alice, bob) = (alice(), bob());
        let (spend, built) = spend_deposit_in_block(&mut chain, bob.address());
        let deposit_utxo = UtxoId::deposit(1);

        // Alice tries to exit the deposit she already spent.
        chain
            .start_deposit_exit(&bonded(alice.address(), T0 + 20), deposit_utxo, NATIVE_TOKEN, 100)
            .unwrap();
        let custody = chain.custody(&NATIVE_TOKEN);

        let confirmation = confirm(&alice, &spend, &built.root);
        let reward = chain
            .challenge_exit(
                &CallContext::new(bob.address(), T0 + 30),
                UtxoId::new(1000, 0, 0).unwrap(),
                0,
                &spend.bytes,
                &built.proofs[0],
                &spend.sigs,
                &confirmation,
            )
            .unwrap();

        assert_eq!(
            reward,
            Payout {
                recipient: bob.address(),
                token: NATIVE_TOKEN,
                amount: BOND
            }
        );
        assert_eq!(
            chain.exit(&deposit_utxo),
            ExitView {
                owner: Address::ZERO,
                token: Address::ZERO,
                amount: 100
            }
        );
        assert_eq!(chain.custody(&NATIVE_TOKEN), custody - BOND);
        assert!(matches!(
            chain.events().last(),
            Some(RootChainEvent::ExitChallenged { challenger, .. }) if *challenger == bob.address()
        ));

        // A second challenge finds nothing live.
        assert_eq!(
            chain.challenge_exit(
                &CallContext::new(bob.address(), T0 + 31),
                UtxoId::new(1000, 0, 0).unwrap(),
                0,
                &spend.bytes,
                &built.proofs[0],
                &spend.sigs,
                &confirmation,
            ),
            Err(ExitGameError::NoSuchExit(deposit_utxo))
        );

        // Challenged exits never pay out.
        let payouts = chain
            .finalize_exits(&CallContext::new(bob.address(), T0 + 4 * EXIT_PERIOD))
            .unwrap();
        assert!(payouts.is_empty());
    }

    #[test]
    fn test_failed_challenge_leaves_exit_untouched() {
        let mut chain = chain();
        let (alice, bob) = (alice(), bob());
        let (spend, built) = spend_deposit_in_block(&mut chain, bob.address());
        let deposit_utxo = UtxoId::deposit(1);
        chain
            .start_deposit_exit(&bonded(alice.address(), T0 + 20), deposit_utxo, NATIVE_TOKEN, 100)
            .unwrap();
        let before = chain.state_hash();
        let challenger = CallContext::new(bob.address(), T0 + 30);
        let position = UtxoId::new(1000, 0, 0).unwrap();

        // Confirmation from someone other than the exit owner.
        let wrong_confirm = confirm(&bob, &spend, &built.root);
        assert!(matches!(
            chain.challenge_exit(&challenger, position, 0, &spend.bytes, &built.proofs[0], &spend.sigs, &wrong_confirm),
            Err(ExitGameError::BadEvidence(EvidenceError::SignerMismatch { .. }))
        ));

        // Valid confirmation, but a proof for another position.
        let confirmation = confirm(&alice, &spend, &built.root);
        let elsewhere = UtxoId::new(1000, 3, 0).unwrap();
        assert_eq!(
            chain.challenge_exit(&challenger, elsewhere, 0, &spend.bytes, &built.proofs[0], &spend.sigs, &confirmation),
            Err(ExitGameError::BadEvidence(EvidenceError::NotIncluded))
        );

        // Input slot that is empty.
        assert_eq!(
            chain.challenge_exit(&challenger, position, 1, &spend.bytes, &built.proofs[0], &spend.sigs, &confirmation),
            Err(ExitGameError::BadEvidence(EvidenceError::InputMismatch))
        );

        // Spending block that was never committed.
        let uncommitted = UtxoId::new(5000, 0, 0).unwrap();
        assert_eq!(
            chain.challenge_exit(&challenger, uncommitted, 0, &spend.bytes, &built.proofs[0], &spend.sigs, &confirmation),
            Err(ExitGameError::BadEvidence(EvidenceError::MissingRoot(5000)))
        );

        assert_eq!(chain.state_hash(), before);
        assert_eq!(chain.exit(&deposit_utxo).owner, alice.address());
    }

    #[test]
    fn test_reversed_challenge_evidence_rejected() {
        let mut chain = chain();
        let (alice, bob) = (alice(), bob());
        let (spend, built) = spend_deposit_in_block(&mut chain, bob.address());
        let deposit_utxo = UtxoId::deposit(1);
        chain
            .start_deposit_exit(&bonded(alice.address(), T0 + 20), deposit_utxo, NATIVE_TOKEN, 100)
            .unwrap();
        let before = chain.state_hash();
        let view = chain.exit(&deposit_utxo);
        let challenger = CallContext::new(bob.address(), T0 + 30);
        let position = UtxoId::new(1000, 0, 0).unwrap();
        let confirmation = confirm(&alice, &spend, &built.root);

        let mut reversed_proof = built.proofs[0].clone();
        reversed_proof.reverse();
        assert_eq!(
            chain.challenge_exit(&challenger, position, 0, &spend.bytes, &reversed_proof, &spend.sigs, &confirmation),
            Err(ExitGameError::BadEvidence(EvidenceError::NotIncluded))
        );

        let mut reversed_bytes = confirmation.as_bytes().to_vec();
        reversed_bytes.reverse();
        let reversed_confirmation = Signature::from_slice(&reversed_bytes).unwrap();
        assert!(matches!(
            chain.challenge_exit(&challenger, position, 0, &spend.bytes, &built.proofs[0], &spend.sigs, &reversed_confirmation),
            Err(ExitGameError::BadEvidence(_))
        ));

        assert_eq!(chain.exit(&deposit_utxo), view);
        assert_eq!(chain.state_hash(), before);
        assert_eq!(chain.custody(&NATIVE_TOKEN), 100 + BOND);
    }

    #[test]
    fn test_challenge_with_unrelated_spend() {
        let mut chain = chain();
        let (alice, bob) = (alice(), bob());
        let first = deposit(&mut chain, &alice.address(), 100);
        let second = deposit(&mut chain, &alice.address(), 100);
        chain
            .start_deposit_exit(&bonded(alice.address(), T0), UtxoId::deposit(first), NATIVE_TOKEN, 100)
            .unwrap();

        // Spend of the second deposit says nothing about the first.
        let spend = sign_tx(
            Transaction::transfer(UtxoId::deposit(second), NATIVE_TOKEN, bob.address(), 100),
            [Some(&alice), None],
        );
        let built = build_block(&[&spend]);
        chain
            .submit_block(&CallContext::new(operator().address(), T0), built.root)
            .unwrap();

        assert_eq!(
            chain.challenge_exit(
                &CallContext::new(bob.address(), T0),
                UtxoId::new(1000, 0, 0).unwrap(),
                0,
                &spend.bytes,
                &built.proofs[0],
                &spend.sigs,
                &confirm(&alice, &spend, &built.root),
            ),
            Err(ExitGameError::NoSuchExit(UtxoId::deposit(second)))
        );
        assert_eq!(chain.exit(&UtxoId::deposit(first)).owner, alice.address());
    }

    // -------------------------------------------------------------------------
    // Finalization
    // -------------------------------------------------------------------------

    #[test]
    fn test_finalize_exits() {
        let mut chain = chain();
        let owner = alice().address();
        let block = deposit(&mut chain, &owner, 100);
        let utxo = UtxoId::deposit(block);
        chain
            .start_deposit_exit(&bonded(owner, T0), utxo, NATIVE_TOKEN, 100)
            .unwrap();

        // One week in: nothing is due.
        let early = chain
            .finalize_exits(&CallContext::new(owner, T0 + EXIT_PERIOD / 2))
            .unwrap();
        assert!(early.is_empty());
        assert_eq!(chain.exit(&utxo).owner, owner);

        // Two weeks in: paid amount plus bond.
        let payouts = chain
            .finalize_exits(&CallContext::new(owner, T0 + EXIT_PERIOD))
            .unwrap();
        assert_eq!(
            payouts,
            vec![Payout {
                recipient: owner,
                token: NATIVE_TOKEN,
                amount: 100 + BOND
            }]
        );
        assert_eq!(chain.exit(&utxo).owner, Address::ZERO);
        assert_eq!(chain.exit(&utxo).amount, 100);
        assert_eq!(chain.custody(&NATIVE_TOKEN), 0);
        assert!(chain.next_exit(&NATIVE_TOKEN).is_none());

        // Repeating is a no-op.
        let hash = chain.state_hash();
        assert!(chain
            .finalize_exits(&CallContext::new(owner, T0 + 10 * EXIT_PERIOD))
            .unwrap()
            .is_empty());
        assert_eq!(chain.state_hash(), hash);
    }

    #[test]
    fn test_finalize_order_by_time_then_position() {
        let mut chain = chain();
        let owner = alice().address();
        for _ in 0..3 {
            deposit(&mut chain, &owner, 10);
        }

        // Block 3 exits first in time, then 1 and 2 together.
        chain
            .start_deposit_exit(&bonded(owner, T0), UtxoId::deposit(3), NATIVE_TOKEN, 10)
            .unwrap();
        chain
            .start_deposit_exit(&bonded(owner, T0 + 1), UtxoId::deposit(2), NATIVE_TOKEN, 10)
            .unwrap();
        chain
            .start_deposit_exit(&bonded(owner, T0 + 1), UtxoId::deposit(1), NATIVE_TOKEN, 10)
            .unwrap();
        chain.drain_events();

        chain
            .finalize_exits(&CallContext::new(owner, T0 + 1 + EXIT_PERIOD))
            .unwrap();
        let order: Vec<UtxoId> = chain
            .drain_events()
            .iter()
            .filter_map(|e| match e {
                RootChainEvent::ExitFinalized { utxo, .. } => Some(*utxo),
                _ => None,
            })
            .collect();
        assert_eq!(
            order,
            vec![UtxoId::deposit(3), UtxoId::deposit(1), UtxoId::deposit(2)]
        );
    }

    #[test]
    fn test_token_exit_pays_bond_in_native() {
        let mut chain = chain();
        let owner = alice().address();
        let token = test_token();
        let block = chain
            .deposit(&CallContext::new(owner, T0).with_value(500), token, 500)
            .unwrap();
        chain
            .start_deposit_exit(&bonded(owner, T0), UtxoId::deposit(block), token, 500)
            .unwrap();
        assert_eq!(chain.custody(&token), 500);
        assert_eq!(chain.custody(&NATIVE_TOKEN), BOND);

        // The native queue is empty; only the token queue pays.
        assert!(chain
            .finalize_token_exits(&CallContext::new(owner, T0 + EXIT_PERIOD), NATIVE_TOKEN)
            .unwrap()
            .is_empty());
        let payouts = chain
            .finalize_token_exits(&CallContext::new(owner, T0 + EXIT_PERIOD), token)
            .unwrap();

        assert_eq!(payouts.len(), 2);
        assert_eq!((payouts[0].token, payouts[0].amount), (token, 500));
        assert_eq!((payouts[1].token, payouts[1].amount), (NATIVE_TOKEN, BOND));
        assert_eq!(chain.custody(&token), 0);
        assert_eq!(chain.custody(&NATIVE_TOKEN), 0);
    }

    #[test]
    fn test_oversized_fee_exit_does_not_block_senior_exit() {
        let mut chain = chain();
        let op = operator().address();
        let owner = alice().address();
        deposit(&mut chain, &owner, 100);
        chain
            .start_deposit_exit(&bonded(owner, T0), UtxoId::deposit(1), NATIVE_TOKEN, 100)
            .unwrap();
        // Operator claims more fees than custody holds.
        chain
            .start_fee_exit(&bonded(op, T0), NATIVE_TOKEN, 1_000_000)
            .unwrap();
        let fee_utxo = UtxoId::fee(1).unwrap();

        // Both are due; the senior user exit is still paid.
        let payouts = chain
            .finalize_exits(&CallContext::new(op, T0 + EXIT_PERIOD + 86_400))
            .unwrap();
        assert_eq!(
            payouts,
            vec![Payout {
                recipient: owner,
                token: NATIVE_TOKEN,
                amount: 100 + BOND
            }]
        );
        assert_eq!(chain.exit(&UtxoId::deposit(1)).owner, Address::ZERO);
        assert_eq!(chain.custody(&NATIVE_TOKEN), BOND);

        // The fee exit waits at the head with its bond still in custody.
        assert_eq!(
            chain.next_exit(&NATIVE_TOKEN),
            Some((fee_utxo, T0 + EXIT_PERIOD + 1))
        );
        assert_eq!(chain.exit(&fee_utxo).owner, op);
        let hash = chain.state_hash();
        assert!(chain
            .finalize_exits(&CallContext::new(op, T0 + 2 * EXIT_PERIOD))
            .unwrap()
            .is_empty());
        assert_eq!(chain.state_hash(), hash);
    }

    #[test]
    fn test_token_shortfall_does_not_block_native_exits() {
        let mut chain = chain();
        let op = operator().address();
        let owner = alice().address();
        let token = test_token();
        deposit(&mut chain, &owner, 100);
        chain
            .start_deposit_exit(&bonded(owner, T0), UtxoId::deposit(1), NATIVE_TOKEN, 100)
            .unwrap();
        // Token fees that were never deposited.
        chain.start_fee_exit(&bonded(op, T0), token, 500).unwrap();

        let payouts = chain
            .finalize_exits(&CallContext::new(owner, T0 + EXIT_PERIOD + 1))
            .unwrap();
        assert_eq!(payouts.len(), 1);
        assert_eq!(payouts[0].recipient, owner);
        assert_eq!(chain.exit(&UtxoId::fee(1).unwrap()).owner, op);
        assert_eq!(chain.custody(&NATIVE_TOKEN), BOND);
    }

    // -------------------------------------------------------------------------
    // Call log
    // -------------------------------------------------------------------------

    #[test]
    fn test_apply_dispatch() {
        let mut chain = chain();
        let owner = alice().address();

        let outcome = chain
            .apply(&RootChainCall::Deposit {
                ctx: CallContext::new(owner, T0).with_value(100),
                token: NATIVE_TOKEN,
                amount: 100,
            })
            .unwrap();
        assert_eq!(outcome, CallOutcome::Block(1));

        let outcome = chain
            .apply(&RootChainCall::StartDepositExit {
                ctx: bonded(owner, T0),
                utxo: UtxoId::deposit(1),
                token: NATIVE_TOKEN,
                amount: 100,
            })
            .unwrap();
        assert_eq!(outcome, CallOutcome::ExitStarted(UtxoId::deposit(1)));

        let outcome = chain
            .apply(&RootChainCall::FinalizeExits {
                ctx: CallContext::new(owner, T0 + EXIT_PERIOD),
            })
            .unwrap();
        assert!(matches!(outcome, CallOutcome::Finalized(p) if p.len() == 1));

        let rejected = chain.apply(&RootChainCall::SubmitBlock {
            ctx: CallContext::new(owner, T0),
            root: [0; 32],
        });
        assert_eq!(rejected, Err(ExitGameError::Unauthorized { caller: owner }));
        assert_eq!(chain.drain_events().len(), 3);
        assert!(chain.events().is_empty());
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let config = RootChainConfig {
            child_block_interval: 1,
            ..test_config()
        };
        assert!(RootChain::new(config).is_err());
    }
}
