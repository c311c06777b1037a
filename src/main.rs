//! Plasma Root Chain Demo
//!
//! Drives the exit game through a full deposit / spend / exit / challenge /
//! finalize cycle and checks that the journal replays to the same state.

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use plasma_root_chain::{
    chain::events::format_timestamp,
    chain::ExitSignatures,
    core::hash::confirmation_hash,
    proof::FixedMerkleTree,
    CallContext, CallOutcome, RootChainCall, RootChainConfig, RootChainService, ServiceConfig,
    Signer, Transaction, UtxoId, MERKLE_DEPTH, NATIVE_TOKEN, VERSION,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    info!("Plasma Root Chain v{}", VERSION);
    info!("Started at {}", chrono::Utc::now().to_rfc3339());

    demo_exit_game().await
}

/// Deterministic demo key.
fn demo_signer(seed: u8) -> Result<Signer> {
    Signer::from_bytes(&[seed; 32]).context("invalid demo key")
}

async fn demo_exit_game() -> Result<()> {
    let operator = demo_signer(0x0a)?;
    let alice = demo_signer(0x01)?;
    let bob = demo_signer(0x02)?;

    let mut config = RootChainConfig::from_env()?;
    if config.operator.is_zero() {
        config.operator = operator.address();
    }
    info!(
        "Operator {}, exit bond {}, exit period {}s",
        config.operator, config.exit_bond, config.exit_period
    );
    let bond = config.exit_bond;
    let period = config.exit_period;

    let service = RootChainService::new(config, ServiceConfig::from_env()?)?;
    let mut events = service.subscribe_events();
    let t0: u64 = 1_700_000_000;

    info!("=== Deposit ===");
    service
        .submit(RootChainCall::Deposit {
            ctx: CallContext::new(alice.address(), t0).with_value(1_000_000),
            token: NATIVE_TOKEN,
            amount: 1_000_000,
        })
        .await?;
    let deposit = UtxoId::deposit(1);

    info!("=== Alice pays Bob in block 1000 ===");
    let spend = Transaction::transfer(deposit, NATIVE_TOKEN, bob.address(), 1_000_000);
    let spend_bytes = spend.to_bytes();
    let tx_sigs = spend.sign([Some(&alice), None])?;
    let tree = FixedMerkleTree::new(MERKLE_DEPTH, vec![tx_sigs.leaf(&spend.hash())])
        .context("block does not fit the tree")?;
    let proof = tree
        .generate_proof(0)
        .context("missing proof for tx 0")?
        .to_bytes();
    let root = tree.root();

    let submitted = service
        .submit(RootChainCall::SubmitBlock {
            ctx: CallContext::new(operator.address(), t0 + 60),
            root,
        })
        .await?;
    let CallOutcome::Block(block_number) = submitted else {
        anyhow::bail!("unexpected outcome {:?}", submitted);
    };
    let alice_confirm = alice.sign(&confirmation_hash(&spend.hash(), &root))?;

    info!("=== Alice tries to exit her spent deposit ===");
    service
        .submit(RootChainCall::StartDepositExit {
            ctx: CallContext::new(alice.address(), t0 + 120).with_value(bond),
            utxo: deposit,
            token: NATIVE_TOKEN,
            amount: 1_000_000,
        })
        .await?;

    info!("=== Bob challenges with the spend ===");
    let spend_position = UtxoId::new(block_number, 0, 0)?;
    service
        .submit(RootChainCall::ChallengeExit {
            ctx: CallContext::new(bob.address(), t0 + 180),
            challenging: spend_position,
            input_index: 0,
            tx_bytes: spend_bytes.clone(),
            proof: proof.clone(),
            signatures: tx_sigs,
            confirmation: alice_confirm,
        })
        .await?;

    info!("=== Bob exits his output ===");
    service
        .submit(RootChainCall::StartExit {
            ctx: CallContext::new(bob.address(), t0 + 240).with_value(bond),
            utxo: spend_position,
            tx_bytes: spend_bytes,
            proof,
            signatures: ExitSignatures {
                tx: tx_sigs,
                confirmations: vec![alice_confirm],
            },
        })
        .await?;

    info!("=== Finalize after the challenge window ===");
    let now = t0 + 240 + period;
    let payouts = service.finalize_due(now).await?;
    for payout in &payouts {
        info!(
            "Paid {} (token {}) to {}",
            payout.amount, payout.token, payout.recipient
        );
    }
    info!("Finalized at {}", format_timestamp(now));

    while let Ok(event) = events.try_recv() {
        info!("Event: {}", event);
    }

    info!("=== Results ===");
    let journal = service.journal().await;
    info!("Journal: {} calls", journal.len());
    info!("Final State Hash: {}", hex::encode(service.state_hash().await));

    let replayed = service.verify_journal().await?;
    info!("Replay verification: {}", if replayed { "PASSED" } else { "FAILED" });
    anyhow::ensure!(replayed, "journal replay diverged");

    Ok(())
}
