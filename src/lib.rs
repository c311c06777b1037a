//! # Plasma Root Chain
//!
//! Exit game state machine for a Plasma child chain: the base-layer side
//! that takes deposits, records operator block roots, and lets users
//! withdraw through bonded, challengeable, priority-ordered exits.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   PLASMA ROOT CHAIN                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Deterministic primitives                 │
//! │  ├── utxo.rs     - Output identity codec                    │
//! │  ├── hash.rs     - Domain-separated protocol digests        │
//! │  ├── signature.rs- Recoverable secp256k1 signatures         │
//! │  └── transaction.rs - Two-in / two-out child transactions   │
//! │                                                             │
//! │  proof/          - Evidence checks                          │
//! │  ├── merkle.rs   - Fixed-depth Merkle tree                  │
//! │  └── verify.rs   - Inclusion + confirmation verification    │
//! │                                                             │
//! │  chain/          - Exit game (deterministic)                │
//! │  ├── blocks.rs   - Block registry                           │
//! │  ├── deposits.rs - Deposit ledger                           │
//! │  ├── exits.rs    - Exit registry                            │
//! │  ├── queue.rs    - Exit priority queues                     │
//! │  └── root_chain.rs - Controller                             │
//! │                                                             │
//! │  service/        - Async shared access (non-deterministic)  │
//! │  config.rs       - Protocol and service configuration       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Determinism Guarantee
//!
//! The `core/`, `proof/` and `chain/` modules never read the clock:
//! - Time arrives as part of each call's [`CallContext`]
//! - No HashMap (BTreeMap for sorted iteration)
//! - All state is keyed by integer identities
//!
//! Replaying the same call log therefore yields the same
//! [`RootChain::state_hash`] on any platform.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod chain;
pub mod config;
pub mod core;
pub mod proof;
pub mod service;

// Re-export commonly used types
pub use chain::{
    replay, CallContext, CallOutcome, ExitGameError, ExitSignatures, ExitView, Payout,
    RootChain, RootChainCall, RootChainEvent, NATIVE_TOKEN,
};
pub use config::{ConfigError, RootChainConfig, ServiceConfig};
pub use crate::core::{Signature, Signer, Transaction, TxSignatures, UtxoId};
pub use service::{RootChainService, ServiceError};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Challenge window: two weeks, in seconds.
pub const EXIT_PERIOD: u64 = 14 * 24 * 60 * 60;

/// Spacing between operator block numbers.
pub const CHILD_BLOCK_INTERVAL: u64 = 1000;

/// Default exit bond in the native token's smallest unit.
pub const DEFAULT_EXIT_BOND: u128 = 1_234_567_890;

/// Height of the transaction Merkle tree.
pub const MERKLE_DEPTH: usize = proof::merkle::DEFAULT_DEPTH;
