//! Root chain exit game.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      EXIT GAME                              │
//! ├─────────────────────────────────────────────────────────────┤
//! │  blocks.rs     - Committed roots, block numbering           │
//! │  deposits.rs   - Deposit blocks and their authentication    │
//! │  exits.rs      - Exit records, checks, challenges, payouts  │
//! │  queue.rs      - Per-token min-queues on a 256-bit key      │
//! │  vault.rs      - Custody balances                           │
//! │  events.rs     - Emitted events                             │
//! │  call.rs       - Call context, call log, replay             │
//! │  root_chain.rs - Controller tying it all together           │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod blocks;
pub mod call;
pub mod deposits;
pub mod error;
pub mod events;
pub mod exits;
pub mod queue;
pub mod root_chain;
pub mod vault;

pub use blocks::{BlockRegistry, PlasmaBlock};
pub use call::{replay, CallContext, CallOutcome, ReplayResult, RootChainCall};
pub use error::ExitGameError;
pub use events::RootChainEvent;
pub use exits::{Exit, ExitKind, ExitSignatures, ExitView};
pub use queue::ExitPriority;
pub use root_chain::RootChain;
pub use vault::{Payout, NATIVE_TOKEN};
