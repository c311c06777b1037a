//! Core deterministic primitives.
//!
//! Identity, hashing, signature and transaction types shared by the proof
//! and chain modules. Nothing here holds protocol state.

pub mod hash;
pub mod signature;
pub mod transaction;
pub mod utxo;

// Re-export core types
pub use hash::{Hash32, ZERO_HASH};
pub use signature::{Signature, SignatureError, Signer};
pub use transaction::{Transaction, TransactionError, TxInput, TxOutput, TxSignatures};
pub use utxo::{UtxoId, UtxoIdError};
