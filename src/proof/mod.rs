//! Inclusion and Confirmation Proofs
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    PROOF SYSTEM                             │
//! ├─────────────────────────────────────────────────────────────┤
//! │  merkle.rs   - Fixed-depth Merkle tree over signed txs      │
//! │  verify.rs   - Inclusion + confirmation signature checks    │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod merkle;
pub mod verify;

// Re-export key types
pub use merkle::{FixedMerkleTree, MerkleProof, DEFAULT_DEPTH};
pub use verify::{EvidenceError, ProofVerifier};
