//! Exit Priority Queue
//!
//! One min-queue per token. The key flattens (exitable_at, utxo id) into a
//! single 256-bit integer so that ordering by key is ordering by time first
//! and by output position second:
//!
//! ```text
//!   255            128 127                     0
//!  ┌──────────────────┬────────────────────────┐
//!  │   exitable_at    │   packed utxo id       │
//!  └──────────────────┴────────────────────────┘
//! ```
//!
//! Older outputs have smaller ids, so at equal eligibility time they exit
//! first.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use alloy_primitives::U256;
use serde::{Deserialize, Serialize};

use crate::core::utxo::UtxoId;

/// Queue key for one exit.
///
/// `key` alone determines the other two fields, so the derived order is the
/// order of `key`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ExitPriority {
    key: U256,
    exitable_at: u64,
    utxo: UtxoId,
}

impl ExitPriority {
    /// Key for an exit on `utxo` eligible at `exitable_at`.
    pub fn new(exitable_at: u64, utxo: UtxoId) -> Self {
        let key = (U256::from(exitable_at) << 128) | U256::from(utxo.encode());
        Self {
            key,
            exitable_at,
            utxo,
        }
    }

    /// The flattened 256-bit key.
    pub fn key(&self) -> U256 {
        self.key
    }

    /// Earliest finalization time.
    pub fn exitable_at(&self) -> u64 {
        self.exitable_at
    }

    /// Exiting output.
    pub fn utxo(&self) -> UtxoId {
        self.utxo
    }

    /// Whether this exit may be finalized at `now`.
    pub fn is_due(&self, now: u64) -> bool {
        self.exitable_at <= now
    }
}

/// Min-queue of exit priorities for a single token.
#[derive(Clone, Debug, Default)]
pub struct ExitQueue {
    heap: BinaryHeap<Reverse<ExitPriority>>,
}

impl ExitQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry.
    pub fn insert(&mut self, priority: ExitPriority) {
        self.heap.push(Reverse(priority));
    }

    /// Smallest entry.
    pub fn peek(&self) -> Option<&ExitPriority> {
        self.heap.peek().map(|Reverse(p)| p)
    }

    /// Remove and return the smallest entry.
    pub fn pop(&mut self) -> Option<ExitPriority> {
        self.heap.pop().map(|Reverse(p)| p)
    }

    /// Remove every entry eligible at `now`, smallest first.
    pub fn pop_due(&mut self, now: u64) -> Vec<ExitPriority> {
        let mut due = Vec::new();
        while self.peek().is_some_and(|p| p.is_due(now)) {
            if let Some(priority) = self.pop() {
                due.push(priority);
            }
        }
        due
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// All entries, smallest first.
    pub fn sorted(&self) -> Vec<ExitPriority> {
        let mut entries: Vec<ExitPriority> = self.heap.iter().map(|Reverse(p)| *p).collect();
        entries.sort();
        entries
    }
}
