//! Block Registry
//!
//! Records every committed root with its commit time. Block numbers come
//! from two disjoint ranges:
//!
//! ```text
//!  submissions:  1000          2000          3000 ...   (multiples of interval)
//!  deposits:       1 2 3 ...    1001 1002 ...  2001 ... (everything in between)
//! ```
//!
//! The deposit index restarts after each submission, so a block number alone
//! tells a synthetic deposit block apart from an operator batch.

use std::collections::BTreeMap;

use alloy_primitives::Address;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::chain::error::ExitGameError;
use crate::core::hash::{Hash32, ZERO_HASH};

/// A committed block: root plus commit time.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlasmaBlock {
    /// Merkle root (or deposit hash for deposit blocks).
    pub root: Hash32,
    /// Unix time of the commit.
    pub timestamp: u64,
}

impl PlasmaBlock {
    /// Is this the zero "never committed" sentinel?
    pub fn is_empty(&self) -> bool {
        self.root == ZERO_HASH && self.timestamp == 0
    }
}

/// Registry of committed blocks and the two block-number counters.
#[derive(Clone, Debug)]
pub struct BlockRegistry {
    interval: u64,
    blocks: BTreeMap<u64, PlasmaBlock>,
    current_child_block: u64,
    current_deposit_index: u64,
}

impl BlockRegistry {
    /// Create an empty registry. The first submission gets `interval`.
    pub fn new(interval: u64) -> Self {
        Self {
            interval,
            blocks: BTreeMap::new(),
            current_child_block: interval,
            current_deposit_index: 1,
        }
    }

    /// Spacing between submission block numbers.
    pub fn interval(&self) -> u64 {
        self.interval
    }

    /// Number the next submission will receive.
    pub fn current_child_block(&self) -> u64 {
        self.current_child_block
    }

    /// Number the next deposit will receive.
    pub fn next_deposit_block(&self) -> u64 {
        self.current_child_block - self.interval + self.current_deposit_index
    }

    /// Position of the next deposit since the last submission.
    pub fn current_deposit_index(&self) -> u64 {
        self.current_deposit_index
    }

    /// Whether `block_number` lies in the deposit range.
    pub fn is_deposit_block(&self, block_number: u64) -> bool {
        block_number % self.interval != 0
    }

    /// Record a deposit block.
    pub fn record_deposit(&mut self, root: Hash32, timestamp: u64) -> Result<u64, ExitGameError> {
        if self.current_deposit_index >= self.interval {
            warn!(
                "Deposit range before block {} is exhausted",
                self.current_child_block
            );
            return Err(ExitGameError::DepositLimitReached(self.current_child_block));
        }

        let block_number = self.next_deposit_block();
        self.blocks.insert(block_number, PlasmaBlock { root, timestamp });
        self.current_deposit_index += 1;

        debug!(block_number, "Recorded deposit block");
        Ok(block_number)
    }

    /// Record an operator batch. Only `operator` may submit.
    pub fn record_submission(
        &mut self,
        caller: &Address,
        operator: &Address,
        root: Hash32,
        timestamp: u64,
    ) -> Result<u64, ExitGameError> {
        if caller != operator {
            return Err(ExitGameError::Unauthorized { caller: *caller });
        }

        let block_number = self.current_child_block;
        let next = block_number
            .checked_add(self.interval)
            .ok_or(ExitGameError::Overflow)?;

        self.blocks.insert(block_number, PlasmaBlock { root, timestamp });
        self.current_child_block = next;
        self.current_deposit_index = 1;

        debug!(block_number, "Recorded submission block");
        Ok(block_number)
    }

    /// Look up a block. Unknown numbers yield the zero block.
    pub fn get(&self, block_number: u64) -> PlasmaBlock {
        self.blocks.get(&block_number).copied().unwrap_or_default()
    }

    /// Look up a committed block.
    pub fn committed(&self, block_number: u64) -> Option<&PlasmaBlock> {
        self.blocks.get(&block_number)
    }

    /// Number of committed blocks.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Whether nothing has been committed yet.
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Committed blocks in block-number order.
    pub fn iter(&self) -> impl Iterator<Item = (&u64, &PlasmaBlock)> {
        self.blocks.iter()
    }
}
