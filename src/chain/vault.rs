//! Protocol custody.
//!
//! Tracks what the root chain holds per token: deposits and bonds come in,
//! exit payouts and challenge rewards go out. A batch of withdrawals either
//! fits entirely or is refused entirely.

use std::collections::BTreeMap;

use alloy_primitives::Address;
use serde::{Deserialize, Serialize};

use crate::chain::error::ExitGameError;

/// Token that bonds are paid in.
pub const NATIVE_TOKEN: Address = Address::ZERO;

/// One transfer out of custody.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payout {
    /// Receiving address.
    pub recipient: Address,
    /// Token paid.
    pub token: Address,
    /// Amount paid.
    pub amount: u128,
}

/// Per-token custody balances.
#[derive(Clone, Debug, Default)]
pub struct Vault {
    balances: BTreeMap<Address, u128>,
}

impl Vault {
    /// Create an empty vault.
    pub fn new() -> Self {
        Self::default()
    }

    /// Balance held for `token`.
    pub fn balance(&self, token: &Address) -> u128 {
        self.balances.get(token).copied().unwrap_or(0)
    }

    /// Balance after crediting, without applying it.
    pub fn checked_credit(&self, token: &Address, amount: u128) -> Result<u128, ExitGameError> {
        self.balance(token)
            .checked_add(amount)
            .ok_or(ExitGameError::Overflow)
    }

    /// Take `amount` of `token` into custody.
    pub fn credit(&mut self, token: Address, amount: u128) -> Result<(), ExitGameError> {
        let balance = self.checked_credit(&token, amount)?;
        self.balances.insert(token, balance);
        Ok(())
    }

    /// Pay out every entry, or nothing if any token would be overdrawn.
    pub fn pay(&mut self, payouts: &[Payout]) -> Result<(), ExitGameError> {
        let mut owed: BTreeMap<Address, u128> = BTreeMap::new();
        for payout in payouts {
            let total = owed.entry(payout.token).or_insert(0);
            *total = total
                .checked_add(payout.amount)
                .ok_or(ExitGameError::Overflow)?;
        }

        for (token, required) in &owed {
            let available = self.balance(token);
            if available < *required {
                return Err(ExitGameError::InsufficientCustody {
                    token: *token,
                    available,
                    required: *required,
                });
            }
        }

        for (token, required) in owed {
            let balance = self.balance(&token) - required;
            self.balances.insert(token, balance);
        }
        Ok(())
    }

    /// Non-zero balances in token order.
    pub fn iter(&self) -> impl Iterator<Item = (&Address, &u128)> {
        self.balances.iter().filter(|(_, balance)| **balance > 0)
    }
}
