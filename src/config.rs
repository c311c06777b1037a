//! Configuration
//!
//! Protocol parameters for the root chain plus settings for the async
//! service. Both load from the environment on top of their defaults.

use std::str::FromStr;
use std::time::Duration;

use alloy_primitives::Address;
use thiserror::Error;

use crate::proof::merkle::MAX_DEPTH;
use crate::{CHILD_BLOCK_INTERVAL, DEFAULT_EXIT_BOND, EXIT_PERIOD, MERKLE_DEPTH};

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// Environment variable holds an unparseable value.
    #[error("{var}: cannot parse {value:?}")]
    Parse {
        /// Variable name.
        var: &'static str,
        /// Raw value.
        value: String,
    },
    /// Value parses but is unusable.
    #[error("invalid {field}: {reason}")]
    Invalid {
        /// Offending field.
        field: &'static str,
        /// What is wrong with it.
        reason: &'static str,
    },
}

/// Root chain protocol parameters.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RootChainConfig {
    /// Only address allowed to submit blocks and start fee exits.
    pub operator: Address,
    /// Exact bond every exit must attach.
    pub exit_bond: u128,
    /// Challenge window in seconds.
    pub exit_period: u64,
    /// Spacing between operator block numbers.
    pub child_block_interval: u64,
    /// Height of the transaction Merkle tree.
    pub merkle_depth: usize,
}

impl Default for RootChainConfig {
    fn default() -> Self {
        Self {
            operator: Address::ZERO,
            exit_bond: DEFAULT_EXIT_BOND,
            exit_period: EXIT_PERIOD,
            child_block_interval: CHILD_BLOCK_INTERVAL,
            merkle_depth: MERKLE_DEPTH,
        }
    }
}

impl RootChainConfig {
    /// Defaults overridden by `PLASMA_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Defaults overridden by whatever `lookup` returns.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let config = Self {
            operator: parse_var(&lookup, "PLASMA_OPERATOR")?.unwrap_or(defaults.operator),
            exit_bond: parse_var(&lookup, "PLASMA_EXIT_BOND")?.unwrap_or(defaults.exit_bond),
            exit_period: parse_var(&lookup, "PLASMA_EXIT_PERIOD_SECS")?
                .unwrap_or(defaults.exit_period),
            child_block_interval: parse_var(&lookup, "PLASMA_CHILD_BLOCK_INTERVAL")?
                .unwrap_or(defaults.child_block_interval),
            merkle_depth: parse_var(&lookup, "PLASMA_MERKLE_DEPTH")?
                .unwrap_or(defaults.merkle_depth),
        };
        config.validate()?;
        Ok(config)
    }

    /// Set the operator.
    pub fn with_operator(mut self, operator: Address) -> Self {
        self.operator = operator;
        self
    }

    /// Reject parameter combinations the protocol cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.child_block_interval < 2 {
            return Err(ConfigError::Invalid {
                field: "child_block_interval",
                reason: "must leave room for at least one deposit block",
            });
        }
        if self.merkle_depth == 0 || self.merkle_depth > MAX_DEPTH {
            return Err(ConfigError::Invalid {
                field: "merkle_depth",
                reason: "must be between 1 and 32",
            });
        }
        if self.exit_bond == 0 {
            return Err(ConfigError::Invalid {
                field: "exit_bond",
                reason: "must be non-zero",
            });
        }
        Ok(())
    }
}

/// Settings for [`crate::service::RootChainService`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceConfig {
    /// How often the background finalizer runs.
    pub finalize_interval: Duration,
    /// Address the finalizer calls as.
    pub keeper: Address,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            finalize_interval: Duration::from_secs(60),
            keeper: Address::ZERO,
        }
    }
}

impl ServiceConfig {
    /// Defaults overridden by `PLASMA_FINALIZE_INTERVAL_SECS` and
    /// `PLASMA_KEEPER`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Defaults overridden by whatever `lookup` returns.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let finalize_interval = parse_var::<u64>(&lookup, "PLASMA_FINALIZE_INTERVAL_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.finalize_interval);
        if finalize_interval.is_zero() {
            return Err(ConfigError::Invalid {
                field: "finalize_interval",
                reason: "must be non-zero",
            });
        }

        Ok(Self {
            finalize_interval,
            keeper: parse_var(&lookup, "PLASMA_KEEPER")?.unwrap_or(defaults.keeper),
        })
    }
}

fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(var) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Parse { var, value }),
    }
}
