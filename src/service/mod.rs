//! Root Chain Service
//!
//! Shares one [`RootChain`] between async callers. A single mutex is the
//! serialization boundary: every call runs to completion under it, so calls
//! from different tasks are totally ordered.
//!
//! The service also keeps a journal of accepted calls (replayable with
//! [`crate::chain::replay`]), fans events out to subscribers, and can run a
//! background finalizer so due exits get paid without a dedicated caller.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::chain::call::{replay, CallContext, CallOutcome, RootChainCall};
use crate::chain::error::ExitGameError;
use crate::chain::events::RootChainEvent;
use crate::chain::root_chain::RootChain;
use crate::chain::vault::Payout;
use crate::config::{ConfigError, RootChainConfig, ServiceConfig};
use crate::core::hash::Hash32;

/// Service errors.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The root chain rejected the call.
    #[error(transparent)]
    Chain(#[from] ExitGameError),
    /// Bad configuration.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    /// Journal could not be (de)serialized.
    #[error("journal serialization failed: {0}")]
    Journal(#[from] serde_json::Error),
}

struct ServiceState {
    chain: RootChain,
    journal: Vec<RootChainCall>,
}

/// Lock-guarded root chain with journal, event fan-out and finalizer.
pub struct RootChainService {
    config: ServiceConfig,
    chain_config: RootChainConfig,
    state: Arc<Mutex<ServiceState>>,
    event_tx: broadcast::Sender<RootChainEvent>,
    shutdown_tx: broadcast::Sender<()>,
}

impl RootChainService {
    /// Create a service around a fresh root chain.
    pub fn new(chain_config: RootChainConfig, config: ServiceConfig) -> Result<Self, ServiceError> {
        let chain = RootChain::new(chain_config.clone())?;
        let (event_tx, _) = broadcast::channel(256);
        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            config,
            chain_config,
            state: Arc::new(Mutex::new(ServiceState {
                chain,
                journal: Vec::new(),
            })),
            event_tx,
            shutdown_tx,
        })
    }

    /// Execute one call.
    #[instrument(skip(self, call), fields(call = call.name()))]
    pub async fn submit(&self, call: RootChainCall) -> Result<CallOutcome, ServiceError> {
        Self::execute(&self.state, &self.event_tx, call).await
    }

    /// Finalize everything due at `now` as the configured keeper.
    pub async fn finalize_due(&self, now: u64) -> Result<Vec<Payout>, ServiceError> {
        let call = RootChainCall::FinalizeExits {
            ctx: CallContext::new(self.config.keeper, now),
        };
        match self.submit(call).await? {
            CallOutcome::Finalized(payouts) => Ok(payouts),
            _ => Ok(Vec::new()),
        }
    }

    async fn execute(
        state: &Mutex<ServiceState>,
        event_tx: &broadcast::Sender<RootChainEvent>,
        call: RootChainCall,
    ) -> Result<CallOutcome, ServiceError> {
        let mut state = state.lock().await;

        // Finalizing with nothing due changes nothing and stays out of the journal.
        let is_finalize = matches!(
            call,
            RootChainCall::FinalizeExits { .. } | RootChainCall::FinalizeTokenExits { .. }
        );
        let before = is_finalize.then(|| state.chain.state_hash());

        let outcome = state.chain.apply(&call)?;

        if before.map_or(true, |hash| hash != state.chain.state_hash()) {
            state.journal.push(call);
        }
        for event in state.chain.drain_events() {
            debug!("{}", event);
            // No subscribers is fine.
            let _ = event_tx.send(event);
        }
        Ok(outcome)
    }

    /// Receive every event emitted from now on.
    pub fn subscribe_events(&self) -> broadcast::Receiver<RootChainEvent> {
        self.event_tx.subscribe()
    }

    /// Run `f` against the current state.
    pub async fn read<R>(&self, f: impl FnOnce(&RootChain) -> R) -> R {
        let state = self.state.lock().await;
        f(&state.chain)
    }

    /// Digest of the current state.
    pub async fn state_hash(&self) -> Hash32 {
        self.read(RootChain::state_hash).await
    }

    /// Accepted calls, in execution order.
    pub async fn journal(&self) -> Vec<RootChainCall> {
        self.state.lock().await.journal.clone()
    }

    /// Journal as JSON.
    pub async fn journal_json(&self) -> Result<String, ServiceError> {
        let state = self.state.lock().await;
        Ok(serde_json::to_string_pretty(&state.journal)?)
    }

    /// Replay the journal into a fresh chain and compare state hashes.
    pub async fn verify_journal(&self) -> Result<bool, ServiceError> {
        let state = self.state.lock().await;
        let replayed = replay(self.chain_config.clone(), &state.journal)?;
        let matches = replayed.chain.state_hash() == state.chain.state_hash();
        if !matches {
            warn!(
                "Journal replay diverged after {} calls",
                state.journal.len()
            );
        }
        Ok(matches)
    }

    /// Start finalizing due exits every `finalize_interval` until shutdown.
    pub fn spawn_finalizer(&self) -> JoinHandle<()> {
        let state = self.state.clone();
        let event_tx = self.event_tx.clone();
        let keeper = self.config.keeper;
        let period = self.config.finalize_interval;
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        info!("Finalizer running every {:?} as {}", period, keeper);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let call = RootChainCall::FinalizeExits {
                            ctx: CallContext::new(keeper, unix_now()),
                        };
                        match Self::execute(&state, &event_tx, call).await {
                            Ok(CallOutcome::Finalized(payouts)) if !payouts.is_empty() => {
                                info!("Finalizer paid {} transfers", payouts.len());
                            }
                            Ok(_) => {}
                            Err(e) => warn!("Finalizer run failed: {}", e),
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Finalizer stopping");
                        break;
                    }
                }
            }
        })
    }

    /// Signal background tasks to stop.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

/// Current unix time in seconds.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
