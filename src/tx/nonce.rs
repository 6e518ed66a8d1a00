//! Nonce management for transaction submission
//!
//! Handles:
//! - Local per-address memory of the last assigned nonce
//! - Merging with the node's pending count on every read, so nonces used
//!   outside this process (or mined since) are never handed out again
//!
//! The gateway core only reads from here; allocation belongs to whatever
//! submits new transactions.

use crate::chain::ChainClient;
use crate::error::{GatewayError, GatewayResult};

use async_trait::async_trait;
use dashmap::DashMap;
use ethers::types::Address;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

/// Read side of nonce bookkeeping
#[cfg_attr(test, automock)]
#[async_trait]
pub trait NonceSource: Send + Sync {
    /// Last nonce assigned to the address, `None` if it has never sent one
    async fn nonce(&self, address: Address) -> GatewayResult<Option<u64>>;

    /// Allocate and return the nonce after the last assigned one
    async fn next_nonce(&self, address: Address) -> GatewayResult<u64>;
}

/// Per-address nonce state
#[derive(Default)]
struct AddressNonceState {
    last_assigned: Option<u64>,
}

impl AddressNonceState {
    /// Take the node's view when it is ahead of ours
    fn merge(&mut self, on_chain_last: Option<u64>) {
        if on_chain_last > self.last_assigned {
            self.last_assigned = on_chain_last;
        }
    }
}

/// Tracks nonces for every address seen on one network
pub struct NonceManager {
    network: String,
    client: Arc<dyn ChainClient>,
    addresses: DashMap<Address, Arc<Mutex<AddressNonceState>>>,
}

impl NonceManager {
    /// Create a new nonce manager
    pub fn new(network: &str, client: Arc<dyn ChainClient>) -> Self {
        Self {
            network: network.to_string(),
            client,
            addresses: DashMap::new(),
        }
    }

    fn state(&self, address: Address) -> Arc<Mutex<AddressNonceState>> {
        self.addresses.entry(address).or_default().clone()
    }

    /// Last nonce the node knows to be used, counting pending transactions
    async fn fetch_last_nonce(&self, address: Address) -> GatewayResult<Option<u64>> {
        let count = self
            .client
            .transaction_count(address)
            .await
            .map_err(|e| GatewayError::from_provider(&self.network, &e))?;
        Ok(count.checked_sub(1))
    }
}

#[async_trait]
impl NonceSource for NonceManager {
    async fn nonce(&self, address: Address) -> GatewayResult<Option<u64>> {
        let on_chain = self.fetch_last_nonce(address).await?;
        let state = self.state(address);
        let mut state = state.lock().await;
        state.merge(on_chain);
        Ok(state.last_assigned)
    }

    async fn next_nonce(&self, address: Address) -> GatewayResult<u64> {
        let on_chain = self.fetch_last_nonce(address).await?;
        let state = self.state(address);
        let mut state = state.lock().await;
        state.merge(on_chain);

        let nonce = state.last_assigned.map_or(0, |last| last + 1);
        state.last_assigned = Some(nonce);

        debug!("Allocated nonce {} for {:?} on {}", nonce, address, self.network);
        Ok(nonce)
    }
}
