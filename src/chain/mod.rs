//! Chain module - the node-facing RPC boundary
//!
//! This module provides:
//! - The `ChainClient` trait the gateway core is written against
//! - An ethers-backed multi-RPC provider with automatic failover
//! - Per-connector outbound request counting

pub mod provider;

pub use provider::{ChainProvider, RequestCounter};

use async_trait::async_trait;
use ethers::providers::ProviderError;
use ethers::types::{Address, Bytes, Transaction, TransactionReceipt, H256, U256};

#[cfg(test)]
use mockall::automock;

/// JSON-RPC operations the gateway needs from a node
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ChainClient: Send + Sync {
    fn chain_id(&self) -> u64;

    /// Whether the node answers `eth_maxPriorityFeePerGas`
    fn supports_priority_fee(&self) -> bool;

    async fn block_number(&self) -> Result<u64, ProviderError>;

    /// Prevailing gas price in wei (`eth_gasPrice`)
    async fn base_fee(&self) -> Result<U256, ProviderError>;

    /// Suggested priority fee in wei (`eth_maxPriorityFeePerGas`)
    async fn priority_fee(&self) -> Result<U256, ProviderError>;

    async fn transaction(&self, hash: H256) -> Result<Option<Transaction>, ProviderError>;

    async fn transaction_receipt(
        &self,
        hash: H256,
    ) -> Result<Option<TransactionReceipt>, ProviderError>;

    /// Pending transaction count for an address
    async fn transaction_count(&self, address: Address) -> Result<u64, ProviderError>;

    async fn send_raw_transaction(&self, raw: Bytes) -> Result<H256, ProviderError>;
}
