//! Transaction poll engine
//!
//! Every poll is a fresh read of the node: current block, transaction body
//! and receipt. Nothing is remembered between polls, so the engine is
//! restart-safe and never disagrees with the chain about what it has seen.
//!
//! A hash the node does not know comes back as `(None, None)`. That covers
//! a transaction that was never broadcast, one evicted from the mempool,
//! and one superseded by a same-nonce replacement. These cases are not
//! distinguished.

use crate::chain::ChainClient;
use crate::error::{GatewayError, GatewayResult};

use ethers::types::{Transaction, TransactionReceipt, H256, U256, U64};
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

/// Gas used above this percentage of the gas limit marks a failed
/// transaction as out of gas rather than reverted
const OUT_OF_GAS_PERCENT: u64 = 90;

/// Why a mined transaction failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    OutOfGas,
    Reverted,
}

/// Classified transaction status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
    /// Unknown to the node: never broadcast, dropped, or replaced
    Unknown,
    /// Seen by the node but not yet mined or indexed
    Pending,
    Confirmed,
    Failed(FailureKind),
}

impl TxStatus {
    /// Numeric status reported to API clients
    pub fn code(&self) -> i8 {
        match self {
            TxStatus::Unknown => -1,
            TxStatus::Failed(_) => 0,
            TxStatus::Confirmed => 1,
            TxStatus::Pending => 2,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            TxStatus::Unknown => "unknown",
            TxStatus::Pending => "pending",
            TxStatus::Confirmed => "confirmed",
            TxStatus::Failed(FailureKind::OutOfGas) => "out_of_gas",
            TxStatus::Failed(FailureKind::Reverted) => "reverted",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TxStatus::Confirmed | TxStatus::Failed(_))
    }
}

/// Chain state for one hash at the moment it was polled
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollResult {
    pub current_block_number: u64,
    pub transaction_data: Option<Transaction>,
    pub transaction_receipt: Option<TransactionReceipt>,
}

impl PollResult {
    pub fn status(&self) -> TxStatus {
        let receipt = match &self.transaction_receipt {
            Some(receipt) => receipt,
            None if self.transaction_data.is_some() => return TxStatus::Pending,
            None => return TxStatus::Unknown,
        };

        if receipt.status == Some(U64::one()) {
            return TxStatus::Confirmed;
        }

        if self.ran_out_of_gas(receipt) {
            TxStatus::Failed(FailureKind::OutOfGas)
        } else {
            TxStatus::Failed(FailureKind::Reverted)
        }
    }

    fn ran_out_of_gas(&self, receipt: &TransactionReceipt) -> bool {
        let (Some(gas_used), Some(data)) = (receipt.gas_used, &self.transaction_data) else {
            return false;
        };
        if data.gas.is_zero() {
            return false;
        }
        gas_used >= data.gas
            || gas_used.saturating_mul(U256::from(100))
                > data.gas.saturating_mul(U256::from(OUT_OF_GAS_PERCENT))
    }

    /// Turn a mined failure into its error; other statuses pass through
    pub fn into_outcome(self, tx_hash: H256) -> GatewayResult<(TxStatus, PollResult)> {
        let status = self.status();
        let gas_used = self
            .transaction_receipt
            .as_ref()
            .and_then(|r| r.gas_used)
            .map(|g| g.low_u64())
            .unwrap_or_default();

        match status {
            TxStatus::Failed(FailureKind::OutOfGas) => Err(GatewayError::OutOfGas {
                tx_hash,
                gas_used,
                gas_limit: self
                    .transaction_data
                    .as_ref()
                    .map(|d| d.gas.low_u64())
                    .unwrap_or_default(),
            }),
            TxStatus::Failed(FailureKind::Reverted) => {
                Err(GatewayError::ExecutionReverted { tx_hash, gas_used })
            }
            _ => Ok((status, self)),
        }
    }
}

/// Stateless reconciler of transaction hashes against one network
pub struct TransactionTracker {
    network: String,
    client: Arc<dyn ChainClient>,
}

impl TransactionTracker {
    pub fn new(network: &str, client: Arc<dyn ChainClient>) -> Self {
        Self {
            network: network.to_string(),
            client,
        }
    }

    /// Read the current chain view of `hash`. RPC failures are classified and
    /// returned, never retried.
    pub async fn poll(&self, hash: H256) -> GatewayResult<PollResult> {
        let current_block_number = self
            .client
            .block_number()
            .await
            .map_err(|e| GatewayError::from_provider(&self.network, &e))?;

        let transaction_data = self
            .client
            .transaction(hash)
            .await
            .map_err(|e| GatewayError::from_provider(&self.network, &e))?;

        let transaction_receipt = self
            .client
            .transaction_receipt(hash)
            .await
            .map_err(|e| GatewayError::from_provider(&self.network, &e))?;

        let result = PollResult {
            current_block_number,
            transaction_data,
            transaction_receipt,
        };

        debug!(
            "Polled {:?} on {} at block {}: {}",
            hash,
            self.network,
            current_block_number,
            result.status().label()
        );

        Ok(result)
    }
}
