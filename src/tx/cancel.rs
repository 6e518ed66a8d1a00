//! Stuck transaction cancellation
//!
//! A cancellation is a zero-value transfer from the sender to itself at the
//! stuck transaction's nonce, priced above the original so nodes prefer it.
//! Whether it won the slot is observed through the ordinary poll path.

use super::gas::GasPriceOracle;
use super::nonce::NonceSource;
use crate::chain::ChainClient;
use crate::error::{GatewayError, GatewayResult};
use crate::wallet::WalletStore;

use ethers::signers::Signer;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, TransactionRequest, H256, U256};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

/// Fee multiple over the oracle's current estimate
pub const CANCEL_FEE_MULTIPLIER: f64 = 2.0;

/// Gas for a plain value transfer
const TRANSFER_GAS_LIMIT: u64 = 21_000;

const GWEI_TO_WEI: f64 = 1e9;

/// A submitted cancellation
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelledTransaction {
    pub hash: H256,
    pub nonce: u64,
    pub gas_price_gwei: f64,
}

/// Builds, signs and submits same-nonce replacement transactions
pub struct TransactionCanceller {
    network: String,
    chain_id: u64,
    client: Arc<dyn ChainClient>,
    oracle: Arc<GasPriceOracle>,
    nonces: Arc<dyn NonceSource>,
    wallets: Arc<WalletStore>,
}

impl TransactionCanceller {
    pub fn new(
        network: &str,
        client: Arc<dyn ChainClient>,
        oracle: Arc<GasPriceOracle>,
        nonces: Arc<dyn NonceSource>,
        wallets: Arc<WalletStore>,
    ) -> Self {
        Self {
            network: network.to_string(),
            chain_id: client.chain_id(),
            client,
            oracle,
            nonces,
            wallets,
        }
    }

    /// Cancel whatever is pending at `nonce` using twice the current fee
    pub async fn cancel(&self, sender: Address, nonce: u64) -> GatewayResult<CancelledTransaction> {
        info!(
            "Canceling any existing transaction(s) with nonce number {}.",
            nonce
        );
        let gas_price = self.oracle.current_fee() * CANCEL_FEE_MULTIPLIER;
        self.cancel_with_gas_price(sender, nonce, gas_price).await
    }

    /// Submit a zero-value self-transfer at `nonce` priced at `gas_price_gwei`
    pub async fn cancel_with_gas_price(
        &self,
        sender: Address,
        nonce: u64,
        gas_price_gwei: f64,
    ) -> GatewayResult<CancelledTransaction> {
        if !gas_price_gwei.is_finite() || gas_price_gwei < 0.0 {
            return Err(GatewayError::InvalidRequest(format!(
                "gas price must be a non-negative number, got {}",
                gas_price_gwei
            )));
        }

        let wallet = self.wallets.get(sender, self.chain_id)?;

        match self.nonces.nonce(sender).await {
            Ok(last) if last.map_or(true, |last| nonce > last) => warn!(
                "Nonce {} has not been used by {:?} on {} yet (last is {:?})",
                nonce, sender, self.network, last
            ),
            Ok(_) => {}
            Err(e) => warn!("Could not read nonce for {:?}: {}", sender, e),
        }

        let tx = self.build_cancel_tx(sender, nonce, gas_price_gwei);
        let signature = wallet
            .sign_transaction(&tx)
            .await
            .map_err(|e| GatewayError::Wallet(e.to_string()))?;
        let raw = tx.rlp_signed(&signature);

        let hash = self
            .client
            .send_raw_transaction(raw)
            .await
            .map_err(|e| GatewayError::from_submission(&self.network, &e))?;

        info!(
            "Cancellation {:?} sent on {} for nonce {} at {} gwei",
            hash, self.network, nonce, gas_price_gwei
        );
        crate::metrics::record_cancel(&self.network);

        Ok(CancelledTransaction {
            hash,
            nonce,
            gas_price_gwei,
        })
    }

    fn build_cancel_tx(&self, sender: Address, nonce: u64, gas_price_gwei: f64) -> TypedTransaction {
        let gas_price_wei = U256::from((gas_price_gwei * GWEI_TO_WEI).round() as u128);

        TransactionRequest::new()
            .from(sender)
            .to(sender)
            .value(0u64)
            .nonce(nonce)
            .gas(TRANSFER_GAS_LIMIT)
            .gas_price(gas_price_wei)
            .chain_id(self.chain_id)
            .into()
    }
}
