//! Network connectors - one per configured Energi network
//!
//! A connector wires the gas price oracle, transaction tracker, canceller
//! and nonce manager to a single chain client, and owns the background
//! tasks that keep the oracle fresh and report request counts.

mod registry;

pub use registry::ConnectorRegistry;

use crate::chain::{ChainClient, RequestCounter};
use crate::config::{NetworkConfig, Settings};
use crate::error::GatewayResult;
use crate::tx::{
    CancelledTransaction, FeeEstimate, GasPriceOracle, NonceManager, NonceSource,
    TransactionCanceller, TransactionTracker,
};
use crate::wallet::WalletStore;

use ethers::types::{Address, Transaction, TransactionReceipt, H256};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Static description of a connector, resolved from settings
#[derive(Debug, Clone)]
pub struct ConnectorOptions {
    pub chain_id: u64,
    pub node_url: String,
    pub native_currency_symbol: String,
    pub manual_gas_price: f64,
    pub gas_price_refresh_interval: Option<Duration>,
    pub metrics_log_interval: Duration,
    /// DEX connector name -> router address
    pub spenders: HashMap<String, String>,
}

impl ConnectorOptions {
    pub fn from_settings(settings: &Settings, network: &str, config: &NetworkConfig) -> Self {
        let mut spenders = HashMap::new();
        if let Some(router) = settings
            .connectors
            .energiswap
            .as_ref()
            .and_then(|c| c.router_addresses.get(network))
        {
            spenders.insert("energiswap".to_string(), router.clone());
        }

        Self {
            chain_id: config.chain_id,
            node_url: config.node_urls.first().cloned().unwrap_or_default(),
            native_currency_symbol: config.native_currency_symbol.clone(),
            manual_gas_price: settings.chain.manual_gas_price,
            gas_price_refresh_interval: config.refresh_interval(),
            metrics_log_interval: settings.metrics_log_interval(),
            spenders,
        }
    }
}

/// Result of polling a transaction hash through a connector
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollReport {
    pub network: String,
    pub current_block: u64,
    pub tx_hash: H256,
    pub tx_status: i8,
    pub tx_data: Option<Transaction>,
    pub tx_receipt: Option<TransactionReceipt>,
}

/// Chain-agnostic operations for one network
pub struct NetworkConnector {
    network: String,
    options: ConnectorOptions,
    oracle: Arc<GasPriceOracle>,
    tracker: TransactionTracker,
    canceller: TransactionCanceller,
    nonces: Arc<dyn NonceSource>,
    requests: Arc<RequestCounter>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl NetworkConnector {
    /// Build a connector and start its background tasks.
    ///
    /// Must be called inside a tokio runtime.
    pub fn start(
        network: &str,
        options: ConnectorOptions,
        client: Arc<dyn ChainClient>,
        requests: Arc<RequestCounter>,
        wallets: Arc<WalletStore>,
    ) -> GatewayResult<Self> {
        let oracle = Arc::new(GasPriceOracle::new(
            network,
            client.clone(),
            options.manual_gas_price,
            options.gas_price_refresh_interval,
        )?);
        let nonces: Arc<dyn NonceSource> = Arc::new(NonceManager::new(network, client.clone()));
        let tracker = TransactionTracker::new(network, client.clone());
        let canceller =
            TransactionCanceller::new(network, client, oracle.clone(), nonces.clone(), wallets);

        let mut tasks = Vec::new();
        if let Some(handle) = oracle.spawn_refresh() {
            tasks.push(handle);
        }
        tasks.push(tokio::spawn(log_request_counts(
            network.to_string(),
            requests.clone(),
            options.metrics_log_interval,
        )));

        info!(
            "Connector for {} started (chain {}, {})",
            network, options.chain_id, options.node_url
        );
        crate::metrics::record_connector_open(network);

        Ok(Self {
            network: network.to_string(),
            options,
            oracle,
            tracker,
            canceller,
            nonces,
            requests,
            tasks: Mutex::new(tasks),
            closed: AtomicBool::new(false),
        })
    }

    pub fn network(&self) -> &str {
        &self.network
    }

    pub fn chain_id(&self) -> u64 {
        self.options.chain_id
    }

    pub fn node_url(&self) -> &str {
        &self.options.node_url
    }

    pub fn native_currency_symbol(&self) -> &str {
        &self.options.native_currency_symbol
    }

    pub fn metrics_log_interval(&self) -> Duration {
        self.options.metrics_log_interval
    }

    /// Requests sent since the last metrics log
    pub fn request_count(&self) -> u64 {
        self.requests.get()
    }

    pub fn current_fee(&self) -> f64 {
        self.oracle.current_fee()
    }

    pub fn fee_estimate(&self) -> FeeEstimate {
        self.oracle.estimate()
    }

    /// Poll a transaction; mined failures come back as errors
    pub async fn poll(&self, tx_hash: H256) -> GatewayResult<PollReport> {
        let result = self.tracker.poll(tx_hash).await?;
        crate::metrics::record_poll(&self.network, &result.status());

        let (status, result) = result.into_outcome(tx_hash)?;
        Ok(PollReport {
            network: self.network.clone(),
            current_block: result.current_block_number,
            tx_hash,
            tx_status: status.code(),
            tx_data: result.transaction_data,
            tx_receipt: result.transaction_receipt,
        })
    }

    pub async fn cancel(&self, sender: Address, nonce: u64) -> GatewayResult<CancelledTransaction> {
        self.canceller.cancel(sender, nonce).await
    }

    pub async fn cancel_with_gas_price(
        &self,
        sender: Address,
        nonce: u64,
        gas_price_gwei: f64,
    ) -> GatewayResult<CancelledTransaction> {
        self.canceller
            .cancel_with_gas_price(sender, nonce, gas_price_gwei)
            .await
    }

    /// Last nonce assigned to `address`, `None` if it has never sent one
    pub async fn nonce(&self, address: Address) -> GatewayResult<Option<u64>> {
        self.nonces.nonce(address).await
    }

    pub async fn next_nonce(&self, address: Address) -> GatewayResult<u64> {
        self.nonces.next_nonce(address).await
    }

    /// Router address for a known DEX connector, otherwise the input itself
    pub fn spender(&self, requested: &str) -> String {
        self.options
            .spenders
            .get(requested)
            .cloned()
            .unwrap_or_else(|| requested.to_string())
    }

    /// Stop background tasks. Later calls are no-ops.
    pub fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(|e| e.into_inner()));
        for task in tasks {
            task.abort();
        }
        crate::metrics::record_connector_closed(&self.network);
        info!("Connector for {} closed", self.network);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Drop for NetworkConnector {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Log and reset the request counter once per interval
async fn log_request_counts(network: String, requests: Arc<RequestCounter>, interval: Duration) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    loop {
        ticker.tick().await;
        let count = requests.take();
        info!(
            "{}: {} request(s) sent in last {} seconds.",
            network,
            count,
            interval.as_secs()
        );
        debug!("Request counter for {} reset", network);
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub fn options(refresh: Option<Duration>) -> ConnectorOptions {
        ConnectorOptions {
            chain_id: 49797,
            node_url: "http://127.0.0.1:8545".to_string(),
            native_currency_symbol: "tNRG".to_string(),
            manual_gas_price: 100.0,
            gas_price_refresh_interval: refresh,
            metrics_log_interval: Duration::from_secs(300),
            spenders: HashMap::from([(
                "energiswap".to_string(),
                "0x4F96Fe3b7A6Cf9725f59d353F723c1bDb64CA6Aa".to_string(),
            )]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::options;
    use super::*;
    use crate::chain::MockChainClient;
    use crate::error::{GatewayError, OUT_OF_GAS_ERROR_CODE};
    use crate::tx::fixtures::{receipt, transaction};

    fn connector(client: MockChainClient, refresh: Option<Duration>) -> NetworkConnector {
        NetworkConnector::start(
            "testnet",
            options(refresh),
            Arc::new(client),
            RequestCounter::new(),
            Arc::new(WalletStore::default()),
        )
        .unwrap()
    }

    fn client() -> MockChainClient {
        let mut client = MockChainClient::new();
        client.expect_chain_id().return_const(49797u64);
        client
    }

    #[tokio::test]
    async fn test_poll_reports_pending() {
        let hash = H256::from_low_u64_be(7);
        let mut client = client();
        client.expect_block_number().returning(|| Ok(12));
        client
            .expect_transaction()
            .returning(move |h| Ok(Some(transaction(h, 100_000))));
        client.expect_transaction_receipt().returning(|_| Ok(None));

        let report = connector(client, None).poll(hash).await.unwrap();
        assert_eq!(report.current_block, 12);
        assert_eq!(report.tx_status, 2);
        assert!(report.tx_data.is_some());
        assert!(report.tx_receipt.is_none());
    }

    #[tokio::test]
    async fn test_poll_surfaces_out_of_gas() {
        let hash = H256::from_low_u64_be(7);
        let mut client = client();
        client.expect_block_number().returning(|| Ok(1));
        client
            .expect_transaction()
            .returning(move |h| Ok(Some(transaction(h, 100_000))));
        client
            .expect_transaction_receipt()
            .returning(move |h| Ok(Some(receipt(h, 0, 100_000))));

        let err = connector(client, None).poll(hash).await.unwrap_err();
        assert!(matches!(err, GatewayError::OutOfGas { .. }));
        assert_eq!(err.error_code(), OUT_OF_GAS_ERROR_CODE);
    }

    #[tokio::test]
    async fn test_spender_lookup() {
        let connector = connector(client(), None);
        assert_eq!(
            connector.spender("energiswap"),
            "0x4F96Fe3b7A6Cf9725f59d353F723c1bDb64CA6Aa"
        );
        assert_eq!(connector.spender("0xabc"), "0xabc");
    }

    #[tokio::test]
    async fn test_manual_fee_without_refresh() {
        let connector = connector(client(), None);
        assert_eq!(connector.current_fee(), 100.0);
        assert_eq!(connector.native_currency_symbol(), "tNRG");
        assert_eq!(connector.chain_id(), 49797);
    }

    #[tokio::test(start_paused = true)]
    async fn test_metrics_logger_resets_counter() {
        let requests = RequestCounter::new();
        let connector = NetworkConnector::start(
            "testnet",
            options(None),
            Arc::new(client()),
            requests.clone(),
            Arc::new(WalletStore::default()),
        )
        .unwrap();

        requests.increment();
        requests.increment();
        assert_eq!(connector.request_count(), 2);

        tokio::time::sleep(connector.metrics_log_interval() + Duration::from_secs(1)).await;
        assert_eq!(connector.request_count(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let connector = connector(client(), None);
        assert!(!connector.is_closed());
        connector.shutdown();
        connector.shutdown();
        assert!(connector.is_closed());
    }
}
