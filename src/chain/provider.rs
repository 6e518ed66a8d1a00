//! Chain provider with multi-RPC support and endpoint failover

use super::ChainClient;
use crate::config::NetworkConfig;
use crate::error::{GatewayError, GatewayResult};

use async_trait::async_trait;
use ethers::prelude::*;
use ethers::providers::{Http, Provider, RpcError};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Outbound RPC request counter shared between a provider and its connector
#[derive(Debug, Default)]
pub struct RequestCounter {
    count: AtomicU64,
}

impl RequestCounter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn increment(&self) {
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Read and reset in one step
    pub fn take(&self) -> u64 {
        self.count.swap(0, Ordering::Relaxed)
    }
}

/// Multi-provider wrapper with automatic failover
pub struct ChainProvider {
    /// Network name, used for logs and metric labels
    network: String,
    chain_id: u64,
    supports_priority_fee: bool,
    /// HTTP providers (multiple for failover)
    http_providers: Vec<Provider<Http>>,
    /// Current active provider index
    current_provider: AtomicUsize,
    requests: Arc<RequestCounter>,
}

impl ChainProvider {
    /// Create a new chain provider
    pub fn new(
        network: &str,
        config: &NetworkConfig,
        requests: Arc<RequestCounter>,
    ) -> GatewayResult<Self> {
        let mut http_providers = Vec::new();

        for url in &config.node_urls {
            match Provider::<Http>::try_from(url.as_str()) {
                Ok(provider) => {
                    let provider = provider.interval(Duration::from_millis(100));
                    http_providers.push(provider);
                    debug!("Added HTTP provider for {}: {}", network, url);
                }
                Err(e) => {
                    warn!("Failed to create provider for {}: {}", url, e);
                }
            }
        }

        if http_providers.is_empty() {
            return Err(GatewayError::Config(format!(
                "No valid node URLs for network {}",
                network
            )));
        }

        Ok(Self {
            network: network.to_string(),
            chain_id: config.chain_id,
            supports_priority_fee: config.priority_fee,
            http_providers,
            current_provider: AtomicUsize::new(0),
            requests,
        })
    }

    /// Get the active HTTP provider, counting the request it is about to serve
    fn http(&self) -> &Provider<Http> {
        self.requests.increment();
        crate::metrics::record_rpc_request(&self.network);
        let idx = self.current_provider.load(Ordering::Relaxed);
        &self.http_providers[idx % self.http_providers.len()]
    }

    /// Switch to next available provider for subsequent requests
    fn failover(&self) {
        if self.http_providers.len() < 2 {
            return;
        }
        let current = self.current_provider.load(Ordering::Relaxed);
        let next = (current + 1) % self.http_providers.len();
        self.current_provider.store(next, Ordering::Relaxed);
        warn!("Network {} failover to provider {}", self.network, next);
    }

    /// Rotate away from an endpoint that failed at the transport level.
    ///
    /// The failed call itself is not retried; callers own retry policy.
    fn observe<T>(&self, result: Result<T, ProviderError>) -> Result<T, ProviderError> {
        if let Err(e) = &result {
            if !RpcError::is_error_response(e) {
                self.failover();
            }
        }
        result
    }
}

#[async_trait]
impl ChainClient for ChainProvider {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    fn supports_priority_fee(&self) -> bool {
        self.supports_priority_fee
    }

    async fn block_number(&self) -> Result<u64, ProviderError> {
        let result = self.http().get_block_number().await.map(|b| b.as_u64());
        self.observe(result)
    }

    async fn base_fee(&self) -> Result<U256, ProviderError> {
        let result = self.http().get_gas_price().await;
        self.observe(result)
    }

    async fn priority_fee(&self) -> Result<U256, ProviderError> {
        let result = self
            .http()
            .request::<_, U256>("eth_maxPriorityFeePerGas", ())
            .await;
        self.observe(result)
    }

    async fn transaction(&self, hash: H256) -> Result<Option<Transaction>, ProviderError> {
        let result = self.http().get_transaction(hash).await;
        self.observe(result)
    }

    async fn transaction_receipt(
        &self,
        hash: H256,
    ) -> Result<Option<TransactionReceipt>, ProviderError> {
        let result = self.http().get_transaction_receipt(hash).await;
        self.observe(result)
    }

    async fn transaction_count(&self, address: Address) -> Result<u64, ProviderError> {
        let result = self
            .http()
            .get_transaction_count(address, Some(BlockNumber::Pending.into()))
            .await
            .map(|n| n.as_u64());
        self.observe(result)
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> Result<H256, ProviderError> {
        let result = self
            .http()
            .send_raw_transaction(raw)
            .await
            .map(|pending| pending.tx_hash());
        self.observe(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn network_config(urls: &[&str]) -> NetworkConfig {
        NetworkConfig {
            chain_id: 49797,
            node_urls: urls.iter().map(|u| u.to_string()).collect(),
            native_currency_symbol: "tNRG".to_string(),
            gas_price_refresh_interval: None,
            priority_fee: false,
        }
    }

    #[test]
    fn test_request_counter_take_resets() {
        let counter = RequestCounter::new();
        counter.increment();
        counter.increment();
        assert_eq!(counter.get(), 2);
        assert_eq!(counter.take(), 2);
        assert_eq!(counter.get(), 0);
    }

    #[test]
    fn test_rejects_when_no_url_parses() {
        let result = ChainProvider::new("testnet", &network_config(&["not a url"]), RequestCounter::new());
        assert!(matches!(result, Err(GatewayError::Config(_))));
    }

    #[test]
    fn test_failover_rotates_and_counts_requests() {
        let counter = RequestCounter::new();
        let provider = ChainProvider::new(
            "testnet",
            &network_config(&["http://127.0.0.1:8545", "http://127.0.0.1:8546"]),
            counter.clone(),
        )
        .unwrap();

        assert_eq!(provider.chain_id(), 49797);
        assert!(!provider.supports_priority_fee());

        let _ = provider.http();
        provider.failover();
        assert_eq!(provider.current_provider.load(Ordering::Relaxed), 1);
        provider.failover();
        assert_eq!(provider.current_provider.load(Ordering::Relaxed), 0);
        assert_eq!(counter.get(), 1);
    }
}
