//! Gas price oracle with a background refresh loop
//!
//! The oracle serves the last good fee estimate to any number of readers
//! without touching the network. When a refresh interval is configured, a
//! background task asks the node for the base fee (plus the priority fee on
//! networks that expose it) and swaps the estimate in. Failed refreshes keep
//! the previous estimate.

use crate::chain::ChainClient;
use crate::error::{GatewayError, GatewayResult};

use chrono::{DateTime, Utc};
use ethers::types::U256;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Wei to gwei
const WEI_TO_GWEI: f64 = 1e-9;

/// Where the current estimate came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeeSource {
    Manual,
    Node,
}

/// A fee estimate in gwei per gas
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeeEstimate {
    pub value_gwei: f64,
    pub last_updated: DateTime<Utc>,
    pub source: FeeSource,
}

/// Per-network gas price oracle
pub struct GasPriceOracle {
    network: String,
    client: Arc<dyn ChainClient>,
    estimate: RwLock<FeeEstimate>,
    refresh_interval: Option<Duration>,
}

impl GasPriceOracle {
    /// Create an oracle seeded with the manually configured gas price
    pub fn new(
        network: &str,
        client: Arc<dyn ChainClient>,
        manual_gas_price: f64,
        refresh_interval: Option<Duration>,
    ) -> GatewayResult<Self> {
        validate_fee(manual_gas_price)?;

        Ok(Self {
            network: network.to_string(),
            client,
            estimate: RwLock::new(FeeEstimate {
                value_gwei: manual_gas_price,
                last_updated: Utc::now(),
                source: FeeSource::Manual,
            }),
            refresh_interval,
        })
    }

    /// Last known fee in gwei. Never performs I/O.
    pub fn current_fee(&self) -> f64 {
        self.estimate().value_gwei
    }

    pub fn estimate(&self) -> FeeEstimate {
        // The guarded value is plain data, so a poisoned lock still holds a usable estimate
        *self.estimate.read().unwrap_or_else(|e| e.into_inner())
    }

    fn store(&self, gwei: f64, source: FeeSource) {
        let estimate = FeeEstimate {
            value_gwei: gwei,
            last_updated: Utc::now(),
            source,
        };
        *self.estimate.write().unwrap_or_else(|e| e.into_inner()) = estimate;
        crate::metrics::record_gas_price(&self.network, gwei, estimate.last_updated.timestamp());
    }

    /// Ask the node for the prevailing fee (base + priority) in gwei
    pub async fn fetch_fee(&self) -> GatewayResult<f64> {
        let base_fee = self
            .client
            .base_fee()
            .await
            .map_err(|e| GatewayError::from_provider(&self.network, &e))?;

        let priority_fee = if self.client.supports_priority_fee() {
            self.client
                .priority_fee()
                .await
                .map_err(|e| GatewayError::from_provider(&self.network, &e))?
        } else {
            U256::zero()
        };

        let total = base_fee
            .checked_add(priority_fee)
            .ok_or_else(|| self.unusable_fee("fee sum overflows"))?;
        if total.bits() > 128 {
            return Err(self.unusable_fee("fee does not fit in 128 bits"));
        }

        Ok(total.as_u128() as f64 * WEI_TO_GWEI)
    }

    fn unusable_fee(&self, reason: &str) -> GatewayError {
        GatewayError::Unknown {
            network: self.network.clone(),
            message: format!("gas price is unusable: {}", reason),
        }
    }

    /// Run one refresh attempt; on failure the previous estimate stays in place
    pub async fn refresh(&self) -> GatewayResult<f64> {
        match self.fetch_fee().await {
            Ok(gwei) => {
                self.store(gwei, FeeSource::Node);
                debug!("Gas price for {}: {} gwei", self.network, gwei);
                Ok(gwei)
            }
            Err(e) => {
                let stale = self.estimate();
                warn!(
                    "Gas price refresh failed for {}: {} (serving {} gwei from {})",
                    self.network, e, stale.value_gwei, stale.last_updated
                );
                crate::metrics::record_gas_refresh_failure(&self.network);
                Err(e)
            }
        }
    }

    /// Start the refresh loop; returns `None` when refreshing is disabled
    pub fn spawn_refresh(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let interval = self.refresh_interval?;
        let oracle = Arc::clone(self);
        Some(tokio::spawn(async move { oracle.run(interval).await }))
    }

    /// Refresh, then wait a full interval after the attempt completes.
    ///
    /// Attempts never overlap, so a slow node holds at most one request.
    async fn run(&self, interval: Duration) {
        info!(
            "Gas price refresh for {} every {}s",
            self.network,
            interval.as_secs()
        );
        loop {
            let _ = self.refresh().await;
            tokio::time::sleep(interval).await;
        }
    }
}

fn validate_fee(gwei: f64) -> GatewayResult<()> {
    if !gwei.is_finite() || gwei < 0.0 {
        return Err(GatewayError::Config(format!(
            "gas price must be a non-negative number, got {}",
            gwei
        )));
    }
    Ok(())
}
