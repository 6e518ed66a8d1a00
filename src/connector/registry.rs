//! Process-wide connector registry: at most one live connector per network

use super::{ConnectorOptions, NetworkConnector};
use crate::chain::{ChainProvider, RequestCounter};
use crate::config::Settings;
use crate::error::{GatewayError, GatewayResult};
use crate::wallet::WalletStore;

use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, info};

type ConnectorBuilder = dyn Fn(&str) -> GatewayResult<NetworkConnector> + Send + Sync;

/// Lazily built, shared connectors keyed by network name
pub struct ConnectorRegistry {
    connectors: DashMap<String, Arc<NetworkConnector>>,
    builder: Box<ConnectorBuilder>,
}

impl ConnectorRegistry {
    /// Registry that builds HTTP-backed connectors from settings
    pub fn new(settings: Arc<Settings>, wallets: Arc<WalletStore>) -> Self {
        Self::with_builder(move |network| {
            let config = settings
                .network(network)
                .ok_or_else(|| GatewayError::NetworkNotConfigured {
                    network: network.to_string(),
                })?;
            let requests = RequestCounter::new();
            let client = Arc::new(ChainProvider::new(network, config, requests.clone())?);
            let options = ConnectorOptions::from_settings(&settings, network, config);

            NetworkConnector::start(network, options, client, requests, wallets.clone())
        })
    }

    /// Registry with a custom connector factory
    pub fn with_builder<F>(builder: F) -> Self
    where
        F: Fn(&str) -> GatewayResult<NetworkConnector> + Send + Sync + 'static,
    {
        Self {
            connectors: DashMap::new(),
            builder: Box::new(builder),
        }
    }

    /// The connector for `network`, created on first use.
    ///
    /// Concurrent first calls build exactly one connector.
    pub fn get_instance(&self, network: &str) -> GatewayResult<Arc<NetworkConnector>> {
        if let Some(connector) = self.connectors.get(network) {
            return Ok(connector.clone());
        }

        let connector = self
            .connectors
            .entry(network.to_string())
            .or_try_insert_with(|| {
                debug!("Creating connector for {}", network);
                (self.builder)(network).map(Arc::new)
            })?
            .clone();
        Ok(connector)
    }

    /// Existing connector, without creating one
    pub fn get(&self, network: &str) -> Option<Arc<NetworkConnector>> {
        self.connectors.get(network).map(|c| c.clone())
    }

    /// Tear down a network's connector. Returns false if none was live.
    pub fn close(&self, network: &str) -> bool {
        match self.connectors.remove(network) {
            Some((_, connector)) => {
                connector.shutdown();
                true
            }
            None => false,
        }
    }

    /// Tear down every live connector
    pub fn close_all(&self) {
        let networks = self.connected_networks();
        for network in &networks {
            self.close(network);
        }
        info!("Closed {} connector(s)", networks.len());
    }

    pub fn connected_networks(&self) -> Vec<String> {
        let mut networks: Vec<String> = self.connectors.iter().map(|e| e.key().clone()).collect();
        networks.sort();
        networks
    }
}
