//! Configuration management for the Energi gateway
//!
//! Loads configuration from TOML files with environment variable substitution.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub gateway: GatewayConfig,
    pub api: ApiConfig,
    pub metrics: MetricsConfig,
    pub chain: ChainConfig,
    #[serde(default)]
    pub wallet: WalletConfig,
    #[serde(default)]
    pub connectors: ConnectorsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    /// How often each connector logs and resets its RPC request counter
    pub metrics_log_interval_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            metrics_log_interval_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

/// Chain-wide settings shared by every network of the chain
#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    /// Fee (gwei) used until the first refresh, and forever when refresh is disabled
    pub manual_gas_price: f64,
    pub networks: HashMap<String, NetworkConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
    pub chain_id: u64,
    pub node_urls: Vec<String>,
    pub native_currency_symbol: String,
    /// Seconds between gas price refreshes; absent disables refreshing
    pub gas_price_refresh_interval: Option<u64>,
    /// Node answers `eth_maxPriorityFeePerGas`
    #[serde(default)]
    pub priority_fee: bool,
}

impl NetworkConfig {
    pub fn refresh_interval(&self) -> Option<Duration> {
        self.gas_price_refresh_interval.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WalletConfig {
    /// Environment variable holding comma-separated hex private keys
    pub private_keys_env: String,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            private_keys_env: "GATEWAY_PRIVATE_KEYS".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConnectorsConfig {
    pub energiswap: Option<EnergiswapConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EnergiswapConfig {
    /// Router address per network name
    pub router_addresses: HashMap<String, String>,
}

impl Settings {
    /// Load settings from configuration files
    pub fn load() -> Result<Self> {
        let config_path = env::var("GATEWAY_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));

        Self::load_from(&config_path)
    }

    /// Load settings from an explicit path
    pub fn load_from(config_path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        Self::from_toml(&config_str)
    }

    /// Parse settings from TOML text, substituting `${VAR}` references first
    pub fn from_toml(config_str: &str) -> Result<Self> {
        let config_str = substitute_env_vars(config_str);

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.chain.networks.is_empty() {
            anyhow::bail!("At least one network must be configured");
        }

        if !self.chain.manual_gas_price.is_finite() || self.chain.manual_gas_price < 0.0 {
            anyhow::bail!(
                "manual_gas_price must be a non-negative number, got {}",
                self.chain.manual_gas_price
            );
        }

        if self.gateway.metrics_log_interval_secs == 0 {
            anyhow::bail!("metrics_log_interval_secs must be greater than zero");
        }

        for (name, network) in &self.chain.networks {
            if network.node_urls.is_empty() {
                anyhow::bail!("Network {} has no node URLs configured", name);
            }
            if network.gas_price_refresh_interval == Some(0) {
                anyhow::bail!("Network {} has a zero gas price refresh interval", name);
            }
            if network.gas_price_refresh_interval.is_none() {
                tracing::info!(
                    "Network {} has no gas price refresh interval - using manual gas price",
                    name
                );
            }
        }

        Ok(())
    }

    /// Get network config by name
    pub fn network(&self, name: &str) -> Option<&NetworkConfig> {
        self.chain.networks.get(name)
    }

    pub fn metrics_log_interval(&self) -> Duration {
        Duration::from_secs(self.gateway.metrics_log_interval_secs)
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    lazy_static::lazy_static! {
        static ref ENV_VAR: regex::Regex =
            regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").expect("valid env var pattern");
    }

    ENV_VAR
        .replace_all(input, |cap: &regex::Captures| {
            env::var(&cap[1]).unwrap_or_default()
        })
        .into_owned()
}
