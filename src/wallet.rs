//! Signing keys for the addresses the gateway may act for

use crate::error::{GatewayError, GatewayResult};

use ethers::signers::{LocalWallet, Signer};
use ethers::types::Address;
use std::collections::HashMap;
use tracing::info;

/// Local wallets indexed by address
#[derive(Default)]
pub struct WalletStore {
    wallets: HashMap<Address, LocalWallet>,
}

impl WalletStore {
    /// Load comma-separated hex private keys from an environment variable.
    /// A missing variable yields an empty store.
    pub fn from_env(var: &str) -> GatewayResult<Self> {
        match std::env::var(var) {
            Ok(keys) => Self::from_keys(keys.split(',')),
            Err(_) => {
                info!("{} is not set - cancellations are disabled", var);
                Ok(Self::default())
            }
        }
    }

    pub fn from_keys<'a>(keys: impl IntoIterator<Item = &'a str>) -> GatewayResult<Self> {
        let mut wallets = HashMap::new();
        for key in keys.into_iter().map(str::trim).filter(|k| !k.is_empty()) {
            let wallet = key
                .parse::<LocalWallet>()
                .map_err(|e| GatewayError::Wallet(format!("Invalid private key: {}", e)))?;
            info!("Loaded wallet {:?}", wallet.address());
            wallets.insert(wallet.address(), wallet);
        }
        Ok(Self { wallets })
    }

    /// Wallet for `address`, bound to `chain_id` for replay-protected signing
    pub fn get(&self, address: Address, chain_id: u64) -> GatewayResult<LocalWallet> {
        self.wallets
            .get(&address)
            .cloned()
            .map(|w| w.with_chain_id(chain_id))
            .ok_or_else(|| GatewayError::Wallet(format!("No wallet loaded for {:?}", address)))
    }

    pub fn len(&self) -> usize {
        self.wallets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wallets.is_empty()
    }
}
