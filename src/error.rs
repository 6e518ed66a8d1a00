//! Error types for the Energi gateway

use ethers::providers::{ProviderError, RpcError};
use ethers::types::H256;
use thiserror::Error;

/// JSON-RPC error code nodes (Infura-style) use for request throttling
pub const RATE_LIMIT_RPC_CODE: i64 = -32005;

pub const NETWORK_ERROR_CODE: u32 = 1001;
pub const RATE_LIMIT_ERROR_CODE: u32 = 1002;
pub const OUT_OF_GAS_ERROR_CODE: u32 = 1003;
pub const LOAD_WALLET_ERROR_CODE: u32 = 1005;
pub const TRANSACTION_REVERTED_ERROR_CODE: u32 = 1008;
pub const TRANSACTION_REJECTED_ERROR_CODE: u32 = 1009;
pub const UNKNOWN_ERROR_CODE: u32 = 1099;
pub const INVALID_REQUEST_ERROR_CODE: u32 = 1100;

pub const NETWORK_ERROR_MESSAGE: &str =
    "Network error. Please check your node URL, API key, and Internet connection.";
pub const RATE_LIMIT_ERROR_MESSAGE: &str = "Blockchain node API rate limit exceeded.";
pub const OUT_OF_GAS_ERROR_MESSAGE: &str = "Transaction out of gas.";
pub const UNKNOWN_ERROR_MESSAGE: &str = "Unknown error.";

/// Main error type for the gateway
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Network {network} is not configured")]
    NetworkNotConfigured { network: String },

    #[error("Network error on {network}: {message}")]
    Network { network: String, message: String },

    #[error("Rate limited on {network}: {message}")]
    RateLimited { network: String, message: String },

    #[error("Transaction {tx_hash:?} ran out of gas ({gas_used} of {gas_limit})")]
    OutOfGas {
        tx_hash: H256,
        gas_used: u64,
        gas_limit: u64,
    },

    #[error("Transaction {tx_hash:?} reverted (gas used {gas_used})")]
    ExecutionReverted { tx_hash: H256, gas_used: u64 },

    #[error("Transaction rejected by {network} node ({code}): {message}")]
    Rejected {
        network: String,
        code: i64,
        message: String,
    },

    #[error("Wallet error: {0}")]
    Wallet(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Server on {addr} failed: {source}")]
    Server {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Unknown error on {network}: {message}")]
    Unknown { network: String, message: String },
}

/// Coarse error classes callers use to pick a retry policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    TransientNetwork,
    RateLimit,
    ExecutionFailure,
    Unknown,
    InvalidRequest,
}

impl GatewayError {
    /// Classify an RPC failure raised while reading chain state.
    ///
    /// Transport failures are connectivity problems, error code `-32005` is
    /// throttling, everything else (including undecodable responses) is
    /// reported as unknown with the node's message intact.
    pub fn from_provider(network: &str, err: &ProviderError) -> Self {
        if let Some(response) = err.as_error_response() {
            if response.code == RATE_LIMIT_RPC_CODE {
                return GatewayError::RateLimited {
                    network: network.to_string(),
                    message: response.message.clone(),
                };
            }
            return GatewayError::Unknown {
                network: network.to_string(),
                message: response.message.clone(),
            };
        }

        match err {
            ProviderError::HTTPError(e) => GatewayError::Network {
                network: network.to_string(),
                message: e.to_string(),
            },
            ProviderError::JsonRpcClientError(e) if !e.is_serde_error() => {
                GatewayError::Network {
                    network: network.to_string(),
                    message: e.to_string(),
                }
            }
            other => GatewayError::Unknown {
                network: network.to_string(),
                message: other.to_string(),
            },
        }
    }

    /// Classify an RPC failure raised while submitting a transaction.
    ///
    /// Same as [`GatewayError::from_provider`], except that node-side
    /// rejections ("nonce too low", "replacement transaction underpriced")
    /// keep their code and verbatim message.
    pub fn from_submission(network: &str, err: &ProviderError) -> Self {
        match err.as_error_response() {
            Some(response) if response.code != RATE_LIMIT_RPC_CODE => GatewayError::Rejected {
                network: network.to_string(),
                code: response.code,
                message: response.message.clone(),
            },
            _ => Self::from_provider(network, err),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            GatewayError::Network { .. } => ErrorKind::TransientNetwork,
            GatewayError::RateLimited { .. } => ErrorKind::RateLimit,
            GatewayError::OutOfGas { .. } | GatewayError::ExecutionReverted { .. } => {
                ErrorKind::ExecutionFailure
            }
            GatewayError::Rejected { .. }
            | GatewayError::Unknown { .. }
            | GatewayError::Wallet(_)
            | GatewayError::Server { .. } => ErrorKind::Unknown,
            GatewayError::Config(_)
            | GatewayError::NetworkNotConfigured { .. }
            | GatewayError::InvalidRequest(_) => ErrorKind::InvalidRequest,
        }
    }

    /// Stable machine-readable code surfaced to API clients
    pub fn error_code(&self) -> u32 {
        match self {
            GatewayError::Network { .. } => NETWORK_ERROR_CODE,
            GatewayError::RateLimited { .. } => RATE_LIMIT_ERROR_CODE,
            GatewayError::OutOfGas { .. } => OUT_OF_GAS_ERROR_CODE,
            GatewayError::ExecutionReverted { .. } => TRANSACTION_REVERTED_ERROR_CODE,
            GatewayError::Rejected { .. } => TRANSACTION_REJECTED_ERROR_CODE,
            GatewayError::Wallet(_) => LOAD_WALLET_ERROR_CODE,
            GatewayError::Unknown { .. } | GatewayError::Server { .. } => UNKNOWN_ERROR_CODE,
            GatewayError::Config(_)
            | GatewayError::NetworkNotConfigured { .. }
            | GatewayError::InvalidRequest(_) => INVALID_REQUEST_ERROR_CODE,
        }
    }

    /// Message returned to API clients
    pub fn client_message(&self) -> String {
        match self {
            GatewayError::Network { .. } => NETWORK_ERROR_MESSAGE.to_string(),
            GatewayError::RateLimited { .. } => RATE_LIMIT_ERROR_MESSAGE.to_string(),
            GatewayError::OutOfGas { .. } => OUT_OF_GAS_ERROR_MESSAGE.to_string(),
            GatewayError::Unknown { .. } => UNKNOWN_ERROR_MESSAGE.to_string(),
            other => other.to_string(),
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::TransientNetwork | ErrorKind::RateLimit
        )
    }
}

/// Result type for gateway operations
pub type GatewayResult<T> = Result<T, GatewayError>;

#[cfg(test)]
pub(crate) mod test_support {
    use ethers::providers::{HttpClientError, JsonRpcError, ProviderError, RpcError};

    /// Transport-level failure with no JSON-RPC payload, like a refused connection
    #[derive(Debug, thiserror::Error)]
    #[error("error sending request: connection refused")]
    pub struct ConnectionRefused;

    impl RpcError for ConnectionRefused {
        fn as_error_response(&self) -> Option<&JsonRpcError> {
            None
        }

        fn as_serde_error(&self) -> Option<&serde_json::Error> {
            None
        }
    }

    pub fn connection_refused() -> ProviderError {
        ProviderError::JsonRpcClientError(Box::new(ConnectionRefused))
    }

    pub fn rpc_error(code: i64, message: &str) -> ProviderError {
        ProviderError::JsonRpcClientError(Box::new(HttpClientError::JsonRpcError(
            JsonRpcError {
                code,
                message: message.to_string(),
                data: None,
            },
        )))
    }
}
