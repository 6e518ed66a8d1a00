//! HTTP API for polling, gas prices, cancellation and nonces

use crate::config::ApiConfig;
use crate::connector::{ConnectorRegistry, PollReport};
use crate::error::{ErrorKind, GatewayError, GatewayResult};

use async_trait::async_trait;
use axum::{
    extract::{rejection::JsonRejection, FromRequest, Query, Request, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use ethers::types::{Address, H256};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ConnectorRegistry>,
}

pub fn router(registry: Arc<ConnectorRegistry>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/network/poll", post(poll))
        .route("/network/gasPrice", get(gas_price))
        .route("/evm/cancel", post(cancel))
        .route("/evm/nonce", post(nonce))
        .route("/evm/nextNonce", post(next_nonce))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(AppState { registry })
}

/// Run the HTTP API server
pub async fn run_server(config: ApiConfig, registry: Arc<ConnectorRegistry>) -> GatewayResult<()> {
    let addr = format!("{}:{}", config.host, config.port);
    info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|source| GatewayError::Server {
            addr: addr.clone(),
            source,
        })?;
    axum::serve(listener, router(registry))
        .await
        .map_err(|source| GatewayError::Server { addr, source })?;

    Ok(())
}

/// Error body returned to clients
#[derive(Debug)]
pub struct ApiError(GatewayError);

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        Self(err)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self.0.kind() {
            ErrorKind::InvalidRequest => StatusCode::NOT_FOUND,
            ErrorKind::TransientNetwork
            | ErrorKind::RateLimit
            | ErrorKind::ExecutionFailure
            | ErrorKind::Unknown => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        warn!("Request failed with {}: {}", status, self.0);
        let body = ErrorResponse {
            error_code: self.0.error_code(),
            message: self.0.client_message(),
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

/// JSON body extractor whose rejections are invalid-request errors
pub struct ApiJson<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for ApiJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(Self(value)),
            Err(rejection) => Err(GatewayError::InvalidRequest(rejection.body_text()).into()),
        }
    }
}

fn parse_address(value: &str) -> GatewayResult<Address> {
    value
        .parse()
        .map_err(|_| GatewayError::InvalidRequest(format!("Invalid address: {}", value)))
}

fn parse_hash(value: &str) -> GatewayResult<H256> {
    value
        .parse()
        .map_err(|_| GatewayError::InvalidRequest(format!("Invalid transaction hash: {}", value)))
}

/// Liveness plus the networks with a live connector
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        networks: state.registry.connected_networks(),
    })
}

async fn poll(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<PollRequest>,
) -> ApiResult<PollReport> {
    let tx_hash = parse_hash(&req.tx_hash)?;
    let connector = state.registry.get_instance(&req.network)?;
    Ok(Json(connector.poll(tx_hash).await?))
}

async fn gas_price(
    State(state): State<AppState>,
    Query(query): Query<NetworkQuery>,
) -> ApiResult<GasPriceResponse> {
    let connector = state.registry.get_instance(&query.network)?;
    let estimate = connector.fee_estimate();
    Ok(Json(GasPriceResponse {
        network: query.network,
        gas_price: estimate.value_gwei,
        gas_price_token: connector.native_currency_symbol().to_string(),
        last_updated: estimate.last_updated.to_rfc3339(),
    }))
}

async fn cancel(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<CancelRequest>,
) -> ApiResult<CancelResponse> {
    let address = parse_address(&req.address)?;
    let connector = state.registry.get_instance(&req.network)?;
    let cancelled = connector.cancel(address, req.nonce).await?;
    Ok(Json(CancelResponse {
        network: req.network,
        tx_hash: cancelled.hash,
        nonce: cancelled.nonce,
        gas_price: cancelled.gas_price_gwei,
    }))
}

async fn nonce(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<NonceRequest>,
) -> ApiResult<NonceResponse> {
    let address = parse_address(&req.address)?;
    let connector = state.registry.get_instance(&req.network)?;
    let nonce = connector.nonce(address).await?;
    Ok(Json(NonceResponse { nonce }))
}

async fn next_nonce(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<NonceRequest>,
) -> ApiResult<NextNonceResponse> {
    let address = parse_address(&req.address)?;
    let connector = state.registry.get_instance(&req.network)?;
    let nonce = connector.next_nonce(address).await?;
    Ok(Json(NextNonceResponse { nonce }))
}

// Request types

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollRequest {
    pub network: String,
    pub tx_hash: String,
}

#[derive(Debug, Deserialize)]
pub struct NetworkQuery {
    pub network: String,
}

#[derive(Debug, Deserialize)]
pub struct CancelRequest {
    pub network: String,
    pub address: String,
    pub nonce: u64,
}

#[derive(Debug, Deserialize)]
pub struct NonceRequest {
    pub network: String,
    pub address: String,
}

// Response types

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorResponse {
    error_code: u32,
    message: String,
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    networks: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GasPriceResponse {
    pub network: String,
    pub gas_price: f64,
    pub gas_price_token: String,
    pub last_updated: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelResponse {
    pub network: String,
    pub tx_hash: H256,
    pub nonce: u64,
    pub gas_price: f64,
}

/// Last assigned nonce; `null` for an address that never sent a transaction
#[derive(Debug, Serialize)]
pub struct NonceResponse {
    pub nonce: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct NextNonceResponse {
    pub nonce: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{MockChainClient, RequestCounter};
    use crate::connector::test_support::options;
    use crate::connector::NetworkConnector;
    use crate::error::test_support::rpc_error;
    use crate::error::{RATE_LIMIT_ERROR_CODE, RATE_LIMIT_ERROR_MESSAGE};
    use crate::tx::fixtures::transaction;
    use crate::wallet::WalletStore;
    use axum::body::Body;
    use axum::http::header;

    const ADDRESS: &str = "0x82cFC8ea7043b5459d0A4C9dbCc4c42106C8c0A5";

    fn state(configure: fn(&mut MockChainClient)) -> State<AppState> {
        let registry = ConnectorRegistry::with_builder(move |network| {
            if network != "testnet" {
                return Err(GatewayError::NetworkNotConfigured {
                    network: network.to_string(),
                });
            }
            let mut client = MockChainClient::new();
            client.expect_chain_id().return_const(49797u64);
            configure(&mut client);
            NetworkConnector::start(
                network,
                options(None),
                Arc::new(client),
                RequestCounter::new(),
                Arc::new(WalletStore::default()),
            )
        });
        State(AppState {
            registry: Arc::new(registry),
        })
    }

    fn poll_request(network: &str) -> ApiJson<PollRequest> {
        ApiJson(PollRequest {
            network: network.to_string(),
            tx_hash: format!("{:?}", H256::from_low_u64_be(0x2fae)),
        })
    }

    fn nonce_request() -> ApiJson<NonceRequest> {
        ApiJson(NonceRequest {
            network: "testnet".to_string(),
            address: ADDRESS.to_string(),
        })
    }

    fn json_request(body: &str) -> Request {
        axum::http::Request::builder()
            .method("POST")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn error_body(err: ApiError) -> (StatusCode, serde_json::Value) {
        let response = err.into_response();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_poll_pending_transaction() {
        let state = state(|client| {
            client.expect_block_number().returning(|| Ok(10));
            client
                .expect_transaction()
                .returning(|h| Ok(Some(transaction(h, 100_000))));
            client.expect_transaction_receipt().returning(|_| Ok(None));
        });

        let Json(report) = poll(state, poll_request("testnet")).await.unwrap();
        let body = serde_json::to_value(&report).unwrap();
        assert_eq!(body["currentBlock"], 10);
        assert_eq!(body["txStatus"], 2);
        assert!(body["txData"].is_object());
        assert!(body["txReceipt"].is_null());
    }

    #[tokio::test]
    async fn test_poll_unknown_hash_succeeds_with_nulls() {
        let state = state(|client| {
            client.expect_block_number().returning(|| Ok(10));
            client.expect_transaction().returning(|_| Ok(None));
            client.expect_transaction_receipt().returning(|_| Ok(None));
        });

        let Json(report) = poll(state, poll_request("testnet")).await.unwrap();
        let body = serde_json::to_value(&report).unwrap();
        assert_eq!(body["txStatus"], -1);
        assert!(body["txData"].is_null());
        assert!(body["txReceipt"].is_null());
    }

    #[tokio::test]
    async fn test_rate_limit_maps_to_503() {
        let state = state(|client| {
            client
                .expect_block_number()
                .returning(|| Err(rpc_error(-32005, "daily request count exceeded")));
        });

        let err = poll(state, poll_request("testnet")).await.unwrap_err();
        let (status, body) = error_body(err).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["errorCode"], RATE_LIMIT_ERROR_CODE);
        assert_eq!(body["message"], RATE_LIMIT_ERROR_MESSAGE);
    }

    #[tokio::test]
    async fn test_unknown_network_maps_to_404() {
        let state = state(|_| {});

        let err = poll(state, poll_request("devnet")).await.unwrap_err();
        let (status, _) = error_body(err).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_bad_hash_is_invalid_request() {
        let state = state(|_| {});
        let req = ApiJson(PollRequest {
            network: "testnet".to_string(),
            tx_hash: "0x1234".to_string(),
        });

        let err = poll(state, req).await.unwrap_err();
        let (status, body) = error_body(err).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["errorCode"], 1100);
    }

    #[tokio::test]
    async fn test_wrongly_typed_body_is_invalid_request() {
        let body = format!(r#"{{"network":"testnet","address":"{}","nonce":"23"}}"#, ADDRESS);
        let Err(err) = ApiJson::<CancelRequest>::from_request(json_request(&body), &()).await else {
            panic!("string nonce was accepted");
        };

        let (status, body) = error_body(err).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["errorCode"], 1100);
    }

    #[tokio::test]
    async fn test_missing_field_is_invalid_request() {
        let body = format!(r#"{{"address":"{}"}}"#, ADDRESS);
        let Err(err) = ApiJson::<NonceRequest>::from_request(json_request(&body), &()).await else {
            panic!("body without network was accepted");
        };

        let (status, body) = error_body(err).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["errorCode"], 1100);
    }

    #[tokio::test]
    async fn test_well_formed_body_is_extracted() {
        let body = format!(r#"{{"network":"testnet","address":"{}","nonce":23}}"#, ADDRESS);
        let Ok(ApiJson(req)) = ApiJson::<CancelRequest>::from_request(json_request(&body), &()).await else {
            panic!("well-formed body was rejected");
        };
        assert_eq!(req.nonce, 23);
    }

    #[tokio::test]
    async fn test_gas_price_reads_oracle() {
        let state = state(|_| {});
        let query = Query(NetworkQuery {
            network: "testnet".to_string(),
        });

        let Json(response) = gas_price(state, query).await.unwrap();
        assert_eq!(response.gas_price, 100.0);
        assert_eq!(response.gas_price_token, "tNRG");
    }

    #[tokio::test]
    async fn test_nonce_endpoints() {
        let state = state(|client| {
            client.expect_transaction_count().returning(|_| Ok(3));
        });

        let Json(last) = nonce(state.clone(), nonce_request()).await.unwrap();
        let Json(next) = next_nonce(state.clone(), nonce_request()).await.unwrap();
        let Json(after) = nonce(state, nonce_request()).await.unwrap();
        assert_eq!(last.nonce, Some(2));
        assert_eq!(next.nonce, 3);
        assert_eq!(after.nonce, Some(3));
    }

    #[tokio::test]
    async fn test_cancel_without_wallet_maps_to_503() {
        let state = state(|client| {
            client.expect_send_raw_transaction().never();
        });
        let req = ApiJson(CancelRequest {
            network: "testnet".to_string(),
            address: ADDRESS.to_string(),
            nonce: 115,
        });

        let err = cancel(state, req).await.unwrap_err();
        let (status, body) = error_body(err).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["errorCode"], 1005);
    }

    #[tokio::test]
    async fn test_bind_conflict_is_server_error() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let config = ApiConfig {
            host: "127.0.0.1".to_string(),
            port: taken.local_addr().unwrap().port(),
        };
        let registry = Arc::new(ConnectorRegistry::with_builder(|network| {
            Err(GatewayError::NetworkNotConfigured {
                network: network.to_string(),
            })
        }));

        let err = run_server(config, registry).await.unwrap_err();
        assert!(matches!(err, GatewayError::Server { .. }));
    }
}
