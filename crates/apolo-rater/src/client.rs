//! JSON-RPC 2.0 HTTP client for the rating engine
//!
//! Low level transport shared by the Responder and CdrsV1 calls.

use apolo_core::config::RaterConfig;
use apolo_core::AppError;
use reqwest::{Client, ClientBuilder};
use serde::{de::DeserializeOwned, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, instrument};

use crate::types::{JsonRpcRequest, JsonRpcResponse};

/// Client for the rating engine and CDR service
pub struct RaterClient {
    http_client: Client,
    base_url: String,
    pub(crate) tenant: String,
    pub(crate) origin_host: String,
    timeout_ms: u64,
    request_id: AtomicU64,
}

/// Rating client errors
#[derive(Debug, Error)]
pub enum RaterError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("HTTP error: status {0}")]
    HttpError(u16),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("RPC error {0}: {1}")]
    RpcError(i32, String),

    #[error("Empty response from rating engine")]
    EmptyResponse,

    #[error("Insufficient balance: {0}")]
    InsufficientBalance(String),

    #[error("Unexpected reply: {0}")]
    UnexpectedReply(String),

    #[error("Timeout: request took longer than {0}ms")]
    Timeout(u64),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<RaterError> for AppError {
    fn from(err: RaterError) -> Self {
        match err {
            RaterError::InsufficientBalance(msg) => AppError::InsufficientCredit(msg),
            RaterError::Config(msg) => AppError::Config(msg),
            other => AppError::RatingUnavailable(other.to_string()),
        }
    }
}

/// Whether a rating engine error text means the account ran dry
fn is_balance_error(message: &str) -> bool {
    let upper = message.to_uppercase();
    upper.contains("NOT_ENOUGH_BALANCE") || upper.contains("INSUFFICIENT_CREDIT")
}

impl RaterClient {
    /// Create a new client
    ///
    /// # Arguments
    ///
    /// * `base_url` - JSON-RPC endpoint (e.g. "http://127.0.0.1:2012/jsonrpc")
    /// * `tenant` - Tenant sent with rating requests (e.g. "cgrates.org")
    /// * `timeout_ms` - Per request timeout in milliseconds
    pub fn new(base_url: &str, tenant: &str, timeout_ms: u64) -> Result<Self, RaterError> {
        if base_url.is_empty() {
            return Err(RaterError::Config("rater url is empty".to_string()));
        }

        let http_client = ClientBuilder::new()
            .timeout(Duration::from_millis(timeout_ms))
            .pool_max_idle_per_host(20)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .build()
            .map_err(|e| RaterError::Connection(e.to_string()))?;

        let origin_host = hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "apolo-charging".to_string());

        Ok(Self {
            http_client,
            base_url: base_url.to_string(),
            tenant: tenant.to_string(),
            origin_host,
            timeout_ms,
            request_id: AtomicU64::new(1),
        })
    }

    pub fn from_config(config: &RaterConfig) -> Result<Self, RaterError> {
        Self::new(&config.url, &config.tenant, config.timeout_ms)
    }

    fn next_id(&self) -> u64 {
        self.request_id.fetch_add(1, Ordering::SeqCst)
    }

    pub fn tenant(&self) -> &str {
        &self.tenant
    }

    /// Hostname reported as origin of the requests
    pub fn origin_host(&self) -> &str {
        &self.origin_host
    }

    /// Execute one JSON-RPC call
    ///
    /// # Arguments
    ///
    /// * `method` - JSON-RPC method (e.g. "Responder.MaxDebit")
    /// * `params` - Method argument, sent as the single element of `params`
    #[instrument(skip(self, params), fields(method = %method))]
    pub async fn call<T, R>(&self, method: &str, params: T) -> Result<R, RaterError>
    where
        T: Serialize + std::fmt::Debug,
        R: DeserializeOwned,
    {
        let request_id = self.next_id();

        let request = JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            method: method.to_string(),
            params: vec![params],
            id: request_id,
        };

        debug!(id = request_id, "Rater request");

        let response = self
            .http_client
            .post(&self.base_url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    RaterError::Timeout(self.timeout_ms)
                } else {
                    RaterError::Connection(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            error!(status = %status, "Rater HTTP error");
            return Err(RaterError::HttpError(status.as_u16()));
        }

        let body = response.text().await.map_err(|e| {
            RaterError::ParseError(format!("Failed to read response body: {}", e))
        })?;

        debug!(body = %body, "Rater response");

        decode_response(&body)
    }
}

/// Decode a JSON-RPC reply body into its result
pub(crate) fn decode_response<R: DeserializeOwned>(body: &str) -> Result<R, RaterError> {
    let rpc_response: JsonRpcResponse<R> = serde_json::from_str(body).map_err(|e| {
        RaterError::ParseError(format!("Failed to parse JSON: {} - Body: {}", e, body))
    })?;

    if let Some(err) = rpc_response.error {
        let message = err.message();
        if is_balance_error(&message) {
            return Err(RaterError::InsufficientBalance(message));
        }
        return Err(RaterError::RpcError(err.code(), message));
    }

    rpc_response.result.ok_or(RaterError::EmptyResponse)
}
