//! Ethereum JSON-RPC client with rate limiting and retry logic.
//!
//! Provides the [`ChainProvider`] seam used by the collectors and its HTTP
//! implementation, [`EthRpcClient`]:
//! - Rate limiting per provider
//! - Bounded exponential backoff on transient failures
//! - Proper error handling

use crate::config::{HttpConfig, RateLimitConfig};
use crate::ethereum::parse_hex_u64;
use crate::throttle::Throttle;
use alloy_primitives::{Address, Bytes, TxHash, U256};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum RpcError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON-RPC error: code={code}, message={message}")]
    JsonRpc { code: i64, message: String },

    #[error("Deserialization error: {0}")]
    Deserialize(#[from] serde_json::Error),

    #[error("{method} failed after {attempts} attempts: {reason}")]
    RetriesExhausted {
        method: String,
        attempts: u32,
        reason: String,
    },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Read access to the chain that the collectors need.
#[async_trait]
pub trait ChainProvider: Send + Sync {
    /// Connectivity handshake. Never errors; unreachable providers report `false`.
    async fn is_connected(&self) -> bool;

    /// Current chain head block number.
    async fn block_number(&self) -> Result<u64, RpcError>;

    /// Read-only contract call (`eth_call` against the latest block).
    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, RpcError>;

    /// Value in wei of the transaction with the given hash, `None` if unknown.
    async fn transaction_value(&self, hash: TxHash) -> Result<Option<U256>, RpcError>;
}

/// JSON-RPC request structure
#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a, P: Serialize> {
    jsonrpc: &'static str,
    method: &'a str,
    params: P,
    id: u64,
}

/// JSON-RPC response structure
#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Option<serde_json::Value>,
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

/// The one field of `eth_getTransactionByHash` the collectors read.
#[derive(Debug, Deserialize)]
struct TransactionValue {
    value: U256,
}

#[derive(Debug, Serialize)]
struct CallRequest {
    to: Address,
    data: Bytes,
}

/// Rate-limited Ethereum RPC client.
pub struct EthRpcClient {
    client: reqwest::Client,
    url: String,
    throttle: Throttle,
    request_id: AtomicU64,
}

impl EthRpcClient {
    pub fn new(url: String, http: &HttpConfig, limits: RateLimitConfig) -> Result<Self, RpcError> {
        Ok(Self {
            client: http.build_client()?,
            url,
            throttle: Throttle::new(limits),
            request_id: AtomicU64::new(1),
        })
    }

    fn next_id(&self) -> u64 {
        self.request_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Determine if an error is transient (should be retried).
    fn is_transient_error(code: i64, message: &str) -> bool {
        // -32005 = rate limit / resource unavailable
        // -32603 = internal JSON-RPC error
        // -32000 = server error
        let message = message.to_lowercase();
        matches!(code, -32005 | -32603 | -32000)
            || message.contains("rate")
            || message.contains("limit")
            || message.contains("capacity")
            || message.contains("temporarily")
            || message.contains("timeout")
    }

    /// Make a single RPC call, retrying transient failures with backoff.
    ///
    /// A `null` result is handed to `R`'s deserializer, so `Option<T>` results
    /// come back as `None` rather than an error.
    async fn request<P, R>(
        &self,
        method: &str,
        params: P,
    ) -> Result<R, RpcError>
    where
        P: Serialize + Send + Sync,
        R: DeserializeOwned,
    {
        let max_attempts = self.throttle.max_attempts();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            self.throttle.ready().await;

            let request = JsonRpcRequest {
                jsonrpc: "2.0",
                method,
                params: &params,
                id: self.next_id(),
            };

            let failure = match self.client.post(&self.url).json(&request).send().await {
                Err(e) => format!("network error: {}", e),
                Ok(response) if response.status().as_u16() == 429 => "HTTP 429".to_string(),
                Ok(response) if response.status().is_server_error() => {
                    format!("HTTP {}", response.status())
                }
                Ok(response) => {
                    let body: JsonRpcResponse = match response.json().await {
                        Ok(body) => body,
                        Err(e) => {
                            return Err(RpcError::InvalidResponse(format!(
                                "{} returned a non JSON-RPC body: {}",
                                method, e
                            )))
                        }
                    };

                    match body.error {
                        Some(error) if Self::is_transient_error(error.code, &error.message) => {
                            format!("transient RPC error code={} msg={}", error.code, error.message)
                        }
                        Some(error) => {
                            return Err(RpcError::JsonRpc {
                                code: error.code,
                                message: error.message,
                            })
                        }
                        None => {
                            let result = body.result.unwrap_or(serde_json::Value::Null);
                            return Ok(serde_json::from_value(result)?);
                        }
                    }
                }
            };

            if attempt >= max_attempts {
                return Err(RpcError::RetriesExhausted {
                    method: method.to_string(),
                    attempts: attempt,
                    reason: failure,
                });
            }

            let delay = self.throttle.delay_for(attempt);
            warn!(
                "[attempt {}] {} on {}, retrying in {:?}",
                attempt, failure, method, delay
            );
            self.throttle.backoff(attempt).await;
        }
    }

    async fn get_transaction(&self, tx_hash: &TxHash) -> Result<Option<TransactionValue>, RpcError> {
        let hash_str = format!("{:?}", tx_hash);
        self.request("eth_getTransactionByHash", [hash_str]).await
    }
}

#[async_trait]
impl ChainProvider for EthRpcClient {
    async fn is_connected(&self) -> bool {
        match self.request::<_, String>("eth_chainId", json!([])).await {
            Ok(chain_id) => {
                debug!("Connected to chain id {}", chain_id);
                true
            }
            Err(e) => {
                warn!("Provider handshake failed: {}", e);
                false
            }
        }
    }

    async fn block_number(&self) -> Result<u64, RpcError> {
        let result: String = self.request("eth_blockNumber", json!([])).await?;
        parse_hex_u64(&result).ok_or_else(|| RpcError::InvalidResponse("Invalid block number".into()))
    }

    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, RpcError> {
        self.request("eth_call", (CallRequest { to, data }, "latest")).await
    }

    async fn transaction_value(&self, hash: TxHash) -> Result<Option<U256>, RpcError> {
        Ok(self.get_transaction(&hash).await?.map(|tx| tx.value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};

    fn fast_limits(max_retries: u32) -> RateLimitConfig {
        RateLimitConfig {
            requests_per_second: 1000,
            max_retries,
            base_delay_ms: 1,
        }
    }

    fn client_for(server: &Server, max_retries: u32) -> EthRpcClient {
        EthRpcClient::new(server.url(), &HttpConfig::default(), fast_limits(max_retries))
            .expect("client should build")
    }

    #[test]
    fn test_is_transient_error() {
        assert!(EthRpcClient::is_transient_error(-32005, "rate limit exceeded"));
        assert!(EthRpcClient::is_transient_error(-32603, "internal error"));
        assert!(EthRpcClient::is_transient_error(0, "Rate limit reached"));
        assert!(!EthRpcClient::is_transient_error(-32600, "invalid request"));
    }

    #[tokio::test]
    async fn test_block_number() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("POST", "/")
            .match_body(Matcher::PartialJsonString(
                r#"{"method":"eth_blockNumber"}"#.to_string(),
            ))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"jsonrpc":"2.0","id":1,"result":"0x10d4f"}"#)
            .create_async()
            .await;

        let client = client_for(&server, 1);
        assert_eq!(client.block_number().await.unwrap(), 68943);
    }

    #[tokio::test]
    async fn test_unknown_transaction_is_none() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("POST", "/")
            .with_status(200)
            .with_body(r#"{"jsonrpc":"2.0","id":1,"result":null}"#)
            .create_async()
            .await;

        let client = client_for(&server, 1);
        let value = client.transaction_value(TxHash::ZERO).await.unwrap();
        assert!(value.is_none());
    }

    #[tokio::test]
    async fn test_transaction_value() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("POST", "/")
            .match_body(Matcher::PartialJsonString(
                r#"{"method":"eth_getTransactionByHash"}"#.to_string(),
            ))
            .with_status(200)
            .with_body(format!(
                r#"{{"jsonrpc":"2.0","id":1,"result":{{"hash":"{:?}","blockNumber":"0x1","from":"{:?}","to":"{:?}","value":"0xde0b6b3a7640000"}}}}"#,
                TxHash::ZERO,
                Address::ZERO,
                Address::ZERO
            ))
            .create_async()
            .await;

        let client = client_for(&server, 1);
        let value = client.transaction_value(TxHash::ZERO).await.unwrap();
        assert_eq!(value, Some(U256::from(1_000_000_000_000_000_000u64)));
    }

    #[tokio::test]
    async fn test_server_errors_exhaust_retries() {
        let mut server = Server::new_async().await;
        let m = server
            .mock("POST", "/")
            .with_status(503)
            .expect(3)
            .create_async()
            .await;

        let client = client_for(&server, 3);
        let err = client.block_number().await.unwrap_err();
        assert!(matches!(err, RpcError::RetriesExhausted { attempts: 3, .. }));
        m.assert_async().await;
    }

    #[tokio::test]
    async fn test_permanent_rpc_error_is_not_retried() {
        let mut server = Server::new_async().await;
        let m = server
            .mock("POST", "/")
            .with_status(200)
            .with_body(r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32601,"message":"method not found"}}"#)
            .expect(1)
            .create_async()
            .await;

        let client = client_for(&server, 5);
        assert!(!client.is_connected().await);
        m.assert_async().await;
    }
}
