//! Block-explorer client (Etherscan-compatible API).
//!
//! Two endpoints are used: the verified-ABI lookup at construction time and
//! the NFT transfer list (`tokennfttx`) during transaction pagination.
//! Every response carries `status`/`message`/`result`; `status == "0"` covers
//! both "nothing found" and real failures, so [`EtherscanClient`] splits them
//! into [`TransferPage`] variants before they reach the collector.

use crate::config::{HttpConfig, RateLimitConfig};
use crate::throttle::Throttle;
use alloy_json_abi::JsonAbi;
use alloy_primitives::Address;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

/// Maximum number of records the explorer returns for one request.
pub const MAX_TRANSFERS_PER_PAGE: usize = 10_000;

const NO_TRANSACTIONS_MESSAGE: &str = "No transactions found";

#[derive(Error, Debug)]
pub enum ExplorerError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Explorer rejected the request: {message} ({result})")]
    Rejected { message: String, result: String },

    #[error("Invalid explorer response: {0}")]
    InvalidResponse(String),

    #[error("Explorer unavailable after {attempts} attempts: {reason}")]
    RetriesExhausted { attempts: u32, reason: String },
}

/// Outcome of one transfer-list request.
#[derive(Debug, Clone, PartialEq)]
pub enum TransferPage {
    /// Records in ascending block order, possibly fewer than requested.
    Page(Vec<Map<String, Value>>),
    /// The explorer has no transfers in the requested range.
    Exhausted,
    /// The explorer reported a failure status.
    ExplorerError(String),
}

/// Parameters of one `tokennfttx` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferQuery {
    pub contract: Address,
    pub start_block: u64,
    pub end_block: u64,
    pub offset: usize,
}

#[async_trait]
pub trait ExplorerApi: Send + Sync {
    /// Verified ABI of `address`. A non-success status is [`ExplorerError::Rejected`].
    async fn contract_abi(&self, address: Address) -> Result<JsonAbi, ExplorerError>;

    /// One page of NFT transfers for the contract, ascending by block.
    async fn token_transfers(&self, query: &TransferQuery) -> Result<TransferPage, ExplorerError>;
}

#[derive(Debug, Deserialize)]
struct ExplorerResponse {
    status: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    result: Value,
}

impl ExplorerResponse {
    fn is_ok(&self) -> bool {
        self.status == "1"
    }

    fn result_text(&self) -> String {
        match &self.result {
            Value::String(s) => s.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        }
    }

    /// Explorer throttling comes back as a normal `status == "0"` body.
    fn is_rate_limited(&self) -> bool {
        !self.is_ok() && self.result_text().to_lowercase().contains("rate limit")
    }

    fn into_transfer_page(self) -> Result<TransferPage, ExplorerError> {
        if !self.is_ok() {
            if self.message.starts_with(NO_TRANSACTIONS_MESSAGE) {
                return Ok(TransferPage::Exhausted);
            }
            let result = self.result_text();
            return Ok(TransferPage::ExplorerError(if result.is_empty() {
                self.message
            } else {
                format!("{}: {}", self.message, result)
            }));
        }

        match self.result {
            Value::Array(items) => {
                let mut records = Vec::with_capacity(items.len());
                for item in items {
                    match item {
                        Value::Object(map) => records.push(map),
                        other => {
                            return Err(ExplorerError::InvalidResponse(format!(
                                "transfer entry is not an object: {}",
                                other
                            )))
                        }
                    }
                }
                Ok(TransferPage::Page(records))
            }
            other => Err(ExplorerError::InvalidResponse(format!(
                "transfer result is not an array: {}",
                other
            ))),
        }
    }

    fn into_abi(self) -> Result<JsonAbi, ExplorerError> {
        if !self.is_ok() {
            return Err(ExplorerError::Rejected {
                result: self.result_text(),
                message: self.message,
            });
        }
        let raw = self.result_text();
        serde_json::from_str(&raw)
            .map_err(|e| ExplorerError::InvalidResponse(format!("ABI is not valid JSON: {}", e)))
    }
}

/// Rate-limited Etherscan client.
pub struct EtherscanClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    throttle: Throttle,
}

impl EtherscanClient {
    pub fn new(
        base_url: String,
        api_key: String,
        http: &HttpConfig,
        limits: RateLimitConfig,
    ) -> Result<Self, ExplorerError> {
        Ok(Self {
            client: http.build_client()?,
            base_url,
            api_key,
            throttle: Throttle::new(limits),
        })
    }

    /// GET one explorer action, retrying network errors, HTTP 429/5xx and
    /// explorer-side rate limiting.
    async fn get(&self, params: &[(&str, String)]) -> Result<ExplorerResponse, ExplorerError> {
        let max_attempts = self.throttle.max_attempts();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            self.throttle.ready().await;

            let send_result = self
                .client
                .get(&self.base_url)
                .query(params)
                .query(&[("apikey", self.api_key.as_str())])
                .send()
                .await;

            let failure = match send_result {
                Err(e) => format!("network error: {}", e),
                Ok(response)
                    if response.status().as_u16() == 429 || response.status().is_server_error() =>
                {
                    format!("HTTP {}", response.status())
                }
                Ok(response) => {
                    let body: ExplorerResponse = response.json().await.map_err(|e| {
                        ExplorerError::InvalidResponse(format!("body is not explorer JSON: {}", e))
                    })?;
                    if !body.is_rate_limited() {
                        return Ok(body);
                    }
                    format!("rate limited: {}", body.result_text())
                }
            };

            if attempt >= max_attempts {
                return Err(ExplorerError::RetriesExhausted {
                    attempts: attempt,
                    reason: failure,
                });
            }

            warn!(
                "[explorer attempt {}] {}, retrying in {:?}",
                attempt,
                failure,
                self.throttle.delay_for(attempt)
            );
            self.throttle.backoff(attempt).await;
        }
    }
}

#[async_trait]
impl ExplorerApi for EtherscanClient {
    async fn contract_abi(&self, address: Address) -> Result<JsonAbi, ExplorerError> {
        let params = [
            ("module", "contract".to_string()),
            ("action", "getabi".to_string()),
            ("address", address.to_checksum(None)),
        ];
        self.get(&params).await?.into_abi()
    }

    async fn token_transfers(&self, query: &TransferQuery) -> Result<TransferPage, ExplorerError> {
        let params = [
            ("module", "account".to_string()),
            ("action", "tokennfttx".to_string()),
            ("contractaddress", query.contract.to_checksum(None)),
            ("page", "1".to_string()),
            ("offset", query.offset.to_string()),
            ("startblock", query.start_block.to_string()),
            ("endblock", query.end_block.to_string()),
            ("sort", "asc".to_string()),
        ];
        debug!(
            "Requesting up to {} transfers in blocks {}..={}",
            query.offset, query.start_block, query.end_block
        );
        self.get(&params).await?.into_transfer_page()
    }
}
