//! Per-collection context shared by both collectors.
//!
//! A [`Collection`] is built once per contract. Construction performs the
//! provider handshake and the explorer ABI lookup; afterwards it owns the two
//! accumulators that the collectors append to and the exporters read from.

use crate::config::CollectorConfig;
use crate::ethereum::{symbolCall, tokenURICall, maxTokensCall, totalSupplyCall, ValidatedAddress};
use crate::explorer::{EtherscanClient, ExplorerApi, ExplorerError};
use crate::metadata::{HttpMetadataSource, MetadataSource};
use crate::rpc::{ChainProvider, EthRpcClient, RpcError};
use crate::schemas::{AttributeRecord, TransactionRecord};
use alloy_json_abi::JsonAbi;
use alloy_primitives::{Address, U256};
use alloy_sol_types::SolCall;
use polars::prelude::PolarsError;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum CollectionError {
    #[error("Can not connect to the chain provider at {0}. Check the connection and provider URL.")]
    Connectivity(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("The transactions have not been parsed successfully: {0}")]
    PaginationFailed(String),

    #[error("The {0} collection is empty, nothing to export")]
    EmptyState(&'static str),

    #[error("RPC error: {0}")]
    Rpc(#[from] RpcError),

    #[error("Explorer error: {0}")]
    Explorer(#[from] ExplorerError),

    #[error("Contract call decoding failed: {0}")]
    Abi(#[from] alloy_sol_types::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Polars error: {0}")]
    Polars(#[from] PolarsError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// External services a [`Collection`] talks to.
#[derive(Clone)]
pub struct Backends {
    pub chain: Arc<dyn ChainProvider>,
    pub explorer: Arc<dyn ExplorerApi>,
    pub metadata: Arc<dyn MetadataSource>,
}

impl Backends {
    /// HTTP implementations configured from `config`.
    pub fn http(config: &CollectorConfig) -> Result<Self, CollectionError> {
        let chain = EthRpcClient::new(
            config.provider_url.clone(),
            &config.http,
            config.provider_limits.clone(),
        )?;
        let explorer = EtherscanClient::new(
            config.etherscan_base_url.clone(),
            config.etherscan_api_key.clone(),
            &config.http,
            config.explorer_limits.clone(),
        )?;
        let metadata = HttpMetadataSource::new(&config.http, config.explorer_limits.clone())
            .map_err(|e| CollectionError::Configuration(format!("metadata client: {}", e)))?;

        Ok(Self {
            chain: Arc::new(chain),
            explorer: Arc::new(explorer),
            metadata: Arc::new(metadata),
        })
    }
}

/// Connection context and accumulated state for one token collection.
pub struct Collection {
    pub(crate) address: Address,
    pub(crate) api_key: String,
    pub(crate) ipfs_gateway: String,
    pub(crate) abi: JsonAbi,
    pub(crate) backends: Backends,
    pub(crate) attributes: Vec<AttributeRecord>,
    pub(crate) transactions: Vec<TransactionRecord>,
}

impl Collection {
    /// Connect using the HTTP backends described by `config`.
    pub async fn open(config: &CollectorConfig) -> Result<Self, CollectionError> {
        let backends = Backends::http(config)?;
        Self::with_backends(config, backends).await
    }

    /// Connect through caller-supplied backends.
    ///
    /// Fails with [`CollectionError::Connectivity`] when the provider
    /// handshake fails and with [`CollectionError::Configuration`] when the
    /// explorer does not return the contract's ABI.
    pub async fn with_backends(
        config: &CollectorConfig,
        backends: Backends,
    ) -> Result<Self, CollectionError> {
        let address = ValidatedAddress::parse(&config.contract_address)
            .map_err(|e| CollectionError::Configuration(e.to_string()))?;

        if !backends.chain.is_connected().await {
            return Err(CollectionError::Connectivity(config.provider_url.clone()));
        }

        let abi = match backends.explorer.contract_abi(*address.inner()).await {
            Ok(abi) => abi,
            Err(ExplorerError::Rejected { message, result }) => {
                return Err(CollectionError::Configuration(format!(
                    "Token's contract address or/and Etherscan API key are invalid ({}: {})",
                    message, result
                )))
            }
            Err(e) => return Err(e.into()),
        };

        info!(
            "Connected to collection {} ({} ABI functions)",
            address,
            abi.functions().count()
        );

        Ok(Self {
            address: *address.inner(),
            api_key: config.etherscan_api_key.clone(),
            ipfs_gateway: config.ipfs_gateway.clone(),
            abi,
            backends,
            attributes: Vec::new(),
            transactions: Vec::new(),
        })
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    pub fn abi(&self) -> &JsonAbi {
        &self.abi
    }

    /// Invoker for the collection contract's read-only functions.
    pub fn contract(&self) -> Contract<'_> {
        Contract {
            address: self.address,
            chain: self.backends.chain.as_ref(),
            abi: &self.abi,
        }
    }

    pub fn attributes(&self) -> &[AttributeRecord] {
        &self.attributes
    }

    pub fn transactions(&self) -> &[TransactionRecord] {
        &self.transactions
    }

    /// Clear the list of attributes.
    pub fn clean_attributes(&mut self) {
        self.attributes.clear();
    }

    /// Clear the list of transactions.
    pub fn clean_transactions(&mut self) {
        self.transactions.clear();
    }
}

/// Typed `eth_call` wrapper around the collection contract.
pub struct Contract<'a> {
    address: Address,
    chain: &'a dyn ChainProvider,
    abi: &'a JsonAbi,
}

impl Contract<'_> {
    /// Whether the contract's declared interface has a function called `name`.
    pub fn supports(&self, name: &str) -> bool {
        self.abi.function(name).is_some_and(|overloads| !overloads.is_empty())
    }

    pub async fn token_uri(&self, token_id: u64) -> Result<String, CollectionError> {
        self.invoke(tokenURICall {
            tokenId: U256::from(token_id),
        })
        .await
    }

    pub async fn max_tokens(&self) -> Result<U256, CollectionError> {
        self.invoke(maxTokensCall {}).await
    }

    pub async fn total_supply(&self) -> Result<U256, CollectionError> {
        self.invoke(totalSupplyCall {}).await
    }

    pub async fn symbol(&self) -> Result<String, CollectionError> {
        self.invoke(symbolCall {}).await
    }

    async fn invoke<C: SolCall>(&self, call: C) -> Result<C::Return, CollectionError> {
        let raw = self.chain.call(self.address, call.abi_encode().into()).await?;
        Ok(C::abi_decode_returns(&raw)?)
    }
}
