//! Shared in-memory backends for collector scenario tests.
//!
//! Each fake counts the calls it receives so tests can assert that a run
//! issued no I/O at all.

#![allow(dead_code)]

use alloy_json_abi::JsonAbi;
use alloy_primitives::{Address, Bytes, TxHash, U256};
use alloy_sol_types::{SolCall, SolValue};
use async_trait::async_trait;
use nft_collector::collection::{Backends, Collection, CollectionError};
use nft_collector::config::CollectorConfig;
use nft_collector::ethereum::{maxTokensCall, symbolCall, tokenURICall, totalSupplyCall};
use nft_collector::explorer::{ExplorerApi, ExplorerError, TransferPage, TransferQuery};
use nft_collector::metadata::{MetadataError, MetadataSource};
use nft_collector::rpc::{ChainProvider, RpcError};
use serde_json::{json, Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub const CONTRACT: &str = "0xBC4CA0EdA7647A8aB7C2061c2E118A18a936f13D";
pub const METADATA_BASE: &str = "https://meta.example/token/";

/// Deterministic transaction hash for test transfer number `n`.
pub fn tx_hash(n: u64) -> TxHash {
    TxHash::from(U256::from(n + 1).to_be_bytes::<32>())
}

pub fn transfer(n: u64, block: u64, token_id: u64) -> Map<String, Value> {
    transfer_leg(
        n,
        block,
        token_id,
        "0x0000000000000000000000000000000000000001",
        "0x0000000000000000000000000000000000000002",
    )
}

/// One token movement of transaction `n`; a sale routed through a
/// marketplace contract has several legs sharing hash and token id.
pub fn transfer_leg(n: u64, block: u64, token_id: u64, from: &str, to: &str) -> Map<String, Value> {
    let entry = json!({
        "blockNumber": block.to_string(),
        "timeStamp": block.saturating_add(1_600_000_000).to_string(),
        "hash": format!("{:?}", tx_hash(n)),
        "from": from,
        "to": to,
        "tokenID": token_id.to_string(),
        "value": "0",
    });
    match entry {
        Value::Object(map) => map,
        _ => unreachable!(),
    }
}

// ============================================================================
// Chain
// ============================================================================

pub struct FakeChain {
    pub connected: bool,
    pub head: u64,
    pub max_tokens: U256,
    pub total_supply: U256,
    pub symbol: String,
    pub values: Mutex<HashMap<TxHash, U256>>,
    pub calls: AtomicUsize,
}

impl FakeChain {
    pub fn new() -> Self {
        Self {
            connected: true,
            head: 1_000,
            max_tokens: U256::from(3u64),
            total_supply: U256::from(3u64),
            symbol: "FAKE".to_string(),
            values: Mutex::new(HashMap::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_value(self, hash: TxHash, value: u64) -> Self {
        self.values.lock().unwrap().insert(hash, U256::from(value));
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChainProvider for FakeChain {
    async fn is_connected(&self) -> bool {
        self.connected
    }

    async fn block_number(&self) -> Result<u64, RpcError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.head)
    }

    async fn call(&self, _to: Address, data: Bytes) -> Result<Bytes, RpcError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if data.len() < 4 {
            return Err(RpcError::InvalidResponse("short calldata".to_string()));
        }
        let selector: [u8; 4] = [data[0], data[1], data[2], data[3]];
        let encoded = if selector == tokenURICall::SELECTOR {
            let token_id = U256::from_be_slice(&data[4..36]);
            (format!("{}{}", METADATA_BASE, token_id),).abi_encode_params()
        } else if selector == maxTokensCall::SELECTOR {
            (self.max_tokens,).abi_encode_params()
        } else if selector == totalSupplyCall::SELECTOR {
            (self.total_supply,).abi_encode_params()
        } else if selector == symbolCall::SELECTOR {
            (self.symbol.clone(),).abi_encode_params()
        } else {
            return Err(RpcError::JsonRpc {
                code: 3,
                message: "execution reverted".to_string(),
            });
        };
        Ok(Bytes::from(encoded))
    }

    async fn transaction_value(&self, hash: TxHash) -> Result<Option<U256>, RpcError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.values.lock().unwrap().get(&hash).copied())
    }
}

// ============================================================================
// Explorer
// ============================================================================

/// ABI declaring the named zero-argument `uint256` view functions.
pub fn abi_with(functions: &[&str]) -> JsonAbi {
    let entries: Vec<Value> = functions
        .iter()
        .map(|name| {
            json!({
                "type": "function",
                "name": name,
                "inputs": [],
                "outputs": [{"name": "", "type": "uint256", "internalType": "uint256"}],
                "stateMutability": "view"
            })
        })
        .collect();
    serde_json::from_value(Value::Array(entries)).unwrap()
}

/// Serves transfers from a block-sorted list the way the explorer pages them.
pub struct FakeExplorer {
    pub abi: Option<JsonAbi>,
    pub transfers: Vec<Map<String, Value>>,
    /// Answer the n-th transfer request (1-based) with an error status.
    pub fail_on_request: Option<usize>,
    pub queries: Mutex<Vec<TransferQuery>>,
    pub calls: AtomicUsize,
}

impl FakeExplorer {
    pub fn new(abi: JsonAbi) -> Self {
        Self {
            abi: Some(abi),
            transfers: Vec::new(),
            fail_on_request: None,
            queries: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_transfers(mut self, transfers: Vec<Map<String, Value>>) -> Self {
        self.transfers = transfers;
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn transfer_queries(&self) -> Vec<TransferQuery> {
        self.queries.lock().unwrap().clone()
    }
}

fn block_of(entry: &Map<String, Value>) -> Option<u64> {
    entry.get("blockNumber")?.as_str()?.parse().ok()
}

#[async_trait]
impl ExplorerApi for FakeExplorer {
    async fn contract_abi(&self, _address: Address) -> Result<JsonAbi, ExplorerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.abi.clone().ok_or_else(|| ExplorerError::Rejected {
            message: "NOTOK".to_string(),
            result: "Invalid API Key".to_string(),
        })
    }

    async fn token_transfers(&self, query: &TransferQuery) -> Result<TransferPage, ExplorerError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        let mut queries = self.queries.lock().unwrap();
        queries.push(*query);
        if self.fail_on_request == Some(queries.len()) {
            return Ok(TransferPage::ExplorerError(format!(
                "Max rate limit reached (call {})",
                n + 1
            )));
        }

        let page: Vec<Map<String, Value>> = self
            .transfers
            .iter()
            .filter(|t| match block_of(t) {
                Some(block) => block >= query.start_block && block <= query.end_block,
                // Entries without a block number ride along with any page.
                None => true,
            })
            .take(query.offset)
            .cloned()
            .collect();

        if page.is_empty() {
            Ok(TransferPage::Exhausted)
        } else {
            Ok(TransferPage::Page(page))
        }
    }
}

// ============================================================================
// Metadata
// ============================================================================

/// Metadata documents keyed by token id; unknown ids fail to decode.
pub struct FakeMetadata {
    pub docs: HashMap<u64, Value>,
    /// Ids whose request is aborted before a body arrives.
    pub aborted: HashSet<u64>,
    pub calls: AtomicUsize,
}

impl FakeMetadata {
    pub fn new() -> Self {
        Self {
            docs: HashMap::new(),
            aborted: HashSet::new(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_aborted(mut self, token_id: u64) -> Self {
        self.aborted.insert(token_id);
        self
    }

    pub fn with_doc(mut self, token_id: u64, doc: Value) -> Self {
        self.docs.insert(token_id, doc);
        self
    }

    /// Ids `first..=last`, each with a background trait and a name.
    pub fn with_range(mut self, first: u64, last: u64) -> Self {
        for id in first..=last {
            self.docs.insert(
                id,
                json!({
                    "name": format!("Token #{}", id),
                    "attributes": [
                        {"trait_type": "Background", "value": format!("Color {}", id % 2)}
                    ]
                }),
            );
        }
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MetadataSource for FakeMetadata {
    async fn fetch(&self, url: &str) -> Result<Value, MetadataError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let id = url
            .strip_prefix(METADATA_BASE)
            .and_then(|rest| rest.parse::<u64>().ok())
            .ok_or_else(|| MetadataError::Transport(format!("unexpected url {}", url)))?;
        if self.aborted.contains(&id) {
            return Err(MetadataError::Transport(format!("{}: connection reset", url)));
        }
        self.docs
            .get(&id)
            .cloned()
            .ok_or_else(|| MetadataError::Decode("expected value at line 1 column 1".to_string()))
    }
}

// ============================================================================
// Wiring
// ============================================================================

pub struct Harness {
    pub chain: Arc<FakeChain>,
    pub explorer: Arc<FakeExplorer>,
    pub metadata: Arc<FakeMetadata>,
}

impl Harness {
    pub fn new(chain: FakeChain, explorer: FakeExplorer, metadata: FakeMetadata) -> Self {
        Self {
            chain: Arc::new(chain),
            explorer: Arc::new(explorer),
            metadata: Arc::new(metadata),
        }
    }

    pub fn backends(&self) -> Backends {
        Backends {
            chain: self.chain.clone(),
            explorer: self.explorer.clone(),
            metadata: self.metadata.clone(),
        }
    }

    pub async fn open(&self) -> Result<Collection, CollectionError> {
        let config = CollectorConfig::new("http://fake-provider", CONTRACT, "TESTKEY");
        Collection::with_backends(&config, self.backends()).await
    }

    pub fn total_calls(&self) -> usize {
        self.chain.call_count() + self.explorer.call_count() + self.metadata.call_count()
    }
}
