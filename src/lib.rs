//! NFT Collection Data Collector
//!
//! Collects per-token attribute metadata and sale transactions for one NFT
//! collection and exports them as tables or JSON text files.
//!
//! # Stages
//!
//! 1. **Connection** ([`collection`]): provider handshake and contract ABI lookup
//! 2. **Attribute Collection** ([`fetch_attributes`]): walks token ids against the metadata endpoint
//! 3. **Transaction Collection** ([`fetch_transactions`]): pages explorer transfers and keeps nonzero-value sales
//! 4. **Export** ([`export`]): polars tables, CSV and JSON text files
//!
//! # Output Files
//!
//! - `attributes_<SYMBOL>.csv` / `attributes_<SYMBOL>.txt`
//! - `transactions_<SYMBOL>.csv` / `transactions_<SYMBOL>.txt`
//!
//! # Example
//!
//! ```no_run
//! use nft_collector::{Collection, CollectorConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = CollectorConfig::load()?;
//!     let mut collection = Collection::open(&config).await?;
//!     let report = collection.parse_attributes(1, Some(100)).await?;
//!     println!("Parsed {} tokens", report.appended);
//!     collection.attributes_to_table(true, "data").await?;
//!     Ok(())
//! }
//! ```

pub mod collection;
pub mod config;
pub mod ethereum;
pub mod explorer;
pub mod export;
pub mod fetch_attributes;
pub mod fetch_transactions;
pub mod metadata;
pub mod rpc;
pub mod schemas;
pub mod throttle;

// Re-export commonly used types
pub use collection::{Backends, Collection, CollectionError};
pub use config::CollectorConfig;
pub use schemas::{
    AttributeRecord, AttributeReport, PaginationEnd, TransactionRecord, TransactionReport,
};
