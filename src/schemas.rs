//! Data schemas for the collector.
//!
//! Records are kept as ordered string-keyed mappings because both sources are
//! loosely shaped: the set of traits differs per token and the explorer adds
//! fields over time. This module is the canonical definition of what a
//! schema-valid record is.

use alloy_primitives::{TxHash, U256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Key of the synthetic trait carrying the token's display name.
pub const NAME_TRAIT: &str = "Name";

/// Key of the authoritative on-chain value in a transaction record.
pub const VALUE_FIELD: &str = "value";

// ============================================================================
// PART A: Attribute Schema
// ============================================================================

/// Why a metadata document could not become an [`AttributeRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeShapeError {
    MissingAttributes,
    MissingName,
}

/// Trait name to trait value for one token, in first-seen trait order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttributeRecord(Map<String, Value>);

impl AttributeRecord {
    /// Flatten a metadata document.
    ///
    /// Traits are merged in document order; a repeated trait name keeps its
    /// first position and takes the last value. `Name` is merged last.
    pub fn from_metadata(doc: &Value) -> Result<Self, AttributeShapeError> {
        let traits = doc
            .get("attributes")
            .and_then(Value::as_array)
            .ok_or(AttributeShapeError::MissingAttributes)?;
        let name = doc
            .get("name")
            .filter(|v| !v.is_null())
            .map(value_to_string)
            .ok_or(AttributeShapeError::MissingName)?;

        let mut record = Self::default();
        for entry in traits {
            let Some(trait_type) = entry.get("trait_type").filter(|v| !v.is_null()) else {
                continue;
            };
            let value = entry.get("value").map(value_to_string).unwrap_or_default();
            record.insert(value_to_string(trait_type), value);
        }
        record.insert(NAME_TRAIT, name);

        Ok(record)
    }

    pub fn insert(&mut self, trait_type: impl Into<String>, value: impl Into<String>) {
        self.0.insert(trait_type.into(), Value::String(value.into()));
    }

    pub fn get(&self, trait_type: &str) -> Option<&str> {
        self.0.get(trait_type).and_then(Value::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str().unwrap_or_default()))
    }
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

// ============================================================================
// PART B: Transaction Schema
// ============================================================================

/// Explorer fields whose value depends on when the page was requested.
const VOLATILE_TRANSFER_FIELDS: &[&str] = &["confirmations"];

/// Explorer transfer entry that passed the presence checks.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenTransfer {
    pub hash: TxHash,
    pub block_number: u64,
    pub fields: Map<String, Value>,
}

impl TokenTransfer {
    /// Check that `hash` and `blockNumber` are present and well-formed.
    pub fn parse(fields: Map<String, Value>) -> Result<Self, String> {
        let hash = fields
            .get("hash")
            .and_then(Value::as_str)
            .ok_or_else(|| "missing hash".to_string())?
            .parse::<TxHash>()
            .map_err(|e| format!("invalid hash: {}", e))?;
        let block_number = match fields.get("blockNumber") {
            Some(Value::String(s)) => s
                .parse::<u64>()
                .map_err(|_| format!("invalid blockNumber {:?}", s))?,
            Some(Value::Number(n)) => n
                .as_u64()
                .ok_or_else(|| format!("invalid blockNumber {}", n))?,
            _ => return Err("missing blockNumber".to_string()),
        };
        Ok(Self {
            hash,
            block_number,
            fields,
        })
    }

    /// Identity of this transfer across overlapping explorer pages: every
    /// explorer field except those that change between requests. Two legs of
    /// one transaction moving the same token differ in `from`/`to`.
    pub fn transfer_key(&self) -> String {
        let stable: Map<String, Value> = self
            .fields
            .iter()
            .filter(|(k, _)| !VOLATILE_TRANSFER_FIELDS.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Value::Object(stable).to_string()
    }
}

/// Explorer transfer fields with `value` replaced by the on-chain value (wei,
/// decimal string).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionRecord(Map<String, Value>);

impl TransactionRecord {
    pub fn from_transfer(transfer: TokenTransfer, value: U256) -> Self {
        let mut fields = transfer.fields;
        fields.insert(VALUE_FIELD.to_string(), Value::String(value.to_string()));
        Self(fields)
    }

    pub fn hash(&self) -> Option<&str> {
        self.0.get("hash").and_then(Value::as_str)
    }

    pub fn value(&self) -> Option<&str> {
        self.0.get(VALUE_FIELD).and_then(Value::as_str)
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, String)> {
        self.0.iter().map(|(k, v)| (k.as_str(), value_to_string(v)))
    }
}

// ============================================================================
// PART C: Run Reports
// ============================================================================

/// Why a token id produced no record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Id 0 did not decode; the collection starts at id 1.
    StartsAtOne,
    MissingAttributes,
    MissingName,
    TransportAborted(String),
    Decode(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedToken {
    pub token_id: u64,
    pub reason: SkipReason,
}

/// Summary of one `parse_attributes` run.
#[derive(Debug, Clone)]
pub struct AttributeReport {
    pub start: u64,
    pub end: u64,
    pub appended: usize,
    pub skipped: Vec<SkippedToken>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl AttributeReport {
    pub(crate) fn begin(start: u64, end: u64) -> Self {
        let now = Utc::now();
        Self {
            start,
            end,
            appended: 0,
            skipped: Vec::new(),
            started_at: now,
            finished_at: now,
        }
    }

    pub fn boundary_warnings(&self) -> usize {
        self.skipped
            .iter()
            .filter(|s| s.reason == SkipReason::StartsAtOne)
            .count()
    }
}

/// How transaction pagination came to an end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaginationEnd {
    /// A page came back with fewer records than requested.
    ShortPage,
    /// The explorer reported no transfers in the remaining range.
    Exhausted,
}

/// Transfer that was neither kept nor dropped as zero-value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedTransfer {
    pub hash: Option<String>,
    pub reason: String,
}

/// Summary of one `parse_transactions` run.
#[derive(Debug, Clone)]
pub struct TransactionReport {
    pub start_block: u64,
    pub end_block: u64,
    pub pages: usize,
    pub appended: usize,
    pub zero_value_dropped: usize,
    pub skipped: Vec<SkippedTransfer>,
    pub end: PaginationEnd,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_flatten_adds_name_and_stringifies() {
        let doc = json!({
            "name": "Ape #1",
            "attributes": [
                {"trait_type": "Background", "value": "Blue"},
                {"trait_type": "Level", "value": 3},
            ]
        });
        let record = AttributeRecord::from_metadata(&doc).unwrap();
        assert_eq!(record.get("Background"), Some("Blue"));
        assert_eq!(record.get("Level"), Some("3"));
        assert_eq!(record.get(NAME_TRAIT), Some("Ape #1"));
        assert_eq!(record.len(), 3);
    }

    #[test]
    fn test_duplicate_traits_last_value_wins_first_position_kept() {
        let doc = json!({
            "name": "X",
            "attributes": [
                {"trait_type": "Hat", "value": "Red"},
                {"trait_type": "Eyes", "value": "Bored"},
                {"trait_type": "Hat", "value": "Green"},
            ]
        });
        let record = AttributeRecord::from_metadata(&doc).unwrap();
        let keys: Vec<&str> = record.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["Hat", "Eyes", "Name"]);
        assert_eq!(record.get("Hat"), Some("Green"));
    }

    #[test]
    fn test_name_overrides_trait_called_name() {
        let doc = json!({
            "name": "Real",
            "attributes": [{"trait_type": "Name", "value": "Fake"}]
        });
        let record = AttributeRecord::from_metadata(&doc).unwrap();
        assert_eq!(record.get(NAME_TRAIT), Some("Real"));
        assert_eq!(record.len(), 1);
    }

    #[test]
    fn test_shape_errors() {
        assert_eq!(
            AttributeRecord::from_metadata(&json!({"name": "x"})),
            Err(AttributeShapeError::MissingAttributes)
        );
        assert_eq!(
            AttributeRecord::from_metadata(&json!({"attributes": []})),
            Err(AttributeShapeError::MissingName)
        );
    }

    #[test]
    fn test_transfer_presence_checks() {
        let hash = format!("0x{}", "ab".repeat(32));
        let ok = json!({"hash": hash, "blockNumber": "12", "value": "0"});
        let transfer = TokenTransfer::parse(ok.as_object().unwrap().clone()).unwrap();
        assert_eq!(transfer.block_number, 12);

        let missing = json!({"blockNumber": "12"});
        assert!(TokenTransfer::parse(missing.as_object().unwrap().clone()).is_err());

        let bad_block = json!({"hash": hash, "blockNumber": "twelve"});
        assert!(TokenTransfer::parse(bad_block.as_object().unwrap().clone()).is_err());
    }

    #[test]
    fn test_transfer_key_separates_legs_of_one_transaction() {
        let hash = format!("0x{}", "ef".repeat(32));
        let leg = |from: &str, to: &str, confirmations: &str| {
            let raw = json!({
                "blockNumber": "11", "hash": hash, "from": from, "to": to,
                "tokenID": "5", "confirmations": confirmations,
            });
            TokenTransfer::parse(raw.as_object().unwrap().clone()).unwrap()
        };

        let seller_to_router = leg("0xaa", "0xbb", "10");
        let router_to_buyer = leg("0xbb", "0xcc", "10");
        assert_ne!(seller_to_router.transfer_key(), router_to_buyer.transfer_key());

        // Seen again on a later page with more confirmations.
        let seller_to_router_later = leg("0xaa", "0xbb", "12");
        assert_eq!(
            seller_to_router.transfer_key(),
            seller_to_router_later.transfer_key()
        );
    }

    #[test]
    fn test_record_value_is_overwritten() {
        let hash = format!("0x{}", "cd".repeat(32));
        let raw = json!({"blockNumber": "1", "hash": hash, "value": "0", "tokenID": "4"});
        let transfer = TokenTransfer::parse(raw.as_object().unwrap().clone()).unwrap();
        let record = TransactionRecord::from_transfer(transfer, U256::from(1500u64));
        assert_eq!(record.value(), Some("1500"));
        let keys: Vec<&str> = record.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["blockNumber", "hash", "value", "tokenID"]);
    }
}
