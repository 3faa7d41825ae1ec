//! Ethereum address validation and contract bindings.
//!
//! Provides EIP-55 checksum normalization and the read-only collection
//! functions the collectors call through `eth_call`.

use alloy_primitives::{Address, U256};
use alloy_sol_types::sol;
use thiserror::Error;

sol! {
    /// Read-only surface of an ERC-721 collection contract.
    function tokenURI(uint256 tokenId) external view returns (string);
    function maxTokens() external view returns (uint256);
    function totalSupply() external view returns (uint256);
    function symbol() external view returns (string);
}

#[derive(Error, Debug)]
pub enum AddressError {
    #[error("Invalid address format: {0}")]
    InvalidFormat(String),

    #[error("Address too short or long: {0}")]
    InvalidLength(String),
}

/// Validated Ethereum address with EIP-55 checksum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ValidatedAddress(Address);

impl ValidatedAddress {
    /// Parse and validate an Ethereum address string
    pub fn parse(input: &str) -> Result<Self, AddressError> {
        let trimmed = input.trim();

        // Normalize: add 0x prefix if missing
        let normalized = if trimmed.starts_with("0x") || trimmed.starts_with("0X") {
            format!("0x{}", &trimmed[2..])
        } else {
            format!("0x{}", trimmed)
        };

        if normalized.len() != 42 {
            return Err(AddressError::InvalidLength(input.to_string()));
        }

        let address: Address = normalized
            .parse()
            .map_err(|_| AddressError::InvalidFormat(input.to_string()))?;

        Ok(Self(address))
    }

    /// Get the EIP-55 checksummed string representation
    pub fn to_checksum(&self) -> String {
        self.0.to_checksum(None)
    }

    /// Get the inner alloy Address
    pub fn inner(&self) -> &Address {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }
}

impl std::fmt::Display for ValidatedAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_checksum())
    }
}

/// Parse a `0x`-prefixed hex quantity as returned by JSON-RPC.
pub fn parse_hex_u64(value: &str) -> Option<u64> {
    let digits = value.trim().trim_start_matches("0x").trim_start_matches("0X");
    if digits.is_empty() {
        return None;
    }
    u64::from_str_radix(digits, 16).ok()
}

/// Convert a contract-returned count into a token id bound.
pub fn u256_to_u64(value: U256) -> Option<u64> {
    u64::try_from(value).ok()
}
