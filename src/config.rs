//! Configuration management for the collector.
//!
//! Supports loading from environment variables, config files, and CLI arguments.

use crate::ethereum::ValidatedAddress;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main collector configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectorConfig {
    /// JSON-RPC endpoint of the chain provider (e.g. an Infura or Alchemy URL)
    pub provider_url: String,

    /// Token collection contract address
    pub contract_address: String,

    /// Etherscan API key
    pub etherscan_api_key: String,

    /// Base URL of the Etherscan-compatible explorer API
    #[serde(default = "default_etherscan_url")]
    pub etherscan_base_url: String,

    /// Gateway used to resolve `ipfs://` token URIs
    #[serde(default = "default_ipfs_gateway")]
    pub ipfs_gateway: String,

    /// HTTP client settings
    #[serde(default)]
    pub http: HttpConfig,

    /// Rate limiting for the chain provider
    #[serde(default = "default_provider_limits")]
    pub provider_limits: RateLimitConfig,

    /// Rate limiting for the explorer and metadata endpoints
    #[serde(default)]
    pub explorer_limits: RateLimitConfig,

    /// Output directory paths
    #[serde(default)]
    pub paths: PathConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Per-request timeout (seconds)
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            user_agent: default_user_agent(),
        }
    }
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Build the shared reqwest client for one backend.
    pub fn build_client(&self) -> reqwest::Result<reqwest::Client> {
        reqwest::Client::builder()
            .timeout(self.timeout())
            .user_agent(self.user_agent.clone())
            .tcp_keepalive(Duration::from_secs(30))
            .build()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Maximum requests per second
    #[serde(default = "default_rps")]
    pub requests_per_second: u32,

    /// Maximum attempts for a single request (1 = no retry)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base delay for exponential backoff (ms)
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: default_rps(),
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathConfig {
    /// Folder that receives the CSV and text exports
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

impl Default for PathConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
        }
    }
}

// Default value functions
fn default_etherscan_url() -> String {
    "https://api.etherscan.io/api".to_string()
}

fn default_ipfs_gateway() -> String {
    "https://ipfs.io/ipfs/".to_string()
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_user_agent() -> String {
    format!("nft-collector/{}", env!("CARGO_PKG_VERSION"))
}

fn default_rps() -> u32 {
    5 // Etherscan free tier
}

fn default_provider_limits() -> RateLimitConfig {
    RateLimitConfig {
        requests_per_second: 25,
        ..RateLimitConfig::default()
    }
}

fn default_max_retries() -> u32 {
    5
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("data")
}

impl CollectorConfig {
    /// Build a configuration from the three required values, everything else defaulted.
    pub fn new(
        provider_url: impl Into<String>,
        contract_address: impl Into<String>,
        etherscan_api_key: impl Into<String>,
    ) -> Self {
        Self {
            provider_url: provider_url.into(),
            contract_address: contract_address.into(),
            etherscan_api_key: etherscan_api_key.into(),
            etherscan_base_url: default_etherscan_url(),
            ipfs_gateway: default_ipfs_gateway(),
            http: HttpConfig::default(),
            provider_limits: default_provider_limits(),
            explorer_limits: RateLimitConfig::default(),
            paths: PathConfig::default(),
        }
    }

    /// Load configuration from environment
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let provider_url = std::env::var("PROVIDER_URL")
            .map_err(|_| anyhow::anyhow!("PROVIDER_URL environment variable not set"))?;
        let contract_address = std::env::var("CONTRACT_ADDRESS")
            .map_err(|_| anyhow::anyhow!("CONTRACT_ADDRESS environment variable not set"))?;
        let etherscan_api_key = std::env::var("ETHERSCAN_API_KEY")
            .map_err(|_| anyhow::anyhow!("ETHERSCAN_API_KEY environment variable not set"))?;

        let mut config = Self::new(provider_url, contract_address, etherscan_api_key);
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from a TOML config file with environment overrides
    pub fn load_from_file(path: &PathBuf) -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let contents = std::fs::read_to_string(path)?;
        let mut config: Self = ::toml::from_str(&contents)?;

        // Environment variables override file settings
        if let Ok(url) = std::env::var("PROVIDER_URL") {
            config.provider_url = url;
        }
        if let Ok(address) = std::env::var("CONTRACT_ADDRESS") {
            config.contract_address = address;
        }
        if let Ok(key) = std::env::var("ETHERSCAN_API_KEY") {
            config.etherscan_api_key = key;
        }
        config.apply_env_overrides();

        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("ETHERSCAN_BASE_URL") {
            self.etherscan_base_url = url;
        }
        if let Ok(gateway) = std::env::var("IPFS_GATEWAY") {
            self.ipfs_gateway = gateway;
        }
    }

    /// Validate configuration values that would otherwise fail deep inside a run
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.provider_url.trim().is_empty() {
            anyhow::bail!("provider_url must not be empty");
        }
        if self.etherscan_api_key.trim().is_empty() {
            anyhow::bail!("etherscan_api_key must not be empty");
        }
        ValidatedAddress::parse(&self.contract_address)
            .map_err(|e| anyhow::anyhow!("contract_address is invalid: {}", e))?;
        for (name, limits) in [
            ("provider_limits", &self.provider_limits),
            ("explorer_limits", &self.explorer_limits),
        ] {
            if limits.requests_per_second == 0 {
                anyhow::bail!("{}.requests_per_second must be > 0", name);
            }
            if limits.max_retries == 0 {
                anyhow::bail!("{}.max_retries must be >= 1", name);
            }
        }
        Ok(())
    }

    /// Ensure the output directory exists
    pub fn ensure_directories(&self) -> anyhow::Result<()> {
        std::fs::create_dir_all(&self.paths.output_dir)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADDRESS: &str = "0xBC4CA0EdA7647A8aB7C2061c2E118A18a936f13D";

    #[test]
    fn test_defaults_from_new() {
        let config = CollectorConfig::new("http://localhost:8545", ADDRESS, "KEY");
        assert_eq!(config.etherscan_base_url, "https://api.etherscan.io/api");
        assert_eq!(config.explorer_limits.requests_per_second, 5);
        assert_eq!(config.provider_limits.requests_per_second, 25);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_toml_defaults() {
        let config: CollectorConfig = toml::from_str(&format!(
            r#"
            provider_url = "http://localhost:8545"
            contract_address = "{ADDRESS}"
            etherscan_api_key = "KEY"

            [explorer_limits]
            requests_per_second = 2
            "#
        ))
        .expect("config should parse");

        assert_eq!(config.explorer_limits.requests_per_second, 2);
        assert_eq!(config.explorer_limits.max_retries, 5);
        assert_eq!(config.http.timeout_secs, 60);
        assert_eq!(config.paths.output_dir, PathBuf::from("data"));
    }

    #[test]
    fn test_validate_rejects_bad_address() {
        let config = CollectorConfig::new("http://localhost:8545", "0x1234", "KEY");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_rate() {
        let mut config = CollectorConfig::new("http://localhost:8545", ADDRESS, "KEY");
        config.explorer_limits.requests_per_second = 0;
        assert!(config.validate().is_err());
    }
}
