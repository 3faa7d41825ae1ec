//! Token metadata endpoint access.
//!
//! Token URIs are turned into a [`MetadataUrlTemplate`] once per run; each
//! token id is then fetched through a [`MetadataSource`].

use crate::config::{HttpConfig, RateLimitConfig};
use crate::throttle::Throttle;
use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;
use thiserror::Error;
use tracing::warn;

/// `<prefix><digits><optional .json>`
static TOKEN_URI_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<prefix>.*?)(?P<id>\d+)(?P<suffix>\.json)?$").expect("Invalid regex pattern")
});

const IPFS_SCHEME: &str = "ipfs://";

#[derive(Error, Debug)]
pub enum MetadataError {
    /// The request never produced a response body.
    #[error("Transport aborted: {0}")]
    Transport(String),

    /// A response arrived but was not a JSON document.
    #[error("Decode failed: {0}")]
    Decode(String),
}

#[async_trait]
pub trait MetadataSource: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Value, MetadataError>;
}

/// Per-token metadata URL built from the token URI of one known id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataUrlTemplate {
    prefix: String,
    suffix: String,
}

impl MetadataUrlTemplate {
    /// Strip the trailing numeric component (and a `.json` extension) off a
    /// token URI. `ipfs://` URIs are rewritten onto `gateway`.
    pub fn from_token_uri(token_uri: &str, gateway: &str) -> Option<Self> {
        let uri = token_uri.trim();
        let caps = TOKEN_URI_PATTERN.captures(uri)?;
        let prefix = &caps["prefix"];
        let suffix = caps.name("suffix").map_or("", |m| m.as_str());

        let prefix = match prefix.strip_prefix(IPFS_SCHEME) {
            Some(path) => {
                let path = path.trim_start_matches("ipfs/");
                format!("{}/{}", gateway.trim_end_matches('/'), path)
            }
            None => prefix.to_string(),
        };

        Some(Self {
            prefix,
            suffix: suffix.to_string(),
        })
    }

    pub fn url_for(&self, token_id: u64) -> String {
        format!("{}{}{}", self.prefix, token_id, self.suffix)
    }
}

/// Metadata source backed by plain HTTP GET requests.
pub struct HttpMetadataSource {
    client: reqwest::Client,
    throttle: Throttle,
}

impl HttpMetadataSource {
    pub fn new(http: &HttpConfig, limits: RateLimitConfig) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: http.build_client()?,
            throttle: Throttle::new(limits),
        })
    }
}

#[async_trait]
impl MetadataSource for HttpMetadataSource {
    async fn fetch(&self, url: &str) -> Result<Value, MetadataError> {
        let max_attempts = self.throttle.max_attempts();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            self.throttle.ready().await;

            let failure = match self.client.get(url).send().await {
                Err(e) => format!("network error: {}", e),
                Ok(response)
                    if response.status().as_u16() == 429 || response.status().is_server_error() =>
                {
                    format!("HTTP {}", response.status())
                }
                Ok(response) => {
                    let body = response
                        .text()
                        .await
                        .map_err(|e| MetadataError::Transport(e.to_string()))?;
                    return serde_json::from_str(&body)
                        .map_err(|e| MetadataError::Decode(format!("{}: {}", url, e)));
                }
            };

            if attempt >= max_attempts {
                return Err(MetadataError::Transport(format!("{}: {}", url, failure)));
            }
            warn!("[metadata attempt {}] {} for {}", attempt, failure, url);
            self.throttle.backoff(attempt).await;
        }
    }
}
