use serde_derive::Deserialize;

use crate::configs::{deserialize_data_or_env, deserialize_optional_data_or_env};

/// Connection settings for the chain node's gRPC-gateway endpoint.
#[derive(Debug, Clone)]
pub struct ChainConfig {
    pub api_url: String,
    pub request_timeout_ms: u64,
    /// Size of the counting semaphore that gates concurrent node requests
    pub max_concurrent_requests: usize,
    /// Attempts made after the first failed call
    pub max_retries: usize,
    pub retry_interval_ms: u64,
    pub tx_page_limit: u64,
    /// Human readable part of account addresses, e.g. `pb`.
    /// Operator addresses use `{account_prefix}valoper`.
    pub account_prefix: String,
}

impl ChainConfig {
    pub fn operator_prefix(&self) -> String {
        format!("{}valoper", self.account_prefix)
    }
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:1317".to_string(),
            request_timeout_ms: CommonChainConfig::default_request_timeout_ms(),
            max_concurrent_requests: CommonChainConfig::default_max_concurrent_requests(),
            max_retries: CommonChainConfig::default_max_retries(),
            retry_interval_ms: CommonChainConfig::default_retry_interval_ms(),
            tx_page_limit: CommonChainConfig::default_tx_page_limit(),
            account_prefix: CommonChainConfig::default_account_prefix(),
        }
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct CommonChainConfig {
    #[serde(deserialize_with = "deserialize_data_or_env")]
    pub api_url: String,
    #[serde(deserialize_with = "deserialize_optional_data_or_env", default)]
    pub request_timeout_ms: Option<u64>,
    #[serde(deserialize_with = "deserialize_optional_data_or_env", default)]
    pub max_concurrent_requests: Option<usize>,
    #[serde(deserialize_with = "deserialize_optional_data_or_env", default)]
    pub max_retries: Option<usize>,
    #[serde(deserialize_with = "deserialize_optional_data_or_env", default)]
    pub retry_interval_ms: Option<u64>,
    #[serde(deserialize_with = "deserialize_optional_data_or_env", default)]
    pub tx_page_limit: Option<u64>,
    #[serde(deserialize_with = "deserialize_optional_data_or_env", default)]
    pub account_prefix: Option<String>,
}

impl CommonChainConfig {
    pub fn default_request_timeout_ms() -> u64 {
        10_000
    }

    pub fn default_max_concurrent_requests() -> usize {
        8
    }

    pub fn default_max_retries() -> usize {
        3
    }

    pub fn default_retry_interval_ms() -> u64 {
        500
    }

    pub fn default_tx_page_limit() -> u64 {
        100
    }

    pub fn default_account_prefix() -> String {
        "pb".to_string()
    }
}

impl From<CommonChainConfig> for ChainConfig {
    fn from(common_config: CommonChainConfig) -> Self {
        Self {
            api_url: common_config.api_url.trim_end_matches('/').to_string(),
            request_timeout_ms: common_config
                .request_timeout_ms
                .unwrap_or_else(CommonChainConfig::default_request_timeout_ms),
            max_concurrent_requests: common_config
                .max_concurrent_requests
                .unwrap_or_else(CommonChainConfig::default_max_concurrent_requests)
                .max(1),
            max_retries: common_config
                .max_retries
                .unwrap_or_else(CommonChainConfig::default_max_retries),
            retry_interval_ms: common_config
                .retry_interval_ms
                .unwrap_or_else(CommonChainConfig::default_retry_interval_ms),
            tx_page_limit: common_config
                .tx_page_limit
                .unwrap_or_else(CommonChainConfig::default_tx_page_limit)
                .max(1),
            account_prefix: common_config
                .account_prefix
                .unwrap_or_else(CommonChainConfig::default_account_prefix),
        }
    }
}
