use serde_derive::Deserialize;

use crate::configs::{deserialize_data_or_env, deserialize_optional_data_or_env};

#[derive(Debug, Clone)]
pub struct GeneralConfig {
    pub chain_id: String,
    pub indexer_id: String,
    pub metrics_server_port: u16,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            chain_id: "pio-testnet-1".to_string(),
            indexer_id: CommonGeneralConfig::default_indexer_id(),
            metrics_server_port: CommonGeneralConfig::default_metrics_server_port(),
        }
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct CommonGeneralConfig {
    #[serde(deserialize_with = "deserialize_data_or_env")]
    pub chain_id: String,
    #[serde(deserialize_with = "deserialize_optional_data_or_env", default)]
    pub indexer_id: Option<String>,
    #[serde(deserialize_with = "deserialize_optional_data_or_env", default)]
    pub metrics_server_port: Option<u16>,
}

impl CommonGeneralConfig {
    pub fn default_indexer_id() -> String {
        "block-indexer".to_string()
    }

    pub fn default_metrics_server_port() -> u16 {
        8080
    }
}

impl From<CommonGeneralConfig> for GeneralConfig {
    fn from(common_config: CommonGeneralConfig) -> Self {
        Self {
            chain_id: common_config.chain_id,
            indexer_id: common_config
                .indexer_id
                .unwrap_or_else(CommonGeneralConfig::default_indexer_id),
            metrics_server_port: common_config
                .metrics_server_port
                .unwrap_or_else(CommonGeneralConfig::default_metrics_server_port),
        }
    }
}
