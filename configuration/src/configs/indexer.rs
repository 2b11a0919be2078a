use serde_derive::Deserialize;

use crate::configs::deserialize_optional_data_or_env;

#[derive(Debug, Clone)]
pub struct IndexerConfig {
    pub tick_interval_secs: u64,
    /// Number of distinct calendar days the backfill keeps behind the live frontier
    pub history_days: u64,
    pub max_blocks_per_tick: u64,
    pub retry_batch_size: u64,
    /// Non-final governance proposals are refreshed every N ticks, 0 disables it
    pub gov_refresh_every_ticks: u64,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: CommonIndexerConfig::default_tick_interval_secs(),
            history_days: CommonIndexerConfig::default_history_days(),
            max_blocks_per_tick: CommonIndexerConfig::default_max_blocks_per_tick(),
            retry_batch_size: CommonIndexerConfig::default_retry_batch_size(),
            gov_refresh_every_ticks: CommonIndexerConfig::default_gov_refresh_every_ticks(),
        }
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct CommonIndexerConfig {
    #[serde(deserialize_with = "deserialize_optional_data_or_env", default)]
    pub tick_interval_secs: Option<u64>,
    #[serde(deserialize_with = "deserialize_optional_data_or_env", default)]
    pub history_days: Option<u64>,
    #[serde(deserialize_with = "deserialize_optional_data_or_env", default)]
    pub max_blocks_per_tick: Option<u64>,
    #[serde(deserialize_with = "deserialize_optional_data_or_env", default)]
    pub retry_batch_size: Option<u64>,
    #[serde(deserialize_with = "deserialize_optional_data_or_env", default)]
    pub gov_refresh_every_ticks: Option<u64>,
}

impl CommonIndexerConfig {
    pub fn default_tick_interval_secs() -> u64 {
        5
    }

    pub fn default_history_days() -> u64 {
        30
    }

    pub fn default_max_blocks_per_tick() -> u64 {
        500
    }

    pub fn default_retry_batch_size() -> u64 {
        50
    }

    pub fn default_gov_refresh_every_ticks() -> u64 {
        60
    }
}

impl From<CommonIndexerConfig> for IndexerConfig {
    fn from(common_config: CommonIndexerConfig) -> Self {
        Self {
            tick_interval_secs: common_config
                .tick_interval_secs
                .unwrap_or_else(CommonIndexerConfig::default_tick_interval_secs),
            history_days: common_config
                .history_days
                .unwrap_or_else(CommonIndexerConfig::default_history_days)
                .max(1),
            max_blocks_per_tick: common_config
                .max_blocks_per_tick
                .unwrap_or_else(CommonIndexerConfig::default_max_blocks_per_tick)
                .max(1),
            retry_batch_size: common_config
                .retry_batch_size
                .unwrap_or_else(CommonIndexerConfig::default_retry_batch_size),
            gov_refresh_every_ticks: common_config
                .gov_refresh_every_ticks
                .unwrap_or_else(CommonIndexerConfig::default_gov_refresh_every_ticks),
        }
    }
}
