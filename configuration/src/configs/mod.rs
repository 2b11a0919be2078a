use std::str::FromStr;

use serde::Deserialize;

pub(crate) mod chain;
pub(crate) mod database;
pub(crate) mod general;
pub(crate) mod indexer;

lazy_static::lazy_static! {
    static ref RE_NAME_ENV: regex::Regex = regex::Regex::new(r"\$\{(?<env_name>\w+)}").unwrap();
}

fn get_env_var<T>(env_var_name: &str) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Debug,
{
    let var = dotenv::var(env_var_name).map_err(|err| {
        anyhow::anyhow!(
            "Failed to get env var: {:?}. Error: {:?}",
            env_var_name,
            err
        )
    })?;
    var.parse::<T>().map_err(|err| {
        anyhow::anyhow!(
            "Failed to parse env var: {:?}. Error: {:?}",
            env_var_name,
            err
        )
    })
}

pub(crate) fn deserialize_data_or_env<'de, D, T>(data: D) -> Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
    T: serde::de::DeserializeOwned + FromStr,
    <T as FromStr>::Err: std::fmt::Debug,
{
    let value = serde_json::Value::deserialize(data)?;
    if let serde_json::Value::String(value) = &value {
        if let Some(caps) = RE_NAME_ENV.captures(value) {
            return get_env_var::<T>(&caps["env_name"]).map_err(serde::de::Error::custom);
        }
    }
    serde_json::from_value::<T>(value).map_err(serde::de::Error::custom)
}

pub(crate) fn deserialize_optional_data_or_env<'de, D, T>(data: D) -> Result<Option<T>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: serde::de::DeserializeOwned + FromStr,
    <T as FromStr>::Err: std::fmt::Debug,
{
    Ok(match deserialize_data_or_env(data) {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::debug!("Optional config value is not set: {:?}", err);
            None
        }
    })
}

/// Raw shape of the TOML file. Optional values are resolved against their
/// defaults when converted into [`Config`].
#[derive(Deserialize, Debug, Clone, Default)]
pub(crate) struct CommonConfig {
    pub general: general::CommonGeneralConfig,
    pub chain: chain::CommonChainConfig,
    #[serde(default)]
    pub indexer: indexer::CommonIndexerConfig,
    pub database: database::CommonDatabaseConfig,
}

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub general: general::GeneralConfig,
    pub chain: chain::ChainConfig,
    pub indexer: indexer::IndexerConfig,
    pub database: database::DatabaseConfig,
}

impl From<CommonConfig> for Config {
    fn from(common_config: CommonConfig) -> Self {
        Self {
            general: common_config.general.into(),
            chain: common_config.chain.into(),
            indexer: common_config.indexer.into(),
            database: common_config.database.into(),
        }
    }
}
