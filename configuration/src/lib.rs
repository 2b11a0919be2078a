use std::path::Path;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod configs;
mod default_env_configs;

pub use crate::configs::chain::ChainConfig;
pub use crate::configs::database::DatabaseConfig;
pub use crate::configs::general::GeneralConfig;
pub use crate::configs::indexer::IndexerConfig;
pub use crate::configs::Config;

fn parse_config(content: &str) -> anyhow::Result<Config> {
    let common_config = toml::from_str::<configs::CommonConfig>(content)?;
    Ok(common_config.into())
}

async fn read_toml_file(path_file: &Path) -> anyhow::Result<Config> {
    match std::fs::read_to_string(path_file) {
        Ok(content) => match parse_config(&content) {
            Ok(config) => Ok(config),
            Err(err) => {
                anyhow::bail!(
                    "Unable to load data from: {:?}.\n Error: {}",
                    path_file.to_str(),
                    err
                );
            }
        },
        Err(err) => {
            anyhow::bail!(
                "Could not read file: {:?}.\n Error: {}",
                path_file.to_str(),
                err
            );
        }
    }
}

pub async fn read_configuration_from_file(path_file: &str) -> anyhow::Result<Config> {
    let path_file = Path::new(path_file);
    read_toml_file(path_file).await
}

/// Reads `config.toml` from the working directory, or falls back to
/// the built-in configuration that takes every value from the environment.
pub async fn read_configuration() -> anyhow::Result<Config> {
    dotenv::dotenv().ok();
    let path_root = std::env::current_dir()?.join("config.toml");
    if path_root.exists() {
        read_toml_file(path_root.as_path()).await
    } else {
        parse_config(default_env_configs::DEFAULT_CONFIG).map_err(|err| {
            anyhow::anyhow!("Unable to load configuration from environment: {}", err)
        })
    }
}

/// Installs the global tracing subscriber.
///
/// `default_directive` is applied first (e.g. `block_indexer=info`), then every
/// directive from `RUST_LOG`. `LOG_FORMAT=json` switches the output to JSON lines.
pub fn init_tracing(default_directive: &str) -> anyhow::Result<()> {
    let mut env_filter = tracing_subscriber::EnvFilter::new(default_directive);

    if let Ok(rust_log) = std::env::var("RUST_LOG") {
        if !rust_log.is_empty() {
            for directive in rust_log.split(',').filter_map(|s| match s.parse() {
                Ok(directive) => Some(directive),
                Err(err) => {
                    eprintln!("Ignoring directive `{}`: {}", s, err);
                    None
                }
            }) {
                env_filter = env_filter.add_directive(directive);
            }
        }
    }

    let subscriber = tracing_subscriber::Registry::default().with(env_filter);
    if std::env::var("LOG_FORMAT").is_ok_and(|format| format == "json") {
        subscriber
            .with(tracing_subscriber::fmt::Layer::default().json())
            .try_init()?;
    } else {
        subscriber
            .with(tracing_subscriber::fmt::Layer::default().compact())
            .try_init()?;
    }

    Ok(())
}
