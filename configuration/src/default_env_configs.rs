// Configuration used when no config.toml is present.
// Every value is taken from the environment; unset optional values fall back to defaults.

pub const DEFAULT_CONFIG: &str = r#"
[general]
chain_id = "${CHAIN_ID}"
indexer_id = "${INDEXER_ID}"
metrics_server_port = "${METRICS_SERVER_PORT}"

[chain]
api_url = "${CHAIN_API_URL}"
request_timeout_ms = "${CHAIN_REQUEST_TIMEOUT_MS}"
max_concurrent_requests = "${CHAIN_MAX_CONCURRENT_REQUESTS}"
max_retries = "${CHAIN_MAX_RETRIES}"
retry_interval_ms = "${CHAIN_RETRY_INTERVAL_MS}"
tx_page_limit = "${CHAIN_TX_PAGE_LIMIT}"
account_prefix = "${ACCOUNT_PREFIX}"

[indexer]
tick_interval_secs = "${TICK_INTERVAL_SECS}"
history_days = "${HISTORY_DAYS}"
max_blocks_per_tick = "${MAX_BLOCKS_PER_TICK}"
retry_batch_size = "${RETRY_BATCH_SIZE}"
gov_refresh_every_ticks = "${GOV_REFRESH_EVERY_TICKS}"

[database]
database_url = "${DATABASE_URL}"
max_connections = "${MAX_CONNECTIONS}"
read_only = "${DATABASE_READ_ONLY}"
"#;
