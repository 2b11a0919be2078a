use actix_web::{get, App, HttpServer, Responder};
use prometheus::{Encoder, IntCounter, IntGauge, Opts};

use crate::ChainReader;

type Result<T, E> = std::result::Result<T, E>;

fn try_create_int_counter(name: &str, help: &str) -> Result<IntCounter, prometheus::Error> {
    let counter = IntCounter::with_opts(Opts::new(name, help))?;
    prometheus::register(Box::new(counter.clone()))?;
    Ok(counter)
}

fn try_create_int_gauge(name: &str, help: &str) -> Result<IntGauge, prometheus::Error> {
    let gauge = IntGauge::with_opts(Opts::new(name, help))?;
    prometheus::register(Box::new(gauge.clone()))?;
    Ok(gauge)
}

lazy_static! {
    pub(crate) static ref BLOCKS_PROCESSED_TOTAL: IntCounter = try_create_int_counter(
        "block_indexer_blocks_processed_total",
        "Blocks committed or confirmed from cache, regardless of restarts"
    )
    .unwrap();
    pub(crate) static ref TXS_PROCESSED_TOTAL: IntCounter = try_create_int_counter(
        "block_indexer_txs_processed_total",
        "Transactions run through the extractors"
    )
    .unwrap();
    pub(crate) static ref CACHE_HITS_TOTAL: IntCounter = try_create_int_counter(
        "block_indexer_cache_hits_total",
        "Blocks skipped because the index already holds all their transactions"
    )
    .unwrap();
    pub(crate) static ref BLOCK_FAILURES_TOTAL: IntCounter = try_create_int_counter(
        "block_indexer_block_failures_total",
        "Blocks that failed and were recorded in the retry ledger"
    )
    .unwrap();
    pub(crate) static ref NON_BLOCKING_FAILURES_TOTAL: IntCounter = try_create_int_counter(
        "block_indexer_non_blocking_failures_total",
        "Reference lookups or IBC links that did not block their block's commit"
    )
    .unwrap();
    pub(crate) static ref UNKNOWN_MESSAGES_TOTAL: IntCounter = try_create_int_counter(
        "block_indexer_unknown_messages_total",
        "Messages whose type URL could not be mapped to a module and type"
    )
    .unwrap();
    pub(crate) static ref MAX_HEIGHT_READ: IntGauge = try_create_int_gauge(
        "block_indexer_max_height_read",
        "Highest block height of the live walk"
    )
    .unwrap();
    pub(crate) static ref MIN_HEIGHT_READ: IntGauge = try_create_int_gauge(
        "block_indexer_min_height_read",
        "Lowest block height reached by the backfill"
    )
    .unwrap();
    pub(crate) static ref LATEST_CHAIN_HEIGHT: IntGauge = try_create_int_gauge(
        "block_indexer_latest_chain_height",
        "Chain height reported by the node at the last tick"
    )
    .unwrap();
    pub(crate) static ref RETRY_QUEUE_DEPTH: IntGauge = try_create_int_gauge(
        "block_indexer_retry_queue_depth",
        "Entries waiting in the retry ledger"
    )
    .unwrap();
}

#[get("/metrics")]
async fn get_metrics() -> impl Responder {
    let mut buffer = Vec::new();
    if let Err(err) = prometheus::TextEncoder::new().encode(&prometheus::gather(), &mut buffer) {
        tracing::error!(target: crate::INDEXER, "could not encode metrics: {}", err);
    };

    String::from_utf8(buffer).unwrap_or_else(|err| {
        tracing::error!(
            target: crate::INDEXER,
            "metrics could not be from_utf8'd: {}",
            err
        );
        String::default()
    })
}

pub fn init_server(port: u16) -> anyhow::Result<actix_web::dev::Server> {
    tracing::info!(
        target: crate::INDEXER,
        "Starting metrics server on http://0.0.0.0:{port}/metrics"
    );

    Ok(HttpServer::new(|| App::new().service(get_metrics))
        .bind(("0.0.0.0", port))?
        .disable_signals()
        .run())
}

#[derive(Debug, Clone, Default)]
pub struct Stats {
    pub blocks_processed_count: u64,
    pub cache_hits_count: u64,
    pub last_processed_block_height: u64,
    pub retry_queue_depth: u64,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_tick(&mut self, summary: &crate::TickSummary) {
        self.blocks_processed_count += summary.blocks_indexed + summary.cache_hits;
        self.cache_hits_count += summary.cache_hits;
        if let Some(height) = summary.last_height {
            self.last_processed_block_height = height;
        }
        self.retry_queue_depth = summary.retry_queue_depth;
    }
}

/// Logs indexing speed and the distance to the chain tip every 10 seconds
pub async fn state_logger(
    stats: std::sync::Arc<tokio::sync::RwLock<Stats>>,
    chain: impl ChainReader + Send + Sync,
) {
    let interval_secs = 10;
    let mut prev_blocks_processed_count: u64 = 0;

    loop {
        tokio::time::sleep(std::time::Duration::from_secs(interval_secs)).await;
        let stats_lock = stats.read().await.clone();

        let block_processing_speed: f64 = ((stats_lock.blocks_processed_count
            - prev_blocks_processed_count) as f64)
            / (interval_secs as f64);

        let time_to_catch_the_tip_duration = if block_processing_speed > 0.0 {
            chain.latest_height().await.ok().map(|latest_height| {
                std::time::Duration::from_millis(
                    ((latest_height.saturating_sub(stats_lock.last_processed_block_height) as f64
                        / block_processing_speed)
                        * 1000f64) as u64,
                )
            })
        } else {
            None
        };

        tracing::info!(
            target: crate::INDEXER,
            "# {} | Blocks done: {} (cached {}) | Retry queue: {} | Bps {:.2} b/s{}",
            stats_lock.last_processed_block_height,
            stats_lock.blocks_processed_count,
            stats_lock.cache_hits_count,
            stats_lock.retry_queue_depth,
            block_processing_speed,
            if let Some(duration) = time_to_catch_the_tip_duration {
                format!(
                    " | {} to catch up the tip",
                    humantime::format_duration(duration)
                )
            } else {
                "".to_string()
            }
        );
        prev_blocks_processed_count = stats_lock.blocks_processed_count;
    }
}
