use std::sync::Arc;

use clap::Parser;
use database::ReaderDbManager;
use explorer_primitives::WatermarkAdvance;
use logic_block_indexer::{metrics, BlockIndexer, GrpcGatewayClient, IndexOptions, Scheduler};

use crate::configs::{Command, Opts};

mod configs;

// Categories for logging
pub(crate) const INDEXER: &str = "block_indexer";

type Indexer = BlockIndexer<GrpcGatewayClient, database::PostgresDBManager>;

async fn force_rerun(indexer: &Indexer, height: u64, from_db: bool) -> anyhow::Result<()> {
    let outcome = indexer
        .index_height(
            height,
            IndexOptions {
                force: true,
                from_db,
            },
            WatermarkAdvance::None,
        )
        .await?;
    tracing::info!(target: INDEXER, "Block {} re-indexed: {:?}", height, outcome);
    Ok(())
}

async fn print_status(db: &impl ReaderDbManager, limit: u64) -> anyhow::Result<()> {
    let watermark = db.current_watermark().await?;
    let retries = db.retry_queue(limit).await?;
    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "watermark": watermark,
            "retry_queue": retries,
        }))?
    );
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    configuration::init_tracing(&format!(
        "{}=info,{}=info,{}=info",
        INDEXER,
        logic_block_indexer::CHAIN_CLIENT,
        database::DATABASE
    ))?;
    let config = configuration::read_configuration().await?;
    let opts: Opts = Opts::parse();

    let db_manager = Arc::new(
        database::prepare_db_manager::<database::PostgresDBManager>(&config.database).await?,
    );
    if let Command::Status { limit } = opts.command {
        return print_status(db_manager.as_ref(), limit).await;
    }

    let chain = GrpcGatewayClient::new(&config.chain)?;
    let indexer = BlockIndexer::new(Arc::new(chain.clone()), db_manager, &config.chain);

    match opts.command {
        Command::Run => {
            tracing::info!(
                target: INDEXER,
                "Starting indexer {} on {}",
                config.general.indexer_id,
                config.general.chain_id
            );
            // Initiate metrics http server
            tokio::spawn(metrics::init_server(config.general.metrics_server_port)?);

            let stats = Arc::new(tokio::sync::RwLock::new(metrics::Stats::new()));
            tokio::spawn(metrics::state_logger(Arc::clone(&stats), chain));

            Scheduler::new(indexer, config.indexer).run(stats).await
        }
        Command::Tick => {
            let summary = Scheduler::new(indexer, config.indexer).tick().await?;
            tracing::info!(target: INDEXER, "{:?}", summary);
            Ok(())
        }
        Command::ForceRerun { height, from_db } => force_rerun(&indexer, height, from_db).await,
        Command::RedriveRetries { limit } => {
            let summary = indexer.redrive_retries(limit).await?;
            tracing::info!(
                target: INDEXER,
                "Re-drove {} retry entries: {} resolved, {} failed",
                summary.attempted,
                summary.resolved,
                summary.failed
            );
            Ok(())
        }
        Command::Status { .. } => Ok(()),
    }
}
