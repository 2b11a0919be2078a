//! The single recurring driver that owns height advancement.
//!
//! Until the stored history covers `history_days` distinct days, a tick walks
//! down from the lowest indexed height (backfill). After that it walks up from
//! the highest indexed height to the chain tip (live). Every tick then re-drives
//! the retry ledger and, periodically, refreshes non-final governance proposals.

use std::sync::Arc;

use database::IndexerDbManager;
use explorer_primitives::{BlockHeight, WatermarkAdvance};

use crate::block_indexer::{BlockIndexer, IndexOptions, IndexOutcome};
use crate::chain_client::ChainReader;
use crate::metrics;
use crate::retry_ledger::RedriveSummary;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickMode {
    Backfill,
    Live,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TickSummary {
    pub mode: TickMode,
    pub latest_height: BlockHeight,
    pub blocks_indexed: u64,
    pub cache_hits: u64,
    /// Last height the walk completed
    pub last_height: Option<BlockHeight>,
    /// Error that stopped the walk early
    pub stopped_by: Option<String>,
    pub redrive: RedriveSummary,
    pub proposals_refreshed: usize,
    pub retry_queue_depth: u64,
}

impl TickSummary {
    fn new(mode: TickMode, latest_height: BlockHeight) -> Self {
        Self {
            mode,
            latest_height,
            blocks_indexed: 0,
            cache_hits: 0,
            last_height: None,
            stopped_by: None,
            redrive: RedriveSummary::default(),
            proposals_refreshed: 0,
            retry_queue_depth: 0,
        }
    }

    fn record(&mut self, height: BlockHeight, outcome: IndexOutcome) {
        match outcome {
            IndexOutcome::Indexed(_) => self.blocks_indexed += 1,
            IndexOutcome::CacheHit => self.cache_hits += 1,
        }
        self.last_height = Some(height);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerState {
    pub ticks: u64,
}

pub struct Scheduler<C, D> {
    indexer: BlockIndexer<C, D>,
    config: configuration::IndexerConfig,
    state: SchedulerState,
}

impl<C, D> Scheduler<C, D>
where
    C: ChainReader + Send + Sync,
    D: IndexerDbManager + Send + Sync,
{
    pub fn new(indexer: BlockIndexer<C, D>, config: configuration::IndexerConfig) -> Self {
        Self {
            indexer,
            config,
            state: SchedulerState::default(),
        }
    }

    pub fn indexer(&self) -> &BlockIndexer<C, D> {
        &self.indexer
    }

    pub fn state(&self) -> &SchedulerState {
        &self.state
    }

    /// Backfill is done once it reached height 1 or covers `history_days` days
    async fn needs_backfill(
        &self,
        min: Option<BlockHeight>,
        max: BlockHeight,
    ) -> anyhow::Result<bool> {
        Ok(match min {
            None => true,
            Some(min) if min > 1 => {
                self.indexer.db().days_between_heights(min, max).await? < self.config.history_days
            }
            Some(_) => false,
        })
    }

    async fn backfill(
        &self,
        min: Option<BlockHeight>,
        max: BlockHeight,
        summary: &mut TickSummary,
    ) -> anyhow::Result<()> {
        let history_days = self.config.history_days as i64;
        let mut top_date = self
            .indexer
            .db()
            .block_timestamp(max)
            .await?
            .map(|timestamp| timestamp.date_naive());
        let mut height = min.map_or(max, |min| min - 1);
        let mut walked = 0;
        while height > 0 && walked < self.config.max_blocks_per_tick {
            let block = match self.indexer.fetch_block(height).await {
                Ok(block) => block,
                Err(err) => {
                    summary.stopped_by = Some(err.to_string());
                    break;
                }
            };
            let block_date = block.timestamp().date_naive();
            let top = *top_date.get_or_insert(block_date);
            if (top - block_date).num_days() + 1 > history_days {
                tracing::info!(
                    target: crate::INDEXER,
                    "Backfill reached the {} day horizon below height {}",
                    history_days,
                    height + 1
                );
                break;
            }
            match self
                .indexer
                .index_fetched_block(block, IndexOptions::default(), WatermarkAdvance::Min(height))
                .await
            {
                Ok(outcome) => summary.record(height, outcome),
                Err(err) => {
                    summary.stopped_by = Some(err.to_string());
                    break;
                }
            }
            walked += 1;
            height -= 1;
        }
        Ok(())
    }

    async fn live(&self, max: BlockHeight, latest: BlockHeight, summary: &mut TickSummary) {
        let mut height = max + 1;
        let mut walked = 0;
        while height <= latest && walked < self.config.max_blocks_per_tick {
            let result = match self.indexer.fetch_block(height).await {
                Ok(block) => {
                    self.indexer
                        .index_fetched_block(
                            block,
                            IndexOptions::default(),
                            WatermarkAdvance::Max(height),
                        )
                        .await
                }
                Err(err) => Err(err),
            };
            match result {
                Ok(outcome) => summary.record(height, outcome),
                Err(err) => {
                    summary.stopped_by = Some(err.to_string());
                    break;
                }
            }
            walked += 1;
            height += 1;
        }
    }

    /// Re-reads every proposal that has not reached a final status
    pub async fn refresh_proposals(&self) -> anyhow::Result<usize> {
        let proposal_ids = self.indexer.db().non_final_proposals().await?;
        let results = futures::future::join_all(
            proposal_ids
                .iter()
                .map(|proposal_id| self.indexer.chain().gov_proposal(*proposal_id)),
        )
        .await;
        let mut refreshes = vec![];
        for (proposal_id, result) in proposal_ids.iter().zip(results) {
            match result {
                Ok(Some(refresh)) => refreshes.push(refresh),
                Ok(None) => {}
                Err(err) => tracing::warn!(
                    target: crate::INDEXER,
                    "Failed to refresh proposal {}: {}",
                    proposal_id,
                    err
                ),
            }
        }
        self.indexer.db().refresh_proposals(&refreshes).await?;
        Ok(refreshes.len())
    }

    #[cfg_attr(feature = "tracing-instrumentation", tracing::instrument(skip_all))]
    pub async fn tick(&mut self) -> anyhow::Result<TickSummary> {
        self.state.ticks += 1;
        let latest = self
            .indexer
            .chain()
            .latest_height()
            .await
            .map_err(|err| anyhow::anyhow!("Skipping tick, latest height unavailable: {}", err))?;
        metrics::LATEST_CHAIN_HEIGHT.set(latest as i64);

        let db = self.indexer.db();
        let mut watermark = db.get_watermark().await?;
        if !watermark.is_initialized() {
            watermark = db.init_watermark(latest).await?;
            tracing::info!(target: crate::INDEXER, "Initialized watermark at height {}", latest);
        }
        let max = watermark.max_height_read.unwrap_or(latest);
        let min = watermark.min_height_read;

        let mut summary = if self.needs_backfill(min, max).await? {
            let mut summary = TickSummary::new(TickMode::Backfill, latest);
            self.backfill(min, max, &mut summary).await?;
            summary
        } else {
            let mut summary = TickSummary::new(TickMode::Live, latest);
            self.live(max, latest, &mut summary).await;
            summary
        };
        if let Some(err) = &summary.stopped_by {
            tracing::warn!(target: crate::INDEXER, "{:?} walk stopped: {}", summary.mode, err);
        }

        summary.redrive = self
            .indexer
            .redrive_retries(self.config.retry_batch_size)
            .await?;

        let every = self.config.gov_refresh_every_ticks;
        if every > 0 && self.state.ticks % every == 0 {
            summary.proposals_refreshed = self.refresh_proposals().await?;
        }

        let watermark = db.get_watermark().await?;
        if let Some(max) = watermark.max_height_read {
            metrics::MAX_HEIGHT_READ.set(max as i64);
        }
        if let Some(min) = watermark.min_height_read {
            metrics::MIN_HEIGHT_READ.set(min as i64);
        }
        summary.retry_queue_depth = db.retry_queue_depth().await?;
        metrics::RETRY_QUEUE_DEPTH.set(summary.retry_queue_depth as i64);

        tracing::info!(
            target: crate::INDEXER,
            "{:?} tick {} | tip {} | indexed {} cached {} | retries {}/{} resolved | queue {}",
            summary.mode,
            self.state.ticks,
            latest,
            summary.blocks_indexed,
            summary.cache_hits,
            summary.redrive.resolved,
            summary.redrive.attempted,
            summary.retry_queue_depth,
        );
        Ok(summary)
    }

    /// Ticks forever; a tick starts `tick_interval_secs` after the previous one finished
    pub async fn run(
        mut self,
        stats: Arc<tokio::sync::RwLock<metrics::Stats>>,
    ) -> anyhow::Result<()> {
        let interval = std::time::Duration::from_secs(self.config.tick_interval_secs);
        loop {
            match self.tick().await {
                Ok(summary) => stats.write().await.record_tick(&summary),
                Err(err) => tracing::error!(target: crate::INDEXER, "Tick failed: {:#}", err),
            }
            tokio::time::sleep(interval).await;
        }
    }
}
