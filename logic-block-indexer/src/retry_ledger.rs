//! Re-drives the heights recorded in the retry ledger.
//!
//! A blocking entry means the block never committed: it is re-indexed from the
//! chain with `force`, without moving the watermark. A non-blocking entry means
//! the block committed but left IBC links pending or reference lookups
//! unresolved: pending links are re-attempted first, and only entries without
//! pending links re-run the block from the stored transactions.

use database::IndexerDbManager;
use explorer_primitives::{RetryEntry, WatermarkAdvance};

use crate::block_indexer::{BlockIndexer, IndexError, IndexOptions};
use crate::chain_client::ChainReader;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RedriveSummary {
    pub attempted: usize,
    pub resolved: usize,
    pub failed: usize,
}

impl<C, D> BlockIndexer<C, D>
where
    C: ChainReader + Send + Sync,
    D: IndexerDbManager + Send + Sync,
{
    async fn redrive_blocking(&self, entry: &RetryEntry) -> anyhow::Result<bool> {
        let options = IndexOptions {
            force: true,
            from_db: false,
        };
        match self
            .index_height(entry.height, options, WatermarkAdvance::None)
            .await
        {
            Ok(_) => {
                self.db().delete_retry(entry.height, false).await?;
                Ok(true)
            }
            Err(err) => {
                if !err.is_recorded() {
                    self.db()
                        .record_retry(entry.height, false, &err.to_string())
                        .await?;
                }
                Ok(false)
            }
        }
    }

    async fn redrive_non_blocking(&self, entry: &RetryEntry) -> anyhow::Result<bool> {
        let resolution = self.db().resolve_pending_ibc(entry.height).await?;
        if resolution.remaining > 0 {
            self.db()
                .record_retry(
                    entry.height,
                    true,
                    &format!(
                        "{} IBC item(s) waiting for their ledger record",
                        resolution.remaining
                    ),
                )
                .await?;
            return Ok(false);
        }
        if resolution.is_empty() {
            let options = IndexOptions {
                force: true,
                from_db: true,
            };
            // The commit records a fresh entry if lookups fail again
            self.db().delete_retry(entry.height, true).await?;
            return match self
                .index_height(entry.height, options, WatermarkAdvance::None)
                .await
            {
                Ok(_) => Ok(true),
                Err(err @ (IndexError::ChainUnavailable(_) | IndexError::BlockNotFound(_))) => {
                    self.db()
                        .record_retry(entry.height, true, &err.to_string())
                        .await?;
                    Ok(false)
                }
                Err(_) => Ok(false),
            };
        }
        self.db().delete_retry(entry.height, true).await?;
        Ok(true)
    }

    /// One pass over the oldest `limit` retry entries
    pub async fn redrive_retries(&self, limit: u64) -> anyhow::Result<RedriveSummary> {
        let entries = self.db().retry_entries(limit).await?;
        let mut summary = RedriveSummary::default();
        for entry in entries {
            self.db()
                .mark_retry_processing(entry.height, entry.non_blocking)
                .await?;
            summary.attempted += 1;
            let resolved = if entry.non_blocking {
                self.redrive_non_blocking(&entry).await?
            } else {
                self.redrive_blocking(&entry).await?
            };
            if resolved {
                summary.resolved += 1;
                tracing::info!(
                    target: crate::INDEXER,
                    "Retry of block {} resolved after {} attempt(s)",
                    entry.height,
                    entry.retry_count + 1
                );
            } else {
                summary.failed += 1;
                tracing::warn!(
                    target: crate::INDEXER,
                    "Retry of block {} failed again",
                    entry.height
                );
            }
        }
        Ok(summary)
    }
}
