use std::collections::HashSet;

use explorer_primitives::{
    BlockHeight, BlockWriteSet, GovProposalRefresh, RetryEntry, Timestamp, Watermark,
    WatermarkAdvance,
};

/// Reference entity tables the pipeline checks before fetching metadata from the chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReferenceKind {
    Account,
    Validator,
    Marker,
    SmCode,
    SmContract,
    /// Keys are `port/channel`
    IbcChannel,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitSummary {
    pub transactions: usize,
    /// IBC receives/acks of this block still waiting for their ledger row
    pub pending_ibc: usize,
    /// Pending IBC items of earlier blocks linked by ledger rows of this block
    pub resolved_ibc: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PendingResolution {
    pub resolved: usize,
    pub remaining: usize,
}

impl PendingResolution {
    /// No pending IBC item was recorded at the height
    pub fn is_empty(&self) -> bool {
        self.resolved == 0 && self.remaining == 0
    }
}

#[async_trait::async_trait]
pub trait IndexerDbManager {
    /// Writes the whole block in one database transaction and applies `advance`
    /// to the watermark in the same transaction. Nothing is visible if it fails.
    async fn commit_block(
        &self,
        write_set: &BlockWriteSet,
        advance: WatermarkAdvance,
    ) -> anyhow::Result<CommitSummary>;

    /// Moves the watermark without writing a block (cache hits)
    async fn advance_watermark(&self, advance: WatermarkAdvance) -> anyhow::Result<()>;

    async fn get_watermark(&self) -> anyhow::Result<Watermark>;

    /// Sets `max_height_read` when the index is uninitialized and returns the resulting watermark
    async fn init_watermark(&self, max_height: BlockHeight) -> anyhow::Result<Watermark>;

    async fn block_exists(&self, height: BlockHeight) -> anyhow::Result<bool>;

    async fn block_timestamp(&self, height: BlockHeight) -> anyhow::Result<Option<Timestamp>>;

    async fn tx_count_at_height(&self, height: BlockHeight) -> anyhow::Result<u64>;

    /// Raw transaction responses stored for `height`, in index order
    async fn stored_tx_responses(
        &self,
        height: BlockHeight,
    ) -> anyhow::Result<Vec<serde_json::Value>>;

    /// Distinct calendar days (UTC) covered by the stored blocks in `[min_height, max_height]`
    async fn days_between_heights(
        &self,
        min_height: BlockHeight,
        max_height: BlockHeight,
    ) -> anyhow::Result<u64>;

    /// Subset of `keys` already present in the reference table of `kind`
    async fn existing_references(
        &self,
        kind: ReferenceKind,
        keys: &[String],
    ) -> anyhow::Result<HashSet<String>>;

    async fn non_final_proposals(&self) -> anyhow::Result<Vec<u64>>;

    async fn refresh_proposals(&self, refreshes: &[GovProposalRefresh]) -> anyhow::Result<()>;

    /// Inserts a PENDING retry entry, or puts an existing one back to PENDING
    /// with its retry count incremented and the error replaced
    async fn record_retry(
        &self,
        height: BlockHeight,
        non_blocking: bool,
        error: &str,
    ) -> anyhow::Result<()>;

    /// Oldest heights first
    async fn retry_entries(&self, limit: u64) -> anyhow::Result<Vec<RetryEntry>>;

    async fn mark_retry_processing(
        &self,
        height: BlockHeight,
        non_blocking: bool,
    ) -> anyhow::Result<()>;

    async fn delete_retry(&self, height: BlockHeight, non_blocking: bool) -> anyhow::Result<()>;

    async fn retry_queue_depth(&self) -> anyhow::Result<u64>;

    /// Links pending IBC items recorded at `height` whose ledger row now exists
    async fn resolve_pending_ibc(&self, height: BlockHeight) -> anyhow::Result<PendingResolution>;
}
