use explorer_primitives::{
    AccountRecord, BlockHeight, BlockRecord, CacheMetadata, GovProposalRecord, GovVoteRecord,
    IbcLedgerRecord, IbcLinkRecord, IndexedTransaction, NameRecord, RetryEntry, Watermark,
};

/// Point and range lookups served to query services. No write access.
#[async_trait::async_trait]
pub trait ReaderDbManager {
    /// Returns the transaction with every stored association
    async fn get_transaction(&self, tx_hash: &str) -> anyhow::Result<Option<IndexedTransaction>>;

    /// Transactions of the block in index order
    async fn get_transactions_at_height(
        &self,
        height: BlockHeight,
    ) -> anyhow::Result<Vec<IndexedTransaction>>;

    /// Returns the block and records the cache hit
    async fn get_block(
        &self,
        height: BlockHeight,
    ) -> anyhow::Result<Option<(BlockRecord, CacheMetadata)>>;

    async fn current_watermark(&self) -> anyhow::Result<Watermark>;

    async fn retry_queue(&self, limit: u64) -> anyhow::Result<Vec<RetryEntry>>;

    async fn get_account(&self, address: &str) -> anyhow::Result<Option<AccountRecord>>;

    async fn get_proposal(&self, proposal_id: u64) -> anyhow::Result<Option<GovProposalRecord>>;

    async fn get_votes(&self, proposal_id: u64) -> anyhow::Result<Vec<GovVoteRecord>>;

    /// Current owners of `full_name`
    async fn get_name(&self, full_name: &str) -> anyhow::Result<Vec<NameRecord>>;

    async fn get_ibc_ledger(&self, ledger_key: &str) -> anyhow::Result<Option<IbcLedgerRecord>>;

    /// Receives, acknowledgements and timeouts linked to the ledger row
    async fn get_ibc_acks(&self, ledger_key: &str) -> anyhow::Result<Vec<IbcLinkRecord>>;

    async fn get_pending_ibc(&self, height: BlockHeight) -> anyhow::Result<Vec<IbcLinkRecord>>;
}
