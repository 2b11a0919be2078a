//! Indexes one block: fetch, process every transaction, enrich, commit atomically.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use database::{CommitSummary, IndexerDbManager};
use explorer_primitives::{
    BlockHeight, BlockProposerRecord, BlockRecord, BlockView, BlockWriteSet, TxWriteSet,
    ValidatorSetRecord, WatermarkAdvance,
};

use crate::chain_client::{ChainError, ChainReader};
use crate::processor::TransactionProcessor;

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error(transparent)]
    ChainUnavailable(ChainError),
    #[error("block {0} is not available on the chain node")]
    BlockNotFound(BlockHeight),
    #[error("failed to process block {height}: {error:#}")]
    Processing {
        height: BlockHeight,
        error: anyhow::Error,
    },
    #[error("failed to commit block {height}: {error:#}")]
    Commit {
        height: BlockHeight,
        error: anyhow::Error,
    },
}

impl IndexError {
    /// Failures the indexer wrote to the retry ledger itself
    pub fn is_recorded(&self) -> bool {
        matches!(self, IndexError::Processing { .. } | IndexError::Commit { .. })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexOptions {
    /// Re-index even when the block is already stored, replacing its rows
    pub force: bool,
    /// Take the transactions from the stored raw responses instead of the chain
    pub from_db: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexOutcome {
    Indexed(CommitSummary),
    /// Block and all its transactions were already stored
    CacheHit,
}

fn first_fee_amount(tx: &TxWriteSet) -> f64 {
    tx.tx
        .raw
        .pointer("/tx/auth_info/fee/amount/0/amount")
        .and_then(serde_json::Value::as_str)
        .and_then(|amount| amount.parse::<f64>().ok())
        .unwrap_or_default()
}

/// Σ first fee coin / Σ gas wanted over the block
fn min_gas_fee(transactions: &[TxWriteSet]) -> Option<f64> {
    let gas_wanted: u64 = transactions.iter().map(|tx| tx.tx.gas_wanted).sum();
    if gas_wanted == 0 {
        return None;
    }
    let fees: f64 = transactions.iter().map(first_fee_amount).sum();
    Some(fees / gas_wanted as f64)
}

pub struct BlockIndexer<C, D> {
    chain: Arc<C>,
    db: Arc<D>,
    processor: TransactionProcessor,
}

impl<C, D> BlockIndexer<C, D>
where
    C: ChainReader + Send + Sync,
    D: IndexerDbManager + Send + Sync,
{
    pub fn new(chain: Arc<C>, db: Arc<D>, chain_config: &configuration::ChainConfig) -> Self {
        Self {
            chain,
            db,
            processor: TransactionProcessor::new(chain_config),
        }
    }

    pub fn chain(&self) -> &C {
        &self.chain
    }

    pub fn db(&self) -> &D {
        &self.db
    }

    pub async fn fetch_block(&self, height: BlockHeight) -> Result<BlockView, IndexError> {
        match self.chain.block(height).await {
            Ok(Some(block)) => Ok(block),
            Ok(None) => Err(IndexError::BlockNotFound(height)),
            Err(err) => Err(IndexError::ChainUnavailable(err)),
        }
    }

    pub async fn index_height(
        &self,
        height: BlockHeight,
        options: IndexOptions,
        advance: WatermarkAdvance,
    ) -> Result<IndexOutcome, IndexError> {
        let block = self.fetch_block(height).await?;
        self.index_fetched_block(block, options, advance).await
    }

    /// Indexes `block` and moves the watermark by `advance` in the same commit.
    ///
    /// Processing and commit failures are recorded as blocking retry entries
    /// before they are returned. Chain failures are left to the caller.
    #[cfg_attr(
        feature = "tracing-instrumentation",
        tracing::instrument(skip_all, fields(height = block.height()))
    )]
    pub async fn index_fetched_block(
        &self,
        block: BlockView,
        options: IndexOptions,
        advance: WatermarkAdvance,
    ) -> Result<IndexOutcome, IndexError> {
        let height = block.height();
        let result = self.try_index(&block, options, advance).await;
        if let Err(err) = &result {
            if err.is_recorded() {
                crate::metrics::BLOCK_FAILURES_TOTAL.inc();
                tracing::error!(target: crate::INDEXER, "{}", err);
                if let Err(record_err) = self.db.record_retry(height, false, &err.to_string()).await {
                    tracing::error!(
                        target: crate::INDEXER,
                        "Failed to record retry for block {}: {:#}",
                        height,
                        record_err
                    );
                }
            }
        }
        result
    }

    async fn is_cached(&self, block: &BlockView) -> anyhow::Result<bool> {
        Ok(self.db.block_exists(block.height()).await?
            && self.db.tx_count_at_height(block.height()).await? == block.tx_count() as u64)
    }

    async fn raw_transactions(
        &self,
        block: &BlockView,
        from_db: bool,
    ) -> Result<Vec<serde_json::Value>, IndexError> {
        let height = block.height();
        if from_db {
            let stored = self
                .db
                .stored_tx_responses(height)
                .await
                .map_err(|error| IndexError::Processing { height, error })?;
            if stored.len() != block.tx_count() {
                return Err(IndexError::Processing {
                    height,
                    error: anyhow::anyhow!(
                        "{} transactions stored, the block has {}",
                        stored.len(),
                        block.tx_count()
                    ),
                });
            }
            return Ok(stored);
        }
        self.chain
            .transactions(height, block.tx_count())
            .await
            .map_err(|err| match err {
                ChainError::Unavailable(_) => IndexError::ChainUnavailable(err),
                ChainError::Malformed(_) => IndexError::Processing {
                    height,
                    error: err.into(),
                },
            })
    }

    async fn try_index(
        &self,
        block: &BlockView,
        options: IndexOptions,
        advance: WatermarkAdvance,
    ) -> Result<IndexOutcome, IndexError> {
        let height = block.height();
        let processing = |error: anyhow::Error| IndexError::Processing { height, error };

        if !options.force && self.is_cached(block).await.map_err(processing)? {
            self.db
                .advance_watermark(advance)
                .await
                .map_err(|error| IndexError::Commit { height, error })?;
            crate::metrics::CACHE_HITS_TOTAL.inc();
            crate::metrics::BLOCKS_PROCESSED_TOTAL.inc();
            tracing::debug!(target: crate::INDEXER, "Block {} already indexed", height);
            return Ok(IndexOutcome::CacheHit);
        }

        let raw_txs = self.raw_transactions(block, options.from_db).await?;

        let mut non_blocking_failures = vec![];
        let validator_set = match self.chain.validator_set(height).await {
            Ok(Some(validators)) => Some(ValidatorSetRecord {
                height,
                validators: serde_json::to_value(validators).map_err(|err| processing(err.into()))?,
            }),
            Ok(None) => None,
            Err(err) => {
                non_blocking_failures.push(format!("validator set: {}", err));
                None
            }
        };

        let mut transactions = Vec::with_capacity(raw_txs.len());
        let mut lookups = BTreeSet::new();
        let mut msg_types = BTreeMap::new();
        for raw in raw_txs {
            let processed = self.processor.process(raw, block).map_err(processing)?;
            lookups.extend(processed.extraction.lookups);
            msg_types.extend(processed.msg_types);
            transactions.push(processed.extraction.write_set);
        }

        let enrichment = crate::enrichment::enrich(
            self.chain.as_ref(),
            self.db.as_ref(),
            height,
            &lookups,
            options.force,
        )
        .await
        .map_err(processing)?;
        non_blocking_failures.extend(enrichment.failures);
        if !non_blocking_failures.is_empty() {
            crate::metrics::NON_BLOCKING_FAILURES_TOTAL.inc_by(non_blocking_failures.len() as u64);
            tracing::warn!(
                target: crate::INDEXER,
                "Block {} has {} non-blocking failure(s): {}",
                height,
                non_blocking_failures.len(),
                non_blocking_failures.join("; ")
            );
        }

        let write_set = BlockWriteSet {
            block: BlockRecord {
                height,
                hash: block.hash_hex(),
                timestamp: block.timestamp(),
                tx_count: block.tx_count() as u32,
                raw: serde_json::to_value(block).map_err(|err| processing(err.into()))?,
            },
            proposer: Some(BlockProposerRecord {
                height,
                proposer_address: block.proposer_hex(),
                min_gas_fee: min_gas_fee(&transactions),
                timestamp: block.timestamp(),
            }),
            validator_set,
            transactions,
            references: enrichment.references,
            msg_types,
            non_blocking_failures,
            replace_existing: options.force,
        };

        let summary = self
            .db
            .commit_block(&write_set, advance)
            .await
            .map_err(|error| IndexError::Commit { height, error })?;
        crate::metrics::BLOCKS_PROCESSED_TOTAL.inc();
        tracing::debug!(
            target: crate::INDEXER,
            "Indexed block {} with {} transaction(s), {} IBC item(s) pending",
            height,
            summary.transactions,
            summary.pending_ibc,
        );
        Ok(IndexOutcome::Indexed(summary))
    }
}

#[cfg(test)]
mod tests {
    use database::{MemoryDbManager, ReaderDbManager};
    use explorer_primitives::{AddressType, FeePayerType};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::enrichment::UNRESOLVED;
    use crate::test_support::{self, FakeChain, RECEIVER, SENDER};

    fn indexer(chain: &Arc<FakeChain>, db: &Arc<MemoryDbManager>) -> BlockIndexer<FakeChain, MemoryDbManager> {
        BlockIndexer::new(chain.clone(), db.clone(), &test_support::chain_config())
    }

    #[tokio::test]
    async fn indexes_a_block_with_its_joins() {
        let chain = Arc::new(FakeChain::new(10));
        chain.add_tx(5, test_support::send_tx(5, "SEND1"));
        let db = Arc::new(MemoryDbManager::new_empty());

        let outcome = indexer(&chain, &db)
            .index_height(5, IndexOptions::default(), WatermarkAdvance::Max(5))
            .await
            .unwrap();
        assert!(matches!(outcome, IndexOutcome::Indexed(ref summary) if summary.transactions == 1));

        let tx = db.get_transaction("SEND1").await.unwrap().unwrap();
        // sender appears in the message, the transfer event and the signer list
        assert_eq!(
            tx.addresses
                .iter()
                .filter(|join| join.address == SENDER && join.address_type == AddressType::Account)
                .count(),
            1
        );
        assert!(tx.addresses.iter().any(|join| join.address == RECEIVER));
        assert_eq!(tx.markers, vec!["nhash".to_string()]);
        assert_eq!(tx.fee_payers[0].payer_type, FeePayerType::FirstSigner);
        assert_eq!(db.get_account(SENDER).await.unwrap().unwrap().account_number, Some(7));
        assert_eq!(db.current_watermark().await.unwrap().max_height_read, Some(5));

        let (block, _) = db.get_block(5).await.unwrap().unwrap();
        assert_eq!(block.tx_count, 1);
    }

    #[tokio::test]
    async fn indexing_twice_is_a_cache_hit() {
        let chain = Arc::new(FakeChain::new(10));
        chain.add_tx(5, test_support::send_tx(5, "SEND1"));
        let db = Arc::new(MemoryDbManager::new_empty());
        let indexer = indexer(&chain, &db);

        indexer
            .index_height(5, IndexOptions::default(), WatermarkAdvance::None)
            .await
            .unwrap();
        let first = db.get_transactions_at_height(5).await.unwrap();
        let outcome = indexer
            .index_height(5, IndexOptions::default(), WatermarkAdvance::Max(5))
            .await
            .unwrap();

        assert_eq!(outcome, IndexOutcome::CacheHit);
        assert_eq!(db.get_transactions_at_height(5).await.unwrap(), first);
        assert_eq!(db.current_watermark().await.unwrap().max_height_read, Some(5));
    }

    #[tokio::test]
    async fn reference_entities_are_fetched_once_per_block() {
        let chain = Arc::new(FakeChain::new(10));
        chain.add_tx(5, test_support::send_tx(5, "SEND1"));
        chain.add_tx(5, test_support::send_tx(5, "SEND2"));
        let db = Arc::new(MemoryDbManager::new_empty());
        let indexer = indexer(&chain, &db);

        indexer
            .index_height(5, IndexOptions::default(), WatermarkAdvance::None)
            .await
            .unwrap();
        assert_eq!(chain.lookups_of(SENDER), 1);

        chain.add_tx(6, test_support::send_tx(6, "SEND3"));
        indexer
            .index_height(6, IndexOptions::default(), WatermarkAdvance::None)
            .await
            .unwrap();
        assert_eq!(chain.lookups_of(SENDER), 1);
        // supply refreshes are not triggered by plain sends
        assert_eq!(chain.lookups_of("nhash"), 1);
    }

    #[tokio::test]
    async fn block_with_unknown_message_type_commits_cleanly() {
        let chain = Arc::new(FakeChain::new(10));
        let mut tx = test_support::send_tx(5, "MIXED");
        tx["tx"]["body"]["messages"]
            .as_array_mut()
            .unwrap()
            .push(json!({"@type": "/synthetic.unknown.v1.MsgThing", "owner": SENDER}));
        chain.add_tx(5, tx);
        let db = Arc::new(MemoryDbManager::new_empty());

        let outcome = indexer(&chain, &db)
            .index_height(5, IndexOptions::default(), WatermarkAdvance::Max(5))
            .await
            .unwrap();
        assert!(matches!(outcome, IndexOutcome::Indexed(ref summary) if summary.transactions == 1));

        let stored = db.get_transaction("MIXED").await.unwrap().unwrap();
        let kinds: Vec<_> = stored
            .messages
            .iter()
            .map(|message| (message.msg_type.as_str(), message.module.as_str()))
            .collect();
        assert_eq!(kinds[0].0, "send");
        assert_eq!(kinds[1].1, "unknown");
        assert_eq!(kinds.len(), 2);
        assert_eq!(stored.markers, vec!["nhash".to_string()]);
        assert_eq!(db.current_watermark().await.unwrap().max_height_read, Some(5));
        assert!(db.retry_queue(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_commit_leaves_nothing_behind() {
        let chain = Arc::new(FakeChain::new(10));
        chain.add_tx(5, test_support::send_tx(5, "SEND1"));
        let db = Arc::new(MemoryDbManager::new_empty());
        db.fail_commits(5, 1).await;

        let err = indexer(&chain, &db)
            .index_height(5, IndexOptions::default(), WatermarkAdvance::Max(5))
            .await
            .unwrap_err();

        assert!(matches!(err, IndexError::Commit { height: 5, .. }));
        assert!(db.get_block(5).await.unwrap().is_none());
        assert!(db.get_transaction("SEND1").await.unwrap().is_none());
        assert!(db.get_account(SENDER).await.unwrap().is_none());
        assert_eq!(db.current_watermark().await.unwrap().max_height_read, None);
        let retries = db.retry_queue(10).await.unwrap();
        assert_eq!(retries.len(), 1);
        assert_eq!(retries[0].height, 5);
        assert!(!retries[0].non_blocking);
    }

    #[tokio::test]
    async fn failed_lookups_still_commit_with_minimal_references() {
        let chain = Arc::new(FakeChain::new(10));
        chain.add_tx(5, test_support::send_tx(5, "SEND1"));
        chain.set_failing_lookups(true);
        let db = Arc::new(MemoryDbManager::new_empty());

        indexer(&chain, &db)
            .index_height(5, IndexOptions::default(), WatermarkAdvance::Max(5))
            .await
            .unwrap();

        let account = db.get_account(SENDER).await.unwrap().unwrap();
        assert_eq!(account.account_type, UNRESOLVED);
        let retries = db.retry_queue(10).await.unwrap();
        assert_eq!(retries.len(), 1);
        assert!(retries[0].non_blocking);
        assert!(retries[0].last_error.contains(SENDER));
    }

    #[tokio::test]
    async fn chain_outage_is_not_recorded() {
        let chain = Arc::new(FakeChain::new(10));
        chain.add_tx(5, test_support::send_tx(5, "SEND1"));
        let db = Arc::new(MemoryDbManager::new_empty());
        let indexer = indexer(&chain, &db);
        let block = indexer.fetch_block(5).await.unwrap();
        chain.set_unavailable(true);

        let err = indexer
            .index_fetched_block(block, IndexOptions::default(), WatermarkAdvance::Max(5))
            .await
            .unwrap_err();

        assert!(matches!(err, IndexError::ChainUnavailable(_)));
        assert!(db.retry_queue(10).await.unwrap().is_empty());
        assert!(matches!(
            indexer.fetch_block(11).await,
            Err(IndexError::ChainUnavailable(_))
        ));
        chain.set_unavailable(false);
        assert!(matches!(indexer.fetch_block(11).await, Err(IndexError::BlockNotFound(11))));
    }

    #[tokio::test]
    async fn forced_rerun_from_stored_transactions_reproduces_the_block() {
        let chain = Arc::new(FakeChain::new(10));
        chain.add_tx(5, test_support::send_tx(5, "SEND1"));
        let db = Arc::new(MemoryDbManager::new_empty());
        let indexer = indexer(&chain, &db);
        indexer
            .index_height(5, IndexOptions::default(), WatermarkAdvance::None)
            .await
            .unwrap();
        let before = db.get_transactions_at_height(5).await.unwrap();

        let outcome = indexer
            .index_height(
                5,
                IndexOptions {
                    force: true,
                    from_db: true,
                },
                WatermarkAdvance::None,
            )
            .await
            .unwrap();

        assert!(matches!(outcome, IndexOutcome::Indexed(_)));
        assert_eq!(db.get_transactions_at_height(5).await.unwrap(), before);
    }

    #[tokio::test]
    async fn invariant_violation_fails_the_block() {
        let chain = Arc::new(FakeChain::new(10));
        chain.add_tx(
            5,
            json!({
                "height": "5",
                "txhash": "GOV",
                "tx": {"body": {"messages": [{"@type": "/cosmos.gov.v1.MsgSubmitProposal", "proposer": SENDER}]}}
            }),
        );
        chain.add_tx(5, test_support::send_tx(5, "SEND1"));
        let db = Arc::new(MemoryDbManager::new_empty());

        let err = indexer(&chain, &db)
            .index_height(5, IndexOptions::default(), WatermarkAdvance::Max(5))
            .await
            .unwrap_err();

        assert!(matches!(err, IndexError::Processing { height: 5, .. }));
        assert!(db.get_transaction("SEND1").await.unwrap().is_none());
        assert_eq!(db.retry_queue(10).await.unwrap().len(), 1);
    }

    #[test]
    fn min_gas_fee_is_absent_without_gas() {
        assert_eq!(min_gas_fee(&[]), None);
    }
}
