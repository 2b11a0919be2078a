//! In-process implementation of the store.
//!
//! Holds the same relations as the PostgreSQL schema in ordered maps and applies a
//! block write-set under one lock, so readers never observe a partially applied block.
//! Used by the test-suites of the pipeline and for dry runs without a database.

use std::collections::{BTreeMap, HashMap};

use explorer_primitives::{
    AccountRecord, BlockHeight, BlockProposerRecord, BlockRecord, CacheMetadata, GovDepositRecord,
    GovProposalRecord, GovVoteRecord, IbcAckType, IbcChannelKey, IbcChannelRecord,
    IbcLedgerRecord, IbcLinkRecord, MarkerRecord, MsgTypeRecord, NameRecord, NftScopeRecord,
    RetryEntry, RetryState, SmCodeRecord, SmContractRecord, StakingValidatorRecord,
    TxProcessingFailure, TxWriteSet, ValidatorSetRecord, Watermark, WatermarkAdvance,
};

mod indexer;
mod reader;

type LinkKey = (String, IbcAckType, String);

#[derive(Debug, Clone, Default)]
pub(crate) struct MemoryState {
    pub blocks: BTreeMap<BlockHeight, (BlockRecord, CacheMetadata)>,
    pub proposers: BTreeMap<BlockHeight, BlockProposerRecord>,
    pub validator_sets: BTreeMap<BlockHeight, (ValidatorSetRecord, CacheMetadata)>,
    pub watermark: Watermark,
    pub txs: HashMap<String, TxWriteSet>,
    pub txs_by_height: BTreeMap<BlockHeight, Vec<String>>,
    pub accounts: BTreeMap<String, AccountRecord>,
    pub validators: BTreeMap<String, (StakingValidatorRecord, CacheMetadata)>,
    pub markers: BTreeMap<String, MarkerRecord>,
    pub nft_scopes: BTreeMap<String, NftScopeRecord>,
    pub channels: BTreeMap<IbcChannelKey, IbcChannelRecord>,
    pub sm_codes: BTreeMap<u64, SmCodeRecord>,
    pub sm_contracts: BTreeMap<String, SmContractRecord>,
    pub proposals: BTreeMap<u64, GovProposalRecord>,
    pub votes: BTreeMap<(u64, String), GovVoteRecord>,
    pub deposits: BTreeMap<(String, u64, String, String), GovDepositRecord>,
    pub ibc_ledgers: BTreeMap<String, IbcLedgerRecord>,
    pub ibc_acks: BTreeMap<LinkKey, IbcLinkRecord>,
    pub ibc_pending: BTreeMap<LinkKey, IbcLinkRecord>,
    pub names: BTreeMap<(String, String), NameRecord>,
    pub msg_types: BTreeMap<String, MsgTypeRecord>,
    pub failures: BTreeMap<(BlockHeight, String, String), TxProcessingFailure>,
    pub retries: BTreeMap<(BlockHeight, bool), RetryEntry>,
}

impl MemoryState {
    pub(crate) fn apply_advance(&mut self, advance: WatermarkAdvance) {
        match advance {
            WatermarkAdvance::None => return,
            WatermarkAdvance::Max(height) => {
                self.watermark.max_height_read =
                    Some(self.watermark.max_height_read.map_or(height, |max| max.max(height)));
            }
            WatermarkAdvance::Min(height) => {
                self.watermark.min_height_read =
                    Some(self.watermark.min_height_read.map_or(height, |min| min.min(height)));
            }
        }
        self.watermark.last_update = Some(chrono::Utc::now());
    }

    pub(crate) fn record_retry(&mut self, height: BlockHeight, non_blocking: bool, error: &str) {
        let now = chrono::Utc::now();
        self.retries
            .entry((height, non_blocking))
            .and_modify(|entry| {
                entry.state = RetryState::Pending;
                entry.retry_count += 1;
                entry.last_error = error.to_string();
                entry.last_attempt = now;
            })
            .or_insert_with(|| RetryEntry {
                height,
                non_blocking,
                state: RetryState::Pending,
                retry_count: 0,
                last_error: error.to_string(),
                last_attempt: now,
            });
    }

    /// Stores a link as an ack when its ledger row exists, otherwise as pending.
    /// Returns true when the link was resolved.
    pub(crate) fn link_ibc(&mut self, link: &IbcLinkRecord) -> bool {
        let key = (
            link.ledger_key.clone(),
            link.ack_type,
            link.tx_hash.clone(),
        );
        match self.ibc_ledgers.get_mut(&link.ledger_key) {
            Some(ledger) => {
                if link.ack_type != IbcAckType::Receive {
                    ledger.acknowledged = true;
                    ledger.ack_success = link.success && link.ack_type == IbcAckType::Acknowledgement;
                }
                self.ibc_pending.remove(&key);
                self.ibc_acks.entry(key).or_insert_with(|| link.clone());
                true
            }
            None => {
                self.ibc_pending.entry(key).or_insert_with(|| link.clone());
                false
            }
        }
    }
}

/// In-memory store with optional commit failure injection
#[derive(Debug, Default)]
pub struct MemoryDbManager {
    state: tokio::sync::Mutex<MemoryState>,
    injected_failures: tokio::sync::Mutex<HashMap<BlockHeight, usize>>,
}

impl MemoryDbManager {
    pub fn new_empty() -> Self {
        Self::default()
    }

    /// Makes the next `times` commits of `height` fail after part of the
    /// write-set has been applied. The partial writes are rolled back.
    pub async fn fail_commits(&self, height: BlockHeight, times: usize) {
        self.injected_failures.lock().await.insert(height, times);
    }

    async fn take_injected_failure(&self, height: BlockHeight) -> bool {
        let mut injected = self.injected_failures.lock().await;
        match injected.get_mut(&height) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }
}

#[async_trait::async_trait]
impl crate::BaseDbManager for MemoryDbManager {
    async fn new(_config: &configuration::DatabaseConfig) -> anyhow::Result<Box<Self>> {
        Ok(Box::new(Self::new_empty()))
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use explorer_primitives::{
        BlockWriteSet, GovVoteRecord, IbcChannelKey, IbcMovement, MsgTypeRecord, NameAction,
        NameIntent, ReferenceWrites, TxRecord, WeightedVoteOption,
    };
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{IndexerDbManager, ReaderDbManager};

    fn timestamp(height: BlockHeight) -> explorer_primitives::Timestamp {
        chrono::Utc
            .with_ymd_and_hms(2024, 3, 1, 0, 0, 0)
            .unwrap()
            + chrono::Duration::seconds(height as i64)
    }

    fn tx(hash: &str, height: BlockHeight) -> TxWriteSet {
        TxWriteSet::new(TxRecord {
            hash: hash.to_string(),
            height,
            timestamp: timestamp(height),
            code: 0,
            codespace: String::new(),
            gas_wanted: 200_000,
            gas_used: 150_000,
            raw: serde_json::json!({ "txhash": hash }),
        })
    }

    fn block(height: BlockHeight, transactions: Vec<TxWriteSet>) -> BlockWriteSet {
        BlockWriteSet {
            block: BlockRecord {
                height,
                hash: format!("HASH{}", height),
                timestamp: timestamp(height),
                tx_count: transactions.len() as u32,
                raw: serde_json::json!({}),
            },
            proposer: None,
            validator_set: None,
            transactions,
            references: ReferenceWrites::default(),
            msg_types: BTreeMap::new(),
            non_blocking_failures: vec![],
            replace_existing: false,
        }
    }

    fn ledger(key_sequence: u64, height: BlockHeight) -> IbcLedgerRecord {
        let channel = IbcChannelKey::new("transfer", "channel-0");
        IbcLedgerRecord {
            ledger_key: explorer_primitives::ibc_ledger_key(&channel, key_sequence, IbcMovement::Out),
            channel,
            sequence: key_sequence,
            movement: IbcMovement::Out,
            denom: "nhash".to_string(),
            amount: "100".to_string(),
            from_address: "pb1sender".to_string(),
            to_address: "osmo1receiver".to_string(),
            tx_hash: "SEND".to_string(),
            height,
            timestamp: timestamp(height),
            acknowledged: false,
            ack_success: false,
        }
    }

    #[tokio::test]
    async fn commit_twice_keeps_one_copy() {
        let db = MemoryDbManager::new_empty();
        let write_set = block(10, vec![tx("A", 10), tx("B", 10)]);

        let first = db
            .commit_block(&write_set, WatermarkAdvance::Max(10))
            .await
            .unwrap();
        let second = db
            .commit_block(&write_set, WatermarkAdvance::Max(10))
            .await
            .unwrap();

        assert_eq!(first.transactions, 2);
        assert_eq!(second.transactions, 0);
        assert_eq!(db.tx_count_at_height(10).await.unwrap(), 2);
        assert_eq!(db.get_watermark().await.unwrap().max_height_read, Some(10));
    }

    #[tokio::test]
    async fn injected_failure_rolls_back_everything() {
        let db = MemoryDbManager::new_empty();
        db.fail_commits(5, 1).await;
        let write_set = block(5, vec![tx("A", 5)]);
        let rollbacks = || {
            crate::metrics::BLOCK_COMMIT_ROLLBACKS
                .with_label_values(&["memory"])
                .get()
        };
        let rollbacks_before = rollbacks();

        assert!(db
            .commit_block(&write_set, WatermarkAdvance::Max(5))
            .await
            .is_err());
        assert!(rollbacks() > rollbacks_before);
        assert!(!db.block_exists(5).await.unwrap());
        assert_eq!(db.get_transaction("A").await.unwrap(), None);
        assert!(!db.get_watermark().await.unwrap().is_initialized());

        db.commit_block(&write_set, WatermarkAdvance::Max(5))
            .await
            .unwrap();
        assert!(db.block_exists(5).await.unwrap());
    }

    #[tokio::test]
    async fn watermark_never_moves_backwards() {
        let db = MemoryDbManager::new_empty();
        db.init_watermark(100).await.unwrap();
        db.advance_watermark(WatermarkAdvance::Max(90)).await.unwrap();
        db.advance_watermark(WatermarkAdvance::Min(50)).await.unwrap();
        db.advance_watermark(WatermarkAdvance::Min(70)).await.unwrap();

        let watermark = db.get_watermark().await.unwrap();
        assert_eq!(watermark.max_height_read, Some(100));
        assert_eq!(watermark.min_height_read, Some(50));
    }

    #[tokio::test]
    async fn acknowledgement_waits_for_its_ledger() {
        let db = MemoryDbManager::new_empty();
        let mut ack_tx = tx("ACK", 20);
        ack_tx.ibc_links.push(IbcLinkRecord {
            ledger_key: ledger(7, 10).ledger_key,
            ack_type: IbcAckType::Acknowledgement,
            tx_hash: "ACK".to_string(),
            height: 20,
            success: true,
        });

        let summary = db
            .commit_block(&block(20, vec![ack_tx]), WatermarkAdvance::Min(20))
            .await
            .unwrap();
        assert_eq!(summary.pending_ibc, 1);
        assert_eq!(db.get_pending_ibc(20).await.unwrap().len(), 1);
        assert!(db.retry_entries(10).await.unwrap()[0].non_blocking);

        let mut send_tx = tx("SEND", 10);
        send_tx.ibc_ledgers.push(ledger(7, 10));
        let summary = db
            .commit_block(&block(10, vec![send_tx]), WatermarkAdvance::Min(10))
            .await
            .unwrap();
        assert_eq!(summary.resolved_ibc, 1);

        let key = ledger(7, 10).ledger_key;
        let stored = db.get_ibc_ledger(&key).await.unwrap().unwrap();
        assert!(stored.acknowledged);
        assert!(stored.ack_success);
        assert_eq!(db.get_ibc_acks(&key).await.unwrap().len(), 1);
        assert!(db.resolve_pending_ibc(20).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn older_vote_does_not_replace_newer_one() {
        let db = MemoryDbManager::new_empty();
        let vote = |height: BlockHeight, option: &str| GovVoteRecord {
            proposal_id: 3,
            voter: "pb1voter".to_string(),
            options: vec![WeightedVoteOption {
                option: option.to_string(),
                weight: "1.000000000000000000".to_string(),
            }],
            is_weighted: false,
            height,
            tx_hash: format!("VOTE{}", height),
            timestamp: timestamp(height),
        };
        let mut newer = tx("VOTE30", 30);
        newer.gov_votes.push(vote(30, "VOTE_OPTION_NO"));
        let mut older = tx("VOTE20", 20);
        older.gov_votes.push(vote(20, "VOTE_OPTION_YES"));

        db.commit_block(&block(30, vec![newer]), WatermarkAdvance::None)
            .await
            .unwrap();
        db.commit_block(&block(20, vec![older]), WatermarkAdvance::None)
            .await
            .unwrap();

        let votes = db.get_votes(3).await.unwrap();
        assert_eq!(votes.len(), 1);
        assert_eq!(votes[0].options[0].option, "VOTE_OPTION_NO");
    }

    #[tokio::test]
    async fn unbind_only_removes_older_bindings() {
        let db = MemoryDbManager::new_empty();
        let intent = |action, height| NameIntent {
            action,
            name: NameRecord::new("alice.pb", "pb1owner", true, height),
        };
        let mut bind = tx("BIND", 50);
        bind.names.insert(intent(NameAction::Bind, 50));
        let mut stale_unbind = tx("UNBIND", 40);
        stale_unbind.names.insert(intent(NameAction::Unbind, 40));

        db.commit_block(&block(50, vec![bind]), WatermarkAdvance::None)
            .await
            .unwrap();
        db.commit_block(&block(40, vec![stale_unbind]), WatermarkAdvance::None)
            .await
            .unwrap();
        assert_eq!(db.get_name("alice.pb").await.unwrap().len(), 1);

        let mut unbind = tx("UNBIND2", 60);
        unbind.names.insert(intent(NameAction::Unbind, 60));
        db.commit_block(&block(60, vec![unbind]), WatermarkAdvance::None)
            .await
            .unwrap();
        assert!(db.get_name("alice.pb").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn known_message_type_is_not_overwritten() {
        let db = MemoryDbManager::new_empty();
        let type_url = "/cosmos.bank.v1beta1.MsgSend".to_string();
        let mut first = block(1, vec![]);
        first.msg_types.insert(
            type_url.clone(),
            MsgTypeRecord {
                type_url: type_url.clone(),
                msg_type: "send".to_string(),
                module: "bank".to_string(),
            },
        );
        let mut second = block(2, vec![]);
        second.msg_types.insert(
            type_url.clone(),
            MsgTypeRecord {
                type_url: type_url.clone(),
                msg_type: "unknown".to_string(),
                module: "unknown".to_string(),
            },
        );

        db.commit_block(&first, WatermarkAdvance::None).await.unwrap();
        db.commit_block(&second, WatermarkAdvance::None).await.unwrap();

        let state = db.state.lock().await;
        assert_eq!(state.msg_types[&type_url].msg_type, "send");
    }

    #[tokio::test]
    async fn recording_a_retry_twice_counts_the_attempt() {
        let db = MemoryDbManager::new_empty();
        db.record_retry(7, false, "first").await.unwrap();
        db.mark_retry_processing(7, false).await.unwrap();
        db.record_retry(7, false, "second").await.unwrap();

        let entries = db.retry_entries(10).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].retry_count, 1);
        assert_eq!(entries[0].state, RetryState::Pending);
        assert_eq!(entries[0].last_error, "second");
    }

    #[tokio::test]
    async fn reading_a_block_counts_cache_hits() {
        let db = MemoryDbManager::new_empty();
        db.commit_block(&block(3, vec![]), WatermarkAdvance::None)
            .await
            .unwrap();
        db.get_block(3).await.unwrap();
        let (_, cache) = db.get_block(3).await.unwrap().unwrap();
        assert_eq!(cache.hit_count, 2);
        assert!(cache.last_hit.is_some());
    }
}
