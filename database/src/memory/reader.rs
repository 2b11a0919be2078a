use explorer_primitives::{
    AccountRecord, BlockHeight, BlockRecord, CacheMetadata, GovProposalRecord, GovVoteRecord,
    IbcLedgerRecord, IbcLinkRecord, IndexedTransaction, NameRecord, RetryEntry, TxWriteSet,
    Watermark,
};

use crate::memory::MemoryDbManager;

fn indexed_transaction(tx: &TxWriteSet) -> IndexedTransaction {
    IndexedTransaction {
        tx: tx.tx.clone(),
        messages: tx.messages.clone(),
        fees: tx.fees.iter().cloned().collect(),
        fee_payers: tx.fee_payers.iter().cloned().collect(),
        addresses: tx.addresses.iter().cloned().collect(),
        markers: tx.markers.iter().cloned().collect(),
        nfts: tx.nfts.iter().cloned().collect(),
        sm_codes: tx.sm_codes.iter().cloned().collect(),
        sm_contracts: tx.sm_contracts.iter().cloned().collect(),
        ibc_channels: tx.ibc_channels.iter().cloned().collect(),
        signatures: tx.signatures.iter().cloned().collect(),
    }
}

#[async_trait::async_trait]
impl crate::ReaderDbManager for MemoryDbManager {
    async fn get_transaction(&self, tx_hash: &str) -> anyhow::Result<Option<IndexedTransaction>> {
        Ok(self
            .state
            .lock()
            .await
            .txs
            .get(tx_hash)
            .map(indexed_transaction))
    }

    async fn get_transactions_at_height(
        &self,
        height: BlockHeight,
    ) -> anyhow::Result<Vec<IndexedTransaction>> {
        let state = self.state.lock().await;
        Ok(state
            .txs_by_height
            .get(&height)
            .map(|hashes| {
                hashes
                    .iter()
                    .filter_map(|hash| state.txs.get(hash))
                    .map(indexed_transaction)
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn get_block(
        &self,
        height: BlockHeight,
    ) -> anyhow::Result<Option<(BlockRecord, CacheMetadata)>> {
        let mut state = self.state.lock().await;
        Ok(state.blocks.get_mut(&height).map(|(block, cache)| {
            cache.hit_count += 1;
            cache.last_hit = Some(chrono::Utc::now());
            (block.clone(), cache.clone())
        }))
    }

    async fn current_watermark(&self) -> anyhow::Result<Watermark> {
        Ok(self.state.lock().await.watermark.clone())
    }

    async fn retry_queue(&self, limit: u64) -> anyhow::Result<Vec<RetryEntry>> {
        Ok(self
            .state
            .lock()
            .await
            .retries
            .values()
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn get_account(&self, address: &str) -> anyhow::Result<Option<AccountRecord>> {
        Ok(self.state.lock().await.accounts.get(address).cloned())
    }

    async fn get_proposal(&self, proposal_id: u64) -> anyhow::Result<Option<GovProposalRecord>> {
        Ok(self.state.lock().await.proposals.get(&proposal_id).cloned())
    }

    async fn get_votes(&self, proposal_id: u64) -> anyhow::Result<Vec<GovVoteRecord>> {
        Ok(self
            .state
            .lock()
            .await
            .votes
            .iter()
            .filter(|((id, _), _)| *id == proposal_id)
            .map(|(_, vote)| vote.clone())
            .collect())
    }

    async fn get_name(&self, full_name: &str) -> anyhow::Result<Vec<NameRecord>> {
        Ok(self
            .state
            .lock()
            .await
            .names
            .iter()
            .filter(|((name, _), _)| name == full_name)
            .map(|(_, record)| record.clone())
            .collect())
    }

    async fn get_ibc_ledger(&self, ledger_key: &str) -> anyhow::Result<Option<IbcLedgerRecord>> {
        Ok(self.state.lock().await.ibc_ledgers.get(ledger_key).cloned())
    }

    async fn get_ibc_acks(&self, ledger_key: &str) -> anyhow::Result<Vec<IbcLinkRecord>> {
        Ok(self
            .state
            .lock()
            .await
            .ibc_acks
            .iter()
            .filter(|((key, _, _), _)| key == ledger_key)
            .map(|(_, link)| link.clone())
            .collect())
    }

    async fn get_pending_ibc(&self, height: BlockHeight) -> anyhow::Result<Vec<IbcLinkRecord>> {
        Ok(self
            .state
            .lock()
            .await
            .ibc_pending
            .values()
            .filter(|link| link.height == height)
            .cloned()
            .collect())
    }
}
