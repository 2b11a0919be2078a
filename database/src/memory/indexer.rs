use std::collections::HashSet;

use explorer_primitives::{
    BlockHeight, BlockWriteSet, CacheMetadata, GovProposalRefresh, NameAction, RetryEntry,
    RetryState, Timestamp, Watermark, WatermarkAdvance, FINAL_PROPOSAL_STATUSES,
};

use crate::memory::{MemoryDbManager, MemoryState};
use crate::{CommitSummary, PendingResolution, ReferenceKind};

fn count_query(method_name: &str) {
    crate::metrics::count_query(method_name, "memory");
}

fn apply_references(state: &mut MemoryState, write_set: &BlockWriteSet) {
    let references = &write_set.references;
    for (address, account) in &references.accounts {
        state.accounts.insert(address.clone(), account.clone());
    }
    for (operator, validator) in &references.validators {
        let cache = state
            .validators
            .remove(operator)
            .map(|(_, cache)| cache)
            .unwrap_or_default();
        state
            .validators
            .insert(operator.clone(), (validator.clone(), cache));
    }
    for (denom, marker) in &references.markers {
        state.markers.insert(denom.clone(), marker.clone());
    }
    for (key, channel) in &references.channels {
        state.channels.insert(key.clone(), channel.clone());
    }
    for (code_id, code) in &references.sm_codes {
        state.sm_codes.insert(*code_id, code.clone());
    }
    for (address, contract) in &references.sm_contracts {
        state.sm_contracts.insert(address.clone(), contract.clone());
    }
    for (type_url, msg_type) in &write_set.msg_types {
        let replace = state
            .msg_types
            .get(type_url)
            .map_or(true, |stored| stored.is_unknown());
        if replace {
            state.msg_types.insert(type_url.clone(), msg_type.clone());
        }
    }
}

fn apply_proposal_refreshes(state: &mut MemoryState, refreshes: &[&GovProposalRefresh]) {
    for refresh in refreshes {
        if let Some(proposal) = state.proposals.get_mut(&refresh.proposal_id) {
            proposal.status = refresh.status.clone();
            if let Some(title) = &refresh.title {
                proposal.title = title.clone();
            }
            proposal.data = refresh.data.clone();
        }
    }
}

/// Applies the block to `state`. With `fail_midway` set the transactions are
/// written and then an error is returned, leaving the caller to roll back.
fn apply_block(
    state: &mut MemoryState,
    write_set: &BlockWriteSet,
    advance: WatermarkAdvance,
    fail_midway: bool,
) -> anyhow::Result<CommitSummary> {
    let height = write_set.height();
    let mut summary = CommitSummary::default();

    if write_set.replace_existing || !state.blocks.contains_key(&height) {
        let cache = state
            .blocks
            .remove(&height)
            .map(|(_, cache)| cache)
            .unwrap_or_default();
        state
            .blocks
            .insert(height, (write_set.block.clone(), cache));
    }
    if let Some(proposer) = &write_set.proposer {
        if write_set.replace_existing || !state.proposers.contains_key(&height) {
            state.proposers.insert(height, proposer.clone());
        }
    }
    if let Some(validator_set) = &write_set.validator_set {
        state
            .validator_sets
            .entry(height)
            .or_insert_with(|| (validator_set.clone(), CacheMetadata::default()));
    }

    apply_references(state, write_set);

    for tx in &write_set.transactions {
        let hash = tx.hash().to_string();
        if state.txs.contains_key(&hash) && !write_set.replace_existing {
            continue;
        }
        state.txs.insert(hash.clone(), tx.clone());
        let hashes = state.txs_by_height.entry(height).or_default();
        if !hashes.contains(&hash) {
            hashes.push(hash.clone());
        }
        summary.transactions += 1;

        for (address, scope) in &tx.nft_scopes {
            let apply = state
                .nft_scopes
                .get(address)
                .map_or(true, |stored| scope.height >= stored.height);
            if apply {
                state.nft_scopes.insert(address.clone(), scope.clone());
            }
        }
        for proposal in &tx.gov_proposals {
            state
                .proposals
                .entry(proposal.proposal_id)
                .or_insert_with(|| proposal.clone());
        }
        for vote in &tx.gov_votes {
            let key = (vote.proposal_id, vote.voter.clone());
            let apply = state
                .votes
                .get(&key)
                .map_or(true, |stored| vote.height >= stored.height);
            if apply {
                state.votes.insert(key, vote.clone());
            }
        }
        for deposit in &tx.gov_deposits {
            state
                .deposits
                .entry((
                    deposit.tx_hash.clone(),
                    deposit.proposal_id,
                    deposit.depositor.clone(),
                    deposit.denom.clone(),
                ))
                .or_insert_with(|| deposit.clone());
        }
        for ledger in &tx.ibc_ledgers {
            state
                .ibc_ledgers
                .entry(ledger.ledger_key.clone())
                .or_insert_with(|| ledger.clone());
        }
        for intent in &tx.names {
            let name = &intent.name;
            match intent.action {
                NameAction::Bind => {
                    let key = (name.full_name.clone(), name.owner.clone());
                    let apply = state
                        .names
                        .get(&key)
                        .map_or(true, |stored| name.height >= stored.height);
                    if apply {
                        state.names.insert(key, name.clone());
                    }
                }
                NameAction::Unbind => {
                    state.names.retain(|(full_name, _), stored| {
                        !(full_name == &name.full_name && stored.height <= name.height)
                    });
                }
            }
        }
        for failure in &tx.failures {
            state.failures.insert(
                (height, hash.clone(), failure.process_type.clone()),
                failure.clone(),
            );
        }
    }

    if fail_midway {
        anyhow::bail!("Injected commit failure at height {}", height);
    }

    for link in write_set
        .transactions
        .iter()
        .flat_map(|tx| tx.ibc_links.iter())
    {
        if !state.link_ibc(link) {
            summary.pending_ibc += 1;
        }
    }

    let new_ledger_keys: HashSet<&str> = write_set
        .transactions
        .iter()
        .flat_map(|tx| tx.ibc_ledgers.iter())
        .map(|ledger| ledger.ledger_key.as_str())
        .collect();
    let waiting = state
        .ibc_pending
        .values()
        .filter(|pending| new_ledger_keys.contains(pending.ledger_key.as_str()))
        .cloned()
        .collect::<Vec<_>>();
    for pending in waiting {
        if state.link_ibc(&pending) {
            summary.resolved_ibc += 1;
        }
    }

    apply_proposal_refreshes(
        state,
        &write_set
            .references
            .proposal_refreshes
            .values()
            .collect::<Vec<_>>(),
    );

    if summary.pending_ibc > 0 || !write_set.non_blocking_failures.is_empty() {
        let mut reasons = write_set.non_blocking_failures.clone();
        if summary.pending_ibc > 0 {
            reasons.push(format!(
                "{} IBC item(s) waiting for their ledger record",
                summary.pending_ibc
            ));
        }
        state.record_retry(height, true, &reasons.join("; "));
    }

    state.apply_advance(advance);
    Ok(summary)
}

#[async_trait::async_trait]
impl crate::IndexerDbManager for MemoryDbManager {
    async fn commit_block(
        &self,
        write_set: &BlockWriteSet,
        advance: WatermarkAdvance,
    ) -> anyhow::Result<CommitSummary> {
        count_query("commit_block");
        let _timer = crate::metrics::BLOCK_COMMIT_SECONDS
            .with_label_values(&["memory"])
            .start_timer();
        let fail_midway = self.take_injected_failure(write_set.height()).await;
        let mut state = self.state.lock().await;
        if fail_midway {
            let snapshot = state.clone();
            let result = apply_block(&mut state, write_set, advance, true);
            *state = snapshot;
            tracing::warn!(
                target: crate::DATABASE,
                "Rolled back injected commit failure of block {}",
                write_set.height()
            );
            crate::metrics::BLOCK_COMMIT_ROLLBACKS
                .with_label_values(&["memory"])
                .inc();
            result
        } else {
            apply_block(&mut state, write_set, advance, false)
        }
    }

    async fn advance_watermark(&self, advance: WatermarkAdvance) -> anyhow::Result<()> {
        count_query("advance_watermark");
        self.state.lock().await.apply_advance(advance);
        Ok(())
    }

    async fn get_watermark(&self) -> anyhow::Result<Watermark> {
        count_query("get_watermark");
        Ok(self.state.lock().await.watermark.clone())
    }

    async fn init_watermark(&self, max_height: BlockHeight) -> anyhow::Result<Watermark> {
        count_query("init_watermark");
        let mut state = self.state.lock().await;
        if state.watermark.max_height_read.is_none() {
            state.watermark.max_height_read = Some(max_height);
            state.watermark.last_update = Some(chrono::Utc::now());
        }
        Ok(state.watermark.clone())
    }

    async fn block_exists(&self, height: BlockHeight) -> anyhow::Result<bool> {
        count_query("block_exists");
        Ok(self.state.lock().await.blocks.contains_key(&height))
    }

    async fn block_timestamp(&self, height: BlockHeight) -> anyhow::Result<Option<Timestamp>> {
        count_query("block_timestamp");
        Ok(self
            .state
            .lock()
            .await
            .blocks
            .get(&height)
            .map(|(block, _)| block.timestamp))
    }

    async fn tx_count_at_height(&self, height: BlockHeight) -> anyhow::Result<u64> {
        count_query("tx_count_at_height");
        Ok(self
            .state
            .lock()
            .await
            .txs_by_height
            .get(&height)
            .map_or(0, |hashes| hashes.len() as u64))
    }

    async fn stored_tx_responses(
        &self,
        height: BlockHeight,
    ) -> anyhow::Result<Vec<serde_json::Value>> {
        count_query("stored_tx_responses");
        let state = self.state.lock().await;
        Ok(state
            .txs_by_height
            .get(&height)
            .map(|hashes| {
                hashes
                    .iter()
                    .filter_map(|hash| state.txs.get(hash))
                    .map(|tx| tx.tx.raw.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn days_between_heights(
        &self,
        min_height: BlockHeight,
        max_height: BlockHeight,
    ) -> anyhow::Result<u64> {
        count_query("days_between_heights");
        let state = self.state.lock().await;
        let days = state
            .blocks
            .range(min_height..=max_height)
            .map(|(_, (block, _))| block.timestamp.date_naive())
            .collect::<HashSet<_>>();
        Ok(days.len() as u64)
    }

    async fn existing_references(
        &self,
        kind: ReferenceKind,
        keys: &[String],
    ) -> anyhow::Result<HashSet<String>> {
        count_query("existing_references");
        let state = self.state.lock().await;
        Ok(keys
            .iter()
            .filter(|key| match kind {
                ReferenceKind::Account => state.accounts.contains_key(*key),
                ReferenceKind::Validator => state.validators.contains_key(*key),
                ReferenceKind::Marker => state.markers.contains_key(*key),
                ReferenceKind::SmCode => key
                    .parse::<u64>()
                    .is_ok_and(|code_id| state.sm_codes.contains_key(&code_id)),
                ReferenceKind::SmContract => state.sm_contracts.contains_key(*key),
                ReferenceKind::IbcChannel => state
                    .channels
                    .keys()
                    .any(|channel| &channel.to_string() == *key),
            })
            .cloned()
            .collect())
    }

    async fn non_final_proposals(&self) -> anyhow::Result<Vec<u64>> {
        count_query("non_final_proposals");
        Ok(self
            .state
            .lock()
            .await
            .proposals
            .values()
            .filter(|proposal| !FINAL_PROPOSAL_STATUSES.contains(&proposal.status.as_str()))
            .map(|proposal| proposal.proposal_id)
            .collect())
    }

    async fn refresh_proposals(&self, refreshes: &[GovProposalRefresh]) -> anyhow::Result<()> {
        count_query("refresh_proposals");
        let mut state = self.state.lock().await;
        apply_proposal_refreshes(&mut state, &refreshes.iter().collect::<Vec<_>>());
        Ok(())
    }

    async fn record_retry(
        &self,
        height: BlockHeight,
        non_blocking: bool,
        error: &str,
    ) -> anyhow::Result<()> {
        count_query("record_retry");
        self.state
            .lock()
            .await
            .record_retry(height, non_blocking, error);
        Ok(())
    }

    async fn retry_entries(&self, limit: u64) -> anyhow::Result<Vec<RetryEntry>> {
        count_query("retry_entries");
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

    async fn mark_retry_processing(
        &self,
        height: BlockHeight,
        non_blocking: bool,
    ) -> anyhow::Result<()> {
        count_query("mark_retry_processing");
        if let Some(entry) = self
            .state
            .lock()
            .await
            .retries
            .get_mut(&(height, non_blocking))
        {
            entry.state = RetryState::Processing;
            entry.last_attempt = chrono::Utc::now();
        }
        Ok(())
    }

    async fn delete_retry(&self, height: BlockHeight, non_blocking: bool) -> anyhow::Result<()> {
        count_query("delete_retry");
        self.state
            .lock()
            .await
            .retries
            .remove(&(height, non_blocking));
        Ok(())
    }

    async fn retry_queue_depth(&self) -> anyhow::Result<u64> {
        count_query("retry_queue_depth");
        Ok(self.state.lock().await.retries.len() as u64)
    }

    async fn resolve_pending_ibc(&self, height: BlockHeight) -> anyhow::Result<PendingResolution> {
        count_query("resolve_pending_ibc");
        let mut state = self.state.lock().await;
        let at_height = state
            .ibc_pending
            .values()
            .filter(|pending| pending.height == height)
            .cloned()
            .collect::<Vec<_>>();
        let mut resolution = PendingResolution::default();
        for pending in at_height {
            if state.link_ibc(&pending) {
                resolution.resolved += 1;
            } else {
                resolution.remaining += 1;
            }
        }
        Ok(resolution)
    }
}
