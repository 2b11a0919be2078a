use bigdecimal::BigDecimal;
use explorer_primitives::{
    AccountRecord, BlockHeight, BlockRecord, CacheMetadata, GovProposalRecord, GovVoteRecord,
    IbcChannelKey, IbcLedgerRecord, IbcLinkRecord, IndexedTransaction, NameRecord, RetryEntry,
    TxFeeRecord, TxRecord, Watermark,
};

use crate::postgres::models::{
    self, AccountRow, AddressRow, BlockRow, FeePayerRow, LedgerRow, LinkRow, NameRow, ProposalRow,
    RetryRow, SignatureRow, TxFeeRow, TxMessageRow, TxRow, VoteRow,
};

const TX_COLUMNS: &str =
    "hash, height, tx_timestamp, code, codespace, gas_wanted, gas_used, tx_v2";

impl crate::PostgresDBManager {
    async fn load_joins(&self, tx: TxRecord) -> anyhow::Result<IndexedTransaction> {
        let hash = tx.hash.clone();
        let (messages, fees, fee_payers, addresses, markers, nfts, sm_codes, sm_contracts, channels, signatures) = futures::try_join!(
            sqlx::query_as::<_, TxMessageRow>(
                "SELECT msg_idx, type_url, msg_type, module, msg FROM tx_message WHERE tx_hash = $1 ORDER BY msg_idx;",
            )
            .bind(&hash)
            .fetch_all(&self.pool),
            sqlx::query_as::<_, TxFeeRow>(
                "SELECT denom, amount FROM tx_fee WHERE tx_hash = $1 ORDER BY denom;",
            )
            .bind(&hash)
            .fetch_all(&self.pool),
            sqlx::query_as::<_, FeePayerRow>(
                "SELECT payer_type, address FROM tx_fee_payer WHERE tx_hash = $1 ORDER BY payer_type, address;",
            )
            .bind(&hash)
            .fetch_all(&self.pool),
            sqlx::query_as::<_, AddressRow>(
                "SELECT address, address_type FROM tx_address_join WHERE tx_hash = $1 ORDER BY address;",
            )
            .bind(&hash)
            .fetch_all(&self.pool),
            sqlx::query_as::<_, (String,)>(
                "SELECT denom FROM tx_marker_join WHERE tx_hash = $1 ORDER BY denom;",
            )
            .bind(&hash)
            .fetch_all(&self.pool),
            sqlx::query_as::<_, (String,)>(
                "SELECT metadata_address FROM tx_nft_join WHERE tx_hash = $1 ORDER BY metadata_address;",
            )
            .bind(&hash)
            .fetch_all(&self.pool),
            sqlx::query_as::<_, (BigDecimal,)>(
                "SELECT code_id FROM tx_sm_code WHERE tx_hash = $1 ORDER BY code_id;",
            )
            .bind(&hash)
            .fetch_all(&self.pool),
            sqlx::query_as::<_, (String,)>(
                "SELECT contract_address FROM tx_sm_contract WHERE tx_hash = $1 ORDER BY contract_address;",
            )
            .bind(&hash)
            .fetch_all(&self.pool),
            sqlx::query_as::<_, (String, String)>(
                "SELECT port, channel FROM tx_ibc WHERE tx_hash = $1 ORDER BY port, channel;",
            )
            .bind(&hash)
            .fetch_all(&self.pool),
            sqlx::query_as::<_, SignatureRow>(
                "SELECT pubkey, pubkey_type, address FROM signature_join WHERE tx_hash = $1 ORDER BY pubkey;",
            )
            .bind(&hash)
            .fetch_all(&self.pool),
        )?;
        crate::metrics::count_query("get_transaction", "tx_joins");

        Ok(IndexedTransaction {
            tx,
            messages: models::convert_rows(messages)?,
            fees: fees.into_iter().map(TxFeeRecord::from).collect(),
            fee_payers: models::convert_rows(fee_payers)?,
            addresses: models::convert_rows(addresses)?,
            markers: markers.into_iter().map(|(denom,)| denom).collect(),
            nfts: nfts.into_iter().map(|(address,)| address).collect(),
            sm_codes: sm_codes
                .iter()
                .map(|(code_id,)| models::to_u64(code_id, "code_id"))
                .collect::<anyhow::Result<_>>()?,
            sm_contracts: sm_contracts.into_iter().map(|(address,)| address).collect(),
            ibc_channels: channels
                .into_iter()
                .map(|(port, channel)| IbcChannelKey::new(port, channel))
                .collect(),
            signatures: signatures.into_iter().map(Into::into).collect(),
        })
    }
}

#[async_trait::async_trait]
impl crate::ReaderDbManager for crate::PostgresDBManager {
    async fn get_transaction(&self, tx_hash: &str) -> anyhow::Result<Option<IndexedTransaction>> {
        crate::metrics::count_query("get_transaction", "tx_cache");
        let row: Option<TxRow> = sqlx::query_as(&format!(
            "UPDATE tx_cache SET hit_count = hit_count + 1, last_hit = now() WHERE hash = $1 RETURNING {TX_COLUMNS};"
        ))
        .bind(tx_hash)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => Ok(Some(self.load_joins(TxRecord::try_from(row)?).await?)),
            None => Ok(None),
        }
    }

    async fn get_transactions_at_height(
        &self,
        height: BlockHeight,
    ) -> anyhow::Result<Vec<IndexedTransaction>> {
        crate::metrics::count_query("get_transactions_at_height", "tx_cache");
        let rows: Vec<TxRow> = sqlx::query_as(&format!(
            "SELECT {TX_COLUMNS} FROM tx_cache WHERE height = $1 ORDER BY block_tx_index;"
        ))
        .bind(BigDecimal::from(height))
        .fetch_all(&self.pool)
        .await?;
        let mut transactions = Vec::with_capacity(rows.len());
        for row in rows {
            transactions.push(self.load_joins(TxRecord::try_from(row)?).await?);
        }
        Ok(transactions)
    }

    async fn get_block(
        &self,
        height: BlockHeight,
    ) -> anyhow::Result<Option<(BlockRecord, CacheMetadata)>> {
        crate::metrics::count_query("get_block", "block_cache");
        let row: Option<BlockRow> = sqlx::query_as(
            "
            UPDATE block_cache
            SET hit_count = hit_count + 1, last_hit = now()
            WHERE height = $1
            RETURNING height, hash, tx_count, block_timestamp, block, last_hit, hit_count;
            ",
        )
        .bind(BigDecimal::from(height))
        .fetch_optional(&self.pool)
        .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn current_watermark(&self) -> anyhow::Result<Watermark> {
        crate::IndexerDbManager::get_watermark(self).await
    }

    async fn retry_queue(&self, limit: u64) -> anyhow::Result<Vec<RetryEntry>> {
        crate::metrics::count_query("retry_queue", "block_tx_retry");
        let rows: Vec<RetryRow> = sqlx::query_as(
            "
            SELECT height, non_blocking, state, retry_count, last_error, last_attempt
            FROM block_tx_retry
            ORDER BY height, non_blocking
            LIMIT $1;
            ",
        )
        .bind(i64::try_from(limit)?)
        .fetch_all(&self.pool)
        .await?;
        models::convert_rows(rows)
    }

    async fn get_account(&self, address: &str) -> anyhow::Result<Option<AccountRecord>> {
        crate::metrics::count_query("get_account", "account");
        let row: Option<AccountRow> = sqlx::query_as(
            "
            SELECT address, account_type, account_number, data, last_updated_height
            FROM account
            WHERE address = $1;
            ",
        )
        .bind(address)
        .fetch_optional(&self.pool)
        .await?;
        row.map(AccountRecord::try_from).transpose()
    }

    async fn get_proposal(&self, proposal_id: u64) -> anyhow::Result<Option<GovProposalRecord>> {
        crate::metrics::count_query("get_proposal", "gov_proposal");
        let row: Option<ProposalRow> = sqlx::query_as(
            "
            SELECT proposal_id, proposal_type, title, description, status, proposer, data,
                   block_height, tx_hash, tx_timestamp
            FROM gov_proposal
            WHERE proposal_id = $1;
            ",
        )
        .bind(BigDecimal::from(proposal_id))
        .fetch_optional(&self.pool)
        .await?;
        row.map(GovProposalRecord::try_from).transpose()
    }

    async fn get_votes(&self, proposal_id: u64) -> anyhow::Result<Vec<GovVoteRecord>> {
        crate::metrics::count_query("get_votes", "gov_vote");
        let rows: Vec<VoteRow> = sqlx::query_as(
            "
            SELECT proposal_id, voter, options, is_weighted, block_height, tx_hash, tx_timestamp
            FROM gov_vote
            WHERE proposal_id = $1
            ORDER BY voter;
            ",
        )
        .bind(BigDecimal::from(proposal_id))
        .fetch_all(&self.pool)
        .await?;
        models::convert_rows(rows)
    }

    async fn get_name(&self, full_name: &str) -> anyhow::Result<Vec<NameRecord>> {
        crate::metrics::count_query("get_name", "name");
        let rows: Vec<NameRow> = sqlx::query_as(
            "
            SELECT full_name, owner, child, parent, restricted, height_added
            FROM name
            WHERE full_name = $1
            ORDER BY owner;
            ",
        )
        .bind(full_name)
        .fetch_all(&self.pool)
        .await?;
        models::convert_rows(rows)
    }

    async fn get_ibc_ledger(&self, ledger_key: &str) -> anyhow::Result<Option<IbcLedgerRecord>> {
        crate::metrics::count_query("get_ibc_ledger", "ibc_ledger");
        let row: Option<LedgerRow> = sqlx::query_as(
            "
            SELECT ledger_key, port, channel, sequence, movement, denom, amount, from_address,
                   to_address, tx_hash, block_height, tx_timestamp, acknowledged, ack_success
            FROM ibc_ledger
            WHERE ledger_key = $1;
            ",
        )
        .bind(ledger_key)
        .fetch_optional(&self.pool)
        .await?;
        row.map(IbcLedgerRecord::try_from).transpose()
    }

    async fn get_ibc_acks(&self, ledger_key: &str) -> anyhow::Result<Vec<IbcLinkRecord>> {
        crate::metrics::count_query("get_ibc_acks", "ibc_ledger_ack");
        let rows: Vec<LinkRow> = sqlx::query_as(
            "
            SELECT ledger_key, ack_type, tx_hash, block_height, success
            FROM ibc_ledger_ack
            WHERE ledger_key = $1
            ORDER BY block_height;
            ",
        )
        .bind(ledger_key)
        .fetch_all(&self.pool)
        .await?;
        models::convert_rows(rows)
    }

    async fn get_pending_ibc(&self, height: BlockHeight) -> anyhow::Result<Vec<IbcLinkRecord>> {
        crate::metrics::count_query("get_pending_ibc", "ibc_pending");
        let rows: Vec<LinkRow> = sqlx::query_as(
            "
            SELECT ledger_key, ack_type, tx_hash, block_height, success
            FROM ibc_pending
            WHERE block_height = $1;
            ",
        )
        .bind(BigDecimal::from(height))
        .fetch_all(&self.pool)
        .await?;
        models::convert_rows(rows)
    }
}
