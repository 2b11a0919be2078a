use std::collections::{BTreeMap, HashSet};

use bigdecimal::BigDecimal;
use explorer_primitives::{
    BlockHeight, BlockWriteSet, GovProposalRefresh, GovVoteRecord, IbcAckType, IbcLinkRecord,
    NameAction, NftScopeRecord, RetryEntry, Timestamp, TxWriteSet, Watermark, WatermarkAdvance,
    FINAL_PROPOSAL_STATUSES,
};

use crate::postgres::models::{self, LinkRow, RetryRow, WatermarkRow};
use crate::{CommitSummary, PendingResolution, ReferenceKind, DATABASE};

/// PostgreSQL accepts at most this many bind parameters per statement
const BIND_LIMIT: usize = 65_535;

type Separated<'qb, 'args> =
    sqlx::query_builder::Separated<'qb, 'args, sqlx::Postgres, &'static str>;

/// Multi-row `INSERT` split into statements that stay under the bind limit
async fn insert_rows<'a, T, F>(
    conn: &mut sqlx::PgConnection,
    insert: &str,
    on_conflict: &str,
    columns: usize,
    rows: &'a [T],
    mut push_row: F,
) -> anyhow::Result<()>
where
    T: Sync,
    F: for<'qb> FnMut(Separated<'qb, 'a>, &'a T) + Send,
{
    for chunk in rows.chunks(BIND_LIMIT / columns) {
        let mut query_builder: sqlx::QueryBuilder<sqlx::Postgres> =
            sqlx::QueryBuilder::new(insert);
        query_builder.push_values(chunk.iter(), &mut push_row);
        query_builder.push(on_conflict);
        query_builder.build().execute(&mut *conn).await?;
    }
    Ok(())
}

async fn advance_in(
    conn: &mut sqlx::PgConnection,
    advance: WatermarkAdvance,
) -> anyhow::Result<()> {
    let (query, height) = match advance {
        WatermarkAdvance::None => return Ok(()),
        WatermarkAdvance::Max(height) => (
            "
            INSERT INTO block_index (id, max_height_read, last_update)
            VALUES (1, $1, now())
            ON CONFLICT (id)
            DO UPDATE SET max_height_read = GREATEST(block_index.max_height_read, EXCLUDED.max_height_read),
                          last_update = now();
            ",
            height,
        ),
        WatermarkAdvance::Min(height) => (
            "
            INSERT INTO block_index (id, min_height_read, last_update)
            VALUES (1, $1, now())
            ON CONFLICT (id)
            DO UPDATE SET min_height_read = LEAST(block_index.min_height_read, EXCLUDED.min_height_read),
                          last_update = now();
            ",
            height,
        ),
    };
    crate::metrics::count_query("advance_watermark", "block_index");
    sqlx::query(query)
        .bind(BigDecimal::from(height))
        .execute(&mut *conn)
        .await
        .map_err(|err| {
            tracing::warn!(target: DATABASE, "Failed to apply {:?}: {}", advance, err);
            err
        })?;
    Ok(())
}

async fn record_retry_in(
    conn: &mut sqlx::PgConnection,
    height: BlockHeight,
    non_blocking: bool,
    error: &str,
) -> anyhow::Result<()> {
    crate::metrics::count_query("record_retry", "block_tx_retry");
    sqlx::query(
        "
        INSERT INTO block_tx_retry (height, non_blocking, state, retry_count, last_error, last_attempt)
        VALUES ($1, $2, 'PENDING', 0, $3, now())
        ON CONFLICT (height, non_blocking)
        DO UPDATE SET state = 'PENDING',
                      retry_count = block_tx_retry.retry_count + 1,
                      last_error = EXCLUDED.last_error,
                      last_attempt = now();
        ",
    )
    .bind(BigDecimal::from(height))
    .bind(non_blocking)
    .bind(error)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Stores the link as an ack when its ledger row exists, otherwise as pending.
/// Returns true when the link was resolved.
async fn link_ibc_in(
    conn: &mut sqlx::PgConnection,
    link: &IbcLinkRecord,
) -> anyhow::Result<bool> {
    crate::metrics::count_query("link_ibc", "ibc_ledger");
    let ledger: Option<(String,)> = sqlx::query_as(
        "
        SELECT ledger_key
        FROM ibc_ledger
        WHERE ledger_key = $1
        FOR UPDATE;
        ",
    )
    .bind(&link.ledger_key)
    .fetch_optional(&mut *conn)
    .await?;

    if ledger.is_none() {
        sqlx::query(
            "
            INSERT INTO ibc_pending (ledger_key, ack_type, tx_hash, block_height, success)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT DO NOTHING;
            ",
        )
        .bind(&link.ledger_key)
        .bind(link.ack_type.as_str())
        .bind(&link.tx_hash)
        .bind(BigDecimal::from(link.height))
        .bind(link.success)
        .execute(&mut *conn)
        .await?;
        return Ok(false);
    }

    if link.ack_type != IbcAckType::Receive {
        sqlx::query(
            "
            UPDATE ibc_ledger
            SET acknowledged = true, ack_success = $2
            WHERE ledger_key = $1;
            ",
        )
        .bind(&link.ledger_key)
        .bind(link.success && link.ack_type == IbcAckType::Acknowledgement)
        .execute(&mut *conn)
        .await?;
    }
    sqlx::query(
        "
        INSERT INTO ibc_ledger_ack (ledger_key, ack_type, tx_hash, block_height, success)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT DO NOTHING;
        ",
    )
    .bind(&link.ledger_key)
    .bind(link.ack_type.as_str())
    .bind(&link.tx_hash)
    .bind(BigDecimal::from(link.height))
    .bind(link.success)
    .execute(&mut *conn)
    .await?;
    sqlx::query(
        "
        DELETE FROM ibc_pending
        WHERE ledger_key = $1 AND ack_type = $2 AND tx_hash = $3;
        ",
    )
    .bind(&link.ledger_key)
    .bind(link.ack_type.as_str())
    .bind(&link.tx_hash)
    .execute(&mut *conn)
    .await?;
    Ok(true)
}

async fn refresh_proposals_in(
    conn: &mut sqlx::PgConnection,
    refreshes: &[&GovProposalRefresh],
) -> anyhow::Result<()> {
    for refresh in refreshes {
        crate::metrics::count_query("refresh_proposals", "gov_proposal");
        sqlx::query(
            "
            UPDATE gov_proposal
            SET status = $2, title = COALESCE($3, title), data = $4
            WHERE proposal_id = $1;
            ",
        )
        .bind(BigDecimal::from(refresh.proposal_id))
        .bind(&refresh.status)
        .bind(&refresh.title)
        .bind(&refresh.data)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

async fn save_block(conn: &mut sqlx::PgConnection, write_set: &BlockWriteSet) -> anyhow::Result<()> {
    let block = &write_set.block;
    crate::metrics::count_query("commit_block", "block_cache");
    let on_conflict = if write_set.replace_existing {
        "ON CONFLICT (height) DO UPDATE SET hash = EXCLUDED.hash, tx_count = EXCLUDED.tx_count,
         block_timestamp = EXCLUDED.block_timestamp, block = EXCLUDED.block;"
    } else {
        "ON CONFLICT DO NOTHING;"
    };
    sqlx::query(&format!(
        "INSERT INTO block_cache (height, hash, tx_count, block_timestamp, block)
         VALUES ($1, $2, $3, $4, $5) {}",
        on_conflict
    ))
    .bind(BigDecimal::from(block.height))
    .bind(&block.hash)
    .bind(block.tx_count as i32)
    .bind(block.timestamp)
    .bind(&block.raw)
    .execute(&mut *conn)
    .await?;

    if let Some(proposer) = &write_set.proposer {
        crate::metrics::count_query("commit_block", "block_proposer");
        sqlx::query(
            "
            INSERT INTO block_proposer (block_height, proposer_address, min_gas_fee, block_timestamp)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (block_height)
            DO UPDATE SET proposer_address = EXCLUDED.proposer_address, min_gas_fee = EXCLUDED.min_gas_fee;
            ",
        )
        .bind(BigDecimal::from(proposer.height))
        .bind(&proposer.proposer_address)
        .bind(proposer.min_gas_fee)
        .bind(proposer.timestamp)
        .execute(&mut *conn)
        .await?;
    }

    if let Some(validator_set) = &write_set.validator_set {
        crate::metrics::count_query("commit_block", "validators_cache");
        sqlx::query(
            "
            INSERT INTO validators_cache (height, validators)
            VALUES ($1, $2)
            ON CONFLICT DO NOTHING;
            ",
        )
        .bind(BigDecimal::from(validator_set.height))
        .bind(&validator_set.validators)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

async fn save_references(
    conn: &mut sqlx::PgConnection,
    write_set: &BlockWriteSet,
) -> anyhow::Result<()> {
    let references = &write_set.references;

    let msg_types = write_set.msg_types.values().collect::<Vec<_>>();
    crate::metrics::count_query("commit_block", "tx_msg_type");
    insert_rows(
        conn,
        "INSERT INTO tx_msg_type (type_url, msg_type, module) ",
        " ON CONFLICT (type_url) DO UPDATE SET msg_type = EXCLUDED.msg_type, module = EXCLUDED.module
          WHERE tx_msg_type.module = 'unknown' OR tx_msg_type.msg_type = 'unknown'",
        3,
        &msg_types,
        |mut values, msg_type| {
            values
                .push_bind(msg_type.type_url.clone())
                .push_bind(msg_type.msg_type.clone())
                .push_bind(msg_type.module.clone());
        },
    )
    .await?;

    let accounts = references.accounts.values().collect::<Vec<_>>();
    crate::metrics::count_query("commit_block", "account");
    insert_rows(
        conn,
        "INSERT INTO account (address, account_type, account_number, data, last_updated_height) ",
        " ON CONFLICT (address) DO UPDATE SET account_type = EXCLUDED.account_type,
          account_number = EXCLUDED.account_number, data = EXCLUDED.data,
          last_updated_height = EXCLUDED.last_updated_height
          WHERE account.last_updated_height <= EXCLUDED.last_updated_height",
        5,
        &accounts,
        |mut values, account| {
            values
                .push_bind(account.address.clone())
                .push_bind(account.account_type.clone())
                .push_bind(account.account_number.map(BigDecimal::from))
                .push_bind(account.data.clone())
                .push_bind(BigDecimal::from(account.height));
        },
    )
    .await?;

    let validators = references.validators.values().collect::<Vec<_>>();
    crate::metrics::count_query("commit_block", "staking_validator_cache");
    insert_rows(
        conn,
        "INSERT INTO staking_validator_cache (operator_address, consensus_pubkey, moniker, status, jailed, tokens, data, last_updated_height) ",
        " ON CONFLICT (operator_address) DO UPDATE SET consensus_pubkey = EXCLUDED.consensus_pubkey,
          moniker = EXCLUDED.moniker, status = EXCLUDED.status, jailed = EXCLUDED.jailed,
          tokens = EXCLUDED.tokens, data = EXCLUDED.data,
          last_updated_height = EXCLUDED.last_updated_height
          WHERE staking_validator_cache.last_updated_height <= EXCLUDED.last_updated_height",
        8,
        &validators,
        |mut values, validator| {
            values
                .push_bind(validator.operator_address.clone())
                .push_bind(validator.consensus_pubkey.clone())
                .push_bind(validator.moniker.clone())
                .push_bind(validator.status.clone())
                .push_bind(validator.jailed)
                .push_bind(validator.tokens.clone())
                .push_bind(validator.data.clone())
                .push_bind(BigDecimal::from(validator.height));
        },
    )
    .await?;

    let markers = references.markers.values().collect::<Vec<_>>();
    crate::metrics::count_query("commit_block", "marker_cache");
    insert_rows(
        conn,
        "INSERT INTO marker_cache (denom, marker_address, marker_type, status, supply, data, last_updated_height) ",
        " ON CONFLICT (denom) DO UPDATE SET marker_address = EXCLUDED.marker_address,
          marker_type = EXCLUDED.marker_type, status = EXCLUDED.status, supply = EXCLUDED.supply,
          data = EXCLUDED.data, last_updated_height = EXCLUDED.last_updated_height
          WHERE marker_cache.last_updated_height <= EXCLUDED.last_updated_height",
        7,
        &markers,
        |mut values, marker| {
            values
                .push_bind(marker.denom.clone())
                .push_bind(marker.marker_address.clone())
                .push_bind(marker.marker_type.clone())
                .push_bind(marker.status.clone())
                .push_bind(marker.supply.clone())
                .push_unseparated("::numeric")
                .push_bind(marker.data.clone())
                .push_bind(BigDecimal::from(marker.height));
        },
    )
    .await?;

    let channels = references.channels.values().collect::<Vec<_>>();
    crate::metrics::count_query("commit_block", "ibc_channel");
    insert_rows(
        conn,
        "INSERT INTO ibc_channel (port, channel, counterparty_port, counterparty_channel, state, connection, data) ",
        " ON CONFLICT (port, channel) DO UPDATE SET counterparty_port = EXCLUDED.counterparty_port,
          counterparty_channel = EXCLUDED.counterparty_channel, state = EXCLUDED.state,
          connection = EXCLUDED.connection, data = EXCLUDED.data",
        7,
        &channels,
        |mut values, channel| {
            values
                .push_bind(channel.key.port.clone())
                .push_bind(channel.key.channel.clone())
                .push_bind(channel.counterparty.as_ref().map(|key| key.port.clone()))
                .push_bind(channel.counterparty.as_ref().map(|key| key.channel.clone()))
                .push_bind(channel.state.clone())
                .push_bind(channel.connection.clone())
                .push_bind(channel.data.clone());
        },
    )
    .await?;

    let sm_codes = references.sm_codes.values().collect::<Vec<_>>();
    crate::metrics::count_query("commit_block", "sm_code");
    insert_rows(
        conn,
        "INSERT INTO sm_code (code_id, creator, data_hash, data, last_updated_height) ",
        " ON CONFLICT (code_id) DO UPDATE SET creator = EXCLUDED.creator,
          data_hash = EXCLUDED.data_hash, data = EXCLUDED.data,
          last_updated_height = EXCLUDED.last_updated_height
          WHERE sm_code.last_updated_height <= EXCLUDED.last_updated_height",
        5,
        &sm_codes,
        |mut values, code| {
            values
                .push_bind(BigDecimal::from(code.code_id))
                .push_bind(code.creator.clone())
                .push_bind(code.data_hash.clone())
                .push_bind(code.data.clone())
                .push_bind(BigDecimal::from(code.height));
        },
    )
    .await?;

    let sm_contracts = references.sm_contracts.values().collect::<Vec<_>>();
    crate::metrics::count_query("commit_block", "sm_contract");
    insert_rows(
        conn,
        "INSERT INTO sm_contract (contract_address, code_id, creator, admin, label, data, last_updated_height) ",
        " ON CONFLICT (contract_address) DO UPDATE SET code_id = EXCLUDED.code_id,
          creator = EXCLUDED.creator, admin = EXCLUDED.admin, label = EXCLUDED.label,
          data = EXCLUDED.data, last_updated_height = EXCLUDED.last_updated_height
          WHERE sm_contract.last_updated_height <= EXCLUDED.last_updated_height",
        7,
        &sm_contracts,
        |mut values, contract| {
            values
                .push_bind(contract.contract_address.clone())
                .push_bind(contract.code_id.map(BigDecimal::from))
                .push_bind(contract.creator.clone())
                .push_bind(contract.admin.clone())
                .push_bind(contract.label.clone())
                .push_bind(contract.data.clone())
                .push_bind(BigDecimal::from(contract.height));
        },
    )
    .await?;
    Ok(())
}

/// Inserts the `tx_cache` rows and returns the hashes that were not stored before
async fn save_transactions(
    conn: &mut sqlx::PgConnection,
    write_set: &BlockWriteSet,
) -> anyhow::Result<HashSet<String>> {
    let height = write_set.height();
    if write_set.replace_existing {
        let hashes = write_set
            .transactions
            .iter()
            .map(|tx| tx.hash().to_string())
            .collect::<Vec<_>>();
        tracing::debug!(
            target: DATABASE,
            "Replacing {} stored transaction(s) at height {}",
            hashes.len(),
            height
        );
        crate::metrics::count_query("commit_block", "tx_processing_failure");
        sqlx::query("DELETE FROM tx_processing_failure WHERE block_height = $1 AND tx_hash = ANY($2);")
            .bind(BigDecimal::from(height))
            .bind(&hashes)
            .execute(&mut *conn)
            .await?;
        crate::metrics::count_query("commit_block", "tx_cache");
        sqlx::query("DELETE FROM tx_cache WHERE hash = ANY($1);")
            .bind(&hashes)
            .execute(&mut *conn)
            .await?;
    }

    let mut inserted = HashSet::new();
    let indexed = write_set.transactions.iter().enumerate().collect::<Vec<_>>();
    for chunk in indexed.chunks(BIND_LIMIT / 9) {
        crate::metrics::count_query("commit_block", "tx_cache");
        let mut query_builder: sqlx::QueryBuilder<sqlx::Postgres> = sqlx::QueryBuilder::new(
            "INSERT INTO tx_cache (hash, height, block_tx_index, tx_timestamp, code, codespace, gas_wanted, gas_used, tx_v2) ",
        );
        query_builder.push_values(chunk.iter(), |mut values, (index, tx)| {
            values
                .push_bind(tx.tx.hash.clone())
                .push_bind(BigDecimal::from(tx.tx.height))
                .push_bind(*index as i32)
                .push_bind(tx.tx.timestamp)
                .push_bind(tx.tx.code as i32)
                .push_bind(tx.tx.codespace.clone())
                .push_bind(BigDecimal::from(tx.tx.gas_wanted))
                .push_bind(BigDecimal::from(tx.tx.gas_used))
                .push_bind(tx.tx.raw.clone());
        });
        query_builder.push(" ON CONFLICT (hash) DO NOTHING RETURNING hash");
        let rows: Vec<(String,)> = query_builder
            .build_query_as()
            .fetch_all(&mut *conn)
            .await?;
        inserted.extend(rows.into_iter().map(|(hash,)| hash));
    }
    Ok(inserted)
}

async fn save_tx_joins(conn: &mut sqlx::PgConnection, txs: &[&TxWriteSet]) -> anyhow::Result<()> {
    let messages = txs
        .iter()
        .flat_map(|tx| tx.messages.iter().map(move |msg| (tx.hash(), msg)))
        .collect::<Vec<_>>();
    crate::metrics::count_query("commit_block", "tx_message");
    insert_rows(
        conn,
        "INSERT INTO tx_message (tx_hash, msg_idx, type_url, msg_type, module, msg) ",
        " ON CONFLICT DO NOTHING",
        6,
        &messages,
        |mut values, (hash, msg)| {
            values
                .push_bind(hash.to_string())
                .push_bind(msg.msg_idx as i32)
                .push_bind(msg.type_url.clone())
                .push_bind(msg.msg_type.clone())
                .push_bind(msg.module.clone())
                .push_bind(msg.raw.clone());
        },
    )
    .await?;

    let events = txs
        .iter()
        .flat_map(|tx| tx.events.iter().map(move |event| (tx.hash(), event)))
        .collect::<Vec<_>>();
    crate::metrics::count_query("commit_block", "tx_msg_event");
    insert_rows(
        conn,
        "INSERT INTO tx_msg_event (tx_hash, event_idx, msg_idx, event_type, attributes) ",
        " ON CONFLICT DO NOTHING",
        5,
        &events,
        |mut values, (hash, event)| {
            values
                .push_bind(hash.to_string())
                .push_bind(event.event_idx as i32)
                .push_bind(event.msg_idx.map(|idx| idx as i32))
                .push_bind(event.event_type.clone())
                .push_bind(event.attributes.clone());
        },
    )
    .await?;

    let fees = txs
        .iter()
        .flat_map(|tx| tx.fees.iter().map(move |fee| (tx.hash(), fee)))
        .collect::<Vec<_>>();
    crate::metrics::count_query("commit_block", "tx_fee");
    insert_rows(
        conn,
        "INSERT INTO tx_fee (tx_hash, denom, amount) ",
        " ON CONFLICT DO NOTHING",
        3,
        &fees,
        |mut values, (hash, fee)| {
            values
                .push_bind(hash.to_string())
                .push_bind(fee.denom.clone())
                .push_bind(fee.amount.clone())
                .push_unseparated("::numeric");
        },
    )
    .await?;

    let fee_payers = txs
        .iter()
        .flat_map(|tx| tx.fee_payers.iter().map(move |payer| (tx.hash(), payer)))
        .collect::<Vec<_>>();
    crate::metrics::count_query("commit_block", "tx_fee_payer");
    insert_rows(
        conn,
        "INSERT INTO tx_fee_payer (tx_hash, payer_type, address) ",
        " ON CONFLICT DO NOTHING",
        3,
        &fee_payers,
        |mut values, (hash, payer)| {
            values
                .push_bind(hash.to_string())
                .push_bind(payer.payer_type.as_str())
                .push_bind(payer.address.clone());
        },
    )
    .await?;

    let addresses = txs
        .iter()
        .flat_map(|tx| tx.addresses.iter().map(move |address| (tx.hash(), address)))
        .collect::<Vec<_>>();
    crate::metrics::count_query("commit_block", "tx_address_join");
    insert_rows(
        conn,
        "INSERT INTO tx_address_join (tx_hash, address, address_type) ",
        " ON CONFLICT DO NOTHING",
        3,
        &addresses,
        |mut values, (hash, address)| {
            values
                .push_bind(hash.to_string())
                .push_bind(address.address.clone())
                .push_bind(address.address_type.as_str());
        },
    )
    .await?;

    let markers = txs
        .iter()
        .flat_map(|tx| tx.markers.iter().map(move |denom| (tx.hash(), denom)))
        .collect::<Vec<_>>();
    crate::metrics::count_query("commit_block", "tx_marker_join");
    insert_rows(
        conn,
        "INSERT INTO tx_marker_join (tx_hash, denom) ",
        " ON CONFLICT DO NOTHING",
        2,
        &markers,
        |mut values, (hash, denom)| {
            values.push_bind(hash.to_string()).push_bind(denom.to_string());
        },
    )
    .await?;

    let nfts = txs
        .iter()
        .flat_map(|tx| tx.nfts.iter().map(move |address| (tx.hash(), address)))
        .collect::<Vec<_>>();
    crate::metrics::count_query("commit_block", "tx_nft_join");
    insert_rows(
        conn,
        "INSERT INTO tx_nft_join (tx_hash, metadata_address) ",
        " ON CONFLICT DO NOTHING",
        2,
        &nfts,
        |mut values, (hash, address)| {
            values.push_bind(hash.to_string()).push_bind(address.to_string());
        },
    )
    .await?;

    let sm_codes = txs
        .iter()
        .flat_map(|tx| tx.sm_codes.iter().map(move |code_id| (tx.hash(), *code_id)))
        .collect::<Vec<_>>();
    crate::metrics::count_query("commit_block", "tx_sm_code");
    insert_rows(
        conn,
        "INSERT INTO tx_sm_code (tx_hash, code_id) ",
        " ON CONFLICT DO NOTHING",
        2,
        &sm_codes,
        |mut values, (hash, code_id)| {
            values
                .push_bind(hash.to_string())
                .push_bind(BigDecimal::from(*code_id));
        },
    )
    .await?;

    let sm_contracts = txs
        .iter()
        .flat_map(|tx| tx.sm_contracts.iter().map(move |address| (tx.hash(), address)))
        .collect::<Vec<_>>();
    crate::metrics::count_query("commit_block", "tx_sm_contract");
    insert_rows(
        conn,
        "INSERT INTO tx_sm_contract (tx_hash, contract_address) ",
        " ON CONFLICT DO NOTHING",
        2,
        &sm_contracts,
        |mut values, (hash, address)| {
            values.push_bind(hash.to_string()).push_bind(address.to_string());
        },
    )
    .await?;

    let channels = txs
        .iter()
        .flat_map(|tx| tx.ibc_channels.iter().map(move |channel| (tx.hash(), channel)))
        .collect::<Vec<_>>();
    crate::metrics::count_query("commit_block", "tx_ibc");
    insert_rows(
        conn,
        "INSERT INTO tx_ibc (tx_hash, port, channel) ",
        " ON CONFLICT DO NOTHING",
        3,
        &channels,
        |mut values, (hash, channel)| {
            values
                .push_bind(hash.to_string())
                .push_bind(channel.port.clone())
                .push_bind(channel.channel.clone());
        },
    )
    .await?;

    let signatures = txs
        .iter()
        .flat_map(|tx| tx.signatures.iter().map(move |signature| (tx.hash(), signature)))
        .collect::<Vec<_>>();
    crate::metrics::count_query("commit_block", "signature_join");
    insert_rows(
        conn,
        "INSERT INTO signature_join (tx_hash, pubkey, pubkey_type, address) ",
        " ON CONFLICT DO NOTHING",
        4,
        &signatures,
        |mut values, (hash, signature)| {
            values
                .push_bind(hash.to_string())
                .push_bind(signature.pubkey.clone())
                .push_bind(signature.pubkey_type.clone())
                .push_bind(signature.address.clone());
        },
    )
    .await?;
    Ok(())
}

async fn save_domain_rows(
    conn: &mut sqlx::PgConnection,
    height: BlockHeight,
    txs: &[&TxWriteSet],
) -> anyhow::Result<()> {
    // One row per key and statement, the last write of the block wins
    let mut scopes: BTreeMap<&str, &NftScopeRecord> = BTreeMap::new();
    let mut votes: BTreeMap<(u64, &str), &GovVoteRecord> = BTreeMap::new();
    for tx in txs {
        for (address, scope) in &tx.nft_scopes {
            scopes.insert(address.as_str(), scope);
        }
        for vote in &tx.gov_votes {
            votes.insert((vote.proposal_id, vote.voter.as_str()), vote);
        }
    }

    let scopes = scopes.into_values().collect::<Vec<_>>();
    crate::metrics::count_query("commit_block", "nft_scope");
    insert_rows(
        conn,
        "INSERT INTO nft_scope (address, deleted, last_updated_height) ",
        " ON CONFLICT (address) DO UPDATE SET deleted = EXCLUDED.deleted,
          last_updated_height = EXCLUDED.last_updated_height
          WHERE nft_scope.last_updated_height <= EXCLUDED.last_updated_height",
        3,
        &scopes,
        |mut values, scope| {
            values
                .push_bind(scope.address.clone())
                .push_bind(scope.deleted)
                .push_bind(BigDecimal::from(scope.height));
        },
    )
    .await?;

    let proposals = txs
        .iter()
        .flat_map(|tx| tx.gov_proposals.iter())
        .collect::<Vec<_>>();
    crate::metrics::count_query("commit_block", "gov_proposal");
    insert_rows(
        conn,
        "INSERT INTO gov_proposal (proposal_id, proposal_type, title, description, status, proposer, data, block_height, tx_hash, tx_timestamp) ",
        " ON CONFLICT DO NOTHING",
        10,
        &proposals,
        |mut values, proposal| {
            values
                .push_bind(BigDecimal::from(proposal.proposal_id))
                .push_bind(proposal.proposal_type.clone())
                .push_bind(proposal.title.clone())
                .push_bind(proposal.description.clone())
                .push_bind(proposal.status.clone())
                .push_bind(proposal.proposer.clone())
                .push_bind(proposal.data.clone())
                .push_bind(BigDecimal::from(proposal.height))
                .push_bind(proposal.tx_hash.clone())
                .push_bind(proposal.timestamp);
        },
    )
    .await?;

    let votes = votes
        .into_values()
        .map(|vote| Ok((vote, serde_json::to_value(&vote.options)?)))
        .collect::<anyhow::Result<Vec<_>>>()?;
    crate::metrics::count_query("commit_block", "gov_vote");
    insert_rows(
        conn,
        "INSERT INTO gov_vote (proposal_id, voter, options, is_weighted, block_height, tx_hash, tx_timestamp) ",
        " ON CONFLICT (proposal_id, voter) DO UPDATE SET options = EXCLUDED.options,
          is_weighted = EXCLUDED.is_weighted, block_height = EXCLUDED.block_height,
          tx_hash = EXCLUDED.tx_hash, tx_timestamp = EXCLUDED.tx_timestamp
          WHERE gov_vote.block_height <= EXCLUDED.block_height",
        7,
        &votes,
        |mut values, (vote, options)| {
            values
                .push_bind(BigDecimal::from(vote.proposal_id))
                .push_bind(vote.voter.clone())
                .push_bind(options.clone())
                .push_bind(vote.is_weighted)
                .push_bind(BigDecimal::from(vote.height))
                .push_bind(vote.tx_hash.clone())
                .push_bind(vote.timestamp);
        },
    )
    .await?;

    let deposits = txs
        .iter()
        .flat_map(|tx| tx.gov_deposits.iter())
        .collect::<Vec<_>>();
    crate::metrics::count_query("commit_block", "gov_deposit");
    insert_rows(
        conn,
        "INSERT INTO gov_deposit (proposal_id, depositor, deposit_type, denom, amount, block_height, tx_hash, tx_timestamp) ",
        " ON CONFLICT DO NOTHING",
        8,
        &deposits,
        |mut values, deposit| {
            values
                .push_bind(BigDecimal::from(deposit.proposal_id))
                .push_bind(deposit.depositor.clone())
                .push_bind(deposit.deposit_type.as_str())
                .push_bind(deposit.denom.clone())
                .push_bind(deposit.amount.clone())
                .push_unseparated("::numeric")
                .push_bind(BigDecimal::from(deposit.height))
                .push_bind(deposit.tx_hash.clone())
                .push_bind(deposit.timestamp);
        },
    )
    .await?;

    let ledgers = txs
        .iter()
        .flat_map(|tx| tx.ibc_ledgers.iter())
        .collect::<Vec<_>>();
    crate::metrics::count_query("commit_block", "ibc_ledger");
    insert_rows(
        conn,
        "INSERT INTO ibc_ledger (ledger_key, port, channel, sequence, movement, denom, amount, from_address, to_address, tx_hash, block_height, tx_timestamp) ",
        " ON CONFLICT DO NOTHING",
        12,
        &ledgers,
        |mut values, ledger| {
            values
                .push_bind(ledger.ledger_key.clone())
                .push_bind(ledger.channel.port.clone())
                .push_bind(ledger.channel.channel.clone())
                .push_bind(BigDecimal::from(ledger.sequence))
                .push_bind(ledger.movement.as_str())
                .push_bind(ledger.denom.clone())
                .push_bind(ledger.amount.clone())
                .push_bind(ledger.from_address.clone())
                .push_bind(ledger.to_address.clone())
                .push_bind(ledger.tx_hash.clone())
                .push_bind(BigDecimal::from(ledger.height))
                .push_bind(ledger.timestamp);
        },
    )
    .await?;

    for intent in txs.iter().flat_map(|tx| tx.names.iter()) {
        let name = &intent.name;
        crate::metrics::count_query("commit_block", "name");
        match intent.action {
            NameAction::Bind => {
                sqlx::query(
                    "
                    INSERT INTO name (full_name, owner, child, parent, restricted, height_added)
                    VALUES ($1, $2, $3, $4, $5, $6)
                    ON CONFLICT (full_name, owner)
                    DO UPDATE SET restricted = EXCLUDED.restricted, height_added = EXCLUDED.height_added
                    WHERE name.height_added <= EXCLUDED.height_added;
                    ",
                )
                .bind(&name.full_name)
                .bind(&name.owner)
                .bind(&name.child)
                .bind(&name.parent)
                .bind(name.restricted)
                .bind(BigDecimal::from(name.height))
                .execute(&mut *conn)
                .await?;
            }
            NameAction::Unbind => {
                sqlx::query("DELETE FROM name WHERE full_name = $1 AND height_added <= $2;")
                    .bind(&name.full_name)
                    .bind(BigDecimal::from(name.height))
                    .execute(&mut *conn)
                    .await?;
            }
        }
    }

    let failures = txs
        .iter()
        .flat_map(|tx| tx.failures.iter().map(move |failure| (tx.hash(), failure)))
        .collect::<Vec<_>>();
    crate::metrics::count_query("commit_block", "tx_processing_failure");
    insert_rows(
        conn,
        "INSERT INTO tx_processing_failure (block_height, tx_hash, process_type, error_message) ",
        " ON CONFLICT (block_height, tx_hash, process_type) DO UPDATE SET error_message = EXCLUDED.error_message",
        4,
        &failures,
        |mut values, (hash, failure)| {
            values
                .push_bind(BigDecimal::from(height))
                .push_bind(hash.to_string())
                .push_bind(failure.process_type.clone())
                .push_bind(failure.error_message.clone());
        },
    )
    .await?;
    Ok(())
}

const PENDING_COLUMNS: &str = "ledger_key, ack_type, tx_hash, block_height, success";

async fn pending_links_for_keys(
    conn: &mut sqlx::PgConnection,
    ledger_keys: &[String],
) -> anyhow::Result<Vec<IbcLinkRecord>> {
    crate::metrics::count_query("pending_links_for_keys", "ibc_pending");
    let rows: Vec<LinkRow> = sqlx::query_as(&format!(
        "SELECT {PENDING_COLUMNS} FROM ibc_pending WHERE ledger_key = ANY($1) ORDER BY block_height;"
    ))
    .bind(ledger_keys)
    .fetch_all(&mut *conn)
    .await?;
    models::convert_rows(rows)
}

async fn pending_links_at_height(
    conn: &mut sqlx::PgConnection,
    height: BlockHeight,
) -> anyhow::Result<Vec<IbcLinkRecord>> {
    crate::metrics::count_query("pending_links_at_height", "ibc_pending");
    let rows: Vec<LinkRow> = sqlx::query_as(&format!(
        "SELECT {PENDING_COLUMNS} FROM ibc_pending WHERE block_height = $1;"
    ))
    .bind(BigDecimal::from(height))
    .fetch_all(&mut *conn)
    .await?;
    models::convert_rows(rows)
}

impl crate::PostgresDBManager {
    async fn commit_in(
        &self,
        conn: &mut sqlx::PgConnection,
        write_set: &BlockWriteSet,
        advance: WatermarkAdvance,
    ) -> anyhow::Result<CommitSummary> {
        let mut summary = CommitSummary::default();
        save_block(conn, write_set).await?;
        save_references(conn, write_set).await?;

        let inserted = save_transactions(conn, write_set).await?;
        let new_txs = write_set
            .transactions
            .iter()
            .filter(|tx| inserted.contains(tx.hash()))
            .collect::<Vec<_>>();
        summary.transactions = new_txs.len();
        save_tx_joins(conn, &new_txs).await?;
        save_domain_rows(conn, write_set.height(), &new_txs).await?;

        for link in write_set
            .transactions
            .iter()
            .flat_map(|tx| tx.ibc_links.iter())
        {
            if !link_ibc_in(conn, link).await? {
                summary.pending_ibc += 1;
            }
        }

        let new_ledger_keys = write_set
            .transactions
            .iter()
            .flat_map(|tx| tx.ibc_ledgers.iter())
            .map(|ledger| ledger.ledger_key.clone())
            .collect::<Vec<_>>();
        if !new_ledger_keys.is_empty() {
            for link in pending_links_for_keys(conn, &new_ledger_keys).await? {
                if link_ibc_in(conn, &link).await? {
                    summary.resolved_ibc += 1;
                }
            }
        }

        refresh_proposals_in(
            conn,
            &write_set
                .references
                .proposal_refreshes
                .values()
                .collect::<Vec<_>>(),
        )
        .await?;

        if summary.pending_ibc > 0 || !write_set.non_blocking_failures.is_empty() {
            let mut reasons = write_set.non_blocking_failures.clone();
            if summary.pending_ibc > 0 {
                reasons.push(format!(
                    "{} IBC item(s) waiting for their ledger record",
                    summary.pending_ibc
                ));
            }
            record_retry_in(conn, write_set.height(), true, &reasons.join("; ")).await?;
        }

        advance_in(conn, advance).await?;
        Ok(summary)
    }
}

#[async_trait::async_trait]
impl crate::IndexerDbManager for crate::PostgresDBManager {
    async fn commit_block(
        &self,
        write_set: &BlockWriteSet,
        advance: WatermarkAdvance,
    ) -> anyhow::Result<CommitSummary> {
        let _timer = crate::metrics::BLOCK_COMMIT_SECONDS
            .with_label_values(&["postgres"])
            .start_timer();
        let mut transaction = self.pool.begin().await?;
        match self.commit_in(&mut transaction, write_set, advance).await {
            Ok(summary) => {
                transaction.commit().await?;
                Ok(summary)
            }
            Err(err) => {
                tracing::warn!(
                    target: DATABASE,
                    "Rolling back commit of block {}: {:#}",
                    write_set.height(),
                    err
                );
                crate::metrics::BLOCK_COMMIT_ROLLBACKS
                    .with_label_values(&["postgres"])
                    .inc();
                transaction.rollback().await?;
                Err(err)
            }
        }
    }

    async fn advance_watermark(&self, advance: WatermarkAdvance) -> anyhow::Result<()> {
        let mut conn = self.pool.acquire().await?;
        advance_in(&mut conn, advance).await
    }

    async fn get_watermark(&self) -> anyhow::Result<Watermark> {
        crate::metrics::count_query("get_watermark", "block_index");
        let row: Option<WatermarkRow> = sqlx::query_as(
            "
            SELECT max_height_read, min_height_read, last_update
            FROM block_index
            WHERE id = 1;
            ",
        )
        .fetch_optional(&self.pool)
        .await?;
        row.map(Watermark::try_from)
            .transpose()
            .map(Option::unwrap_or_default)
    }

    async fn init_watermark(&self, max_height: BlockHeight) -> anyhow::Result<Watermark> {
        crate::metrics::count_query("init_watermark", "block_index");
        let row: WatermarkRow = sqlx::query_as(
            "
            INSERT INTO block_index (id, max_height_read, last_update)
            VALUES (1, $1, now())
            ON CONFLICT (id)
            DO UPDATE SET max_height_read = COALESCE(block_index.max_height_read, EXCLUDED.max_height_read)
            RETURNING max_height_read, min_height_read, last_update;
            ",
        )
        .bind(BigDecimal::from(max_height))
        .fetch_one(&self.pool)
        .await?;
        Watermark::try_from(row)
    }

    async fn block_exists(&self, height: BlockHeight) -> anyhow::Result<bool> {
        crate::metrics::count_query("block_exists", "block_cache");
        let (exists,): (bool,) =
            sqlx::query_as("SELECT EXISTS (SELECT 1 FROM block_cache WHERE height = $1);")
                .bind(BigDecimal::from(height))
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }

    async fn block_timestamp(&self, height: BlockHeight) -> anyhow::Result<Option<Timestamp>> {
        crate::metrics::count_query("block_timestamp", "block_cache");
        let row: Option<(Timestamp,)> =
            sqlx::query_as("SELECT block_timestamp FROM block_cache WHERE height = $1;")
                .bind(BigDecimal::from(height))
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(timestamp,)| timestamp))
    }

    async fn tx_count_at_height(&self, height: BlockHeight) -> anyhow::Result<u64> {
        crate::metrics::count_query("tx_count_at_height", "tx_cache");
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM tx_cache WHERE height = $1;")
            .bind(BigDecimal::from(height))
            .fetch_one(&self.pool)
            .await?;
        Ok(u64::try_from(count)?)
    }

    async fn stored_tx_responses(
        &self,
        height: BlockHeight,
    ) -> anyhow::Result<Vec<serde_json::Value>> {
        crate::metrics::count_query("stored_tx_responses", "tx_cache");
        let rows: Vec<(serde_json::Value,)> = sqlx::query_as(
            "SELECT tx_v2 FROM tx_cache WHERE height = $1 ORDER BY block_tx_index;",
        )
        .bind(BigDecimal::from(height))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(tx,)| tx).collect())
    }

    async fn days_between_heights(
        &self,
        min_height: BlockHeight,
        max_height: BlockHeight,
    ) -> anyhow::Result<u64> {
        crate::metrics::count_query("days_between_heights", "block_cache");
        let (days,): (i64,) = sqlx::query_as(
            "
            SELECT COUNT(DISTINCT (block_timestamp AT TIME ZONE 'UTC')::date)
            FROM block_cache
            WHERE height BETWEEN $1 AND $2;
            ",
        )
        .bind(BigDecimal::from(min_height))
        .bind(BigDecimal::from(max_height))
        .fetch_one(&self.pool)
        .await?;
        Ok(u64::try_from(days)?)
    }

    async fn existing_references(
        &self,
        kind: ReferenceKind,
        keys: &[String],
    ) -> anyhow::Result<HashSet<String>> {
        if keys.is_empty() {
            return Ok(HashSet::new());
        }
        let (key_expr, table) = match kind {
            ReferenceKind::Account => ("address", "account"),
            ReferenceKind::Validator => ("operator_address", "staking_validator_cache"),
            ReferenceKind::Marker => ("denom", "marker_cache"),
            ReferenceKind::SmCode => ("code_id::text", "sm_code"),
            ReferenceKind::SmContract => ("contract_address", "sm_contract"),
            ReferenceKind::IbcChannel => ("port || '/' || channel", "ibc_channel"),
        };
        crate::metrics::count_query("existing_references", table);
        let rows: Vec<(String,)> = sqlx::query_as(&format!(
            "SELECT {key_expr} FROM {table} WHERE {key_expr} = ANY($1);"
        ))
        .bind(keys)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(key,)| key).collect())
    }

    async fn non_final_proposals(&self) -> anyhow::Result<Vec<u64>> {
        crate::metrics::count_query("non_final_proposals", "gov_proposal");
        let rows: Vec<(BigDecimal,)> = sqlx::query_as(
            "SELECT proposal_id FROM gov_proposal WHERE status <> ALL($1) ORDER BY proposal_id;",
        )
        .bind(FINAL_PROPOSAL_STATUSES.to_vec())
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|(proposal_id,)| models::to_u64(proposal_id, "proposal_id"))
            .collect()
    }

    async fn refresh_proposals(&self, refreshes: &[GovProposalRefresh]) -> anyhow::Result<()> {
        let mut conn = self.pool.acquire().await?;
        refresh_proposals_in(&mut conn, &refreshes.iter().collect::<Vec<_>>()).await
    }

    async fn record_retry(
        &self,
        height: BlockHeight,
        non_blocking: bool,
        error: &str,
    ) -> anyhow::Result<()> {
        let mut conn = self.pool.acquire().await?;
        record_retry_in(&mut conn, height, non_blocking, error).await
    }

    async fn retry_entries(&self, limit: u64) -> anyhow::Result<Vec<RetryEntry>> {
        crate::metrics::count_query("retry_entries", "block_tx_retry");
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

    async fn mark_retry_processing(
        &self,
        height: BlockHeight,
        non_blocking: bool,
    ) -> anyhow::Result<()> {
        crate::metrics::count_query("mark_retry_processing", "block_tx_retry");
        sqlx::query(
            "
            UPDATE block_tx_retry
            SET state = 'PROCESSING', last_attempt = now()
            WHERE height = $1 AND non_blocking = $2;
            ",
        )
        .bind(BigDecimal::from(height))
        .bind(non_blocking)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_retry(&self, height: BlockHeight, non_blocking: bool) -> anyhow::Result<()> {
        crate::metrics::count_query("delete_retry", "block_tx_retry");
        sqlx::query("DELETE FROM block_tx_retry WHERE height = $1 AND non_blocking = $2;")
            .bind(BigDecimal::from(height))
            .bind(non_blocking)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn retry_queue_depth(&self) -> anyhow::Result<u64> {
        crate::metrics::count_query("retry_queue_depth", "block_tx_retry");
        let (depth,): (i64,) = sqlx::query_as("SELECT count(*) FROM block_tx_retry;")
            .fetch_one(&self.pool)
            .await?;
        Ok(u64::try_from(depth)?)
    }

    async fn resolve_pending_ibc(&self, height: BlockHeight) -> anyhow::Result<PendingResolution> {
        crate::metrics::count_query("resolve_pending_ibc", "ibc_pending");
        let mut transaction = self.pool.begin().await?;
        let mut resolution = PendingResolution::default();
        for link in pending_links_at_height(&mut transaction, height).await? {
            if link_ibc_in(&mut transaction, &link).await? {
                resolution.resolved += 1;
            } else {
                resolution.remaining += 1;
            }
        }
        transaction.commit().await?;
        Ok(resolution)
    }
}
