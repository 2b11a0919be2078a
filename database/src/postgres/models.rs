//! Row shapes read back from PostgreSQL and their conversion into index records.

use std::str::FromStr;

use bigdecimal::{BigDecimal, ToPrimitive};
use explorer_primitives::{
    AccountRecord, AddressJoin, AddressType, BlockRecord, CacheMetadata, FeePayerRecord,
    FeePayerType, GovProposalRecord, GovVoteRecord, IbcAckType, IbcChannelKey, IbcLedgerRecord,
    IbcLinkRecord, IbcMovement, NameRecord, RetryEntry, RetryState, SignatureJoin, Timestamp,
    TxFeeRecord, TxMessageRecord, TxRecord, Watermark,
};

pub(crate) fn to_u64(value: &BigDecimal, column: &str) -> anyhow::Result<u64> {
    value
        .to_u64()
        .ok_or_else(|| anyhow::anyhow!("Failed to parse `{}` to u64", column))
}

fn to_optional_u64(value: Option<BigDecimal>, column: &str) -> anyhow::Result<Option<u64>> {
    value.map(|value| to_u64(&value, column)).transpose()
}

#[derive(sqlx::FromRow)]
pub(crate) struct BlockRow {
    pub height: BigDecimal,
    pub hash: String,
    pub tx_count: i32,
    pub block_timestamp: Timestamp,
    pub block: serde_json::Value,
    pub last_hit: Option<Timestamp>,
    pub hit_count: i64,
}

impl TryFrom<BlockRow> for (BlockRecord, CacheMetadata) {
    type Error = anyhow::Error;

    fn try_from(row: BlockRow) -> Result<Self, Self::Error> {
        Ok((
            BlockRecord {
                height: to_u64(&row.height, "height")?,
                hash: row.hash,
                timestamp: row.block_timestamp,
                tx_count: u32::try_from(row.tx_count)?,
                raw: row.block,
            },
            CacheMetadata {
                last_hit: row.last_hit,
                hit_count: u64::try_from(row.hit_count)?,
            },
        ))
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct WatermarkRow {
    pub max_height_read: Option<BigDecimal>,
    pub min_height_read: Option<BigDecimal>,
    pub last_update: Timestamp,
}

impl TryFrom<WatermarkRow> for Watermark {
    type Error = anyhow::Error;

    fn try_from(row: WatermarkRow) -> Result<Self, Self::Error> {
        Ok(Watermark {
            max_height_read: to_optional_u64(row.max_height_read, "max_height_read")?,
            min_height_read: to_optional_u64(row.min_height_read, "min_height_read")?,
            last_update: Some(row.last_update),
        })
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct RetryRow {
    pub height: BigDecimal,
    pub non_blocking: bool,
    pub state: String,
    pub retry_count: i32,
    pub last_error: String,
    pub last_attempt: Timestamp,
}

impl TryFrom<RetryRow> for RetryEntry {
    type Error = anyhow::Error;

    fn try_from(row: RetryRow) -> Result<Self, Self::Error> {
        Ok(RetryEntry {
            height: to_u64(&row.height, "height")?,
            non_blocking: row.non_blocking,
            state: RetryState::from_str(&row.state)?,
            retry_count: u32::try_from(row.retry_count)?,
            last_error: row.last_error,
            last_attempt: row.last_attempt,
        })
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct TxRow {
    pub hash: String,
    pub height: BigDecimal,
    pub tx_timestamp: Timestamp,
    pub code: i32,
    pub codespace: String,
    pub gas_wanted: BigDecimal,
    pub gas_used: BigDecimal,
    pub tx_v2: serde_json::Value,
}

impl TryFrom<TxRow> for TxRecord {
    type Error = anyhow::Error;

    fn try_from(row: TxRow) -> Result<Self, Self::Error> {
        Ok(TxRecord {
            hash: row.hash,
            height: to_u64(&row.height, "height")?,
            timestamp: row.tx_timestamp,
            code: u32::try_from(row.code)?,
            codespace: row.codespace,
            gas_wanted: to_u64(&row.gas_wanted, "gas_wanted")?,
            gas_used: to_u64(&row.gas_used, "gas_used")?,
            raw: row.tx_v2,
        })
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct TxMessageRow {
    pub msg_idx: i32,
    pub type_url: String,
    pub msg_type: String,
    pub module: String,
    pub msg: serde_json::Value,
}

impl TryFrom<TxMessageRow> for TxMessageRecord {
    type Error = anyhow::Error;

    fn try_from(row: TxMessageRow) -> Result<Self, Self::Error> {
        Ok(TxMessageRecord {
            msg_idx: u32::try_from(row.msg_idx)?,
            type_url: row.type_url,
            msg_type: row.msg_type,
            module: row.module,
            raw: row.msg,
        })
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct TxFeeRow {
    pub denom: String,
    pub amount: BigDecimal,
}

impl From<TxFeeRow> for TxFeeRecord {
    fn from(row: TxFeeRow) -> Self {
        TxFeeRecord {
            denom: row.denom,
            amount: row.amount.with_scale(0).to_string(),
        }
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct FeePayerRow {
    pub payer_type: String,
    pub address: String,
}

impl TryFrom<FeePayerRow> for FeePayerRecord {
    type Error = anyhow::Error;

    fn try_from(row: FeePayerRow) -> Result<Self, Self::Error> {
        Ok(FeePayerRecord {
            payer_type: FeePayerType::from_str(&row.payer_type)?,
            address: row.address,
        })
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct AddressRow {
    pub address: String,
    pub address_type: String,
}

impl TryFrom<AddressRow> for AddressJoin {
    type Error = anyhow::Error;

    fn try_from(row: AddressRow) -> Result<Self, Self::Error> {
        Ok(AddressJoin {
            address: row.address,
            address_type: AddressType::from_str(&row.address_type)?,
        })
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct SignatureRow {
    pub pubkey: String,
    pub pubkey_type: String,
    pub address: Option<String>,
}

impl From<SignatureRow> for SignatureJoin {
    fn from(row: SignatureRow) -> Self {
        SignatureJoin {
            pubkey: row.pubkey,
            pubkey_type: row.pubkey_type,
            address: row.address,
        }
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct AccountRow {
    pub address: String,
    pub account_type: String,
    pub account_number: Option<BigDecimal>,
    pub data: Option<serde_json::Value>,
    pub last_updated_height: BigDecimal,
}

impl TryFrom<AccountRow> for AccountRecord {
    type Error = anyhow::Error;

    fn try_from(row: AccountRow) -> Result<Self, Self::Error> {
        Ok(AccountRecord {
            address: row.address,
            account_type: row.account_type,
            account_number: to_optional_u64(row.account_number, "account_number")?,
            data: row.data,
            height: to_u64(&row.last_updated_height, "last_updated_height")?,
        })
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct ProposalRow {
    pub proposal_id: BigDecimal,
    pub proposal_type: String,
    pub title: String,
    pub description: String,
    pub status: String,
    pub proposer: String,
    pub data: serde_json::Value,
    pub block_height: BigDecimal,
    pub tx_hash: String,
    pub tx_timestamp: Timestamp,
}

impl TryFrom<ProposalRow> for GovProposalRecord {
    type Error = anyhow::Error;

    fn try_from(row: ProposalRow) -> Result<Self, Self::Error> {
        Ok(GovProposalRecord {
            proposal_id: to_u64(&row.proposal_id, "proposal_id")?,
            proposal_type: row.proposal_type,
            title: row.title,
            description: row.description,
            status: row.status,
            proposer: row.proposer,
            data: row.data,
            height: to_u64(&row.block_height, "block_height")?,
            tx_hash: row.tx_hash,
            timestamp: row.tx_timestamp,
        })
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct VoteRow {
    pub proposal_id: BigDecimal,
    pub voter: String,
    pub options: serde_json::Value,
    pub is_weighted: bool,
    pub block_height: BigDecimal,
    pub tx_hash: String,
    pub tx_timestamp: Timestamp,
}

impl TryFrom<VoteRow> for GovVoteRecord {
    type Error = anyhow::Error;

    fn try_from(row: VoteRow) -> Result<Self, Self::Error> {
        Ok(GovVoteRecord {
            proposal_id: to_u64(&row.proposal_id, "proposal_id")?,
            voter: row.voter,
            options: serde_json::from_value(row.options)?,
            is_weighted: row.is_weighted,
            height: to_u64(&row.block_height, "block_height")?,
            tx_hash: row.tx_hash,
            timestamp: row.tx_timestamp,
        })
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct NameRow {
    pub full_name: String,
    pub owner: String,
    pub child: String,
    pub parent: Option<String>,
    pub restricted: bool,
    pub height_added: BigDecimal,
}

impl TryFrom<NameRow> for NameRecord {
    type Error = anyhow::Error;

    fn try_from(row: NameRow) -> Result<Self, Self::Error> {
        Ok(NameRecord {
            full_name: row.full_name,
            child: row.child,
            parent: row.parent,
            owner: row.owner,
            restricted: row.restricted,
            height: to_u64(&row.height_added, "height_added")?,
        })
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct LedgerRow {
    pub ledger_key: String,
    pub port: String,
    pub channel: String,
    pub sequence: BigDecimal,
    pub movement: String,
    pub denom: String,
    pub amount: String,
    pub from_address: String,
    pub to_address: String,
    pub tx_hash: String,
    pub block_height: BigDecimal,
    pub tx_timestamp: Timestamp,
    pub acknowledged: bool,
    pub ack_success: bool,
}

impl TryFrom<LedgerRow> for IbcLedgerRecord {
    type Error = anyhow::Error;

    fn try_from(row: LedgerRow) -> Result<Self, Self::Error> {
        let movement = match row.movement.as_str() {
            "IN" => IbcMovement::In,
            "OUT" => IbcMovement::Out,
            other => anyhow::bail!("Unknown IBC movement: {}", other),
        };
        Ok(IbcLedgerRecord {
            ledger_key: row.ledger_key,
            channel: IbcChannelKey::new(row.port, row.channel),
            sequence: to_u64(&row.sequence, "sequence")?,
            movement,
            denom: row.denom,
            amount: row.amount,
            from_address: row.from_address,
            to_address: row.to_address,
            tx_hash: row.tx_hash,
            height: to_u64(&row.block_height, "block_height")?,
            timestamp: row.tx_timestamp,
            acknowledged: row.acknowledged,
            ack_success: row.ack_success,
        })
    }
}

/// Shared by `ibc_ledger_ack` and `ibc_pending`
#[derive(sqlx::FromRow)]
pub(crate) struct LinkRow {
    pub ledger_key: String,
    pub ack_type: String,
    pub tx_hash: String,
    pub block_height: BigDecimal,
    pub success: bool,
}

impl TryFrom<LinkRow> for IbcLinkRecord {
    type Error = anyhow::Error;

    fn try_from(row: LinkRow) -> Result<Self, Self::Error> {
        Ok(IbcLinkRecord {
            ledger_key: row.ledger_key,
            ack_type: IbcAckType::from_str(&row.ack_type)?,
            tx_hash: row.tx_hash,
            height: to_u64(&row.block_height, "block_height")?,
            success: row.success,
        })
    }
}

pub(crate) fn convert_rows<R, T>(rows: Vec<R>) -> anyhow::Result<Vec<T>>
where
    T: TryFrom<R, Error = anyhow::Error>,
{
    rows.into_iter().map(T::try_from).collect()
}
