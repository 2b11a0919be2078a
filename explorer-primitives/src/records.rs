//! Rows of the relational index and the write-set value objects that carry them
//! from the indexing pipeline to a `commit_block` call.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::chain::BlockHeight;

pub type Timestamp = chrono::DateTime<chrono::Utc>;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct BlockRecord {
    pub height: BlockHeight,
    pub hash: String,
    pub timestamp: Timestamp,
    pub tx_count: u32,
    pub raw: serde_json::Value,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct BlockProposerRecord {
    pub height: BlockHeight,
    pub proposer_address: String,
    /// Σ first fee coin / Σ gas wanted over the block, absent for blocks without gas
    pub min_gas_fee: Option<f64>,
    pub timestamp: Timestamp,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ValidatorSetRecord {
    pub height: BlockHeight,
    pub validators: serde_json::Value,
}

/// Read-through cache bookkeeping shared by blocks, validator sets and validator snapshots
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct CacheMetadata {
    pub last_hit: Option<Timestamp>,
    pub hit_count: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TxRecord {
    pub hash: String,
    pub height: BlockHeight,
    pub timestamp: Timestamp,
    pub code: u32,
    pub codespace: String,
    pub gas_wanted: u64,
    pub gas_used: u64,
    /// Full `TxResponse` as returned by the node
    pub raw: serde_json::Value,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TxMessageRecord {
    pub msg_idx: u32,
    pub type_url: String,
    pub msg_type: String,
    pub module: String,
    pub raw: serde_json::Value,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TxEventRecord {
    pub event_idx: u32,
    pub msg_idx: Option<u32>,
    pub event_type: String,
    pub attributes: serde_json::Value,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct TxFeeRecord {
    pub denom: String,
    pub amount: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FeePayerType {
    Granter,
    Payer,
    FirstSigner,
}

impl FeePayerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeePayerType::Granter => "GRANTER",
            FeePayerType::Payer => "PAYER",
            FeePayerType::FirstSigner => "FIRST_SIGNER",
        }
    }
}

impl std::str::FromStr for FeePayerType {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "GRANTER" => Ok(FeePayerType::Granter),
            "PAYER" => Ok(FeePayerType::Payer),
            "FIRST_SIGNER" => Ok(FeePayerType::FirstSigner),
            other => anyhow::bail!("Unknown fee payer type: {}", other),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FeePayerRecord {
    pub payer_type: FeePayerType,
    pub address: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AddressType {
    Account,
    Validator,
}

impl AddressType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AddressType::Account => "ACCOUNT",
            AddressType::Validator => "OPERATOR",
        }
    }
}

impl std::str::FromStr for AddressType {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "ACCOUNT" => Ok(AddressType::Account),
            "OPERATOR" => Ok(AddressType::Validator),
            other => anyhow::bail!("Unknown address type: {}", other),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AddressJoin {
    pub address: String,
    pub address_type: AddressType,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SignatureJoin {
    pub pubkey: String,
    pub pubkey_type: String,
    pub address: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IbcChannelKey {
    pub port: String,
    pub channel: String,
}

impl IbcChannelKey {
    pub fn new(port: impl Into<String>, channel: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            channel: channel.into(),
        }
    }
}

impl std::fmt::Display for IbcChannelKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.port, self.channel)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AccountRecord {
    pub address: String,
    pub account_type: String,
    pub account_number: Option<u64>,
    pub data: Option<serde_json::Value>,
    pub height: BlockHeight,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct StakingValidatorRecord {
    pub operator_address: String,
    pub consensus_pubkey: Option<String>,
    pub moniker: String,
    pub status: String,
    pub jailed: bool,
    pub tokens: String,
    pub data: Option<serde_json::Value>,
    pub height: BlockHeight,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct MarkerRecord {
    pub denom: String,
    pub marker_address: Option<String>,
    pub marker_type: String,
    pub status: String,
    pub supply: Option<String>,
    pub data: Option<serde_json::Value>,
    pub height: BlockHeight,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct NftScopeRecord {
    pub address: String,
    pub deleted: bool,
    pub height: BlockHeight,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct GovProposalRecord {
    pub proposal_id: u64,
    pub proposal_type: String,
    pub title: String,
    pub description: String,
    pub status: String,
    pub proposer: String,
    pub data: serde_json::Value,
    pub height: BlockHeight,
    pub tx_hash: String,
    pub timestamp: Timestamp,
}

/// Chain-side state of a proposal, applied on top of the stored row
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct GovProposalRefresh {
    pub proposal_id: u64,
    pub status: String,
    pub title: Option<String>,
    pub data: serde_json::Value,
}

pub const FINAL_PROPOSAL_STATUSES: [&str; 4] = [
    "PROPOSAL_STATUS_PASSED",
    "PROPOSAL_STATUS_REJECTED",
    "PROPOSAL_STATUS_FAILED",
    "PROPOSAL_STATUS_VETOED",
];

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct WeightedVoteOption {
    pub option: String,
    pub weight: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct GovVoteRecord {
    pub proposal_id: u64,
    pub voter: String,
    pub options: Vec<WeightedVoteOption>,
    pub is_weighted: bool,
    pub height: BlockHeight,
    pub tx_hash: String,
    pub timestamp: Timestamp,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DepositType {
    Initial,
    Deposit,
}

impl DepositType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DepositType::Initial => "INITIAL_DEPOSIT",
            DepositType::Deposit => "DEPOSIT",
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct GovDepositRecord {
    pub proposal_id: u64,
    pub depositor: String,
    pub deposit_type: DepositType,
    pub denom: String,
    pub amount: String,
    pub height: BlockHeight,
    pub tx_hash: String,
    pub timestamp: Timestamp,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct IbcChannelRecord {
    pub key: IbcChannelKey,
    pub counterparty: Option<IbcChannelKey>,
    pub state: String,
    pub connection: Option<String>,
    pub data: Option<serde_json::Value>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum IbcMovement {
    In,
    Out,
}

impl IbcMovement {
    pub fn as_str(&self) -> &'static str {
        match self {
            IbcMovement::In => "IN",
            IbcMovement::Out => "OUT",
        }
    }
}

/// Key shared by a ledger row and every receive/ack/timeout that refers to it
pub fn ibc_ledger_key(channel: &IbcChannelKey, sequence: u64, movement: IbcMovement) -> String {
    format!(
        "{}/{}/{}/{}",
        channel.port,
        channel.channel,
        sequence,
        movement.as_str()
    )
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct IbcLedgerRecord {
    pub ledger_key: String,
    pub channel: IbcChannelKey,
    pub sequence: u64,
    pub movement: IbcMovement,
    pub denom: String,
    pub amount: String,
    pub from_address: String,
    pub to_address: String,
    pub tx_hash: String,
    pub height: BlockHeight,
    pub timestamp: Timestamp,
    pub acknowledged: bool,
    pub ack_success: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum IbcAckType {
    Receive,
    Acknowledgement,
    Timeout,
}

impl IbcAckType {
    pub fn as_str(&self) -> &'static str {
        match self {
            IbcAckType::Receive => "RECEIVE",
            IbcAckType::Acknowledgement => "ACKNOWLEDGEMENT",
            IbcAckType::Timeout => "TIMEOUT",
        }
    }
}

impl std::str::FromStr for IbcAckType {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "RECEIVE" => Ok(IbcAckType::Receive),
            "ACKNOWLEDGEMENT" => Ok(IbcAckType::Acknowledgement),
            "TIMEOUT" => Ok(IbcAckType::Timeout),
            other => anyhow::bail!("Unknown IBC ack type: {}", other),
        }
    }
}

/// A receive, acknowledgement or timeout that must be attached to a ledger row.
///
/// Resolved inside the commit: stored as an ack when the ledger row exists,
/// otherwise stored as pending until a later commit brings the ledger row.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct IbcLinkRecord {
    pub ledger_key: String,
    pub ack_type: IbcAckType,
    pub tx_hash: String,
    pub height: BlockHeight,
    pub success: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SmCodeRecord {
    pub code_id: u64,
    pub creator: Option<String>,
    pub data_hash: Option<String>,
    pub data: Option<serde_json::Value>,
    pub height: BlockHeight,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SmContractRecord {
    pub contract_address: String,
    pub code_id: Option<u64>,
    pub creator: Option<String>,
    pub admin: Option<String>,
    pub label: Option<String>,
    pub data: Option<serde_json::Value>,
    pub height: BlockHeight,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum NameAction {
    Bind,
    Unbind,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NameRecord {
    pub full_name: String,
    pub child: String,
    pub parent: Option<String>,
    pub owner: String,
    pub restricted: bool,
    pub height: BlockHeight,
}

impl NameRecord {
    /// Splits `child.parent.root` into its first label and the remaining parent name
    pub fn new(full_name: &str, owner: &str, restricted: bool, height: BlockHeight) -> Self {
        let (child, parent) = match full_name.split_once('.') {
            Some((child, parent)) => (child.to_string(), Some(parent.to_string())),
            None => (full_name.to_string(), None),
        };
        Self {
            full_name: full_name.to_string(),
            child,
            parent,
            owner: owner.to_string(),
            restricted,
            height,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NameIntent {
    pub action: NameAction,
    pub name: NameRecord,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct MsgTypeRecord {
    pub type_url: String,
    pub msg_type: String,
    pub module: String,
}

pub const UNKNOWN: &str = "unknown";

impl MsgTypeRecord {
    pub fn is_unknown(&self) -> bool {
        self.module == UNKNOWN || self.msg_type == UNKNOWN
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TxProcessingFailure {
    pub process_type: String,
    pub error_message: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct Watermark {
    pub max_height_read: Option<BlockHeight>,
    pub min_height_read: Option<BlockHeight>,
    pub last_update: Option<Timestamp>,
}

impl Watermark {
    pub fn is_initialized(&self) -> bool {
        self.max_height_read.is_some()
    }
}

/// How a committed block moves the watermark. Applied in the same database transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatermarkAdvance {
    None,
    /// Live path: `max_height_read` becomes at least this height
    Max(BlockHeight),
    /// Backfill path: `min_height_read` becomes at most this height
    Min(BlockHeight),
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryState {
    Pending,
    Processing,
}

impl RetryState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetryState::Pending => "PENDING",
            RetryState::Processing => "PROCESSING",
        }
    }
}

impl std::str::FromStr for RetryState {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "PENDING" => Ok(RetryState::Pending),
            "PROCESSING" => Ok(RetryState::Processing),
            other => anyhow::bail!("Unknown retry state: {}", other),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RetryEntry {
    pub height: BlockHeight,
    pub non_blocking: bool,
    pub state: RetryState,
    pub retry_count: u32,
    pub last_error: String,
    pub last_attempt: Timestamp,
}

/// Everything one transaction contributes to the index.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TxWriteSet {
    pub tx: TxRecord,
    pub messages: Vec<TxMessageRecord>,
    pub events: Vec<TxEventRecord>,
    pub fees: BTreeSet<TxFeeRecord>,
    pub fee_payers: BTreeSet<FeePayerRecord>,
    pub addresses: BTreeSet<AddressJoin>,
    pub markers: BTreeSet<String>,
    pub nfts: BTreeSet<String>,
    pub sm_codes: BTreeSet<u64>,
    pub sm_contracts: BTreeSet<String>,
    pub ibc_channels: BTreeSet<IbcChannelKey>,
    pub signatures: BTreeSet<SignatureJoin>,
    pub nft_scopes: BTreeMap<String, NftScopeRecord>,
    pub gov_proposals: Vec<GovProposalRecord>,
    pub gov_votes: Vec<GovVoteRecord>,
    pub gov_deposits: Vec<GovDepositRecord>,
    pub ibc_ledgers: Vec<IbcLedgerRecord>,
    pub ibc_links: Vec<IbcLinkRecord>,
    pub names: BTreeSet<NameIntent>,
    pub failures: Vec<TxProcessingFailure>,
}

impl TxWriteSet {
    pub fn new(tx: TxRecord) -> Self {
        Self {
            tx,
            messages: vec![],
            events: vec![],
            fees: BTreeSet::new(),
            fee_payers: BTreeSet::new(),
            addresses: BTreeSet::new(),
            markers: BTreeSet::new(),
            nfts: BTreeSet::new(),
            sm_codes: BTreeSet::new(),
            sm_contracts: BTreeSet::new(),
            ibc_channels: BTreeSet::new(),
            signatures: BTreeSet::new(),
            nft_scopes: BTreeMap::new(),
            gov_proposals: vec![],
            gov_votes: vec![],
            gov_deposits: vec![],
            ibc_ledgers: vec![],
            ibc_links: vec![],
            names: BTreeSet::new(),
            failures: vec![],
        }
    }

    pub fn hash(&self) -> &str {
        &self.tx.hash
    }
}

/// Reference entities created or refreshed while processing a block.
/// Shared by all transactions of the block so each entity is fetched once.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct ReferenceWrites {
    pub accounts: BTreeMap<String, AccountRecord>,
    pub validators: BTreeMap<String, StakingValidatorRecord>,
    pub markers: BTreeMap<String, MarkerRecord>,
    pub channels: BTreeMap<IbcChannelKey, IbcChannelRecord>,
    pub sm_codes: BTreeMap<u64, SmCodeRecord>,
    pub sm_contracts: BTreeMap<String, SmContractRecord>,
    pub proposal_refreshes: BTreeMap<u64, GovProposalRefresh>,
}

/// The complete unit of work for one block, committed in a single database transaction.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct BlockWriteSet {
    pub block: BlockRecord,
    pub proposer: Option<BlockProposerRecord>,
    pub validator_set: Option<ValidatorSetRecord>,
    pub transactions: Vec<TxWriteSet>,
    pub references: ReferenceWrites,
    pub msg_types: BTreeMap<String, MsgTypeRecord>,
    /// Non-fatal problems found while building the write-set; recorded as a non-blocking retry
    pub non_blocking_failures: Vec<String>,
    /// Replace already stored transactions of this block instead of keeping them
    pub replace_existing: bool,
}

impl BlockWriteSet {
    pub fn height(&self) -> BlockHeight {
        self.block.height
    }
}

/// A transaction with all its stored associations, as served to downstream readers
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct IndexedTransaction {
    pub tx: TxRecord,
    pub messages: Vec<TxMessageRecord>,
    pub fees: Vec<TxFeeRecord>,
    pub fee_payers: Vec<FeePayerRecord>,
    pub addresses: Vec<AddressJoin>,
    pub markers: Vec<String>,
    pub nfts: Vec<String>,
    pub sm_codes: Vec<u64>,
    pub sm_contracts: Vec<String>,
    pub ibc_channels: Vec<IbcChannelKey>,
    pub signatures: Vec<SignatureJoin>,
}
