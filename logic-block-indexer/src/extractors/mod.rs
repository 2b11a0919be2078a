//! Extractors turn the messages and events of one transaction into write intents.
//!
//! They are pure: every fact goes into the transaction's write-set, and every
//! reference entity they need goes into `lookups`, which the block indexer resolves
//! against the store and the chain once per block.

use std::collections::BTreeSet;

use explorer_primitives::{
    BlockHeight, Event, IbcChannelKey, MsgTypeRecord, Timestamp, TxResponse, TxWriteSet,
};
use serde_json::Value;

use crate::msg_types::{self, MsgKind};

mod address;
mod governance;
mod ibc;
mod marker;
mod name;
mod nft;
mod signature;
mod smart_contract;

#[derive(Debug, thiserror::Error)]
pub enum ExtractorError {
    /// No recovery path, fails the whole block
    #[error("invariant violated: {0}")]
    Invariant(String),
    /// Recorded as a processing failure of the transaction
    #[error("{0}")]
    Soft(String),
}

/// Reference entity the write-set points at
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LookupRequest {
    Account(String),
    Validator(String),
    Marker(String),
    /// Supply changed, fetch the marker even when it is already stored
    MarkerRefresh(String),
    Code(u64),
    Contract(String),
    Channel(IbcChannelKey),
    /// Always refreshed from the chain
    Proposal(u64),
}

#[derive(Debug, Clone)]
pub struct TxExtraction {
    pub write_set: TxWriteSet,
    pub lookups: BTreeSet<LookupRequest>,
}

impl TxExtraction {
    pub fn new(write_set: TxWriteSet) -> Self {
        Self {
            write_set,
            lookups: BTreeSet::new(),
        }
    }
}

/// A message of the transaction, nested authz messages included
#[derive(Debug, Clone)]
pub struct MessageRef<'a> {
    /// Index of the top-level message, which owns the events
    pub index: usize,
    pub type_url: &'a str,
    pub kind: MsgKind,
    pub body: &'a Value,
}

fn flatten_message<'a>(index: usize, body: &'a Value, out: &mut Vec<MessageRef<'a>>) {
    let type_url = msg_types::type_url(body);
    let kind = msg_types::kind_of(type_url);
    out.push(MessageRef {
        index,
        type_url,
        kind,
        body,
    });
    if kind == MsgKind::AuthzExec {
        if let Some(Value::Array(nested)) = body.get("msgs") {
            for nested in nested {
                flatten_message(index, nested, out);
            }
        }
    }
}

/// Every message depth-first, each authz wrapper before the messages it carries
pub(crate) fn flatten_messages(tx: &TxResponse) -> Vec<MessageRef<'_>> {
    let mut messages = vec![];
    for (index, body) in tx.messages().iter().enumerate() {
        flatten_message(index, body, &mut messages);
    }
    messages
}

pub struct TxContext<'a> {
    pub tx: &'a TxResponse,
    pub hash: &'a str,
    pub height: BlockHeight,
    pub timestamp: Timestamp,
    pub account_prefix: &'a str,
    pub operator_prefix: &'a str,
    /// Messages with a recognisable type, authz wrappers unwrapped
    pub messages: Vec<MessageRef<'a>>,
}

impl<'a> TxContext<'a> {
    pub fn new(
        tx: &'a TxResponse,
        timestamp: Timestamp,
        account_prefix: &'a str,
        operator_prefix: &'a str,
    ) -> Self {
        let mut messages = flatten_messages(tx);
        messages.retain(|message| !MsgTypeRecord::from_type_url(message.type_url).is_unknown());
        Self {
            tx,
            hash: &tx.txhash,
            height: tx.height,
            timestamp,
            account_prefix,
            operator_prefix,
            messages,
        }
    }

    pub fn is_success(&self) -> bool {
        self.tx.is_success()
    }

    pub fn events(&self) -> Vec<&'a Event> {
        self.tx.all_events()
    }

    pub fn msg_events(&self, msg_index: usize) -> Vec<&'a Event> {
        self.tx.msg_events(msg_index)
    }

    pub fn messages_of(&self, kind: MsgKind) -> impl Iterator<Item = &MessageRef<'a>> + '_ {
        self.messages.iter().filter(move |message| message.kind == kind)
    }
}

pub trait Extractor: Send + Sync {
    fn name(&self) -> &'static str;

    fn extract(&self, ctx: &TxContext<'_>, out: &mut TxExtraction) -> Result<(), ExtractorError>;
}

/// Every extractor, in the order they run over a transaction
pub fn registry() -> Vec<Box<dyn Extractor>> {
    vec![
        Box::new(address::AddressExtractor),
        Box::new(marker::MarkerExtractor),
        Box::new(nft::NftExtractor),
        Box::new(governance::GovernanceExtractor),
        Box::new(ibc::IbcExtractor),
        Box::new(smart_contract::SmartContractExtractor),
        Box::new(name::NameExtractor),
        Box::new(signature::SignatureExtractor),
    ]
}

const BECH32_CHARSET: &str = "qpzry9x8gf2tvdw0s3jn54khce6mua7l";
/// Shortest data part in use: a 17 byte metadata id plus the checksum
const MIN_BECH32_DATA_LEN: usize = 34;

/// `{hrp}1{data}` with a bech32 data part of a plausible length
pub(crate) fn is_bech32_with_hrp(value: &str, hrp: &str) -> bool {
    value
        .strip_prefix(hrp)
        .and_then(|rest| rest.strip_prefix('1'))
        .is_some_and(|data| {
            data.len() >= MIN_BECH32_DATA_LEN && data.chars().all(|ch| BECH32_CHARSET.contains(ch))
        })
}

/// Every string value in a JSON document
pub(crate) fn walk_strings<'v>(value: &'v Value, visit: &mut dyn FnMut(&'v str)) {
    match value {
        Value::String(value) => visit(value),
        Value::Array(items) => items.iter().for_each(|item| walk_strings(item, visit)),
        Value::Object(fields) => fields.values().for_each(|field| walk_strings(field, visit)),
        _ => {}
    }
}

/// Every string value stored under `key`, at any depth
pub(crate) fn walk_key<'v>(value: &'v Value, key: &str, visit: &mut dyn FnMut(&'v str)) {
    match value {
        Value::Array(items) => items.iter().for_each(|item| walk_key(item, key, visit)),
        Value::Object(fields) => {
            for (field, nested) in fields {
                match nested {
                    Value::String(nested) if field == key => visit(nested),
                    _ => walk_key(nested, key, visit),
                }
            }
        }
        _ => {}
    }
}

pub(crate) fn str_field<'v>(value: &'v Value, pointer: &str) -> Option<&'v str> {
    value
        .pointer(pointer)
        .and_then(Value::as_str)
        .filter(|value| !value.is_empty())
}

/// Integer fields arrive as strings from the gateway
pub(crate) fn u64_field(value: &Value, pointer: &str) -> Option<u64> {
    match value.pointer(pointer)? {
        Value::String(value) => value.parse().ok(),
        Value::Number(value) => value.as_u64(),
        _ => None,
    }
}
