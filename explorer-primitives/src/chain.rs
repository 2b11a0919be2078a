//! Views of the chain node's gRPC-gateway JSON responses.
//!
//! Only the fields the indexer reads are typed; messages and public keys stay
//! as raw JSON because their shape depends on the `@type` they carry.

use base64::Engine;
use serde::{Deserialize, Deserializer, Serialize};

pub type BlockHeight = u64;

/// The gateway encodes 64-bit integers as strings.
pub mod u64_string {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &u64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        match serde_json::Value::deserialize(deserializer)? {
            serde_json::Value::String(value) if value.is_empty() => Ok(0),
            serde_json::Value::String(value) => {
                value.parse::<u64>().map_err(serde::de::Error::custom)
            }
            serde_json::Value::Number(value) => value
                .as_u64()
                .ok_or_else(|| serde::de::Error::custom("expected unsigned integer")),
            serde_json::Value::Null => Ok(0),
            other => Err(serde::de::Error::custom(format!(
                "expected integer or string, got {}",
                other
            ))),
        }
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn base64_to_hex(value: &str) -> String {
    base64::engine::general_purpose::STANDARD
        .decode(value)
        .map(hex::encode_upper)
        .unwrap_or_else(|_| value.to_string())
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct BlockView {
    #[serde(default)]
    pub block_id: BlockId,
    pub block: Block,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct BlockId {
    #[serde(default)]
    pub hash: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Block {
    pub header: BlockHeader,
    #[serde(default, deserialize_with = "null_as_default")]
    pub data: BlockData,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct BlockHeader {
    #[serde(default)]
    pub chain_id: String,
    #[serde(with = "u64_string")]
    pub height: BlockHeight,
    pub time: chrono::DateTime<chrono::Utc>,
    #[serde(default)]
    pub proposer_address: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct BlockData {
    #[serde(default, deserialize_with = "null_as_default")]
    pub txs: Vec<String>,
}

impl BlockView {
    pub fn height(&self) -> BlockHeight {
        self.block.header.height
    }

    pub fn timestamp(&self) -> chrono::DateTime<chrono::Utc> {
        self.block.header.time
    }

    pub fn tx_count(&self) -> usize {
        self.block.data.txs.len()
    }

    pub fn hash_hex(&self) -> String {
        base64_to_hex(&self.block_id.hash)
    }

    /// Consensus address of the proposer as upper-case hex
    pub fn proposer_hex(&self) -> String {
        base64_to_hex(&self.block.header.proposer_address)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct TxResponse {
    #[serde(with = "u64_string")]
    pub height: BlockHeight,
    pub txhash: String,
    #[serde(default)]
    pub codespace: String,
    #[serde(default)]
    pub code: u32,
    #[serde(default)]
    pub raw_log: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub logs: Vec<AbciMessageLog>,
    #[serde(default, with = "u64_string")]
    pub gas_wanted: u64,
    #[serde(default, with = "u64_string")]
    pub gas_used: u64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub tx: Tx,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub events: Vec<Event>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct Tx {
    #[serde(default, deserialize_with = "null_as_default")]
    pub body: TxBody,
    #[serde(default, deserialize_with = "null_as_default")]
    pub auth_info: AuthInfo,
    #[serde(default, deserialize_with = "null_as_default")]
    pub signatures: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct TxBody {
    #[serde(default, deserialize_with = "null_as_default")]
    pub messages: Vec<serde_json::Value>,
    #[serde(default)]
    pub memo: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct AuthInfo {
    #[serde(default, deserialize_with = "null_as_default")]
    pub signer_infos: Vec<SignerInfo>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub fee: Fee,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct SignerInfo {
    #[serde(default)]
    pub public_key: Option<serde_json::Value>,
    #[serde(default, with = "u64_string")]
    pub sequence: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct Fee {
    #[serde(default, deserialize_with = "null_as_default")]
    pub amount: Vec<Coin>,
    #[serde(default, with = "u64_string")]
    pub gas_limit: u64,
    #[serde(default)]
    pub payer: String,
    #[serde(default)]
    pub granter: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Coin {
    pub denom: String,
    pub amount: String,
}

lazy_static::lazy_static! {
    static ref RE_COIN: regex::Regex =
        regex::Regex::new(r"^(?<amount>[0-9]+)(?<denom>[a-zA-Z][a-zA-Z0-9/:._\-]{1,127})$").unwrap();
}

impl Coin {
    /// Parses a coin list as emitted in event attributes, e.g. `100nhash,5ibc/ABC`.
    /// Malformed entries are skipped.
    pub fn parse_list(value: &str) -> Vec<Coin> {
        value
            .split(',')
            .filter_map(|item| {
                let caps = RE_COIN.captures(item.trim())?;
                Some(Coin {
                    denom: caps["denom"].to_string(),
                    amount: caps["amount"].to_string(),
                })
            })
            .collect()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct AbciMessageLog {
    #[serde(default)]
    pub msg_index: u32,
    #[serde(default)]
    pub log: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub events: Vec<Event>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub attributes: Vec<EventAttribute>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct EventAttribute {
    pub key: String,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub index: bool,
}

impl Event {
    /// First value of `key`, with JSON string quoting removed
    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|attribute| attribute.key == key)
            .map(|attribute| unquote(&attribute.value))
    }

    pub fn attrs<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.attributes
            .iter()
            .filter(move |attribute| attribute.key == key)
            .map(|attribute| unquote(&attribute.value))
    }
}

/// Typed events from newer modules carry JSON-encoded string values.
pub fn unquote(value: &str) -> &str {
    value.trim().trim_matches('"')
}

impl TxResponse {
    pub fn is_success(&self) -> bool {
        self.code == 0
    }

    pub fn messages(&self) -> &[serde_json::Value] {
        &self.tx.body.messages
    }

    pub fn timestamp(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        chrono::DateTime::parse_from_rfc3339(&self.timestamp)
            .ok()
            .map(|time| time.with_timezone(&chrono::Utc))
    }

    /// Events emitted by the message at `msg_index`.
    ///
    /// Older nodes group events per message in `logs`; newer ones only emit a flat
    /// event list where message events carry a `msg_index` attribute.
    pub fn msg_events(&self, msg_index: usize) -> Vec<&Event> {
        if let Some(log) = self
            .logs
            .iter()
            .find(|log| log.msg_index as usize == msg_index)
        {
            return log.events.iter().collect();
        }
        let msg_index = msg_index.to_string();
        self.events
            .iter()
            .filter(|event| event.attr("msg_index") == Some(msg_index.as_str()))
            .collect()
    }

    /// Every event of the transaction, including ante-handler events when the node reports them
    pub fn all_events(&self) -> Vec<&Event> {
        if !self.events.is_empty() {
            self.events.iter().collect()
        } else {
            self.logs.iter().flat_map(|log| log.events.iter()).collect()
        }
    }

    /// Signer addresses in signing order, taken from the `tx` event `acc_seq` attributes
    pub fn signer_addresses(&self) -> Vec<String> {
        self.all_events()
            .into_iter()
            .filter(|event| event.kind == "tx")
            .flat_map(|event| event.attrs("acc_seq"))
            .filter_map(|acc_seq| acc_seq.split('/').next())
            .filter(|address| !address.is_empty())
            .map(str::to_string)
            .collect()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ValidatorSetEntry {
    pub address: String,
    #[serde(default)]
    pub pub_key: Option<serde_json::Value>,
    #[serde(default, with = "u64_string")]
    pub voting_power: u64,
    #[serde(default)]
    pub proposer_priority: String,
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn parses_gateway_block() {
        let block: BlockView = serde_json::from_value(serde_json::json!({
            "block_id": {"hash": "AAEC"},
            "block": {
                "header": {
                    "chain_id": "pio-testnet-1",
                    "height": "42",
                    "time": "2024-01-02T03:04:05.123456Z",
                    "proposer_address": "qrs="
                },
                "data": {"txs": ["dHgx", "dHgy"]}
            }
        }))
        .unwrap();
        assert_eq!(block.height(), 42);
        assert_eq!(block.tx_count(), 2);
        assert_eq!(block.hash_hex(), "000102");
        assert_eq!(block.proposer_hex(), "AABB");
    }

    #[test]
    fn null_collections_are_empty() {
        let tx: TxResponse = serde_json::from_value(serde_json::json!({
            "height": "7",
            "txhash": "ABC",
            "logs": null,
            "events": null,
            "gas_wanted": "200000",
            "gas_used": 150000
        }))
        .unwrap();
        assert!(tx.logs.is_empty());
        assert!(tx.events.is_empty());
        assert_eq!(tx.gas_wanted, 200_000);
        assert_eq!(tx.gas_used, 150_000);
    }

    #[test]
    fn parses_coin_lists() {
        assert_eq!(
            Coin::parse_list("100nhash,5ibc/27394FB0,bogus"),
            vec![
                Coin {
                    denom: "nhash".to_string(),
                    amount: "100".to_string()
                },
                Coin {
                    denom: "ibc/27394FB0".to_string(),
                    amount: "5".to_string()
                },
            ]
        );
    }

    #[test]
    fn message_events_from_flat_event_list() {
        let tx: TxResponse = serde_json::from_value(serde_json::json!({
            "height": "7",
            "txhash": "ABC",
            "events": [
                {"type": "tx", "attributes": [{"key": "acc_seq", "value": "pb1signer/4"}]},
                {"type": "transfer", "attributes": [
                    {"key": "recipient", "value": "pb1a"},
                    {"key": "msg_index", "value": "0"}
                ]},
                {"type": "transfer", "attributes": [
                    {"key": "recipient", "value": "pb1b"},
                    {"key": "msg_index", "value": "1"}
                ]}
            ]
        }))
        .unwrap();
        let events = tx.msg_events(1);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].attr("recipient"), Some("pb1b"));
        assert_eq!(tx.signer_addresses(), vec!["pb1signer".to_string()]);
    }
}
