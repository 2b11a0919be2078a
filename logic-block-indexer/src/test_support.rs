//! Scripted chain node for the pipeline tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use chrono::TimeZone;
use explorer_primitives::{
    AccountRecord, BlockHeight, BlockView, GovProposalRefresh, IbcChannelKey, IbcChannelRecord,
    MarkerRecord, SmCodeRecord, SmContractRecord, StakingValidatorRecord, Timestamp,
    ValidatorSetEntry,
};
use serde_json::{json, Value};

use crate::chain_client::{ChainError, ChainReader, ChainResult};

pub(crate) const SENDER: &str = "pb1q9hh4p3g0nywk4lupcz84yqgelhhm7gq2w6y3x";
pub(crate) const RECEIVER: &str = "pb1fg9s7u9ua2h0mfhm7am4nhdzqhw6cp9ld57jcn";

pub(crate) fn chain_config() -> configuration::ChainConfig {
    configuration::ChainConfig {
        account_prefix: "pb".to_string(),
        ..Default::default()
    }
}

pub(crate) fn genesis() -> Timestamp {
    chrono::Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()
}

pub(crate) fn block_view_at(height: BlockHeight, tx_count: usize, time: Timestamp) -> BlockView {
    let txs = vec!["dHg="; tx_count];
    serde_json::from_value(json!({
        "block_id": {"hash": "3q2+7w=="},
        "block": {
            "header": {
                "chain_id": "pio-testnet-1",
                "height": height.to_string(),
                "time": time.to_rfc3339(),
                "proposer_address": "qrs="
            },
            "data": {"txs": txs}
        }
    }))
    .unwrap()
}

pub(crate) fn block_view(height: BlockHeight, tx_count: usize) -> BlockView {
    block_view_at(height, tx_count, genesis() + chrono::Duration::seconds(height as i64 - 1))
}

/// A successful bank send with the events a node emits for it
pub(crate) fn send_tx(height: BlockHeight, hash: &str) -> Value {
    json!({
        "height": height.to_string(),
        "txhash": hash,
        "gas_wanted": "200000",
        "gas_used": "120000",
        "tx": {
            "body": {"messages": [{
                "@type": "/cosmos.bank.v1beta1.MsgSend",
                "from_address": SENDER,
                "to_address": RECEIVER,
                "amount": [{"denom": "nhash", "amount": "1000"}]
            }]},
            "auth_info": {
                "signer_infos": [{"public_key": {"@type": "/cosmos.crypto.secp256k1.PubKey", "key": "SKEY"}, "sequence": "1"}],
                "fee": {"amount": [{"denom": "nhash", "amount": "3810000000"}], "gas_limit": "200000"}
            }
        },
        "events": [
            {"type": "tx", "attributes": [{"key": "acc_seq", "value": format!("{}/1", SENDER)}]},
            {"type": "transfer", "attributes": [
                {"key": "recipient", "value": RECEIVER},
                {"key": "sender", "value": SENDER},
                {"key": "amount", "value": "1000nhash"},
                {"key": "msg_index", "value": "0"}
            ]}
        ]
    })
}

/// `MsgTransfer` on `transfer/channel-7` that was assigned `sequence`
pub(crate) fn ibc_transfer_tx(height: BlockHeight, hash: &str, sequence: u64) -> Value {
    json!({
        "height": height.to_string(),
        "txhash": hash,
        "gas_wanted": "300000",
        "tx": {"body": {"messages": [{
            "@type": "/ibc.applications.transfer.v1.MsgTransfer",
            "source_port": "transfer",
            "source_channel": "channel-7",
            "token": {"denom": "nhash", "amount": "500"},
            "sender": SENDER,
            "receiver": "osmo1qyqszqgpqyqszqgpqyqszqgpqyqszqgp"
        }]}},
        "logs": [{"msg_index": 0, "events": [{"type": "send_packet", "attributes": [
            {"key": "packet_sequence", "value": sequence.to_string()},
            {"key": "packet_src_port", "value": "transfer"},
            {"key": "packet_src_channel", "value": "channel-7"},
            {"key": "packet_dst_port", "value": "transfer"},
            {"key": "packet_dst_channel", "value": "channel-1"}
        ]}]}]
    })
}

/// Successful acknowledgement of the packet sent by [`ibc_transfer_tx`]
pub(crate) fn ibc_ack_tx(height: BlockHeight, hash: &str, sequence: u64) -> Value {
    json!({
        "height": height.to_string(),
        "txhash": hash,
        "tx": {"body": {"messages": [{
            "@type": "/ibc.core.channel.v1.MsgAcknowledgement",
            "packet": {
                "sequence": sequence.to_string(),
                "source_port": "transfer",
                "source_channel": "channel-7",
                "destination_port": "transfer",
                "destination_channel": "channel-1"
            },
            "acknowledgement": "eyJyZXN1bHQiOiJBUT09In0="
        }]}},
        "logs": [{"msg_index": 0, "events": [
            {"type": "fungible_token_packet", "attributes": [{"key": "success", "value": "true"}]}
        ]}]
    })
}

/// Text proposal `proposal_id` submitted by [`SENDER`]
pub(crate) fn submit_proposal_tx(height: BlockHeight, hash: &str, proposal_id: u64) -> Value {
    json!({
        "height": height.to_string(),
        "txhash": hash,
        "tx": {"body": {"messages": [{
            "@type": "/cosmos.gov.v1beta1.MsgSubmitProposal",
            "content": {
                "@type": "/cosmos.gov.v1beta1.TextProposal",
                "title": "Lower fees",
                "description": "Halve the floor gas price"
            },
            "initial_deposit": [],
            "proposer": SENDER
        }]}},
        "logs": [{"msg_index": 0, "events": [
            {"type": "submit_proposal", "attributes": [
                {"key": "proposal_id", "value": proposal_id.to_string()}
            ]}
        ]}]
    })
}

#[derive(Debug)]
struct FakeChainState {
    latest: BlockHeight,
    block_time_secs: i64,
    txs: BTreeMap<BlockHeight, Vec<Value>>,
    proposals: BTreeMap<u64, GovProposalRefresh>,
    unavailable: bool,
    failing_lookups: bool,
    lookup_calls: HashMap<String, usize>,
}

/// Serves every height up to `latest`, one block every `block_time_secs` from
/// [`genesis`], with the transactions registered through [`FakeChain::add_tx`].
#[derive(Debug)]
pub(crate) struct FakeChain {
    state: Mutex<FakeChainState>,
}

impl FakeChain {
    pub fn new(latest: BlockHeight) -> Self {
        Self::with_block_time(latest, 1)
    }

    pub fn with_block_time(latest: BlockHeight, block_time_secs: i64) -> Self {
        Self {
            state: Mutex::new(FakeChainState {
                latest,
                block_time_secs,
                txs: BTreeMap::new(),
                proposals: BTreeMap::new(),
                unavailable: false,
                failing_lookups: false,
                lookup_calls: HashMap::new(),
            }),
        }
    }

    pub fn block_time(&self, height: BlockHeight) -> Timestamp {
        let block_time_secs = self.state.lock().unwrap().block_time_secs;
        genesis() + chrono::Duration::seconds((height as i64 - 1) * block_time_secs)
    }

    pub fn set_latest(&self, latest: BlockHeight) {
        self.state.lock().unwrap().latest = latest;
    }

    pub fn add_tx(&self, height: BlockHeight, tx: Value) {
        self.state.lock().unwrap().txs.entry(height).or_default().push(tx);
    }

    pub fn set_proposal(&self, refresh: GovProposalRefresh) {
        self.state
            .lock()
            .unwrap()
            .proposals
            .insert(refresh.proposal_id, refresh);
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().unwrap().unavailable = unavailable;
    }

    pub fn set_failing_lookups(&self, failing: bool) {
        self.state.lock().unwrap().failing_lookups = failing;
    }

    /// Number of metadata requests made for `key`
    pub fn lookups_of(&self, key: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .lookup_calls
            .get(key)
            .copied()
            .unwrap_or_default()
    }

    fn check_available(&self) -> ChainResult<()> {
        if self.state.lock().unwrap().unavailable {
            return Err(ChainError::Unavailable("connection refused".to_string()));
        }
        Ok(())
    }

    fn lookup(&self, key: &str) -> ChainResult<()> {
        self.check_available()?;
        let mut state = self.state.lock().unwrap();
        *state.lookup_calls.entry(key.to_string()).or_default() += 1;
        if state.failing_lookups {
            return Err(ChainError::Unavailable(format!("lookup of {} timed out", key)));
        }
        Ok(())
    }
}

impl ChainReader for FakeChain {
    async fn latest_height(&self) -> ChainResult<BlockHeight> {
        self.check_available()?;
        Ok(self.state.lock().unwrap().latest)
    }

    async fn block(&self, height: BlockHeight) -> ChainResult<Option<BlockView>> {
        self.check_available()?;
        let (latest, tx_count) = {
            let state = self.state.lock().unwrap();
            (state.latest, state.txs.get(&height).map_or(0, Vec::len))
        };
        if height == 0 || height > latest {
            return Ok(None);
        }
        Ok(Some(block_view_at(height, tx_count, self.block_time(height))))
    }

    async fn transactions(
        &self,
        height: BlockHeight,
        expected_count: usize,
    ) -> ChainResult<Vec<Value>> {
        self.check_available()?;
        let txs = self
            .state
            .lock()
            .unwrap()
            .txs
            .get(&height)
            .cloned()
            .unwrap_or_default();
        if txs.len() != expected_count {
            return Err(ChainError::Malformed(format!(
                "expected {} transactions, got {}",
                expected_count,
                txs.len()
            )));
        }
        Ok(txs)
    }

    async fn validator_set(
        &self,
        _height: BlockHeight,
    ) -> ChainResult<Option<Vec<ValidatorSetEntry>>> {
        self.check_available()?;
        Ok(Some(vec![ValidatorSetEntry {
            address: "pbvalcons1qyqszqgpqyqszqgpqyqszqgpqyqszqgp5l2jyc".to_string(),
            pub_key: None,
            voting_power: 10,
            proposer_priority: "0".to_string(),
        }]))
    }

    async fn account(&self, address: &str, height: BlockHeight) -> ChainResult<Option<AccountRecord>> {
        self.lookup(address)?;
        Ok(Some(AccountRecord {
            address: address.to_string(),
            account_type: "/cosmos.auth.v1beta1.BaseAccount".to_string(),
            account_number: Some(7),
            data: None,
            height,
        }))
    }

    async fn staking_validator(
        &self,
        operator_address: &str,
        height: BlockHeight,
    ) -> ChainResult<Option<StakingValidatorRecord>> {
        self.lookup(operator_address)?;
        Ok(Some(StakingValidatorRecord {
            operator_address: operator_address.to_string(),
            consensus_pubkey: None,
            moniker: "figment".to_string(),
            status: "BOND_STATUS_BONDED".to_string(),
            jailed: false,
            tokens: "1000".to_string(),
            data: None,
            height,
        }))
    }

    async fn marker(&self, denom: &str, height: BlockHeight) -> ChainResult<Option<MarkerRecord>> {
        self.lookup(denom)?;
        Ok(Some(MarkerRecord {
            denom: denom.to_string(),
            marker_address: None,
            marker_type: "MARKER_TYPE_COIN".to_string(),
            status: "MARKER_STATUS_ACTIVE".to_string(),
            supply: Some("100000".to_string()),
            data: None,
            height,
        }))
    }

    async fn sm_code(&self, code_id: u64, height: BlockHeight) -> ChainResult<Option<SmCodeRecord>> {
        self.lookup(&code_id.to_string())?;
        Ok(Some(SmCodeRecord {
            code_id,
            creator: Some(SENDER.to_string()),
            data_hash: None,
            data: None,
            height,
        }))
    }

    async fn sm_contract(
        &self,
        contract_address: &str,
        height: BlockHeight,
    ) -> ChainResult<Option<SmContractRecord>> {
        self.lookup(contract_address)?;
        Ok(Some(SmContractRecord {
            contract_address: contract_address.to_string(),
            code_id: Some(1),
            creator: None,
            admin: None,
            label: Some("fake".to_string()),
            data: None,
            height,
        }))
    }

    async fn ibc_channel(&self, channel: &IbcChannelKey) -> ChainResult<Option<IbcChannelRecord>> {
        self.lookup(&channel.to_string())?;
        Ok(Some(IbcChannelRecord {
            key: channel.clone(),
            counterparty: Some(IbcChannelKey::new("transfer", "channel-0")),
            state: "STATE_OPEN".to_string(),
            connection: Some("connection-0".to_string()),
            data: None,
        }))
    }

    async fn gov_proposal(&self, proposal_id: u64) -> ChainResult<Option<GovProposalRefresh>> {
        self.lookup(&format!("proposal/{}", proposal_id))?;
        Ok(self.state.lock().unwrap().proposals.get(&proposal_id).cloned())
    }
}
