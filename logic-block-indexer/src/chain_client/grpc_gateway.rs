use std::sync::Arc;
use std::time::Duration;

use explorer_primitives::{
    AccountRecord, BlockHeight, BlockView, GovProposalRefresh, IbcChannelKey, IbcChannelRecord,
    MarkerRecord, SmCodeRecord, SmContractRecord, StakingValidatorRecord, ValidatorSetEntry,
};
use serde_json::Value;
use tokio_retry::{strategy::FixedInterval, RetryIf};

use crate::chain_client::{ChainError, ChainReader, ChainResult};
use crate::CHAIN_CLIENT;

/// ChainReader over the node's gRPC-gateway REST surface.
///
/// Requests share one counting semaphore so the node never sees more than
/// `max_concurrent_requests` calls from this process.
#[derive(Debug, Clone)]
pub struct GrpcGatewayClient {
    client: reqwest::Client,
    api_url: reqwest::Url,
    semaphore: Arc<tokio::sync::Semaphore>,
    max_retries: usize,
    retry_interval: Duration,
    tx_page_limit: u64,
}

impl GrpcGatewayClient {
    pub fn new(config: &configuration::ChainConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()?;
        let api_url = reqwest::Url::parse(&config.api_url)
            .map_err(|err| anyhow::anyhow!("Invalid chain api_url {}: {}", config.api_url, err))?;
        if api_url.cannot_be_a_base() {
            anyhow::bail!("Chain api_url {} cannot be used as a base url", config.api_url);
        }
        Ok(Self {
            client,
            api_url,
            semaphore: Arc::new(tokio::sync::Semaphore::new(config.max_concurrent_requests)),
            max_retries: config.max_retries,
            retry_interval: Duration::from_millis(config.retry_interval_ms),
            tx_page_limit: config.tx_page_limit,
        })
    }

    fn endpoint(&self, segments: &[&str]) -> ChainResult<reqwest::Url> {
        let mut url = self.api_url.clone();
        url.path_segments_mut()
            .map_err(|_| ChainError::Malformed(format!("invalid base url {}", self.api_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get_once(
        &self,
        url: &reqwest::Url,
        query: &[(&str, String)],
    ) -> ChainResult<Option<Value>> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|err| ChainError::Unavailable(err.to_string()))?;
        let response = self
            .client
            .get(url.clone())
            .query(query)
            .send()
            .await
            .map_err(|err| ChainError::Unavailable(format!("GET {}: {}", url, err)))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if status.is_server_error() {
            return Err(ChainError::Unavailable(format!("GET {}: HTTP {}", url, status)));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChainError::Malformed(format!(
                "GET {}: HTTP {} {}",
                url, status, body
            )));
        }
        response
            .json::<Value>()
            .await
            .map(Some)
            .map_err(|err| ChainError::Malformed(format!("GET {}: {}", url, err)))
    }

    #[cfg_attr(feature = "tracing-instrumentation", tracing::instrument(skip(self)))]
    async fn get_json(
        &self,
        segments: &[&str],
        query: &[(&str, String)],
    ) -> ChainResult<Option<Value>> {
        let url = self.endpoint(segments)?;
        let strategy = FixedInterval::new(self.retry_interval).take(self.max_retries);
        RetryIf::start(
            strategy,
            || self.get_once(&url, query),
            |err: &ChainError| {
                tracing::debug!(target: CHAIN_CLIENT, "Retrying {}: {}", url, err);
                err.is_transient()
            },
        )
        .await
    }
}

fn field<'a>(body: &'a Value, key: &str) -> ChainResult<&'a Value> {
    body.get(key)
        .ok_or_else(|| ChainError::Malformed(format!("missing `{}` in response", key)))
}

fn decode<T: serde::de::DeserializeOwned>(value: Value, what: &str) -> ChainResult<T> {
    serde_json::from_value(value)
        .map_err(|err| ChainError::Malformed(format!("failed to decode {}: {}", what, err)))
}

fn string_at(value: &Value, pointer: &str) -> Option<String> {
    value
        .pointer(pointer)
        .and_then(Value::as_str)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn u64_at(value: &Value, pointer: &str) -> Option<u64> {
    match value.pointer(pointer)? {
        Value::String(value) => value.parse().ok(),
        Value::Number(value) => value.as_u64(),
        _ => None,
    }
}

fn parse_total(body: &Value) -> Option<usize> {
    u64_at(body, "/pagination/total")
        .or_else(|| u64_at(body, "/total"))
        .map(|total| total as usize)
}

/// Accumulates `tx_responses` pages of one block until the node's reported total is reached.
#[derive(Debug)]
pub(crate) struct TxPages {
    height: BlockHeight,
    expected_count: usize,
    transactions: Vec<Value>,
    complete: bool,
}

impl TxPages {
    pub(crate) fn new(height: BlockHeight, expected_count: usize) -> Self {
        Self {
            height,
            expected_count,
            transactions: Vec::with_capacity(expected_count),
            complete: expected_count == 0,
        }
    }

    pub(crate) fn is_complete(&self) -> bool {
        self.complete
    }

    pub(crate) fn offset(&self) -> usize {
        self.transactions.len()
    }

    /// Missing `total` falls back to the block's declared transaction count.
    pub(crate) fn push_page(&mut self, body: Value) -> ChainResult<()> {
        let page = match body.get("tx_responses") {
            Some(Value::Array(page)) => page.clone(),
            _ => vec![],
        };
        let total = parse_total(&body).unwrap_or(self.expected_count);
        if page.is_empty() && self.transactions.len() < total {
            return Err(ChainError::Malformed(format!(
                "empty transaction page at height {} after {} of {} transactions",
                self.height,
                self.transactions.len(),
                total
            )));
        }
        self.transactions.extend(page);
        self.complete = self.transactions.len() >= total;
        Ok(())
    }

    pub(crate) fn finish(self) -> ChainResult<Vec<Value>> {
        if self.transactions.len() != self.expected_count {
            return Err(ChainError::Malformed(format!(
                "expected {} transactions at height {}, node returned {}",
                self.expected_count,
                self.height,
                self.transactions.len()
            )));
        }
        Ok(self.transactions)
    }
}

pub(crate) fn parse_account(body: &Value, address: &str, height: BlockHeight) -> ChainResult<AccountRecord> {
    let account = field(body, "account")?;
    Ok(AccountRecord {
        address: address.to_string(),
        account_type: string_at(account, "/@type").unwrap_or_else(|| "unknown".to_string()),
        account_number: u64_at(account, "/account_number")
            .or_else(|| u64_at(account, "/base_account/account_number")),
        data: Some(account.clone()),
        height,
    })
}

pub(crate) fn parse_staking_validator(body: &Value, height: BlockHeight) -> ChainResult<StakingValidatorRecord> {
    let validator = field(body, "validator")?;
    Ok(StakingValidatorRecord {
        operator_address: string_at(validator, "/operator_address")
            .ok_or_else(|| ChainError::Malformed("validator without operator_address".to_string()))?,
        consensus_pubkey: string_at(validator, "/consensus_pubkey/key"),
        moniker: string_at(validator, "/description/moniker").unwrap_or_default(),
        status: string_at(validator, "/status").unwrap_or_default(),
        jailed: validator
            .get("jailed")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        tokens: string_at(validator, "/tokens").unwrap_or_else(|| "0".to_string()),
        data: Some(validator.clone()),
        height,
    })
}

pub(crate) fn parse_marker(
    body: &Value,
    supply: Option<&Value>,
    denom: &str,
    height: BlockHeight,
) -> ChainResult<MarkerRecord> {
    let marker = field(body, "marker")?;
    let bank_supply = supply.and_then(|supply| string_at(supply, "/amount/amount"));
    Ok(MarkerRecord {
        denom: denom.to_string(),
        marker_address: string_at(marker, "/base_account/address"),
        marker_type: string_at(marker, "/marker_type").unwrap_or_else(|| "MARKER_TYPE_COIN".to_string()),
        status: string_at(marker, "/status").unwrap_or_default(),
        supply: bank_supply.or_else(|| string_at(marker, "/supply")),
        data: Some(marker.clone()),
        height,
    })
}

pub(crate) fn parse_sm_code(body: &Value, code_id: u64, height: BlockHeight) -> ChainResult<SmCodeRecord> {
    let info = field(body, "code_info")?;
    Ok(SmCodeRecord {
        code_id,
        creator: string_at(info, "/creator"),
        data_hash: string_at(info, "/data_hash"),
        data: Some(info.clone()),
        height,
    })
}

pub(crate) fn parse_sm_contract(
    body: &Value,
    contract_address: &str,
    height: BlockHeight,
) -> ChainResult<SmContractRecord> {
    let info = field(body, "contract_info")?;
    Ok(SmContractRecord {
        contract_address: contract_address.to_string(),
        code_id: u64_at(info, "/code_id"),
        creator: string_at(info, "/creator"),
        admin: string_at(info, "/admin"),
        label: string_at(info, "/label"),
        data: Some(info.clone()),
        height,
    })
}

pub(crate) fn parse_channel(body: &Value, key: &IbcChannelKey) -> ChainResult<IbcChannelRecord> {
    let channel = field(body, "channel")?;
    let counterparty = match (
        string_at(channel, "/counterparty/port_id"),
        string_at(channel, "/counterparty/channel_id"),
    ) {
        (Some(port), Some(channel)) => Some(IbcChannelKey::new(port, channel)),
        _ => None,
    };
    Ok(IbcChannelRecord {
        key: key.clone(),
        counterparty,
        state: string_at(channel, "/state").unwrap_or_default(),
        connection: string_at(channel, "/connection_hops/0"),
        data: Some(channel.clone()),
    })
}

pub(crate) fn parse_proposal(body: &Value, proposal_id: u64) -> ChainResult<GovProposalRefresh> {
    let proposal = field(body, "proposal")?;
    Ok(GovProposalRefresh {
        proposal_id,
        status: string_at(proposal, "/status")
            .ok_or_else(|| ChainError::Malformed(format!("proposal {} without status", proposal_id)))?,
        title: string_at(proposal, "/title").or_else(|| string_at(proposal, "/content/title")),
        data: proposal.clone(),
    })
}

impl ChainReader for GrpcGatewayClient {
    async fn latest_height(&self) -> ChainResult<BlockHeight> {
        let body = self
            .get_json(&["cosmos", "base", "tendermint", "v1beta1", "blocks", "latest"], &[])
            .await?
            .ok_or_else(|| ChainError::Malformed("latest block not found".to_string()))?;
        let block: BlockView = decode(body, "latest block")?;
        Ok(block.height())
    }

    async fn block(&self, height: BlockHeight) -> ChainResult<Option<BlockView>> {
        let height_segment = height.to_string();
        match self
            .get_json(
                &["cosmos", "base", "tendermint", "v1beta1", "blocks", &height_segment],
                &[],
            )
            .await?
        {
            Some(body) => decode(body, "block").map(Some),
            None => Ok(None),
        }
    }

    #[cfg_attr(feature = "tracing-instrumentation", tracing::instrument(skip(self)))]
    async fn transactions(
        &self,
        height: BlockHeight,
        expected_count: usize,
    ) -> ChainResult<Vec<Value>> {
        let mut pages = TxPages::new(height, expected_count);
        while !pages.is_complete() {
            let query = [
                ("events", format!("tx.height={}", height)),
                ("pagination.offset", pages.offset().to_string()),
                ("pagination.limit", self.tx_page_limit.to_string()),
                ("pagination.count_total", "true".to_string()),
                ("order_by", "ORDER_BY_ASC".to_string()),
            ];
            let body = self
                .get_json(&["cosmos", "tx", "v1beta1", "txs"], &query)
                .await?
                .unwrap_or(Value::Null);
            pages.push_page(body)?;
        }
        pages.finish()
    }

    async fn validator_set(&self, height: BlockHeight) -> ChainResult<Option<Vec<ValidatorSetEntry>>> {
        let height_segment = height.to_string();
        let query = [("pagination.limit", "1000".to_string())];
        match self
            .get_json(
                &["cosmos", "base", "tendermint", "v1beta1", "validatorsets", &height_segment],
                &query,
            )
            .await?
        {
            Some(mut body) => {
                let validators = body
                    .get_mut("validators")
                    .map(Value::take)
                    .unwrap_or_else(|| Value::Array(vec![]));
                decode(validators, "validator set").map(Some)
            }
            None => Ok(None),
        }
    }

    async fn account(&self, address: &str, height: BlockHeight) -> ChainResult<Option<AccountRecord>> {
        self.get_json(&["cosmos", "auth", "v1beta1", "accounts", address], &[])
            .await?
            .map(|body| parse_account(&body, address, height))
            .transpose()
    }

    async fn staking_validator(
        &self,
        operator_address: &str,
        height: BlockHeight,
    ) -> ChainResult<Option<StakingValidatorRecord>> {
        self.get_json(&["cosmos", "staking", "v1beta1", "validators", operator_address], &[])
            .await?
            .map(|body| parse_staking_validator(&body, height))
            .transpose()
    }

    async fn marker(&self, denom: &str, height: BlockHeight) -> ChainResult<Option<MarkerRecord>> {
        let detail_path = ["provenance", "marker", "v1", "detail", denom];
        let supply_query = [("denom", denom.to_string())];
        let (detail, supply) = futures::try_join!(
            self.get_json(&detail_path, &[]),
            self.get_json(
                &["cosmos", "bank", "v1beta1", "supply", "by_denom"],
                &supply_query,
            ),
        )?;
        detail
            .map(|body| parse_marker(&body, supply.as_ref(), denom, height))
            .transpose()
    }

    async fn sm_code(&self, code_id: u64, height: BlockHeight) -> ChainResult<Option<SmCodeRecord>> {
        let code_segment = code_id.to_string();
        self.get_json(&["cosmwasm", "wasm", "v1", "code", &code_segment], &[])
            .await?
            .map(|body| parse_sm_code(&body, code_id, height))
            .transpose()
    }

    async fn sm_contract(
        &self,
        contract_address: &str,
        height: BlockHeight,
    ) -> ChainResult<Option<SmContractRecord>> {
        self.get_json(&["cosmwasm", "wasm", "v1", "contract", contract_address], &[])
            .await?
            .map(|body| parse_sm_contract(&body, contract_address, height))
            .transpose()
    }

    async fn ibc_channel(&self, channel: &IbcChannelKey) -> ChainResult<Option<IbcChannelRecord>> {
        self.get_json(
            &[
                "ibc",
                "core",
                "channel",
                "v1",
                "channels",
                &channel.channel,
                "ports",
                &channel.port,
            ],
            &[],
        )
        .await?
        .map(|body| parse_channel(&body, channel))
        .transpose()
    }

    async fn gov_proposal(&self, proposal_id: u64) -> ChainResult<Option<GovProposalRefresh>> {
        let id_segment = proposal_id.to_string();
        self.get_json(&["cosmos", "gov", "v1", "proposals", &id_segment], &[])
            .await?
            .map(|body| parse_proposal(&body, proposal_id))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    fn client(api_url: &str) -> GrpcGatewayClient {
        GrpcGatewayClient::new(&configuration::ChainConfig {
            api_url: api_url.to_string(),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn endpoint_encodes_denoms_as_one_segment() {
        let client = client("http://node:1317");
        let url = client
            .endpoint(&["provenance", "marker", "v1", "detail", "ibc/27394FB0"])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "http://node:1317/provenance/marker/v1/detail/ibc%2F27394FB0"
        );
    }

    #[test]
    fn endpoint_keeps_base_path() {
        let client = client("http://node:1317/gateway/");
        let url = client.endpoint(&["cosmos", "gov", "v1", "proposals", "4"]).unwrap();
        assert_eq!(url.as_str(), "http://node:1317/gateway/cosmos/gov/v1/proposals/4");
    }

    #[test]
    fn module_account_number_is_read_from_base_account() {
        let body = json!({
            "account": {
                "@type": "/cosmos.auth.v1beta1.ModuleAccount",
                "base_account": {"address": "pb1module", "account_number": "7"},
                "name": "distribution"
            }
        });
        let account = parse_account(&body, "pb1module", 40).unwrap();
        assert_eq!(account.account_type, "/cosmos.auth.v1beta1.ModuleAccount");
        assert_eq!(account.account_number, Some(7));
        assert_eq!(account.height, 40);
    }

    #[test]
    fn marker_prefers_bank_supply() {
        let body = json!({
            "marker": {
                "base_account": {"address": "pb1marker"},
                "denom": "nhash",
                "marker_type": "MARKER_TYPE_COIN",
                "status": "MARKER_STATUS_ACTIVE",
                "supply": "100"
            }
        });
        let supply = json!({"amount": {"denom": "nhash", "amount": "250"}});
        let marker = parse_marker(&body, Some(&supply), "nhash", 3).unwrap();
        assert_eq!(marker.supply.as_deref(), Some("250"));
        assert_eq!(marker.marker_address.as_deref(), Some("pb1marker"));

        let marker = parse_marker(&body, None, "nhash", 3).unwrap();
        assert_eq!(marker.supply.as_deref(), Some("100"));
    }

    #[test]
    fn channel_counterparty_and_connection() {
        let body = json!({
            "channel": {
                "state": "STATE_OPEN",
                "counterparty": {"port_id": "transfer", "channel_id": "channel-141"},
                "connection_hops": ["connection-12"]
            }
        });
        let key = IbcChannelKey::new("transfer", "channel-7");
        let channel = parse_channel(&body, &key).unwrap();
        assert_eq!(channel.counterparty, Some(IbcChannelKey::new("transfer", "channel-141")));
        assert_eq!(channel.connection.as_deref(), Some("connection-12"));
        assert_eq!(channel.state, "STATE_OPEN");
    }

    #[test]
    fn proposal_without_status_is_malformed() {
        let body = json!({"proposal": {"id": "3", "title": "Upgrade"}});
        assert!(matches!(parse_proposal(&body, 3), Err(ChainError::Malformed(_))));

        let body = json!({"proposal": {"id": "3", "status": "PROPOSAL_STATUS_PASSED", "title": "Upgrade"}});
        let refresh = parse_proposal(&body, 3).unwrap();
        assert_eq!(refresh.status, "PROPOSAL_STATUS_PASSED");
        assert_eq!(refresh.title.as_deref(), Some("Upgrade"));
    }

    #[test]
    fn pagination_total_accepts_strings() {
        assert_eq!(parse_total(&json!({"pagination": {"total": "12"}})), Some(12));
        assert_eq!(parse_total(&json!({"total": 3})), Some(3));
        assert_eq!(parse_total(&json!({})), None);
    }

    #[test]
    fn pages_accumulate_until_reported_total() {
        let mut pages = TxPages::new(40, 3);
        assert!(!pages.is_complete());

        pages
            .push_page(json!({"tx_responses": [{"txhash": "A"}, {"txhash": "B"}], "pagination": {"total": "3"}}))
            .unwrap();
        assert!(!pages.is_complete());
        assert_eq!(pages.offset(), 2);

        pages
            .push_page(json!({"tx_responses": [{"txhash": "C"}], "pagination": {"total": "3"}}))
            .unwrap();
        assert!(pages.is_complete());

        let hashes: Vec<_> = pages
            .finish()
            .unwrap()
            .iter()
            .filter_map(|tx| tx["txhash"].as_str().map(str::to_string))
            .collect();
        assert_eq!(hashes, vec!["A", "B", "C"]);
    }

    #[test]
    fn empty_page_before_total_is_malformed() {
        let mut pages = TxPages::new(40, 3);
        pages
            .push_page(json!({"tx_responses": [{"txhash": "A"}], "pagination": {"total": "3"}}))
            .unwrap();
        let result = pages.push_page(json!({"tx_responses": [], "pagination": {"total": "3"}}));
        assert!(matches!(result, Err(ChainError::Malformed(_))));
    }

    #[test]
    fn zero_total_needs_no_request_and_mismatch_is_malformed() {
        let pages = TxPages::new(40, 0);
        assert!(pages.is_complete());
        assert_eq!(pages.finish().unwrap(), Vec::<Value>::new());

        let mut pages = TxPages::new(40, 2);
        pages
            .push_page(json!({"tx_responses": [], "pagination": {"total": "0"}}))
            .unwrap();
        assert!(pages.is_complete());
        assert!(matches!(pages.finish(), Err(ChainError::Malformed(_))));
    }

    #[test]
    fn missing_total_falls_back_to_declared_count() {
        let mut pages = TxPages::new(40, 2);
        pages
            .push_page(json!({"tx_responses": [{"txhash": "A"}, {"txhash": "B"}]}))
            .unwrap();
        assert!(pages.is_complete());
        assert_eq!(pages.finish().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn marker_lookup_reports_unreachable_node() {
        let client = GrpcGatewayClient::new(&configuration::ChainConfig {
            api_url: "http://127.0.0.1:9".to_string(),
            max_retries: 0,
            request_timeout_ms: 500,
            ..Default::default()
        })
        .unwrap();
        let result = client.marker("nhash", 5).await;
        assert!(matches!(result, Err(ChainError::Unavailable(_))));
    }
}
