//! Resolves the reference entities a block's transactions point at.
//!
//! Lookups of all transactions are merged so every entity is fetched at most once
//! per block. Entities already stored are not fetched again unless the block is
//! forced. A lookup the node cannot answer still yields a minimal row so the join
//! rows have something to point at, and is reported as a non-blocking failure.

use std::collections::{BTreeSet, HashSet};
use std::fmt::Display;
use std::future::Future;

use database::{IndexerDbManager, ReferenceKind};
use explorer_primitives::{
    AccountRecord, BlockHeight, IbcChannelKey, IbcChannelRecord, MarkerRecord, ReferenceWrites,
    SmCodeRecord, SmContractRecord, StakingValidatorRecord,
};

use crate::chain_client::{ChainReader, ChainResult};
use crate::extractors::LookupRequest;

/// Type and status of a reference row whose chain detail could not be fetched
pub(crate) const UNRESOLVED: &str = "UNRESOLVED";

#[derive(Debug, Default)]
pub(crate) struct Enrichment {
    pub references: ReferenceWrites,
    pub failures: Vec<String>,
}

struct Resolved<K, T> {
    key: K,
    stored: bool,
    result: ChainResult<Option<T>>,
}

async fn resolve<D, K, T, F, Fut>(
    db: &D,
    kind: ReferenceKind,
    keys: Vec<K>,
    refetch_existing: bool,
    forced: Option<&HashSet<String>>,
    fetch: F,
) -> anyhow::Result<Vec<Resolved<K, T>>>
where
    D: IndexerDbManager + Sync,
    K: Display + Clone,
    F: Fn(K) -> Fut,
    Fut: Future<Output = ChainResult<Option<T>>>,
{
    if keys.is_empty() {
        return Ok(vec![]);
    }
    let names: Vec<String> = keys.iter().map(ToString::to_string).collect();
    let stored = db.existing_references(kind, &names).await?;
    let to_fetch: Vec<(K, bool)> = keys
        .into_iter()
        .zip(names)
        .filter_map(|(key, name)| {
            let is_stored = stored.contains(&name);
            let is_forced = forced.map_or(false, |forced| forced.contains(&name));
            (refetch_existing || !is_stored || is_forced).then_some((key, is_stored))
        })
        .collect();
    let results =
        futures::future::join_all(to_fetch.iter().map(|(key, _)| fetch(key.clone()))).await;
    Ok(to_fetch
        .into_iter()
        .zip(results)
        .map(|((key, stored), result)| Resolved {
            key,
            stored,
            result,
        })
        .collect())
}

fn settle<K: Display, T>(
    what: &str,
    resolved: Vec<Resolved<K, T>>,
    failures: &mut Vec<String>,
    minimal: impl Fn(&K) -> T,
    mut insert: impl FnMut(K, T),
) {
    for Resolved {
        key,
        stored,
        result,
    } in resolved
    {
        match result {
            Ok(Some(record)) => insert(key, record),
            Ok(None) => {
                if !stored {
                    let record = minimal(&key);
                    insert(key, record);
                }
            }
            Err(err) => {
                failures.push(format!("{} {}: {}", what, key, err));
                if !stored {
                    let record = minimal(&key);
                    insert(key, record);
                }
            }
        }
    }
}

#[cfg_attr(
    feature = "tracing-instrumentation",
    tracing::instrument(skip_all, fields(height = height, lookups = lookups.len()))
)]
pub(crate) async fn enrich<C, D>(
    chain: &C,
    db: &D,
    height: BlockHeight,
    lookups: &BTreeSet<LookupRequest>,
    refetch_existing: bool,
) -> anyhow::Result<Enrichment>
where
    C: ChainReader + Sync,
    D: IndexerDbManager + Sync,
{
    let mut accounts = vec![];
    let mut validators = vec![];
    let mut markers = BTreeSet::new();
    let mut marker_refreshes = HashSet::new();
    let mut codes = vec![];
    let mut contracts = vec![];
    let mut channels = vec![];
    let mut proposal_ids = vec![];
    for lookup in lookups {
        match lookup {
            LookupRequest::Account(address) => accounts.push(address.clone()),
            LookupRequest::Validator(operator) => validators.push(operator.clone()),
            LookupRequest::Marker(denom) => {
                markers.insert(denom.clone());
            }
            LookupRequest::MarkerRefresh(denom) => {
                markers.insert(denom.clone());
                marker_refreshes.insert(denom.clone());
            }
            LookupRequest::Code(code_id) => codes.push(*code_id),
            LookupRequest::Contract(address) => contracts.push(address.clone()),
            LookupRequest::Channel(channel) => channels.push(channel.clone()),
            LookupRequest::Proposal(proposal_id) => proposal_ids.push(*proposal_id),
        }
    }

    let (accounts, validators, markers, codes, contracts, channels, proposals) = futures::join!(
        resolve(
            db,
            ReferenceKind::Account,
            accounts,
            refetch_existing,
            None,
            move |address: String| async move { chain.account(&address, height).await },
        ),
        resolve(
            db,
            ReferenceKind::Validator,
            validators,
            refetch_existing,
            None,
            move |operator: String| async move {
                chain.staking_validator(&operator, height).await
            },
        ),
        resolve(
            db,
            ReferenceKind::Marker,
            markers.into_iter().collect(),
            refetch_existing,
            Some(&marker_refreshes),
            move |denom: String| async move { chain.marker(&denom, height).await },
        ),
        resolve(
            db,
            ReferenceKind::SmCode,
            codes,
            refetch_existing,
            None,
            move |code_id: u64| async move { chain.sm_code(code_id, height).await },
        ),
        resolve(
            db,
            ReferenceKind::SmContract,
            contracts,
            refetch_existing,
            None,
            move |address: String| async move { chain.sm_contract(&address, height).await },
        ),
        resolve(
            db,
            ReferenceKind::IbcChannel,
            channels,
            refetch_existing,
            None,
            move |channel: IbcChannelKey| async move { chain.ibc_channel(&channel).await },
        ),
        futures::future::join_all(
            proposal_ids
                .iter()
                .map(|proposal_id| chain.gov_proposal(*proposal_id))
        ),
    );

    let mut enrichment = Enrichment::default();
    let references = &mut enrichment.references;
    let failures = &mut enrichment.failures;
    settle(
        "account",
        accounts?,
        failures,
        |address| AccountRecord {
            address: address.clone(),
            account_type: UNRESOLVED.to_string(),
            account_number: None,
            data: None,
            height,
        },
        |address, account| {
            references.accounts.insert(address, account);
        },
    );
    settle(
        "validator",
        validators?,
        failures,
        |operator| StakingValidatorRecord {
            operator_address: operator.clone(),
            consensus_pubkey: None,
            moniker: String::new(),
            status: UNRESOLVED.to_string(),
            jailed: false,
            tokens: "0".to_string(),
            data: None,
            height,
        },
        |operator, validator| {
            references.validators.insert(operator, validator);
        },
    );
    settle(
        "marker",
        markers?,
        failures,
        |denom| MarkerRecord {
            denom: denom.clone(),
            marker_address: None,
            marker_type: UNRESOLVED.to_string(),
            status: UNRESOLVED.to_string(),
            supply: None,
            data: None,
            height,
        },
        |denom, marker| {
            references.markers.insert(denom, marker);
        },
    );
    settle(
        "code",
        codes?,
        failures,
        |code_id| SmCodeRecord {
            code_id: *code_id,
            creator: None,
            data_hash: None,
            data: None,
            height,
        },
        |code_id, code| {
            references.sm_codes.insert(code_id, code);
        },
    );
    settle(
        "contract",
        contracts?,
        failures,
        |address| SmContractRecord {
            contract_address: address.clone(),
            code_id: None,
            creator: None,
            admin: None,
            label: None,
            data: None,
            height,
        },
        |address, contract| {
            references.sm_contracts.insert(address, contract);
        },
    );
    settle(
        "channel",
        channels?,
        failures,
        |channel| IbcChannelRecord {
            key: channel.clone(),
            counterparty: None,
            state: UNRESOLVED.to_string(),
            connection: None,
            data: None,
        },
        |channel, record| {
            references.channels.insert(channel, record);
        },
    );
    for (proposal_id, result) in proposal_ids.iter().zip(proposals) {
        match result {
            Ok(Some(refresh)) => {
                references.proposal_refreshes.insert(*proposal_id, refresh);
            }
            Ok(None) => {}
            Err(err) => failures.push(format!("proposal {}: {}", proposal_id, err)),
        }
    }
    Ok(enrichment)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use database::MemoryDbManager;
    use explorer_primitives::{BlockRecord, BlockWriteSet, WatermarkAdvance};
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::test_support::{self, FakeChain, SENDER};

    fn lookups() -> BTreeSet<LookupRequest> {
        BTreeSet::from([
            LookupRequest::Account(SENDER.to_string()),
            LookupRequest::MarkerRefresh("nhash".to_string()),
            LookupRequest::Marker("nhash".to_string()),
            LookupRequest::Proposal(3),
        ])
    }

    #[tokio::test]
    async fn merged_lookups_are_fetched_once() {
        let chain = FakeChain::new(10);
        let db = MemoryDbManager::new_empty();

        let enrichment = enrich(&chain, &db, 10, &lookups(), false).await.unwrap();
        assert!(enrichment.failures.is_empty());
        assert_eq!(chain.lookups_of("nhash"), 1);
        assert_eq!(chain.lookups_of("proposal/3"), 1);
        let account = &enrichment.references.accounts[SENDER];
        assert_eq!(account.account_number, Some(7));
        assert_eq!(enrichment.references.markers["nhash"].status, "MARKER_STATUS_ACTIVE");
        assert!(enrichment.references.proposal_refreshes.is_empty());
    }

    #[tokio::test]
    async fn failed_lookups_yield_minimal_rows_and_notes() {
        let chain = FakeChain::new(10);
        chain.set_failing_lookups(true);
        let db = MemoryDbManager::new_empty();

        let enrichment = enrich(&chain, &db, 10, &lookups(), false).await.unwrap();
        assert_eq!(enrichment.failures.len(), 3);
        assert_eq!(enrichment.references.accounts[SENDER].account_type, UNRESOLVED);
        assert_eq!(enrichment.references.markers["nhash"].marker_type, UNRESOLVED);
        assert_eq!(enrichment.references.accounts[SENDER].height, 10);
    }

    #[tokio::test]
    async fn stored_references_are_skipped_unless_refresh_is_requested() {
        let chain = FakeChain::new(10);
        let db = MemoryDbManager::new_empty();
        let enrichment = enrich(&chain, &db, 10, &lookups(), false).await.unwrap();
        db.commit_block(
            &BlockWriteSet {
                block: BlockRecord {
                    height: 10,
                    hash: "HASH10".to_string(),
                    timestamp: test_support::genesis(),
                    tx_count: 0,
                    raw: serde_json::json!({}),
                },
                proposer: None,
                validator_set: None,
                transactions: vec![],
                references: enrichment.references,
                msg_types: BTreeMap::new(),
                non_blocking_failures: vec![],
                replace_existing: false,
            },
            WatermarkAdvance::None,
        )
        .await
        .unwrap();

        enrich(&chain, &db, 11, &lookups(), false).await.unwrap();
        assert_eq!(chain.lookups_of(SENDER), 1);
        assert_eq!(chain.lookups_of("nhash"), 2);

        let plain = BTreeSet::from([LookupRequest::Marker("nhash".to_string())]);
        let enrichment = enrich(&chain, &db, 12, &plain, false).await.unwrap();
        assert_eq!(chain.lookups_of("nhash"), 2);
        assert!(enrichment.references.markers.is_empty());
    }
}
