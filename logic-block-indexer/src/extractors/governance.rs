//! Proposals, votes and deposits of both gov module versions, normalized to one shape.

use std::collections::HashMap;

use explorer_primitives::{
    DepositType, GovDepositRecord, GovProposalRecord, GovVoteRecord, WeightedVoteOption,
};
use serde_json::Value;

use crate::extractors::{
    str_field, u64_field, Extractor, ExtractorError, LookupRequest, MessageRef, TxContext,
    TxExtraction,
};
use crate::msg_types::{self, GovVersion, MsgKind};

const SUBMIT_PROPOSAL_EVENT: &str = "submit_proposal";
const INITIAL_STATUS: &str = "PROPOSAL_STATUS_DEPOSIT_PERIOD";
const FULL_WEIGHT: &str = "1.000000000000000000";

pub(crate) struct GovernanceExtractor;

fn message_proposal_id(message: &MessageRef<'_>) -> Result<u64, ExtractorError> {
    u64_field(message.body, "/proposal_id").ok_or_else(|| {
        ExtractorError::Invariant(format!("{} without a valid proposal_id", message.type_url))
    })
}

fn coins(value: &Value, pointer: &str) -> Vec<(String, String)> {
    match value.pointer(pointer) {
        Some(Value::Array(coins)) => coins
            .iter()
            .filter_map(|coin| {
                Some((
                    str_field(coin, "/denom")?.to_string(),
                    str_field(coin, "/amount")?.to_string(),
                ))
            })
            .collect(),
        _ => vec![],
    }
}

impl GovernanceExtractor {
    /// Reads the id assigned by the chain. Several submissions under one top-level
    /// message (authz) are matched to the event occurrences in order.
    fn submitted_proposal_id(
        ctx: &TxContext<'_>,
        message: &MessageRef<'_>,
        seen: &mut HashMap<usize, usize>,
    ) -> Result<u64, ExtractorError> {
        let occurrence = seen.entry(message.index).or_insert(0);
        let id = ctx
            .msg_events(message.index)
            .into_iter()
            .filter(|event| event.kind == SUBMIT_PROPOSAL_EVENT)
            .filter_map(|event| event.attr("proposal_id"))
            .nth(*occurrence)
            .and_then(|id| id.parse::<u64>().ok())
            .ok_or_else(|| {
                ExtractorError::Invariant(format!(
                    "no {} event with a proposal_id for message {} of tx {}",
                    SUBMIT_PROPOSAL_EVENT, message.index, ctx.hash
                ))
            })?;
        *occurrence += 1;
        Ok(id)
    }

    fn submit_proposal(
        ctx: &TxContext<'_>,
        message: &MessageRef<'_>,
        version: GovVersion,
        proposal_id: u64,
        out: &mut TxExtraction,
    ) {
        let body = message.body;
        let (proposal_type, title, description) = match version {
            GovVersion::V1Beta1 => (
                str_field(body, "/content/@type").unwrap_or("text"),
                str_field(body, "/content/title").unwrap_or_default(),
                str_field(body, "/content/description").unwrap_or_default(),
            ),
            GovVersion::V1 => (
                str_field(body, "/messages/0/@type").unwrap_or("text"),
                str_field(body, "/title").unwrap_or_default(),
                str_field(body, "/summary")
                    .or_else(|| str_field(body, "/metadata"))
                    .unwrap_or_default(),
            ),
        };
        let proposer = str_field(body, "/proposer").unwrap_or_default();
        out.write_set.gov_proposals.push(GovProposalRecord {
            proposal_id,
            proposal_type: proposal_type.to_string(),
            title: title.to_string(),
            description: description.to_string(),
            status: INITIAL_STATUS.to_string(),
            proposer: proposer.to_string(),
            data: body.clone(),
            height: ctx.height,
            tx_hash: ctx.hash.to_string(),
            timestamp: ctx.timestamp,
        });
        for (denom, amount) in coins(body, "/initial_deposit") {
            out.write_set.gov_deposits.push(GovDepositRecord {
                proposal_id,
                depositor: proposer.to_string(),
                deposit_type: DepositType::Initial,
                denom,
                amount,
                height: ctx.height,
                tx_hash: ctx.hash.to_string(),
                timestamp: ctx.timestamp,
            });
        }
    }

    fn vote(
        ctx: &TxContext<'_>,
        message: &MessageRef<'_>,
        weighted: bool,
        proposal_id: u64,
        out: &mut TxExtraction,
    ) -> Result<(), ExtractorError> {
        let voter = str_field(message.body, "/voter").ok_or_else(|| {
            ExtractorError::Invariant(format!("{} without a voter", message.type_url))
        })?;
        let options = if weighted {
            match message.body.get("options") {
                Some(Value::Array(options)) => options
                    .iter()
                    .filter_map(|option| {
                        Some(WeightedVoteOption {
                            option: str_field(option, "/option")?.to_string(),
                            weight: str_field(option, "/weight")
                                .unwrap_or(FULL_WEIGHT)
                                .to_string(),
                        })
                    })
                    .collect(),
                _ => vec![],
            }
        } else {
            str_field(message.body, "/option")
                .map(|option| {
                    vec![WeightedVoteOption {
                        option: option.to_string(),
                        weight: FULL_WEIGHT.to_string(),
                    }]
                })
                .unwrap_or_default()
        };
        if options.is_empty() {
            return Err(ExtractorError::Invariant(format!(
                "{} by {} without vote options",
                message.type_url, voter
            )));
        }
        out.write_set.gov_votes.push(GovVoteRecord {
            proposal_id,
            voter: voter.to_string(),
            options,
            is_weighted: weighted,
            height: ctx.height,
            tx_hash: ctx.hash.to_string(),
            timestamp: ctx.timestamp,
        });
        Ok(())
    }

    fn deposit(ctx: &TxContext<'_>, message: &MessageRef<'_>, proposal_id: u64, out: &mut TxExtraction) {
        let depositor = str_field(message.body, "/depositor").unwrap_or_default();
        for (denom, amount) in coins(message.body, "/amount") {
            out.write_set.gov_deposits.push(GovDepositRecord {
                proposal_id,
                depositor: depositor.to_string(),
                deposit_type: DepositType::Deposit,
                denom,
                amount,
                height: ctx.height,
                tx_hash: ctx.hash.to_string(),
                timestamp: ctx.timestamp,
            });
        }
    }
}

impl Extractor for GovernanceExtractor {
    fn name(&self) -> &'static str {
        "governance"
    }

    fn extract(&self, ctx: &TxContext<'_>, out: &mut TxExtraction) -> Result<(), ExtractorError> {
        if !ctx.is_success() {
            return Ok(());
        }
        let mut submissions = HashMap::new();
        for message in &ctx.messages {
            let proposal_id = match message.kind {
                MsgKind::GovSubmitProposal(version) => {
                    let proposal_id = Self::submitted_proposal_id(ctx, message, &mut submissions)?;
                    Self::submit_proposal(ctx, message, version, proposal_id, out);
                    proposal_id
                }
                MsgKind::GovVote(_) => {
                    let proposal_id = message_proposal_id(message)?;
                    Self::vote(ctx, message, false, proposal_id, out)?;
                    proposal_id
                }
                MsgKind::GovVoteWeighted(_) => {
                    let proposal_id = message_proposal_id(message)?;
                    Self::vote(ctx, message, true, proposal_id, out)?;
                    proposal_id
                }
                MsgKind::GovDeposit(_) => {
                    let proposal_id = message_proposal_id(message)?;
                    Self::deposit(ctx, message, proposal_id, out);
                    proposal_id
                }
                _ if msg_types::is_unsupported_gov_action(message.type_url) => {
                    return Err(ExtractorError::Invariant(format!(
                        "unsupported governance schema version: {}",
                        message.type_url
                    )));
                }
                _ => continue,
            };
            out.lookups.insert(LookupRequest::Proposal(proposal_id));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::extractors::tests::{run, tx_response, ACCOUNT};

    #[test]
    fn legacy_and_current_submissions_normalize_to_one_shape() {
        let legacy = tx_response(json!({
            "height": "20",
            "txhash": "LEGACY",
            "tx": {"body": {"messages": [{
                "@type": "/cosmos.gov.v1beta1.MsgSubmitProposal",
                "content": {
                    "@type": "/cosmos.gov.v1beta1.TextProposal",
                    "title": "Raise limits",
                    "description": "More gas"
                },
                "initial_deposit": [{"denom": "nhash", "amount": "1000"}],
                "proposer": ACCOUNT
            }]}},
            "logs": [{"msg_index": 0, "events": [
                {"type": "submit_proposal", "attributes": [{"key": "proposal_id", "value": "41"}]}
            ]}]
        }));
        let current = tx_response(json!({
            "height": "21",
            "txhash": "CURRENT",
            "tx": {"body": {"messages": [{
                "@type": "/cosmos.gov.v1.MsgSubmitProposal",
                "messages": [{"@type": "/cosmos.upgrade.v1beta1.MsgSoftwareUpgrade"}],
                "title": "Upgrade",
                "summary": "Move to v2",
                "initial_deposit": [],
                "proposer": ACCOUNT
            }]}},
            "events": [
                {"type": "submit_proposal", "attributes": [
                    {"key": "proposal_id", "value": "42"},
                    {"key": "msg_index", "value": "0"}
                ]}
            ]
        }));

        let legacy = run(&GovernanceExtractor, &legacy).unwrap();
        let proposal = &legacy.write_set.gov_proposals[0];
        assert_eq!(proposal.proposal_id, 41);
        assert_eq!(proposal.proposal_type, "/cosmos.gov.v1beta1.TextProposal");
        assert_eq!(proposal.title, "Raise limits");
        assert_eq!(legacy.write_set.gov_deposits.len(), 1);
        assert_eq!(legacy.write_set.gov_deposits[0].deposit_type, DepositType::Initial);
        assert!(legacy.lookups.contains(&LookupRequest::Proposal(41)));

        let current = run(&GovernanceExtractor, &current).unwrap();
        let proposal = &current.write_set.gov_proposals[0];
        assert_eq!(proposal.proposal_id, 42);
        assert_eq!(proposal.proposal_type, "/cosmos.upgrade.v1beta1.MsgSoftwareUpgrade");
        assert_eq!(proposal.description, "Move to v2");
        assert!(current.write_set.gov_deposits.is_empty());
    }

    #[test]
    fn missing_proposal_id_event_is_an_invariant_violation() {
        let tx = tx_response(json!({
            "height": "20",
            "txhash": "NOEVENT",
            "tx": {"body": {"messages": [{
                "@type": "/cosmos.gov.v1.MsgSubmitProposal",
                "proposer": ACCOUNT
            }]}}
        }));
        assert!(matches!(
            run(&GovernanceExtractor, &tx),
            Err(ExtractorError::Invariant(_))
        ));
    }

    #[test]
    fn unknown_gov_version_is_an_invariant_violation() {
        let tx = tx_response(json!({
            "height": "20",
            "txhash": "V2",
            "tx": {"body": {"messages": [{
                "@type": "/cosmos.gov.v2.MsgVote",
                "proposal_id": "3",
                "voter": ACCOUNT,
                "option": "VOTE_OPTION_YES"
            }]}}
        }));
        assert!(matches!(
            run(&GovernanceExtractor, &tx),
            Err(ExtractorError::Invariant(_))
        ));
    }

    #[test]
    fn votes_of_both_versions_share_one_shape() {
        let tx = tx_response(json!({
            "height": "22",
            "txhash": "VOTES",
            "tx": {"body": {"messages": [
                {
                    "@type": "/cosmos.gov.v1beta1.MsgVote",
                    "proposal_id": "3",
                    "voter": ACCOUNT,
                    "option": "VOTE_OPTION_YES"
                },
                {
                    "@type": "/cosmos.gov.v1.MsgVoteWeighted",
                    "proposal_id": "4",
                    "voter": ACCOUNT,
                    "options": [
                        {"option": "VOTE_OPTION_YES", "weight": "0.700000000000000000"},
                        {"option": "VOTE_OPTION_NO", "weight": "0.300000000000000000"}
                    ]
                }
            ]}}
        }));
        let out = run(&GovernanceExtractor, &tx).unwrap();
        let votes = &out.write_set.gov_votes;
        assert_eq!(votes.len(), 2);
        assert_eq!(
            votes[0].options,
            vec![WeightedVoteOption {
                option: "VOTE_OPTION_YES".to_string(),
                weight: FULL_WEIGHT.to_string(),
            }]
        );
        assert!(!votes[0].is_weighted);
        assert!(votes[1].is_weighted);
        assert_eq!(votes[1].options.len(), 2);
    }

    #[test]
    fn failed_transactions_are_ignored() {
        let tx = tx_response(json!({
            "height": "22",
            "txhash": "FAILED",
            "code": 3,
            "tx": {"body": {"messages": [{
                "@type": "/cosmos.gov.v1.MsgSubmitProposal",
                "proposer": ACCOUNT
            }]}}
        }));
        let out = run(&GovernanceExtractor, &tx).unwrap();
        assert!(out.write_set.gov_proposals.is_empty());
        assert!(out.lookups.is_empty());
    }
}
