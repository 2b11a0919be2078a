use explorer_primitives::{AddressJoin, AddressType};

use crate::extractors::{
    is_bech32_with_hrp, walk_strings, Extractor, ExtractorError, LookupRequest, TxContext,
    TxExtraction,
};

/// Events whose attributes carry participant addresses, matched by exact type
const ADDRESS_EVENTS: &[(&str, &[&str])] = &[
    ("transfer", &["sender", "recipient"]),
    ("message", &["sender"]),
    ("fungible_token_packet", &["receiver"]),
    ("provenance.name.v1.EventNameBound", &["address"]),
    ("cosmos.authz.v1beta1.EventGrant", &["granter", "grantee"]),
    ("cosmos.authz.v1beta1.EventRevoke", &["granter", "grantee"]),
    ("cosmos.group.v1.EventCreateGroupPolicy", &["address"]),
    ("cosmos.group.v1.EventUpdateGroupPolicy", &["address"]),
    ("cosmos.group.v1.EventLeaveGroup", &["address"]),
];

/// Event families matched by type prefix
const ADDRESS_EVENT_FAMILIES: &[(&str, &[&str])] = &[
    (
        "provenance.marker.v1.EventMarker",
        &["administrator", "to_address", "from_address", "manager", "remove_address"],
    ),
    ("provenance.attribute.v1.EventAttribute", &["account", "owner"]),
];

fn address_attributes(event_type: &str) -> &'static [&'static str] {
    ADDRESS_EVENTS
        .iter()
        .find(|(kind, _)| *kind == event_type)
        .or_else(|| {
            ADDRESS_EVENT_FAMILIES
                .iter()
                .find(|(prefix, _)| event_type.starts_with(prefix))
        })
        .map(|(_, attributes)| *attributes)
        .unwrap_or_default()
}

/// Records every account and validator operator the transaction touches
pub(crate) struct AddressExtractor;

impl AddressExtractor {
    fn classify(ctx: &TxContext<'_>, value: &str) -> Option<AddressType> {
        if is_bech32_with_hrp(value, ctx.operator_prefix) {
            Some(AddressType::Validator)
        } else if is_bech32_with_hrp(value, ctx.account_prefix) {
            Some(AddressType::Account)
        } else {
            None
        }
    }

    fn add(ctx: &TxContext<'_>, value: &str, out: &mut TxExtraction) {
        let Some(address_type) = Self::classify(ctx, value) else {
            return;
        };
        let inserted = out.write_set.addresses.insert(AddressJoin {
            address: value.to_string(),
            address_type,
        });
        if inserted {
            out.lookups.insert(match address_type {
                AddressType::Validator => LookupRequest::Validator(value.to_string()),
                AddressType::Account => LookupRequest::Account(value.to_string()),
            });
        }
    }
}

impl Extractor for AddressExtractor {
    fn name(&self) -> &'static str {
        "address"
    }

    fn extract(&self, ctx: &TxContext<'_>, out: &mut TxExtraction) -> Result<(), ExtractorError> {
        for message in &ctx.messages {
            walk_strings(message.body, &mut |value| Self::add(ctx, value, out));
        }
        for event in ctx.events() {
            for attribute in address_attributes(&event.kind) {
                for value in event.attrs(attribute) {
                    Self::add(ctx, value, out);
                }
            }
        }
        for signer in ctx.tx.signer_addresses() {
            Self::add(ctx, &signer, out);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::extractors::tests::{run, tx_response, ACCOUNT, OPERATOR, OTHER_ACCOUNT};

    #[test]
    fn one_join_per_address_across_messages_and_events() {
        let tx = tx_response(json!({
            "height": "10",
            "txhash": "SEND",
            "tx": {"body": {"messages": [{
                "@type": "/cosmos.bank.v1beta1.MsgSend",
                "from_address": ACCOUNT,
                "to_address": OTHER_ACCOUNT,
                "amount": [{"denom": "nhash", "amount": "10"}]
            }]}},
            "events": [
                {"type": "message", "attributes": [{"key": "sender", "value": ACCOUNT}]},
                {"type": "transfer", "attributes": [
                    {"key": "sender", "value": ACCOUNT},
                    {"key": "recipient", "value": OTHER_ACCOUNT}
                ]},
                {"type": "coin_spent", "attributes": [{"key": "spender", "value": ACCOUNT}]},
                {"type": "tx", "attributes": [{"key": "acc_seq", "value": format!("{}/3", ACCOUNT)}]}
            ]
        }));
        let out = run(&AddressExtractor, &tx).unwrap();
        let joins: Vec<&str> = out
            .write_set
            .addresses
            .iter()
            .map(|join| join.address.as_str())
            .collect();
        assert_eq!(joins, {
            let mut expected = vec![ACCOUNT, OTHER_ACCOUNT];
            expected.sort();
            expected
        });
        assert_eq!(out.lookups.len(), 2);
    }

    #[test]
    fn operators_become_validator_references() {
        let tx = tx_response(json!({
            "height": "10",
            "txhash": "DELEGATE",
            "tx": {"body": {"messages": [{
                "@type": "/cosmos.staking.v1beta1.MsgDelegate",
                "delegator_address": ACCOUNT,
                "validator_address": OPERATOR
            }]}},
            "events": [{"type": "provenance.marker.v1.EventMarkerTransfer", "attributes": [
                {"key": "to_address", "value": format!("\"{}\"", OTHER_ACCOUNT)}
            ]}]
        }));
        let out = run(&AddressExtractor, &tx).unwrap();
        assert!(out.write_set.addresses.contains(&AddressJoin {
            address: OPERATOR.to_string(),
            address_type: AddressType::Validator,
        }));
        assert!(out.lookups.contains(&LookupRequest::Validator(OPERATOR.to_string())));
        assert!(out.lookups.contains(&LookupRequest::Account(OTHER_ACCOUNT.to_string())));
        assert!(!out.lookups.contains(&LookupRequest::Account(OPERATOR.to_string())));
    }
}
