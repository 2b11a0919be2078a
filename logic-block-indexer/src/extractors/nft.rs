use explorer_primitives::NftScopeRecord;

use crate::extractors::{
    is_bech32_with_hrp, str_field, walk_strings, Extractor, ExtractorError, TxContext,
    TxExtraction,
};
use crate::msg_types::MsgKind;

/// Human readable parts of metadata addresses. The first four are tracked as scope rows.
const SCOPE_HRPS: [&str; 4] = ["scope", "scopespec", "contractspec", "recspec"];
const OTHER_HRPS: [&str; 2] = ["session", "record"];

const METADATA_EVENT_PREFIX: &str = "provenance.metadata.v1.Event";
const METADATA_EVENT_ATTRIBUTES: [&str; 6] = [
    "scope_addr",
    "session_addr",
    "record_addr",
    "contract_specification_addr",
    "scope_specification_addr",
    "record_specification_addr",
];

fn is_scope_address(value: &str) -> bool {
    SCOPE_HRPS.iter().any(|hrp| is_bech32_with_hrp(value, hrp))
}

fn is_metadata_address(value: &str) -> bool {
    is_scope_address(value) || OTHER_HRPS.iter().any(|hrp| is_bech32_with_hrp(value, hrp))
}

/// Joins transactions to the metadata (scope, session, record, specification) they touch
pub(crate) struct NftExtractor;

impl NftExtractor {
    fn add(ctx: &TxContext<'_>, value: &str, out: &mut TxExtraction) {
        if !is_metadata_address(value) {
            return;
        }
        out.write_set.nfts.insert(value.to_string());
        if is_scope_address(value) {
            out.write_set
                .nft_scopes
                .entry(value.to_string())
                .or_insert_with(|| NftScopeRecord {
                    address: value.to_string(),
                    deleted: false,
                    height: ctx.height,
                });
        }
    }
}

impl Extractor for NftExtractor {
    fn name(&self) -> &'static str {
        "nft"
    }

    fn extract(&self, ctx: &TxContext<'_>, out: &mut TxExtraction) -> Result<(), ExtractorError> {
        for message in &ctx.messages {
            walk_strings(message.body, &mut |value| Self::add(ctx, value, out));
        }
        for event in ctx.events() {
            if !event.kind.starts_with(METADATA_EVENT_PREFIX) {
                continue;
            }
            for attribute in METADATA_EVENT_ATTRIBUTES {
                for value in event.attrs(attribute) {
                    Self::add(ctx, value, out);
                }
            }
        }

        if ctx.is_success() {
            for message in ctx.messages_of(MsgKind::MetadataDelete) {
                let Some(address) = str_field(message.body, "/scope_id")
                    .or_else(|| str_field(message.body, "/specification_id"))
                    .filter(|address| is_scope_address(address))
                else {
                    continue;
                };
                out.write_set.nfts.insert(address.to_string());
                out.write_set.nft_scopes.insert(
                    address.to_string(),
                    NftScopeRecord {
                        address: address.to_string(),
                        deleted: true,
                        height: ctx.height,
                    },
                );
            }
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

    const SCOPE: &str = "scope1qzge0zaztu65tx5x5llv5xc9ztsqxlkwel";
    const SESSION: &str = "session1qxge0zaztu65tx5x5llv5xc9zts9sqlch3sxwn44j4jvhdpsnazf9q";

    #[test]
    fn scope_from_message_and_session_from_event() {
        let tx = tx_response(json!({
            "height": "10",
            "txhash": "WRITE",
            "tx": {"body": {"messages": [{
                "@type": "/provenance.metadata.v1.MsgWriteScopeRequest",
                "scope": {"scope_id": SCOPE, "owners": [{"address": ACCOUNT}]},
                "signers": [ACCOUNT]
            }]}},
            "events": [{"type": "provenance.metadata.v1.EventSessionCreated", "attributes": [
                {"key": "session_addr", "value": format!("\"{}\"", SESSION)},
                {"key": "scope_addr", "value": format!("\"{}\"", SCOPE)}
            ]}]
        }));
        let out = run(&NftExtractor, &tx).unwrap();
        assert_eq!(
            out.write_set.nfts.iter().cloned().collect::<Vec<_>>(),
            vec![SCOPE.to_string(), SESSION.to_string()]
        );
        assert_eq!(out.write_set.nft_scopes.len(), 1);
        assert!(!out.write_set.nft_scopes[SCOPE].deleted);
    }

    #[test]
    fn delete_marks_scope_deleted() {
        let tx = tx_response(json!({
            "height": "12",
            "txhash": "DELETE",
            "tx": {"body": {"messages": [{
                "@type": "/provenance.metadata.v1.MsgDeleteScopeRequest",
                "scope_id": SCOPE,
                "signers": [ACCOUNT]
            }]}}
        }));
        let out = run(&NftExtractor, &tx).unwrap();
        let scope = &out.write_set.nft_scopes[SCOPE];
        assert!(scope.deleted);
        assert_eq!(scope.height, 12);
    }
}
