//! Registry of the message type URLs the extractors act on.
//!
//! Anything not listed resolves to [`MsgKind::Other`]: it is still stored with its
//! derived `(type, module)` pair, but no extractor has a dedicated handler for it.

use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GovVersion {
    V1Beta1,
    V1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MsgKind {
    AuthzExec,
    GovSubmitProposal(GovVersion),
    GovVote(GovVersion),
    GovVoteWeighted(GovVersion),
    GovDeposit(GovVersion),
    IbcTransfer,
    /// Provenance wrapper carrying a `MsgTransfer` in its `transfer` field
    IbcTransferWrapped,
    IbcRecvPacket,
    IbcAcknowledgement,
    IbcTimeout,
    IbcTimeoutOnClose,
    IbcChannelOp,
    NameBind,
    NameDelete,
    WasmStoreCode,
    WasmInstantiate,
    WasmExecute,
    WasmMigrate,
    WasmAdmin,
    MetadataDelete,
    Other,
}

const GOV_ACTIONS: [&str; 4] = ["MsgSubmitProposal", "MsgVote", "MsgVoteWeighted", "MsgDeposit"];

lazy_static! {
    static ref HANDLERS: HashMap<&'static str, MsgKind> = {
        use GovVersion::{V1Beta1, V1};
        HashMap::from([
            ("/cosmos.authz.v1beta1.MsgExec", MsgKind::AuthzExec),
            ("/cosmos.gov.v1beta1.MsgSubmitProposal", MsgKind::GovSubmitProposal(V1Beta1)),
            ("/cosmos.gov.v1.MsgSubmitProposal", MsgKind::GovSubmitProposal(V1)),
            ("/cosmos.gov.v1beta1.MsgVote", MsgKind::GovVote(V1Beta1)),
            ("/cosmos.gov.v1.MsgVote", MsgKind::GovVote(V1)),
            ("/cosmos.gov.v1beta1.MsgVoteWeighted", MsgKind::GovVoteWeighted(V1Beta1)),
            ("/cosmos.gov.v1.MsgVoteWeighted", MsgKind::GovVoteWeighted(V1)),
            ("/cosmos.gov.v1beta1.MsgDeposit", MsgKind::GovDeposit(V1Beta1)),
            ("/cosmos.gov.v1.MsgDeposit", MsgKind::GovDeposit(V1)),
            ("/ibc.applications.transfer.v1.MsgTransfer", MsgKind::IbcTransfer),
            ("/provenance.ibchooks.v1.MsgIbcTransferRequest", MsgKind::IbcTransferWrapped),
            ("/ibc.core.channel.v1.MsgRecvPacket", MsgKind::IbcRecvPacket),
            ("/ibc.core.channel.v1.MsgAcknowledgement", MsgKind::IbcAcknowledgement),
            ("/ibc.core.channel.v1.MsgTimeout", MsgKind::IbcTimeout),
            ("/ibc.core.channel.v1.MsgTimeoutOnClose", MsgKind::IbcTimeoutOnClose),
            ("/ibc.core.channel.v1.MsgChannelOpenInit", MsgKind::IbcChannelOp),
            ("/ibc.core.channel.v1.MsgChannelOpenTry", MsgKind::IbcChannelOp),
            ("/ibc.core.channel.v1.MsgChannelOpenAck", MsgKind::IbcChannelOp),
            ("/ibc.core.channel.v1.MsgChannelOpenConfirm", MsgKind::IbcChannelOp),
            ("/ibc.core.channel.v1.MsgChannelCloseInit", MsgKind::IbcChannelOp),
            ("/ibc.core.channel.v1.MsgChannelCloseConfirm", MsgKind::IbcChannelOp),
            ("/provenance.name.v1.MsgBindNameRequest", MsgKind::NameBind),
            ("/provenance.name.v1.MsgDeleteNameRequest", MsgKind::NameDelete),
            ("/cosmwasm.wasm.v1.MsgStoreCode", MsgKind::WasmStoreCode),
            ("/cosmwasm.wasm.v1.MsgInstantiateContract", MsgKind::WasmInstantiate),
            ("/cosmwasm.wasm.v1.MsgInstantiateContract2", MsgKind::WasmInstantiate),
            ("/cosmwasm.wasm.v1.MsgExecuteContract", MsgKind::WasmExecute),
            ("/cosmwasm.wasm.v1.MsgMigrateContract", MsgKind::WasmMigrate),
            ("/cosmwasm.wasm.v1.MsgUpdateAdmin", MsgKind::WasmAdmin),
            ("/cosmwasm.wasm.v1.MsgClearAdmin", MsgKind::WasmAdmin),
            ("/provenance.metadata.v1.MsgDeleteScopeRequest", MsgKind::MetadataDelete),
            ("/provenance.metadata.v1.MsgDeleteScopeSpecificationRequest", MsgKind::MetadataDelete),
            ("/provenance.metadata.v1.MsgDeleteContractSpecificationRequest", MsgKind::MetadataDelete),
            ("/provenance.metadata.v1.MsgDeleteRecordSpecificationRequest", MsgKind::MetadataDelete),
        ])
    };
}

pub fn kind_of(type_url: &str) -> MsgKind {
    HANDLERS.get(type_url).copied().unwrap_or(MsgKind::Other)
}

/// `@type` of a JSON-encoded `Any`
pub fn type_url(message: &serde_json::Value) -> &str {
    message
        .get("@type")
        .and_then(serde_json::Value::as_str)
        .unwrap_or_default()
}

/// A governance action of a gov module version the registry has no handler for
pub fn is_unsupported_gov_action(type_url: &str) -> bool {
    if !type_url.starts_with("/cosmos.gov.") || kind_of(type_url) != MsgKind::Other {
        return false;
    }
    type_url
        .rsplit('.')
        .next()
        .is_some_and(|action| GOV_ACTIONS.contains(&action))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn gov_versions_are_distinguished() {
        assert_eq!(
            kind_of("/cosmos.gov.v1beta1.MsgVote"),
            MsgKind::GovVote(GovVersion::V1Beta1)
        );
        assert_eq!(kind_of("/cosmos.gov.v1.MsgVote"), MsgKind::GovVote(GovVersion::V1));
    }

    #[test]
    fn unknown_urls_fall_back_to_other() {
        assert_eq!(kind_of("/cosmos.bank.v1beta1.MsgSend"), MsgKind::Other);
        assert_eq!(kind_of("/synthetic.unknown.v1.Thing"), MsgKind::Other);
    }

    #[test]
    fn detects_unsupported_gov_versions() {
        assert!(is_unsupported_gov_action("/cosmos.gov.v2.MsgVote"));
        assert!(is_unsupported_gov_action("/cosmos.gov.v2alpha1.MsgSubmitProposal"));
        assert!(!is_unsupported_gov_action("/cosmos.gov.v1.MsgVote"));
        assert!(!is_unsupported_gov_action("/cosmos.gov.v1.MsgUpdateParams"));
        assert!(!is_unsupported_gov_action("/cosmos.bank.v1beta1.MsgSend"));
    }

    #[test]
    fn every_registered_url_derives_a_known_type() {
        for type_url in HANDLERS.keys() {
            let record = explorer_primitives::MsgTypeRecord::from_type_url(type_url);
            assert!(!record.is_unknown(), "{}", type_url);
        }
    }
}
