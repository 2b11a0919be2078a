use crate::extractors::{
    str_field, u64_field, Extractor, ExtractorError, LookupRequest, TxContext, TxExtraction,
};
use crate::msg_types::MsgKind;

const CODE_EVENTS: [&str; 4] = ["message", "store_code", "instantiate", "migrate"];
const CONTRACT_EVENTS: [&str; 6] = ["message", "instantiate", "execute", "migrate", "wasm", "update_contract_admin"];
const CONTRACT_ATTRIBUTES: [&str; 2] = ["_contract_address", "contract_address"];

/// Wasm code ids and contract instances touched by the transaction
pub(crate) struct SmartContractExtractor;

impl SmartContractExtractor {
    fn add_code(code_id: u64, out: &mut TxExtraction) {
        if out.write_set.sm_codes.insert(code_id) {
            out.lookups.insert(LookupRequest::Code(code_id));
        }
    }

    fn add_contract(address: &str, out: &mut TxExtraction) {
        if out.write_set.sm_contracts.insert(address.to_string()) {
            out.lookups.insert(LookupRequest::Contract(address.to_string()));
        }
    }
}

impl Extractor for SmartContractExtractor {
    fn name(&self) -> &'static str {
        "smart_contract"
    }

    fn extract(&self, ctx: &TxContext<'_>, out: &mut TxExtraction) -> Result<(), ExtractorError> {
        for message in &ctx.messages {
            match message.kind {
                MsgKind::WasmInstantiate | MsgKind::WasmMigrate => {
                    if let Some(code_id) = u64_field(message.body, "/code_id") {
                        Self::add_code(code_id, out);
                    }
                }
                MsgKind::WasmStoreCode | MsgKind::WasmExecute | MsgKind::WasmAdmin => {}
                _ => continue,
            }
            if let Some(contract) = str_field(message.body, "/contract") {
                Self::add_contract(contract, out);
            }
        }

        for event in ctx.events() {
            if CODE_EVENTS.contains(&event.kind.as_str()) {
                for code_id in event.attrs("code_id").filter_map(|id| id.parse::<u64>().ok()) {
                    Self::add_code(code_id, out);
                }
            }
            if CONTRACT_EVENTS.contains(&event.kind.as_str()) {
                for attribute in CONTRACT_ATTRIBUTES {
                    for contract in event.attrs(attribute).filter(|value| !value.is_empty()) {
                        Self::add_contract(contract, out);
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::extractors::tests::{run, tx_response, ACCOUNT};

    const CONTRACT: &str = "pb14hj2tavq8fpesdwxxcu44rty3hh90vhujrvcmstl4zr3txmfvw9s96lrg8";

    #[test]
    fn codes_and_contracts_from_messages_and_events() {
        let tx = tx_response(json!({
            "height": "40",
            "txhash": "WASM",
            "tx": {"body": {"messages": [
                {"@type": "/cosmwasm.wasm.v1.MsgStoreCode", "sender": ACCOUNT},
                {"@type": "/cosmwasm.wasm.v1.MsgInstantiateContract", "sender": ACCOUNT, "code_id": "7"},
                {"@type": "/cosmwasm.wasm.v1.MsgExecuteContract", "sender": ACCOUNT, "contract": CONTRACT}
            ]}},
            "logs": [
                {"msg_index": 0, "events": [
                    {"type": "store_code", "attributes": [{"key": "code_id", "value": "8"}]}
                ]},
                {"msg_index": 1, "events": [
                    {"type": "instantiate", "attributes": [
                        {"key": "_contract_address", "value": CONTRACT},
                        {"key": "code_id", "value": "7"}
                    ]}
                ]},
                {"msg_index": 2, "events": [
                    {"type": "execute", "attributes": [{"key": "_contract_address", "value": CONTRACT}]}
                ]}
            ]
        }));
        let out = run(&SmartContractExtractor, &tx).unwrap();
        assert_eq!(out.write_set.sm_codes, BTreeSet::from([7, 8]));
        assert_eq!(
            out.write_set.sm_contracts,
            BTreeSet::from([CONTRACT.to_string()])
        );
        assert!(out.lookups.contains(&LookupRequest::Code(8)));
        assert!(out.lookups.contains(&LookupRequest::Contract(CONTRACT.to_string())));
        assert_eq!(out.lookups.len(), 3);
    }

    #[test]
    fn transactions_without_wasm_yield_nothing() {
        let tx = tx_response(json!({
            "height": "40",
            "txhash": "SEND",
            "tx": {"body": {"messages": [{"@type": "/cosmos.bank.v1beta1.MsgSend", "from_address": ACCOUNT}]}},
            "logs": [{"msg_index": 0, "events": [
                {"type": "message", "attributes": [{"key": "sender", "value": ACCOUNT}]}
            ]}]
        }));
        let out = run(&SmartContractExtractor, &tx).unwrap();
        assert!(out.write_set.sm_codes.is_empty());
        assert!(out.lookups.is_empty());
    }
}
