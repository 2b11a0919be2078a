use std::collections::BTreeMap;

use explorer_primitives::{NameAction, NameIntent, NameRecord};
use serde_json::Value;

use crate::extractors::{str_field, Extractor, ExtractorError, TxContext, TxExtraction};
use crate::msg_types::MsgKind;

const NAME_BOUND_EVENT: &str = "provenance.name.v1.EventNameBound";
const NAME_UNBOUND_EVENT: &str = "provenance.name.v1.EventNameUnbound";

type IntentKey = (String, String, NameAction);

/// Name bindings and deletions of successful transactions.
///
/// Messages and the events they emit describe the same change, so intents are
/// keyed by (full name, owner, action) and the event version wins.
pub(crate) struct NameExtractor;

fn bound_name(body: &Value) -> Option<String> {
    let name = str_field(body, "/record/name")?;
    Some(match str_field(body, "/parent/name") {
        Some(parent) => format!("{}.{}", name, parent),
        None => name.to_string(),
    })
}

fn restricted(body: &Value, pointer: &str) -> bool {
    match body.pointer(pointer) {
        Some(Value::Bool(restricted)) => *restricted,
        Some(Value::String(restricted)) => restricted == "true",
        _ => false,
    }
}

impl NameExtractor {
    fn intent(
        ctx: &TxContext<'_>,
        intents: &mut BTreeMap<IntentKey, NameRecord>,
        action: NameAction,
        full_name: &str,
        owner: &str,
        restricted: bool,
    ) {
        intents.insert(
            (full_name.to_string(), owner.to_string(), action),
            NameRecord::new(full_name, owner, restricted, ctx.height),
        );
    }
}

impl Extractor for NameExtractor {
    fn name(&self) -> &'static str {
        "name"
    }

    fn extract(&self, ctx: &TxContext<'_>, out: &mut TxExtraction) -> Result<(), ExtractorError> {
        if !ctx.is_success() {
            return Ok(());
        }
        let mut intents = BTreeMap::new();
        for message in &ctx.messages {
            let action = match message.kind {
                MsgKind::NameBind => NameAction::Bind,
                MsgKind::NameDelete => NameAction::Unbind,
                _ => continue,
            };
            let full_name = match action {
                NameAction::Bind => bound_name(message.body),
                NameAction::Unbind => str_field(message.body, "/record/name").map(str::to_string),
            };
            let owner = str_field(message.body, "/record/address");
            if let (Some(full_name), Some(owner)) = (full_name, owner) {
                let restricted = restricted(message.body, "/record/restricted");
                Self::intent(ctx, &mut intents, action, &full_name, owner, restricted);
            }
        }

        for event in ctx.events() {
            let action = match event.kind.as_str() {
                NAME_BOUND_EVENT => NameAction::Bind,
                NAME_UNBOUND_EVENT => NameAction::Unbind,
                _ => continue,
            };
            if let (Some(full_name), Some(owner)) = (event.attr("name"), event.attr("address")) {
                let restricted = event.attr("restricted") == Some("true");
                Self::intent(ctx, &mut intents, action, full_name, owner, restricted);
            }
        }

        out.write_set
            .names
            .extend(intents.into_iter().map(|((_, _, action), name)| NameIntent { action, name }));
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
    fn message_and_event_collapse_to_one_intent() {
        let tx = tx_response(json!({
            "height": "50",
            "txhash": "BIND",
            "tx": {"body": {"messages": [{
                "@type": "/provenance.name.v1.MsgBindNameRequest",
                "record": {"name": "alice", "address": ACCOUNT, "restricted": false},
                "parent": {"name": "sc.pb", "address": ACCOUNT}
            }]}},
            "events": [{"type": "provenance.name.v1.EventNameBound", "attributes": [
                {"key": "address", "value": format!("\"{}\"", ACCOUNT)},
                {"key": "name", "value": "\"alice.sc.pb\""},
                {"key": "restricted", "value": "true"},
                {"key": "msg_index", "value": "0"}
            ]}]
        }));
        let out = run(&NameExtractor, &tx).unwrap();
        let names: Vec<_> = out.write_set.names.into_iter().collect();
        assert_eq!(names.len(), 1);
        assert_eq!(names[0].action, NameAction::Bind);
        assert_eq!(names[0].name.full_name, "alice.sc.pb");
        assert_eq!(names[0].name.child, "alice");
        assert!(names[0].name.restricted);
        assert_eq!(names[0].name.height, 50);
    }

    #[test]
    fn delete_produces_unbind() {
        let tx = tx_response(json!({
            "height": "51",
            "txhash": "DELETE",
            "tx": {"body": {"messages": [{
                "@type": "/provenance.name.v1.MsgDeleteNameRequest",
                "record": {"name": "alice.sc.pb", "address": ACCOUNT}
            }]}}
        }));
        let out = run(&NameExtractor, &tx).unwrap();
        let intent = out.write_set.names.iter().next().unwrap();
        assert_eq!(intent.action, NameAction::Unbind);
        assert_eq!(intent.name.full_name, "alice.sc.pb");
    }

    #[test]
    fn failed_transactions_bind_nothing() {
        let tx = tx_response(json!({
            "height": "52",
            "txhash": "FAILED",
            "code": 18,
            "tx": {"body": {"messages": [{
                "@type": "/provenance.name.v1.MsgBindNameRequest",
                "record": {"name": "bob", "address": ACCOUNT},
                "parent": {"name": "pb"}
            }]}}
        }));
        assert!(run(&NameExtractor, &tx).unwrap().write_set.names.is_empty());
    }
}
