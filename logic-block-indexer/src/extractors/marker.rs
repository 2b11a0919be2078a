use explorer_primitives::Coin;

use crate::extractors::{walk_key, Extractor, ExtractorError, LookupRequest, TxContext, TxExtraction};
use crate::msg_types::MsgKind;

const MARKER_EVENT_PREFIX: &str = "provenance.marker.v1.EventMarker";

/// Marker events that change the supply of the denom
const SUPPLY_EVENTS: [&str; 4] = [
    "provenance.marker.v1.EventMarkerMint",
    "provenance.marker.v1.EventMarkerBurn",
    "provenance.marker.v1.EventMarkerWithdraw",
    "provenance.marker.v1.EventMarkerTransfer",
];

fn is_denom(value: &str) -> bool {
    !value.is_empty() && !value.chars().any(char::is_whitespace)
}

pub(crate) struct MarkerExtractor;

impl MarkerExtractor {
    fn add(denom: &str, out: &mut TxExtraction) {
        if is_denom(denom) && out.write_set.markers.insert(denom.to_string()) {
            out.lookups.insert(LookupRequest::Marker(denom.to_string()));
        }
    }
}

impl Extractor for MarkerExtractor {
    fn name(&self) -> &'static str {
        "marker"
    }

    fn extract(&self, ctx: &TxContext<'_>, out: &mut TxExtraction) -> Result<(), ExtractorError> {
        for message in &ctx.messages {
            let failed_transfer = !ctx.is_success()
                && matches!(message.kind, MsgKind::IbcTransfer | MsgKind::IbcTransferWrapped);
            if failed_transfer {
                continue;
            }
            walk_key(message.body, "denom", &mut |denom| Self::add(denom, out));
        }

        for event in ctx.events() {
            match event.kind.as_str() {
                "transfer" => {
                    for amount in event.attrs("amount") {
                        for coin in Coin::parse_list(amount) {
                            Self::add(&coin.denom, out);
                        }
                    }
                }
                "fungible_token_packet" | "denomination_trace" => {
                    if let Some(denom) = event.attr("denom") {
                        Self::add(denom, out);
                    }
                }
                kind if kind.starts_with(MARKER_EVENT_PREFIX) => {
                    if let Some(denom) = event.attr("denom").filter(|denom| is_denom(denom)) {
                        Self::add(denom, out);
                        if SUPPLY_EVENTS.contains(&kind) {
                            out.lookups
                                .insert(LookupRequest::MarkerRefresh(denom.to_string()));
                        }
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }
}
