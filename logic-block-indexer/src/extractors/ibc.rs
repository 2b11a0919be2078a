//! Packet lifecycle: transfers out, receives in, and the receive/ack/timeout links
//! that the commit attaches to ledger rows.

use base64::Engine;
use explorer_primitives::{
    ibc_ledger_key, Event, IbcAckType, IbcChannelKey, IbcLedgerRecord, IbcLinkRecord,
    IbcMovement,
};
use serde::Deserialize;
use serde_json::Value;

use crate::extractors::{
    str_field, u64_field, Extractor, ExtractorError, LookupRequest, MessageRef, TxContext,
    TxExtraction,
};
use crate::msg_types::MsgKind;

const SEND_PACKET_EVENT: &str = "send_packet";
const TOKEN_PACKET_EVENT: &str = "fungible_token_packet";

/// Events carrying a packet's source and destination ends
const PACKET_EVENTS: [&str; 6] = [
    "send_packet",
    "recv_packet",
    "write_acknowledgement",
    "acknowledge_packet",
    "timeout_packet",
    "timeout_on_close_packet",
];

const CHANNEL_EVENTS: [&str; 6] = [
    "channel_open_init",
    "channel_open_try",
    "channel_open_ack",
    "channel_open_confirm",
    "channel_close_init",
    "channel_close_confirm",
];

/// ICS-20 packet payload
#[derive(Debug, Deserialize)]
struct FungibleTokenPacketData {
    denom: String,
    amount: String,
    #[serde(default)]
    sender: String,
    #[serde(default)]
    receiver: String,
}

fn decode_base64_json<T: serde::de::DeserializeOwned>(
    value: &str,
    what: &str,
) -> Result<T, ExtractorError> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(value)
        .map_err(|err| ExtractorError::Soft(format!("{} is not base64: {}", what, err)))?;
    serde_json::from_slice(&bytes)
        .map_err(|err| ExtractorError::Soft(format!("{} is not valid JSON: {}", what, err)))
}

fn packet_end(packet: &Value, side: &str) -> Result<IbcChannelKey, ExtractorError> {
    let port = str_field(packet, &format!("/{}_port", side));
    let channel = str_field(packet, &format!("/{}_channel", side));
    match (port, channel) {
        (Some(port), Some(channel)) => Ok(IbcChannelKey::new(port, channel)),
        _ => Err(ExtractorError::Soft(format!("packet without a {} port/channel", side))),
    }
}

fn packet_sequence(packet: &Value) -> Result<u64, ExtractorError> {
    u64_field(packet, "/sequence")
        .ok_or_else(|| ExtractorError::Soft("packet without a sequence".to_string()))
}

pub(crate) struct IbcExtractor;

impl IbcExtractor {
    fn add_channel(key: IbcChannelKey, out: &mut TxExtraction) {
        if out.write_set.ibc_channels.insert(key.clone()) {
            out.lookups.insert(LookupRequest::Channel(key));
        }
    }

    fn event_channels(event: &Event, out: &mut TxExtraction) {
        if PACKET_EVENTS.contains(&event.kind.as_str()) {
            for side in ["src", "dst"] {
                let port = event.attr(&format!("packet_{}_port", side));
                let channel = event.attr(&format!("packet_{}_channel", side));
                if let (Some(port), Some(channel)) = (port, channel) {
                    Self::add_channel(IbcChannelKey::new(port, channel), out);
                }
            }
        } else if CHANNEL_EVENTS.contains(&event.kind.as_str()) {
            if let (Some(port), Some(channel)) = (event.attr("port_id"), event.attr("channel_id")) {
                Self::add_channel(IbcChannelKey::new(port, channel), out);
            }
        }
    }

    /// Outgoing transfer, keyed by the sequence the chain assigned in `send_packet`
    fn transfer(
        ctx: &TxContext<'_>,
        message: &MessageRef<'_>,
        occurrence: usize,
        out: &mut TxExtraction,
    ) -> Result<(), ExtractorError> {
        let transfer = match message.kind {
            MsgKind::IbcTransferWrapped => message.body.get("transfer").unwrap_or(&Value::Null),
            _ => message.body,
        };
        let events = ctx.msg_events(message.index);
        let send_packet = events
            .iter()
            .filter(|event| event.kind == SEND_PACKET_EVENT)
            .nth(occurrence)
            .ok_or_else(|| {
                ExtractorError::Soft(format!("{} without a send_packet event", message.type_url))
            })?;
        let sequence = send_packet
            .attr("packet_sequence")
            .and_then(|sequence| sequence.parse::<u64>().ok())
            .ok_or_else(|| {
                ExtractorError::Soft("send_packet without a packet_sequence".to_string())
            })?;
        let (Some(port), Some(channel)) = (
            send_packet.attr("packet_src_port"),
            send_packet.attr("packet_src_channel"),
        ) else {
            return Err(ExtractorError::Soft("send_packet without a source channel".to_string()));
        };
        let channel = IbcChannelKey::new(port, channel);
        Self::add_channel(channel.clone(), out);
        out.write_set.ibc_ledgers.push(IbcLedgerRecord {
            ledger_key: ibc_ledger_key(&channel, sequence, IbcMovement::Out),
            channel,
            sequence,
            movement: IbcMovement::Out,
            denom: str_field(transfer, "/token/denom").unwrap_or_default().to_string(),
            amount: str_field(transfer, "/token/amount").unwrap_or_default().to_string(),
            from_address: str_field(transfer, "/sender").unwrap_or_default().to_string(),
            to_address: str_field(transfer, "/receiver").unwrap_or_default().to_string(),
            tx_hash: ctx.hash.to_string(),
            height: ctx.height,
            timestamp: ctx.timestamp,
            acknowledged: false,
            ack_success: false,
        });
        Ok(())
    }

    /// A receive that moved funds opens an IN ledger row, any other receive links to it
    fn recv_packet(
        ctx: &TxContext<'_>,
        message: &MessageRef<'_>,
        out: &mut TxExtraction,
    ) -> Result<(), ExtractorError> {
        let packet = message.body.get("packet").unwrap_or(&Value::Null);
        let channel = packet_end(packet, "destination")?;
        let sequence = packet_sequence(packet)?;
        Self::add_channel(channel.clone(), out);
        let ledger_key = ibc_ledger_key(&channel, sequence, IbcMovement::In);

        let effected = ctx.is_success()
            && ctx
                .msg_events(message.index)
                .iter()
                .filter(|event| event.kind == TOKEN_PACKET_EVENT)
                .any(|event| event.attr("success") == Some("true"));
        if effected {
            let data: FungibleTokenPacketData = decode_base64_json(
                str_field(packet, "/data").unwrap_or_default(),
                "packet data",
            )?;
            out.write_set.ibc_ledgers.push(IbcLedgerRecord {
                ledger_key,
                channel,
                sequence,
                movement: IbcMovement::In,
                denom: data.denom,
                amount: data.amount,
                from_address: data.sender,
                to_address: data.receiver,
                tx_hash: ctx.hash.to_string(),
                height: ctx.height,
                timestamp: ctx.timestamp,
                acknowledged: false,
                ack_success: false,
            });
        } else if ctx.is_success() {
            out.write_set.ibc_links.push(IbcLinkRecord {
                ledger_key,
                ack_type: IbcAckType::Receive,
                tx_hash: ctx.hash.to_string(),
                height: ctx.height,
                success: false,
            });
        }
        Ok(())
    }

    /// Ack outcome from the token packet event, falling back to the acknowledgement payload
    fn ack_success(ctx: &TxContext<'_>, message: &MessageRef<'_>) -> Result<bool, ExtractorError> {
        let events = ctx.msg_events(message.index);
        let token_event = events.iter().find(|event| event.kind == TOKEN_PACKET_EVENT);
        if let Some(event) = token_event {
            if event.attr("error").is_some() {
                return Ok(false);
            }
            if let Some(success) = event.attr("success") {
                return Ok(success != "false");
            }
        }
        let ack: Value = decode_base64_json(
            str_field(message.body, "/acknowledgement").unwrap_or_default(),
            "acknowledgement",
        )?;
        Ok(ack.get("result").is_some() && ack.get("error").is_none())
    }

    fn outgoing_link(
        ctx: &TxContext<'_>,
        message: &MessageRef<'_>,
        ack_type: IbcAckType,
        success: bool,
        out: &mut TxExtraction,
    ) -> Result<(), ExtractorError> {
        let packet = message.body.get("packet").unwrap_or(&Value::Null);
        let channel = packet_end(packet, "source")?;
        let sequence = packet_sequence(packet)?;
        Self::add_channel(channel.clone(), out);
        out.write_set.ibc_links.push(IbcLinkRecord {
            ledger_key: ibc_ledger_key(&channel, sequence, IbcMovement::Out),
            ack_type,
            tx_hash: ctx.hash.to_string(),
            height: ctx.height,
            success,
        });
        Ok(())
    }

    fn message(
        ctx: &TxContext<'_>,
        message: &MessageRef<'_>,
        transfers: &mut std::collections::HashMap<usize, usize>,
        out: &mut TxExtraction,
    ) -> Result<(), ExtractorError> {
        match message.kind {
            MsgKind::IbcTransfer | MsgKind::IbcTransferWrapped if ctx.is_success() => {
                let occurrence = transfers.entry(message.index).or_insert(0);
                Self::transfer(ctx, message, *occurrence, out)?;
                *occurrence += 1;
            }
            MsgKind::IbcRecvPacket => Self::recv_packet(ctx, message, out)?,
            MsgKind::IbcAcknowledgement if ctx.is_success() => {
                let success = Self::ack_success(ctx, message)?;
                Self::outgoing_link(ctx, message, IbcAckType::Acknowledgement, success, out)?;
            }
            MsgKind::IbcTimeout | MsgKind::IbcTimeoutOnClose if ctx.is_success() => {
                Self::outgoing_link(ctx, message, IbcAckType::Timeout, false, out)?;
            }
            MsgKind::IbcChannelOp => {
                if let (Some(port), Some(channel)) = (
                    str_field(message.body, "/port_id"),
                    str_field(message.body, "/channel_id"),
                ) {
                    Self::add_channel(IbcChannelKey::new(port, channel), out);
                }
            }
            _ => {}
        }
        Ok(())
    }
}

impl Extractor for IbcExtractor {
    fn name(&self) -> &'static str {
        "ibc"
    }

    /// A malformed packet only drops that message's ledger effect; the rest of
    /// the transaction is still extracted and the first problem is reported.
    fn extract(&self, ctx: &TxContext<'_>, out: &mut TxExtraction) -> Result<(), ExtractorError> {
        for event in ctx.events() {
            Self::event_channels(event, out);
        }
        let mut transfers = std::collections::HashMap::new();
        let mut first_error = None;
        for message in &ctx.messages {
            if let Err(err) = Self::message(ctx, message, &mut transfers, out) {
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
