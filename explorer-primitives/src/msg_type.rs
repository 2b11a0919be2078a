//! Canonical `(type, module)` pair derived from a message type URL.

use crate::records::{MsgTypeRecord, UNKNOWN};

const MSG_MARKER: &str = "Msg";

fn to_snake_case(value: &str) -> String {
    let mut snake = String::with_capacity(value.len() + 4);
    for (idx, ch) in value.chars().enumerate() {
        if ch.is_ascii_uppercase() {
            if idx > 0 {
                snake.push('_');
            }
            snake.push(ch.to_ascii_lowercase());
        } else {
            snake.push(ch);
        }
    }
    snake
}

fn module_of(type_url: &str) -> Option<String> {
    let segments: Vec<&str> = type_url.split('.').collect();
    if type_url.starts_with("/ibc") {
        let root = segments.first()?.trim_start_matches('/');
        let sub_module = segments.get(2)?;
        Some(format!("{}_{}", root, sub_module))
    } else {
        segments.get(1).map(|module| module.to_string())
    }
}

impl MsgTypeRecord {
    /// `/cosmos.bank.v1beta1.MsgSend` → `(send, bank)`,
    /// `/ibc.core.channel.v1.MsgRecvPacket` → `(recv_packet, ibc_channel)`.
    /// URLs without a `Msg` marker fall into the `unknown` bucket.
    pub fn from_type_url(type_url: &str) -> Self {
        let msg_type = type_url
            .rfind(MSG_MARKER)
            .map(|idx| &type_url[idx + MSG_MARKER.len()..])
            .map(|name| name.strip_suffix("Request").unwrap_or(name))
            .filter(|name| !name.is_empty())
            .map(to_snake_case);
        match (msg_type, module_of(type_url)) {
            (Some(msg_type), Some(module)) if !module.is_empty() => Self {
                type_url: type_url.to_string(),
                msg_type,
                module,
            },
            _ => Self {
                type_url: type_url.to_string(),
                msg_type: UNKNOWN.to_string(),
                module: UNKNOWN.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn derive(type_url: &str) -> (String, String) {
        let record = MsgTypeRecord::from_type_url(type_url);
        (record.msg_type, record.module)
    }

    #[test]
    fn derives_type_and_module() {
        assert_eq!(
            derive("/cosmos.bank.v1beta1.MsgSend"),
            ("send".to_string(), "bank".to_string())
        );
        assert_eq!(
            derive("/cosmos.distribution.v1beta1.MsgWithdrawDelegatorReward"),
            ("withdraw_delegator_reward".to_string(), "distribution".to_string())
        );
        assert_eq!(
            derive("/provenance.name.v1.MsgBindNameRequest"),
            ("bind_name".to_string(), "name".to_string())
        );
        assert_eq!(
            derive("/provenance.ibchooks.v1.MsgIbcTransferRequest"),
            ("ibc_transfer".to_string(), "ibchooks".to_string())
        );
    }

    #[test]
    fn ibc_modules_include_sub_module() {
        assert_eq!(
            derive("/ibc.core.channel.v1.MsgRecvPacket"),
            ("recv_packet".to_string(), "ibc_channel".to_string())
        );
        assert_eq!(
            derive("/ibc.applications.transfer.v1.MsgTransfer"),
            ("transfer".to_string(), "ibc_transfer".to_string())
        );
    }

    #[test]
    fn urls_without_marker_are_unknown() {
        let record = MsgTypeRecord::from_type_url("/cosmos.crypto.secp256k1.PubKey");
        assert!(record.is_unknown());
        assert_eq!(record.type_url, "/cosmos.crypto.secp256k1.PubKey");
        assert!(MsgTypeRecord::from_type_url("").is_unknown());
    }
}
