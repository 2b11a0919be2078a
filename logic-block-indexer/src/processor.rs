//! Turns one raw transaction response into its write-set.

use std::collections::BTreeMap;

use explorer_primitives::{
    BlockView, MsgTypeRecord, TxEventRecord, TxMessageRecord, TxProcessingFailure, TxRecord,
    TxResponse, TxWriteSet,
};

use crate::extractors::{self, Extractor, ExtractorError, TxContext, TxExtraction};

#[derive(Debug)]
pub(crate) struct ProcessedTx {
    pub extraction: TxExtraction,
    /// Every message type seen in the transaction, nested ones included
    pub msg_types: BTreeMap<String, MsgTypeRecord>,
}

pub(crate) struct TransactionProcessor {
    extractors: Vec<Box<dyn Extractor>>,
    account_prefix: String,
    operator_prefix: String,
}

impl TransactionProcessor {
    pub fn new(chain_config: &configuration::ChainConfig) -> Self {
        Self {
            extractors: extractors::registry(),
            account_prefix: chain_config.account_prefix.clone(),
            operator_prefix: chain_config.operator_prefix(),
        }
    }

    fn events(tx: &TxResponse) -> Vec<TxEventRecord> {
        let grouped: Vec<(Option<u32>, &explorer_primitives::Event)> = if tx.events.is_empty() {
            tx.logs
                .iter()
                .flat_map(|log| log.events.iter().map(move |event| (Some(log.msg_index), event)))
                .collect()
        } else {
            tx.events
                .iter()
                .map(|event| {
                    let msg_idx = event.attr("msg_index").and_then(|idx| idx.parse().ok());
                    (msg_idx, event)
                })
                .collect()
        };
        grouped
            .into_iter()
            .enumerate()
            .map(|(event_idx, (msg_idx, event))| TxEventRecord {
                event_idx: event_idx as u32,
                msg_idx,
                event_type: event.kind.clone(),
                attributes: serde_json::Value::Object(
                    event
                        .attributes
                        .iter()
                        .map(|attribute| {
                            (
                                attribute.key.clone(),
                                serde_json::Value::String(
                                    explorer_primitives::chain::unquote(&attribute.value)
                                        .to_string(),
                                ),
                            )
                        })
                        .collect(),
                ),
            })
            .collect()
    }

    /// Decodes the response, stores its messages and events, and runs every extractor.
    ///
    /// A soft extractor failure is kept on the write-set as a processing failure and
    /// the other extractors still run. An invariant violation fails the transaction.
    #[cfg_attr(
        feature = "tracing-instrumentation",
        tracing::instrument(skip_all, fields(height = block.height()))
    )]
    pub fn process(
        &self,
        raw: serde_json::Value,
        block: &BlockView,
    ) -> anyhow::Result<ProcessedTx> {
        let tx: TxResponse = serde_json::from_value(raw.clone())
            .map_err(|err| anyhow::anyhow!("Failed to decode transaction response: {}", err))?;
        if tx.height != block.height() {
            anyhow::bail!(
                "Transaction {} reports height {} inside block {}",
                tx.txhash,
                tx.height,
                block.height()
            );
        }
        let timestamp = tx.timestamp().unwrap_or_else(|| block.timestamp());

        let mut write_set = TxWriteSet::new(TxRecord {
            hash: tx.txhash.clone(),
            height: tx.height,
            timestamp,
            code: tx.code,
            codespace: tx.codespace.clone(),
            gas_wanted: tx.gas_wanted,
            gas_used: tx.gas_used,
            raw,
        });
        write_set.messages = tx
            .messages()
            .iter()
            .enumerate()
            .map(|(msg_idx, msg)| {
                let msg_type = MsgTypeRecord::from_type_url(crate::msg_types::type_url(msg));
                TxMessageRecord {
                    msg_idx: msg_idx as u32,
                    type_url: msg_type.type_url,
                    msg_type: msg_type.msg_type,
                    module: msg_type.module,
                    raw: msg.clone(),
                }
            })
            .collect();
        write_set.events = Self::events(&tx);

        let mut msg_types = BTreeMap::new();
        for message in extractors::flatten_messages(&tx) {
            let record = MsgTypeRecord::from_type_url(message.type_url);
            if record.is_unknown() {
                crate::metrics::UNKNOWN_MESSAGES_TOTAL.inc();
                tracing::debug!(
                    target: crate::INDEXER,
                    "Unknown message type {:?} in tx {} at height {}",
                    message.type_url,
                    tx.txhash,
                    tx.height,
                );
            }
            msg_types.insert(record.type_url.clone(), record);
        }

        let ctx = TxContext::new(&tx, timestamp, &self.account_prefix, &self.operator_prefix);
        let mut extraction = TxExtraction::new(write_set);
        for extractor in &self.extractors {
            match extractor.extract(&ctx, &mut extraction) {
                Ok(()) => {}
                Err(ExtractorError::Soft(error_message)) => {
                    tracing::warn!(
                        target: crate::INDEXER,
                        "{} extractor failed on tx {} at height {}: {}",
                        extractor.name(),
                        tx.txhash,
                        tx.height,
                        error_message,
                    );
                    extraction.write_set.failures.push(TxProcessingFailure {
                        process_type: extractor.name().to_string(),
                        error_message,
                    });
                }
                Err(err @ ExtractorError::Invariant(_)) => {
                    anyhow::bail!(
                        "{} extractor failed on tx {}: {}",
                        extractor.name(),
                        tx.txhash,
                        err
                    );
                }
            }
        }
        crate::metrics::TXS_PROCESSED_TOTAL.inc();

        Ok(ProcessedTx {
            extraction,
            msg_types,
        })
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::extractors::tests::ACCOUNT;
    use crate::test_support;

    #[test]
    fn unknown_messages_are_stored_but_not_extracted() {
        let processor = TransactionProcessor::new(&test_support::chain_config());
        let block = test_support::block_view(9, 1);
        let processed = processor
            .process(
                json!({
                    "height": "9",
                    "txhash": "MIXED",
                    "tx": {"body": {"messages": [
                        {"@type": "/synthetic.unknown.v1.Thing", "owner": ACCOUNT},
                        {"@type": "/cosmos.bank.v1beta1.MsgSend", "from_address": ACCOUNT, "amount": [{"denom": "nhash", "amount": "5"}]}
                    ]}}
                }),
                &block,
            )
            .unwrap();

        let write_set = &processed.extraction.write_set;
        assert_eq!(write_set.messages.len(), 2);
        assert_eq!(write_set.messages[0].module, "unknown");
        assert_eq!(write_set.messages[1].msg_type, "send");
        assert!(write_set.markers.contains("nhash"));
        assert_eq!(write_set.addresses.len(), 1);
        assert!(processed.msg_types["/synthetic.unknown.v1.Thing"].is_unknown());
        assert_eq!(write_set.tx.timestamp, block.timestamp());
    }

    #[test]
    fn soft_failures_are_kept_on_the_write_set() {
        let processor = TransactionProcessor::new(&test_support::chain_config());
        let block = test_support::block_view(9, 1);
        let processed = processor
            .process(
                json!({
                    "height": "9",
                    "txhash": "BADPACKET",
                    "tx": {"body": {"messages": [{
                        "@type": "/ibc.core.channel.v1.MsgRecvPacket",
                        "packet": {"destination_port": "transfer"}
                    }]}}
                }),
                &block,
            )
            .unwrap();
        let failures = &processed.extraction.write_set.failures;
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].process_type, "ibc");
    }

    #[test]
    fn invariant_violations_fail_the_transaction() {
        let processor = TransactionProcessor::new(&test_support::chain_config());
        let block = test_support::block_view(9, 1);
        let result = processor.process(
            json!({
                "height": "9",
                "txhash": "NOPROPOSAL",
                "tx": {"body": {"messages": [{"@type": "/cosmos.gov.v1.MsgSubmitProposal", "proposer": ACCOUNT}]}}
            }),
            &block,
        );
        assert!(result.is_err());
    }

    #[test]
    fn events_keep_their_message_index() {
        let tx: TxResponse = serde_json::from_value(json!({
            "height": "9",
            "txhash": "EVENTS",
            "events": [
                {"type": "tx", "attributes": [{"key": "fee", "value": "10nhash"}]},
                {"type": "transfer", "attributes": [
                    {"key": "amount", "value": "\"5nhash\""},
                    {"key": "msg_index", "value": "0"}
                ]}
            ]
        }))
        .unwrap();
        let events = TransactionProcessor::events(&tx);
        assert_eq!(events[0].msg_idx, None);
        assert_eq!(events[1].msg_idx, Some(0));
        assert_eq!(events[1].event_idx, 1);
        assert_eq!(events[1].attributes["amount"], json!("5nhash"));
    }
}
