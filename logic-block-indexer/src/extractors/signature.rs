use explorer_primitives::{FeePayerRecord, FeePayerType, SignatureJoin, TxFeeRecord};
use serde_json::Value;

use crate::extractors::{str_field, Extractor, ExtractorError, TxContext, TxExtraction};

/// Signer public keys, fee coins and who paid them
pub(crate) struct SignatureExtractor;

impl SignatureExtractor {
    /// Multisig keys contribute each member key under the multisig signer's address
    fn add_key(public_key: &Value, address: Option<&String>, out: &mut TxExtraction) {
        if let Some(Value::Array(members)) = public_key.get("public_keys") {
            for member in members {
                Self::add_key(member, address, out);
            }
            return;
        }
        let Some(pubkey) = str_field(public_key, "/key") else {
            return;
        };
        out.write_set.signatures.insert(SignatureJoin {
            pubkey: pubkey.to_string(),
            pubkey_type: str_field(public_key, "/@type").unwrap_or_default().to_string(),
            address: address.cloned(),
        });
    }
}

impl Extractor for SignatureExtractor {
    fn name(&self) -> &'static str {
        "signature"
    }

    fn extract(&self, ctx: &TxContext<'_>, out: &mut TxExtraction) -> Result<(), ExtractorError> {
        let signers = ctx.tx.signer_addresses();
        for (index, signer) in ctx.tx.tx.auth_info.signer_infos.iter().enumerate() {
            if let Some(public_key) = &signer.public_key {
                Self::add_key(public_key, signers.get(index), out);
            }
        }

        let fee = &ctx.tx.tx.auth_info.fee;
        out.write_set.fees.extend(fee.amount.iter().map(|coin| TxFeeRecord {
            denom: coin.denom.clone(),
            amount: coin.amount.clone(),
        }));
        let payers = [
            (FeePayerType::Granter, Some(fee.granter.as_str())),
            (FeePayerType::Payer, Some(fee.payer.as_str())),
            (FeePayerType::FirstSigner, signers.first().map(String::as_str)),
        ];
        for (payer_type, address) in payers {
            if let Some(address) = address.filter(|address| !address.is_empty()) {
                out.write_set.fee_payers.insert(FeePayerRecord {
                    payer_type,
                    address: address.to_string(),
                });
            }
        }
        Ok(())
    }
}
