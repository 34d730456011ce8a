use std::collections::HashSet;

use alloy::primitives::{B256, Selector};
use sip_core::error::SipError;

use super::HistoryTransaction;
use crate::metrics;

const WORD: usize = 32;
const SELECTOR_LEN: usize = 4;

/// A plan key recovered from a create call, with the transaction it came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedCreation {
    pub plan_key: String,
    pub tx_hash: B256,
}

fn decode_error(message: impl Into<String>) -> SipError {
    SipError::DecodeError {
        message: message.into(),
    }
}

/// Reads a head word as a byte offset or length
fn read_usize_word(args: &[u8], at: usize, field: &str) -> Result<usize, SipError> {
    let end = at
        .checked_add(WORD)
        .ok_or_else(|| decode_error(format!("{field} position overflows")))?;
    let word = args
        .get(at..end)
        .ok_or_else(|| decode_error(format!("call data truncated before {field} at byte {at}")))?;

    if word[..WORD - 8].iter().any(|b| *b != 0) {
        return Err(decode_error(format!("{field} does not fit in 64 bits")));
    }

    let mut low = [0u8; 8];
    low.copy_from_slice(&word[WORD - 8..]);
    usize::try_from(u64::from_be_bytes(low))
        .map_err(|_| decode_error(format!("{field} exceeds address space")))
}

/// Decodes the leading `string` argument of an ABI encoded call.
///
/// Layout after the selector: a head word holding the string's offset, then
/// at that offset a length word followed by the bytes.
pub fn decode_plan_key(call_data: &[u8]) -> Result<String, SipError> {
    let args = call_data
        .get(SELECTOR_LEN..)
        .ok_or_else(|| decode_error("call data shorter than a selector"))?;

    let offset = read_usize_word(args, 0, "string offset")?;
    let length = read_usize_word(args, offset, "string length")?;

    let start = offset + WORD;
    let end = start
        .checked_add(length)
        .ok_or_else(|| decode_error("string length overflows"))?;
    let bytes = args.get(start..end).ok_or_else(|| {
        decode_error(format!(
            "string of {length} bytes runs past the end of {} bytes of arguments",
            args.len()
        ))
    })?;

    let key = std::str::from_utf8(bytes)
        .map_err(|e| decode_error(format!("plan key is not utf-8: {e}")))?;

    if key.is_empty() {
        return Err(decode_error("empty plan key"));
    }

    Ok(key.to_string())
}

/// Plan keys of successful create calls among `transactions`, first
/// occurrence wins. Transactions that do not decode are skipped.
pub fn decode_create_plan_keys(
    transactions: &[HistoryTransaction],
    create_selector: Selector,
) -> Vec<DecodedCreation> {
    let mut seen = HashSet::new();
    let mut creations = Vec::new();

    for tx in transactions {
        if !tx.status || !tx.has_tag(create_selector) {
            continue;
        }

        if tx.call_data.len() >= SELECTOR_LEN && tx.call_data[..SELECTOR_LEN] != create_selector[..] {
            tracing::warn!(
                tx_hash = %tx.tx_hash,
                "Call data selector disagrees with indexer tag, skipping"
            );
            metrics::record_skipped_transaction();
            continue;
        }

        match decode_plan_key(&tx.call_data) {
            Ok(plan_key) => {
                if seen.insert(plan_key.clone()) {
                    creations.push(DecodedCreation {
                        plan_key,
                        tx_hash: tx.tx_hash,
                    });
                }
            }
            Err(e) => {
                tracing::warn!(tx_hash = %tx.tx_hash, error = %e, "Skipping undecodable create call");
                metrics::record_skipped_transaction();
            }
        }
    }

    creations
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{Address, Bytes, U256, address, b256};
    use sip_core::{commands::SipCommand, contract::CREATE_PLAN_SELECTOR};

    const CONTRACT: Address = address!("0xd8540A08f770BAA3b66C4d43728CDBDd1d7A9c3b");

    fn create_data(key: &str) -> Bytes {
        SipCommand::CreatePlan {
            plan_key: key.to_string(),
            amount_per_interval: U256::from(10u64),
            frequency_seconds: 86_400,
            maturity_time: 1_702_678_400,
            destination_address: address!("0x2222222222222222222222222222222222222222"),
            total_amount: U256::from(100u64),
        }
        .encode(CONTRACT)
        .data
    }

    fn tx(hash_byte: u8, tag: &str, data: Bytes, status: bool) -> HistoryTransaction {
        HistoryTransaction {
            tx_hash: B256::repeat_byte(hash_byte),
            call_signature_tag: tag.to_string(),
            call_data: data,
            value: U256::ZERO,
            timestamp: None,
            status,
        }
    }

    #[test]
    fn decodes_abi_encoded_create_call() {
        let key = decode_plan_key(&create_data("sip_1BeAed_1700000000")).expect("Should decode");
        assert_eq!(key, "sip_1BeAed_1700000000");
    }

    #[test]
    fn decodes_keys_longer_than_one_word() {
        let long = "sip_".repeat(20);
        assert_eq!(decode_plan_key(&create_data(&long)).expect("Should decode"), long);
    }

    #[test]
    fn truncated_length_is_an_error() {
        let mut data = create_data("sip_1BeAed_1700000000").to_vec();
        // selector + 5 head words, then the length word
        data.truncate(SELECTOR_LEN + 5 * WORD + 16);
        assert!(matches!(
            decode_plan_key(&data),
            Err(SipError::DecodeError { .. })
        ));
    }

    #[test]
    fn oversized_length_is_an_error() {
        let mut data = create_data("k").to_vec();
        let length_at = SELECTOR_LEN + 5 * WORD;
        data[length_at + WORD - 1] = 0xff;
        assert!(matches!(
            decode_plan_key(&data),
            Err(SipError::DecodeError { .. })
        ));
    }

    #[test]
    fn offset_outside_arguments_is_an_error() {
        let mut data = create_data("k").to_vec();
        data[SELECTOR_LEN + WORD - 1] = 0xf0;
        assert!(decode_plan_key(&data).is_err());
        assert!(decode_plan_key(&[0xe1, 0xdc]).is_err());
    }

    #[test]
    fn only_successful_create_calls_yield_keys() {
        let execute = {
            let mut data = vec![0x9c, 0x70, 0x18, 0x52];
            data.extend_from_slice(&create_data("sip_k3")[SELECTOR_LEN..]);
            Bytes::from(data)
        };

        let txs = vec![
            tx(1, "0xe1dc1c04", create_data("sip_k3"), true),
            tx(2, "0x9c701852", execute, true),
            tx(3, "0xe1dc1c04", create_data("sip_failed"), false),
        ];

        let creations = decode_create_plan_keys(&txs, CREATE_PLAN_SELECTOR);
        assert_eq!(
            creations,
            vec![DecodedCreation {
                plan_key: "sip_k3".to_string(),
                tx_hash: B256::repeat_byte(1),
            }]
        );
    }

    #[test]
    fn malformed_transaction_does_not_hide_others() {
        let mut truncated = create_data("sip_bad").to_vec();
        truncated.truncate(SELECTOR_LEN + 5 * WORD + 8);

        let txs = vec![
            tx(1, "0xe1dc1c04", Bytes::from(truncated), true),
            tx(2, "0xe1dc1c04", create_data("sip_good"), true),
            tx(3, "0xe1dc1c04", Bytes::new(), true),
        ];

        let keys: Vec<_> = decode_create_plan_keys(&txs, CREATE_PLAN_SELECTOR)
            .into_iter()
            .map(|c| c.plan_key)
            .collect();
        assert_eq!(keys, vec!["sip_good".to_string()]);
    }

    #[test]
    fn duplicate_keys_keep_first_transaction() {
        let txs = vec![
            tx(7, "0xe1dc1c04", create_data("sip_dup"), true),
            tx(8, "0xe1dc1c04", create_data("sip_dup"), true),
        ];
        let creations = decode_create_plan_keys(&txs, CREATE_PLAN_SELECTOR);
        assert_eq!(creations.len(), 1);
        assert_eq!(
            creations[0].tx_hash,
            b256!("0x0707070707070707070707070707070707070707070707070707070707070707")
        );
    }
}
