//! Calldata intent parser
//! Decodes raw transaction input bytes into a structured description of
//! the intended action.
//!
//! Decoding never fails the pipeline: malformed or truncated data yields
//! an unknown-call intent with a diagnostic note. Identical bytes always
//! yield an identical intent.

use alloy_primitives::Bytes;
use alloy_sol_types::{sol, SolCall};
use std::collections::BTreeMap;

use crate::models::types::{IntentArg, IntentKind, ParsedIntent, TxRequest};
use crate::utils::constants::{SELECTOR_APPROVE, SELECTOR_TRANSFER, SELECTOR_TRANSFER_FROM};

// Well-known ERC-20 functions
sol! {
    function transfer(address to, uint256 amount) external returns (bool);
    function transferFrom(address from, address to, uint256 amount) external returns (bool);
    function approve(address spender, uint256 amount) external returns (bool);
}

/// Stateless decoder for transaction call data.
pub struct IntentParser;

impl IntentParser {
    /// Classify a request's call data.
    ///
    /// Order: empty data is a native transfer; a known ERC-20 selector is
    /// decoded against its fixed signature; everything else is an
    /// unknown call that retains the selector and raw argument bytes.
    pub fn parse(request: &TxRequest) -> ParsedIntent {
        let data = &request.data;

        if data.is_empty() {
            return ParsedIntent {
                kind: IntentKind::NativeTransfer,
                function_name: None,
                args: BTreeMap::new(),
                selector: None,
                note: None,
            };
        }

        if data.len() < 4 {
            return Self::unknown(data, None, Some("truncated selector"));
        }

        let selector: [u8; 4] = [data[0], data[1], data[2], data[3]];

        match selector {
            SELECTOR_TRANSFER => Self::decode_transfer(data, selector),
            SELECTOR_TRANSFER_FROM => Self::decode_transfer_from(data, selector),
            SELECTOR_APPROVE => Self::decode_approve(data, selector),
            _ => Self::unknown(data, Some(selector), None),
        }
    }

    fn decode_transfer(data: &Bytes, selector: [u8; 4]) -> ParsedIntent {
        match transferCall::abi_decode(data, false) {
            Ok(call) => {
                let mut args = BTreeMap::new();
                args.insert("to".to_string(), IntentArg::Address(call.to));
                args.insert("amount".to_string(), IntentArg::Uint(call.amount));
                ParsedIntent {
                    kind: IntentKind::Erc20Transfer,
                    function_name: Some("transfer".to_string()),
                    args,
                    selector: Some(selector),
                    note: None,
                }
            }
            Err(e) => Self::unknown(
                data,
                Some(selector),
                Some(&format!("transfer selector with malformed arguments: {e}")),
            ),
        }
    }

    fn decode_transfer_from(data: &Bytes, selector: [u8; 4]) -> ParsedIntent {
        match transferFromCall::abi_decode(data, false) {
            Ok(call) => {
                let mut args = BTreeMap::new();
                args.insert("from".to_string(), IntentArg::Address(call.from));
                args.insert("to".to_string(), IntentArg::Address(call.to));
                args.insert("amount".to_string(), IntentArg::Uint(call.amount));
                ParsedIntent {
                    kind: IntentKind::Erc20Transfer,
                    function_name: Some("transferFrom".to_string()),
                    args,
                    selector: Some(selector),
                    note: None,
                }
            }
            Err(e) => Self::unknown(
                data,
                Some(selector),
                Some(&format!("transferFrom selector with malformed arguments: {e}")),
            ),
        }
    }

    fn decode_approve(data: &Bytes, selector: [u8; 4]) -> ParsedIntent {
        match approveCall::abi_decode(data, false) {
            Ok(call) => {
                let mut args = BTreeMap::new();
                args.insert("spender".to_string(), IntentArg::Address(call.spender));
                args.insert("amount".to_string(), IntentArg::Uint(call.amount));
                ParsedIntent {
                    kind: IntentKind::Erc20Approve,
                    function_name: Some("approve".to_string()),
                    args,
                    selector: Some(selector),
                    note: None,
                }
            }
            Err(e) => Self::unknown(
                data,
                Some(selector),
                Some(&format!("approve selector with malformed arguments: {e}")),
            ),
        }
    }

    fn unknown(data: &Bytes, selector: Option<[u8; 4]>, note: Option<&str>) -> ParsedIntent {
        let mut args = BTreeMap::new();
        let raw = if data.len() > 4 {
            Bytes::copy_from_slice(&data[4..])
        } else {
            Bytes::new()
        };
        args.insert("raw".to_string(), IntentArg::Raw(raw));
        ParsedIntent {
            kind: IntentKind::UnknownCall,
            function_name: None,
            args,
            selector,
            note: note.map(String::from),
        }
    }
}

/// Encode an ERC-20 `transfer(to, amount)` call. Used by the honeypot
/// prober to synthesize its sell probe.
pub fn encode_erc20_transfer(to: alloy_primitives::Address, amount: alloy_primitives::U256) -> Bytes {
    Bytes::from(transferCall { to, amount }.abi_encode())
}
