//! Simulation client and simulator boundary
//!
//! The core sends a transaction-shaped request and expects back
//! `{success, revert_reason?, gas_used, events[], balance_deltas[]}`; it
//! is agnostic to which concrete backend answers that contract. Two
//! backends ship with the crate: a remote HTTP service (`http.rs`) and an
//! in-process REVM instance (`revm.rs`).

pub mod http;
pub mod revm;

use alloy_primitives::{Address, Bytes, B256, I256, U256};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::models::errors::{GateError, GateResult};
use crate::models::types::{AssetChange, CallFrame, DecodedEvent, SimulationResult, TxRequest};

pub use self::http::HttpSimulator;
pub use self::revm::RevmSimulator;

// ============================================
// WIRE TYPES
// ============================================

/// Dry-run request sent over the simulator boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimRequest {
    pub from: Address,
    pub to: Address,
    pub value: U256,
    pub data: Bytes,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gas: Option<u64>,
}

impl SimRequest {
    pub fn from_tx(request: &TxRequest) -> Self {
        Self {
            from: request.from,
            to: request.to,
            value: request.value,
            data: request.data.clone(),
            gas: request.gas,
        }
    }
}

/// Raw log entry reported by a backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimLog {
    pub address: Address,
    #[serde(default)]
    pub topics: Vec<B256>,
    #[serde(default)]
    pub data: Bytes,
    /// Decoded event name, when the backend resolved the signature
    #[serde(default)]
    pub name: Option<String>,
}

/// Explicit balance delta reported by a backend. The delta travels as a
/// signed decimal string; amounts can exceed every native integer width.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimBalanceDelta {
    pub token: Address,
    pub account: Address,
    pub delta: String,
    #[serde(default)]
    pub decimals: Option<u8>,
}

/// Internal call frame. Optional extension; not every backend traces
/// calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimCallFrame {
    pub call_type: String,
    pub from: Address,
    pub to: Address,
    #[serde(default)]
    pub value: U256,
}

/// Dry-run response received over the simulator boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimResponse {
    pub success: bool,
    #[serde(default)]
    pub revert_reason: Option<String>,
    #[serde(default)]
    pub gas_used: u64,
    #[serde(default)]
    pub events: Vec<SimLog>,
    #[serde(default)]
    pub balance_deltas: Vec<SimBalanceDelta>,
    #[serde(default)]
    pub calls: Vec<SimCallFrame>,
}

// ============================================
// SIMULATOR TRAIT
// ============================================

/// A service that answers the simulator boundary contract.
#[async_trait]
pub trait Simulator: Send + Sync {
    async fn simulate(&self, request: &SimRequest) -> eyre::Result<SimResponse>;
}

// ============================================
// SIMULATION CLIENT
// ============================================

/// Wraps a backend with the pipeline's degrade semantics: an independent
/// timeout per call, no retries, and asset-delta mapping built only from
/// what the backend actually reported.
pub struct SimulationClient {
    backend: Arc<dyn Simulator>,
    timeout: Duration,
}

impl SimulationClient {
    pub fn new(backend: Arc<dyn Simulator>, timeout: Duration) -> Self {
        Self { backend, timeout }
    }

    /// Execute a dry run. `Err` means the simulator was unreachable or
    /// answered garbage; the caller converts that to its configured
    /// degraded mode. A clean revert is a successful call with
    /// `success = false`.
    pub async fn run(&self, request: &TxRequest) -> GateResult<SimulationResult> {
        let sim_request = SimRequest::from_tx(request);

        let response = match tokio::time::timeout(self.timeout, self.backend.simulate(&sim_request))
            .await
        {
            Err(_) => {
                return Err(GateError::simulation_timeout(format!(
                    "simulator did not answer within {}ms",
                    self.timeout.as_millis()
                )))
            }
            Ok(Err(e)) => {
                return Err(GateError::simulation_unavailable(format!(
                    "simulator transport failure: {e}"
                )))
            }
            Ok(Ok(response)) => response,
        };

        debug!(
            success = response.success,
            gas_used = response.gas_used,
            events = response.events.len(),
            "simulator answered"
        );

        Self::build_result(response)
    }

    /// Convert a wire response into the pipeline's immutable result,
    /// diffing balances per (token, account) pair from explicit deltas
    /// and Transfer-event logs. Nothing is ever inferred from the
    /// original calldata.
    fn build_result(response: SimResponse) -> GateResult<SimulationResult> {
        let events: Vec<DecodedEvent> = response
            .events
            .into_iter()
            .map(|log| {
                let name = log.name.or_else(|| {
                    (log.topics.first() == Some(&crate::utils::constants::TRANSFER_TOPIC))
                        .then(|| "Transfer".to_string())
                });
                DecodedEvent {
                    name,
                    address: log.address,
                    topics: log.topics,
                    data: log.data,
                }
            })
            .collect();

        let mut changes: Vec<AssetChange> = Vec::new();
        for delta in &response.balance_deltas {
            let parsed: I256 = delta.delta.parse().map_err(|e| {
                GateError::new(
                    crate::models::errors::ErrorCode::SimulationBadResponse,
                    format!("unparseable balance delta '{}': {e}", delta.delta),
                )
            })?;
            merge_delta(
                &mut changes,
                delta.token,
                delta.account,
                parsed,
                delta.decimals.unwrap_or(18),
            );
        }

        // Pairs the backend covered explicitly stay authoritative; logs
        // fill in the rest.
        let explicit: Vec<(Address, Address)> = changes
            .iter()
            .map(|c| (c.token, c.account))
            .collect();
        for event in &events {
            if let Some(transfer) = event.as_erc20_transfer() {
                let amount = match I256::try_from(transfer.amount) {
                    Ok(v) => v,
                    Err(_) => continue, // beyond signed range, not diffable
                };
                if !explicit.contains(&(transfer.token, transfer.to)) {
                    merge_delta(&mut changes, transfer.token, transfer.to, amount, 18);
                }
                if !explicit.contains(&(transfer.token, transfer.from)) {
                    merge_delta(&mut changes, transfer.token, transfer.from, -amount, 18);
                }
            }
        }

        let call_frames = response
            .calls
            .into_iter()
            .map(|c| CallFrame {
                call_type: c.call_type,
                from: c.from,
                to: c.to,
                value: c.value,
            })
            .collect();

        Ok(SimulationResult {
            success: response.success,
            revert_reason: response.revert_reason,
            gas_used: response.gas_used,
            events,
            asset_changes: changes,
            call_frames,
        })
    }
}

/// Accumulate a delta into the change list, preserving first-seen order.
fn merge_delta(
    changes: &mut Vec<AssetChange>,
    token: Address,
    account: Address,
    delta: I256,
    decimals: u8,
) {
    if let Some(existing) = changes
        .iter_mut()
        .find(|c| c.token == token && c.account == account)
    {
        existing.delta += delta;
        return;
    }
    changes.push(AssetChange {
        token,
        account,
        delta,
        decimals,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::constants::TRANSFER_TOPIC;

    fn topic_for(address: Address) -> B256 {
        let mut bytes = [0u8; 32];
        bytes[12..].copy_from_slice(address.as_slice());
        B256::from(bytes)
    }

    fn transfer_log(token: Address, from: Address, to: Address, amount: u64) -> SimLog {
        SimLog {
            address: token,
            topics: vec![TRANSFER_TOPIC, topic_for(from), topic_for(to)],
            data: Bytes::from(U256::from(amount).to_be_bytes::<32>().to_vec()),
            name: None,
        }
    }

    #[test]
    fn test_build_result_merges_explicit_and_log_deltas() {
        let token = Address::repeat_byte(0xaa);
        let sender = Address::repeat_byte(0x11);
        let pool = Address::repeat_byte(0x22);

        let response = SimResponse {
            success: true,
            revert_reason: None,
            gas_used: 120_000,
            events: vec![transfer_log(token, pool, sender, 1_000)],
            balance_deltas: vec![SimBalanceDelta {
                token: Address::ZERO,
                account: sender,
                delta: "-500".to_string(),
                decimals: Some(18),
            }],
            calls: Vec::new(),
        };

        let result = SimulationClient::build_result(response).unwrap();
        assert_eq!(result.asset_changes.len(), 3);
        assert_eq!(
            result.delta_of(Address::ZERO, sender),
            I256::try_from(-500i64).unwrap()
        );
        assert_eq!(result.delta_of(token, sender), I256::try_from(1_000i64).unwrap());
        assert_eq!(result.delta_of(token, pool), I256::try_from(-1_000i64).unwrap());
        // Transfer name filled in from the topic
        assert_eq!(result.events[0].name.as_deref(), Some("Transfer"));
    }

    #[test]
    fn test_explicit_delta_stays_authoritative_over_logs() {
        let token = Address::repeat_byte(0xaa);
        let sender = Address::repeat_byte(0x11);
        let pool = Address::repeat_byte(0x22);

        let response = SimResponse {
            success: true,
            revert_reason: None,
            gas_used: 0,
            events: vec![transfer_log(token, pool, sender, 1_000)],
            balance_deltas: vec![SimBalanceDelta {
                token,
                account: sender,
                // Backend reports the post-fee credit
                delta: "900".to_string(),
                decimals: None,
            }],
            calls: Vec::new(),
        };

        let result = SimulationClient::build_result(response).unwrap();
        assert_eq!(result.delta_of(token, sender), I256::try_from(900i64).unwrap());
    }

    #[test]
    fn test_repeated_transfers_accumulate() {
        let token = Address::repeat_byte(0xaa);
        let sender = Address::repeat_byte(0x11);
        let pool = Address::repeat_byte(0x22);

        let response = SimResponse {
            success: true,
            revert_reason: None,
            gas_used: 0,
            events: vec![
                transfer_log(token, pool, sender, 600),
                transfer_log(token, pool, sender, 400),
            ],
            balance_deltas: Vec::new(),
            calls: Vec::new(),
        };

        let result = SimulationClient::build_result(response).unwrap();
        assert_eq!(result.delta_of(token, sender), I256::try_from(1_000i64).unwrap());
        assert_eq!(result.delta_of(token, pool), I256::try_from(-1_000i64).unwrap());
    }

    #[test]
    fn test_garbage_delta_is_bad_response() {
        let response = SimResponse {
            success: true,
            revert_reason: None,
            gas_used: 0,
            events: Vec::new(),
            balance_deltas: vec![SimBalanceDelta {
                token: Address::ZERO,
                account: Address::ZERO,
                delta: "not-a-number".to_string(),
                decimals: None,
            }],
            calls: Vec::new(),
        };
        let err = SimulationClient::build_result(response).unwrap_err();
        assert_eq!(err.code_str(), "SIM_BAD_RESPONSE");
    }

    #[test]
    fn test_wire_response_accepts_minimal_shape() {
        // Backends may omit every optional field
        let response: SimResponse =
            serde_json::from_str(r#"{ "success": false, "revert_reason": "out of gas" }"#).unwrap();
        assert!(!response.success);
        assert!(response.events.is_empty());
        assert!(response.calls.is_empty());
    }
}
