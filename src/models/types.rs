//! Type definitions for the validation pipeline
//! All core data structures that flow between pipeline stages

use alloy_primitives::{Address, Bytes, I256, U256};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::events::{ValidationEvent, ValidationStage};

// ============================================
// TRANSACTION REQUEST
// ============================================

/// Immutable outbound-transaction request submitted for validation.
///
/// Created by the caller (a wallet adapter) and never mutated by the
/// pipeline; every stage reads from it and writes its own artifacts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxRequest {
    /// Sender address
    pub from: Address,
    /// Recipient address (contract or EOA)
    pub to: Address,
    /// Native value in the smallest unit (wei)
    pub value: U256,
    /// Raw call data
    pub data: Bytes,
    /// Requested gas limit, if the caller set one
    pub gas: Option<u64>,
}

impl TxRequest {
    pub fn new(from: Address, to: Address, value: U256, data: Bytes) -> Self {
        Self {
            from,
            to,
            value,
            data,
            gas: None,
        }
    }

    pub fn with_gas(mut self, gas: u64) -> Self {
        self.gas = Some(gas);
        self
    }
}

// ============================================
// PARSED INTENT
// ============================================

/// Semantic classification of a transaction's call data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentKind {
    /// Empty call data: plain native-value transfer
    NativeTransfer,
    /// ERC-20 transfer or transferFrom
    Erc20Transfer,
    /// ERC-20 approve
    Erc20Approve,
    /// Anything else: selector retained, arguments uninterpreted
    UnknownCall,
}

impl IntentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentKind::NativeTransfer => "native_transfer",
            IntentKind::Erc20Transfer => "erc20_transfer",
            IntentKind::Erc20Approve => "erc20_approve",
            IntentKind::UnknownCall => "unknown_call",
        }
    }
}

/// A single decoded calldata argument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentArg {
    Address(Address),
    Uint(U256),
    Raw(Bytes),
}

/// Decoded description of the intended action, produced once by the
/// intent parser and read-only afterward.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedIntent {
    pub kind: IntentKind,
    /// Decoded function name; `None` for native transfers
    pub function_name: Option<String>,
    /// Decoded arguments by parameter name (BTreeMap keeps the serialized
    /// form stable)
    pub args: BTreeMap<String, IntentArg>,
    /// Leading 4-byte selector, when call data carried one
    pub selector: Option<[u8; 4]>,
    /// Decoder diagnostic for malformed or unrecognized data
    pub note: Option<String>,
}

impl ParsedIntent {
    /// Token contract the intent operates on (`to` for ERC-20 calls).
    pub fn token_address(&self, request: &TxRequest) -> Option<Address> {
        match self.kind {
            IntentKind::Erc20Transfer | IntentKind::Erc20Approve => Some(request.to),
            _ => None,
        }
    }

    /// Decoded token amount for transfer/approve intents.
    pub fn token_amount(&self) -> Option<U256> {
        match self.args.get("amount") {
            Some(IntentArg::Uint(v)) => Some(*v),
            _ => None,
        }
    }

    /// Effective counterparty: token recipient for transfers, spender for
    /// approvals.
    pub fn recipient(&self) -> Option<Address> {
        let key = match self.kind {
            IntentKind::Erc20Transfer => "to",
            IntentKind::Erc20Approve => "spender",
            _ => return None,
        };
        match self.args.get(key) {
            Some(IntentArg::Address(a)) => Some(*a),
            _ => None,
        }
    }
}

// ============================================
// POLICY DECISIONS
// ============================================

/// Outcome of a single policy check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyOutcome {
    Pass,
    Fail,
    /// Validator disabled in configuration; recorded, never evaluated
    Skipped,
}

/// Identifier of a built-in policy validator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    EthValueLimit,
    AddressDenylist,
    AddressAllowlist,
    PerAssetLimit,
    TokenAmountLimit,
    GasLimit,
    FunctionAllowlist,
}

impl PolicyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyKind::EthValueLimit => "eth_value_limit",
            PolicyKind::AddressDenylist => "address_denylist",
            PolicyKind::AddressAllowlist => "address_allowlist",
            PolicyKind::PerAssetLimit => "per_asset_limit",
            PolicyKind::TokenAmountLimit => "token_amount_limit",
            PolicyKind::GasLimit => "gas_limit",
            PolicyKind::FunctionAllowlist => "function_allowlist",
        }
    }
}

/// One validator's verdict for one run. The run's decisions form an
/// ordered sequence matching configured validator order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyDecision {
    pub policy: PolicyKind,
    pub outcome: PolicyOutcome,
    pub reason: String,
    /// The request/intent field that triggered a failure, if any
    pub field: Option<String>,
}

impl PolicyDecision {
    pub fn pass(policy: PolicyKind) -> Self {
        Self {
            policy,
            outcome: PolicyOutcome::Pass,
            reason: format!("{}: passed", policy.as_str()),
            field: None,
        }
    }

    pub fn fail(policy: PolicyKind, reason: impl Into<String>, field: &str) -> Self {
        Self {
            policy,
            outcome: PolicyOutcome::Fail,
            reason: reason.into(),
            field: Some(field.to_string()),
        }
    }

    pub fn skipped(policy: PolicyKind) -> Self {
        Self {
            policy,
            outcome: PolicyOutcome::Skipped,
            reason: format!("{}: disabled", policy.as_str()),
            field: None,
        }
    }

    pub fn failed(&self) -> bool {
        self.outcome == PolicyOutcome::Fail
    }
}

// ============================================
// SIMULATION RESULTS
// ============================================

/// A single entry of the simulation's balance-delta mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetChange {
    /// Token contract; the zero address denotes the native asset
    pub token: Address,
    pub account: Address,
    /// Signed balance delta in the asset's smallest unit
    pub delta: I256,
    /// Token decimals, for display only
    pub decimals: u8,
}

/// Decoded event emitted during simulation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecodedEvent {
    /// Decoded event name, when the simulator recognized the signature
    pub name: Option<String>,
    /// Emitting contract
    pub address: Address,
    pub topics: Vec<alloy_primitives::B256>,
    pub data: Bytes,
}

/// ERC-20 Transfer decoded out of a raw log.
#[derive(Debug, Clone, Copy)]
pub struct Erc20Transfer {
    pub token: Address,
    pub from: Address,
    pub to: Address,
    pub amount: U256,
}

impl DecodedEvent {
    /// Interpret this event as an ERC-20 Transfer, if it is one.
    pub fn as_erc20_transfer(&self) -> Option<Erc20Transfer> {
        use crate::utils::constants::TRANSFER_TOPIC;
        if self.topics.len() < 3 || self.topics[0] != TRANSFER_TOPIC {
            return None;
        }
        let from = Address::from_slice(&self.topics[1][12..]);
        let to = Address::from_slice(&self.topics[2][12..]);
        let amount = if self.data.len() >= 32 {
            U256::from_be_slice(&self.data[..32])
        } else {
            U256::ZERO
        };
        Some(Erc20Transfer {
            token: self.address,
            from,
            to,
            amount,
        })
    }
}

/// A single internal call observed during simulation. Optional backend
/// extension; backends that report no frames leave the list empty.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallFrame {
    /// "call", "delegatecall", "staticcall", "create", ...
    pub call_type: String,
    pub from: Address,
    pub to: Address,
    pub value: U256,
}

/// Dry-run execution trace, immutable once produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationResult {
    pub success: bool,
    pub revert_reason: Option<String>,
    pub gas_used: u64,
    /// Ordered sequence of emitted events
    pub events: Vec<DecodedEvent>,
    /// Balance deltas the simulator actually reported, per (token, account)
    pub asset_changes: Vec<AssetChange>,
    /// Internal call frames, when the backend reports them
    pub call_frames: Vec<CallFrame>,
}

impl SimulationResult {
    /// Result used when the simulator could not be reached at all.
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            revert_reason: Some(reason.into()),
            gas_used: 0,
            events: Vec::new(),
            asset_changes: Vec::new(),
            call_frames: Vec::new(),
        }
    }

    /// Signed delta for a (token, account) pair, zero when unreported.
    pub fn delta_of(&self, token: Address, account: Address) -> I256 {
        self.asset_changes
            .iter()
            .find(|c| c.token == token && c.account == account)
            .map(|c| c.delta)
            .unwrap_or(I256::ZERO)
    }

    /// Positive non-native token deltas credited to `account`.
    pub fn tokens_received_by(&self, account: Address) -> Vec<&AssetChange> {
        use crate::utils::constants::NATIVE_ASSET;
        self.asset_changes
            .iter()
            .filter(|c| c.account == account && c.token != NATIVE_ASSET && c.delta > I256::ZERO)
            .collect()
    }

    /// Count of ERC-20 Transfer events for a specific token.
    pub fn transfer_event_count(&self, token: Address) -> usize {
        self.events
            .iter()
            .filter_map(|e| e.as_erc20_transfer())
            .filter(|t| t.token == token)
            .count()
    }
}

// ============================================
// HONEYPOT VERDICTS
// ============================================

/// Outcome of the buy-then-sell probe for one token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HoneypotOutcome {
    /// Token is on the safe list; probing skipped
    NotApplicable,
    /// Synthetic sell succeeded with matching transfer evidence
    Tradable,
    /// Synthetic sell reverted, emitted no events, or left the balance
    /// unchanged
    Honeypot,
}

impl HoneypotOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            HoneypotOutcome::NotApplicable => "not_applicable",
            HoneypotOutcome::Tradable => "tradable",
            HoneypotOutcome::Honeypot => "honeypot",
        }
    }
}

/// Per-token result of the honeypot probe. Exists only when the original
/// simulation showed a positive token delta to the sender.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HoneypotVerdict {
    pub token: Address,
    pub outcome: HoneypotOutcome,
    /// The synthetic sell trace that produced the outcome
    pub probe: Option<SimulationResult>,
    /// Names the specific failed check for honeypot outcomes
    pub reason: Option<String>,
}

// ============================================
// RISK ASSESSMENT
// ============================================

/// Monotonic bucketing of the risk judge's confidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    /// Bucket a confidence score into a level.
    pub fn from_confidence(confidence: f64) -> Self {
        if confidence >= 0.75 {
            RiskLevel::Critical
        } else if confidence >= 0.50 {
            RiskLevel::High
        } else if confidence >= 0.25 {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "LOW",
            RiskLevel::Medium => "MEDIUM",
            RiskLevel::High => "HIGH",
            RiskLevel::Critical => "CRITICAL",
        }
    }
}

/// Action the risk judge recommends for the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskAction {
    Allow,
    Warn,
    Block,
}

impl RiskAction {
    /// Threshold decision rule: confidence against the configured warn and
    /// block cutoffs.
    pub fn from_thresholds(confidence: f64, warn_threshold: f64, block_threshold: f64) -> Self {
        if confidence >= block_threshold {
            RiskAction::Block
        } else if confidence >= warn_threshold {
            RiskAction::Warn
        } else {
            RiskAction::Allow
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskAction::Allow => "ALLOW",
            RiskAction::Warn => "WARN",
            RiskAction::Block => "BLOCK",
        }
    }
}

/// Calibrated malicious-probability judgment, produced at most once per
/// run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub malicious: bool,
    /// 0.0 - 1.0
    pub confidence: f64,
    pub risk_level: RiskLevel,
    pub action: RiskAction,
    pub reason: String,
    /// Named indicator tags the judge keyed on
    pub indicators: Vec<String>,
}

// ============================================
// PIPELINE VERDICT
// ============================================

/// Terminal outcome of a validation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateOutcome {
    Allowed,
    Warned,
    Blocked,
}

impl GateOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            GateOutcome::Allowed => "allowed",
            GateOutcome::Warned => "warned",
            GateOutcome::Blocked => "blocked",
        }
    }
}

/// Which optional stages actually ran (they are skippable by
/// configuration or by absence of a backend).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct StageFlags {
    pub simulation_ran: bool,
    pub honeypot_ran: bool,
    pub risk_judged: bool,
}

/// Terminal object for a run: outcome, triggering stage, the full audit
/// trail, and every stage artifact the run produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateVerdict {
    pub run_id: Uuid,
    pub outcome: GateOutcome,
    /// Stage that produced a block, when one did
    pub triggered_by: Option<ValidationStage>,
    /// Explicit "why" text, never a bare boolean
    pub reason: String,
    pub events: Vec<ValidationEvent>,
    pub intent: ParsedIntent,
    pub policy_decisions: Vec<PolicyDecision>,
    pub simulation: Option<SimulationResult>,
    pub honeypot: Vec<HoneypotVerdict>,
    pub risk: Option<RiskAssessment>,
    pub stages: StageFlags,
}

impl GateVerdict {
    pub fn blocked(&self) -> bool {
        self.outcome == GateOutcome::Blocked
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::constants::TRANSFER_TOPIC;
    use alloy_primitives::B256;

    #[test]
    fn test_risk_level_bucketing_is_monotonic() {
        assert_eq!(RiskLevel::from_confidence(0.0), RiskLevel::Low);
        assert_eq!(RiskLevel::from_confidence(0.25), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_confidence(0.5), RiskLevel::High);
        assert_eq!(RiskLevel::from_confidence(0.75), RiskLevel::Critical);
        assert_eq!(RiskLevel::from_confidence(1.0), RiskLevel::Critical);
    }

    #[test]
    fn test_risk_action_thresholds() {
        assert_eq!(RiskAction::from_thresholds(0.85, 0.4, 0.7), RiskAction::Block);
        assert_eq!(RiskAction::from_thresholds(0.5, 0.4, 0.7), RiskAction::Warn);
        assert_eq!(RiskAction::from_thresholds(0.1, 0.4, 0.7), RiskAction::Allow);
        // Boundary: exactly at the block threshold blocks
        assert_eq!(RiskAction::from_thresholds(0.7, 0.4, 0.7), RiskAction::Block);
    }

    #[test]
    fn test_transfer_event_decoding() {
        let token = Address::repeat_byte(0xaa);
        let from = Address::repeat_byte(0x01);
        let to = Address::repeat_byte(0x02);
        let mut topic_from = [0u8; 32];
        topic_from[12..].copy_from_slice(from.as_slice());
        let mut topic_to = [0u8; 32];
        topic_to[12..].copy_from_slice(to.as_slice());

        let event = DecodedEvent {
            name: Some("Transfer".to_string()),
            address: token,
            topics: vec![TRANSFER_TOPIC, B256::from(topic_from), B256::from(topic_to)],
            data: Bytes::from(U256::from(1000u64).to_be_bytes::<32>().to_vec()),
        };

        let transfer = event.as_erc20_transfer().expect("should decode");
        assert_eq!(transfer.token, token);
        assert_eq!(transfer.from, from);
        assert_eq!(transfer.to, to);
        assert_eq!(transfer.amount, U256::from(1000u64));
    }

    #[test]
    fn test_tokens_received_ignores_native_and_outflows() {
        let sender = Address::repeat_byte(0x11);
        let token = Address::repeat_byte(0xaa);
        let result = SimulationResult {
            success: true,
            revert_reason: None,
            gas_used: 21000,
            events: Vec::new(),
            asset_changes: vec![
                AssetChange {
                    token: Address::ZERO,
                    account: sender,
                    delta: I256::try_from(5i64).unwrap(),
                    decimals: 18,
                },
                AssetChange {
                    token,
                    account: sender,
                    delta: I256::try_from(-3i64).unwrap(),
                    decimals: 18,
                },
                AssetChange {
                    token,
                    account: sender,
                    delta: I256::try_from(1000i64).unwrap(),
                    decimals: 18,
                },
            ],
            call_frames: Vec::new(),
        };

        let received = result.tokens_received_by(sender);
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].delta, I256::try_from(1000i64).unwrap());
    }

    #[test]
    fn test_intent_recipient_accessors() {
        let mut args = BTreeMap::new();
        let to = Address::repeat_byte(0x42);
        args.insert("to".to_string(), IntentArg::Address(to));
        args.insert("amount".to_string(), IntentArg::Uint(U256::from(7u64)));
        let intent = ParsedIntent {
            kind: IntentKind::Erc20Transfer,
            function_name: Some("transfer".to_string()),
            args,
            selector: Some(crate::utils::constants::SELECTOR_TRANSFER),
            note: None,
        };
        assert_eq!(intent.recipient(), Some(to));
        assert_eq!(intent.token_amount(), Some(U256::from(7u64)));
    }
}
