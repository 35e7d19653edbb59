//! Integration tests for the validation pipeline
//!
//! Network boundaries are exercised through scripted in-crate backends;
//! no external simulator or LLM service is required.

use alloy_primitives::{Address, Bytes, B256, U256};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;

use txgate::{
    EventStatus, GateOutcome, HoneypotOutcome, IntentKind, PipelineConfig, PolicyKind,
    PolicyOutcome, RiskAction, RiskAssessment, RiskLevel, RiskModel, SecurityIndicators,
    SimRequest, SimResponse, Simulator, TxGate, TxRequest, ValidationStage,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn eth(n: u64) -> U256 {
    U256::from(n) * U256::from(10u64).pow(U256::from(18u64))
}

fn sender() -> Address {
    Address::repeat_byte(0x11)
}

fn native_request(value: U256) -> TxRequest {
    TxRequest::new(sender(), Address::repeat_byte(0x22), value, Bytes::new())
}

fn config_from(doc: serde_json::Value) -> PipelineConfig {
    serde_json::from_value(doc).expect("valid config document")
}

fn topic_for(address: Address) -> B256 {
    let mut bytes = [0u8; 32];
    bytes[12..].copy_from_slice(address.as_slice());
    B256::from(bytes)
}

// ============================================
// SCRIPTED BACKENDS
// ============================================

/// Answers the primary dry run with `buy` and any probe targeting
/// `token` with `sell`.
struct ScriptedSimulator {
    token: Address,
    buy: SimResponse,
    sell: SimResponse,
}

#[async_trait]
impl Simulator for ScriptedSimulator {
    async fn simulate(&self, request: &SimRequest) -> eyre::Result<SimResponse> {
        if request.to == self.token {
            Ok(self.sell.clone())
        } else {
            Ok(self.buy.clone())
        }
    }
}

/// Always succeeds with a clean, eventless trace.
struct CleanSimulator;

#[async_trait]
impl Simulator for CleanSimulator {
    async fn simulate(&self, _request: &SimRequest) -> eyre::Result<SimResponse> {
        Ok(SimResponse {
            success: true,
            revert_reason: None,
            gas_used: 21_000,
            events: Vec::new(),
            balance_deltas: Vec::new(),
            calls: Vec::new(),
        })
    }
}

/// Unreachable backend.
struct DeadSimulator;

#[async_trait]
impl Simulator for DeadSimulator {
    async fn simulate(&self, _request: &SimRequest) -> eyre::Result<SimResponse> {
        Err(eyre::eyre!("connection refused"))
    }
}

/// Risk model with a fixed confidence.
struct FixedJudge {
    confidence: f64,
}

#[async_trait]
impl RiskModel for FixedJudge {
    async fn assess(&self, _indicators: &SecurityIndicators) -> eyre::Result<RiskAssessment> {
        Ok(RiskAssessment {
            malicious: self.confidence >= 0.5,
            confidence: self.confidence,
            risk_level: RiskLevel::from_confidence(self.confidence),
            action: RiskAction::Allow, // recomputed by the judge wrapper
            reason: "scripted assessment".to_string(),
            indicators: vec!["scripted".to_string()],
        })
    }
}

fn buy_response(token: Address, amount: u64) -> SimResponse {
    SimResponse {
        success: true,
        revert_reason: None,
        gas_used: 150_000,
        events: Vec::new(),
        balance_deltas: vec![txgate::simulator::SimBalanceDelta {
            token,
            account: sender(),
            delta: amount.to_string(),
            decimals: Some(18),
        }],
        calls: Vec::new(),
    }
}

fn stage_rank(stage: ValidationStage) -> u8 {
    match stage {
        ValidationStage::Started => 0,
        ValidationStage::IntentAnalysis => 1,
        ValidationStage::PolicyValidation => 2,
        ValidationStage::Simulation => 3,
        ValidationStage::HoneypotDetection => 4,
        ValidationStage::LlmValidation => 5,
        ValidationStage::Completed => 6,
    }
}

fn assert_events_in_stage_order(verdict: &txgate::GateVerdict) {
    let mut last = 0u8;
    for event in &verdict.events {
        let rank = stage_rank(event.stage);
        assert!(
            rank >= last,
            "event for stage {:?} out of order in {:?}",
            event.stage,
            verdict
                .events
                .iter()
                .map(|e| e.stage.as_str())
                .collect::<Vec<_>>()
        );
        last = rank;
    }
    assert_eq!(
        verdict.events.last().map(|e| e.stage),
        Some(ValidationStage::Completed)
    );
}

// ============================================
// POLICY SCENARIOS
// ============================================

#[tokio::test]
async fn eth_value_limit_violation_blocks_at_policy_stage() {
    init_tracing();
    let config = config_from(json!({
        "policies": [
            { "type": "eth_value_limit", "max_value_wei": "1000000000000000000" }
        ],
        "simulation": { "enabled": false }
    }));
    let gate = TxGate::new(config).unwrap();

    let verdict = gate.validate(&native_request(eth(2))).await;

    assert_eq!(verdict.outcome, GateOutcome::Blocked);
    assert_eq!(verdict.triggered_by, Some(ValidationStage::PolicyValidation));
    let decision = &verdict.policy_decisions[0];
    assert_eq!(decision.policy, PolicyKind::EthValueLimit);
    assert_eq!(decision.outcome, PolicyOutcome::Fail);
    assert_events_in_stage_order(&verdict);
}

#[tokio::test]
async fn denylisted_recipient_blocks_regardless_of_value() {
    let bad = Address::repeat_byte(0x22); // the request's `to`
    let config = config_from(json!({
        "policies": [
            {
                "type": "address_denylist",
                "denied_addresses": [bad.to_string()]
            }
        ],
        "simulation": { "enabled": false }
    }));
    let gate = TxGate::new(config).unwrap();

    for value in [U256::ZERO, eth(1), eth(1_000)] {
        let verdict = gate.validate(&native_request(value)).await;
        assert_eq!(verdict.outcome, GateOutcome::Blocked, "value {value}");
        assert_eq!(verdict.triggered_by, Some(ValidationStage::PolicyValidation));
    }
}

#[tokio::test]
async fn aggregate_mode_reports_every_violation() {
    let config = config_from(json!({
        "fail_fast": false,
        "policies": [
            { "type": "eth_value_limit", "max_value_wei": "1000000000000000000" },
            { "type": "gas_limit", "max_gas": 100000 }
        ],
        "simulation": { "enabled": false }
    }));
    let gate = TxGate::new(config).unwrap();

    let request = native_request(eth(2)).with_gas(500_000);
    let verdict = gate.validate(&request).await;

    assert_eq!(verdict.outcome, GateOutcome::Blocked);
    let failures: Vec<_> = verdict
        .policy_decisions
        .iter()
        .filter(|d| d.outcome == PolicyOutcome::Fail)
        .collect();
    assert_eq!(failures.len(), 2, "both violations surface in one pass");
    // The terminal reason names both
    assert!(verdict.reason.contains("ETH value"));
    assert!(verdict.reason.contains("gas"));
}

#[tokio::test]
async fn fail_fast_stops_at_first_violation() {
    let config = config_from(json!({
        "fail_fast": true,
        "policies": [
            { "type": "eth_value_limit", "max_value_wei": "1000000000000000000" },
            { "type": "gas_limit", "max_gas": 100000 }
        ],
        "simulation": { "enabled": false }
    }));
    let gate = TxGate::new(config).unwrap();

    let request = native_request(eth(2)).with_gas(500_000);
    let verdict = gate.validate(&request).await;

    assert_eq!(verdict.outcome, GateOutcome::Blocked);
    assert_eq!(verdict.policy_decisions.len(), 1);
}

#[tokio::test]
async fn policy_evaluation_is_idempotent() {
    let config = config_from(json!({
        "policies": [
            { "type": "eth_value_limit", "max_value_wei": "1000000000000000000" },
            { "type": "address_allowlist", "enabled": true,
              "allowed_addresses": ["0x9999999999999999999999999999999999999999"] },
            { "type": "gas_limit", "max_gas": 1, "enabled": false }
        ],
        "simulation": { "enabled": false }
    }));
    let gate = TxGate::new(config).unwrap();
    let request = native_request(eth(2));

    let first = gate.validate(&request).await;
    let second = gate.validate(&request).await;

    assert_eq!(first.policy_decisions.len(), second.policy_decisions.len());
    for (a, b) in first
        .policy_decisions
        .iter()
        .zip(second.policy_decisions.iter())
    {
        assert_eq!(a.policy, b.policy);
        assert_eq!(a.outcome, b.outcome);
        assert_eq!(a.reason, b.reason);
    }
    // Disabled validator recorded, not silently dropped
    assert_eq!(first.policy_decisions[2].outcome, PolicyOutcome::Skipped);
}

// ============================================
// SKIP SEMANTICS
// ============================================

#[tokio::test]
async fn disabled_stages_are_skipped_not_failed() {
    let config = config_from(json!({
        "policies": [
            { "type": "eth_value_limit", "max_value_wei": "10000000000000000000" }
        ],
        "simulation": { "enabled": false },
        "llm_validation": { "enabled": false }
    }));
    let gate = TxGate::new(config).unwrap();

    let verdict = gate.validate(&native_request(eth(1))).await;

    assert_eq!(verdict.outcome, GateOutcome::Allowed);
    assert!(!verdict.stages.simulation_ran);
    assert!(!verdict.stages.honeypot_ran);
    assert!(!verdict.stages.risk_judged);
    assert!(verdict.simulation.is_none());
    assert!(verdict.risk.is_none());

    for stage in [
        ValidationStage::Simulation,
        ValidationStage::HoneypotDetection,
        ValidationStage::LlmValidation,
    ] {
        let event = verdict
            .events
            .iter()
            .find(|e| e.stage == stage)
            .unwrap_or_else(|| panic!("missing event for {stage:?}"));
        assert_eq!(event.status, EventStatus::Skipped, "{stage:?}");
    }
    assert_events_in_stage_order(&verdict);
}

#[tokio::test]
async fn master_switch_bypasses_everything() {
    let config = config_from(json!({
        "enabled": false,
        "policies": [
            { "type": "eth_value_limit", "max_value_wei": "1" }
        ]
    }));
    let gate = TxGate::new(config).unwrap();

    // Would violate the 1 wei limit if the pipeline ran
    let verdict = gate.validate(&native_request(eth(5))).await;
    assert_eq!(verdict.outcome, GateOutcome::Allowed);
    assert_eq!(verdict.events.len(), 1);
    assert_eq!(verdict.events[0].status, EventStatus::Skipped);
}

// ============================================
// SIMULATION SCENARIOS
// ============================================

#[tokio::test]
async fn unavailable_simulator_degrades_to_warning() {
    let config = config_from(json!({
        "simulation": { "enabled": true, "fail_on_revert": true, "required": false }
    }));
    let gate = TxGate::builder(config)
        .with_simulator(Arc::new(DeadSimulator))
        .build()
        .unwrap();

    let verdict = gate.validate(&native_request(eth(1))).await;

    assert_eq!(verdict.outcome, GateOutcome::Warned);
    assert!(verdict.stages.simulation_ran);
    let simulation = verdict.simulation.as_ref().unwrap();
    assert!(!simulation.success);
    assert_eq!(
        simulation.revert_reason.as_deref(),
        Some("simulation unavailable")
    );
    assert!(verdict
        .events
        .iter()
        .any(|e| e.stage == ValidationStage::Simulation && e.status == EventStatus::Warning));
}

#[tokio::test]
async fn unavailable_simulator_blocks_when_required() {
    let config = config_from(json!({
        "simulation": { "enabled": true, "fail_on_revert": true, "required": true }
    }));
    let gate = TxGate::builder(config)
        .with_simulator(Arc::new(DeadSimulator))
        .build()
        .unwrap();

    let verdict = gate.validate(&native_request(eth(1))).await;
    assert_eq!(verdict.outcome, GateOutcome::Blocked);
    assert_eq!(verdict.triggered_by, Some(ValidationStage::Simulation));
}

#[tokio::test]
async fn revert_blocks_with_fail_on_revert() {
    let token = Address::repeat_byte(0xaa);
    let gate = TxGate::builder(config_from(json!({
        "simulation": { "enabled": true, "fail_on_revert": true }
    })))
    .with_simulator(Arc::new(ScriptedSimulator {
        token,
        buy: SimResponse {
            success: false,
            revert_reason: Some("insufficient output amount".to_string()),
            gas_used: 80_000,
            events: Vec::new(),
            balance_deltas: Vec::new(),
            calls: Vec::new(),
        },
        sell: buy_response(token, 0),
    }))
    .build()
    .unwrap();

    let verdict = gate.validate(&native_request(eth(1))).await;
    assert_eq!(verdict.outcome, GateOutcome::Blocked);
    assert_eq!(verdict.triggered_by, Some(ValidationStage::Simulation));
    assert!(verdict.reason.contains("revert"));
}

#[tokio::test]
async fn revert_warns_without_fail_on_revert() {
    let token = Address::repeat_byte(0xaa);
    let gate = TxGate::builder(config_from(json!({
        "simulation": { "enabled": true, "fail_on_revert": false }
    })))
    .with_simulator(Arc::new(ScriptedSimulator {
        token,
        buy: SimResponse {
            success: false,
            revert_reason: Some("reverted".to_string()),
            gas_used: 0,
            events: Vec::new(),
            balance_deltas: Vec::new(),
            calls: Vec::new(),
        },
        sell: buy_response(token, 0),
    }))
    .build()
    .unwrap();

    let verdict = gate.validate(&native_request(eth(1))).await;
    assert_eq!(verdict.outcome, GateOutcome::Warned);
}

// ============================================
// HONEYPOT SCENARIOS
// ============================================

#[tokio::test]
async fn honeypot_round_trip_blocks() {
    init_tracing();
    let token = Address::repeat_byte(0xaa);
    let gate = TxGate::builder(config_from(json!({
        "simulation": { "enabled": true }
    })))
    .with_simulator(Arc::new(ScriptedSimulator {
        token,
        buy: buy_response(token, 1_000),
        sell: SimResponse {
            success: false,
            revert_reason: Some("transfer disabled".to_string()),
            gas_used: 30_000,
            events: Vec::new(),
            balance_deltas: Vec::new(),
            calls: Vec::new(),
        },
    }))
    .build()
    .unwrap();

    let verdict = gate.validate(&native_request(eth(1))).await;

    assert_eq!(verdict.outcome, GateOutcome::Blocked);
    assert_eq!(
        verdict.triggered_by,
        Some(ValidationStage::HoneypotDetection)
    );
    assert!(verdict.stages.honeypot_ran);
    assert_eq!(verdict.honeypot.len(), 1);
    assert_eq!(verdict.honeypot[0].outcome, HoneypotOutcome::Honeypot);
    assert_eq!(verdict.honeypot[0].token, token);
    assert!(verdict.reason.contains("honeypot"));
    assert_events_in_stage_order(&verdict);
}

#[tokio::test]
async fn tradable_token_passes_the_probe() {
    let token = Address::repeat_byte(0xaa);
    let probe_sink = txgate::utils::constants::PROBE_SINK;
    let sell = SimResponse {
        success: true,
        revert_reason: None,
        gas_used: 60_000,
        events: vec![txgate::simulator::SimLog {
            address: token,
            topics: vec![
                txgate::utils::constants::TRANSFER_TOPIC,
                topic_for(sender()),
                topic_for(probe_sink),
            ],
            data: Bytes::from(U256::from(1_000u64).to_be_bytes::<32>().to_vec()),
            name: None,
        }],
        balance_deltas: Vec::new(),
        calls: Vec::new(),
    };

    let gate = TxGate::builder(config_from(json!({
        "simulation": { "enabled": true }
    })))
    .with_simulator(Arc::new(ScriptedSimulator {
        token,
        buy: buy_response(token, 1_000),
        sell,
    }))
    .build()
    .unwrap();

    let verdict = gate.validate(&native_request(eth(1))).await;

    assert_eq!(verdict.outcome, GateOutcome::Allowed);
    assert!(verdict.stages.honeypot_ran);
    assert_eq!(verdict.honeypot[0].outcome, HoneypotOutcome::Tradable);
}

#[tokio::test]
async fn safe_token_purchase_is_not_probed() {
    let weth: Address = "0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2"
        .parse()
        .unwrap();
    // Sell backend would revert; it must never be consulted for WETH
    let gate = TxGate::builder(config_from(json!({
        "simulation": { "enabled": true }
    })))
    .with_simulator(Arc::new(ScriptedSimulator {
        token: weth,
        buy: buy_response(weth, 5_000),
        sell: SimResponse {
            success: false,
            revert_reason: Some("must not be called".to_string()),
            gas_used: 0,
            events: Vec::new(),
            balance_deltas: Vec::new(),
            calls: Vec::new(),
        },
    }))
    .build()
    .unwrap();

    let verdict = gate.validate(&native_request(eth(1))).await;

    assert_eq!(verdict.outcome, GateOutcome::Allowed);
    assert_eq!(verdict.honeypot[0].outcome, HoneypotOutcome::NotApplicable);
}

#[tokio::test]
async fn non_purchase_transaction_skips_the_prober_entirely() {
    let gate = TxGate::builder(config_from(json!({
        "simulation": { "enabled": true }
    })))
    .with_simulator(Arc::new(CleanSimulator))
    .build()
    .unwrap();

    let verdict = gate.validate(&native_request(eth(1))).await;

    assert_eq!(verdict.outcome, GateOutcome::Allowed);
    assert!(!verdict.stages.honeypot_ran);
    assert!(verdict.honeypot.is_empty());
    // No honeypot events at all: the stage was never entered
    assert!(!verdict
        .events
        .iter()
        .any(|e| e.stage == ValidationStage::HoneypotDetection));
}

// ============================================
// RISK JUDGE SCENARIOS
// ============================================

fn llm_config() -> PipelineConfig {
    config_from(json!({
        "policies": [
            { "type": "eth_value_limit", "max_value_wei": "10000000000000000000" }
        ],
        "simulation": { "enabled": true },
        "llm_validation": {
            "enabled": true,
            "provider": "openai",
            "model": "gpt-4o-mini",
            "block_threshold": 0.70,
            "warn_threshold": 0.40
        }
    }))
}

#[tokio::test]
async fn high_confidence_judgment_blocks_despite_clean_stages() {
    let gate = TxGate::builder(llm_config())
        .with_simulator(Arc::new(CleanSimulator))
        .with_risk_model(Arc::new(FixedJudge { confidence: 0.85 }))
        .build()
        .unwrap();

    let verdict = gate.validate(&native_request(eth(1))).await;

    assert_eq!(verdict.outcome, GateOutcome::Blocked);
    assert_eq!(verdict.triggered_by, Some(ValidationStage::LlmValidation));
    assert!(verdict.stages.risk_judged);
    let risk = verdict.risk.as_ref().unwrap();
    assert_eq!(risk.action, RiskAction::Block);
    assert_eq!(risk.risk_level, RiskLevel::Critical);
    // Policies passed and the simulation succeeded; the judge still blocks
    assert!(verdict.policy_decisions.iter().all(|d| !d.failed()));
    assert!(verdict.simulation.as_ref().unwrap().success);
}

#[tokio::test]
async fn mid_confidence_judgment_warns() {
    let gate = TxGate::builder(llm_config())
        .with_simulator(Arc::new(CleanSimulator))
        .with_risk_model(Arc::new(FixedJudge { confidence: 0.55 }))
        .build()
        .unwrap();

    let verdict = gate.validate(&native_request(eth(1))).await;
    assert_eq!(verdict.outcome, GateOutcome::Warned);
    assert_eq!(verdict.risk.as_ref().unwrap().action, RiskAction::Warn);
}

#[tokio::test]
async fn low_confidence_judgment_allows() {
    let gate = TxGate::builder(llm_config())
        .with_simulator(Arc::new(CleanSimulator))
        .with_risk_model(Arc::new(FixedJudge { confidence: 0.1 }))
        .build()
        .unwrap();

    let verdict = gate.validate(&native_request(eth(1))).await;
    assert_eq!(verdict.outcome, GateOutcome::Allowed);
}

#[tokio::test]
async fn enabled_llm_without_backend_is_a_skip_not_a_failure() {
    // Capability resolved at construction: enabled but no endpoint and no
    // injected model means the stage is typed-absent
    let gate = TxGate::builder(llm_config())
        .with_simulator(Arc::new(CleanSimulator))
        .build()
        .unwrap();

    let verdict = gate.validate(&native_request(eth(1))).await;
    assert_eq!(verdict.outcome, GateOutcome::Allowed);
    assert!(!verdict.stages.risk_judged);
    let event = verdict
        .events
        .iter()
        .find(|e| e.stage == ValidationStage::LlmValidation)
        .unwrap();
    assert_eq!(event.status, EventStatus::Skipped);
}

// ============================================
// INTENT AND VERDICT SHAPE
// ============================================

#[tokio::test]
async fn empty_calldata_always_parses_as_native_transfer() {
    let gate = TxGate::new(config_from(json!({ "simulation": { "enabled": false } }))).unwrap();
    for value in [U256::ZERO, eth(3)] {
        let verdict = gate.validate(&native_request(value)).await;
        assert_eq!(verdict.intent.kind, IntentKind::NativeTransfer);
    }
}

#[tokio::test]
async fn configuration_error_is_fatal_before_any_run() {
    let mut config = PipelineConfig::default();
    config.llm_validation.enabled = true;
    config.llm_validation.warn_threshold = 0.9;
    config.llm_validation.block_threshold = 0.5;

    let err = TxGate::new(config).unwrap_err();
    assert!(err.code.is_fatal());
}

#[tokio::test]
async fn verdict_serializes_with_full_event_trail() {
    let gate = TxGate::new(config_from(json!({
        "policies": [
            { "type": "eth_value_limit", "max_value_wei": "1000000000000000000" }
        ],
        "simulation": { "enabled": false }
    })))
    .unwrap();

    let verdict = gate.validate(&native_request(eth(2))).await;
    let encoded = serde_json::to_value(&verdict).unwrap();

    assert_eq!(encoded["outcome"], "blocked");
    assert_eq!(encoded["triggered_by"], "policy_validation");
    assert!(encoded["events"].as_array().unwrap().len() >= 3);
    // Every event record is independently shaped for streaming
    for event in encoded["events"].as_array().unwrap() {
        assert!(event.get("stage").is_some());
        assert!(event.get("status").is_some());
        assert!(event.get("message").is_some());
        assert!(event.get("timestamp").is_some());
    }
}
