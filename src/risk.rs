//! Risk judge
//! Converts deterministic indicator flags into a calibrated
//! malicious-probability score via a language-model backend.
//!
//! The backend only ever sees a pre-extracted indicator summary, never
//! raw traces or bytes: extraction is pure, local, and testable without
//! any LLM access. The stage is optional and degrades to a warning on any
//! transport or shape failure.

use alloy_primitives::{Address, I256, U256};
use async_trait::async_trait;
use eyre::{eyre, Result};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, USER_AGENT};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::models::errors::{ErrorCode, GateError, GateResult};
use crate::models::types::{
    HoneypotVerdict, IntentKind, ParsedIntent, PolicyDecision, RiskAction, RiskAssessment,
    RiskLevel, SimulationResult, TxRequest,
};
use crate::utils::constants::{NATIVE_ASSET, UNLIMITED_APPROVAL, USER_AGENT as USER_AGENT_CONST};

// ============================================
// SECURITY INDICATORS
// ============================================

/// Deterministic indicator summary handed to the model. Every field is
/// computed locally from stage artifacts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityIndicators {
    /// Decoded intent
    pub intent_kind: String,
    pub function_name: Option<String>,
    pub value_wei: U256,
    /// Reasons of failed policy checks, in configured order
    pub policy_failures: Vec<String>,
    /// Whether the dry run executed, when one ran
    pub simulation_success: Option<bool>,
    /// Human-readable sender balance deltas from the dry run
    pub sender_deltas: Vec<String>,
    /// Honeypot probe outcome, when the probe ran
    pub honeypot_outcome: Option<String>,

    // Fixed checklist
    /// Approval for the maximum representable amount
    pub unlimited_approval: bool,
    /// Approval whose spender is outside the configured known set
    pub approval_to_unknown: bool,
    /// Any delegatecall frame in the dry run
    pub delegatecall_present: bool,
    /// Call frames re-entering the sender's own address
    pub reentrant_calls_to_sender: u32,
    /// Worst-asset percentage lost between sender outflow and what
    /// counterparties visibly received
    pub hidden_fee_pct: f64,
    /// Transfer intent simulated successfully yet emitted no Transfer
    /// events
    pub transfer_without_events: bool,
}

impl SecurityIndicators {
    /// Extract the summary from the run's artifacts. Pure; identical
    /// inputs produce identical indicators.
    pub fn extract(
        intent: &ParsedIntent,
        request: &TxRequest,
        decisions: &[PolicyDecision],
        simulation: Option<&SimulationResult>,
        honeypot: &[HoneypotVerdict],
        known_spenders: &HashSet<Address>,
    ) -> Self {
        let policy_failures = decisions
            .iter()
            .filter(|d| d.failed())
            .map(|d| d.reason.clone())
            .collect();

        let is_approve = intent.kind == IntentKind::Erc20Approve;
        let unlimited_approval =
            is_approve && intent.token_amount() == Some(UNLIMITED_APPROVAL);
        let approval_to_unknown = is_approve
            && intent
                .recipient()
                .map(|spender| !known_spenders.contains(&spender))
                .unwrap_or(true);

        let delegatecall_present = simulation
            .map(|sim| {
                sim.call_frames
                    .iter()
                    .any(|f| f.call_type.eq_ignore_ascii_case("delegatecall"))
            })
            .unwrap_or(false);

        let reentrant_calls_to_sender = simulation
            .map(|sim| {
                sim.call_frames
                    .iter()
                    .filter(|f| f.to == request.from && f.from != request.from)
                    .count() as u32
            })
            .unwrap_or(0);

        let sender_deltas = simulation
            .map(|sim| {
                sim.asset_changes
                    .iter()
                    .filter(|c| c.account == request.from)
                    .map(|c| {
                        let asset = if c.token == NATIVE_ASSET {
                            "native".to_string()
                        } else {
                            c.token.to_string()
                        };
                        format!("{asset}: {}", c.delta)
                    })
                    .collect()
            })
            .unwrap_or_default();

        let transfer_without_events = intent.kind == IntentKind::Erc20Transfer
            && simulation
                .map(|sim| sim.success && sim.transfer_event_count(request.to) == 0)
                .unwrap_or(false);

        let hidden_fee_pct = simulation
            .map(|sim| hidden_fee_pct(sim, request.from))
            .unwrap_or(0.0);

        let honeypot_outcome = honeypot
            .iter()
            .map(|v| v.outcome)
            .max_by_key(|o| *o as u8)
            .map(|o| o.as_str().to_string());

        Self {
            intent_kind: intent.kind.as_str().to_string(),
            function_name: intent.function_name.clone(),
            value_wei: request.value,
            policy_failures,
            simulation_success: simulation.map(|sim| sim.success),
            sender_deltas,
            honeypot_outcome,
            unlimited_approval,
            approval_to_unknown,
            delegatecall_present,
            reentrant_calls_to_sender,
            hidden_fee_pct,
            transfer_without_events,
        }
    }

    /// Named tags for every raised flag, mirrored into event details.
    pub fn raised_flags(&self) -> Vec<&'static str> {
        let mut flags = Vec::new();
        if self.unlimited_approval {
            flags.push("unlimited_approval");
        }
        if self.approval_to_unknown {
            flags.push("approval_to_unknown");
        }
        if self.delegatecall_present {
            flags.push("delegatecall_present");
        }
        if self.reentrant_calls_to_sender > 0 {
            flags.push("reentrant_calls_to_sender");
        }
        if self.hidden_fee_pct > 0.0 {
            flags.push("hidden_fee");
        }
        if self.transfer_without_events {
            flags.push("no_transfer_events");
        }
        if !self.policy_failures.is_empty() {
            flags.push("policy_failures");
        }
        flags
    }
}

/// Worst-asset fee between what the sender paid out and what
/// counterparties visibly received, in percent.
fn hidden_fee_pct(simulation: &SimulationResult, sender: Address) -> f64 {
    let mut worst: f64 = 0.0;
    for change in &simulation.asset_changes {
        if change.account != sender || change.delta >= I256::ZERO {
            continue;
        }
        let outflow = signed_to_f64(change.delta).abs();
        if outflow == 0.0 {
            continue;
        }
        let received: f64 = simulation
            .asset_changes
            .iter()
            .filter(|c| c.token == change.token && c.account != sender && c.delta > I256::ZERO)
            .map(|c| signed_to_f64(c.delta))
            .sum();
        let fee = ((outflow - received) / outflow * 100.0).clamp(0.0, 100.0);
        if fee > worst {
            worst = fee;
        }
    }
    worst
}

fn signed_to_f64(value: I256) -> f64 {
    let abs: u128 = value.unsigned_abs().try_into().unwrap_or(u128::MAX);
    let magnitude = abs as f64;
    if value.is_negative() {
        -magnitude
    } else {
        magnitude
    }
}

// ============================================
// RISK MODEL BOUNDARY
// ============================================

/// A backend that turns an indicator summary into a risk assessment.
#[async_trait]
pub trait RiskModel: Send + Sync {
    async fn assess(&self, indicators: &SecurityIndicators) -> Result<RiskAssessment>;
}

/// Applies the pipeline's timeout and threshold rules around a model.
pub struct RiskJudge {
    model: Arc<dyn RiskModel>,
    warn_threshold: f64,
    block_threshold: f64,
    timeout: Duration,
}

impl RiskJudge {
    pub fn new(
        model: Arc<dyn RiskModel>,
        warn_threshold: f64,
        block_threshold: f64,
        timeout: Duration,
    ) -> Self {
        Self {
            model,
            warn_threshold,
            block_threshold,
            timeout,
        }
    }

    /// Run the model. The recommended action is always derived locally
    /// from the configured thresholds, whatever the backend suggested.
    pub async fn assess(&self, indicators: &SecurityIndicators) -> GateResult<RiskAssessment> {
        let mut assessment =
            match tokio::time::timeout(self.timeout, self.model.assess(indicators)).await {
                Err(_) => {
                    return Err(GateError::new(
                        ErrorCode::RiskJudgeTimeout,
                        format!("risk judge did not answer within {}ms", self.timeout.as_millis()),
                    ))
                }
                Ok(Err(e)) => {
                    return Err(GateError::risk_judge_unavailable(format!(
                        "risk judge transport failure: {e}"
                    )))
                }
                Ok(Ok(assessment)) => assessment,
            };

        if !(0.0..=1.0).contains(&assessment.confidence) || assessment.confidence.is_nan() {
            return Err(GateError::risk_judge_bad_response(format!(
                "confidence {} outside 0.0..=1.0",
                assessment.confidence
            )));
        }

        assessment.action = RiskAction::from_thresholds(
            assessment.confidence,
            self.warn_threshold,
            self.block_threshold,
        );
        debug!(
            confidence = assessment.confidence,
            action = assessment.action.as_str(),
            "risk judge answered"
        );
        Ok(assessment)
    }
}

// ============================================
// HTTP BACKEND
// ============================================

/// Fixed instruction template sent with every request. The model reasons
/// over the flags only; it never sees raw calldata or traces.
const INSTRUCTION: &str = "You are a blockchain transaction security judge. \
You receive pre-computed security indicators for one outbound transaction. \
Assess the probability that the transaction is malicious (wallet draining, \
hidden approvals, honeypot purchases, re-entrancy abuse, hidden fees). \
Respond with a single JSON object: {\"malicious\": bool, \
\"confidence\": float 0.0-1.0, \"risk_level\": \"LOW|MEDIUM|HIGH|CRITICAL\", \
\"action\": \"ALLOW|WARN|BLOCK\", \"reason\": string, \
\"indicators\": [string]}. No other output.";

#[derive(Serialize)]
struct JudgeRequest<'a> {
    provider: &'a str,
    model: &'a str,
    instruction: &'static str,
    indicators: &'a SecurityIndicators,
}

/// The only response shape accepted from the backend.
#[derive(Deserialize)]
struct JudgeResponse {
    malicious: bool,
    confidence: f64,
    risk_level: String,
    action: String,
    reason: String,
    #[serde(default)]
    indicators: Vec<String>,
}

/// LLM-backed risk model speaking JSON over HTTP.
pub struct HttpRiskJudge {
    endpoint: String,
    provider: String,
    model: String,
    client: reqwest::Client,
}

impl HttpRiskJudge {
    pub fn new(
        endpoint: impl Into<String>,
        provider: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<&str>,
        timeout: Duration,
    ) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_CONST));
        if let Some(key) = api_key {
            let value = HeaderValue::from_str(&format!("Bearer {key}"))
                .map_err(|e| eyre!("invalid API key: {e}"))?;
            headers.insert(AUTHORIZATION, value);
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| eyre!("failed to build HTTP client: {e}"))?;

        Ok(Self {
            endpoint: endpoint.into(),
            provider: provider.into(),
            model: model.into(),
            client,
        })
    }

    fn parse_verdict(response: JudgeResponse) -> Result<RiskAssessment> {
        let risk_level = match response.risk_level.to_ascii_uppercase().as_str() {
            "LOW" => RiskLevel::Low,
            "MEDIUM" => RiskLevel::Medium,
            "HIGH" => RiskLevel::High,
            "CRITICAL" => RiskLevel::Critical,
            other => return Err(eyre!("unknown risk_level '{other}'")),
        };
        let action = match response.action.to_ascii_uppercase().as_str() {
            "ALLOW" => RiskAction::Allow,
            "WARN" => RiskAction::Warn,
            "BLOCK" => RiskAction::Block,
            other => return Err(eyre!("unknown action '{other}'")),
        };
        Ok(RiskAssessment {
            malicious: response.malicious,
            confidence: response.confidence,
            risk_level,
            action,
            reason: response.reason,
            indicators: response.indicators,
        })
    }
}

#[async_trait]
impl RiskModel for HttpRiskJudge {
    async fn assess(&self, indicators: &SecurityIndicators) -> Result<RiskAssessment> {
        let request = JudgeRequest {
            provider: &self.provider,
            model: &self.model,
            instruction: INSTRUCTION,
            indicators,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| eyre!("risk judge request failed: {e}"))?;

        let status = response.status();
        if !status.is_success() {
            return Err(eyre!("risk judge returned HTTP {status}"));
        }

        let verdict = response
            .json::<JudgeResponse>()
            .await
            .map_err(|e| eyre!("risk judge response did not match the accepted shape: {e}"))?;

        Self::parse_verdict(verdict)
    }
}
