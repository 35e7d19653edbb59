//! Pipeline orchestrator
//! Sequences the validation stages, applies short-circuit and
//! aggregation rules, and emits the ordered event stream plus the final
//! verdict.
//!
//! States: Started -> IntentParsed -> PolicyChecked -> Simulated ->
//! HoneypotChecked -> RiskJudged -> Completed, with an absorbing Blocked
//! state reachable from any of them. A block, once reached, prevents any
//! later stage from running and is irreversible within the run.

use alloy_primitives::utils::format_ether;
use alloy_primitives::Address;
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::events::{EventSink, EventStatus, TracingSink, ValidationEvent, ValidationStage};
use crate::honeypot::HoneypotProber;
use crate::intent::IntentParser;
use crate::models::config::{PipelineConfig, PolicySpec};
use crate::models::errors::{GateError, GateResult};
use crate::models::types::{
    GateOutcome, GateVerdict, HoneypotOutcome, HoneypotVerdict, ParsedIntent, PolicyDecision,
    PolicyOutcome, RiskAction, RiskAssessment, SimulationResult, StageFlags, TxRequest,
};
use crate::policy;
use crate::risk::{HttpRiskJudge, RiskJudge, RiskModel, SecurityIndicators};
use crate::simulator::{HttpSimulator, RevmSimulator, SimulationClient, Simulator};

// ============================================
// STATE MACHINE
// ============================================

/// Orchestrator states. `Blocked` is absorbing: no transition leaves it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Started,
    IntentParsed,
    PolicyChecked,
    Simulated,
    HoneypotChecked,
    RiskJudged,
    Completed,
    Blocked,
}

impl PipelineState {
    /// Advance to the next state. Once blocked, every transition stays
    /// blocked.
    pub fn advance(self, next: PipelineState) -> PipelineState {
        if self == PipelineState::Blocked {
            return PipelineState::Blocked;
        }
        next
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Completed | PipelineState::Blocked)
    }
}

// ============================================
// RUN TRACE
// ============================================

/// Per-run event buffer. Events go to the sink as they are produced
/// (streaming contract) and into the buffer for the verdict.
struct RunTrace<'a> {
    sink: &'a dyn EventSink,
    events: Vec<ValidationEvent>,
    warned: bool,
}

impl<'a> RunTrace<'a> {
    fn new(sink: &'a dyn EventSink) -> Self {
        Self {
            sink,
            events: Vec::new(),
            warned: false,
        }
    }

    fn emit(
        &mut self,
        stage: ValidationStage,
        status: EventStatus,
        message: impl Into<String>,
        details: serde_json::Value,
    ) {
        if status == EventStatus::Warning {
            self.warned = true;
        }
        let event = ValidationEvent::new(stage, status, message, details);
        self.sink.emit(&event);
        self.events.push(event);
    }
}

// ============================================
// BUILDER
// ============================================

/// Assembles a [`TxGate`] with explicit collaborators. Backends left
/// unset fall back to what the configuration describes: an HTTP
/// simulator when an endpoint is configured, the in-process REVM backend
/// otherwise, and no risk judge unless the capability is actually
/// available.
pub struct TxGateBuilder {
    config: PipelineConfig,
    simulator: Option<Arc<dyn Simulator>>,
    risk_model: Option<Arc<dyn RiskModel>>,
    sink: Option<Arc<dyn EventSink>>,
}

impl TxGateBuilder {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            simulator: None,
            risk_model: None,
            sink: None,
        }
    }

    /// Inject a simulator backend (tests, alternative services).
    pub fn with_simulator(mut self, simulator: Arc<dyn Simulator>) -> Self {
        self.simulator = Some(simulator);
        self
    }

    /// Inject a risk model backend.
    pub fn with_risk_model(mut self, model: Arc<dyn RiskModel>) -> Self {
        self.risk_model = Some(model);
        self
    }

    /// Replace the default tracing sink.
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Validate the configuration and resolve every capability once.
    /// Configuration problems surface here, before any run begins.
    pub fn build(self) -> GateResult<TxGate> {
        let config = self.config;
        config.validate()?;

        let sink = self
            .sink
            .unwrap_or_else(|| Arc::new(TracingSink::new(config.logging.level)));

        let simulation = if config.simulation.enabled {
            let timeout = Duration::from_millis(config.simulation.timeout_ms);
            let backend: Arc<dyn Simulator> = match (self.simulator, &config.simulation.endpoint) {
                (Some(backend), _) => backend,
                (None, Some(endpoint)) => Arc::new(
                    HttpSimulator::new(endpoint.clone(), timeout)
                        .map_err(|e| GateError::config(format!("simulation.endpoint: {e}")))?,
                ),
                (None, None) => Arc::new(RevmSimulator::new(1)),
            };
            Some(SimulationClient::new(backend, timeout))
        } else {
            None
        };

        // The risk judge is a typed capability: present only when the
        // stage is enabled and a backend actually exists.
        let llm = &config.llm_validation;
        let judge = if llm.enabled {
            let timeout = Duration::from_millis(llm.timeout_ms);
            let model: Option<Arc<dyn RiskModel>> = match (self.risk_model, &llm.endpoint) {
                (Some(model), _) => Some(model),
                (None, Some(endpoint)) => Some(Arc::new(
                    HttpRiskJudge::new(
                        endpoint.clone(),
                        llm.provider.clone(),
                        llm.model.clone(),
                        llm.api_key.as_deref(),
                        timeout,
                    )
                    .map_err(|e| GateError::config(format!("llm_validation: {e}")))?,
                )),
                (None, None) => None,
            };
            model.map(|m| RiskJudge::new(m, llm.warn_threshold, llm.block_threshold, timeout))
        } else {
            None
        };

        let prober = HoneypotProber::new(config.honeypot.effective_safe_tokens());
        let known_spenders = known_spenders(&config);

        Ok(TxGate {
            config,
            simulation,
            prober,
            judge,
            known_spenders,
            sink,
        })
    }
}

/// Addresses considered "known" for the approval-to-unknown indicator:
/// every configured allowlist entry plus the safe-token set.
fn known_spenders(config: &PipelineConfig) -> HashSet<Address> {
    let mut set = config.honeypot.effective_safe_tokens();
    for spec in &config.policies {
        if let PolicySpec::AddressAllowlist {
            allowed_addresses, ..
        } = spec
        {
            set.extend(allowed_addresses.iter().copied());
        }
    }
    set
}

// ============================================
// ORCHESTRATOR
// ============================================

/// The validation pipeline. One instance serves many concurrent runs;
/// all per-run state lives on the stack of [`TxGate::validate`].
pub struct TxGate {
    config: PipelineConfig,
    simulation: Option<SimulationClient>,
    prober: HoneypotProber,
    judge: Option<RiskJudge>,
    known_spenders: HashSet<Address>,
    sink: Arc<dyn EventSink>,
}

impl std::fmt::Debug for TxGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TxGate")
            .field("config", &self.config)
            .field("simulation", &self.simulation.is_some())
            .field("judge", &self.judge.is_some())
            .field("known_spenders", &self.known_spenders)
            .finish_non_exhaustive()
    }
}

/// Artifacts accumulated while a run progresses.
struct RunArtifacts {
    intent: ParsedIntent,
    decisions: Vec<PolicyDecision>,
    simulation: Option<SimulationResult>,
    honeypot: Vec<HoneypotVerdict>,
    risk: Option<RiskAssessment>,
    flags: StageFlags,
}

impl TxGate {
    /// Build a gate with default collaborators.
    pub fn new(config: PipelineConfig) -> GateResult<Self> {
        TxGateBuilder::new(config).build()
    }

    pub fn builder(config: PipelineConfig) -> TxGateBuilder {
        TxGateBuilder::new(config)
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Validate one transaction. The sole entry point: always returns a
    /// complete verdict with the full event trail; nothing escapes as an
    /// error.
    pub async fn validate(&self, request: &TxRequest) -> GateVerdict {
        let run_id = Uuid::new_v4();
        let mut trace = RunTrace::new(self.sink.as_ref());
        let mut state = PipelineState::Started;

        let mut artifacts = RunArtifacts {
            intent: IntentParser::parse(request),
            decisions: Vec::new(),
            simulation: None,
            honeypot: Vec::new(),
            risk: None,
            flags: StageFlags::default(),
        };

        // Master switch: everything bypassed, explicitly.
        if !self.config.enabled {
            trace.emit(
                ValidationStage::Completed,
                EventStatus::Skipped,
                "validation pipeline disabled via config",
                json!({ "run_id": run_id.to_string() }),
            );
            return self.verdict(
                run_id,
                GateOutcome::Allowed,
                None,
                "validation pipeline disabled via config",
                trace,
                artifacts,
            );
        }

        trace.emit(
            ValidationStage::Started,
            EventStatus::Started,
            "starting transaction validation",
            json!({
                "run_id": run_id.to_string(),
                "to": request.to.to_string(),
                "value": request.value.to_string(),
            }),
        );

        // ============================================
        // STAGE 1: INTENT ANALYSIS (never fails)
        // ============================================
        state = state.advance(PipelineState::IntentParsed);
        if let Some(note) = &artifacts.intent.note {
            trace.emit(
                ValidationStage::IntentAnalysis,
                EventStatus::Info,
                format!("calldata decoding anomaly: {note}"),
                json!({ "note": note }),
            );
        }
        trace.emit(
            ValidationStage::IntentAnalysis,
            EventStatus::Passed,
            format!(
                "intent: {} ({})",
                artifacts.intent.kind.as_str(),
                artifacts
                    .intent
                    .function_name
                    .as_deref()
                    .unwrap_or("no function")
            ),
            json!({
                "kind": artifacts.intent.kind.as_str(),
                "function": artifacts.intent.function_name.clone(),
                "value_eth": format_ether(request.value),
                "recipient": artifacts.intent.recipient().map(|a| a.to_string()),
                "token_amount": artifacts.intent.token_amount().map(|a| a.to_string()),
            }),
        );

        // ============================================
        // STAGE 2: POLICY VALIDATION
        // ============================================
        state = state.advance(PipelineState::PolicyChecked);
        if self.config.policies.is_empty() {
            trace.emit(
                ValidationStage::PolicyValidation,
                EventStatus::Skipped,
                "no policies configured",
                serde_json::Value::Null,
            );
        } else {
            trace.emit(
                ValidationStage::PolicyValidation,
                EventStatus::Started,
                format!("running {} policy validator(s)", self.config.policies.len()),
                serde_json::Value::Null,
            );

            artifacts.decisions = policy::evaluate_all(
                &artifacts.intent,
                request,
                &self.config.policies,
                self.config.fail_fast,
            );

            for decision in &artifacts.decisions {
                let (status, message) = match decision.outcome {
                    PolicyOutcome::Pass => (
                        EventStatus::Info,
                        format!("{}: PASSED", decision.policy.as_str()),
                    ),
                    PolicyOutcome::Skipped => (
                        EventStatus::Skipped,
                        format!("{}: skipped (disabled)", decision.policy.as_str()),
                    ),
                    PolicyOutcome::Fail => (
                        EventStatus::Failed,
                        format!("policy violation: {}", decision.reason),
                    ),
                };
                trace.emit(
                    ValidationStage::PolicyValidation,
                    status,
                    message,
                    json!({
                        "rule": decision.policy.as_str(),
                        "outcome": decision.outcome,
                        "field": decision.field.clone(),
                    }),
                );
            }

            let failures: Vec<&PolicyDecision> =
                artifacts.decisions.iter().filter(|d| d.failed()).collect();
            if !failures.is_empty() {
                let reason = failures
                    .iter()
                    .map(|d| d.reason.as_str())
                    .collect::<Vec<_>>()
                    .join("; ");
                let _ = state.advance(PipelineState::Blocked);
                return self.finalize_blocked(
                    run_id,
                    ValidationStage::PolicyValidation,
                    reason,
                    trace,
                    artifacts,
                );
            }

            trace.emit(
                ValidationStage::PolicyValidation,
                EventStatus::Passed,
                "all policy validators passed",
                serde_json::Value::Null,
            );
        }

        // ============================================
        // STAGE 3: SIMULATION
        // ============================================
        state = state.advance(PipelineState::Simulated);
        match &self.simulation {
            None => {
                trace.emit(
                    ValidationStage::Simulation,
                    EventStatus::Skipped,
                    "simulation disabled",
                    serde_json::Value::Null,
                );
                trace.emit(
                    ValidationStage::HoneypotDetection,
                    EventStatus::Skipped,
                    "honeypot detection requires simulation",
                    serde_json::Value::Null,
                );
            }
            Some(client) => {
                trace.emit(
                    ValidationStage::Simulation,
                    EventStatus::Started,
                    "submitting dry-run execution",
                    serde_json::Value::Null,
                );
                artifacts.flags.simulation_ran = true;

                match client.run(request).await {
                    Err(e) => {
                        // Transport failure or timeout. Degrades to a
                        // warning unless the configuration demands a
                        // working simulator.
                        artifacts.simulation =
                            Some(SimulationResult::unavailable("simulation unavailable"));
                        let required =
                            self.config.simulation.fail_on_revert && self.config.simulation.required;
                        if required {
                            trace.emit(
                                ValidationStage::Simulation,
                                EventStatus::Failed,
                                format!("simulation unavailable: {e}"),
                                json!({ "code": e.code_str() }),
                            );
                            let _ = state.advance(PipelineState::Blocked);
                            return self.finalize_blocked(
                                run_id,
                                ValidationStage::Simulation,
                                "simulation unavailable but required",
                                trace,
                                artifacts,
                            );
                        }
                        trace.emit(
                            ValidationStage::Simulation,
                            EventStatus::Warning,
                            format!("simulation unavailable: {e}"),
                            json!({ "code": e.code_str() }),
                        );
                    }
                    Ok(result) if !result.success => {
                        let reason = result
                            .revert_reason
                            .clone()
                            .unwrap_or_else(|| "no reason given".to_string());
                        if self.config.simulation.fail_on_revert {
                            trace.emit(
                                ValidationStage::Simulation,
                                EventStatus::Failed,
                                format!("transaction would revert: {reason}"),
                                json!({ "revert_reason": reason.clone(), "gas_used": result.gas_used }),
                            );
                            artifacts.simulation = Some(result);
                            let _ = state.advance(PipelineState::Blocked);
                            return self.finalize_blocked(
                                run_id,
                                ValidationStage::Simulation,
                                format!("transaction would revert: {reason}"),
                                trace,
                                artifacts,
                            );
                        }
                        trace.emit(
                            ValidationStage::Simulation,
                            EventStatus::Warning,
                            format!("simulation reverted but fail_on_revert is off: {reason}"),
                            json!({ "revert_reason": reason.clone() }),
                        );
                        artifacts.simulation = Some(result);
                    }
                    Ok(result) => {
                        let deltas: Vec<String> = result
                            .asset_changes
                            .iter()
                            .map(|c| format!("{}:{} {}", c.token, c.account, c.delta))
                            .collect();
                        trace.emit(
                            ValidationStage::Simulation,
                            EventStatus::Passed,
                            format!("simulation passed (gas: {})", result.gas_used),
                            json!({
                                "gas_used": result.gas_used,
                                "events": result.events.len(),
                                "asset_changes": deltas,
                            }),
                        );
                        if self.config.simulation.estimate_gas {
                            trace.emit(
                                ValidationStage::Simulation,
                                EventStatus::Info,
                                format!("estimated gas: {}", result.gas_used),
                                json!({ "estimated_gas": result.gas_used }),
                            );
                        }
                        artifacts.simulation = Some(result);

                        // ============================================
                        // STAGE 4: HONEYPOT DETECTION
                        // ============================================
                        state = state.advance(PipelineState::HoneypotChecked);
                        if !self.config.honeypot.enabled {
                            trace.emit(
                                ValidationStage::HoneypotDetection,
                                EventStatus::Skipped,
                                "honeypot detection disabled",
                                serde_json::Value::Null,
                            );
                        } else if let Some(blocked) = self
                            .run_honeypot_stage(client, request, &mut trace, &mut artifacts)
                            .await
                        {
                            let _ = state.advance(PipelineState::Blocked);
                            return self.finalize_blocked(
                                run_id,
                                ValidationStage::HoneypotDetection,
                                blocked,
                                trace,
                                artifacts,
                            );
                        }
                    }
                }
            }
        }

        // ============================================
        // STAGE 5: LLM RISK JUDGMENT
        // ============================================
        state = state.advance(PipelineState::RiskJudged);
        match &self.judge {
            None => {
                let message = if self.config.llm_validation.enabled {
                    "risk judge skipped: no backend configured"
                } else {
                    "llm validation disabled"
                };
                trace.emit(
                    ValidationStage::LlmValidation,
                    EventStatus::Skipped,
                    message,
                    serde_json::Value::Null,
                );
            }
            Some(judge) => {
                artifacts.flags.risk_judged = true;
                trace.emit(
                    ValidationStage::LlmValidation,
                    EventStatus::Started,
                    "analyzing transaction for malicious patterns",
                    serde_json::Value::Null,
                );

                let indicators = SecurityIndicators::extract(
                    &artifacts.intent,
                    request,
                    &artifacts.decisions,
                    artifacts.simulation.as_ref(),
                    &artifacts.honeypot,
                    &self.known_spenders,
                );
                trace.emit(
                    ValidationStage::LlmValidation,
                    EventStatus::Info,
                    "security indicators computed",
                    json!({ "flags": indicators.raised_flags() }),
                );

                match judge.assess(&indicators).await {
                    Err(e) => {
                        trace.emit(
                            ValidationStage::LlmValidation,
                            EventStatus::Warning,
                            format!("risk judge unavailable: {e}"),
                            json!({ "code": e.code_str() }),
                        );
                    }
                    Ok(assessment) => {
                        let details = json!({
                            "confidence": assessment.confidence,
                            "risk_level": assessment.risk_level.as_str(),
                            "indicators": assessment.indicators.clone(),
                        });
                        match assessment.action {
                            RiskAction::Block => {
                                let reason = format!(
                                    "risk judge recommends block: {} (confidence {:.0}%)",
                                    assessment.reason,
                                    assessment.confidence * 100.0
                                );
                                trace.emit(
                                    ValidationStage::LlmValidation,
                                    EventStatus::Failed,
                                    reason.clone(),
                                    details,
                                );
                                artifacts.risk = Some(assessment);
                                let _ = state.advance(PipelineState::Blocked);
                                return self.finalize_blocked(
                                    run_id,
                                    ValidationStage::LlmValidation,
                                    reason,
                                    trace,
                                    artifacts,
                                );
                            }
                            RiskAction::Warn => {
                                trace.emit(
                                    ValidationStage::LlmValidation,
                                    EventStatus::Warning,
                                    format!("risk judge warning: {}", assessment.reason),
                                    details,
                                );
                                artifacts.risk = Some(assessment);
                            }
                            RiskAction::Allow => {
                                trace.emit(
                                    ValidationStage::LlmValidation,
                                    EventStatus::Passed,
                                    "no malicious activity detected",
                                    details,
                                );
                                artifacts.risk = Some(assessment);
                            }
                        }
                    }
                }
            }
        }

        // ============================================
        // COMPLETED
        // ============================================
        state = state.advance(PipelineState::Completed);
        debug_assert!(state.is_terminal());

        let (outcome, status, message) = if trace.warned {
            (
                GateOutcome::Warned,
                EventStatus::Warning,
                "ALLOWED with warnings: review the event trail",
            )
        } else {
            (
                GateOutcome::Allowed,
                EventStatus::Passed,
                "ALLOWED: all security checks passed",
            )
        };
        trace.emit(
            ValidationStage::Completed,
            status,
            message,
            json!({ "outcome": outcome.as_str() }),
        );

        self.verdict(run_id, outcome, None, message, trace, artifacts)
    }

    /// Probe every token the dry run credited to the sender. Returns the
    /// block reason when a honeypot surfaces.
    async fn run_honeypot_stage(
        &self,
        client: &SimulationClient,
        request: &TxRequest,
        trace: &mut RunTrace<'_>,
        artifacts: &mut RunArtifacts,
    ) -> Option<String> {
        let simulation = artifacts.simulation.as_ref()?;
        let candidates: Vec<_> = self
            .prober
            .candidates(simulation, request.from)
            .into_iter()
            .cloned()
            .collect();

        // Not a purchase: the stage is never entered and costs nothing.
        if candidates.is_empty() {
            return None;
        }

        artifacts.flags.honeypot_ran = true;
        trace.emit(
            ValidationStage::HoneypotDetection,
            EventStatus::Started,
            format!(
                "token purchase detected, probing {} token(s) for resale",
                candidates.len()
            ),
            json!({ "tokens": candidates.iter().map(|c| c.token.to_string()).collect::<Vec<_>>() }),
        );

        for change in &candidates {
            match self.prober.probe(client, request.from, change).await {
                Err(e) => {
                    // An unreachable simulator is not evidence of a
                    // honeypot.
                    trace.emit(
                        ValidationStage::HoneypotDetection,
                        EventStatus::Warning,
                        format!("honeypot probe unavailable for {}: {e}", change.token),
                        json!({ "token": change.token.to_string(), "code": e.code_str() }),
                    );
                }
                Ok(verdict) => {
                    match verdict.outcome {
                        HoneypotOutcome::NotApplicable => {
                            trace.emit(
                                ValidationStage::HoneypotDetection,
                                EventStatus::Info,
                                format!("token {} is on the safe list, probe skipped", verdict.token),
                                json!({ "token": verdict.token.to_string() }),
                            );
                        }
                        HoneypotOutcome::Tradable => {
                            trace.emit(
                                ValidationStage::HoneypotDetection,
                                EventStatus::Info,
                                format!("token {} can be sold normally", verdict.token),
                                json!({ "token": verdict.token.to_string() }),
                            );
                        }
                        HoneypotOutcome::Honeypot => {
                            let reason = format!(
                                "honeypot detected for token {}: {}",
                                verdict.token,
                                verdict.reason.as_deref().unwrap_or("probe failed")
                            );
                            trace.emit(
                                ValidationStage::HoneypotDetection,
                                EventStatus::Failed,
                                reason.clone(),
                                json!({
                                    "token": verdict.token.to_string(),
                                    "reason": verdict.reason.clone(),
                                }),
                            );
                            artifacts.honeypot.push(verdict);
                            return Some(reason);
                        }
                    }
                    artifacts.honeypot.push(verdict);
                }
            }
        }

        trace.emit(
            ValidationStage::HoneypotDetection,
            EventStatus::Passed,
            "no honeypot detected",
            serde_json::Value::Null,
        );
        None
    }

    /// Emit the terminal failure event and assemble a blocked verdict.
    fn finalize_blocked(
        &self,
        run_id: Uuid,
        stage: ValidationStage,
        reason: impl Into<String>,
        mut trace: RunTrace<'_>,
        artifacts: RunArtifacts,
    ) -> GateVerdict {
        let reason = reason.into();
        trace.emit(
            ValidationStage::Completed,
            EventStatus::Failed,
            format!("BLOCKED: {reason}"),
            json!({ "stage": stage.as_str(), "reason": reason.clone() }),
        );
        self.verdict(
            run_id,
            GateOutcome::Blocked,
            Some(stage),
            reason,
            trace,
            artifacts,
        )
    }

    fn verdict(
        &self,
        run_id: Uuid,
        outcome: GateOutcome,
        triggered_by: Option<ValidationStage>,
        reason: impl Into<String>,
        trace: RunTrace<'_>,
        artifacts: RunArtifacts,
    ) -> GateVerdict {
        GateVerdict {
            run_id,
            outcome,
            triggered_by,
            reason: reason.into(),
            events: trace.events,
            intent: artifacts.intent,
            policy_decisions: artifacts.decisions,
            simulation: artifacts.simulation,
            honeypot: artifacts.honeypot,
            risk: artifacts.risk,
            stages: artifacts.flags,
        }
    }
}
