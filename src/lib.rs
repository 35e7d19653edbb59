//! txgate
//!
//! Pre-execution transaction validation firewall for blockchain-signing
//! wallets. Every outbound transaction runs through a staged decision
//! pipeline:
//! - Calldata intent parsing (native / ERC-20 transfer / approve / unknown)
//! - Configurable policy validators (limits, allow/deny lists, gas caps)
//! - Dry-run simulation against an external or in-process backend
//! - Buy-then-sell honeypot probing for tokens the sender would receive
//! - Optional LLM risk judgment over deterministic security indicators
//!
//! The result is a single verdict (allowed / warned / blocked) plus an
//! ordered, serializable audit trail of validation events.

pub mod events;
pub mod honeypot;
pub mod intent;
pub mod models;
pub mod pipeline;
pub mod policy;
pub mod risk;
pub mod simulator;
pub mod utils;

pub use events::{
    EventCollector, EventSink, EventStatus, LogLevel, NullSink, TracingSink, ValidationEvent,
    ValidationStage,
};
pub use honeypot::HoneypotProber;
pub use intent::IntentParser;
pub use models::config::{
    AssetLimit, HoneypotSettings, LlmSettings, LoggingSettings, PipelineConfig, PolicySpec,
    SimulationSettings,
};
pub use models::errors::{ErrorCode, GateError, GateResult};
pub use models::types::{
    AssetChange, CallFrame, DecodedEvent, GateOutcome, GateVerdict, HoneypotOutcome,
    HoneypotVerdict, IntentArg, IntentKind, ParsedIntent, PolicyDecision, PolicyKind,
    PolicyOutcome, RiskAction, RiskAssessment, RiskLevel, SimulationResult, StageFlags, TxRequest,
};
pub use pipeline::{PipelineState, TxGate, TxGateBuilder};
pub use risk::{HttpRiskJudge, RiskJudge, RiskModel, SecurityIndicators};
pub use simulator::{
    HttpSimulator, RevmSimulator, SimRequest, SimResponse, SimulationClient, Simulator,
};
