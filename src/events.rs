//! Validation event stream
//!
//! Every stage transition emits a structured `ValidationEvent`. The
//! ordered sequence of events for a run is the audit trail and the sole
//! artifact streamed to external observers; each record serializes
//! independently so consumers can forward them incrementally.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tracing::{debug, info, warn};

// ============================================
// STAGES AND STATUSES
// ============================================

/// Pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStage {
    Started,
    IntentAnalysis,
    PolicyValidation,
    Simulation,
    HoneypotDetection,
    LlmValidation,
    Completed,
}

impl ValidationStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationStage::Started => "started",
            ValidationStage::IntentAnalysis => "intent_analysis",
            ValidationStage::PolicyValidation => "policy_validation",
            ValidationStage::Simulation => "simulation",
            ValidationStage::HoneypotDetection => "honeypot_detection",
            ValidationStage::LlmValidation => "llm_validation",
            ValidationStage::Completed => "completed",
        }
    }
}

/// Status of a single validation event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Started,
    Passed,
    Failed,
    Warning,
    Skipped,
    Info,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Started => "started",
            EventStatus::Passed => "passed",
            EventStatus::Failed => "failed",
            EventStatus::Warning => "warning",
            EventStatus::Skipped => "skipped",
            EventStatus::Info => "info",
        }
    }
}

// ============================================
// EVENTS
// ============================================

/// A structured, append-only event from the validation pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationEvent {
    pub stage: ValidationStage,
    pub status: EventStatus,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    /// Stage-specific key/value payload (asset deltas, matched policy,
    /// confidence, ...)
    pub details: serde_json::Value,
}

impl ValidationEvent {
    pub fn new(
        stage: ValidationStage,
        status: EventStatus,
        message: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        Self {
            stage,
            status,
            message: message.into(),
            timestamp: Utc::now(),
            details,
        }
    }
}

// ============================================
// SINKS
// ============================================

/// Receives each event as it is produced. Injected into the orchestrator
/// at construction time; there is no ambient global sink.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &ValidationEvent);
}

/// Logging verbosity for the default sink, mirroring the `logging.level`
/// configuration section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    /// Only failures and warnings
    Minimal,
    /// Stage outcomes
    #[default]
    Info,
    /// Everything, including per-validator info events
    Debug,
}

/// Default sink: forwards events to `tracing` at levels derived from the
/// configured verbosity.
pub struct TracingSink {
    level: LogLevel,
}

impl TracingSink {
    pub fn new(level: LogLevel) -> Self {
        Self { level }
    }
}

impl EventSink for TracingSink {
    fn emit(&self, event: &ValidationEvent) {
        match event.status {
            EventStatus::Failed => {
                warn!(
                    stage = event.stage.as_str(),
                    status = event.status.as_str(),
                    "{}",
                    event.message
                );
            }
            EventStatus::Warning => {
                warn!(stage = event.stage.as_str(), "{}", event.message);
            }
            EventStatus::Passed | EventStatus::Skipped if self.level != LogLevel::Minimal => {
                info!(stage = event.stage.as_str(), "{}", event.message);
            }
            EventStatus::Started | EventStatus::Info if self.level == LogLevel::Debug => {
                debug!(stage = event.stage.as_str(), "{}", event.message);
            }
            _ => {}
        }
    }
}

/// Sink that discards everything. Useful as a baseline and in tests that
/// assert on the returned event sequence instead.
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: &ValidationEvent) {}
}

/// Collects a copy of every emitted event for batch consumption.
#[derive(Default)]
pub struct EventCollector {
    events: Mutex<Vec<ValidationEvent>>,
}

impl EventCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ValidationEvent> {
        self.events.lock().expect("collector poisoned").clone()
    }

    pub fn clear(&self) {
        self.events.lock().expect("collector poisoned").clear();
    }
}

impl EventSink for EventCollector {
    fn emit(&self, event: &ValidationEvent) {
        self.events
            .lock()
            .expect("collector poisoned")
            .push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_serializes_independently() {
        let event = ValidationEvent::new(
            ValidationStage::PolicyValidation,
            EventStatus::Failed,
            "ETH value 2 exceeds limit of 1",
            json!({ "rule": "eth_value_limit" }),
        );
        let encoded = serde_json::to_value(&event).unwrap();
        assert_eq!(encoded["stage"], "policy_validation");
        assert_eq!(encoded["status"], "failed");
        assert_eq!(encoded["details"]["rule"], "eth_value_limit");
    }

    #[test]
    fn test_collector_preserves_order() {
        let collector = EventCollector::new();
        for i in 0..3 {
            collector.emit(&ValidationEvent::new(
                ValidationStage::Started,
                EventStatus::Info,
                format!("event {i}"),
                serde_json::Value::Null,
            ));
        }
        let events = collector.events();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].message, "event 0");
        assert_eq!(events[2].message, "event 2");
    }

    #[test]
    fn test_stage_names_match_stream_contract() {
        assert_eq!(ValidationStage::HoneypotDetection.as_str(), "honeypot_detection");
        assert_eq!(ValidationStage::LlmValidation.as_str(), "llm_validation");
        assert_eq!(EventStatus::Skipped.as_str(), "skipped");
    }
}
