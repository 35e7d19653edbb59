//! Centralized Error Handling Module
//!
//! Every failure class in the pipeline has a unique code, which makes
//! log grepping and monitoring straightforward.
//!
//! Error codes follow pattern: CATEGORY_SPECIFIC_ERROR
//! - CFG_xxx: configuration errors (the only fatal class)
//! - SIM_xxx: simulator boundary errors
//! - RISK_xxx: risk-judge boundary errors
//! - POLICY_xxx / INTENT_xxx / HONEYPOT_xxx: stage outcomes

use std::fmt;

/// Pipeline-wide error type.
///
/// Only configuration errors ever escape the invocation boundary as an
/// `Err`; everything else is resolved into validation events and a
/// verdict.
#[derive(Debug)]
pub struct GateError {
    /// Unique error code for logging/monitoring
    pub code: ErrorCode,
    /// Human-readable message
    pub message: String,
    /// Optional underlying error
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl GateError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        code: ErrorCode,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            code,
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Get error code as string (for logging)
    pub fn code_str(&self) -> &'static str {
        self.code.as_str()
    }
}

impl fmt::Display for GateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code.as_str(), self.message)
    }
}

impl std::error::Error for GateError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// Unique error codes for the pipeline's error taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // ============================================
    // Configuration Errors (fatal, pre-run)
    // ============================================
    /// Malformed policy document
    ConfigInvalidValue,
    /// A required configuration field is missing
    ConfigMissingField,
    /// An address in the policy document failed to parse
    ConfigInvalidAddress,
    /// Thresholds out of range or inconsistent
    ConfigInvalidThreshold,

    // ============================================
    // Decoding (recoverable, downgrades intent)
    // ============================================
    /// Malformed calldata; intent downgraded to unknown-call
    DecodingAnomaly,

    // ============================================
    // Policy (surfaced, never swallowed)
    // ============================================
    /// A validator failed the transaction
    PolicyViolation,

    // ============================================
    // Simulator boundary (degrades, never crashes the run)
    // ============================================
    /// Transport failure talking to the simulator
    SimulationUnavailable,
    /// Simulator call exceeded its timeout
    SimulationTimeout,
    /// Simulator answered with an unparseable shape
    SimulationBadResponse,
    /// Simulated execution reverted
    SimulationReverted,

    // ============================================
    // Honeypot (definitive, always terminal)
    // ============================================
    /// Synthetic sell probe classified the token as a honeypot
    HoneypotDetected,

    // ============================================
    // Risk judge boundary (degrades, never crashes the run)
    // ============================================
    /// Transport failure talking to the LLM backend
    RiskJudgeUnavailable,
    /// Risk judge call exceeded its timeout
    RiskJudgeTimeout,
    /// LLM answered with other than the accepted response shape
    RiskJudgeBadResponse,

    // ============================================
    // Generic
    // ============================================
    Unknown,
}

impl ErrorCode {
    /// Get string representation of error code
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ConfigInvalidValue => "CFG_INVALID_VALUE",
            Self::ConfigMissingField => "CFG_MISSING_FIELD",
            Self::ConfigInvalidAddress => "CFG_INVALID_ADDRESS",
            Self::ConfigInvalidThreshold => "CFG_INVALID_THRESHOLD",

            Self::DecodingAnomaly => "INTENT_DECODING_ANOMALY",

            Self::PolicyViolation => "POLICY_VIOLATION",

            Self::SimulationUnavailable => "SIM_UNAVAILABLE",
            Self::SimulationTimeout => "SIM_TIMEOUT",
            Self::SimulationBadResponse => "SIM_BAD_RESPONSE",
            Self::SimulationReverted => "SIM_REVERTED",

            Self::HoneypotDetected => "HONEYPOT_DETECTED",

            Self::RiskJudgeUnavailable => "RISK_UNAVAILABLE",
            Self::RiskJudgeTimeout => "RISK_TIMEOUT",
            Self::RiskJudgeBadResponse => "RISK_BAD_RESPONSE",

            Self::Unknown => "UNKNOWN_ERROR",
        }
    }

    /// Fatal errors abort before any run begins; everything else is
    /// resolved into a validation event and a verdict.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ConfigInvalidValue
                | Self::ConfigMissingField
                | Self::ConfigInvalidAddress
                | Self::ConfigInvalidThreshold
        )
    }

    /// Degradable errors convert to WARN-level events.
    pub fn degrades(&self) -> bool {
        matches!(
            self,
            Self::SimulationUnavailable
                | Self::SimulationTimeout
                | Self::SimulationBadResponse
                | Self::RiskJudgeUnavailable
                | Self::RiskJudgeTimeout
                | Self::RiskJudgeBadResponse
        )
    }
}

// ============================================
// Convenience constructors
// ============================================

impl GateError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::ConfigInvalidValue, msg)
    }

    pub fn config_address(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::ConfigInvalidAddress, msg)
    }

    pub fn config_threshold(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::ConfigInvalidThreshold, msg)
    }

    pub fn simulation_unavailable(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::SimulationUnavailable, msg)
    }

    pub fn simulation_timeout(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::SimulationTimeout, msg)
    }

    pub fn risk_judge_unavailable(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::RiskJudgeUnavailable, msg)
    }

    pub fn risk_judge_bad_response(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::RiskJudgeBadResponse, msg)
    }
}

// ============================================
// Result type alias
// ============================================

pub type GateResult<T> = Result<T, GateError>;

// ============================================
// Conversion from common error types
// ============================================

impl From<eyre::Report> for GateError {
    fn from(err: eyre::Report) -> Self {
        Self::new(ErrorCode::Unknown, err.to_string())
    }
}

impl From<reqwest::Error> for GateError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::new(ErrorCode::SimulationTimeout, "request timeout")
        } else if err.is_connect() {
            Self::new(ErrorCode::SimulationUnavailable, "connection failed")
        } else {
            Self::new(ErrorCode::Unknown, err.to_string())
        }
    }
}

impl From<serde_json::Error> for GateError {
    fn from(err: serde_json::Error) -> Self {
        Self::with_source(ErrorCode::SimulationBadResponse, "JSON parse error", err)
    }
}
