//! Pipeline configuration
//!
//! The policy document is loaded once at startup and immutable for the
//! process lifetime. Parsing mechanics (YAML, JSON, ...) belong to the
//! caller; everything here deserializes from any serde backend. The one
//! fatal error class lives here: `validate()` rejects an ambiguous rule
//! set before any run begins.

use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::events::LogLevel;
use crate::models::errors::{GateError, GateResult};
use crate::models::types::PolicyKind;
use crate::utils::constants::{
    DEFAULT_LLM_TIMEOUT_MS, DEFAULT_SIMULATION_TIMEOUT_MS, KNOWN_SAFE_TOKENS,
};

// ============================================
// AMOUNT SERDE (decimal strings)
// ============================================

/// Large amounts travel as decimal strings in policy documents
/// ("1000000000000000000" = 1 ETH); bare integers are accepted too.
pub(crate) mod serde_amount {
    use alloy_primitives::U256;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &U256, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<U256, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Num(u64),
            Str(String),
        }
        match Raw::deserialize(d)? {
            Raw::Num(n) => Ok(U256::from(n)),
            Raw::Str(s) => s.parse::<U256>().map_err(serde::de::Error::custom),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_decimals() -> u8 {
    18
}

// ============================================
// POLICY SPECS
// ============================================

/// Per-asset spending limit entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetLimit {
    /// Human-readable token name, for reasons and display
    pub name: String,
    pub address: Address,
    /// Maximum amount in the token's smallest unit; zero disables
    #[serde(default, with = "serde_amount")]
    pub max_amount: U256,
    #[serde(default = "default_decimals")]
    pub decimals: u8,
}

/// Closed set of validator configurations, tagged by `type` in the policy
/// document. Adding a validator means adding a variant here; there is no
/// runtime string-keyed registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PolicySpec {
    /// Fail if native value exceeds the configured maximum
    EthValueLimit {
        #[serde(default = "default_true")]
        enabled: bool,
        #[serde(default)]
        description: Option<String>,
        /// Maximum native value in wei; zero disables the bound
        #[serde(default, with = "serde_amount")]
        max_value_wei: U256,
    },
    /// Fail if the recipient is on the configured set
    AddressDenylist {
        #[serde(default = "default_true")]
        enabled: bool,
        #[serde(default)]
        description: Option<String>,
        #[serde(default)]
        denied_addresses: Vec<Address>,
    },
    /// When enabled with a non-empty set, fail if the recipient is absent
    AddressAllowlist {
        #[serde(default)]
        enabled: bool,
        #[serde(default)]
        description: Option<String>,
        #[serde(default)]
        allowed_addresses: Vec<Address>,
    },
    /// Fail if a decoded ERC-20 amount exceeds the matched token's limit
    PerAssetLimit {
        #[serde(default = "default_true")]
        enabled: bool,
        #[serde(default)]
        description: Option<String>,
        #[serde(default)]
        asset_limits: Vec<AssetLimit>,
    },
    /// Fail if any decoded ERC-20 amount exceeds a single global ceiling
    TokenAmountLimit {
        #[serde(default = "default_true")]
        enabled: bool,
        #[serde(default)]
        description: Option<String>,
        #[serde(default, with = "serde_amount")]
        max_amount: U256,
    },
    /// Fail if the requested gas limit exceeds the ceiling
    GasLimit {
        #[serde(default = "default_true")]
        enabled: bool,
        #[serde(default)]
        description: Option<String>,
        #[serde(default)]
        max_gas: u64,
    },
    /// When enabled with a non-empty set, fail if the decoded function
    /// name ("eth_transfer" for native transfers) is absent
    FunctionAllowlist {
        #[serde(default)]
        enabled: bool,
        #[serde(default)]
        description: Option<String>,
        #[serde(default)]
        allowed_functions: Vec<String>,
    },
}

impl PolicySpec {
    pub fn kind(&self) -> PolicyKind {
        match self {
            PolicySpec::EthValueLimit { .. } => PolicyKind::EthValueLimit,
            PolicySpec::AddressDenylist { .. } => PolicyKind::AddressDenylist,
            PolicySpec::AddressAllowlist { .. } => PolicyKind::AddressAllowlist,
            PolicySpec::PerAssetLimit { .. } => PolicyKind::PerAssetLimit,
            PolicySpec::TokenAmountLimit { .. } => PolicyKind::TokenAmountLimit,
            PolicySpec::GasLimit { .. } => PolicyKind::GasLimit,
            PolicySpec::FunctionAllowlist { .. } => PolicyKind::FunctionAllowlist,
        }
    }

    pub fn enabled(&self) -> bool {
        match self {
            PolicySpec::EthValueLimit { enabled, .. }
            | PolicySpec::AddressDenylist { enabled, .. }
            | PolicySpec::AddressAllowlist { enabled, .. }
            | PolicySpec::PerAssetLimit { enabled, .. }
            | PolicySpec::TokenAmountLimit { enabled, .. }
            | PolicySpec::GasLimit { enabled, .. }
            | PolicySpec::FunctionAllowlist { enabled, .. } => *enabled,
        }
    }
}

// ============================================
// STAGE SETTINGS
// ============================================

/// `simulation` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationSettings {
    pub enabled: bool,
    /// With `fail_on_revert`, an unavailable simulator blocks instead of
    /// warning
    pub required: bool,
    pub fail_on_revert: bool,
    pub estimate_gas: bool,
    pub timeout_ms: u64,
    /// Remote simulator endpoint, when the HTTP backend is used
    pub endpoint: Option<String>,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            required: false,
            fail_on_revert: true,
            estimate_gas: false,
            timeout_ms: DEFAULT_SIMULATION_TIMEOUT_MS,
            endpoint: None,
        }
    }
}

/// `honeypot` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HoneypotSettings {
    pub enabled: bool,
    /// Extra tokens that bypass probing, merged with the built-in set
    pub safe_tokens: Vec<Address>,
}

impl Default for HoneypotSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            safe_tokens: Vec::new(),
        }
    }
}

impl HoneypotSettings {
    /// Built-in safe tokens plus any configured additions.
    pub fn effective_safe_tokens(&self) -> HashSet<Address> {
        let mut set: HashSet<Address> = KNOWN_SAFE_TOKENS.clone();
        set.extend(self.safe_tokens.iter().copied());
        set
    }
}

/// `llm_validation` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    pub enabled: bool,
    pub provider: String,
    pub model: String,
    /// Backend endpoint; required when enabled
    pub endpoint: Option<String>,
    /// Resolved once at load time; the engine never probes the
    /// environment itself
    pub api_key: Option<String>,
    pub block_threshold: f64,
    pub warn_threshold: f64,
    pub timeout_ms: u64,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            endpoint: None,
            api_key: None,
            block_threshold: 0.70,
            warn_threshold: 0.40,
            timeout_ms: DEFAULT_LLM_TIMEOUT_MS,
        }
    }
}

/// `logging` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: LogLevel,
}

// ============================================
// PIPELINE CONFIG
// ============================================

/// The full policy document. Immutable for the process lifetime unless
/// explicitly reloaded by the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Master switch; disabled bypasses every check
    pub enabled: bool,
    /// First policy failure halts evaluation when set; default runs every
    /// validator so the caller sees all violations in one pass
    pub fail_fast: bool,
    /// Ordered list of validator configurations
    pub policies: Vec<PolicySpec>,
    pub simulation: SimulationSettings,
    pub honeypot: HoneypotSettings,
    pub llm_validation: LlmSettings,
    pub logging: LoggingSettings,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            fail_fast: false,
            policies: Vec::new(),
            simulation: SimulationSettings::default(),
            honeypot: HoneypotSettings::default(),
            llm_validation: LlmSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl PipelineConfig {
    /// Reject an ambiguous rule set. This is the single fatal gate; it
    /// runs at engine construction, before any transaction is validated.
    pub fn validate(&self) -> GateResult<()> {
        for (i, spec) in self.policies.iter().enumerate() {
            if let PolicySpec::PerAssetLimit { asset_limits, .. } = spec {
                for limit in asset_limits {
                    if limit.name.is_empty() {
                        return Err(GateError::config(format!(
                            "policies[{i}]: asset limit for {} has an empty name",
                            limit.address
                        )));
                    }
                }
            }
        }

        if self.simulation.timeout_ms == 0 {
            return Err(GateError::config("simulation.timeout_ms must be non-zero"));
        }

        let llm = &self.llm_validation;
        if llm.enabled {
            for (name, value) in [
                ("block_threshold", llm.block_threshold),
                ("warn_threshold", llm.warn_threshold),
            ] {
                if !(0.0..=1.0).contains(&value) {
                    return Err(GateError::config_threshold(format!(
                        "llm_validation.{name} must be within 0.0..=1.0, got {value}"
                    )));
                }
            }
            if llm.warn_threshold > llm.block_threshold {
                return Err(GateError::config_threshold(format!(
                    "llm_validation.warn_threshold {} exceeds block_threshold {}",
                    llm.warn_threshold, llm.block_threshold
                )));
            }
            if llm.timeout_ms == 0 {
                return Err(GateError::config("llm_validation.timeout_ms must be non-zero"));
            }
            if llm.provider.is_empty() || llm.model.is_empty() {
                return Err(GateError::new(
                    crate::models::errors::ErrorCode::ConfigMissingField,
                    "llm_validation requires provider and model when enabled",
                ));
            }
        }

        Ok(())
    }

    /// Enabled policy count, for skip decisions and logging.
    pub fn enabled_policies(&self) -> usize {
        self.policies.iter().filter(|p| p.enabled()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_policy_document_round_trip() {
        let doc = json!({
            "enabled": true,
            "policies": [
                {
                    "type": "eth_value_limit",
                    "enabled": true,
                    "description": "cap outbound ETH",
                    "max_value_wei": "1000000000000000000"
                },
                {
                    "type": "address_denylist",
                    "denied_addresses": ["0x000000000000000000000000000000000000dEaD"]
                },
                { "type": "gas_limit", "max_gas": 500000 }
            ],
            "simulation": { "enabled": true, "fail_on_revert": true },
            "llm_validation": { "enabled": false },
            "logging": { "level": "debug" }
        });

        let config: PipelineConfig = serde_json::from_value(doc).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.policies.len(), 3);
        assert_eq!(config.policies[0].kind(), PolicyKind::EthValueLimit);
        assert!(config.policies[1].enabled());
        match &config.policies[0] {
            PolicySpec::EthValueLimit { max_value_wei, .. } => {
                assert_eq!(*max_value_wei, U256::from(10u64).pow(U256::from(18u64)));
            }
            other => panic!("unexpected spec: {other:?}"),
        }
        assert_eq!(config.logging.level, LogLevel::Debug);
    }

    #[test]
    fn test_unknown_policy_type_rejected_at_parse() {
        let doc = json!({ "policies": [ { "type": "quantum_limit" } ] });
        assert!(serde_json::from_value::<PipelineConfig>(doc).is_err());
    }

    #[test]
    fn test_inverted_thresholds_rejected() {
        let mut config = PipelineConfig::default();
        config.llm_validation.enabled = true;
        config.llm_validation.warn_threshold = 0.9;
        config.llm_validation.block_threshold = 0.5;
        let err = config.validate().unwrap_err();
        assert_eq!(err.code_str(), "CFG_INVALID_THRESHOLD");
    }

    #[test]
    fn test_disabled_llm_skips_threshold_checks() {
        let mut config = PipelineConfig::default();
        config.llm_validation.warn_threshold = 5.0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_allowlist_disabled_by_default() {
        let doc = json!({ "policies": [ { "type": "address_allowlist" } ] });
        let config: PipelineConfig = serde_json::from_value(doc).unwrap();
        assert!(!config.policies[0].enabled());
    }

    #[test]
    fn test_effective_safe_tokens_merge() {
        let extra = Address::repeat_byte(0x77);
        let settings = HoneypotSettings {
            enabled: true,
            safe_tokens: vec![extra],
        };
        let set = settings.effective_safe_tokens();
        assert!(set.contains(&extra));
        assert!(set.len() > 1);
    }
}
