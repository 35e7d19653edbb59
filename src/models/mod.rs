//! Data model for the validation pipeline

pub mod config;
pub mod errors;
pub mod types;

pub use config::{
    AssetLimit, HoneypotSettings, LlmSettings, LoggingSettings, PipelineConfig, PolicySpec,
    SimulationSettings,
};
pub use errors::{ErrorCode, GateError, GateResult};
pub use types::*;
