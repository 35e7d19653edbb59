//! Constants Module - Single Source of Truth
//!
//! Protocol constants shared across the validation pipeline: ERC-20
//! selectors, event topics, sentinel addresses, and the default
//! safe-token set. No hardcoded values in other modules.

use alloy_primitives::{address, b256, Address, B256, U256};
use lazy_static::lazy_static;
use std::collections::HashSet;

// ============================================
// APPLICATION CONSTANTS
// ============================================

/// Application name
pub const APP_NAME: &str = "txgate";

/// Application version
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// User-Agent for HTTP requests
pub const USER_AGENT: &str = "txgate/0.1.0";

// ============================================
// ERC-20 FUNCTION SELECTORS
// ============================================

/// transfer(address,uint256)
pub const SELECTOR_TRANSFER: [u8; 4] = [0xa9, 0x05, 0x9c, 0xbb];

/// transferFrom(address,address,uint256)
pub const SELECTOR_TRANSFER_FROM: [u8; 4] = [0x23, 0xb8, 0x72, 0xdd];

/// approve(address,uint256)
pub const SELECTOR_APPROVE: [u8; 4] = [0x09, 0x5e, 0xa7, 0xb3];

/// Pseudo-function name used by the function allowlist for plain
/// native-value transfers (no calldata).
pub const ETH_TRANSFER_FUNCTION: &str = "eth_transfer";

// ============================================
// EVENT TOPICS
// ============================================

/// keccak256("Transfer(address,address,uint256)")
pub const TRANSFER_TOPIC: B256 =
    b256!("ddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef");

// ============================================
// SENTINEL ADDRESSES
// ============================================

/// Marker for the chain's native asset in asset-delta mappings.
pub const NATIVE_ASSET: Address = Address::ZERO;

/// Fixed neutral recipient for the synthetic honeypot sell probe.
///
/// Known limitation: a token contract that whitelists this address would
/// make the probe under-detect. The target is kept fixed because changing
/// it changes detection semantics.
pub const PROBE_SINK: Address = address!("0000000000000000000000000000000000000001");

/// Amount that marks an approval as unlimited.
pub const UNLIMITED_APPROVAL: U256 = U256::MAX;

// ============================================
// KNOWN SAFE TOKENS
// ============================================

lazy_static! {
    /// Tokens that bypass honeypot probing entirely: canonical
    /// wrapped-native assets and major stablecoins. Overridable via
    /// `HoneypotSettings::safe_tokens`.
    pub static ref KNOWN_SAFE_TOKENS: HashSet<Address> = {
        let mut set = HashSet::new();
        // WETH
        set.insert(address!("c02aaa39b223fe8d0a0e5c4f27ead9083c756cc2")); // Ethereum
        set.insert(address!("4200000000000000000000000000000000000006")); // Base / Optimism
        set.insert(address!("82af49447d8a07e3bd95bd0d56f35241523fbab1")); // Arbitrum
        // Stablecoins
        set.insert(address!("a0b86991c6218b36c1d19d4a2e9eb0ce3606eb48")); // USDC Ethereum
        set.insert(address!("833589fcd6edb6e08f4c7c32d4f71b54bda02913")); // USDC Base
        set.insert(address!("dac17f958d2ee523a2206206994597c13d831ec7")); // USDT Ethereum
        set.insert(address!("6b175474e89094c44da98b954eedeac495271d0f")); // DAI Ethereum
        set
    };
}

// ============================================
// TIMEOUTS
// ============================================

/// Default timeout for simulator calls (milliseconds)
pub const DEFAULT_SIMULATION_TIMEOUT_MS: u64 = 10_000;

/// Default timeout for risk-judge calls (milliseconds)
pub const DEFAULT_LLM_TIMEOUT_MS: u64 = 20_000;

/// Default gas limit used when a request does not specify one
pub const DEFAULT_PROBE_GAS: u64 = 1_048_576;
