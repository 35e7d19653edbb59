//! Policy validator set
//!
//! Each validator is a pure function over the parsed intent, the raw
//! request, and its own configuration. No validator touches the network
//! or any other validator's output; evaluation twice with unchanged
//! configuration produces identical decision sequences.

use alloy_primitives::utils::format_ether;
use alloy_primitives::U256;

use crate::models::config::PolicySpec;
use crate::models::types::{IntentKind, ParsedIntent, PolicyDecision, PolicyKind, TxRequest};
use crate::utils::constants::ETH_TRANSFER_FUNCTION;

/// Evaluate every configured validator in order.
///
/// Disabled validators are recorded as skipped. In fail-fast mode the
/// first failure halts evaluation; in aggregate mode (the default) all
/// validators run so the caller sees every violation in one pass.
pub fn evaluate_all(
    intent: &ParsedIntent,
    request: &TxRequest,
    policies: &[PolicySpec],
    fail_fast: bool,
) -> Vec<PolicyDecision> {
    let mut decisions = Vec::with_capacity(policies.len());
    for spec in policies {
        if !spec.enabled() {
            decisions.push(PolicyDecision::skipped(spec.kind()));
            continue;
        }
        let decision = evaluate(spec, intent, request);
        let failed = decision.failed();
        decisions.push(decision);
        if failed && fail_fast {
            break;
        }
    }
    decisions
}

/// Dispatch a single enabled validator. Pure: no I/O, no shared state.
pub fn evaluate(spec: &PolicySpec, intent: &ParsedIntent, request: &TxRequest) -> PolicyDecision {
    match spec {
        PolicySpec::EthValueLimit { max_value_wei, .. } => {
            check_eth_value_limit(request, *max_value_wei)
        }
        PolicySpec::AddressDenylist {
            denied_addresses, ..
        } => check_address_denylist(intent, request, denied_addresses),
        PolicySpec::AddressAllowlist {
            allowed_addresses, ..
        } => check_address_allowlist(intent, request, allowed_addresses),
        PolicySpec::PerAssetLimit { asset_limits, .. } => {
            check_per_asset_limit(intent, request, asset_limits)
        }
        PolicySpec::TokenAmountLimit { max_amount, .. } => {
            check_token_amount_limit(intent, *max_amount)
        }
        PolicySpec::GasLimit { max_gas, .. } => check_gas_limit(request, *max_gas),
        PolicySpec::FunctionAllowlist {
            allowed_functions, ..
        } => check_function_allowlist(intent, allowed_functions),
    }
}

fn check_eth_value_limit(request: &TxRequest, max_value_wei: U256) -> PolicyDecision {
    // Zero limit means the bound is not set
    if max_value_wei.is_zero() || request.value <= max_value_wei {
        return PolicyDecision::pass(PolicyKind::EthValueLimit);
    }
    PolicyDecision::fail(
        PolicyKind::EthValueLimit,
        format!(
            "ETH value {} exceeds limit of {}",
            format_ether(request.value),
            format_ether(max_value_wei)
        ),
        "value",
    )
}

fn check_address_denylist(
    intent: &ParsedIntent,
    request: &TxRequest,
    denied: &[alloy_primitives::Address],
) -> PolicyDecision {
    if denied.is_empty() {
        return PolicyDecision::pass(PolicyKind::AddressDenylist);
    }
    if denied.contains(&request.to) {
        return PolicyDecision::fail(
            PolicyKind::AddressDenylist,
            format!("destination address {} is on the denylist", request.to),
            "to",
        );
    }
    // Token transfers hide the real recipient inside the calldata
    if let Some(recipient) = intent.recipient() {
        if denied.contains(&recipient) {
            return PolicyDecision::fail(
                PolicyKind::AddressDenylist,
                format!("recipient address {recipient} is on the denylist"),
                "recipient",
            );
        }
    }
    PolicyDecision::pass(PolicyKind::AddressDenylist)
}

fn check_address_allowlist(
    intent: &ParsedIntent,
    request: &TxRequest,
    allowed: &[alloy_primitives::Address],
) -> PolicyDecision {
    // An empty allowlist restricts nothing
    if allowed.is_empty() {
        return PolicyDecision::pass(PolicyKind::AddressAllowlist);
    }
    let recipient = intent.recipient().unwrap_or(request.to);
    if allowed.contains(&recipient) {
        PolicyDecision::pass(PolicyKind::AddressAllowlist)
    } else {
        PolicyDecision::fail(
            PolicyKind::AddressAllowlist,
            format!("address {recipient} is not on the allowlist"),
            "recipient",
        )
    }
}

fn check_per_asset_limit(
    intent: &ParsedIntent,
    request: &TxRequest,
    limits: &[crate::models::config::AssetLimit],
) -> PolicyDecision {
    let (token, amount) = match (intent.token_address(request), intent.token_amount()) {
        (Some(token), Some(amount)) => (token, amount),
        // Tokens only; everything else is out of this validator's scope
        _ => return PolicyDecision::pass(PolicyKind::PerAssetLimit),
    };

    for limit in limits {
        if limit.address != token || limit.max_amount.is_zero() {
            continue;
        }
        if amount > limit.max_amount {
            return PolicyDecision::fail(
                PolicyKind::PerAssetLimit,
                format!(
                    "{} amount {} exceeds per-asset limit of {} (raw units, {} decimals)",
                    limit.name, amount, limit.max_amount, limit.decimals
                ),
                "amount",
            );
        }
    }
    PolicyDecision::pass(PolicyKind::PerAssetLimit)
}

fn check_token_amount_limit(intent: &ParsedIntent, max_amount: U256) -> PolicyDecision {
    let amount = match intent.token_amount() {
        Some(amount) => amount,
        None => return PolicyDecision::pass(PolicyKind::TokenAmountLimit),
    };
    if max_amount.is_zero() || amount <= max_amount {
        return PolicyDecision::pass(PolicyKind::TokenAmountLimit);
    }
    PolicyDecision::fail(
        PolicyKind::TokenAmountLimit,
        format!("token amount {amount} exceeds global limit of {max_amount}"),
        "amount",
    )
}

fn check_gas_limit(request: &TxRequest, max_gas: u64) -> PolicyDecision {
    let gas = match request.gas {
        Some(gas) => gas,
        None => return PolicyDecision::pass(PolicyKind::GasLimit),
    };
    if max_gas == 0 || gas <= max_gas {
        return PolicyDecision::pass(PolicyKind::GasLimit);
    }
    PolicyDecision::fail(
        PolicyKind::GasLimit,
        format!("gas {gas} exceeds limit {max_gas}"),
        "gas",
    )
}

fn check_function_allowlist(intent: &ParsedIntent, allowed: &[String]) -> PolicyDecision {
    if allowed.is_empty() {
        return PolicyDecision::pass(PolicyKind::FunctionAllowlist);
    }

    let name = match (intent.kind, intent.function_name.as_deref()) {
        (IntentKind::NativeTransfer, _) => ETH_TRANSFER_FUNCTION.to_string(),
        (_, Some(name)) => name.to_string(),
        (IntentKind::UnknownCall, None) => match intent.selector {
            Some(sel) => format!("0x{}", hex::encode(sel)),
            None => "unknown".to_string(),
        },
        _ => "unknown".to_string(),
    };

    if allowed.iter().any(|f| f == &name) {
        PolicyDecision::pass(PolicyKind::FunctionAllowlist)
    } else {
        PolicyDecision::fail(
            PolicyKind::FunctionAllowlist,
            format!("function '{name}' is not on the allowlist"),
            "function",
        )
    }
}
