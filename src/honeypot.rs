//! Honeypot prober
//! Uncovers tokens that can be bought but not resold.
//!
//! When a simulated transaction credits the sender with a non-native
//! token, the prober synthesizes a follow-up ERC-20 transfer of the full
//! received amount to a fixed neutral sink and simulates it. A sell that
//! reverts, emits no matching Transfer events, or fails to debit the
//! sender marks the token as a honeypot, which is always terminal.

use alloy_primitives::{Address, I256, U256};
use std::collections::HashSet;
use tracing::debug;

use crate::intent::encode_erc20_transfer;
use crate::models::errors::GateResult;
use crate::models::types::{
    AssetChange, HoneypotOutcome, HoneypotVerdict, SimulationResult, TxRequest,
};
use crate::simulator::SimulationClient;
use crate::utils::constants::{DEFAULT_PROBE_GAS, PROBE_SINK};

/// Buy-then-sell probe over the simulation client.
pub struct HoneypotProber {
    safe_tokens: HashSet<Address>,
}

impl HoneypotProber {
    pub fn new(safe_tokens: HashSet<Address>) -> Self {
        Self { safe_tokens }
    }

    /// Tokens the triggering simulation credited to the sender, i.e. the
    /// probe candidates. Empty for every non-purchase transaction, which
    /// therefore costs nothing here.
    pub fn candidates<'a>(
        &self,
        simulation: &'a SimulationResult,
        sender: Address,
    ) -> Vec<&'a AssetChange> {
        if !simulation.success {
            return Vec::new();
        }
        simulation.tokens_received_by(sender)
    }

    /// Probe one received token. `Err` means the simulator became
    /// unavailable mid-probe; the caller degrades that to a warning
    /// instead of claiming a honeypot.
    pub async fn probe(
        &self,
        client: &SimulationClient,
        sender: Address,
        change: &AssetChange,
    ) -> GateResult<HoneypotVerdict> {
        let token = change.token;

        if self.safe_tokens.contains(&token) {
            debug!(%token, "token on the safe list, probe skipped");
            return Ok(HoneypotVerdict {
                token,
                outcome: HoneypotOutcome::NotApplicable,
                probe: None,
                reason: None,
            });
        }

        let amount = delta_to_amount(change.delta);

        // Synthetic sell: move the full received amount out of the
        // sender's balance. Never touches the live path.
        let sell = TxRequest::new(
            sender,
            token,
            U256::ZERO,
            encode_erc20_transfer(PROBE_SINK, amount),
        )
        .with_gas(DEFAULT_PROBE_GAS);

        let probe = client.run(&sell).await?;
        Ok(self.classify(token, amount, sender, probe))
    }

    fn classify(
        &self,
        token: Address,
        amount: U256,
        sender: Address,
        probe: SimulationResult,
    ) -> HoneypotVerdict {
        // Check 1: the sell must execute at all
        if !probe.success {
            let reason = format!(
                "sell simulation reverted: {}",
                probe.revert_reason.as_deref().unwrap_or("no reason given")
            );
            return HoneypotVerdict {
                token,
                outcome: HoneypotOutcome::Honeypot,
                probe: Some(probe),
                reason: Some(reason),
            };
        }

        // Check 2: a real transfer emits Transfer events for the token
        if probe.transfer_event_count(token) == 0 {
            return HoneypotVerdict {
                token,
                outcome: HoneypotOutcome::Honeypot,
                probe: Some(probe),
                reason: Some("sell succeeded but emitted no Transfer events".to_string()),
            };
        }

        // Check 3: the sender's balance must actually decrease by the
        // probed amount
        let expected = match I256::try_from(amount) {
            Ok(v) => -v,
            Err(_) => I256::MIN,
        };
        let observed = probe.delta_of(token, sender);
        if observed > expected {
            return HoneypotVerdict {
                token,
                outcome: HoneypotOutcome::Honeypot,
                probe: Some(probe),
                reason: Some(format!(
                    "sender balance changed by {observed}, expected {expected}"
                )),
            };
        }

        HoneypotVerdict {
            token,
            outcome: HoneypotOutcome::Tradable,
            probe: Some(probe),
            reason: None,
        }
    }
}

/// The triggering delta is positive by construction; clamp defensively.
fn delta_to_amount(delta: I256) -> U256 {
    if delta.is_negative() {
        return U256::ZERO;
    }
    delta.unsigned_abs()
}
