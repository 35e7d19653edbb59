//! In-process simulator backend
//! Answers the simulator boundary with an in-memory REVM instance, for
//! offline operation and tests. Each call runs against a fresh database;
//! nothing is shared between runs.

use alloy_primitives::{Address, Bytes, U256};
use async_trait::async_trait;
use eyre::{eyre, Result};
use revm::{
    db::{CacheDB, EmptyDB},
    primitives::{
        AccountInfo, BlockEnv, Bytecode, CfgEnvWithHandlerCfg, EnvWithHandlerCfg, ExecutionResult,
        SpecId, TxEnv, TxKind, KECCAK_EMPTY,
    },
    Evm,
};

use super::{SimBalanceDelta, SimLog, SimRequest, SimResponse, Simulator};
use crate::utils::constants::NATIVE_ASSET;

/// Default caller funding: 100 ETH, plenty for any dry run.
const DEFAULT_FUNDING: u128 = 100_000_000_000_000_000_000;

/// Local REVM-backed simulator.
pub struct RevmSimulator {
    chain_id: u64,
    /// Contract bytecode injected into the fresh database before each run
    contracts: Vec<(Address, Bytes)>,
    /// Pre-set account balances
    balances: Vec<(Address, U256)>,
}

impl RevmSimulator {
    pub fn new(chain_id: u64) -> Self {
        Self {
            chain_id,
            contracts: Vec::new(),
            balances: Vec::new(),
        }
    }

    /// Inject contract bytecode at an address.
    pub fn with_contract(mut self, address: Address, bytecode: Bytes) -> Self {
        self.contracts.push((address, bytecode));
        self
    }

    /// Pre-fund an account.
    pub fn with_balance(mut self, address: Address, balance: U256) -> Self {
        self.balances.push((address, balance));
        self
    }

    fn build_db(&self, request: &SimRequest) -> CacheDB<EmptyDB> {
        let mut db = CacheDB::new(EmptyDB::default());

        let funding = U256::from(DEFAULT_FUNDING).max(request.value.saturating_mul(U256::from(2u64)));
        db.insert_account_info(
            request.from,
            AccountInfo {
                balance: funding,
                nonce: 0,
                code_hash: KECCAK_EMPTY,
                code: None,
            },
        );

        for (address, balance) in &self.balances {
            db.insert_account_info(
                *address,
                AccountInfo {
                    balance: *balance,
                    nonce: 0,
                    code_hash: KECCAK_EMPTY,
                    code: None,
                },
            );
        }

        for (address, bytecode) in &self.contracts {
            db.insert_account_info(
                *address,
                AccountInfo {
                    balance: U256::ZERO,
                    nonce: 0,
                    code_hash: KECCAK_EMPTY,
                    code: Some(Bytecode::new_raw(bytecode.clone())),
                },
            );
        }

        db
    }

    fn execute(&self, request: &SimRequest) -> Result<SimResponse> {
        let mut db = self.build_db(request);

        let pre_from = db
            .accounts
            .get(&request.from)
            .map(|a| a.info.balance)
            .unwrap_or_default();
        let pre_to = db
            .accounts
            .get(&request.to)
            .map(|a| a.info.balance)
            .unwrap_or_default();

        let tx_env = TxEnv {
            caller: request.from,
            gas_limit: request.gas.unwrap_or(1_000_000),
            gas_price: U256::from(20_000_000_000u64),
            transact_to: TxKind::Call(request.to),
            value: request.value,
            data: request.data.clone(),
            nonce: Some(0),
            chain_id: Some(self.chain_id),
            ..Default::default()
        };

        let block_env = BlockEnv {
            number: U256::from(19_000_000u64),
            timestamp: U256::from(1_700_000_000u64),
            gas_limit: U256::from(30_000_000u64),
            basefee: U256::from(20_000_000_000u64),
            ..Default::default()
        };

        let cfg = CfgEnvWithHandlerCfg::new_with_spec_id(Default::default(), SpecId::CANCUN);
        let env = EnvWithHandlerCfg::new_with_cfg_env(cfg, block_env, tx_env);

        let mut evm = Evm::builder()
            .with_db(&mut db)
            .with_env_with_handler_cfg(env)
            .build();

        let outcome = evm.transact().map_err(|e| eyre!("EVM error: {e:?}"))?;
        drop(evm);

        let (success, revert_reason, gas_used, logs) = match outcome.result {
            ExecutionResult::Success {
                gas_used, logs, ..
            } => (true, None, gas_used, logs),
            ExecutionResult::Revert { gas_used, output } => {
                (false, Some(decode_revert_reason(&output)), gas_used, Vec::new())
            }
            ExecutionResult::Halt { reason, gas_used } => {
                (false, Some(format!("halted: {reason:?}")), gas_used, Vec::new())
            }
        };

        let events = logs
            .into_iter()
            .map(|log| SimLog {
                address: log.address,
                topics: log.data.topics().to_vec(),
                data: log.data.data.clone(),
                name: None,
            })
            .collect();

        // Native balance diff for the two accounts the run touched
        // directly; token deltas come out of the Transfer logs.
        let mut balance_deltas = Vec::new();
        for (account, pre) in [(request.from, pre_from), (request.to, pre_to)] {
            let post = outcome
                .state
                .get(&account)
                .map(|a| a.info.balance)
                .unwrap_or(pre);
            if post != pre {
                let delta = if post >= pre {
                    format!("{}", post - pre)
                } else {
                    format!("-{}", pre - post)
                };
                balance_deltas.push(SimBalanceDelta {
                    token: NATIVE_ASSET,
                    account,
                    delta,
                    decimals: Some(18),
                });
            }
        }

        Ok(SimResponse {
            success,
            revert_reason,
            gas_used,
            events,
            balance_deltas,
            calls: Vec::new(),
        })
    }
}

#[async_trait]
impl Simulator for RevmSimulator {
    async fn simulate(&self, request: &SimRequest) -> Result<SimResponse> {
        self.execute(request)
    }
}

/// Decode a revert payload, preferring the Error(string) encoding.
fn decode_revert_reason(output: &Bytes) -> String {
    // Error(string) selector: 0x08c379a0
    if output.len() >= 68 && output[0..4] == [0x08, 0xc3, 0x79, 0xa0] {
        let len_start = 36;
        if output.len() > len_start + 32 {
            let len = U256::from_be_slice(&output[len_start..len_start + 32]);
            let len_usize: usize = len.try_into().unwrap_or(0);
            let str_start = len_start + 32;
            if output.len() >= str_start + len_usize {
                if let Ok(s) = String::from_utf8(output[str_start..str_start + len_usize].to_vec())
                {
                    return s;
                }
            }
        }
    }

    if output.is_empty() {
        return "reverted without reason".to_string();
    }

    format!("revert: 0x{}", hex::encode(&output[..output.len().min(64)]))
}

#[cfg(test)]
mod tests {
    use super::*;

    // PUSH1 0x01 PUSH1 0x00 MSTORE PUSH1 0x20 PUSH1 0x00 RETURN
    fn return_one_bytecode() -> Bytes {
        Bytes::from(vec![0x60, 0x01, 0x60, 0x00, 0x52, 0x60, 0x20, 0x60, 0x00, 0xf3])
    }

    // PUSH1 0x00 PUSH1 0x00 REVERT
    fn revert_bytecode() -> Bytes {
        Bytes::from(vec![0x60, 0x00, 0x60, 0x00, 0xfd])
    }

    fn request_to(to: Address, value: U256, data: Bytes) -> SimRequest {
        SimRequest {
            from: Address::repeat_byte(0x11),
            to,
            value,
            data,
            gas: None,
        }
    }

    #[tokio::test]
    async fn test_plain_value_transfer_succeeds() {
        let to = Address::repeat_byte(0x22);
        let sim = RevmSimulator::new(1);
        let response = sim
            .simulate(&request_to(to, U256::from(1_000u64), Bytes::new()))
            .await
            .unwrap();
        assert!(response.success);
        // Recipient credited with the transferred value
        let credited = response
            .balance_deltas
            .iter()
            .find(|d| d.account == to)
            .expect("recipient delta");
        assert_eq!(credited.delta, "1000");
        // Sender debited (value plus gas)
        let debited = response
            .balance_deltas
            .iter()
            .find(|d| d.account == Address::repeat_byte(0x11))
            .expect("sender delta");
        assert!(debited.delta.starts_with('-'));
    }

    #[tokio::test]
    async fn test_call_into_injected_contract() {
        let contract = Address::repeat_byte(0x33);
        let sim = RevmSimulator::new(1).with_contract(contract, return_one_bytecode());
        let response = sim
            .simulate(&request_to(contract, U256::ZERO, Bytes::from(vec![0x01])))
            .await
            .unwrap();
        assert!(response.success);
        assert!(response.gas_used > 0);
    }

    #[tokio::test]
    async fn test_revert_is_reported_not_errored() {
        let contract = Address::repeat_byte(0x44);
        let sim = RevmSimulator::new(1).with_contract(contract, revert_bytecode());
        let response = sim
            .simulate(&request_to(contract, U256::ZERO, Bytes::new()))
            .await
            .unwrap();
        assert!(!response.success);
        assert!(response.revert_reason.is_some());
    }

    #[test]
    fn test_decode_error_string_revert() {
        // Error("no") = selector + offset + length + data
        let mut payload = vec![0x08, 0xc3, 0x79, 0xa0];
        payload.extend_from_slice(&U256::from(0x20u64).to_be_bytes::<32>());
        payload.extend_from_slice(&U256::from(2u64).to_be_bytes::<32>());
        let mut text = [0u8; 32];
        text[..2].copy_from_slice(b"no");
        payload.extend_from_slice(&text);

        assert_eq!(decode_revert_reason(&Bytes::from(payload)), "no");
    }

    #[test]
    fn test_decode_empty_revert() {
        assert_eq!(
            decode_revert_reason(&Bytes::new()),
            "reverted without reason"
        );
    }
}
