//! Gas accounting: the per-transaction meter and the refreshable cost table.
//!
//! Charges are deducted eagerly, before the action they pay for. Fixed
//! per-host-call costs are constants bound at build time; the string-keyed
//! [`GasTable`] carries the same values and can be refreshed from the
//! global-params contract, overriding the defaults.

use crate::error::VmError;
use crate::native::global_params::Params;
use std::collections::HashMap;

// Gas table keys
pub const CONTRACT_CREATE_NAME: &str = "contract.create.gas";
pub const UINT_DEPLOY_CODE_LEN_NAME: &str = "deploy.code.unit.gas";
pub const UINT_INVOKE_CODE_LEN_NAME: &str = "invoke.code.unit.gas";
pub const MIN_TRANSACTION_GAS_NAME: &str = "transaction.min.gas";

// Dispatch costs
pub const CONTRACT_CREATE_GAS: u64 = 20_000_000;
pub const UINT_DEPLOY_CODE_LEN_GAS: u64 = 100_000;
pub const UINT_INVOKE_CODE_LEN_GAS: u64 = 20_000;
pub const MIN_TRANSACTION_GAS: u64 = 20_000;
/// Code length is billed per started unit of this many bytes
pub const PER_UNIT_CODE_LEN: usize = 1024;

// Host call costs (overridable through the gas table, keyed by call name)
pub const TIME_STAMP_GAS: u64 = 1;
pub const BLOCK_HEIGHT_GAS: u64 = 1;
pub const SELF_ADDRESS_GAS: u64 = 1;
pub const CALLER_ADDRESS_GAS: u64 = 1;
pub const ENTRY_ADDRESS_GAS: u64 = 1;
pub const CHECKWITNESS_GAS: u64 = 200;
pub const CURRENT_BLOCK_HASH_GAS: u64 = 1;
pub const CURRENT_TX_HASH_GAS: u64 = 1;
/// Per started KiB of hashed input
pub const SHA256_GAS: u64 = 10;
pub const CALL_CONTRACT_GAS: u64 = 10;
pub const NATIVE_INVOKE_GAS: u64 = 1_000;
/// Per started KiB of the value read
pub const STORAGE_READ_GAS: u64 = 200;
/// Per started KiB of key + value written
pub const STORAGE_PUT_GAS: u64 = 4_000;
pub const STORAGE_DELETE_GAS: u64 = 100;
/// Per executed stack-engine opcode
pub const STACK_OPCODE_GAS: u64 = 1;

/// Execution steps per unit of gas
pub const DEFAULT_GAS_FACTOR: u64 = 50_000;

/// Every key the params contract may override.
pub const GAS_TABLE_KEYS: &[&str] = &[
    CONTRACT_CREATE_NAME,
    UINT_DEPLOY_CODE_LEN_NAME,
    UINT_INVOKE_CODE_LEN_NAME,
    MIN_TRANSACTION_GAS_NAME,
    "timestamp",
    "block_height",
    "self_address",
    "caller_address",
    "entry_address",
    "check_witness",
    "current_blockhash",
    "current_txhash",
    "sha256",
    "call_contract",
    "native_invoke",
    "storage_read",
    "storage_write",
    "storage_delete",
];

/// Gas charged for `code_len` bytes of code at `unit_gas` per full unit.
pub fn calc_gas_by_code_len(code_len: usize, unit_gas: u64) -> u64 {
    (code_len / PER_UNIT_CODE_LEN) as u64 * unit_gas
}

/// String-keyed cost table, seeded with the build-time defaults and
/// refreshable from the global-params contract.
#[derive(Debug, Clone)]
pub struct GasTable {
    entries: HashMap<String, u64>,
}

impl Default for GasTable {
    fn default() -> Self {
        let mut entries = HashMap::new();
        for (key, value) in [
            (CONTRACT_CREATE_NAME, CONTRACT_CREATE_GAS),
            (UINT_DEPLOY_CODE_LEN_NAME, UINT_DEPLOY_CODE_LEN_GAS),
            (UINT_INVOKE_CODE_LEN_NAME, UINT_INVOKE_CODE_LEN_GAS),
            (MIN_TRANSACTION_GAS_NAME, MIN_TRANSACTION_GAS),
            ("timestamp", TIME_STAMP_GAS),
            ("block_height", BLOCK_HEIGHT_GAS),
            ("self_address", SELF_ADDRESS_GAS),
            ("caller_address", CALLER_ADDRESS_GAS),
            ("entry_address", ENTRY_ADDRESS_GAS),
            ("check_witness", CHECKWITNESS_GAS),
            ("current_blockhash", CURRENT_BLOCK_HASH_GAS),
            ("current_txhash", CURRENT_TX_HASH_GAS),
            ("sha256", SHA256_GAS),
            ("call_contract", CALL_CONTRACT_GAS),
            ("native_invoke", NATIVE_INVOKE_GAS),
            ("storage_read", STORAGE_READ_GAS),
            ("storage_write", STORAGE_PUT_GAS),
            ("storage_delete", STORAGE_DELETE_GAS),
        ] {
            entries.insert(key.to_string(), value);
        }
        Self { entries }
    }
}

impl GasTable {
    pub fn get(&self, key: &str) -> Option<u64> {
        self.entries.get(key).copied()
    }

    /// Table value, or the build-time default when the key is absent.
    pub fn cost(&self, key: &str, fallback: u64) -> u64 {
        self.get(key).unwrap_or(fallback)
    }

    pub fn set(&mut self, key: impl Into<String>, value: u64) {
        self.entries.insert(key.into(), value);
    }

    pub fn remove(&mut self, key: &str) -> Option<u64> {
        self.entries.remove(key)
    }

    /// Apply overrides read back from the global-params contract. Entries
    /// that are absent or fail to parse keep their current value.
    pub fn update_from_params(&mut self, params: &Params) {
        for key in GAS_TABLE_KEYS {
            let Some(value) = params.get(key) else {
                continue;
            };
            if value.is_empty() {
                continue;
            }
            match value.parse::<u64>() {
                Ok(parsed) => self.set(*key, parsed),
                Err(_) => {
                    tracing::warn!(key, value, "failed to parse gas table override");
                }
            }
        }
    }
}

/// The gas counter carried through a transaction.
///
/// One meter serves every engine activation of the transaction, so nested
/// cross-VM calls debit a single budget. `charge` deducts eagerly and traps
/// on underflow; `exec_step` bounds pure computation and is kept in sync
/// with VM fuel by the engine driver.
#[derive(Debug, Clone)]
pub struct GasMeter {
    limit: u64,
    price: u64,
    factor: u64,
    exec_step: u64,
}

impl GasMeter {
    pub fn new(limit: u64, price: u64, factor: u64, exec_step: u64) -> Self {
        Self {
            limit,
            price,
            factor,
            exec_step,
        }
    }

    /// A meter that never runs out. Fee settlement and balance queries run
    /// under this so the fee path cannot itself fail on gas.
    pub fn unlimited() -> Self {
        Self {
            limit: u64::MAX,
            price: 0,
            factor: 0,
            exec_step: u64::MAX,
        }
    }

    pub fn remaining(&self) -> u64 {
        self.limit
    }

    pub fn price(&self) -> u64 {
        self.price
    }

    pub fn factor(&self) -> u64 {
        self.factor
    }

    pub fn exec_step(&self) -> u64 {
        self.exec_step
    }

    /// Deduct `amount` or trap.
    pub fn charge(&mut self, amount: u64) -> Result<(), VmError> {
        if self.limit >= amount {
            self.limit -= amount;
            Ok(())
        } else {
            Err(VmError::OutOfGas)
        }
    }

    /// Consume execution steps directly (stack engine path).
    pub fn consume_steps(&mut self, steps: u64) -> Result<(), VmError> {
        if self.exec_step >= steps {
            self.exec_step -= steps;
            Ok(())
        } else {
            Err(VmError::StepExceeded)
        }
    }

    /// Record the step budget observed after a VM ran (or at a cross-call
    /// boundary) and bill the newly consumed steps as gas through the
    /// factor.
    pub fn burn_steps(&mut self, now_remaining: u64) -> Result<(), VmError> {
        let used = self.exec_step.saturating_sub(now_remaining);
        self.exec_step = now_remaining;
        if self.factor > 0 && used > 0 {
            self.charge(used / self.factor)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_charge_and_underflow() {
        let mut meter = GasMeter::new(100, 1, 0, 1_000);
        meter.charge(60).unwrap();
        meter.charge(40).unwrap();
        assert_eq!(meter.remaining(), 0);
        assert_eq!(meter.charge(1), Err(VmError::OutOfGas));
        // a failed charge leaves the counter untouched
        assert_eq!(meter.remaining(), 0);
    }

    #[test]
    fn test_charges_sum_to_consumed() {
        let initial = 10_000u64;
        let mut meter = GasMeter::new(initial, 1, 0, 1_000);
        let charges = [1u64, 17, 256, 999, 3];
        for c in charges {
            meter.charge(c).unwrap();
        }
        let total: u64 = charges.iter().sum();
        assert_eq!(initial - meter.remaining(), total);
    }

    #[test]
    fn test_step_budget() {
        let mut meter = GasMeter::new(100, 1, 0, 10);
        meter.consume_steps(10).unwrap();
        assert_eq!(meter.consume_steps(1), Err(VmError::StepExceeded));
    }

    #[test]
    fn test_burn_steps_bills_through_factor() {
        let mut meter = GasMeter::new(100, 1, 10, 1_000);
        // 250 steps consumed -> 25 gas
        meter.burn_steps(750).unwrap();
        assert_eq!(meter.remaining(), 75);
        assert_eq!(meter.exec_step(), 750);
    }

    #[test]
    fn test_gas_table_defaults_and_override() {
        let mut table = GasTable::default();
        assert_eq!(table.get(CONTRACT_CREATE_NAME), Some(CONTRACT_CREATE_GAS));
        table.set(CONTRACT_CREATE_NAME, 5);
        assert_eq!(table.cost(CONTRACT_CREATE_NAME, CONTRACT_CREATE_GAS), 5);
        assert_eq!(table.cost("unknown", 7), 7);
    }

    #[test]
    fn test_gas_table_update_from_params() {
        let mut table = GasTable::default();
        let params = Params {
            entries: vec![
                (MIN_TRANSACTION_GAS_NAME.to_string(), "123".to_string()),
                ("timestamp".to_string(), "not a number".to_string()),
            ],
        };
        table.update_from_params(&params);
        assert_eq!(table.get(MIN_TRANSACTION_GAS_NAME), Some(123));
        // unparseable override keeps the default
        assert_eq!(table.get("timestamp"), Some(TIME_STAMP_GAS));
    }

    #[test]
    fn test_calc_gas_by_code_len() {
        assert_eq!(calc_gas_by_code_len(0, 100), 0);
        assert_eq!(calc_gas_by_code_len(1023, 100), 0);
        assert_eq!(calc_gas_by_code_len(1024, 100), 100);
        assert_eq!(calc_gas_by_code_len(2049, 100), 200);
    }
}
