//! Top-level handler for `Deploy` and `Invoke` transactions.
//!
//! The dispatcher owns the pre-flight gas checks, engine selection, fee
//! settlement and commit/rollback discipline. Every mutation flows through a
//! transaction cache over the shared overlay: work is committed only on
//! success, and fee charging on a failed transaction uses a fresh cache so
//! the fee write is isolated from the discarded work.

use crate::config::VmConfig;
use crate::error::VmError;
use crate::event::{ContractState, ExecuteNotify, NotifyEvent};
use crate::gas_metering::{
    calc_gas_by_code_len, GasMeter, GasTable, GAS_TABLE_KEYS, MIN_TRANSACTION_GAS,
    MIN_TRANSACTION_GAS_NAME, CONTRACT_CREATE_NAME, UINT_DEPLOY_CODE_LEN_NAME,
    UINT_INVOKE_CODE_LEN_NAME,
};
use crate::native::{
    self,
    global_params::{Params, GET_GLOBAL_PARAM_NAME, PARAMS_CONTRACT_ADDRESS},
    governance::{commit_dpos_code, GOVERNANCE_CONTRACT_ADDRESS},
    ong::{Transfers, TransferState, BALANCE_OF_NAME, ONG_CONTRACT_ADDRESS, TRANSFER_NAME},
    NativeRegistry,
};
use crate::service::{ContractService, ContractType, ExecConfig, ServiceRef};
use crate::stack_engine;
use crate::wasm_engine::WasmExecutor;
use crate::crossvm;
use std::rc::Rc;
use veridian_storage::{CacheDb, SharedOverlay, StorageError};
use veridian_types::{
    Address, Hash, Sink, Source, Transaction, TxPayload, VmType, WasmContractParam,
};

/// Facts about the enclosing block.
#[derive(Debug, Clone)]
pub struct BlockContext {
    pub height: u32,
    pub time: u32,
    pub block_hash: Hash,
}

pub struct Dispatcher {
    pub gas_table: GasTable,
    config: VmConfig,
    executor: Rc<WasmExecutor>,
    natives: Rc<NativeRegistry>,
}

impl Dispatcher {
    pub fn new(config: VmConfig) -> Result<Self, VmError> {
        Ok(Self {
            gas_table: GasTable::default(),
            executor: Rc::new(WasmExecutor::new(config.clone())?),
            natives: Rc::new(NativeRegistry::with_builtins()),
            config,
        })
    }

    fn exec_config(&self, tx: &Transaction, block: &BlockContext) -> ExecConfig {
        ExecConfig {
            time: block.time,
            height: block.height,
            block_hash: block.block_hash,
            tx_hash: tx.hash,
            payer: tx.payer,
            signers: tx.signers.clone(),
        }
    }

    fn service_with(&self, cache: CacheDb, config: ExecConfig, meter: GasMeter) -> ServiceRef {
        ContractService::new(
            config,
            cache,
            self.gas_table.clone(),
            meter,
            self.natives.clone(),
        )
        .into_ref()
    }

    /// Fetch the payer's ONG balance through the native engine.
    fn balance_of(
        &self,
        cache: CacheDb,
        tx: &Transaction,
        block: &BlockContext,
        holder: &Address,
    ) -> Result<u64, VmError> {
        let service = self.service_with(cache, self.exec_config(tx, block), GasMeter::unlimited());
        let mut args = Sink::new();
        args.write_address(holder);
        let raw = native::native_call(
            &service,
            ONG_CONTRACT_ADDRESS,
            BALANCE_OF_NAME,
            args.into_bytes(),
        )?;
        let bytes: [u8; 8] = raw
            .as_slice()
            .try_into()
            .map_err(|_| VmError::HostCall("malformed balance record".into()))?;
        Ok(u64::from_le_bytes(bytes))
    }

    /// Transfer `gas` from the payer to the governance address via the
    /// native ONG contract; returns the transfer notifications.
    fn charge_cost_gas(
        &self,
        payer: Address,
        gas: u64,
        cache: CacheDb,
        tx: &Transaction,
        block: &BlockContext,
    ) -> Result<Vec<NotifyEvent>, VmError> {
        let service = self.service_with(cache, self.exec_config(tx, block), GasMeter::unlimited());
        let mut args = Sink::new();
        Transfers {
            states: vec![TransferState {
                from: payer,
                to: GOVERNANCE_CONTRACT_ADDRESS,
                value: gas,
            }],
        }
        .serialization(&mut args);
        native::native_call(
            &service,
            ONG_CONTRACT_ADDRESS,
            TRANSFER_NAME,
            args.into_bytes(),
        )?;
        let mut svc = service.borrow_mut();
        Ok(std::mem::take(&mut svc.notifications))
    }

    /// Invalid-gas charging: bill `gas` on a fresh cache over the overlay,
    /// isolated from any discarded work, and record the debit.
    fn cost_invalid_gas(
        &self,
        overlay: &SharedOverlay,
        payer: Address,
        gas: u64,
        tx: &Transaction,
        block: &BlockContext,
        notify: &mut ExecuteNotify,
    ) -> Result<(), VmError> {
        let cache = CacheDb::new(overlay.clone());
        let notifies = self.charge_cost_gas(payer, gas, cache.clone(), tx, block)?;
        cache.commit();
        notify.gas_consumed = gas;
        notify.notify.extend(notifies);
        Ok(())
    }

    /// Handle a `Deploy` transaction: validate, pre-flight the gas, charge
    /// the fee, and idempotently store the contract.
    pub fn handle_deploy(
        &self,
        overlay: &SharedOverlay,
        tx: &Transaction,
        block: &BlockContext,
        notify: &mut ExecuteNotify,
    ) -> Result<(), VmError> {
        let deploy = match &tx.payload {
            TxPayload::Deploy(dc) => dc,
            _ => return Err(VmError::InvalidPayload("expected a deploy payload".into())),
        };
        if deploy.vm_type() == VmType::Wasm {
            self.executor.verify_module(deploy.raw_code())?;
        }

        let cache = CacheDb::new(overlay.clone());
        let mut gas_consumed = 0u64;
        let mut notifies = Vec::new();

        if tx.gas_price != 0 {
            let Some(create_gas) = self.gas_table.get(CONTRACT_CREATE_NAME) else {
                overlay.write().set_error(StorageError::Backend(format!(
                    "gas table entry {CONTRACT_CREATE_NAME:?} missing"
                )));
                return Ok(());
            };
            let Some(unit_gas) = self.gas_table.get(UINT_DEPLOY_CODE_LEN_NAME) else {
                overlay.write().set_error(StorageError::Backend(format!(
                    "gas table entry {UINT_DEPLOY_CODE_LEN_NAME:?} missing"
                )));
                return Ok(());
            };

            let gas_limit =
                create_gas.saturating_add(calc_gas_by_code_len(deploy.raw_code().len(), unit_gas));
            let required = gas_limit.saturating_mul(tx.gas_price);

            let balance = self.balance_of(cache.clone(), tx, block, &tx.payer)?;
            if balance < required {
                self.cost_invalid_gas(overlay, tx.payer, balance, tx, block, notify)?;
                return Err(VmError::InsufficientBalance { balance, required });
            }
            if tx.gas_limit < gas_limit {
                let invalid = tx.gas_limit.saturating_mul(tx.gas_price);
                self.cost_invalid_gas(overlay, tx.payer, invalid, tx, block, notify)?;
                return Err(VmError::InsufficientGasLimit {
                    needed: gas_limit,
                    actual: tx.gas_limit,
                });
            }

            gas_consumed = required;
            notifies = self.charge_cost_gas(tx.payer, gas_consumed, cache.clone(), tx, block)?;
            cache.commit();
        }

        let address = deploy.address();
        tracing::info!(contract = %address, name = %deploy.name, "deploy contract");
        if cache.get_contract(&address)?.is_none() {
            cache.put_contract(deploy);
        }
        cache.commit();

        notify.notify.extend(notifies);
        notify.gas_consumed = gas_consumed;
        notify.state = ContractState::Success;
        Ok(())
    }

    /// Handle an `Invoke` transaction. Returns the guest output buffer on
    /// success; on failure the work cache is discarded and the fee is billed
    /// on a fresh cache.
    pub fn handle_invoke(
        &self,
        overlay: &SharedOverlay,
        tx: &Transaction,
        block: &BlockContext,
        notify: &mut ExecuteNotify,
    ) -> Result<Vec<u8>, VmError> {
        let invoke = match &tx.payload {
            TxPayload::Invoke(ic) => ic,
            _ => return Err(VmError::InvalidPayload("expected an invoke payload".into())),
        };
        let code = &invoke.code;

        // system-privileged calls bypass all fee logic
        let sys_trans = code.as_ref() == commit_dpos_code().as_slice() || block.height == 0;
        let is_charge = !sys_trans && tx.gas_price != 0;

        let min_tx_gas = self
            .gas_table
            .cost(MIN_TRANSACTION_GAS_NAME, MIN_TRANSACTION_GAS);
        let mut code_len_gas = 0u64;
        let mut available = tx.gas_limit;

        if is_charge {
            let Some(unit_gas) = self.gas_table.get(UINT_INVOKE_CODE_LEN_NAME) else {
                overlay.write().set_error(StorageError::Backend(format!(
                    "gas table entry {UINT_INVOKE_CODE_LEN_NAME:?} missing"
                )));
                return Ok(Vec::new());
            };

            let old_balance =
                self.balance_of(CacheDb::new(overlay.clone()), tx, block, &tx.payer)?;

            let min_gas = min_tx_gas.saturating_mul(tx.gas_price);
            if old_balance < min_gas {
                self.cost_invalid_gas(overlay, tx.payer, old_balance, tx, block, notify)?;
                return Err(VmError::InsufficientBalance {
                    balance: old_balance,
                    required: min_gas,
                });
            }

            code_len_gas = calc_gas_by_code_len(code.len(), unit_gas);
            let code_gas = code_len_gas.saturating_mul(tx.gas_price);
            if old_balance < code_gas {
                self.cost_invalid_gas(overlay, tx.payer, old_balance, tx, block, notify)?;
                return Err(VmError::InsufficientBalance {
                    balance: old_balance,
                    required: code_gas,
                });
            }
            if tx.gas_limit < code_len_gas {
                let invalid = tx.gas_limit.saturating_mul(tx.gas_price);
                self.cost_invalid_gas(overlay, tx.payer, invalid, tx, block, notify)?;
                return Err(VmError::InsufficientGasLimit {
                    needed: code_len_gas,
                    actual: tx.gas_limit,
                });
            }

            let max_affordable = old_balance / tx.gas_price;
            if available > max_affordable {
                available = max_affordable;
            }
        }

        // the work frame: its cache is committed only on success
        let work_cache = CacheDb::new(overlay.clone());
        let service = self.service_with(
            work_cache.clone(),
            self.exec_config(tx, block),
            GasMeter::new(
                available - code_len_gas,
                tx.gas_price,
                self.config.gas_factor,
                self.config.exec_step_limit,
            ),
        );

        let exec_result = self.execute_invoke(&service, code);

        let remaining = service.borrow().meter.remaining();
        let mut cost_gas_limit = available - remaining;
        if cost_gas_limit < min_tx_gas {
            cost_gas_limit = min_tx_gas;
        }
        let cost_gas = cost_gas_limit.saturating_mul(tx.gas_price);

        let output = match exec_result {
            Ok(output) => output,
            Err(e) => {
                drop(service);
                drop(work_cache);
                if is_charge {
                    self.cost_invalid_gas(overlay, tx.payer, cost_gas, tx, block, notify)?;
                }
                return Err(e);
            }
        };

        let mut notifies = Vec::new();
        if is_charge {
            // reread: the contract may have moved the payer's funds
            let new_balance = self.balance_of(work_cache.clone(), tx, block, &tx.payer)?;
            if new_balance < cost_gas {
                self.cost_invalid_gas(overlay, tx.payer, cost_gas, tx, block, notify)?;
                return Err(VmError::InsufficientBalance {
                    balance: new_balance,
                    required: cost_gas,
                });
            }
            notifies = self.charge_cost_gas(tx.payer, cost_gas, work_cache.clone(), tx, block)?;
        }

        {
            let mut svc = service.borrow_mut();
            notify.notify.append(&mut svc.notifications);
        }
        notify.notify.extend(notifies);
        notify.gas_consumed = cost_gas;
        notify.state = ContractState::Success;
        work_cache.commit();
        Ok(output)
    }

    /// Select the engine by the target contract's VM type and run it.
    fn execute_invoke(&self, service: &ServiceRef, code: &[u8]) -> Result<Vec<u8>, VmError> {
        let param = WasmContractParam::from_bytes(code).map_err(VmError::Codec)?;
        let contract_type = service.borrow().contract_type(&param.address)?;
        match contract_type {
            ContractType::Native => {
                let mut source = Source::new(&param.args);
                let version = source.read_u8().map_err(VmError::Codec)?;
                let method = source.read_str("method").map_err(VmError::Codec)?;
                let args = source.read_var_bytes().map_err(VmError::Codec)?.to_vec();
                native::invoke(
                    service,
                    veridian_types::ContractInvokeParam {
                        version,
                        address: param.address,
                        method,
                        args: args.into(),
                    },
                )
            }
            ContractType::Wasm => WasmExecutor::invoke(&self.executor, service, param),
            ContractType::Stack => {
                let value = stack_engine::invoke(service, param.address, &param.args)?;
                Ok(crossvm::serialize_value(&value))
            }
        }
    }

    /// Re-read the gas table keys from the global-params contract.
    pub fn refresh_gas_table(
        &mut self,
        overlay: &SharedOverlay,
        block: &BlockContext,
    ) -> Result<(), VmError> {
        let config = ExecConfig {
            time: block.time,
            height: block.height,
            block_hash: block.block_hash,
            tx_hash: Hash::ZERO,
            payer: Address::ZERO,
            signers: Vec::new(),
        };
        let service = self.service_with(
            CacheDb::new(overlay.clone()),
            config,
            GasMeter::unlimited(),
        );

        let mut args = Sink::new();
        args.write_var_uint(GAS_TABLE_KEYS.len() as u64);
        for key in GAS_TABLE_KEYS {
            args.write_str(key);
        }
        let raw = native::native_call(
            &service,
            PARAMS_CONTRACT_ADDRESS,
            GET_GLOBAL_PARAM_NAME,
            args.into_bytes(),
        )?;
        let params = Params::from_bytes(&raw).map_err(VmError::Codec)?;
        self.gas_table.update_from_params(&params);
        Ok(())
    }
}
