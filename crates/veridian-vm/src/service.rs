//! Per-transaction execution state shared by every engine activation.

use crate::context::ExecutionContext;
use crate::error::VmError;
use crate::event::NotifyEvent;
use crate::gas_metering::{GasMeter, GasTable};
use crate::native::NativeRegistry;
use crate::CONTEXT_STACK_LIMIT;
use std::cell::RefCell;
use std::rc::Rc;
use veridian_storage::CacheDb;
use veridian_types::{Address, Hash, VmType};

/// Which engine owns the contract at an address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContractType {
    Native,
    Wasm,
    Stack,
}

/// Immutable facts about the transaction and block under execution.
#[derive(Debug, Clone)]
pub struct ExecConfig {
    pub time: u32,
    pub height: u32,
    pub block_hash: Hash,
    pub tx_hash: Hash,
    pub payer: Address,
    pub signers: Vec<Address>,
}

/// Transaction-frame handle. Execution is single-threaded and cooperative,
/// so a `RefCell` suffices; borrows are scoped tightly inside host calls so
/// nested engine activations can re-borrow.
pub type ServiceRef = Rc<RefCell<ContractService>>;

/// The state one transaction threads through engines: the work cache, the
/// gas meter and cost table, the execution context stack and the
/// notification buffer. Nested cross-VM calls share this object, which is
/// what makes the meter a single counter per transaction.
pub struct ContractService {
    pub config: ExecConfig,
    pub cache: CacheDb,
    pub gas_table: GasTable,
    pub meter: GasMeter,
    pub natives: Rc<NativeRegistry>,
    pub notifications: Vec<NotifyEvent>,
    contexts: Vec<ExecutionContext>,
}

impl ContractService {
    pub fn new(
        config: ExecConfig,
        cache: CacheDb,
        gas_table: GasTable,
        meter: GasMeter,
        natives: Rc<NativeRegistry>,
    ) -> Self {
        Self {
            config,
            cache,
            gas_table,
            meter,
            natives,
            notifications: Vec::new(),
            contexts: Vec::new(),
        }
    }

    pub fn into_ref(self) -> ServiceRef {
        Rc::new(RefCell::new(self))
    }

    pub fn push_context(&mut self, ctx: ExecutionContext) -> Result<(), VmError> {
        if self.contexts.len() >= CONTEXT_STACK_LIMIT {
            return Err(VmError::CallDepthExceeded(self.contexts.len()));
        }
        self.contexts.push(ctx);
        Ok(())
    }

    pub fn pop_context(&mut self) {
        self.contexts.pop();
    }

    /// The top frame: the contract currently executing.
    pub fn current_context(&self) -> Option<&ExecutionContext> {
        self.contexts.last()
    }

    /// The frame below the top: the immediate caller.
    pub fn calling_context(&self) -> Option<&ExecutionContext> {
        self.contexts.len().checked_sub(2).map(|i| &self.contexts[i])
    }

    /// The bottom frame: the transaction-initiated contract.
    pub fn entry_context(&self) -> Option<&ExecutionContext> {
        self.contexts.first()
    }

    pub fn context_depth(&self) -> usize {
        self.contexts.len()
    }

    /// Whether the transaction authorizes `address`: either a transaction
    /// signer, or the immediate calling contract.
    pub fn check_witness(&self, address: &Address) -> bool {
        if self.config.signers.contains(address) {
            return true;
        }
        self.calling_context()
            .map(|ctx| ctx.contract_address == *address)
            .unwrap_or(false)
    }

    pub fn push_notifications(&mut self, events: Vec<NotifyEvent>) {
        self.notifications.extend(events);
    }

    pub fn charge(&mut self, amount: u64) -> Result<(), VmError> {
        self.meter.charge(amount)
    }

    /// Charge a host call by its table key, falling back to the build-time
    /// default.
    pub fn charge_host(&mut self, key: &str, fallback: u64) -> Result<(), VmError> {
        let cost = self.gas_table.cost(key, fallback);
        self.meter.charge(cost)
    }

    /// Pre-charge a contract create/migrate: base cost plus the
    /// code-length-proportional part.
    pub fn charge_create(&mut self, code_len: usize) -> Result<(), VmError> {
        use crate::gas_metering::{
            calc_gas_by_code_len, CONTRACT_CREATE_GAS, CONTRACT_CREATE_NAME,
            UINT_DEPLOY_CODE_LEN_GAS, UINT_DEPLOY_CODE_LEN_NAME,
        };
        let base = self.gas_table.cost(CONTRACT_CREATE_NAME, CONTRACT_CREATE_GAS);
        let unit = self
            .gas_table
            .cost(UINT_DEPLOY_CODE_LEN_NAME, UINT_DEPLOY_CODE_LEN_GAS);
        self.meter
            .charge(base.saturating_add(calc_gas_by_code_len(code_len, unit)))
    }

    /// Resolve the engine owning `address`.
    pub fn contract_type(&self, address: &Address) -> Result<ContractType, VmError> {
        if self.natives.contains(address) {
            return Ok(ContractType::Native);
        }
        let code = self
            .cache
            .get_contract(address)?
            .ok_or(VmError::ContractNotFound(*address))?;
        Ok(match code.vm_type() {
            VmType::Wasm => ContractType::Wasm,
            VmType::Stack => ContractType::Stack,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use veridian_storage::{MemLedger, OverlayDB};
    use veridian_types::{DeployCode, VmType};

    fn service() -> ContractService {
        let overlay = OverlayDB::shared(Arc::new(MemLedger::new()));
        ContractService::new(
            ExecConfig {
                time: 10,
                height: 1,
                block_hash: Hash::ZERO,
                tx_hash: Hash::ZERO,
                payer: Address::from_bytes([1u8; 20]),
                signers: vec![Address::from_bytes([1u8; 20])],
            },
            CacheDb::new(overlay),
            GasTable::default(),
            GasMeter::new(1_000_000, 1, 0, 1_000),
            Rc::new(NativeRegistry::with_builtins()),
        )
    }

    fn frame(byte: u8) -> ExecutionContext {
        ExecutionContext::new(Address::from_bytes([byte; 20]), None)
    }

    #[test]
    fn test_context_stack_roles() {
        let mut svc = service();
        assert!(svc.current_context().is_none());
        assert!(svc.calling_context().is_none());
        assert!(svc.entry_context().is_none());

        svc.push_context(frame(1)).unwrap();
        svc.push_context(frame(2)).unwrap();
        svc.push_context(frame(3)).unwrap();

        assert_eq!(svc.current_context().unwrap(), &frame(3));
        assert_eq!(svc.calling_context().unwrap(), &frame(2));
        assert_eq!(svc.entry_context().unwrap(), &frame(1));

        svc.pop_context();
        assert_eq!(svc.current_context().unwrap(), &frame(2));
        assert_eq!(svc.calling_context().unwrap(), &frame(1));
    }

    #[test]
    fn test_context_stack_depth_cap() {
        let mut svc = service();
        for i in 0..CONTEXT_STACK_LIMIT {
            svc.push_context(frame((i % 200) as u8)).unwrap();
        }
        assert!(matches!(
            svc.push_context(frame(0)),
            Err(VmError::CallDepthExceeded(_))
        ));
    }

    #[test]
    fn test_check_witness_signer_and_caller() {
        let mut svc = service();
        let signer = Address::from_bytes([1u8; 20]);
        let stranger = Address::from_bytes([9u8; 20]);
        assert!(svc.check_witness(&signer));
        assert!(!svc.check_witness(&stranger));

        // the calling contract is implicitly authorized
        svc.push_context(frame(9)).unwrap();
        svc.push_context(frame(8)).unwrap();
        assert!(svc.check_witness(&stranger));
    }

    #[test]
    fn test_contract_type_resolution() {
        let svc = service();
        let ong = crate::native::ong::ONG_CONTRACT_ADDRESS;
        assert_eq!(svc.contract_type(&ong).unwrap(), ContractType::Native);

        let dc = DeployCode::new(vec![1, 2], VmType::Stack, "t", "1", "a", "e", "d").unwrap();
        svc.cache.put_contract(&dc);
        assert_eq!(svc.contract_type(&dc.address()).unwrap(), ContractType::Stack);

        let missing = Address::from_bytes([0xEE; 20]);
        assert!(matches!(
            svc.contract_type(&missing),
            Err(VmError::ContractNotFound(_))
        ));
    }
}
