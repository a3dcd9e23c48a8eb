//! The ONG token contract: the native asset gas fees are settled in.

use super::{byte_true, NativeContext};
use crate::crossvm::Value;
use crate::error::VmError;
use crate::event::NotifyEvent;
use veridian_types::{Address, Sink, Source};
use veridian_storage::CacheDb;

pub const ONG_CONTRACT_ADDRESS: Address = Address::native(2);

pub const BALANCE_OF_NAME: &str = "balanceOf";
pub const TRANSFER_NAME: &str = "transfer";

const BALANCE_PREFIX: u8 = 0x01;

/// One balance movement inside a `transfer` invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferState {
    pub from: Address,
    pub to: Address,
    pub value: u64,
}

/// The `transfer` argument record: a batch of balance movements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transfers {
    pub states: Vec<TransferState>,
}

impl Transfers {
    pub fn serialization(&self, sink: &mut Sink) {
        sink.write_var_uint(self.states.len() as u64);
        for state in &self.states {
            sink.write_address(&state.from);
            sink.write_address(&state.to);
            sink.write_u64(state.value);
        }
    }

    pub fn deserialization(source: &mut Source<'_>) -> Result<Self, veridian_types::TypesError> {
        let count = source.read_var_uint()?;
        let mut states = Vec::with_capacity(count.min(1024) as usize);
        for _ in 0..count {
            states.push(TransferState {
                from: source.read_address()?,
                to: source.read_address()?,
                value: source.read_u64()?,
            });
        }
        Ok(Self { states })
    }
}

/// Storage key of a holder's balance, in the token contract's subspace.
fn balance_key(holder: &Address) -> Vec<u8> {
    let mut key = ONG_CONTRACT_ADDRESS.as_bytes().to_vec();
    key.push(BALANCE_PREFIX);
    key.extend_from_slice(holder.as_bytes());
    key
}

/// Read a holder's balance straight off a cache view.
pub fn balance(cache: &CacheDb, holder: &Address) -> Result<u64, VmError> {
    match cache.get(&balance_key(holder))? {
        None => Ok(0),
        Some(raw) => {
            let bytes: [u8; 8] = raw.as_slice().try_into().map_err(|_| {
                VmError::Storage(veridian_storage::StorageError::CorruptRecord(
                    "balance record is not 8 bytes".into(),
                ))
            })?;
            Ok(u64::from_le_bytes(bytes))
        }
    }
}

fn write_balance(cache: &CacheDb, holder: &Address, amount: u64) {
    let key = balance_key(holder);
    if amount == 0 {
        cache.delete(&key);
    } else {
        cache.put(&key, amount.to_le_bytes().to_vec());
    }
}

/// Seed a balance directly. Genesis bootstrapping only; everything after
/// genesis moves funds through `transfer`.
pub fn init_balance(cache: &CacheDb, holder: &Address, amount: u64) {
    write_balance(cache, holder, amount);
}

pub fn register(ctx: &mut NativeContext) {
    ctx.register(BALANCE_OF_NAME, balance_of);
    ctx.register(TRANSFER_NAME, transfer);
}

/// `balanceOf(holder) -> u64 LE`
fn balance_of(ctx: &mut NativeContext) -> Result<Vec<u8>, VmError> {
    let holder = Source::new(ctx.args())
        .read_address()
        .map_err(VmError::Codec)?;
    let amount = {
        let svc = ctx.service().borrow();
        balance(&svc.cache, &holder)?
    };
    Ok(amount.to_le_bytes().to_vec())
}

/// `transfer(states)` — every `from` must be witnessed by the transaction
/// (or be the calling contract), and funded.
fn transfer(ctx: &mut NativeContext) -> Result<Vec<u8>, VmError> {
    let transfers = Transfers::deserialization(&mut Source::new(ctx.args()))
        .map_err(VmError::Codec)?;

    let service = ctx.service().clone();
    let mut svc = service.borrow_mut();
    for state in &transfers.states {
        if state.value == 0 {
            continue;
        }
        if !svc.check_witness(&state.from) {
            return Err(VmError::HostCall(format!(
                "transfer from {} is not authorized",
                state.from
            )));
        }
        let from_balance = balance(&svc.cache, &state.from)?;
        if from_balance < state.value {
            return Err(VmError::InsufficientBalance {
                balance: from_balance,
                required: state.value,
            });
        }
        let to_balance = balance(&svc.cache, &state.to)?;
        write_balance(&svc.cache, &state.from, from_balance - state.value);
        write_balance(
            &svc.cache,
            &state.to,
            to_balance.saturating_add(state.value),
        );

        svc.push_notifications(vec![NotifyEvent {
            contract: ONG_CONTRACT_ADDRESS,
            states: Value::List(vec![
                Value::String(TRANSFER_NAME.into()),
                Value::Address(state.from),
                Value::Address(state.to),
                Value::Int(state.value as i64),
            ]),
        }]);
    }
    Ok(byte_true())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::testing::test_service;
    use crate::native::native_call;

    fn encode_holder(holder: &Address) -> Vec<u8> {
        let mut sink = Sink::new();
        sink.write_address(holder);
        sink.into_bytes()
    }

    fn encode_transfer(from: Address, to: Address, value: u64) -> Vec<u8> {
        let mut sink = Sink::new();
        Transfers {
            states: vec![TransferState { from, to, value }],
        }
        .serialization(&mut sink);
        sink.into_bytes()
    }

    #[test]
    fn test_balance_of_missing_is_zero() {
        let signer = Address::from_bytes([1u8; 20]);
        let service = test_service(signer);
        let result = native_call(
            &service,
            ONG_CONTRACT_ADDRESS,
            BALANCE_OF_NAME,
            encode_holder(&signer),
        )
        .unwrap();
        assert_eq!(result, 0u64.to_le_bytes().to_vec());
    }

    #[test]
    fn test_transfer_moves_funds_and_notifies() {
        let from = Address::from_bytes([1u8; 20]);
        let to = Address::from_bytes([2u8; 20]);
        let service = test_service(from);
        init_balance(&service.borrow().cache, &from, 1_000);

        let result = native_call(
            &service,
            ONG_CONTRACT_ADDRESS,
            TRANSFER_NAME,
            encode_transfer(from, to, 300),
        )
        .unwrap();
        assert_eq!(result, byte_true());

        let balances = {
            let svc = service.borrow();
            (
                balance(&svc.cache, &from).unwrap(),
                balance(&svc.cache, &to).unwrap(),
            )
        };
        assert_eq!(balances, (700, 300));

        let svc = service.borrow();
        assert_eq!(svc.notifications.len(), 1);
        assert_eq!(svc.notifications[0].contract, ONG_CONTRACT_ADDRESS);
    }

    #[test]
    fn test_transfer_requires_witness() {
        let from = Address::from_bytes([1u8; 20]);
        let to = Address::from_bytes([2u8; 20]);
        // signed by the recipient, not the sender
        let service = test_service(to);
        init_balance(&service.borrow().cache, &from, 1_000);

        let err = native_call(
            &service,
            ONG_CONTRACT_ADDRESS,
            TRANSFER_NAME,
            encode_transfer(from, to, 300),
        )
        .unwrap_err();
        assert!(matches!(err, VmError::HostCall(_)));
        // failed handler leaves no notifications behind
        assert!(service.borrow().notifications.is_empty());
    }

    #[test]
    fn test_transfer_insufficient_funds() {
        let from = Address::from_bytes([1u8; 20]);
        let to = Address::from_bytes([2u8; 20]);
        let service = test_service(from);
        init_balance(&service.borrow().cache, &from, 100);

        let err = native_call(
            &service,
            ONG_CONTRACT_ADDRESS,
            TRANSFER_NAME,
            encode_transfer(from, to, 300),
        )
        .unwrap_err();
        assert_eq!(
            err,
            VmError::InsufficientBalance {
                balance: 100,
                required: 300
            }
        );
    }

    #[test]
    fn test_transfer_to_zero_balance_deletes_record() {
        let from = Address::from_bytes([1u8; 20]);
        let to = Address::from_bytes([2u8; 20]);
        let service = test_service(from);
        init_balance(&service.borrow().cache, &from, 100);

        native_call(
            &service,
            ONG_CONTRACT_ADDRESS,
            TRANSFER_NAME,
            encode_transfer(from, to, 100),
        )
        .unwrap();
        let svc = service.borrow();
        assert_eq!(svc.cache.get(&balance_key(&from)).unwrap(), None);
    }
}
