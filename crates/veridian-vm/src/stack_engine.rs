//! The stack-machine bytecode engine.
//!
//! Contracts deployed with the stack vm-type run here: a compact interpreter
//! over cross-VM values. Parameters arrive codec-encoded and seed the
//! evaluation stack; the result is the value left on top (or the one handed
//! to `RET`). Every executed opcode debits the shared gas meter and consumes
//! one execution step, so a cross-VM hop cannot escape the transaction
//! budget.

use crate::context::ExecutionContext;
use crate::crossvm::{self, Value};
use crate::error::VmError;
use crate::gas_metering::STACK_OPCODE_GAS;
use crate::service::ServiceRef;
use bytes::Bytes;
use veridian_types::Address;

/// Maximum evaluation stack depth.
pub const MAX_STACK_SIZE: usize = 1024;

// Opcodes
pub const OP_STOP: u8 = 0x00;
pub const OP_ADD: u8 = 0x01;
pub const OP_SUB: u8 = 0x02;
pub const OP_MUL: u8 = 0x03;
pub const OP_DIV: u8 = 0x04;
pub const OP_LT: u8 = 0x10;
pub const OP_GT: u8 = 0x11;
pub const OP_EQ: u8 = 0x14;
pub const OP_CONCAT: u8 = 0x20;
pub const OP_DROP: u8 = 0x50;
pub const OP_DUP: u8 = 0x51;
pub const OP_SWAP: u8 = 0x52;
/// `0x60 len:u8 bytes[len]` — push raw bytes
pub const OP_PUSH_BYTES: u8 = 0x60;
/// `0x61 v:i64 LE` — push an integer
pub const OP_PUSH_INT: u8 = 0x61;
/// `0x62 v:u8` — push a boolean
pub const OP_PUSH_BOOL: u8 = 0x62;
/// `0x70 n:u8` — pop n values, push them as one list
pub const OP_PACK: u8 = 0x70;
/// Pop the top value and terminate with it as the result
pub const OP_RET: u8 = 0xF0;

/// Run the stack contract at `address` with codec-encoded `input` as its
/// parameters. Pushes a context frame for the duration; popped on every
/// exit path.
pub fn invoke(service: &ServiceRef, address: Address, input: &[u8]) -> Result<Value, VmError> {
    let code: Bytes = {
        let svc = service.borrow();
        let contract = svc
            .cache
            .get_contract(&address)?
            .ok_or(VmError::ContractNotFound(address))?;
        contract
            .stack_code()
            .map_err(|_| VmError::UnsupportedContractType)?
            .clone()
    };

    service
        .borrow_mut()
        .push_context(ExecutionContext::new(address, Some(code.clone())))?;
    let result = execute(service, &code, input);
    service.borrow_mut().pop_context();
    result
}

fn initial_stack(input: &[u8]) -> Result<Vec<Value>, VmError> {
    if input.is_empty() {
        return Ok(Vec::new());
    }
    match crossvm::deserialize_value(input) {
        Ok(Value::List(values)) => Ok(values),
        Ok(value) => Ok(vec![value]),
        Err(_) => Err(VmError::HostCall(
            "malformed stack engine parameters".into(),
        )),
    }
}

fn push(stack: &mut Vec<Value>, value: Value) -> Result<(), VmError> {
    if stack.len() >= MAX_STACK_SIZE {
        return Err(VmError::ExecutionFault("stack overflow".into()));
    }
    stack.push(value);
    Ok(())
}

fn pop(stack: &mut Vec<Value>) -> Result<Value, VmError> {
    stack
        .pop()
        .ok_or_else(|| VmError::ExecutionFault("stack underflow".into()))
}

fn pop_int(stack: &mut Vec<Value>) -> Result<i64, VmError> {
    match pop(stack)? {
        Value::Int(v) => Ok(v),
        other => Err(VmError::ExecutionFault(format!(
            "expected integer, found {other:?}"
        ))),
    }
}

fn pop_bytes(stack: &mut Vec<Value>) -> Result<Vec<u8>, VmError> {
    match pop(stack)? {
        Value::Bytes(v) => Ok(v),
        other => Err(VmError::ExecutionFault(format!(
            "expected bytes, found {other:?}"
        ))),
    }
}

fn execute(service: &ServiceRef, code: &[u8], input: &[u8]) -> Result<Value, VmError> {
    let mut stack = initial_stack(input)?;
    let mut pc = 0usize;

    while pc < code.len() {
        {
            let mut svc = service.borrow_mut();
            svc.meter.charge(STACK_OPCODE_GAS)?;
            svc.meter.consume_steps(1)?;
        }

        let op = code[pc];
        pc += 1;
        match op {
            OP_STOP => break,
            OP_ADD | OP_SUB | OP_MUL | OP_DIV => {
                let b = pop_int(&mut stack)?;
                let a = pop_int(&mut stack)?;
                let result = match op {
                    OP_ADD => a.checked_add(b),
                    OP_SUB => a.checked_sub(b),
                    OP_MUL => a.checked_mul(b),
                    _ => a.checked_div(b),
                }
                .ok_or_else(|| VmError::ExecutionFault("integer arithmetic fault".into()))?;
                push(&mut stack, Value::Int(result))?;
            }
            OP_LT => {
                let b = pop_int(&mut stack)?;
                let a = pop_int(&mut stack)?;
                push(&mut stack, Value::Bool(a < b))?;
            }
            OP_GT => {
                let b = pop_int(&mut stack)?;
                let a = pop_int(&mut stack)?;
                push(&mut stack, Value::Bool(a > b))?;
            }
            OP_EQ => {
                let b = pop(&mut stack)?;
                let a = pop(&mut stack)?;
                push(&mut stack, Value::Bool(a == b))?;
            }
            OP_CONCAT => {
                let b = pop_bytes(&mut stack)?;
                let mut a = pop_bytes(&mut stack)?;
                a.extend_from_slice(&b);
                push(&mut stack, Value::Bytes(a))?;
            }
            OP_DROP => {
                pop(&mut stack)?;
            }
            OP_DUP => {
                let top = pop(&mut stack)?;
                push(&mut stack, top.clone())?;
                push(&mut stack, top)?;
            }
            OP_SWAP => {
                let b = pop(&mut stack)?;
                let a = pop(&mut stack)?;
                push(&mut stack, b)?;
                push(&mut stack, a)?;
            }
            OP_PUSH_BYTES => {
                let len = *code
                    .get(pc)
                    .ok_or_else(|| VmError::ExecutionFault("truncated push".into()))?
                    as usize;
                pc += 1;
                let bytes = code
                    .get(pc..pc + len)
                    .ok_or_else(|| VmError::ExecutionFault("truncated push".into()))?;
                pc += len;
                push(&mut stack, Value::Bytes(bytes.to_vec()))?;
            }
            OP_PUSH_INT => {
                let bytes = code
                    .get(pc..pc + 8)
                    .ok_or_else(|| VmError::ExecutionFault("truncated push".into()))?;
                pc += 8;
                let mut arr = [0u8; 8];
                arr.copy_from_slice(bytes);
                push(&mut stack, Value::Int(i64::from_le_bytes(arr)))?;
            }
            OP_PUSH_BOOL => {
                let v = *code
                    .get(pc)
                    .ok_or_else(|| VmError::ExecutionFault("truncated push".into()))?;
                pc += 1;
                push(&mut stack, Value::Bool(v != 0))?;
            }
            OP_PACK => {
                let n = *code
                    .get(pc)
                    .ok_or_else(|| VmError::ExecutionFault("truncated pack".into()))?
                    as usize;
                pc += 1;
                if stack.len() < n {
                    return Err(VmError::ExecutionFault("stack underflow".into()));
                }
                let items = stack.split_off(stack.len() - n);
                push(&mut stack, Value::List(items))?;
            }
            OP_RET => return pop(&mut stack),
            other => {
                return Err(VmError::ExecutionFault(format!(
                    "unknown opcode 0x{other:02x}"
                )));
            }
        }
    }

    Ok(stack.pop().unwrap_or(Value::Bytes(Vec::new())))
}
