//! Governance contract surface visible to the execution layer.
//!
//! The consensus machinery lives upstream; here the contract serves two
//! roles: its address is the fee sink, and its `commitDpos` invoke payload
//! is the system-privilege sentinel the dispatcher matches to skip fee
//! logic.

use super::{byte_true, NativeContext};
use crate::error::VmError;
use veridian_types::{Address, Sink, WasmContractParam};

pub const GOVERNANCE_CONTRACT_ADDRESS: Address = Address::native(7);

pub const COMMIT_DPOS_NAME: &str = "commitDpos";

pub fn register(ctx: &mut NativeContext) {
    ctx.register(COMMIT_DPOS_NAME, commit_dpos);
}

fn commit_dpos(_ctx: &mut NativeContext) -> Result<Vec<u8>, VmError> {
    // epoch settlement is driven by the consensus layer; the execution
    // layer only needs the entry point to exist
    Ok(byte_true())
}

/// The exact invoke payload of a system `commitDpos` transaction.
pub fn commit_dpos_code() -> Vec<u8> {
    let mut args = Sink::new();
    args.write_u8(0);
    args.write_str(COMMIT_DPOS_NAME);
    args.write_var_bytes(&[]);

    WasmContractParam {
        address: GOVERNANCE_CONTRACT_ADDRESS,
        args: args.into_bytes().into(),
    }
    .to_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commit_dpos_code_is_stable() {
        assert_eq!(commit_dpos_code(), commit_dpos_code());
        let param = WasmContractParam::from_bytes(&commit_dpos_code()).unwrap();
        assert_eq!(param.address, GOVERNANCE_CONTRACT_ADDRESS);
    }
}
