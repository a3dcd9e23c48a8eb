//! The slice of a ledger transaction the execution layer consumes.
//!
//! Transaction decoding, signatures and mempool concerns live in the outer
//! ledger; the execution layer only needs the payer, the gas terms, the
//! authorized signers and the payload.

use crate::address::Address;
use crate::deploy_code::DeployCode;
use crate::hash::Hash;
use bytes::Bytes;

/// Payload of an `Invoke` transaction: the serialized call frame
/// (`WasmContractParam` wire form — target address plus argument buffer).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvokeCode {
    pub code: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxPayload {
    Deploy(DeployCode),
    Invoke(InvokeCode),
}

#[derive(Debug, Clone)]
pub struct Transaction {
    pub hash: Hash,
    pub payer: Address,
    pub gas_price: u64,
    pub gas_limit: u64,
    /// Addresses that signed this transaction (witnesses).
    pub signers: Vec<Address>,
    pub payload: TxPayload,
}

impl Transaction {
    pub fn deploy(payer: Address, gas_price: u64, gas_limit: u64, code: DeployCode) -> Self {
        let hash = Hash::compute_multi(&[payer.as_bytes(), &code.to_bytes()]);
        Self {
            hash,
            payer,
            gas_price,
            gas_limit,
            signers: vec![payer],
            payload: TxPayload::Deploy(code),
        }
    }

    pub fn invoke(payer: Address, gas_price: u64, gas_limit: u64, code: impl Into<Bytes>) -> Self {
        let code = code.into();
        let hash = Hash::compute_multi(&[payer.as_bytes(), &code]);
        Self {
            hash,
            payer,
            gas_price,
            gas_limit,
            signers: vec![payer],
            payload: TxPayload::Invoke(InvokeCode { code }),
        }
    }

    pub fn with_signers(mut self, signers: Vec<Address>) -> Self {
        self.signers = signers;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deploy_code::VmType;

    #[test]
    fn test_invoke_tx() {
        let payer = Address::from_bytes([1u8; 20]);
        let tx = Transaction::invoke(payer, 500, 20_000, vec![9u8; 4]);
        assert_eq!(tx.payer, payer);
        assert_eq!(tx.signers, vec![payer]);
        assert!(matches!(tx.payload, TxPayload::Invoke(_)));
        assert!(!tx.hash.is_zero());
    }

    #[test]
    fn test_deploy_tx() {
        let payer = Address::from_bytes([2u8; 20]);
        let dc =
            DeployCode::new(vec![1, 2, 3], VmType::Stack, "t", "1", "a", "e", "d").unwrap();
        let tx = Transaction::deploy(payer, 0, 0, dc.clone());
        match tx.payload {
            TxPayload::Deploy(ref got) => assert_eq!(got, &dc),
            _ => panic!("expected deploy payload"),
        }
    }
}
