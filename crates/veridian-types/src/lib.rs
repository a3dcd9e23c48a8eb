//! Veridian Types - Core type definitions for the Veridian contract layer.
//!
//! This crate provides the fundamental types consumed by the execution layer:
//! - Addresses (20-byte, content-addressed for contracts)
//! - Hashes (32-byte, blake3 digests)
//! - The canonical wire codec (`Sink` / `Source`)
//! - Deployable contract records (`DeployCode`)
//! - Transactions and invoke parameter records

pub mod address;
pub mod codec;
pub mod deploy_code;
pub mod error;
pub mod hash;
pub mod invoke;
pub mod transaction;

pub use address::Address;
pub use codec::{Sink, Source};
pub use deploy_code::{DeployCode, VmType};
pub use error::TypesError;
pub use hash::Hash;
pub use invoke::{ContractInvokeParam, WasmContractParam};
pub use transaction::{InvokeCode, Transaction, TxPayload};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        Address, ContractInvokeParam, DeployCode, Hash, InvokeCode, Sink, Source, Transaction,
        TxPayload, TypesError, VmType, WasmContractParam,
    };
}
