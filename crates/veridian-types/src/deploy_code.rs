//! On-chain record of a deployable contract.
//!
//! A `DeployCode` is immutable once committed: it carries the raw code, a
//! vm-type flag and metadata strings, all bounded in size. Validation runs on
//! both the construct and deserialize paths, so a decoded record is always
//! valid.

use crate::address::Address;
use crate::codec::{Sink, Source};
use crate::error::TypesError;
use bytes::Bytes;
use std::sync::OnceLock;

/// Which execution engine a contract targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmType {
    /// Stack-machine bytecode engine (vm flags 0 and 1)
    Stack,
    /// WebAssembly sandbox (vm flags 3)
    Wasm,
}

/// Maximum WASM code size (512 KiB)
pub const MAX_WASM_CODE_SIZE: usize = 512 * 1024;
/// Maximum stack-machine code size (1 MiB)
pub const MAX_STACK_CODE_SIZE: usize = 1024 * 1024;
/// Maximum length of the name/version/author/email metadata strings
pub const MAX_METADATA_LEN: usize = 252;
/// Maximum length of the description string
pub const MAX_DESCRIPTION_LEN: usize = 65536;

/// The on-chain encoding of a deployed contract: code, vm-type flag and
/// metadata. The derived content address is computed lazily and memoized.
#[derive(Debug, Clone)]
pub struct DeployCode {
    code: Bytes,
    // 0 and 1 mean the stack engine, 3 means WASM; other values are rejected
    vm_flags: u8,
    pub name: String,
    pub version: String,
    pub author: String,
    pub email: String,
    pub description: String,

    address: OnceLock<Address>,
}

impl PartialEq for DeployCode {
    fn eq(&self, other: &Self) -> bool {
        self.code == other.code
            && self.vm_flags == other.vm_flags
            && self.name == other.name
            && self.version == other.version
            && self.author == other.author
            && self.email == other.email
            && self.description == other.description
    }
}

impl Eq for DeployCode {}

fn check_vm_flags(vm_flags: u8) -> Result<(), TypesError> {
    match vm_flags {
        0 | 1 | 3 => Ok(()),
        other => Err(TypesError::InvalidVmFlag(other)),
    }
}

impl DeployCode {
    pub fn new(
        code: impl Into<Bytes>,
        vm_type: VmType,
        name: impl Into<String>,
        version: impl Into<String>,
        author: impl Into<String>,
        email: impl Into<String>,
        description: impl Into<String>,
    ) -> Result<Self, TypesError> {
        let dc = Self {
            code: code.into(),
            vm_flags: match vm_type {
                VmType::Stack => 1,
                VmType::Wasm => 3,
            },
            name: name.into(),
            version: version.into(),
            author: author.into(),
            email: email.into(),
            description: description.into(),
            address: OnceLock::new(),
        };
        dc.validate()?;
        Ok(dc)
    }

    /// Construct from a raw vm-flags byte, as read off the wire or out of
    /// guest memory. Rejects flags outside {0, 1, 3}.
    pub fn with_raw_flags(
        code: impl Into<Bytes>,
        vm_flags: u8,
        name: impl Into<String>,
        version: impl Into<String>,
        author: impl Into<String>,
        email: impl Into<String>,
        description: impl Into<String>,
    ) -> Result<Self, TypesError> {
        let dc = Self {
            code: code.into(),
            vm_flags,
            name: name.into(),
            version: version.into(),
            author: author.into(),
            email: email.into(),
            description: description.into(),
            address: OnceLock::new(),
        };
        dc.validate()?;
        Ok(dc)
    }

    pub fn vm_type(&self) -> VmType {
        match self.vm_flags {
            0 | 1 => VmType::Stack,
            3 => VmType::Wasm,
            // construction rejects every other value
            _ => unreachable!("invalid vm flags escaped validation"),
        }
    }

    /// The derived contract address: `blake3(code)[0..20]`, stable under
    /// metadata changes.
    pub fn address(&self) -> Address {
        *self.address.get_or_init(|| Address::from_code(&self.code))
    }

    pub fn raw_code(&self) -> &Bytes {
        &self.code
    }

    /// The code bytes, if this is a WASM contract.
    pub fn wasm_code(&self) -> Result<&Bytes, TypesError> {
        match self.vm_type() {
            VmType::Wasm => Ok(&self.code),
            VmType::Stack => Err(TypesError::InvalidVmFlag(self.vm_flags)),
        }
    }

    /// The code bytes, if this is a stack-machine contract.
    pub fn stack_code(&self) -> Result<&Bytes, TypesError> {
        match self.vm_type() {
            VmType::Stack => Ok(&self.code),
            VmType::Wasm => Err(TypesError::InvalidVmFlag(self.vm_flags)),
        }
    }

    fn validate(&self) -> Result<(), TypesError> {
        check_vm_flags(self.vm_flags)?;

        let (cap, field) = match self.vm_type() {
            VmType::Wasm => (MAX_WASM_CODE_SIZE, "code"),
            VmType::Stack => (MAX_STACK_CODE_SIZE, "code"),
        };
        if self.code.len() > cap {
            return Err(TypesError::TooLong {
                field,
                len: self.code.len(),
                max: cap,
            });
        }

        for (field, value) in [
            ("name", &self.name),
            ("version", &self.version),
            ("author", &self.author),
            ("email", &self.email),
        ] {
            if value.len() > MAX_METADATA_LEN {
                return Err(TypesError::TooLong {
                    field,
                    len: value.len(),
                    max: MAX_METADATA_LEN,
                });
            }
        }
        if self.description.len() > MAX_DESCRIPTION_LEN {
            return Err(TypesError::TooLong {
                field: "description",
                len: self.description.len(),
                max: MAX_DESCRIPTION_LEN,
            });
        }
        Ok(())
    }

    pub fn serialization(&self, sink: &mut Sink) {
        sink.write_var_bytes(&self.code);
        sink.write_u8(self.vm_flags);
        sink.write_str(&self.name);
        sink.write_str(&self.version);
        sink.write_str(&self.author);
        sink.write_str(&self.email);
        sink.write_str(&self.description);
    }

    pub fn deserialization(source: &mut Source<'_>) -> Result<Self, TypesError> {
        let code = source.read_var_bytes()?.to_vec();
        let vm_flags = source.read_u8()?;
        let name = source.read_str("name")?;
        let version = source.read_str("version")?;
        let author = source.read_str("author")?;
        let email = source.read_str("email")?;
        let description = source.read_str("description")?;

        let dc = Self {
            code: code.into(),
            vm_flags,
            name,
            version,
            author,
            email,
            description,
            address: OnceLock::new(),
        };
        dc.validate()?;
        Ok(dc)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut sink = Sink::new();
        self.serialization(&mut sink);
        sink.into_bytes()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TypesError> {
        Self::deserialization(&mut Source::new(bytes))
    }
}
