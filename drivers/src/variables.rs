/*++

Licensed under the Apache-2.0 license.

File Name:

    variables.rs

Abstract:

    File contains the persisted variable store interface and an in-memory
    implementation used on hosts and in tests.

--*/

use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use bitflags::bitflags;
use bootgate_error::{BootGateError, BootGateResult};

bitflags! {
    /// Variable attributes understood by the host variable service
    #[derive(Debug, Copy, Clone, Eq, PartialEq)]
    pub struct VariableAttributes: u32 {
        const NON_VOLATILE = 0x0000_0001;
        const BOOTSERVICE_ACCESS = 0x0000_0002;
        const RUNTIME_ACCESS = 0x0000_0004;
        const TIME_BASED_AUTHENTICATED_WRITE_ACCESS = 0x0000_0020;
    }
}

impl VariableAttributes {
    /// Scope required for every variable the boot gate reads
    pub const PERSISTED: Self = Self::NON_VOLATILE
        .union(Self::BOOTSERVICE_ACCESS)
        .union(Self::RUNTIME_ACCESS);

    /// Scope used by administrative updates
    pub const AUTHENTICATED: Self =
        Self::PERSISTED.union(Self::TIME_BASED_AUTHENTICATED_WRITE_ACCESS);
}

/// Fixed names of the variables consulted by the boot gate
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd)]
pub enum VariableName {
    /// Platform allow list
    PlatformDb,

    /// Platform deny list
    PlatformDbx,

    /// Machine-owner allow list
    MokList,

    /// Machine-owner deny list
    MokListX,

    /// Persisted revocation policy override
    SbatLevel,

    /// Persisted policy flags
    PolicyFlags,
}

impl VariableName {
    pub const ALL: [VariableName; 6] = [
        VariableName::PlatformDb,
        VariableName::PlatformDbx,
        VariableName::MokList,
        VariableName::MokListX,
        VariableName::SbatLevel,
        VariableName::PolicyFlags,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            VariableName::PlatformDb => "db",
            VariableName::PlatformDbx => "dbx",
            VariableName::MokList => "MokList",
            VariableName::MokListX => "MokListX",
            VariableName::SbatLevel => "SbatLevel",
            VariableName::PolicyFlags => "BootGatePolicy",
        }
    }
}

/// Persisted variable service supplied by the host firmware
pub trait VariableStore {
    /// Read a variable and its attributes. `Ok(None)` means the variable
    /// does not exist.
    fn get_variable(
        &self,
        name: VariableName,
    ) -> BootGateResult<Option<(VariableAttributes, Vec<u8>)>>;

    /// Read a variable that must carry the `PERSISTED` scope. A variable
    /// without it is an error, never an absent variable.
    fn get_persisted_variable(&self, name: VariableName) -> BootGateResult<Option<Vec<u8>>> {
        match self.get_variable(name)? {
            Some((attributes, data)) if attributes.contains(VariableAttributes::PERSISTED) => {
                Ok(Some(data))
            }
            Some(_) => Err(BootGateError::VARIABLE_ATTRIBUTES_INVALID),
            None => Ok(None),
        }
    }

    /// Replace a variable's contents.
    fn set_variable(
        &mut self,
        name: VariableName,
        attributes: VariableAttributes,
        data: &[u8],
    ) -> BootGateResult<()>;
}

/// Variable store backed by memory
#[derive(Default)]
pub struct MemoryVariableStore {
    vars: BTreeMap<VariableName, (VariableAttributes, Vec<u8>)>,
    failing: Vec<VariableName>,
    writes: usize,
}

impl MemoryVariableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every access to `name` fail until cleared
    pub fn inject_failure(&mut self, name: VariableName) {
        if !self.failing.contains(&name) {
            self.failing.push(name);
        }
    }

    pub fn clear_failures(&mut self) {
        self.failing.clear();
    }

    pub fn attributes(&self, name: VariableName) -> Option<VariableAttributes> {
        self.vars.get(&name).map(|(attrs, _)| *attrs)
    }

    /// Number of successful writes
    pub fn write_count(&self) -> usize {
        self.writes
    }

    /// Place a variable without the write checks of `set_variable`, the way
    /// another agent with direct access to the store could
    pub fn insert_raw(
        &mut self,
        name: VariableName,
        attributes: VariableAttributes,
        data: &[u8],
    ) {
        self.vars.insert(name, (attributes, data.to_vec()));
    }
}

impl VariableStore for MemoryVariableStore {
    fn get_variable(
        &self,
        name: VariableName,
    ) -> BootGateResult<Option<(VariableAttributes, Vec<u8>)>> {
        if self.failing.contains(&name) {
            return Err(BootGateError::VARIABLE_READ_FAILURE);
        }
        Ok(self.vars.get(&name).cloned())
    }

    fn set_variable(
        &mut self,
        name: VariableName,
        attributes: VariableAttributes,
        data: &[u8],
    ) -> BootGateResult<()> {
        if self.failing.contains(&name) || !attributes.contains(VariableAttributes::PERSISTED) {
            return Err(BootGateError::VARIABLE_WRITE_FAILURE);
        }
        self.vars.insert(name, (attributes, data.to_vec()));
        self.writes += 1;
        Ok(())
    }
}
