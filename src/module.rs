//! The read-only module description and the host-mutable module instance
//! the core consumes (spec §3 "Module (input, read-only)" / "Module
//! instance").

use crate::intrinsics::HostIntrinsics;
use crate::types::{FunctionType, ValueType};

/// A defined function: its type, its non-parameter local types, and the
/// raw operator-stream bytes the decoder reads.
#[derive(Debug, Clone)]
pub struct FunctionDef {
    pub type_index: u32,
    pub non_parameter_locals: Vec<ValueType>,
    pub code: Vec<u8>,
}

/// An imported function: only its type is needed to emit a call signature
/// (its resolved address lives in `ModuleInstance`, not here).
#[derive(Debug, Clone)]
pub struct ImportedFunction {
    pub type_index: u32,
    pub module: String,
    pub field: String,
}

/// An imported global: only its value type is needed to size the load/store
/// this crate emits (its resolved address lives in `ModuleInstance`).
#[derive(Debug, Clone)]
pub struct ImportedGlobal {
    pub value_type: ValueType,
    pub module: String,
    pub field: String,
    pub mutable: bool,
}

/// The default linear memory's declared bounds (in pages; page size is the
/// host's responsibility, not this crate's).
#[derive(Debug, Clone, Copy)]
pub struct MemoryDescriptor {
    pub min_pages: u32,
    pub max_pages: Option<u32>,
}

/// The default table's declared element-count bounds.
#[derive(Debug, Clone, Copy)]
pub struct TableDescriptor {
    pub min: u32,
    pub max: u32,
}

/// The parsed, validated module this crate consumes. Read-only for the
/// duration of one module-lowering pass.
#[derive(Debug, Clone, Default)]
pub struct Module {
    pub types: Vec<FunctionType>,
    pub function_defs: Vec<FunctionDef>,
    pub imported_functions: Vec<ImportedFunction>,
    pub imported_globals: Vec<ImportedGlobal>,
    pub default_memory: Option<MemoryDescriptor>,
    pub default_table: Option<TableDescriptor>,
}

impl Module {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn function_type(&self, func_index: u32) -> &FunctionType {
        let num_imports = self.imported_functions.len() as u32;
        if func_index < num_imports {
            let import = &self.imported_functions[func_index as usize];
            &self.types[import.type_index as usize]
        } else {
            let def = &self.function_defs[(func_index - num_imports) as usize];
            &self.types[def.type_index as usize]
        }
    }

    pub fn num_imported_functions(&self) -> u32 {
        self.imported_functions.len() as u32
    }
}

/// The default linear memory's resolved runtime location (spec §3,
/// §4.5 `coerce_address`). `end_offset` MUST be a power of two; see the
/// resolved Open Question in `SPEC_FULL.md` §9.
#[derive(Debug, Clone, Copy)]
pub struct MemoryInstance {
    pub base: usize,
    pub end_offset: u64,
}

impl MemoryInstance {
    /// `mask = end_offset - 1`. Debug-asserts the power-of-two precondition
    /// rather than silently deriving a wrong mask.
    pub fn address_mask(&self) -> u64 {
        debug_assert!(
            self.end_offset.is_power_of_two(),
            "memory end_offset must be a power of two, got {}",
            self.end_offset
        );
        self.end_offset - 1
    }
}

/// Host-mutable, core-read-only per-module runtime state (spec §3 "Module
/// instance").
#[derive(Debug, Clone, Default)]
pub struct ModuleInstance {
    /// Resolved native code addresses for imported functions, parallel to
    /// `Module::imported_functions`.
    pub imported_function_pointers: Vec<usize>,
    /// Resolved native code addresses for sibling defined functions,
    /// parallel to `Module::function_defs`. `None` if not yet compiled;
    /// see `SPEC_FULL.md` §4.2 "Defined-function addresses".
    pub function_pointers: Vec<Option<usize>>,
    /// Resolved storage addresses for imported globals, parallel to
    /// `Module::imported_globals`.
    pub global_addresses: Vec<usize>,
    pub default_memory: Option<MemoryInstance>,
    /// Resolved slots-array base pointer and element capacity for the
    /// default table, if present. The table's own lifecycle (§4.6) is
    /// managed by `crate::table::Table`; this is just the pointer pair
    /// generated code addresses directly.
    pub default_table: Option<TableInstance>,
    /// Resolved addresses for every host intrinsic this module's functions
    /// might call (spec §6).
    pub host_intrinsics: HostIntrinsics,
}

/// The pointer pair generated code needs to perform `call_indirect`
/// (spec §6 "Table memory layout").
#[derive(Debug, Clone, Copy)]
pub struct TableInstance {
    pub slots_base: usize,
    /// Element-count bound used for the `call_indirect` OOB check. Resolved
    /// as element-count, not byte length; see `SPEC_FULL.md` §9.
    pub end_offset: u32,
    /// Opaque handle passed to `indirect_call_signature_mismatch`.
    pub table_handle: i64,
}
