//! Component B: the module emission context.
//!
//! Resolves every module-wide constant a function body might reference
//! (import pointers, global addresses, memory base/mask, table base/bound)
//! exactly once per module, ahead of lowering any function body (spec
//! §4.2). Grounded on `EmitModuleContext` in
//! `examples/original_source/Source/Runtime/LLVMEmitIR.cpp`, whose
//! constructor resolves the same set of pointers as LLVM constants before
//! compiling a single function body.

use cranelift_codegen::ir;
use cranelift_codegen::isa::CallConv;

use crate::intrinsics::Intrinsic;
use crate::module::{Module, ModuleInstance};
use crate::types::FunctionType;

/// Per-module state shared read-only across every function-lowering pass
/// (component B). Safe to share across worker threads lowering different
/// functions concurrently (spec §5) because nothing here is mutated after
/// construction.
pub struct ModuleEmitContext<'m> {
    pub module: &'m Module,
    pub instance: &'m ModuleInstance,
    pointer_type: ir::Type,
    call_conv: CallConv,
}

impl<'m> ModuleEmitContext<'m> {
    pub fn new(
        module: &'m Module,
        instance: &'m ModuleInstance,
        pointer_type: ir::Type,
        call_conv: CallConv,
    ) -> Self {
        Self {
            module,
            instance,
            pointer_type,
            call_conv,
        }
    }

    pub fn pointer_type(&self) -> ir::Type {
        self.pointer_type
    }

    pub fn call_conv(&self) -> CallConv {
        self.call_conv
    }

    /// The resolved address and Cranelift signature for a host intrinsic,
    /// ready to hand to `IrFacade::call_intrinsic` (spec §6).
    pub fn intrinsic(&self, intrinsic: Intrinsic) -> (usize, ir::Signature) {
        let ptr = self.instance.host_intrinsics.address(intrinsic);
        let sig = intrinsic.signature(self.pointer_type, self.call_conv);
        (ptr, sig)
    }

    pub fn function_type(&self, func_index: u32) -> &FunctionType {
        self.module.function_type(func_index)
    }

    pub fn num_imported_functions(&self) -> u32 {
        self.module.num_imported_functions()
    }

    /// Resolve a callee's native code address: a precomputed import
    /// pointer if `func_index` names an import, or the (possibly not yet
    /// compiled) sibling function's pointer otherwise. Spec §4.2 "Defined
    /// function addresses": an unresolved sibling lowers to whatever
    /// placeholder is currently present, since patching the real address in
    /// is the external linker's job (§1), not this crate's.
    pub fn resolve_function_pointer(&self, func_index: u32) -> usize {
        let num_imports = self.module.num_imported_functions();
        if func_index < num_imports {
            self.instance.imported_function_pointers[func_index as usize]
        } else {
            self.instance.function_pointers[(func_index - num_imports) as usize].unwrap_or(0)
        }
    }

    pub fn resolve_global_address(&self, global_index: u32) -> usize {
        self.instance.global_addresses[global_index as usize]
    }

    pub fn default_memory_base(&self) -> Option<usize> {
        self.instance.default_memory.map(|m| m.base)
    }

    pub fn default_memory_mask(&self) -> Option<u64> {
        self.instance.default_memory.map(|m| m.address_mask())
    }

    pub fn default_table_slots_base(&self) -> Option<usize> {
        self.instance.default_table.map(|t| t.slots_base)
    }

    pub fn default_table_end_offset(&self) -> Option<u32> {
        self.instance.default_table.map(|t| t.end_offset)
    }

    pub fn default_table_handle(&self) -> Option<i64> {
        self.instance.default_table.map(|t| t.table_handle)
    }

    /// Build the Cranelift call signature for a bytecode function type, used
    /// both for `call`/`call_indirect` call sites and when the driver
    /// creates each function's own external-linkage signature (spec §4.2).
    pub fn signature_for(&self, func_type: &FunctionType) -> ir::Signature {
        let mut sig = ir::Signature::new(self.call_conv);
        for param in &func_type.params {
            sig.params.push(ir::AbiParam::new(param.to_cranelift()));
        }
        if let Some(result) = func_type.result.value_type() {
            sig.returns.push(ir::AbiParam::new(result.to_cranelift()));
        }
        sig
    }
}
