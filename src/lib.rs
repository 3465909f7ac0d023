//! Core lowering engine: translates one validated bytecode module into a
//! Cranelift IR module, plus the indirect-call table the generated code's
//! `call_indirect` dispatches through.
//!
//! Linking, scheduling of compilation order, and executable-memory
//! finalization are the embedding host's job (see `DESIGN.md` and
//! `SPEC_FULL.md` §1) — this crate hands back `cranelift_codegen::ir::Function`
//! values, not machine code.

pub mod context;
pub mod control;
pub mod decode;
pub mod error;
pub mod facade;
pub mod intrinsics;
pub mod lower;
pub mod module;
pub mod opcode;
pub mod table;
pub mod types;
pub mod unreachable;

use std::sync::Arc;

use cranelift_codegen::ir;
use cranelift_codegen::isa::TargetIsa;
use cranelift_codegen::settings::{self, Configurable};
use cranelift_frontend::{FunctionBuilder, FunctionBuilderContext};
use tracing::instrument;

pub use context::ModuleEmitContext;
pub use error::{DecodeError, LowerError, TableError};
pub use lower::FunctionLowerer;
pub use module::{Module, ModuleInstance};

/// Resolves the host's native instruction set once per process, the one
/// piece of genuine "configuration" this crate carries (spec §2.1):
/// `ModuleEmitContext` reads `pointer_type()`/`call_conv()` off of it but
/// never re-derives them per function. Grounded on
/// `jit/backend/cranelift/mod.rs`'s `CraneliftBackend::host()`, which builds
/// the same `cranelift_native::builder()` + `settings::Flags` pair before
/// ever touching a function body.
pub struct CraneliftBackend {
    isa: Arc<dyn TargetIsa>,
}

impl CraneliftBackend {
    /// Build a backend targeting the host machine, with the teacher's own
    /// `opt_level = speed` / `is_pic = true` flag choices.
    pub fn host() -> Result<Self, LowerError> {
        let mut flag_builder = settings::builder();
        flag_builder
            .set("opt_level", "speed")
            .map_err(|e| LowerError::UnsupportedOperator(format!("opt_level: {e}")))?;
        flag_builder
            .set("is_pic", "true")
            .map_err(|e| LowerError::UnsupportedOperator(format!("is_pic: {e}")))?;
        let flags = settings::Flags::new(flag_builder);

        let isa = cranelift_native::builder()
            .map_err(|e| LowerError::UnsupportedOperator(format!("native ISA builder: {e}")))?
            .finish(flags)?;

        Ok(Self { isa })
    }

    pub fn with_isa(isa: Arc<dyn TargetIsa>) -> Self {
        Self { isa }
    }

    pub fn isa(&self) -> &Arc<dyn TargetIsa> {
        &self.isa
    }

    pub fn pointer_type(&self) -> ir::Type {
        self.isa.pointer_type()
    }

    pub fn call_conv(&self) -> cranelift_codegen::isa::CallConv {
        self.isa.default_call_conv()
    }
}

/// One compiled module: an external-linkage `cranelift_codegen::ir::Function`
/// per bytecode-defined function, in `Module::function_defs` order (spec §6
/// "Output").
pub struct CompiledModule {
    pub functions: Vec<ir::Function>,
}

/// Component B's per-module driver: builds one `ModuleEmitContext`, then
/// lowers every defined function body into its own `ir::Function` (spec
/// §4.2). Grounded on `CraneliftBackend::compile_function` in
/// `jit/backend/cranelift/mod.rs`, generalized from "one function, pre-built
/// signature" to "every defined function in the module, each with its own
/// signature resolved from the module's type table."
///
/// Does not sequence functions across threads itself; spec §5 permits an
/// embedder to lower disjoint functions in parallel against the same
/// read-only `ctx`; this driver is the sequential reference shape.
#[instrument(skip(ctx))]
pub fn compile_module(ctx: &ModuleEmitContext<'_>) -> Result<CompiledModule, LowerError> {
    let num_imports = ctx.num_imported_functions();
    let mut functions = Vec::with_capacity(ctx.module.function_defs.len());

    for (local_index, def) in ctx.module.function_defs.iter().enumerate() {
        let func_index = num_imports + local_index as u32;
        let func_type = ctx.function_type(func_index);
        let sig = ctx.signature_for(func_type);

        let mut func =
            ir::Function::with_name_signature(ir::UserFuncName::user(0, func_index), sig);
        let mut builder_ctx = FunctionBuilderContext::new();
        {
            let mut builder = FunctionBuilder::new(&mut func, &mut builder_ctx);
            FunctionLowerer::lower_function(ctx, &mut builder, func_index, func_type, def)?;
        }
        functions.push(func);
    }

    Ok(CompiledModule { functions })
}
