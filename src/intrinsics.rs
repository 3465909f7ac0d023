//! Host intrinsics: the fixed-name, fixed-signature functions generated code
//! calls into the host for (spec §6 "Host intrinsics").
//!
//! Grounded on the teacher's `RuntimeHelper` enum in
//! `jit/backend/traits.rs` ("well-known runtime helper functions that JIT
//! code calls via trampolines", resolved through a `SymbolResolver` trait at
//! finalization time). This crate resolves intrinsics the same way import
//! function pointers are resolved in `ModuleInstance` (spec §4.2): a flat
//! struct of `usize` addresses supplied by the host, one per `Intrinsic`
//! variant, with no trampoline layer of its own since `call_indirect` on a
//! constant pointer already gets generated code there directly.

use cranelift_codegen::ir::{self, AbiParam};
use cranelift_codegen::isa::CallConv;

use crate::types::ValueType;

/// One host intrinsic named in spec §6. Each has a fixed signature; the
/// host provides the native implementation and resolves its address before
/// lowering begins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Intrinsic {
    UnreachableTrap,
    DivideByZeroTrap,
    IndirectCallOob,
    IndirectCallSignatureMismatch,
    GrowMemory,
    CurrentMemory,
    FloatMin(ValueType),
    FloatMax(ValueType),
    FloatCeil(ValueType),
    FloatFloor(ValueType),
    FloatTrunc(ValueType),
    FloatNearest(ValueType),
    /// `float_to_signed_int`: `(src_float, dst_int) -> dst_int`.
    FloatToSignedInt(ValueType, ValueType),
    /// `float_to_unsigned_int`: `(src_float, dst_int) -> dst_int`.
    FloatToUnsignedInt(ValueType, ValueType),
    DebugEnterFunction,
    DebugExitFunction,
}

impl Intrinsic {
    /// The Cranelift signature this intrinsic is called with. `pointer_type`
    /// is the host's native pointer width, used for memory/table handles.
    pub fn signature(self, pointer_type: ir::Type, call_conv: CallConv) -> ir::Signature {
        let mut sig = ir::Signature::new(call_conv);
        match self {
            Intrinsic::UnreachableTrap | Intrinsic::DivideByZeroTrap | Intrinsic::IndirectCallOob => {}
            Intrinsic::IndirectCallSignatureMismatch => {
                sig.params.push(AbiParam::new(ir::types::I32)); // index
                sig.params.push(AbiParam::new(ir::types::I64)); // observed_type_tag
                sig.params.push(AbiParam::new(ir::types::I64)); // table_handle
            }
            Intrinsic::GrowMemory => {
                sig.params.push(AbiParam::new(ir::types::I32)); // delta_pages
                sig.params.push(AbiParam::new(ir::types::I64)); // memory_handle
                sig.returns.push(AbiParam::new(ir::types::I32));
            }
            Intrinsic::CurrentMemory => {
                sig.params.push(AbiParam::new(ir::types::I64)); // memory_handle
                sig.returns.push(AbiParam::new(ir::types::I32));
            }
            Intrinsic::FloatMin(t) | Intrinsic::FloatMax(t) => {
                sig.params.push(AbiParam::new(t.to_cranelift()));
                sig.params.push(AbiParam::new(t.to_cranelift()));
                sig.returns.push(AbiParam::new(t.to_cranelift()));
            }
            Intrinsic::FloatCeil(t)
            | Intrinsic::FloatFloor(t)
            | Intrinsic::FloatTrunc(t)
            | Intrinsic::FloatNearest(t) => {
                sig.params.push(AbiParam::new(t.to_cranelift()));
                sig.returns.push(AbiParam::new(t.to_cranelift()));
            }
            Intrinsic::FloatToSignedInt(src, dst) | Intrinsic::FloatToUnsignedInt(src, dst) => {
                sig.params.push(AbiParam::new(src.to_cranelift()));
                sig.returns.push(AbiParam::new(dst.to_cranelift()));
            }
            Intrinsic::DebugEnterFunction | Intrinsic::DebugExitFunction => {
                sig.params.push(AbiParam::new(pointer_type)); // function handle
            }
        }
        sig
    }

    pub fn returns_noreturn(self) -> bool {
        matches!(
            self,
            Intrinsic::UnreachableTrap
                | Intrinsic::DivideByZeroTrap
                | Intrinsic::IndirectCallOob
                | Intrinsic::IndirectCallSignatureMismatch
        )
    }
}

/// Resolved native addresses for every host intrinsic, supplied by the host
/// the same way `ModuleInstance::imported_function_pointers` is (spec §6).
/// `debug_enter_function`/`debug_exit_function` are optional: spec §6 gates
/// them "behind a compile-time toggle".
#[derive(Debug, Clone, Default)]
pub struct HostIntrinsics {
    pub unreachable_trap: usize,
    pub divide_by_zero_trap: usize,
    pub indirect_call_oob: usize,
    pub indirect_call_signature_mismatch: usize,
    pub grow_memory: usize,
    pub current_memory: usize,
    pub float_min_f32: usize,
    pub float_min_f64: usize,
    pub float_max_f32: usize,
    pub float_max_f64: usize,
    pub float_ceil_f32: usize,
    pub float_ceil_f64: usize,
    pub float_floor_f32: usize,
    pub float_floor_f64: usize,
    pub float_trunc_f32: usize,
    pub float_trunc_f64: usize,
    pub float_nearest_f32: usize,
    pub float_nearest_f64: usize,
    pub float_to_signed_int_f32_i32: usize,
    pub float_to_signed_int_f32_i64: usize,
    pub float_to_signed_int_f64_i32: usize,
    pub float_to_signed_int_f64_i64: usize,
    pub float_to_unsigned_int_f32_i32: usize,
    pub float_to_unsigned_int_f32_i64: usize,
    pub float_to_unsigned_int_f64_i32: usize,
    pub float_to_unsigned_int_f64_i64: usize,
    pub debug_enter_function: Option<usize>,
    pub debug_exit_function: Option<usize>,
}

impl HostIntrinsics {
    /// Resolve the address the host has registered for `intrinsic`. Panics
    /// (via `expect`) for the two optional debug hooks if the host never
    /// supplied one and the caller asks for it anyway — that is a
    /// configuration error in the embedder, not a recoverable condition.
    pub fn address(&self, intrinsic: Intrinsic) -> usize {
        use ValueType::{F32, F64, I32, I64};
        match intrinsic {
            Intrinsic::UnreachableTrap => self.unreachable_trap,
            Intrinsic::DivideByZeroTrap => self.divide_by_zero_trap,
            Intrinsic::IndirectCallOob => self.indirect_call_oob,
            Intrinsic::IndirectCallSignatureMismatch => self.indirect_call_signature_mismatch,
            Intrinsic::GrowMemory => self.grow_memory,
            Intrinsic::CurrentMemory => self.current_memory,
            Intrinsic::FloatMin(F32) => self.float_min_f32,
            Intrinsic::FloatMin(F64) => self.float_min_f64,
            Intrinsic::FloatMax(F32) => self.float_max_f32,
            Intrinsic::FloatMax(F64) => self.float_max_f64,
            Intrinsic::FloatCeil(F32) => self.float_ceil_f32,
            Intrinsic::FloatCeil(F64) => self.float_ceil_f64,
            Intrinsic::FloatFloor(F32) => self.float_floor_f32,
            Intrinsic::FloatFloor(F64) => self.float_floor_f64,
            Intrinsic::FloatTrunc(F32) => self.float_trunc_f32,
            Intrinsic::FloatTrunc(F64) => self.float_trunc_f64,
            Intrinsic::FloatNearest(F32) => self.float_nearest_f32,
            Intrinsic::FloatNearest(F64) => self.float_nearest_f64,
            Intrinsic::FloatToSignedInt(F32, I32) => self.float_to_signed_int_f32_i32,
            Intrinsic::FloatToSignedInt(F32, I64) => self.float_to_signed_int_f32_i64,
            Intrinsic::FloatToSignedInt(F64, I32) => self.float_to_signed_int_f64_i32,
            Intrinsic::FloatToSignedInt(F64, I64) => self.float_to_signed_int_f64_i64,
            Intrinsic::FloatToUnsignedInt(F32, I32) => self.float_to_unsigned_int_f32_i32,
            Intrinsic::FloatToUnsignedInt(F32, I64) => self.float_to_unsigned_int_f32_i64,
            Intrinsic::FloatToUnsignedInt(F64, I32) => self.float_to_unsigned_int_f64_i32,
            Intrinsic::FloatToUnsignedInt(F64, I64) => self.float_to_unsigned_int_f64_i64,
            Intrinsic::DebugEnterFunction => self
                .debug_enter_function
                .expect("debug_enter_function intrinsic invoked but host supplied no address"),
            Intrinsic::DebugExitFunction => self
                .debug_exit_function
                .expect("debug_exit_function intrinsic invoked but host supplied no address"),
            _ => unreachable!("non-exhaustive (src, dst) combination for float conversion intrinsic"),
        }
    }
}
