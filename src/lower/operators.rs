//! Every operator family not handled by `control_flow.rs` (spec §4.5):
//! polymorphic, calls, locals/globals, memory size, constants, loads/stores,
//! integer and floating-point arithmetic, and conversions.

use std::hash::{Hash, Hasher};

use cranelift_codegen::ir::{
    self,
    condcodes::{FloatCC, IntCC},
    InstBuilder, MemFlags,
};
use cranelift_frontend::FunctionBuilder;
use rustc_hash::FxHasher;

use crate::decode::{MemArg, Operator};
use crate::error::LowerError;
use crate::facade::{IrFacade, Literal, MemArgHint};
use crate::intrinsics::Intrinsic;
use crate::opcode::Opcode;
use crate::types::{FunctionType, ValueType};

use super::FunctionLowerer;

/// A stable per-signature tag used as the `call_indirect` type check (spec
/// §4.5, §6 "a constant pointer identifying the expected type `T`"). The
/// original identifies a type by the address of a process-wide type
/// descriptor; this crate has no such descriptor table, so it derives the
/// same kind of fixed, signature-determined constant directly from the
/// function type with the hashing this crate already depends on for its
/// block/label maps (`SPEC_FULL.md` §2.1).
fn type_tag(func_type: &FunctionType) -> i64 {
    let mut hasher = FxHasher::default();
    func_type.params.hash(&mut hasher);
    func_type.result.value_type().hash(&mut hasher);
    hasher.finish() as i64
}

impl<'ctx, 'm> FunctionLowerer<'ctx, 'm> {
    /// Dispatch for every operator `control_flow.rs` doesn't own.
    pub(super) fn lower_non_control_operator(
        &mut self,
        builder: &mut FunctionBuilder,
        op: &Operator,
    ) -> Result<(), LowerError> {
        match op {
            Operator::Simple(Opcode::Drop) => self.lower_drop(),
            Operator::Simple(Opcode::Select) => self.lower_select(builder),
            Operator::Simple(Opcode::MemorySize) => self.lower_memory_size(builder),
            Operator::Simple(Opcode::MemoryGrow) => self.lower_memory_grow(builder),
            Operator::Simple(opcode) => self.lower_simple(builder, *opcode),
            Operator::Call(index) => self.lower_call(builder, *index),
            Operator::CallIndirect(type_index) => self.lower_call_indirect(builder, *type_index),
            Operator::Local(opcode, index) => self.lower_local(builder, *opcode, *index),
            Operator::Global(opcode, index) => self.lower_global(builder, *opcode, *index),
            Operator::MemAccess(opcode, memarg) => self.lower_mem_access(builder, *opcode, *memarg),
            Operator::I32Const(v) => self.lower_const_i32(builder, *v),
            Operator::I64Const(v) => self.lower_const_i64(builder, *v),
            Operator::F32Const(v) => self.lower_const_f32(builder, *v),
            Operator::F64Const(v) => self.lower_const_f64(builder, *v),
            other => Err(LowerError::UnsupportedOperator(format!("{other:?}"))),
        }
    }

    // ---- Polymorphic -------------------------------------------------

    fn lower_drop(&mut self) -> Result<(), LowerError> {
        self.state.pop()?;
        Ok(())
    }

    /// `select` pops `(cond, false_val, true_val)` and pushes
    /// `cond != 0 ? true_val : false_val` (spec §4.5 "Polymorphic").
    fn lower_select(&mut self, builder: &mut FunctionBuilder) -> Result<(), LowerError> {
        let (cond, _) = self.state.pop()?;
        let (false_val, ty) = self.state.pop()?;
        let (true_val, _) = self.state.pop()?;
        let mut facade = IrFacade::new(builder);
        let result = facade.ins().select(cond, true_val, false_val);
        self.state.push(result, ty);
        Ok(())
    }

    // ---- Calls ---------------------------------------------------------

    /// `call f`: resolve to a precomputed code pointer (import or sibling
    /// defined function, spec §4.2), emit the call through the same
    /// constant-pointer `call_indirect` primitive `emit_trap_call` uses for
    /// intrinsics (spec §4.1: there is deliberately no `cranelift-module`
    /// linkage step here).
    fn lower_call(&mut self, builder: &mut FunctionBuilder, func_index: u32) -> Result<(), LowerError> {
        let func_type = self.ctx.function_type(func_index).clone();
        let args = self.state.pop_n(func_type.params.len())?;
        let arg_values: Vec<ir::Value> = args.iter().map(|(v, _)| *v).collect();

        let ptr = self.ctx.resolve_function_pointer(func_index);
        let sig = self.ctx.signature_for(&func_type);
        let pointer_type = self.ctx.pointer_type();
        let mut facade = IrFacade::new(builder);
        let result = facade.call_intrinsic(pointer_type, ptr, sig, &arg_values);

        if let Some(result_type) = func_type.result.value_type() {
            self.state.push(
                result.expect("call to a function with a non-none result produced no value"),
                result_type,
            );
        }
        Ok(())
    }

    /// `call_indirect T`: bounds-check against the table's element count,
    /// verify the slot's type tag against `T`, then dispatch through the
    /// slot's code pointer (spec §4.5 "Calls", §6 "Table memory layout").
    fn lower_call_indirect(
        &mut self,
        builder: &mut FunctionBuilder,
        type_index: u32,
    ) -> Result<(), LowerError> {
        let (raw_index, _) = self.state.pop()?;
        let func_type = self.ctx.module.types[type_index as usize].clone();
        let args = self.state.pop_n(func_type.params.len())?;
        let arg_values: Vec<ir::Value> = args.iter().map(|(v, _)| *v).collect();

        let pointer_type = self.ctx.pointer_type();
        let end_offset = self
            .ctx
            .default_table_end_offset()
            .expect("call_indirect lowered against a module with no default table");
        let slots_base = self
            .ctx
            .default_table_slots_base()
            .expect("call_indirect lowered against a module with no default table");
        let table_handle = self
            .ctx
            .default_table_handle()
            .expect("call_indirect lowered against a module with no default table");

        let mut facade = IrFacade::new(builder);
        let index = if pointer_type != ir::types::I32 {
            facade.ins().uextend(pointer_type, raw_index)
        } else {
            raw_index
        };
        let bound = facade.ins().iconst(pointer_type, end_offset as i64);
        let in_bounds = facade.ins().icmp(IntCC::UnsignedLessThan, index, bound);

        let oob_block = facade.create_block();
        let dispatch_block = facade.create_block();
        facade.mark_cold(oob_block);
        facade.brif(in_bounds, dispatch_block, &[], oob_block, &[]);
        facade.seal_block(oob_block);
        facade.seal_block(dispatch_block);

        facade.switch_to_block(oob_block);
        self.emit_trap_call(builder, Intrinsic::IndirectCallOob, &[]);

        let mut facade = IrFacade::new(builder);
        facade.switch_to_block(dispatch_block);

        // slot_addr = table_base + index * 2W (spec §6 "Table memory layout").
        let element_size = 2 * pointer_type.bytes() as i64;
        let base = facade.ins().iconst(pointer_type, slots_base as i64);
        let byte_offset = facade.ins().imul_imm(index, element_size);
        let slot_addr = facade.ins().iadd(base, byte_offset);

        let hint = MemArgHint::sandboxed(pointer_type.bytes().trailing_zeros() as u8);
        let flags = hint.mem_flags();
        let observed_type_tag = facade.load(pointer_type, hint, slot_addr, 0);
        let expected_const = facade.ins().iconst(pointer_type, type_tag(&func_type));
        let tags_match = facade.ins().icmp(IntCC::Equal, observed_type_tag, expected_const);

        let mismatch_block = facade.create_block();
        let call_block = facade.create_block();
        facade.mark_cold(mismatch_block);
        facade.brif(tags_match, call_block, &[], mismatch_block, &[]);
        facade.seal_block(mismatch_block);
        facade.seal_block(call_block);

        facade.switch_to_block(mismatch_block);
        let observed_tag_i64 = if pointer_type != ir::types::I64 {
            facade.ins().uextend(ir::types::I64, observed_type_tag)
        } else {
            observed_type_tag
        };
        let index_i32 = if pointer_type != ir::types::I32 {
            facade.ins().ireduce(ir::types::I32, index)
        } else {
            index
        };
        let handle_const = facade.ins().iconst(ir::types::I64, table_handle);
        let mismatch_args = [index_i32, observed_tag_i64, handle_const];
        self.emit_trap_call(builder, Intrinsic::IndirectCallSignatureMismatch, &mismatch_args);

        let mut facade = IrFacade::new(builder);
        facade.switch_to_block(call_block);
        let code_ptr = facade
            .ins()
            .load(pointer_type, flags, slot_addr, pointer_type.bytes() as i32);
        let sig = self.ctx.signature_for(&func_type);
        let sig_ref = facade.builder.import_signature(sig);
        let call = facade.call_indirect(sig_ref, code_ptr, &arg_values);
        if let Some(result_type) = func_type.result.value_type() {
            let result = facade.inst_results(call);
            self.state.push(result, result_type);
        }
        Ok(())
    }

    // ---- Locals / globals ------------------------------------------------

    fn lower_local(
        &mut self,
        builder: &mut FunctionBuilder,
        opcode: Opcode,
        index: u32,
    ) -> Result<(), LowerError> {
        let var = self.locals[index as usize];
        let ty = self.local_types[index as usize];
        match opcode {
            Opcode::LocalGet => {
                let value = builder.use_var(var);
                self.state.push(value, ty);
            }
            Opcode::LocalSet => {
                let (value, _) = self.state.pop()?;
                builder.def_var(var, value);
            }
            Opcode::LocalTee => {
                let (value, _) = self.state.top()?;
                builder.def_var(var, value);
            }
            _ => unreachable!("lower_local called with non-local opcode"),
        }
        Ok(())
    }

    fn lower_global(
        &mut self,
        builder: &mut FunctionBuilder,
        opcode: Opcode,
        index: u32,
    ) -> Result<(), LowerError> {
        let address = self.ctx.resolve_global_address(index);
        let pointer_type = self.ctx.pointer_type();
        let value_type = self.ctx.module.imported_globals[index as usize].value_type;
        // Global storage is not part of the sandboxed linear memory; it is
        // resolved to a fixed host-owned address the same way import
        // function pointers are, so its accesses still go through the
        // volatile/aligned memory-op convention this crate uses everywhere
        // (spec §4.5, §9 third Open Question) without going through
        // `coerce_address`'s masking (there is nothing to mask against).
        let align_log2 = (value_type.bit_width() / 8).trailing_zeros() as u8;
        match opcode {
            Opcode::GlobalGet => {
                let mut facade = IrFacade::new(builder);
                let addr = facade.ins().iconst(pointer_type, address as i64);
                let hint = MemArgHint::sandboxed(align_log2);
                let value = facade.load(value_type.to_cranelift(), hint, addr, 0);
                self.state.push(value, value_type);
            }
            Opcode::GlobalSet => {
                let (value, _) = self.state.pop()?;
                let mut facade = IrFacade::new(builder);
                let addr = facade.ins().iconst(pointer_type, address as i64);
                let hint = MemArgHint::sandboxed(align_log2);
                facade.store(hint, value, addr, 0);
            }
            _ => unreachable!("lower_global called with non-global opcode"),
        }
        Ok(())
    }

    // ---- Memory size -----------------------------------------------------

    fn lower_memory_size(&mut self, builder: &mut FunctionBuilder) -> Result<(), LowerError> {
        let handle = self
            .ctx
            .default_memory_base()
            .expect("memory_size lowered against a module with no default memory") as i64;
        let (ptr, sig) = self.ctx.intrinsic(Intrinsic::CurrentMemory);
        let pointer_type = self.ctx.pointer_type();
        let mut facade = IrFacade::new(builder);
        let handle_value = facade.ins().iconst(ir::types::I64, handle);
        let result = facade
            .call_intrinsic(pointer_type, ptr, sig, &[handle_value])
            .expect("current_memory intrinsic must produce a result");
        self.state.push(result, ValueType::I32);
        Ok(())
    }

    fn lower_memory_grow(&mut self, builder: &mut FunctionBuilder) -> Result<(), LowerError> {
        let (delta, _) = self.state.pop()?;
        let handle = self
            .ctx
            .default_memory_base()
            .expect("memory_grow lowered against a module with no default memory") as i64;
        let (ptr, sig) = self.ctx.intrinsic(Intrinsic::GrowMemory);
        let pointer_type = self.ctx.pointer_type();
        let mut facade = IrFacade::new(builder);
        let handle_value = facade.ins().iconst(ir::types::I64, handle);
        let result = facade
            .call_intrinsic(pointer_type, ptr, sig, &[delta, handle_value])
            .expect("grow_memory intrinsic must produce a result");
        self.state.push(result, ValueType::I32);
        Ok(())
    }

    // ---- Constants ---------------------------------------------------------

    fn lower_const_i32(&mut self, builder: &mut FunctionBuilder, v: i32) -> Result<(), LowerError> {
        let mut facade = IrFacade::new(builder);
        let value = facade.literal(ValueType::I32, Literal::I32(v));
        self.state.push(value, ValueType::I32);
        Ok(())
    }

    fn lower_const_i64(&mut self, builder: &mut FunctionBuilder, v: i64) -> Result<(), LowerError> {
        let mut facade = IrFacade::new(builder);
        let value = facade.literal(ValueType::I64, Literal::I64(v));
        self.state.push(value, ValueType::I64);
        Ok(())
    }

    fn lower_const_f32(&mut self, builder: &mut FunctionBuilder, v: f32) -> Result<(), LowerError> {
        let mut facade = IrFacade::new(builder);
        let value = facade.literal(ValueType::F32, Literal::F32(v));
        self.state.push(value, ValueType::F32);
        Ok(())
    }

    fn lower_const_f64(&mut self, builder: &mut FunctionBuilder, v: f64) -> Result<(), LowerError> {
        let mut facade = IrFacade::new(builder);
        let value = facade.literal(ValueType::F64, Literal::F64(v));
        self.state.push(value, ValueType::F64);
        Ok(())
    }

    // ---- Loads / stores ----------------------------------------------------

    /// `coerce_address` (spec §4.5 "Loads/Stores"): zero-extend the 32-bit
    /// byte index (never sign-extend — that would hand the backend a
    /// negative offset and escape the sandbox), add the static immediate
    /// offset, mask with the memory's address mask, and add the memory base.
    fn coerce_address(&self, facade: &mut IrFacade, raw_index: ir::Value, offset: u32) -> ir::Value {
        let pointer_type = self.ctx.pointer_type();
        let base = self
            .ctx
            .default_memory_base()
            .expect("memory operator lowered against a module with no default memory");
        let mask = self
            .ctx
            .default_memory_mask()
            .expect("memory operator lowered against a module with no default memory");

        let widened = if pointer_type != ir::types::I32 {
            facade.ins().uextend(pointer_type, raw_index)
        } else {
            raw_index
        };
        let offset_value = facade.ins().iconst(pointer_type, offset as i64);
        let with_offset = facade.ins().iadd(widened, offset_value);
        let mask_value = facade.ins().iconst(pointer_type, mask as i64);
        let masked = facade.ins().band(with_offset, mask_value);
        let base_value = facade.ins().iconst(pointer_type, base as i64);
        facade.ins().iadd(masked, base_value)
    }

    fn lower_mem_access(
        &mut self,
        builder: &mut FunctionBuilder,
        opcode: Opcode,
        memarg: MemArg,
    ) -> Result<(), LowerError> {
        use Opcode::*;
        let hint = MemArgHint::sandboxed(memarg.align_log2);
        match opcode {
            I32Store | I64Store | F32Store | F64Store | I32Store8 | I32Store16 | I64Store8
            | I64Store16 | I64Store32 => {
                let (value, _) = self.state.pop()?;
                let (raw_index, _) = self.state.pop()?;
                let mut facade = IrFacade::new(builder);
                let addr = self.coerce_address(&mut facade, raw_index, memarg.offset);
                let flags: MemFlags = hint.mem_flags();
                match opcode {
                    I32Store | I64Store | F32Store | F64Store => facade.store(hint, value, addr, 0),
                    I32Store8 | I64Store8 => {
                        facade.ins().istore8(flags, value, addr, 0);
                    }
                    I32Store16 | I64Store16 => {
                        facade.ins().istore16(flags, value, addr, 0);
                    }
                    I64Store32 => {
                        facade.ins().istore32(flags, value, addr, 0);
                    }
                    _ => unreachable!(),
                }
                Ok(())
            }
            I32Load | I64Load | F32Load | F64Load | I32Load8S | I32Load8U | I32Load16S
            | I32Load16U | I64Load8S | I64Load8U | I64Load16S | I64Load16U | I64Load32S
            | I64Load32U => {
                let (raw_index, _) = self.state.pop()?;
                let mut facade = IrFacade::new(builder);
                let addr = self.coerce_address(&mut facade, raw_index, memarg.offset);
                let flags: MemFlags = hint.mem_flags();
                let (value, ty) = match opcode {
                    I32Load => (facade.load(ir::types::I32, hint, addr, 0), ValueType::I32),
                    I64Load => (facade.load(ir::types::I64, hint, addr, 0), ValueType::I64),
                    F32Load => (facade.load(ir::types::F32, hint, addr, 0), ValueType::F32),
                    F64Load => (facade.load(ir::types::F64, hint, addr, 0), ValueType::F64),
                    I32Load8S => (facade.ins().sload8(ir::types::I32, flags, addr, 0), ValueType::I32),
                    I32Load8U => (facade.ins().uload8(ir::types::I32, flags, addr, 0), ValueType::I32),
                    I32Load16S => (facade.ins().sload16(ir::types::I32, flags, addr, 0), ValueType::I32),
                    I32Load16U => (facade.ins().uload16(ir::types::I32, flags, addr, 0), ValueType::I32),
                    I64Load8S => (facade.ins().sload8(ir::types::I64, flags, addr, 0), ValueType::I64),
                    I64Load8U => (facade.ins().uload8(ir::types::I64, flags, addr, 0), ValueType::I64),
                    I64Load16S => (facade.ins().sload16(ir::types::I64, flags, addr, 0), ValueType::I64),
                    I64Load16U => (facade.ins().uload16(ir::types::I64, flags, addr, 0), ValueType::I64),
                    I64Load32S => (facade.ins().sload32(flags, addr, 0), ValueType::I64),
                    I64Load32U => (facade.ins().uload32(flags, addr, 0), ValueType::I64),
                    _ => unreachable!(),
                };
                self.state.push(value, ty);
                Ok(())
            }
            _ => Err(LowerError::UnsupportedOperator(format!("{opcode:?}"))),
        }
    }

    // ---- Simple (arithmetic / comparison / conversion) opcodes ------------

    fn lower_simple(&mut self, builder: &mut FunctionBuilder, opcode: Opcode) -> Result<(), LowerError> {
        use Opcode::*;
        match opcode {
            I32Eqz | I64Eqz => self.lower_eqz(builder),

            I32Eq | I32Ne | I32LtS | I32LtU | I32GtS | I32GtU | I32LeS | I32LeU | I32GeS | I32GeU
            | I64Eq | I64Ne | I64LtS | I64LtU | I64GtS | I64GtU | I64LeS | I64LeU | I64GeS | I64GeU => {
                self.lower_icmp(builder, opcode)
            }

            F32Eq | F32Ne | F32Lt | F32Gt | F32Le | F32Ge | F64Eq | F64Ne | F64Lt | F64Gt | F64Le
            | F64Ge => self.lower_fcmp(builder, opcode),

            I32Clz | I64Clz | I32Ctz | I64Ctz | I32Popcnt | I64Popcnt => {
                self.lower_unary_int(builder, opcode)
            }

            I32Add | I32Sub | I32Mul | I32And | I32Or | I32Xor | I64Add | I64Sub | I64Mul | I64And
            | I64Or | I64Xor => self.lower_int_binary(builder, opcode),

            I32DivS | I32DivU | I32RemU | I64DivS | I64DivU | I64RemU => {
                self.lower_div_rem(builder, opcode)
            }
            I32RemS | I64RemS => self.lower_rem_s(builder, opcode),

            I32Shl | I32ShrS | I32ShrU | I64Shl | I64ShrS | I64ShrU => {
                self.lower_shift(builder, opcode)
            }
            I32Rotl | I32Rotr | I64Rotl | I64Rotr => self.lower_rotate(builder, opcode),

            F32Add | F32Sub | F32Mul | F32Div | F32Copysign | F64Add | F64Sub | F64Mul | F64Div
            | F64Copysign => self.lower_float_binary(builder, opcode),

            F32Neg | F64Neg | F32Abs | F64Abs | F32Sqrt | F64Sqrt => {
                self.lower_float_unary(builder, opcode)
            }

            F32Min | F64Min | F32Max | F64Max | F32Ceil | F64Ceil | F32Floor | F64Floor
            | F32Trunc | F64Trunc | F32Nearest | F64Nearest => {
                self.lower_float_host_intrinsic(builder, opcode)
            }

            I32WrapI64 => self.lower_wrap(builder),
            I64ExtendSI32 | I64ExtendUI32 => self.lower_extend(builder, opcode),
            F32DemoteF64 => self.lower_demote(builder),
            F64PromoteF32 => self.lower_promote(builder),
            I32ReinterpretF32 | I64ReinterpretF64 | F32ReinterpretI32 | F64ReinterpretI64 => {
                self.lower_reinterpret(builder, opcode)
            }
            F32ConvertSI32 | F32ConvertUI32 | F32ConvertSI64 | F32ConvertUI64 | F64ConvertSI32
            | F64ConvertUI32 | F64ConvertSI64 | F64ConvertUI64 => self.lower_convert(builder, opcode),
            I32TruncSF32 | I32TruncUF32 | I32TruncSF64 | I32TruncUF64 | I64TruncSF32
            | I64TruncUF32 | I64TruncSF64 | I64TruncUF64 => self.lower_trunc_to_int(builder, opcode),

            other => Err(LowerError::UnsupportedOperator(format!("{other:?}"))),
        }
    }

    fn lower_eqz(&mut self, builder: &mut FunctionBuilder) -> Result<(), LowerError> {
        let (value, ty) = self.state.pop()?;
        let mut facade = IrFacade::new(builder);
        let zero = facade.ins().iconst(ty.to_cranelift(), 0);
        let result = facade.icmp_i32(IntCC::Equal, value, zero);
        self.state.push(result, ValueType::I32);
        Ok(())
    }

    fn lower_icmp(&mut self, builder: &mut FunctionBuilder, opcode: Opcode) -> Result<(), LowerError> {
        use Opcode::*;
        let (rhs, _) = self.state.pop()?;
        let (lhs, _) = self.state.pop()?;
        let cc = match opcode {
            I32Eq | I64Eq => IntCC::Equal,
            I32Ne | I64Ne => IntCC::NotEqual,
            I32LtS | I64LtS => IntCC::SignedLessThan,
            I32LtU | I64LtU => IntCC::UnsignedLessThan,
            I32GtS | I64GtS => IntCC::SignedGreaterThan,
            I32GtU | I64GtU => IntCC::UnsignedGreaterThan,
            I32LeS | I64LeS => IntCC::SignedLessThanOrEqual,
            I32LeU | I64LeU => IntCC::UnsignedLessThanOrEqual,
            I32GeS | I64GeS => IntCC::SignedGreaterThanOrEqual,
            I32GeU | I64GeU => IntCC::UnsignedGreaterThanOrEqual,
            _ => unreachable!("lower_icmp called with a non-comparison opcode"),
        };
        let mut facade = IrFacade::new(builder);
        let result = facade.icmp_i32(cc, lhs, rhs);
        self.state.push(result, ValueType::I32);
        Ok(())
    }

    /// `ne` relies on Cranelift's `FloatCC::NotEqual` already meaning
    /// "unordered or not equal" (true whenever either operand is NaN), which
    /// is exactly the bytecode's `ne` semantics (spec §4.5 "Floating-point");
    /// every other comparison is the corresponding ordered Cranelift code.
    fn lower_fcmp(&mut self, builder: &mut FunctionBuilder, opcode: Opcode) -> Result<(), LowerError> {
        use Opcode::*;
        let (rhs, _) = self.state.pop()?;
        let (lhs, _) = self.state.pop()?;
        let cc = match opcode {
            F32Eq | F64Eq => FloatCC::Equal,
            F32Ne | F64Ne => FloatCC::NotEqual,
            F32Lt | F64Lt => FloatCC::LessThan,
            F32Gt | F64Gt => FloatCC::GreaterThan,
            F32Le | F64Le => FloatCC::LessThanOrEqual,
            F32Ge | F64Ge => FloatCC::GreaterThanOrEqual,
            _ => unreachable!("lower_fcmp called with a non-comparison opcode"),
        };
        let mut facade = IrFacade::new(builder);
        let bit = facade.ins().fcmp(cc, lhs, rhs);
        let result = facade.ins().uextend(ir::types::I32, bit);
        self.state.push(result, ValueType::I32);
        Ok(())
    }

    /// `clz`/`ctz`/`popcnt`: Cranelift's own `clz`/`ctz` are already defined
    /// at a zero input (returning the bit width), matching the bytecode's
    /// "is-zero-undefined flag set to false" requirement (spec §4.5) without
    /// needing a guard.
    fn lower_unary_int(&mut self, builder: &mut FunctionBuilder, opcode: Opcode) -> Result<(), LowerError> {
        use Opcode::*;
        let (value, ty) = self.state.pop()?;
        let mut facade = IrFacade::new(builder);
        let result = match opcode {
            I32Clz | I64Clz => facade.ins().clz(value),
            I32Ctz | I64Ctz => facade.ins().ctz(value),
            I32Popcnt | I64Popcnt => facade.ins().popcnt(value),
            _ => unreachable!("lower_unary_int called with an unexpected opcode"),
        };
        self.state.push(result, ty);
        Ok(())
    }

    fn lower_int_binary(&mut self, builder: &mut FunctionBuilder, opcode: Opcode) -> Result<(), LowerError> {
        use Opcode::*;
        let (rhs, _) = self.state.pop()?;
        let (lhs, ty) = self.state.pop()?;
        let mut facade = IrFacade::new(builder);
        let result = match opcode {
            I32Add | I64Add => facade.ins().iadd(lhs, rhs),
            I32Sub | I64Sub => facade.ins().isub(lhs, rhs),
            I32Mul | I64Mul => facade.ins().imul(lhs, rhs),
            I32And | I64And => facade.ins().band(lhs, rhs),
            I32Or | I64Or => facade.ins().bor(lhs, rhs),
            I32Xor | I64Xor => facade.ins().bxor(lhs, rhs),
            _ => unreachable!("lower_int_binary called with an unexpected opcode"),
        };
        self.state.push(result, ty);
        Ok(())
    }

    /// Shared zero-divisor guard for every `div_*`/`rem_*` (spec §4.5, §8):
    /// branch to a cold trap block when `rhs == 0`.
    fn emit_zero_divisor_trap(&mut self, builder: &mut FunctionBuilder, ty: ValueType, rhs: ir::Value) {
        let mut facade = IrFacade::new(builder);
        let zero = facade.ins().iconst(ty.to_cranelift(), 0);
        let is_zero = facade.ins().icmp(IntCC::Equal, rhs, zero);
        let trap_block = facade.create_block();
        let ok_block = facade.create_block();
        facade.mark_cold(trap_block);
        facade.brif(is_zero, trap_block, &[], ok_block, &[]);
        facade.seal_block(trap_block);
        facade.seal_block(ok_block);
        facade.switch_to_block(trap_block);
        self.emit_trap_call(builder, Intrinsic::DivideByZeroTrap, &[]);

        let mut facade = IrFacade::new(builder);
        facade.switch_to_block(ok_block);
    }

    fn lower_div_rem(&mut self, builder: &mut FunctionBuilder, opcode: Opcode) -> Result<(), LowerError> {
        use Opcode::*;
        let (rhs, _) = self.state.pop()?;
        let (lhs, ty) = self.state.pop()?;
        self.emit_zero_divisor_trap(builder, ty, rhs);
        let mut facade = IrFacade::new(builder);
        let result = match opcode {
            I32DivS | I64DivS => facade.ins().sdiv(lhs, rhs),
            I32DivU | I64DivU => facade.ins().udiv(lhs, rhs),
            I32RemU | I64RemU => facade.ins().urem(lhs, rhs),
            _ => unreachable!("lower_div_rem called with an unexpected opcode"),
        };
        self.state.push(result, ty);
        Ok(())
    }

    /// `rem_s`: zero-divisor trap plus the `INT_MIN % -1` guard (spec §4.5,
    /// §8 concrete scenario 4) — the backend's signed-remainder instruction
    /// has undefined behavior for that pair even though the bytecode defines
    /// the result as `0`.
    fn lower_rem_s(&mut self, builder: &mut FunctionBuilder, _opcode: Opcode) -> Result<(), LowerError> {
        let (rhs, _) = self.state.pop()?;
        let (lhs, ty) = self.state.pop()?;
        self.emit_zero_divisor_trap(builder, ty, rhs);

        let cl_ty = ty.to_cranelift();
        let int_min = match ty {
            ValueType::I32 => i32::MIN as i64,
            ValueType::I64 => i64::MIN,
            _ => unreachable!("rem_s called with a non-integer type"),
        };

        let mut facade = IrFacade::new(builder);
        let int_min_const = facade.ins().iconst(cl_ty, int_min);
        let neg_one = facade.ins().iconst(cl_ty, -1);
        let is_int_min = facade.ins().icmp(IntCC::Equal, lhs, int_min_const);
        let is_neg_one = facade.ins().icmp(IntCC::Equal, rhs, neg_one);
        let is_overflow = facade.ins().band(is_int_min, is_neg_one);

        let overflow_block = facade.create_block();
        let normal_block = facade.create_block();
        let join_block = facade.create_block();
        let join = facade.create_join(join_block, ty);
        facade.mark_cold(overflow_block);
        facade.brif(is_overflow, overflow_block, &[], normal_block, &[]);
        facade.seal_block(overflow_block);
        facade.seal_block(normal_block);

        facade.switch_to_block(overflow_block);
        let zero = facade.ins().iconst(cl_ty, 0);
        facade.jump(join_block, &[zero]);
        join.record_incoming();

        facade.switch_to_block(normal_block);
        let srem_result = facade.ins().srem(lhs, rhs);
        facade.jump(join_block, &[srem_result]);
        join.record_incoming();

        facade.seal_block(join_block);
        facade.switch_to_block(join_block);
        let result = builder.block_params(join_block)[0];
        self.state.push(result, ty);
        Ok(())
    }

    /// Shifts mask the count to `bitwidth - 1` before emitting (spec §4.5,
    /// §8): the backend's native shifts are undefined for counts at or above
    /// the bit width, while the bytecode defines wrapping.
    fn lower_shift(&mut self, builder: &mut FunctionBuilder, opcode: Opcode) -> Result<(), LowerError> {
        use Opcode::*;
        let (rhs, _) = self.state.pop()?;
        let (lhs, ty) = self.state.pop()?;
        let mut facade = IrFacade::new(builder);
        let mask = facade.ins().iconst(ty.to_cranelift(), (ty.bit_width() - 1) as i64);
        let masked_rhs = facade.ins().band(rhs, mask);
        let result = match opcode {
            I32Shl | I64Shl => facade.ins().ishl(lhs, masked_rhs),
            I32ShrS | I64ShrS => facade.ins().sshr(lhs, masked_rhs),
            I32ShrU | I64ShrU => facade.ins().ushr(lhs, masked_rhs),
            _ => unreachable!("lower_shift called with an unexpected opcode"),
        };
        self.state.push(result, ty);
        Ok(())
    }

    /// Cranelift's native `rotl`/`rotr` already wrap the shift count modulo
    /// the bit width; the explicit mask mirrors the uniform guard every
    /// other shift-family opcode gets rather than relying on that.
    fn lower_rotate(&mut self, builder: &mut FunctionBuilder, opcode: Opcode) -> Result<(), LowerError> {
        use Opcode::*;
        let (rhs, _) = self.state.pop()?;
        let (lhs, ty) = self.state.pop()?;
        let mut facade = IrFacade::new(builder);
        let mask = facade.ins().iconst(ty.to_cranelift(), (ty.bit_width() - 1) as i64);
        let count = facade.ins().band(rhs, mask);
        let result = match opcode {
            I32Rotl | I64Rotl => facade.ins().rotl(lhs, count),
            I32Rotr | I64Rotr => facade.ins().rotr(lhs, count),
            _ => unreachable!("lower_rotate called with an unexpected opcode"),
        };
        self.state.push(result, ty);
        Ok(())
    }

    fn lower_float_binary(&mut self, builder: &mut FunctionBuilder, opcode: Opcode) -> Result<(), LowerError> {
        use Opcode::*;
        let (rhs, _) = self.state.pop()?;
        let (lhs, ty) = self.state.pop()?;
        let mut facade = IrFacade::new(builder);
        let result = match opcode {
            F32Add | F64Add => facade.ins().fadd(lhs, rhs),
            F32Sub | F64Sub => facade.ins().fsub(lhs, rhs),
            F32Mul | F64Mul => facade.ins().fmul(lhs, rhs),
            F32Div | F64Div => facade.ins().fdiv(lhs, rhs),
            F32Copysign | F64Copysign => facade.ins().fcopysign(lhs, rhs),
            _ => unreachable!("lower_float_binary called with an unexpected opcode"),
        };
        self.state.push(result, ty);
        Ok(())
    }

    fn lower_float_unary(&mut self, builder: &mut FunctionBuilder, opcode: Opcode) -> Result<(), LowerError> {
        use Opcode::*;
        let (value, ty) = self.state.pop()?;
        let mut facade = IrFacade::new(builder);
        let result = match opcode {
            F32Neg | F64Neg => facade.ins().fneg(value),
            F32Abs | F64Abs => facade.ins().fabs(value),
            F32Sqrt | F64Sqrt => facade.ins().sqrt(value),
            _ => unreachable!("lower_float_unary called with an unexpected opcode"),
        };
        self.state.push(result, ty);
        Ok(())
    }

    /// `min`/`max`/`ceil`/`floor`/`trunc`/`nearest` route through host
    /// intrinsics: the bytecode's NaN-propagation and rounding semantics
    /// differ from the backend's native float primitives (spec §4.5).
    fn lower_float_host_intrinsic(
        &mut self,
        builder: &mut FunctionBuilder,
        opcode: Opcode,
    ) -> Result<(), LowerError> {
        use Opcode::*;
        let is_binary = matches!(opcode, F32Min | F64Min | F32Max | F64Max);
        let (args, ty) = if is_binary {
            let (rhs, ty) = self.state.pop()?;
            let (lhs, _) = self.state.pop()?;
            (vec![lhs, rhs], ty)
        } else {
            let (value, ty) = self.state.pop()?;
            (vec![value], ty)
        };
        let intrinsic = match opcode {
            F32Min => Intrinsic::FloatMin(ValueType::F32),
            F64Min => Intrinsic::FloatMin(ValueType::F64),
            F32Max => Intrinsic::FloatMax(ValueType::F32),
            F64Max => Intrinsic::FloatMax(ValueType::F64),
            F32Ceil => Intrinsic::FloatCeil(ValueType::F32),
            F64Ceil => Intrinsic::FloatCeil(ValueType::F64),
            F32Floor => Intrinsic::FloatFloor(ValueType::F32),
            F64Floor => Intrinsic::FloatFloor(ValueType::F64),
            F32Trunc => Intrinsic::FloatTrunc(ValueType::F32),
            F64Trunc => Intrinsic::FloatTrunc(ValueType::F64),
            F32Nearest => Intrinsic::FloatNearest(ValueType::F32),
            F64Nearest => Intrinsic::FloatNearest(ValueType::F64),
            _ => unreachable!("lower_float_host_intrinsic called with an unexpected opcode"),
        };
        let (ptr, sig) = self.ctx.intrinsic(intrinsic);
        let pointer_type = self.ctx.pointer_type();
        let mut facade = IrFacade::new(builder);
        let result = facade
            .call_intrinsic(pointer_type, ptr, sig, &args)
            .expect("value-returning float intrinsic must produce a result");
        self.state.push(result, ty);
        Ok(())
    }

    // ---- Conversions ---------------------------------------------------

    fn lower_wrap(&mut self, builder: &mut FunctionBuilder) -> Result<(), LowerError> {
        let (value, _) = self.state.pop()?;
        let mut facade = IrFacade::new(builder);
        let result = facade.ins().ireduce(ir::types::I32, value);
        self.state.push(result, ValueType::I32);
        Ok(())
    }

    fn lower_extend(&mut self, builder: &mut FunctionBuilder, opcode: Opcode) -> Result<(), LowerError> {
        let (value, _) = self.state.pop()?;
        let mut facade = IrFacade::new(builder);
        let result = match opcode {
            Opcode::I64ExtendSI32 => facade.ins().sextend(ir::types::I64, value),
            Opcode::I64ExtendUI32 => facade.ins().uextend(ir::types::I64, value),
            _ => unreachable!("lower_extend called with an unexpected opcode"),
        };
        self.state.push(result, ValueType::I64);
        Ok(())
    }

    fn lower_demote(&mut self, builder: &mut FunctionBuilder) -> Result<(), LowerError> {
        let (value, _) = self.state.pop()?;
        let mut facade = IrFacade::new(builder);
        let result = facade.ins().fdemote(ir::types::F32, value);
        self.state.push(result, ValueType::F32);
        Ok(())
    }

    fn lower_promote(&mut self, builder: &mut FunctionBuilder) -> Result<(), LowerError> {
        let (value, _) = self.state.pop()?;
        let mut facade = IrFacade::new(builder);
        let result = facade.ins().fpromote(ir::types::F64, value);
        self.state.push(result, ValueType::F64);
        Ok(())
    }

    fn lower_reinterpret(&mut self, builder: &mut FunctionBuilder, opcode: Opcode) -> Result<(), LowerError> {
        use Opcode::*;
        let (value, _) = self.state.pop()?;
        let (target_type, result_ty) = match opcode {
            I32ReinterpretF32 => (ir::types::I32, ValueType::I32),
            I64ReinterpretF64 => (ir::types::I64, ValueType::I64),
            F32ReinterpretI32 => (ir::types::F32, ValueType::F32),
            F64ReinterpretI64 => (ir::types::F64, ValueType::F64),
            _ => unreachable!("lower_reinterpret called with an unexpected opcode"),
        };
        let mut facade = IrFacade::new(builder);
        let result = facade.ins().bitcast(target_type, MemFlags::new(), value);
        self.state.push(result, result_ty);
        Ok(())
    }

    fn lower_convert(&mut self, builder: &mut FunctionBuilder, opcode: Opcode) -> Result<(), LowerError> {
        use Opcode::*;
        let (value, _) = self.state.pop()?;
        let (target_type, result_ty, signed) = match opcode {
            F32ConvertSI32 => (ir::types::F32, ValueType::F32, true),
            F32ConvertUI32 => (ir::types::F32, ValueType::F32, false),
            F32ConvertSI64 => (ir::types::F32, ValueType::F32, true),
            F32ConvertUI64 => (ir::types::F32, ValueType::F32, false),
            F64ConvertSI32 => (ir::types::F64, ValueType::F64, true),
            F64ConvertUI32 => (ir::types::F64, ValueType::F64, false),
            F64ConvertSI64 => (ir::types::F64, ValueType::F64, true),
            F64ConvertUI64 => (ir::types::F64, ValueType::F64, false),
            _ => unreachable!("lower_convert called with an unexpected opcode"),
        };
        let mut facade = IrFacade::new(builder);
        let result = if signed {
            facade.ins().fcvt_from_sint(target_type, value)
        } else {
            facade.ins().fcvt_from_uint(target_type, value)
        };
        self.state.push(result, result_ty);
        Ok(())
    }

    /// `trunc_{s,u}` routes through a host intrinsic (spec §4.5): the
    /// backend's native float-to-int truncation has undefined behavior
    /// out of range, where the bytecode specifies a trap.
    fn lower_trunc_to_int(&mut self, builder: &mut FunctionBuilder, opcode: Opcode) -> Result<(), LowerError> {
        use Opcode::*;
        let (value, src_ty) = self.state.pop()?;
        let (dst_ty, signed) = match opcode {
            I32TruncSF32 | I32TruncSF64 => (ValueType::I32, true),
            I32TruncUF32 | I32TruncUF64 => (ValueType::I32, false),
            I64TruncSF32 | I64TruncSF64 => (ValueType::I64, true),
            I64TruncUF32 | I64TruncUF64 => (ValueType::I64, false),
            _ => unreachable!("lower_trunc_to_int called with an unexpected opcode"),
        };
        let intrinsic = if signed {
            Intrinsic::FloatToSignedInt(src_ty, dst_ty)
        } else {
            Intrinsic::FloatToUnsignedInt(src_ty, dst_ty)
        };
        let (ptr, sig) = self.ctx.intrinsic(intrinsic);
        let pointer_type = self.ctx.pointer_type();
        let mut facade = IrFacade::new(builder);
        let result = facade
            .call_intrinsic(pointer_type, ptr, sig, &[value])
            .expect("value-returning trunc-to-int intrinsic must produce a result");
        self.state.push(result, dst_ty);
        Ok(())
    }
}

