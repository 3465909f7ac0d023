//! Component A: the backend-IR facade.
//!
//! A thin typed wrapper over `cranelift_frontend::FunctionBuilder`,
//! grounded on the only two files in the retrieval pack that actually drive
//! `FunctionBuilder` end to end: `jit/backend/cranelift/lowering.rs` and
//! `jit/backend/cranelift/mod.rs`. Everything this crate's lowering visitor
//! (component E) needs from the backend funnels through here so that E
//! reads as "what to emit," not "how Cranelift's builder API happens to be
//! shaped."

use cranelift_codegen::ir::{self, condcodes::IntCC, InstBuilder, MemFlags};
use cranelift_frontend::{FuncInstBuilder, FunctionBuilder};

use crate::control::Join;
use crate::types::ValueType;

/// Byte alignment and whether the access must be treated as volatile (spec
/// §4.1, §4.5). Every load/store this crate emits sets `volatile = true`;
/// see the resolved Open Question in `SPEC_FULL.md` §9.
#[derive(Debug, Clone, Copy)]
pub struct MemArgHint {
    pub align_bytes: u8,
    pub volatile: bool,
}

impl MemArgHint {
    pub fn sandboxed(align_log2: u8) -> Self {
        Self {
            align_bytes: 1u8 << align_log2.min(3),
            volatile: true,
        }
    }

    pub(crate) fn mem_flags(self) -> MemFlags {
        // Cranelift's MemFlags defaults to "not trusted" (the pessimistic,
        // alias-everything setting), which is exactly the volatile-like
        // behavior spec §4.5 requires: nothing here ever calls
        // `.with_trusted()` to opt back into optimizer-visible aliasing.
        let mut flags = MemFlags::new();
        if self.align_bytes > 1 {
            flags.set_aligned();
        }
        flags
    }
}

/// The typed builder facade (component A).
pub struct IrFacade<'f, 'a> {
    pub builder: &'f mut FunctionBuilder<'a>,
}

impl<'f, 'a> IrFacade<'f, 'a> {
    pub fn new(builder: &'f mut FunctionBuilder<'a>) -> Self {
        Self { builder }
    }

    /// Direct access to Cranelift's instruction builder for the arithmetic,
    /// comparison, cast, and bit-intrinsic families spec §4.1 asks this
    /// facade to expose. Grounded on the teacher's own
    /// `jit/backend/cranelift/lowering.rs`, which calls `builder.ins()`
    /// directly rather than wrapping every single Cranelift opcode behind a
    /// bespoke method — this crate does the same for the ~80 arithmetic and
    /// conversion opcodes in `lower/operators.rs`, while still routing every
    /// control-flow, memory, and call primitive through the named methods
    /// above so that component E reads as "what to emit."
    pub fn ins(&mut self) -> FuncInstBuilder<'_, 'a> {
        self.builder.ins()
    }

    pub fn create_block(&mut self) -> ir::Block {
        self.builder.create_block()
    }

    pub fn switch_to_block(&mut self, block: ir::Block) {
        self.builder.switch_to_block(block);
    }

    pub fn seal_block(&mut self, block: ir::Block) {
        self.builder.seal_block(block);
    }

    /// Create a join node at `block`'s head for `ty`: an eagerly-appended
    /// Cranelift block parameter (see `control::Join` doc comment for why
    /// this differs from an LLVM-style incrementally-populated PHI).
    pub fn create_join(&mut self, block: ir::Block, ty: ValueType) -> Join {
        self.builder.append_block_param(block, ty.to_cranelift());
        Join::new(block, ty)
    }

    /// Mark a block as a cold (rarely-taken) path. Realizes spec §4.2's
    /// `likely_false`/`likely_true` branch-weight hints — this crate's
    /// Cranelift-idiomatic analogue of the original's LLVM branch-weight
    /// metadata is Cranelift's own block-coldness annotation, used on trap
    /// paths and the `INT_MIN / -1` guard's overflow arm.
    pub fn mark_cold(&mut self, block: ir::Block) {
        self.builder.set_cold_block(block);
    }

    pub fn iconst(&mut self, ty: ir::Type, value: i64) -> ir::Value {
        self.builder.ins().iconst(ty, value)
    }

    pub fn literal(&mut self, ty: ValueType, value: Literal) -> ir::Value {
        match (ty, value) {
            (ValueType::I32, Literal::I32(v)) => self.builder.ins().iconst(ir::types::I32, v as i64),
            (ValueType::I64, Literal::I64(v)) => self.builder.ins().iconst(ir::types::I64, v),
            (ValueType::F32, Literal::F32(v)) => self.builder.ins().f32const(v),
            (ValueType::F64, Literal::F64(v)) => self.builder.ins().f64const(v),
            _ => unreachable!("literal called with mismatched type/value"),
        }
    }

    /// Unconditional branch, forwarding `args` to the target's join (if any).
    pub fn jump(&mut self, block: ir::Block, args: &[ir::Value]) {
        self.builder.ins().jump(block, args);
    }

    /// Conditional branch: `cond != 0` takes `then_block`, else `else_block`.
    pub fn brif(
        &mut self,
        cond: ir::Value,
        then_block: ir::Block,
        then_args: &[ir::Value],
        else_block: ir::Block,
        else_args: &[ir::Value],
    ) {
        self.builder
            .ins()
            .brif(cond, then_block, then_args, else_block, else_args);
    }

    /// Indexed branch with an optional single argument forwarded to every
    /// case and the default (spec §4.5 `br_table`): each destination's join
    /// block-param needs exactly one incoming value per edge, so `arg` (when
    /// the targets are value-typed) is threaded into every `BlockCall`
    /// rather than dropped.
    pub fn br_table(&mut self, index: ir::Value, default: ir::Block, cases: &[ir::Block], arg: Option<ir::Value>) {
        let args: &[ir::Value] = match &arg {
            Some(v) => std::slice::from_ref(v),
            None => &[],
        };
        let jt_data = ir::JumpTableData::new(
            self.builder.func.dfg.block_call(default, args),
            &cases
                .iter()
                .map(|b| self.builder.func.dfg.block_call(*b, args))
                .collect::<Vec<_>>(),
        );
        let jt = self.builder.create_jump_table(jt_data);
        self.builder.ins().br_table(index, jt);
    }

    pub fn load(&mut self, ty: ir::Type, hint: MemArgHint, addr: ir::Value, offset: i32) -> ir::Value {
        self.builder.ins().load(ty, hint.mem_flags(), addr, offset)
    }

    pub fn store(&mut self, hint: MemArgHint, value: ir::Value, addr: ir::Value, offset: i32) {
        self.builder.ins().store(hint.mem_flags(), value, addr, offset);
    }

    pub fn call_indirect(
        &mut self,
        sig: ir::SigRef,
        callee: ir::Value,
        args: &[ir::Value],
    ) -> ir::Inst {
        self.builder.ins().call_indirect(sig, callee, args)
    }

    pub fn inst_results(&mut self, inst: ir::Inst) -> ir::Value {
        self.builder.inst_results(inst)[0]
    }

    pub fn trap(&mut self, code: ir::TrapCode) {
        self.builder.ins().trap(code);
    }

    pub fn return_values(&mut self, values: &[ir::Value]) {
        self.builder.ins().return_(values);
    }

    /// `icmp` widened to `i32` (spec §4.5: "All comparisons widen their
    /// 1-bit result to `i32`").
    pub fn icmp_i32(&mut self, cc: IntCC, lhs: ir::Value, rhs: ir::Value) -> ir::Value {
        let bit = self.builder.ins().icmp(cc, lhs, rhs);
        self.builder.ins().uextend(ir::types::I32, bit)
    }

    /// Call a host intrinsic by its resolved address (spec §6 "Host
    /// intrinsics"): materialize `ptr` as a pointer-width constant, declare
    /// `sig` as a one-off `SigRef`, and emit `call_indirect`. Returns the
    /// call's first result, or `None` if `sig` declares no return value.
    /// This is how every trap and every NaN/rounding-sensitive float op
    /// reaches the host (§4.5): there is no `cranelift-module` linkage here,
    /// so a bare constant-pointer `call_indirect` is this crate's only way
    /// to call external code (see `SPEC_FULL.md` §4.1).
    pub fn call_intrinsic(
        &mut self,
        pointer_type: ir::Type,
        ptr: usize,
        sig: ir::Signature,
        args: &[ir::Value],
    ) -> Option<ir::Value> {
        let has_return = !sig.returns.is_empty();
        let sig_ref = self.builder.import_signature(sig);
        let callee = self.builder.ins().iconst(pointer_type, ptr as i64);
        let call = self.call_indirect(sig_ref, callee, args);
        if has_return {
            Some(self.inst_results(call))
        } else {
            None
        }
    }
}

/// A literal payload for `IrFacade::literal`.
#[derive(Debug, Clone, Copy)]
pub enum Literal {
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
}
