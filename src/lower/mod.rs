//! Component E: the lowering visitor, plus the per-function driver that
//! alternates operators between it and component D (spec §2 "Control flow
//! per function").
//!
//! Split the way the teacher's `LoweringContext` is: state lives on
//! `FunctionLowerer` as fields, while the `FunctionBuilder` is threaded
//! through as an explicit `&mut` parameter to every method rather than
//! stored as a field, avoiding the field-on-field borrow conflicts a
//! self-contained builder field would cause.

mod control_flow;
mod operators;

use cranelift_codegen::ir;
use cranelift_frontend::{FunctionBuilder, Variable};
use tracing::instrument;

use crate::context::ModuleEmitContext;
use crate::control::FunctionState;
use crate::decode::{Operator, OperatorReader};
use crate::error::LowerError;
use crate::module::FunctionDef;
use crate::types::{FunctionType, ResultType, ValueType};
use crate::unreachable::{Action, UnreachableVisitor};

/// Per-function lowering state: the operand/control tracker (component C),
/// the unreachable-skip visitor (component D), and the local-variable
/// table. One instance exists only for the duration of one function's
/// lowering pass (spec §3 "Lifecycles").
pub struct FunctionLowerer<'ctx, 'm> {
    pub ctx: &'ctx ModuleEmitContext<'m>,
    pub state: FunctionState,
    pub unreachable: UnreachableVisitor,
    /// One Cranelift `Variable` per parameter-or-local, matching the
    /// teacher's `declare_all_regs` treatment of its own JIT registers.
    /// Cranelift's `Variable` mechanism is this crate's Cranelift-idiomatic
    /// realization of spec §3's "indexable set of stack-allocated value
    /// slots" — the SSA construction Cranelift performs for variables is
    /// exactly what a literal stack-slot-plus-load/store encoding would
    /// have to hand-roll for locals that are read and written from inside
    /// loops.
    pub locals: Vec<Variable>,
    pub local_types: Vec<ValueType>,
    pub func_index: u32,
    pub return_block: ir::Block,
}

fn result_value_type(result: ResultType) -> Option<ValueType> {
    result.value_type()
}

impl<'ctx, 'm> FunctionLowerer<'ctx, 'm> {
    /// Lower one bytecode-defined function body into `builder`'s function.
    /// Grounded on `EmitFunctionContext::emit` in
    /// `examples/original_source/Source/Runtime/LLVMEmitIR.cpp` and on
    /// `LoweringContext::lower` in
    /// `jit/backend/cranelift/lowering.rs`.
    #[instrument(skip(ctx, builder, def), fields(func_index))]
    pub fn lower_function(
        ctx: &'ctx ModuleEmitContext<'m>,
        builder: &mut FunctionBuilder<'_>,
        func_index: u32,
        func_type: &FunctionType,
        def: &FunctionDef,
    ) -> Result<(), LowerError> {
        let entry = builder.create_block();
        builder.append_block_params_for_function_params(entry);
        builder.switch_to_block(entry);

        let mut local_types = func_type.params.clone();
        local_types.extend(def.non_parameter_locals.iter().copied());

        let mut locals = Vec::with_capacity(local_types.len());
        for (index, ty) in local_types.iter().enumerate() {
            let var = Variable::from_u32(index as u32);
            builder.declare_var(var, ty.to_cranelift());
            locals.push(var);
        }
        let params: Vec<ir::Value> = builder.block_params(entry).to_vec();
        for (index, param_value) in params.iter().enumerate() {
            builder.def_var(locals[index], *param_value);
        }
        for (index, ty) in local_types.iter().enumerate().skip(func_type.params.len()) {
            let zero = zero_of(builder, *ty);
            builder.def_var(locals[index], zero);
        }
        // Entry never gains predecessors after this point: it is never a
        // branch target, only ever the single function-level fallthrough
        // start, so it is safe to seal immediately (unlike a loop header,
        // which must stay unsealed until every back-edge is known).
        builder.seal_block(entry);

        let return_block = builder.create_block();
        let end_join = result_value_type(func_type.result).map(|ty| {
            let mut facade = crate::facade::IrFacade::new(builder);
            facade.create_join(return_block, ty)
        });

        let mut state = FunctionState::new();
        state.push_control(
            crate::control::ControlKind::Function,
            func_type.result,
            return_block,
            end_join.clone(),
            None,
        );
        state.push_branch_target(crate::control::BranchTarget {
            argument_type: func_type.result,
            block: return_block,
            join: end_join,
        });

        let mut lowerer = FunctionLowerer {
            ctx,
            state,
            unreachable: UnreachableVisitor::new(),
            locals,
            local_types,
            func_index,
            return_block,
        };

        let mut reader = OperatorReader::new(&def.code);
        while !lowerer.state.control_stack.is_empty() {
            let operator = match reader.next_operator()? {
                Some(op) => op,
                None => break,
            };
            lowerer.dispatch(builder, &operator)?;
        }

        builder.finalize();
        Ok(())
    }

    fn dispatch(&mut self, builder: &mut FunctionBuilder, op: &Operator) -> Result<(), LowerError> {
        if self.state.current_frame().is_reachable {
            self.lower_operator(builder, op)
        } else {
            match self.unreachable.accept(op) {
                Action::Ignore => Ok(()),
                Action::DelegateElse => self.lower_else(builder),
                Action::DelegateEnd => self.lower_end(builder),
            }
        }
    }
}

pub(crate) fn zero_of(builder: &mut FunctionBuilder, ty: ValueType) -> ir::Value {
    let mut facade = crate::facade::IrFacade::new(builder);
    match ty {
        ValueType::I32 => facade.literal(ty, crate::facade::Literal::I32(0)),
        ValueType::I64 => facade.literal(ty, crate::facade::Literal::I64(0)),
        ValueType::F32 => facade.literal(ty, crate::facade::Literal::F32(0.0)),
        ValueType::F64 => facade.literal(ty, crate::facade::Literal::F64(0.0)),
    }
}
