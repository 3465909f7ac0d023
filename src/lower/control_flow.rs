//! Control-structure and branch operators (spec §4.5 "Control structure",
//! "Branches"), plus the top-level operator dispatcher.

use cranelift_codegen::ir::{self, TrapCode};
use cranelift_frontend::FunctionBuilder;

use crate::control::{BranchTarget, ControlFrame, ControlKind, Join};
use crate::decode::{Operator, Operator::Simple};
use crate::error::LowerError;
use crate::facade::IrFacade;
use crate::intrinsics::Intrinsic;
use crate::opcode::Opcode;
use crate::types::ResultType;

use super::{zero_of, FunctionLowerer};

/// Cranelift's own `unreachable` terminator, emitted immediately after every
/// call to a trap intrinsic (spec §7: "Generated code emits the call
/// followed by an unreachable terminator; from the IR's perspective the
/// call does not return").
pub(crate) const TRAP_UNREACHABLE: TrapCode = TrapCode::unwrap_user(1);

impl<'ctx, 'm> FunctionLowerer<'ctx, 'm> {
    /// Top-level dispatch for a reachable operator (component E). Control
    /// and branch operators are handled directly; every other family is
    /// handled in `lower/operators.rs`.
    pub(super) fn lower_operator(
        &mut self,
        builder: &mut FunctionBuilder,
        op: &Operator,
    ) -> Result<(), LowerError> {
        match op {
            Operator::Block(t) => self.lower_block(builder, *t),
            Operator::Loop(t) => self.lower_loop(builder, *t),
            Operator::If(t) => self.lower_if(builder, *t),
            Simple(Opcode::Else) => self.lower_else(builder),
            Simple(Opcode::End) => self.lower_end(builder),
            Operator::Br(depth) => self.lower_br(builder, *depth),
            Operator::BrIf(depth) => self.lower_br_if(builder, *depth),
            Operator::BrTable { targets, default } => {
                self.lower_br_table(builder, targets, *default)
            }
            Simple(Opcode::Return) => self.lower_return(builder),
            Simple(Opcode::Unreachable) => self.lower_unreachable(builder),
            Simple(Opcode::Nop) => Ok(()),
            other => self.lower_non_control_operator(builder, other),
        }
    }

    fn lower_block(&mut self, builder: &mut FunctionBuilder, t: ResultType) -> Result<(), LowerError> {
        let mut facade = IrFacade::new(builder);
        let end_block = facade.create_block();
        let end_join = t.value_type().map(|ty| facade.create_join(end_block, ty));
        self.state
            .push_control(ControlKind::Block, t, end_block, end_join.clone(), None);
        self.state.push_branch_target(BranchTarget {
            argument_type: t,
            block: end_block,
            join: end_join,
        });
        Ok(())
    }

    fn lower_loop(&mut self, builder: &mut FunctionBuilder, t: ResultType) -> Result<(), LowerError> {
        let mut facade = IrFacade::new(builder);
        let header = facade.create_block();
        let end_block = facade.create_block();
        let end_join = t.value_type().map(|ty| facade.create_join(end_block, ty));
        facade.jump(header, &[]);
        facade.switch_to_block(header);
        self.state.push_control_with_loop_header(
            ControlKind::Loop,
            t,
            end_block,
            end_join,
            None,
            Some(header),
        );
        // A loop's branch target is its header, and carries no argument:
        // "branches to a loop's header supply no value" (spec §4.5).
        self.state.push_branch_target(BranchTarget {
            argument_type: ResultType::None,
            block: header,
            join: None,
        });
        Ok(())
    }

    fn lower_if(&mut self, builder: &mut FunctionBuilder, t: ResultType) -> Result<(), LowerError> {
        let (cond, _) = self.state.pop()?;
        let mut facade = IrFacade::new(builder);
        let then_block = facade.create_block();
        let else_block = facade.create_block();
        let end_block = facade.create_block();
        let end_join = t.value_type().map(|ty| facade.create_join(end_block, ty));
        facade.brif(cond, then_block, &[], else_block, &[]);
        facade.seal_block(then_block);
        facade.seal_block(else_block);
        facade.switch_to_block(then_block);

        self.state.push_control(
            ControlKind::IfThen,
            t,
            end_block,
            end_join.clone(),
            Some(else_block),
        );
        self.state.push_branch_target(BranchTarget {
            argument_type: t,
            block: end_block,
            join: end_join,
        });
        Ok(())
    }

    pub(super) fn lower_else(&mut self, builder: &mut FunctionBuilder) -> Result<(), LowerError> {
        let frame = self.state.current_frame().clone();
        if frame.is_reachable {
            let args = forward_result_to_join(self, frame.result_type, frame.end_join.as_ref())?;
            let mut facade = IrFacade::new(builder);
            facade.jump(frame.end_block, &args);
        }
        let else_block = frame
            .else_block
            .expect("else handler invoked on a frame with no else_block");
        let mut facade = IrFacade::new(builder);
        facade.switch_to_block(else_block);

        let current = self.state.current_frame_mut();
        current.kind = ControlKind::IfElse;
        current.is_reachable = current.is_else_reachable;
        current.else_block = None;
        Ok(())
    }

    pub(super) fn lower_end(&mut self, builder: &mut FunctionBuilder) -> Result<(), LowerError> {
        let frame = self.state.current_frame().clone();

        if frame.is_reachable {
            let args = forward_result_to_join(self, frame.result_type, frame.end_join.as_ref())?;
            let mut facade = IrFacade::new(builder);
            facade.jump(frame.end_block, &args);
        }

        if frame.kind == ControlKind::IfThen {
            // No `else` was written: synthesize an empty one (spec §4.5,
            // §8 boundary behavior).
            let else_block = frame
                .else_block
                .expect("if_then frame missing its else_block at end");
            let mut facade = IrFacade::new(builder);
            facade.switch_to_block(else_block);
            facade.jump(frame.end_block, &[]);
        }

        let mut facade = IrFacade::new(builder);
        facade.switch_to_block(frame.end_block);
        // A loop header is never sealed up front (back-edges to it are
        // only known once the whole loop body has been lowered); every
        // other block this crate creates has all of its predecessors known
        // at creation time and is sealed immediately where it's created.
        if frame.kind == ControlKind::Loop {
            let header = frame
                .loop_header
                .expect("loop frame missing its header block at end");
            facade.seal_block(header);
        }
        facade.seal_block(frame.end_block);

        if let Some(ty) = frame.result_type.value_type() {
            let join = frame
                .end_join
                .as_ref()
                .expect("result_type is Some but end_join is None");
            let value = if join.incoming_count() > 0 {
                builder.block_params(frame.end_block)[0]
            } else {
                // Erase the join: nothing reachable ever forwarded a value
                // to it, so its block parameter is dead. Synthesize a typed
                // zero instead of reading it (spec §4.5 `end`, §8).
                zero_of(builder, ty)
            };
            self.state.push(value, ty);
        }

        self.state.branch_targets.truncate(frame.outer_branch_target_depth);
        self.state.control_stack.pop();

        if frame.kind == ControlKind::Function {
            let values: Vec<ir::Value> = self
                .state
                .operand_stack
                .drain(self.state.operand_stack.len().saturating_sub(
                    if frame.result_type.is_none() { 0 } else { 1 },
                )..)
                .map(|(v, _)| v)
                .collect();
            let mut facade = IrFacade::new(builder);
            facade.return_values(&values);
        }

        Ok(())
    }

    fn lower_br(&mut self, builder: &mut FunctionBuilder, depth: u32) -> Result<(), LowerError> {
        let target = self.state.branch_target_by_depth(depth)?.clone();
        if let Some(ty) = target.argument_type.value_type() {
            let (value, _) = self.state.pop()?;
            if let Some(join) = &target.join {
                join.record_incoming();
                let mut facade = IrFacade::new(builder);
                facade.jump(target.block, &[value]);
            }
            let _ = ty;
        } else {
            let mut facade = IrFacade::new(builder);
            facade.jump(target.block, &[]);
        }
        self.state.enter_unreachable();
        Ok(())
    }

    fn lower_br_if(&mut self, builder: &mut FunctionBuilder, depth: u32) -> Result<(), LowerError> {
        let target = self.state.branch_target_by_depth(depth)?.clone();
        let (cond, _) = self.state.pop()?;
        // The branched-through operand is read, not popped: it remains on
        // the stack for the fallthrough path (spec §4.5 `br_if`).
        let mut then_args = Vec::new();
        if target.argument_type.value_type().is_some() {
            let (value, _) = self.state.top()?;
            if let Some(join) = &target.join {
                join.record_incoming();
            }
            then_args.push(value);
        }
        let mut facade = IrFacade::new(builder);
        let false_block = facade.create_block();
        facade.brif(cond, target.block, &then_args, false_block, &[]);
        facade.seal_block(false_block);
        facade.switch_to_block(false_block);
        Ok(())
    }

    fn lower_br_table(
        &mut self,
        builder: &mut FunctionBuilder,
        targets: &[u32],
        default: u32,
    ) -> Result<(), LowerError> {
        let (index, _) = self.state.pop()?;
        let default_target = self.state.branch_target_by_depth(default)?.clone();

        // The argument, if any, is forwarded to the default target plus
        // once per case (spec §4.5: "forward it to every distinct target's
        // join exactly once per occurrence of that target in the cases
        // plus once for the default"). Each target's join may be the same
        // object as another's, each occurrence still records one incoming.
        let mut case_blocks = Vec::with_capacity(targets.len());
        let arg = if default_target.argument_type.value_type().is_some() {
            Some(self.state.pop()?.0)
        } else {
            None
        };

        for &depth in targets {
            let target = self.state.branch_target_by_depth(depth)?.clone();
            if let (Some(join), Some(_)) = (&target.join, arg) {
                join.record_incoming();
            }
            case_blocks.push(target.block);
        }
        if let Some(join) = &default_target.join {
            if arg.is_some() {
                join.record_incoming();
            }
        }

        // `arg` is the single value forwarded to every `BlockCall` below
        // (default and every case alike), since every target shares the
        // same argument type (the bytecode validator guarantees this, spec
        // §4.5) and this crate relies on that guarantee without re-checking
        // it (spec §7, invariant violations are asserted, not handled).
        let mut facade = IrFacade::new(builder);
        facade.br_table(index, default_target.block, &case_blocks, arg);
        self.state.enter_unreachable();
        Ok(())
    }

    fn lower_return(&mut self, builder: &mut FunctionBuilder) -> Result<(), LowerError> {
        let depth = (self.state.branch_targets.len() - 1) as u32;
        self.lower_br(builder, depth)
    }

    fn lower_unreachable(&mut self, builder: &mut FunctionBuilder) -> Result<(), LowerError> {
        self.emit_trap_call(builder, Intrinsic::UnreachableTrap, &[]);
        self.state.enter_unreachable();
        Ok(())
    }

    /// Emit a call to a host trap intrinsic followed by an `unreachable`
    /// terminator (spec §7: "Generated code emits the call followed by an
    /// unreachable terminator; from the IR's perspective the call does not
    /// return"). Every runtime trap named in spec §6 routes through here.
    pub(crate) fn emit_trap_call(&mut self, builder: &mut FunctionBuilder, intrinsic: Intrinsic, args: &[ir::Value]) {
        debug_assert!(intrinsic.returns_noreturn(), "emit_trap_call invoked with a value-returning intrinsic");
        let (ptr, sig) = self.ctx.intrinsic(intrinsic);
        let pointer_type = self.ctx.pointer_type();
        let mut facade = IrFacade::new(builder);
        facade.call_intrinsic(pointer_type, ptr, sig, args);
        facade.trap(TRAP_UNREACHABLE);
    }
}

/// Shared `end`/`else` logic: if the frame expects a result and is
/// reachable, pop one value, record it as an incoming on `join`, and return
/// it as the single-element jump-argument list the caller should forward to
/// `frame.end_block` (empty if the frame yields no result).
fn forward_result_to_join(
    lowerer: &mut FunctionLowerer,
    result_type: ResultType,
    join: Option<&Join>,
) -> Result<Vec<ir::Value>, LowerError> {
    if result_type.value_type().is_some() {
        let (value, _) = lowerer.state.pop()?;
        if let Some(join) = join {
            join.record_incoming();
        }
        Ok(vec![value])
    } else {
        Ok(Vec::new())
    }
}

