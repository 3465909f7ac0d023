//! Component C: the per-function operand stack and control-frame stack
//! (spec §3 "Function emission state", §4.3).

use std::cell::Cell;
use std::rc::Rc;

use cranelift_codegen::ir;

use crate::error::LowerError;
use crate::types::{ResultType, ValueType};

/// The kind of structured-control construct a `ControlFrame` represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlKind {
    Function,
    Block,
    IfThen,
    IfElse,
    Loop,
}

/// A join node: the block-entry value merging operator a branch's argument
/// feeds (spec GLOSSARY "Join node"). Realized as an eagerly-appended
/// Cranelift block parameter (see `SPEC_FULL.md` §4.1): every predecessor
/// that actually branches here records an incoming, and the frame that owns
/// this join decides at `end` whether to read the parameter or synthesize a
/// typed zero, based on whether any incoming was ever recorded.
#[derive(Debug, Clone)]
pub struct Join {
    pub block: ir::Block,
    pub value_type: ValueType,
    incoming: Rc<Cell<u32>>,
}

impl Join {
    pub fn new(block: ir::Block, value_type: ValueType) -> Self {
        Self {
            block,
            value_type,
            incoming: Rc::new(Cell::new(0)),
        }
    }

    pub fn record_incoming(&self) {
        self.incoming.set(self.incoming.get() + 1);
    }

    pub fn incoming_count(&self) -> u32 {
        self.incoming.get()
    }
}

/// One in-scope structured-control construct (spec §3 "ControlFrame").
#[derive(Debug, Clone)]
pub struct ControlFrame {
    pub kind: ControlKind,
    pub result_type: ResultType,
    pub end_block: ir::Block,
    pub end_join: Option<Join>,
    pub else_block: Option<ir::Block>,
    /// The loop header block, only meaningful while `kind = loop` (spec §4.5
    /// `loop T`). Unlike every other block this crate creates, the header
    /// cannot be sealed at creation time: its back-edge predecessors (the
    /// `br`/`br_if`/`br_table` targeting it from inside the loop body) are
    /// only known once the body has been fully lowered, so it stays
    /// unsealed until this frame's `end`.
    pub loop_header: Option<ir::Block>,
    pub outer_stack_height: usize,
    pub outer_branch_target_depth: usize,
    pub is_reachable: bool,
    pub is_else_reachable: bool,
}

/// The destination `br`/`br_if`/`br_table`/`return` consult (spec §3
/// "BranchTarget").
#[derive(Debug, Clone)]
pub struct BranchTarget {
    pub argument_type: ResultType,
    pub block: ir::Block,
    pub join: Option<Join>,
}

/// One live value on the operand stack, carrying its bytecode-level type
/// alongside the Cranelift SSA value (spec §3: "Each entry carries its IR
/// type").
pub type StackValue = (ir::Value, ValueType);

/// The per-function operand stack and control-frame stack (component C).
#[derive(Debug, Default)]
pub struct FunctionState {
    pub operand_stack: Vec<StackValue>,
    pub control_stack: Vec<ControlFrame>,
    pub branch_targets: Vec<BranchTarget>,
}

impl FunctionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, value: ir::Value, ty: ValueType) {
        self.operand_stack.push((value, ty));
    }

    pub fn pop(&mut self) -> Result<StackValue, LowerError> {
        self.operand_stack.pop().ok_or(LowerError::StackUnderflow)
    }

    pub fn top(&self) -> Result<StackValue, LowerError> {
        self.operand_stack
            .last()
            .copied()
            .ok_or(LowerError::StackUnderflow)
    }

    /// Pop `n` values, returning them in original (bottom-to-top) push order.
    pub fn pop_n(&mut self, n: usize) -> Result<Vec<StackValue>, LowerError> {
        if self.operand_stack.len() < n {
            return Err(LowerError::StackUnderflow);
        }
        Ok(self.operand_stack.split_off(self.operand_stack.len() - n))
    }

    pub fn current_frame(&self) -> &ControlFrame {
        self.control_stack
            .last()
            .expect("control stack must never be empty during a function lowering pass")
    }

    pub fn current_frame_mut(&mut self) -> &mut ControlFrame {
        self.control_stack
            .last_mut()
            .expect("control stack must never be empty during a function lowering pass")
    }

    /// Push a new control frame. Spec §4.3: "fails loudly if caller attempts
    /// to push while the current frame is unreachable" — in practice
    /// unreachable, since the driver only ever routes control operators to
    /// the lowering visitor (as opposed to the unreachable-skip visitor,
    /// component D) while the enclosing frame is reachable.
    pub fn push_control(
        &mut self,
        kind: ControlKind,
        result_type: ResultType,
        end_block: ir::Block,
        end_join: Option<Join>,
        else_block: Option<ir::Block>,
    ) {
        self.push_control_with_loop_header(kind, result_type, end_block, end_join, else_block, None)
    }

    /// As `push_control`, but also records the loop header block for a
    /// `kind = loop` frame (spec §4.5 `loop T`), so `end` can seal it once
    /// every back-edge into it has been emitted.
    pub fn push_control_with_loop_header(
        &mut self,
        kind: ControlKind,
        result_type: ResultType,
        end_block: ir::Block,
        end_join: Option<Join>,
        else_block: Option<ir::Block>,
        loop_header: Option<ir::Block>,
    ) {
        if let Some(frame) = self.control_stack.last() {
            debug_assert!(
                frame.is_reachable,
                "push_control invoked while the enclosing frame is unreachable"
            );
        }
        self.control_stack.push(ControlFrame {
            kind,
            result_type,
            end_block,
            end_join,
            else_block,
            loop_header,
            outer_stack_height: self.operand_stack.len(),
            outer_branch_target_depth: self.branch_targets.len(),
            is_reachable: true,
            is_else_reachable: true,
        });
    }

    pub fn push_branch_target(&mut self, target: BranchTarget) {
        self.branch_targets.push(target);
    }

    /// Return the `d`-th branch target from the top (0 = innermost).
    pub fn branch_target_by_depth(&self, d: u32) -> Result<&BranchTarget, LowerError> {
        let len = self.branch_targets.len();
        let idx = len
            .checked_sub(1 + d as usize)
            .ok_or(LowerError::BranchDepthOutOfRange {
                depth: d,
                available: len,
            })?;
        Ok(&self.branch_targets[idx])
    }

    /// Truncate the operand stack to the current frame's height and mark it
    /// unreachable (spec §4.3).
    pub fn enter_unreachable(&mut self) {
        let height = self.current_frame().outer_stack_height;
        self.operand_stack.truncate(height);
        self.current_frame_mut().is_reachable = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cranelift_codegen::ir::Block;

    fn dummy_block(n: u32) -> Block {
        Block::from_u32(n)
    }

    #[test]
    fn push_pop_round_trips() {
        let mut state = FunctionState::new();
        let v = ir::Value::from_u32(0);
        state.push(v, ValueType::I32);
        assert_eq!(state.pop().unwrap(), (v, ValueType::I32));
        assert!(matches!(state.pop(), Err(LowerError::StackUnderflow)));
    }

    #[test]
    fn branch_target_depth_zero_is_innermost() {
        let mut state = FunctionState::new();
        state.push_branch_target(BranchTarget {
            argument_type: ResultType::None,
            block: dummy_block(0),
            join: None,
        });
        state.push_branch_target(BranchTarget {
            argument_type: ResultType::None,
            block: dummy_block(1),
            join: None,
        });
        assert_eq!(state.branch_target_by_depth(0).unwrap().block, dummy_block(1));
        assert_eq!(state.branch_target_by_depth(1).unwrap().block, dummy_block(0));
        assert!(state.branch_target_by_depth(2).is_err());
    }

    #[test]
    fn enter_unreachable_truncates_to_outer_height() {
        let mut state = FunctionState::new();
        state.push(ir::Value::from_u32(0), ValueType::I32);
        state.push_control(
            ControlKind::Block,
            ResultType::None,
            dummy_block(0),
            None,
            None,
        );
        state.push(ir::Value::from_u32(1), ValueType::I32);
        state.push(ir::Value::from_u32(2), ValueType::I32);
        state.enter_unreachable();
        assert_eq!(state.operand_stack.len(), 1);
        assert!(!state.current_frame().is_reachable);
    }

    #[test]
    fn join_tracks_incoming_count() {
        let join = Join::new(dummy_block(0), ValueType::I32);
        assert_eq!(join.incoming_count(), 0);
        join.record_incoming();
        join.record_incoming();
        assert_eq!(join.incoming_count(), 2);
    }
}
