//! Error types for each fallible subsystem.
//!
//! Mirrors the teacher's convention of one `thiserror`-derived enum per
//! fallible subsystem rather than a single crate-wide error type.

use crate::types::ValueType;

/// Errors from the operator-stream decoder.
///
/// The decoder does not validate bytecode; these only fire on a
/// structurally malformed stream, which a validated module should never
/// produce (see `DESIGN.md` / spec §7).
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("invalid opcode byte {byte:#04x} at offset {offset}")]
    InvalidOpcode { byte: u8, offset: usize },
    #[error("unexpected end of code at offset {0}")]
    UnexpectedEnd(usize),
}

/// Errors raised while lowering a function body to Cranelift IR.
#[derive(Debug, thiserror::Error)]
pub enum LowerError {
    #[error("unsupported operator: {0}")]
    UnsupportedOperator(String),
    #[error("branch target depth {depth} exceeds control-stack depth {available}")]
    BranchDepthOutOfRange { depth: u32, available: usize },
    #[error("operand stack underflow")]
    StackUnderflow,
    #[error("type mismatch: expected {expected:?}, found {found:?}")]
    TypeMismatch {
        expected: ValueType,
        found: ValueType,
    },
    #[error("cranelift codegen error: {0}")]
    Codegen(#[from] cranelift_codegen::CodegenError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

/// Host-resource errors from the indirect-call table (reserve/commit/decommit).
///
/// These correspond to spec §7's "host resource errors": the original
/// reports them via a sentinel (`-1`/nullptr); this crate reports them
/// through `Result` instead, since Rust has a real error channel.
#[derive(Debug, thiserror::Error)]
pub enum TableError {
    #[error("failed to reserve {0} bytes of virtual address space")]
    ReserveFailed(usize),
    #[error("failed to commit {len} bytes at offset {offset}")]
    CommitFailed { offset: usize, len: usize },
    #[error("failed to decommit {len} bytes at offset {offset}")]
    DecommitFailed { offset: usize, len: usize },
    #[error("growing by {requested} elements would exceed the table's maximum of {max}")]
    WouldExceedMaximum { requested: u32, max: u32 },
    #[error("shrinking by {requested} elements would drop below the table's minimum of {min}")]
    WouldDropBelowMinimum { requested: u32, min: u32 },
    #[error("element index {index} out of bounds for table of size {size}")]
    IndexOutOfBounds { index: u32, size: u32 },
}
