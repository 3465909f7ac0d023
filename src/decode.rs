//! The operator-stream reader.
//!
//! Spec §9 calls for "a tagged operator variant decoded by an
//! operator-stream reader" without mandating a concrete encoding. Grounded
//! on `jit/analysis/decoder.rs`'s `DecodedInstr`/`Operands` split (an enum
//! keyed by the opcode's operand shape, not one variant per opcode), this
//! reader groups opcodes by shape and decodes fixed-width little-endian
//! immediates: `u32` for branch depths and local/global/function/type
//! indices, native-endian payloads for constants, and `(offset: u32,
//! align_log2: u8)` for memory operators. This crate does not validate the
//! stream (§1, §7): `OperatorReader` only ever fails on a structurally
//! malformed byte sequence (an opcode byte naming no known operator, or a
//! stream ending mid-immediate), never on a type or stack-effect error.

use crate::error::DecodeError;
use crate::opcode::Opcode;
use crate::types::{ResultType, ValueType};

/// The immediate payload of a memory load/store.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MemArg {
    pub offset: u32,
    pub align_log2: u8,
}

/// One decoded operator, grouped by operand shape rather than one variant
/// per opcode (most opcodes carry no immediate at all and are decoded as
/// `Operator::Simple`).
#[derive(Debug, Clone, PartialEq)]
pub enum Operator {
    /// Any opcode with no immediate: `unreachable`, `nop`, `else`, `end`,
    /// `return`, `drop`, `select`, `memory.size`, `memory.grow`, and every
    /// comparison/arithmetic/conversion opcode.
    Simple(Opcode),
    Block(ResultType),
    Loop(ResultType),
    If(ResultType),
    Br(u32),
    BrIf(u32),
    BrTable { targets: Vec<u32>, default: u32 },
    Call(u32),
    CallIndirect(u32),
    /// `local.get`/`local.set`/`local.tee` plus local index.
    Local(Opcode, u32),
    /// `global.get`/`global.set` plus global index.
    Global(Opcode, u32),
    /// Any load/store opcode plus its memory immediate.
    MemAccess(Opcode, MemArg),
    I32Const(i32),
    I64Const(i64),
    F32Const(f32),
    F64Const(f64),
}

fn is_memory_opcode(op: Opcode) -> bool {
    matches!(
        op,
        Opcode::I32Load
            | Opcode::I64Load
            | Opcode::F32Load
            | Opcode::F64Load
            | Opcode::I32Load8S
            | Opcode::I32Load8U
            | Opcode::I32Load16S
            | Opcode::I32Load16U
            | Opcode::I64Load8S
            | Opcode::I64Load8U
            | Opcode::I64Load16S
            | Opcode::I64Load16U
            | Opcode::I64Load32S
            | Opcode::I64Load32U
            | Opcode::I32Store
            | Opcode::I64Store
            | Opcode::F32Store
            | Opcode::F64Store
            | Opcode::I32Store8
            | Opcode::I32Store16
            | Opcode::I64Store8
            | Opcode::I64Store16
            | Opcode::I64Store32
    )
}

fn is_local_opcode(op: Opcode) -> bool {
    matches!(op, Opcode::LocalGet | Opcode::LocalSet | Opcode::LocalTee)
}

fn is_global_opcode(op: Opcode) -> bool {
    matches!(op, Opcode::GlobalGet | Opcode::GlobalSet)
}

/// Encodes a result type as a single byte: `0` = none, else `ValueType`
/// discriminant + 1.
fn decode_result_type(byte: u8) -> ResultType {
    match byte {
        0 => ResultType::None,
        1 => ResultType::Value(ValueType::I32),
        2 => ResultType::Value(ValueType::I64),
        3 => ResultType::Value(ValueType::F32),
        4 => ResultType::Value(ValueType::F64),
        _ => ResultType::None,
    }
}

/// A single-pass reader over one function's operator-stream bytes.
pub struct OperatorReader<'a> {
    code: &'a [u8],
    pos: usize,
}

impl<'a> OperatorReader<'a> {
    pub fn new(code: &'a [u8]) -> Self {
        Self { code, pos: 0 }
    }

    pub fn offset(&self) -> usize {
        self.pos
    }

    pub fn is_at_end(&self) -> bool {
        self.pos >= self.code.len()
    }

    fn read_u8(&mut self) -> Result<u8, DecodeError> {
        let b = *self
            .code
            .get(self.pos)
            .ok_or(DecodeError::UnexpectedEnd(self.pos))?;
        self.pos += 1;
        Ok(b)
    }

    fn read_u32(&mut self) -> Result<u32, DecodeError> {
        let end = self.pos + 4;
        let bytes = self
            .code
            .get(self.pos..end)
            .ok_or(DecodeError::UnexpectedEnd(self.pos))?;
        self.pos = end;
        Ok(u32::from_le_bytes(bytes.try_into().unwrap()))
    }

    fn read_i32(&mut self) -> Result<i32, DecodeError> {
        Ok(self.read_u32()? as i32)
    }

    fn read_u64(&mut self) -> Result<u64, DecodeError> {
        let end = self.pos + 8;
        let bytes = self
            .code
            .get(self.pos..end)
            .ok_or(DecodeError::UnexpectedEnd(self.pos))?;
        self.pos = end;
        Ok(u64::from_le_bytes(bytes.try_into().unwrap()))
    }

    fn read_i64(&mut self) -> Result<i64, DecodeError> {
        Ok(self.read_u64()? as i64)
    }

    fn read_memarg(&mut self) -> Result<MemArg, DecodeError> {
        let offset = self.read_u32()?;
        let align_log2 = self.read_u8()?;
        Ok(MemArg {
            offset,
            align_log2,
        })
    }

    /// Decode the next operator, or `Ok(None)` at end of stream.
    pub fn next_operator(&mut self) -> Result<Option<Operator>, DecodeError> {
        if self.is_at_end() {
            return Ok(None);
        }
        let start = self.pos;
        let byte = self.read_u8()?;
        let opcode = Opcode::from_byte(byte).ok_or(DecodeError::InvalidOpcode {
            byte,
            offset: start,
        })?;

        let operator = match opcode {
            Opcode::Block => Operator::Block(decode_result_type(self.read_u8()?)),
            Opcode::Loop => Operator::Loop(decode_result_type(self.read_u8()?)),
            Opcode::If => Operator::If(decode_result_type(self.read_u8()?)),
            Opcode::Br => Operator::Br(self.read_u32()?),
            Opcode::BrIf => Operator::BrIf(self.read_u32()?),
            Opcode::BrTable => {
                let count = self.read_u32()?;
                // `count` comes straight off the untrusted bytecode stream, so it
                // is never used to size an allocation up front: a truncated
                // stream claiming a huge count must fail with `UnexpectedEnd`
                // from `read_u32`, not abort the process via an oversized
                // `Vec::with_capacity`.
                let mut targets = Vec::new();
                for _ in 0..count {
                    targets.push(self.read_u32()?);
                }
                let default = self.read_u32()?;
                Operator::BrTable { targets, default }
            }
            Opcode::Call => Operator::Call(self.read_u32()?),
            Opcode::CallIndirect => Operator::CallIndirect(self.read_u32()?),
            Opcode::I32Const => Operator::I32Const(self.read_i32()?),
            Opcode::I64Const => Operator::I64Const(self.read_i64()?),
            Opcode::F32Const => Operator::F32Const(f32::from_bits(self.read_u32()?)),
            Opcode::F64Const => Operator::F64Const(f64::from_bits(self.read_u64()?)),
            op if is_local_opcode(op) => Operator::Local(op, self.read_u32()?),
            op if is_global_opcode(op) => Operator::Global(op, self.read_u32()?),
            op if is_memory_opcode(op) => Operator::MemAccess(op, self.read_memarg()?),
            op => Operator::Simple(op),
        };
        Ok(Some(operator))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push_u32(buf: &mut Vec<u8>, v: u32) {
        buf.extend_from_slice(&v.to_le_bytes());
    }

    #[test]
    fn decodes_simple_opcodes() {
        let code = vec![Opcode::I32Add as u8, Opcode::End as u8];
        let mut reader = OperatorReader::new(&code);
        assert_eq!(
            reader.next_operator().unwrap(),
            Some(Operator::Simple(Opcode::I32Add))
        );
        assert_eq!(
            reader.next_operator().unwrap(),
            Some(Operator::Simple(Opcode::End))
        );
        assert_eq!(reader.next_operator().unwrap(), None);
    }

    #[test]
    fn decodes_local_get_with_index() {
        let mut code = vec![Opcode::LocalGet as u8];
        push_u32(&mut code, 3);
        let mut reader = OperatorReader::new(&code);
        assert_eq!(
            reader.next_operator().unwrap(),
            Some(Operator::Local(Opcode::LocalGet, 3))
        );
    }

    #[test]
    fn decodes_block_result_type() {
        let code = vec![Opcode::Block as u8, 1];
        let mut reader = OperatorReader::new(&code);
        assert_eq!(
            reader.next_operator().unwrap(),
            Some(Operator::Block(ResultType::Value(ValueType::I32)))
        );
    }

    #[test]
    fn rejects_invalid_opcode() {
        let code = vec![0x06u8];
        let mut reader = OperatorReader::new(&code);
        let err = reader.next_operator().unwrap_err();
        assert!(matches!(
            err,
            DecodeError::InvalidOpcode { byte: 0x06, offset: 0 }
        ));
    }

    #[test]
    fn decodes_br_table() {
        let mut code = vec![Opcode::BrTable as u8];
        push_u32(&mut code, 2);
        push_u32(&mut code, 0);
        push_u32(&mut code, 1);
        push_u32(&mut code, 2);
        let mut reader = OperatorReader::new(&code);
        assert_eq!(
            reader.next_operator().unwrap(),
            Some(Operator::BrTable {
                targets: vec![0, 1],
                default: 2,
            })
        );
    }
}
