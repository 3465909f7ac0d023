//! The bytecode's operator encoding.
//!
//! Grounded on the teacher's `compiler/bytecode/opcode.rs` convention of a
//! `#[repr(u8)]` enum grouped into contiguous byte ranges with one doc-line
//! per variant naming its operand shape. The byte values themselves follow
//! the bytecode's own well-known single-byte encoding (this is, after all,
//! a stack-machine bytecode whose operator semantics this crate implements
//! verbatim; reusing its real opcode numbering avoids inventing an
//! arbitrary one that would have to be documented from scratch).

/// One bytecode operator tag. Immediates (label depths, local/global/type
/// indices, constant payloads) are read separately by `decode::OperatorReader`
/// once the shape implied by the opcode is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    // 0x00 - 0x11: control structure and branches.
    /// `() -> !`. Traps immediately.
    Unreachable = 0x00,
    /// `() -> ()`. No-op; present for completeness, never emitted by the
    /// lowering visitor but accepted by the decoder.
    Nop = 0x01,
    /// `block T`. Operand: result type.
    Block = 0x02,
    /// `loop T`. Operand: result type.
    Loop = 0x03,
    /// `if T`. Operand: result type. Pops the condition.
    If = 0x04,
    /// `else`. No operand.
    Else = 0x05,
    /// `end`. No operand.
    End = 0x0B,
    /// `br d`. Operand: branch depth.
    Br = 0x0C,
    /// `br_if d`. Operand: branch depth.
    BrIf = 0x0D,
    /// `br_table {t_0..t_k-1}, default`. Operand: case table + default depth.
    BrTable = 0x0E,
    /// `return`.
    Return = 0x0F,
    /// `call f`. Operand: function index.
    Call = 0x10,
    /// `call_indirect T`. Operand: type index.
    CallIndirect = 0x11,

    // 0x1A - 0x1B: polymorphic.
    /// `drop`.
    Drop = 0x1A,
    /// `select`.
    Select = 0x1B,

    // 0x20 - 0x24: locals and globals.
    /// `get_local i`. Operand: local index.
    LocalGet = 0x20,
    /// `set_local i`. Operand: local index.
    LocalSet = 0x21,
    /// `tee_local i`. Operand: local index.
    LocalTee = 0x22,
    /// `get_global g`. Operand: global index.
    GlobalGet = 0x23,
    /// `set_global g`. Operand: global index.
    GlobalSet = 0x24,

    // 0x28 - 0x3E: loads and stores. Operand: (offset, align_log2).
    I32Load = 0x28,
    I64Load = 0x29,
    F32Load = 0x2A,
    F64Load = 0x2B,
    I32Load8S = 0x2C,
    I32Load8U = 0x2D,
    I32Load16S = 0x2E,
    I32Load16U = 0x2F,
    I64Load8S = 0x30,
    I64Load8U = 0x31,
    I64Load16S = 0x32,
    I64Load16U = 0x33,
    I64Load32S = 0x34,
    I64Load32U = 0x35,
    I32Store = 0x36,
    I64Store = 0x37,
    F32Store = 0x38,
    F64Store = 0x39,
    I32Store8 = 0x3A,
    I32Store16 = 0x3B,
    I64Store8 = 0x3C,
    I64Store16 = 0x3D,
    I64Store32 = 0x3E,

    // 0x3F - 0x40: memory size.
    /// `current_memory`. No operand.
    MemorySize = 0x3F,
    /// `grow_memory`. No operand (delta is popped from the stack).
    MemoryGrow = 0x40,

    // 0x41 - 0x44: constants. Operand: the literal.
    I32Const = 0x41,
    I64Const = 0x42,
    F32Const = 0x43,
    F64Const = 0x44,

    // 0x45 - 0x66: comparisons.
    I32Eqz = 0x45,
    I32Eq = 0x46,
    I32Ne = 0x47,
    I32LtS = 0x48,
    I32LtU = 0x49,
    I32GtS = 0x4A,
    I32GtU = 0x4B,
    I32LeS = 0x4C,
    I32LeU = 0x4D,
    I32GeS = 0x4E,
    I32GeU = 0x4F,
    I64Eqz = 0x50,
    I64Eq = 0x51,
    I64Ne = 0x52,
    I64LtS = 0x53,
    I64LtU = 0x54,
    I64GtS = 0x55,
    I64GtU = 0x56,
    I64LeS = 0x57,
    I64LeU = 0x58,
    I64GeS = 0x59,
    I64GeU = 0x5A,
    F32Eq = 0x5B,
    F32Ne = 0x5C,
    F32Lt = 0x5D,
    F32Gt = 0x5E,
    F32Le = 0x5F,
    F32Ge = 0x60,
    F64Eq = 0x61,
    F64Ne = 0x62,
    F64Lt = 0x63,
    F64Gt = 0x64,
    F64Le = 0x65,
    F64Ge = 0x66,

    // 0x67 - 0x78: i32 arithmetic.
    I32Clz = 0x67,
    I32Ctz = 0x68,
    I32Popcnt = 0x69,
    I32Add = 0x6A,
    I32Sub = 0x6B,
    I32Mul = 0x6C,
    I32DivS = 0x6D,
    I32DivU = 0x6E,
    I32RemS = 0x6F,
    I32RemU = 0x70,
    I32And = 0x71,
    I32Or = 0x72,
    I32Xor = 0x73,
    I32Shl = 0x74,
    I32ShrS = 0x75,
    I32ShrU = 0x76,
    I32Rotl = 0x77,
    I32Rotr = 0x78,

    // 0x79 - 0x8A: i64 arithmetic.
    I64Clz = 0x79,
    I64Ctz = 0x7A,
    I64Popcnt = 0x7B,
    I64Add = 0x7C,
    I64Sub = 0x7D,
    I64Mul = 0x7E,
    I64DivS = 0x7F,
    I64DivU = 0x80,
    I64RemS = 0x81,
    I64RemU = 0x82,
    I64And = 0x83,
    I64Or = 0x84,
    I64Xor = 0x85,
    I64Shl = 0x86,
    I64ShrS = 0x87,
    I64ShrU = 0x88,
    I64Rotl = 0x89,
    I64Rotr = 0x8A,

    // 0x8B - 0x98: f32 arithmetic.
    F32Abs = 0x8B,
    F32Neg = 0x8C,
    F32Ceil = 0x8D,
    F32Floor = 0x8E,
    F32Trunc = 0x8F,
    F32Nearest = 0x90,
    F32Sqrt = 0x91,
    F32Add = 0x92,
    F32Sub = 0x93,
    F32Mul = 0x94,
    F32Div = 0x95,
    F32Min = 0x96,
    F32Max = 0x97,
    F32Copysign = 0x98,

    // 0x99 - 0xA6: f64 arithmetic.
    F64Abs = 0x99,
    F64Neg = 0x9A,
    F64Ceil = 0x9B,
    F64Floor = 0x9C,
    F64Trunc = 0x9D,
    F64Nearest = 0x9E,
    F64Sqrt = 0x9F,
    F64Add = 0xA0,
    F64Sub = 0xA1,
    F64Mul = 0xA2,
    F64Div = 0xA3,
    F64Min = 0xA4,
    F64Max = 0xA5,
    F64Copysign = 0xA6,

    // 0xA7 - 0xBF: conversions.
    I32WrapI64 = 0xA7,
    I32TruncSF32 = 0xA8,
    I32TruncUF32 = 0xA9,
    I32TruncSF64 = 0xAA,
    I32TruncUF64 = 0xAB,
    I64ExtendSI32 = 0xAC,
    I64ExtendUI32 = 0xAD,
    I64TruncSF32 = 0xAE,
    I64TruncUF32 = 0xAF,
    I64TruncSF64 = 0xB0,
    I64TruncUF64 = 0xB1,
    F32ConvertSI32 = 0xB2,
    F32ConvertUI32 = 0xB3,
    F32ConvertSI64 = 0xB4,
    F32ConvertUI64 = 0xB5,
    F32DemoteF64 = 0xB6,
    F64ConvertSI32 = 0xB7,
    F64ConvertUI32 = 0xB8,
    F64ConvertSI64 = 0xB9,
    F64ConvertUI64 = 0xBA,
    F64PromoteF32 = 0xBB,
    I32ReinterpretF32 = 0xBC,
    I64ReinterpretF64 = 0xBD,
    F32ReinterpretI32 = 0xBE,
    F64ReinterpretI64 = 0xBF,
}

impl Opcode {
    /// Decode a raw byte into an `Opcode`, or `None` if it names no
    /// operator this crate understands.
    pub fn from_byte(byte: u8) -> Option<Opcode> {
        use Opcode::*;
        Some(match byte {
            0x00 => Unreachable,
            0x01 => Nop,
            0x02 => Block,
            0x03 => Loop,
            0x04 => If,
            0x05 => Else,
            0x0B => End,
            0x0C => Br,
            0x0D => BrIf,
            0x0E => BrTable,
            0x0F => Return,
            0x10 => Call,
            0x11 => CallIndirect,
            0x1A => Drop,
            0x1B => Select,
            0x20 => LocalGet,
            0x21 => LocalSet,
            0x22 => LocalTee,
            0x23 => GlobalGet,
            0x24 => GlobalSet,
            0x28 => I32Load,
            0x29 => I64Load,
            0x2A => F32Load,
            0x2B => F64Load,
            0x2C => I32Load8S,
            0x2D => I32Load8U,
            0x2E => I32Load16S,
            0x2F => I32Load16U,
            0x30 => I64Load8S,
            0x31 => I64Load8U,
            0x32 => I64Load16S,
            0x33 => I64Load16U,
            0x34 => I64Load32S,
            0x35 => I64Load32U,
            0x36 => I32Store,
            0x37 => I64Store,
            0x38 => F32Store,
            0x39 => F64Store,
            0x3A => I32Store8,
            0x3B => I32Store16,
            0x3C => I64Store8,
            0x3D => I64Store16,
            0x3E => I64Store32,
            0x3F => MemorySize,
            0x40 => MemoryGrow,
            0x41 => I32Const,
            0x42 => I64Const,
            0x43 => F32Const,
            0x44 => F64Const,
            0x45 => I32Eqz,
            0x46 => I32Eq,
            0x47 => I32Ne,
            0x48 => I32LtS,
            0x49 => I32LtU,
            0x4A => I32GtS,
            0x4B => I32GtU,
            0x4C => I32LeS,
            0x4D => I32LeU,
            0x4E => I32GeS,
            0x4F => I32GeU,
            0x50 => I64Eqz,
            0x51 => I64Eq,
            0x52 => I64Ne,
            0x53 => I64LtS,
            0x54 => I64LtU,
            0x55 => I64GtS,
            0x56 => I64GtU,
            0x57 => I64LeS,
            0x58 => I64LeU,
            0x59 => I64GeS,
            0x5A => I64GeU,
            0x5B => F32Eq,
            0x5C => F32Ne,
            0x5D => F32Lt,
            0x5E => F32Gt,
            0x5F => F32Le,
            0x60 => F32Ge,
            0x61 => F64Eq,
            0x62 => F64Ne,
            0x63 => F64Lt,
            0x64 => F64Gt,
            0x65 => F64Le,
            0x66 => F64Ge,
            0x67 => I32Clz,
            0x68 => I32Ctz,
            0x69 => I32Popcnt,
            0x6A => I32Add,
            0x6B => I32Sub,
            0x6C => I32Mul,
            0x6D => I32DivS,
            0x6E => I32DivU,
            0x6F => I32RemS,
            0x70 => I32RemU,
            0x71 => I32And,
            0x72 => I32Or,
            0x73 => I32Xor,
            0x74 => I32Shl,
            0x75 => I32ShrS,
            0x76 => I32ShrU,
            0x77 => I32Rotl,
            0x78 => I32Rotr,
            0x79 => I64Clz,
            0x7A => I64Ctz,
            0x7B => I64Popcnt,
            0x7C => I64Add,
            0x7D => I64Sub,
            0x7E => I64Mul,
            0x7F => I64DivS,
            0x80 => I64DivU,
            0x81 => I64RemS,
            0x82 => I64RemU,
            0x83 => I64And,
            0x84 => I64Or,
            0x85 => I64Xor,
            0x86 => I64Shl,
            0x87 => I64ShrS,
            0x88 => I64ShrU,
            0x89 => I64Rotl,
            0x8A => I64Rotr,
            0x8B => F32Abs,
            0x8C => F32Neg,
            0x8D => F32Ceil,
            0x8E => F32Floor,
            0x8F => F32Trunc,
            0x90 => F32Nearest,
            0x91 => F32Sqrt,
            0x92 => F32Add,
            0x93 => F32Sub,
            0x94 => F32Mul,
            0x95 => F32Div,
            0x96 => F32Min,
            0x97 => F32Max,
            0x98 => F32Copysign,
            0x99 => F64Abs,
            0x9A => F64Neg,
            0x9B => F64Ceil,
            0x9C => F64Floor,
            0x9D => F64Trunc,
            0x9E => F64Nearest,
            0x9F => F64Sqrt,
            0xA0 => F64Add,
            0xA1 => F64Sub,
            0xA2 => F64Mul,
            0xA3 => F64Div,
            0xA4 => F64Min,
            0xA5 => F64Max,
            0xA6 => F64Copysign,
            0xA7 => I32WrapI64,
            0xA8 => I32TruncSF32,
            0xA9 => I32TruncUF32,
            0xAA => I32TruncSF64,
            0xAB => I32TruncUF64,
            0xAC => I64ExtendSI32,
            0xAD => I64ExtendUI32,
            0xAE => I64TruncSF32,
            0xAF => I64TruncUF32,
            0xB0 => I64TruncSF64,
            0xB1 => I64TruncUF64,
            0xB2 => F32ConvertSI32,
            0xB3 => F32ConvertUI32,
            0xB4 => F32ConvertSI64,
            0xB5 => F32ConvertUI64,
            0xB6 => F32DemoteF64,
            0xB7 => F64ConvertSI32,
            0xB8 => F64ConvertUI32,
            0xB9 => F64ConvertSI64,
            0xBA => F64ConvertUI64,
            0xBB => F64PromoteF32,
            0xBC => I32ReinterpretF32,
            0xBD => I64ReinterpretF64,
            0xBE => F32ReinterpretI32,
            0xBF => F64ReinterpretI64,
            _ => return None,
        })
    }
}
