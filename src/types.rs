//! The bytecode's closed value-type set and the result-type it pairs with.

use cranelift_codegen::ir;

/// One of the bytecode's four value types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    I32,
    I64,
    F32,
    F64,
}

impl ValueType {
    /// The Cranelift IR type a value of this type lowers to.
    pub fn to_cranelift(self) -> ir::Type {
        match self {
            ValueType::I32 => ir::types::I32,
            ValueType::I64 => ir::types::I64,
            ValueType::F32 => ir::types::F32,
            ValueType::F64 => ir::types::F64,
        }
    }

    /// Bit width, used for shift-count masking and `INT_MIN` detection.
    pub fn bit_width(self) -> u32 {
        match self {
            ValueType::I32 | ValueType::F32 => 32,
            ValueType::I64 | ValueType::F64 => 64,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, ValueType::F32 | ValueType::F64)
    }

    pub fn is_integer(self) -> bool {
        !self.is_float()
    }
}

/// The result expected at a control frame's `end`, or at a function's return:
/// either a single value type or the distinguished "none".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultType {
    None,
    Value(ValueType),
}

impl ResultType {
    pub fn is_none(self) -> bool {
        matches!(self, ResultType::None)
    }

    pub fn value_type(self) -> Option<ValueType> {
        match self {
            ResultType::None => None,
            ResultType::Value(t) => Some(t),
        }
    }
}

impl From<Option<ValueType>> for ResultType {
    fn from(v: Option<ValueType>) -> Self {
        match v {
            Some(t) => ResultType::Value(t),
            None => ResultType::None,
        }
    }
}

/// A function type: ordered parameter types plus a result type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionType {
    pub params: Vec<ValueType>,
    pub result: ResultType,
}

impl FunctionType {
    pub fn new(params: Vec<ValueType>, result: ResultType) -> Self {
        Self { params, result }
    }
}
