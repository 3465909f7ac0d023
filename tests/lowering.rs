//! Integration tests over the full `compile_module` pipeline, exercising
//! spec §8's concrete scenarios at the IR level: this crate hands back
//! `cranelift_codegen::ir::Function` values, not executable code, so these
//! check the emitted IR's shape and text form rather than running it.
//! Grounded on the teacher's own `format!("{}", jit_func)` /
//! `display.contains(...)` convention in `tests/jit_integration.rs`.

use baseline_jit::context::ModuleEmitContext;
use baseline_jit::module::{FunctionDef, Module, ModuleInstance, TableInstance};
use baseline_jit::opcode::Opcode;
use baseline_jit::types::{FunctionType, ResultType, ValueType};
use baseline_jit::CraneliftBackend;

fn push_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn push_i32(buf: &mut Vec<u8>, v: i32) {
    push_u32(buf, v as u32);
}

fn push_result_type(buf: &mut Vec<u8>, t: Option<ValueType>) {
    let byte = match t {
        None => 0u8,
        Some(ValueType::I32) => 1,
        Some(ValueType::I64) => 2,
        Some(ValueType::F32) => 3,
        Some(ValueType::F64) => 4,
    };
    buf.push(byte);
}

fn lower_single_function(
    params: Vec<ValueType>,
    result: ResultType,
    non_parameter_locals: Vec<ValueType>,
    code: Vec<u8>,
) -> cranelift_codegen::ir::Function {
    let mut module = Module::new();
    module.types.push(FunctionType::new(params, result));
    module.function_defs.push(FunctionDef {
        type_index: 0,
        non_parameter_locals,
        code,
    });
    let instance = ModuleInstance::default();
    let backend = CraneliftBackend::host().unwrap();
    let ctx = ModuleEmitContext::new(&module, &instance, backend.pointer_type(), backend.call_conv());
    let compiled = baseline_jit::compile_module(&ctx).unwrap();
    compiled.functions.into_iter().next().unwrap()
}

/// Spec §8 scenario 1: `(i32,i32)->i32`, `get_local 0; get_local 1; i32.add; end`.
#[test]
fn scenario_add_two_params() {
    let mut code = Vec::new();
    code.push(Opcode::LocalGet as u8);
    push_u32(&mut code, 0);
    code.push(Opcode::LocalGet as u8);
    push_u32(&mut code, 1);
    code.push(Opcode::I32Add as u8);
    code.push(Opcode::End as u8);

    let func = lower_single_function(
        vec![ValueType::I32, ValueType::I32],
        ResultType::Value(ValueType::I32),
        vec![],
        code,
    );

    let display = format!("{}", func);
    assert!(display.contains("iadd"), "IR should contain iadd, got:\n{}", display);
    assert!(display.contains("return"), "IR should contain a return, got:\n{}", display);
    assert_eq!(func.signature.params.len(), 2);
    assert_eq!(func.signature.returns.len(), 1);
}

/// Spec §8 scenario 2: `()->i32`, `i32.const 1; if i32; i32.const 42; else;
/// i32.const 7; end; end` — taking the `then` arm is a property of the
/// constant-folding the *backend* performs, not this crate (§1 Non-goals:
/// "does not optimize"), so this only checks both literals and the
/// conditional branch structure are present in the unlowered IR.
#[test]
fn scenario_if_else_both_arms_present() {
    let mut code = Vec::new();
    code.push(Opcode::I32Const as u8);
    push_i32(&mut code, 1);
    code.push(Opcode::If as u8);
    push_result_type(&mut code, Some(ValueType::I32));
    code.push(Opcode::I32Const as u8);
    push_i32(&mut code, 42);
    code.push(Opcode::Else as u8);
    code.push(Opcode::I32Const as u8);
    push_i32(&mut code, 7);
    code.push(Opcode::End as u8);
    code.push(Opcode::End as u8);

    let func = lower_single_function(vec![], ResultType::Value(ValueType::I32), vec![], code);

    let display = format!("{}", func);
    assert!(display.contains("brif"), "IR should contain a conditional branch, got:\n{}", display);
    assert!(display.contains("iconst.i32 42"), "IR should contain the then-arm literal, got:\n{}", display);
    assert!(display.contains("iconst.i32 7"), "IR should contain the else-arm literal, got:\n{}", display);
}

/// Spec §8 scenario 3: `(i32)->i32`, `get_local 0; i32.const 0; i32.div_s;
/// end` always emits a zero-divisor trap call ahead of the division,
/// regardless of the divisor's runtime value (this crate never executes
/// guest code, §1 Non-goals).
#[test]
fn scenario_div_s_guards_zero_divisor() {
    let mut code = Vec::new();
    code.push(Opcode::LocalGet as u8);
    push_u32(&mut code, 0);
    code.push(Opcode::I32Const as u8);
    push_i32(&mut code, 0);
    code.push(Opcode::I32DivS as u8);
    code.push(Opcode::End as u8);

    let func = lower_single_function(vec![ValueType::I32], ResultType::Value(ValueType::I32), vec![], code);

    let display = format!("{}", func);
    assert!(display.contains("call"), "IR should contain the trap call, got:\n{}", display);
    assert!(display.contains("trap"), "IR should contain an unreachable terminator, got:\n{}", display);
    assert!(display.contains("sdiv"), "IR should still emit the backend division, got:\n{}", display);
}

/// Spec §8 scenario 4: `(i32)->i32`, `get_local 0; i32.const -1; i32.rem_s;
/// end` emits both the zero-divisor trap and the `INT_MIN / -1` guard
/// branch, independent of the argument's runtime value.
#[test]
fn scenario_rem_s_has_int_min_guard() {
    let mut code = Vec::new();
    code.push(Opcode::LocalGet as u8);
    push_u32(&mut code, 0);
    code.push(Opcode::I32Const as u8);
    push_i32(&mut code, -1);
    code.push(Opcode::I32RemS as u8);
    code.push(Opcode::End as u8);

    let func = lower_single_function(vec![ValueType::I32], ResultType::Value(ValueType::I32), vec![], code);

    let display = format!("{}", func);
    let brif_count = display.matches("brif").count();
    assert!(brif_count >= 1, "IR should contain the INT_MIN/-1 guard branch, got:\n{}", display);
    assert!(display.contains("srem"), "IR should still emit the backend remainder, got:\n{}", display);
}

/// Spec §8 scenario 5: a `call_indirect T` site emits the bounds check,
/// the signature-mismatch check, and the indirect call itself.
#[test]
fn scenario_call_indirect_emits_both_guards() {
    let mut code = Vec::new();
    code.push(Opcode::I32Const as u8);
    push_i32(&mut code, 0); // index
    code.push(Opcode::CallIndirect as u8);
    push_u32(&mut code, 0); // type index
    code.push(Opcode::End as u8);

    let mut module = Module::new();
    module.types.push(FunctionType::new(vec![], ResultType::None));
    module.function_defs.push(FunctionDef {
        type_index: 0,
        non_parameter_locals: vec![],
        code,
    });
    let mut instance = ModuleInstance::default();
    instance.default_table = Some(TableInstance {
        slots_base: 0x1000,
        end_offset: 4,
        table_handle: 1,
    });

    let backend = CraneliftBackend::host().unwrap();
    let ctx = ModuleEmitContext::new(&module, &instance, backend.pointer_type(), backend.call_conv());
    let compiled = baseline_jit::compile_module(&ctx).unwrap();
    let func = &compiled.functions[0];

    let display = format!("{}", func);
    assert!(display.contains("icmp"), "IR should contain the OOB bounds comparison, got:\n{}", display);
    assert!(display.contains("call_indirect"), "IR should contain the indirect call, got:\n{}", display);
    // Two traps: indirect_call_oob and indirect_call_signature_mismatch.
    assert_eq!(display.matches("trap").count(), 2, "expected both guards to trap, got:\n{}", display);
}

/// Boundary behavior (spec §8): `if` with no `else` on a reachable frame
/// still produces a well-formed else block that just jumps to `end_block`.
#[test]
fn scenario_if_without_else_synthesizes_empty_else() {
    let mut code = Vec::new();
    code.push(Opcode::I32Const as u8);
    push_i32(&mut code, 1);
    code.push(Opcode::If as u8);
    push_result_type(&mut code, None);
    code.push(Opcode::Nop as u8);
    code.push(Opcode::End as u8);
    code.push(Opcode::End as u8);

    let func = lower_single_function(vec![], ResultType::None, vec![], code);
    // Entry + then + else + end_block + return block = 5.
    assert_eq!(func.layout.blocks().count(), 5);
}

/// Boundary behavior (spec §8): `br_table` with an empty case list still
/// forwards the argument to the default target exactly once.
#[test]
fn scenario_br_table_empty_cases_forwards_to_default_once() {
    let mut code = Vec::new();
    // block i32 (the br_table's sole target, argument type i32)
    code.push(Opcode::Block as u8);
    push_result_type(&mut code, Some(ValueType::I32));
    code.push(Opcode::I32Const as u8);
    push_i32(&mut code, 9);
    code.push(Opcode::I32Const as u8);
    push_i32(&mut code, 0); // index
    code.push(Opcode::BrTable as u8);
    push_u32(&mut code, 0); // zero cases
    push_u32(&mut code, 0); // default depth 0 (the block)
    code.push(Opcode::End as u8);
    code.push(Opcode::End as u8);

    let func = lower_single_function(vec![], ResultType::Value(ValueType::I32), vec![], code);
    let display = format!("{}", func);
    assert!(display.contains("br_table"), "IR should contain the indexed branch, got:\n{}", display);
}
