//! Benchmarks for the function-body lowering pass.
//!
//! Grounded on the teacher's own `criterion` benchmark shape in
//! `raya-parser/benches/lexer.rs`: one `bench_function`/`bench_with_input`
//! per input shape, `black_box` around the thing actually measured.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use baseline_jit::context::ModuleEmitContext;
use baseline_jit::module::{FunctionDef, Module, ModuleInstance};
use baseline_jit::types::{FunctionType, ResultType, ValueType};
use baseline_jit::CraneliftBackend;

fn push_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_le_bytes());
}

/// `local.get 0; local.get 1; i32.add; end`.
fn add_two_locals_body() -> Vec<u8> {
    use baseline_jit::opcode::Opcode;
    let mut code = Vec::new();
    code.push(Opcode::LocalGet as u8);
    push_u32(&mut code, 0);
    code.push(Opcode::LocalGet as u8);
    push_u32(&mut code, 1);
    code.push(Opcode::I32Add as u8);
    code.push(Opcode::End as u8);
    code
}

/// A deeper chain of adds over a single local, to see lowering cost scale
/// with operator count rather than distinct opcode variety.
fn chained_adds_body(depth: u32) -> Vec<u8> {
    use baseline_jit::opcode::Opcode;
    let mut code = Vec::new();
    code.push(Opcode::LocalGet as u8);
    push_u32(&mut code, 0);
    for _ in 0..depth {
        code.push(Opcode::LocalGet as u8);
        push_u32(&mut code, 0);
        code.push(Opcode::I32Add as u8);
    }
    code.push(Opcode::End as u8);
    code
}

fn build_module(code: Vec<u8>, param_count: usize) -> Module {
    let mut module = Module::new();
    module.types.push(FunctionType::new(
        vec![ValueType::I32; param_count],
        ResultType::Value(ValueType::I32),
    ));
    module.function_defs.push(FunctionDef {
        type_index: 0,
        non_parameter_locals: vec![],
        code,
    });
    module
}

fn bench_add_two_locals(c: &mut Criterion) {
    let backend = CraneliftBackend::host().unwrap();
    let module = build_module(add_two_locals_body(), 2);
    let instance = ModuleInstance::default();

    c.bench_function("lower_add_two_locals", |b| {
        b.iter(|| {
            let ctx = ModuleEmitContext::new(
                black_box(&module),
                &instance,
                backend.pointer_type(),
                backend.call_conv(),
            );
            baseline_jit::compile_module(&ctx).unwrap()
        });
    });
}

fn bench_chained_adds(c: &mut Criterion) {
    let backend = CraneliftBackend::host().unwrap();
    let instance = ModuleInstance::default();
    let mut group = c.benchmark_group("chained_adds");

    for depth in [8u32, 64, 256] {
        let module = build_module(chained_adds_body(depth), 1);
        group.bench_with_input(BenchmarkId::new("depth", depth), &module, |b, module| {
            b.iter(|| {
                let ctx = ModuleEmitContext::new(
                    black_box(module),
                    &instance,
                    backend.pointer_type(),
                    backend.call_conv(),
                );
                baseline_jit::compile_module(&ctx).unwrap()
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_add_two_locals, bench_chained_adds);
criterion_main!(benches);
