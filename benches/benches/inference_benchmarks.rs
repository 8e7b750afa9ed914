//! Ownership Inference Benchmarks
//!
//! This module benchmarks the ownership engine:
//! - Whole-program throughput, sequential and parallel
//! - Recursive cycles that need several fixed-point iterations
//! - Region planning for allocation-heavy functions

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use verso_ir::*;
use verso_ownership::{EngineConfig, OwnershipEngine};

fn sp(n: usize) -> Span {
    Span::new(n, n + 1)
}

// ============================================================================
// Program Generators
// ============================================================================

/// Generate `count` independent leaf functions plus one caller per leaf.
fn generate_call_pairs(count: usize) -> Program {
    let mut program = Program::new("bench.vs");
    program.declare_extern("print", vec![OverrideMode::Borrow]);
    for i in 0..count {
        let leaf = program.declare_function(format!("leaf_{}", i));
        let caller = program.declare_function(format!("caller_{}", i));

        let mut b = FunctionBuilder::new(leaf, format!("leaf_{}", i), Span::dummy());
        let x = b.param("x", Ty::named("Data"), sp(0));
        b.push(
            StatementKind::FieldWrite {
                target: BindingRef::new(x, sp(1)),
                field: "n".into(),
                value: Rvalue::BinaryOp(BinOp::Add, Operand::field(x, "n", sp(2)), Operand::int(1)),
            },
            sp(1),
        );
        b.eval(
            Rvalue::Call {
                callee: Callee::Extern("print".into()),
                args: vec![Operand::binding(x, sp(3))],
            },
            sp(3),
        );
        b.ret(None, sp(4));
        program.define(b.finish());

        let mut b = FunctionBuilder::new(caller, format!("caller_{}", i), Span::dummy());
        let d = b.param("d", Ty::named("Data"), sp(10));
        b.eval(
            Rvalue::Call {
                callee: Callee::Function(leaf),
                args: vec![Operand::binding(d, sp(11))],
            },
            sp(11),
        );
        b.ret(None, sp(12));
        program.define(b.finish());
    }
    program
}

/// Generate a cycle of `len` functions where the first one mutates.
fn generate_cycle(len: usize) -> Program {
    let mut program = Program::new("cycle.vs");
    program.declare_extern("touch", vec![OverrideMode::Inout]);
    let ids: Vec<FunctionId> = (0..len)
        .map(|i| program.declare_function(format!("step_{}", i)))
        .collect();
    for (i, id) in ids.iter().enumerate() {
        let next = ids[(i + 1) % len];
        let mut b = FunctionBuilder::new(*id, format!("step_{}", i), Span::dummy());
        let x = b.param("x", Ty::named("Data"), sp(0));
        let n = b.param("n", Ty::Int, sp(1));
        let recurse = b.new_block();
        let done = b.new_block();
        b.branch(Operand::binding(n, sp(2)), recurse, done, sp(2));
        b.switch_to(recurse);
        if i == 0 {
            b.eval(
                Rvalue::Call {
                    callee: Callee::Extern("touch".into()),
                    args: vec![Operand::binding(x, sp(3))],
                },
                sp(3),
            );
        }
        b.eval(
            Rvalue::Call {
                callee: Callee::Function(next),
                args: vec![Operand::binding(x, sp(4)), Operand::binding(n, sp(5))],
            },
            sp(4),
        );
        b.goto(done, sp(6));
        b.switch_to(done);
        b.ret(None, sp(7));
        program.define(b.finish());
    }
    program
}

/// Generate one function with `allocs` allocations inside a region with
/// an early return after each allocation.
fn generate_region_function(allocs: usize) -> Program {
    let mut program = Program::new("regions.vs");
    program.declare_extern("Process", vec![OverrideMode::Borrow]);
    let id = program.declare_function("run");
    let mut b = FunctionBuilder::new(id, "run", Span::dummy());
    let cond = b.param("c", Ty::Bool, sp(0));
    let (_, body) = b.open_region(RegionKind::Region, sp(1));
    b.goto(body, sp(1));
    b.switch_to(body);
    let mut bufs = Vec::new();
    for i in 0..allocs {
        let buf = b.let_binding(format!("buf_{}", i), Ty::named("Buffer"), sp(10 + i));
        let site = b.alloc_site(sp(10 + i));
        b.assign(buf, Rvalue::Alloc { alloc: site, args: vec![] }, sp(10 + i));
        let early = b.new_block();
        let next = b.new_block();
        b.branch(Operand::binding(cond, sp(10 + i)), early, next, sp(10 + i));
        b.switch_to(early);
        b.ret(None, sp(10 + i));
        b.switch_to(next);
        bufs.push(buf);
    }
    for buf in bufs {
        b.eval(
            Rvalue::Call {
                callee: Callee::Extern("Process".into()),
                args: vec![Operand::binding(buf, sp(5))],
            },
            sp(5),
        );
    }
    let after = b.close_region();
    b.goto(after, sp(6));
    b.switch_to(after);
    b.ret(None, sp(7));
    program.define(b.finish());
    program
}

// ============================================================================
// Engine Benchmarks
// ============================================================================

fn bench_engine_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("engine_throughput");

    for count in [10, 100, 500] {
        let program = generate_call_pairs(count);
        group.throughput(Throughput::Elements(program.functions.len() as u64));

        for (mode, config) in [
            ("sequential", EngineConfig::sequential()),
            ("parallel", EngineConfig::default()),
        ] {
            let engine = OwnershipEngine::new(config);
            group.bench_with_input(BenchmarkId::new(mode, count), &program, |b, program| {
                b.iter(|| black_box(engine.analyze(black_box(program))))
            });
        }
    }

    group.finish();
}

fn bench_recursive_cycles(c: &mut Criterion) {
    let mut group = c.benchmark_group("recursive_cycles");
    let engine = OwnershipEngine::new(EngineConfig::sequential());

    for len in [2, 8, 32] {
        let program = generate_cycle(len);
        group.bench_with_input(BenchmarkId::new("cycle", len), &program, |b, program| {
            b.iter(|| black_box(engine.analyze(black_box(program))))
        });
    }

    group.finish();
}

fn bench_region_planning(c: &mut Criterion) {
    let mut group = c.benchmark_group("region_planning");
    let engine = OwnershipEngine::new(EngineConfig::sequential());

    for allocs in [4, 32, 128] {
        let program = generate_region_function(allocs);
        group.throughput(Throughput::Elements(allocs as u64));
        group.bench_with_input(BenchmarkId::new("early_returns", allocs), &program, |b, program| {
            b.iter(|| black_box(engine.analyze(black_box(program))))
        });
    }

    group.finish();
}

// ============================================================================
// Criterion Main
// ============================================================================

criterion_group!(
    benches,
    bench_engine_throughput,
    bench_recursive_cycles,
    bench_region_planning,
);

criterion_main!(benches);
