//! Signature inference across recursive call cycles.

use pretty_assertions::assert_eq;
use verso_ir::*;
use verso_ownership::*;

fn sp(n: usize) -> Span {
    Span::new(n, n + 1)
}

fn call(f: FunctionId, args: Vec<Operand>) -> Rvalue {
    Rvalue::Call {
        callee: Callee::Function(f),
        args,
    }
}

/// `fn name(x: Data, n: Int) { if n { [touch x]; other(x, n) } }`
fn define_step(
    program: &mut Program,
    id: FunctionId,
    name: &str,
    other: FunctionId,
    touch: Option<Rvalue>,
    base: usize,
) {
    let mut b = FunctionBuilder::new(id, name, Span::new(base, base + 50));
    let x = b.param("x", Ty::named("Data"), sp(base + 1));
    let n = b.param("n", Ty::Int, sp(base + 2));
    let recurse = b.new_block();
    let done = b.new_block();
    b.branch(Operand::binding(n, sp(base + 3)), recurse, done, sp(base + 3));

    b.switch_to(recurse);
    if let Some(value) = touch {
        b.eval(value, sp(base + 4));
    }
    b.eval(
        call(
            other,
            vec![Operand::binding(x, sp(base + 5)), Operand::binding(n, sp(base + 6))],
        ),
        sp(base + 5),
    );
    b.goto(done, sp(base + 7));

    b.switch_to(done);
    b.ret(None, sp(base + 8));
    program.define(b.finish());
}

fn run(program: &Program, config: EngineConfig) -> AnalysisResult {
    match OwnershipEngine::new(config).analyze(program) {
        Ok(result) => result,
        Err(e) => panic!("engine failed: {}", e),
    }
}

#[test]
fn test_read_only_cycle_converges_to_borrow() {
    let mut program = Program::new("even_odd.vs");
    let even = program.declare_function("even");
    let odd = program.declare_function("odd");
    define_step(&mut program, even, "even", odd, None, 0);
    define_step(&mut program, odd, "odd", even, None, 100);

    for config in [EngineConfig::sequential(), EngineConfig::default()] {
        let result = run(&program, config);
        assert!(!result.has_errors());
        for f in [even, odd] {
            let sig = result.signature(f).unwrap();
            assert!(sig.resolved);
            assert_eq!(
                sig.params,
                vec![OwnershipMode::ImmutableBorrow, OwnershipMode::ImmutableBorrow]
            );
        }
    }
}

#[test]
fn test_mutation_in_cycle_escalates_both_signatures() {
    let mut program = Program::new("ping_pong.vs");
    program.declare_extern("touch", vec![OverrideMode::Inout]);
    let ping = program.declare_function("ping");
    let pong = program.declare_function("pong");
    let touch = Rvalue::Call {
        callee: Callee::Extern("touch".into()),
        args: vec![Operand::binding(BindingId(0), sp(4))],
    };
    define_step(&mut program, ping, "ping", pong, Some(touch), 0);
    define_step(&mut program, pong, "pong", ping, None, 100);

    let result = run(&program, EngineConfig::sequential());
    assert!(!result.has_errors());
    for f in [ping, pong] {
        assert_eq!(
            result.signature(f).unwrap().param(0),
            Some(OwnershipMode::MutableBorrow)
        );
    }
}

#[test]
fn test_iteration_bound_reports_unresolvable_signature() {
    let mut program = Program::new("ping_pong.vs");
    program.declare_extern("touch", vec![OverrideMode::Inout]);
    let ping = program.declare_function("ping");
    let pong = program.declare_function("pong");
    let touch = Rvalue::Call {
        callee: Callee::Extern("touch".into()),
        args: vec![Operand::binding(BindingId(0), sp(4))],
    };
    define_step(&mut program, ping, "ping", pong, Some(touch), 0);
    define_step(&mut program, pong, "pong", ping, None, 100);

    let config = EngineConfig::sequential().with_max_signature_iterations(1);
    let result = run(&program, config);
    for name in ["ping", "pong"] {
        let analysis = result.function(name).unwrap();
        match &analysis.errors[..] {
            [OwnershipError::UnresolvableRecursiveSignature {
                cycle, iterations, ..
            }] => {
                assert_eq!(cycle.len(), 2);
                assert_eq!(*iterations, 1);
            }
            other => panic!("expected an unresolvable signature, got {:?}", other),
        }
        assert!(!analysis.signature().resolved);
    }
    let codes: Vec<Option<String>> = result.diagnostics().into_iter().map(|d| d.code).collect();
    assert_eq!(codes, vec![Some("E2004".to_string()), Some("E2004".to_string())]);
}

#[test]
fn test_self_recursive_consumer_is_moved() {
    // fn drain(x: Data, n: Int) { if n { drain(x, n) } else { consume(x) } }
    let mut program = Program::new("drain.vs");
    program.declare_extern("consume", vec![OverrideMode::Move]);
    let drain = program.declare_function("drain");
    let mut b = FunctionBuilder::new(drain, "drain", Span::new(0, 60));
    let x = b.param("x", Ty::named("Data"), sp(1));
    let n = b.param("n", Ty::Int, sp(2));
    let recurse = b.new_block();
    let stop = b.new_block();
    b.branch(Operand::binding(n, sp(3)), recurse, stop, sp(3));
    b.switch_to(recurse);
    b.eval(
        call(drain, vec![Operand::binding(x, sp(5)), Operand::binding(n, sp(6))]),
        sp(5),
    );
    b.ret(None, sp(7));
    b.switch_to(stop);
    b.eval(
        Rvalue::Call {
            callee: Callee::Extern("consume".into()),
            args: vec![Operand::binding(x, sp(9))],
        },
        sp(9),
    );
    b.ret(None, sp(10));
    program.define(b.finish());

    let result = run(&program, EngineConfig::sequential());
    assert!(!result.has_errors());
    let sig = result.signature(drain).unwrap();
    assert!(sig.resolved);
    assert_eq!(
        sig.params,
        vec![OwnershipMode::Moved, OwnershipMode::ImmutableBorrow]
    );
}

#[test]
fn test_caller_of_cycle_sees_final_signature() {
    let mut program = Program::new("ping_pong.vs");
    program.declare_extern("touch", vec![OverrideMode::Inout]);
    let ping = program.declare_function("ping");
    let pong = program.declare_function("pong");
    let main = program.declare_function("main");
    let touch = Rvalue::Call {
        callee: Callee::Extern("touch".into()),
        args: vec![Operand::binding(BindingId(0), sp(4))],
    };
    define_step(&mut program, ping, "ping", pong, Some(touch), 0);
    define_step(&mut program, pong, "pong", ping, None, 100);

    let mut b = FunctionBuilder::new(main, "main", Span::new(200, 260));
    let d = b.param("d", Ty::named("Data"), sp(201));
    b.eval(
        call(ping, vec![Operand::binding(d, sp(210)), Operand::int(3)]),
        sp(210),
    );
    b.ret(None, sp(220));
    program.define(b.finish());

    let graph = CallGraph::build(&program);
    let levels = graph.levels();
    assert_eq!(levels.len(), 2);
    assert!(levels[0][0].recursive);
    assert_eq!(levels[1][0].functions, vec![main]);

    let result = run(&program, EngineConfig::default().with_worker_threads(2));
    assert_eq!(
        result.signature(main).unwrap().params,
        vec![OwnershipMode::MutableBorrow]
    );
}

// ============================================================================
// Generated Cycles
// ============================================================================

mod generated {
    use super::*;
    use proptest::prelude::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Body {
        Nothing,
        /// print(x)
        Read,
        /// touch(x), where touch takes `inout`
        Touch,
    }

    fn body() -> impl Strategy<Value = Body> {
        prop_oneof![Just(Body::Nothing), Just(Body::Read), Just(Body::Touch)]
    }

    /// `step_i` calls `step_{i+1}`, and the last one calls `step_0`.
    fn ring(bodies: &[Body]) -> (Program, Vec<FunctionId>) {
        let mut program = Program::new("ring.vs");
        program.declare_extern("print", vec![OverrideMode::Borrow]);
        program.declare_extern("touch", vec![OverrideMode::Inout]);
        let ids: Vec<FunctionId> = (0..bodies.len())
            .map(|i| program.declare_function(format!("step_{}", i)))
            .collect();
        for (i, body) in bodies.iter().enumerate() {
            let base = i * 100;
            // x is declared first, so it is binding 0 in every member
            let x = Operand::binding(BindingId(0), sp(base + 4));
            let value = match body {
                Body::Nothing => None,
                Body::Read => Some(Rvalue::Call {
                    callee: Callee::Extern("print".into()),
                    args: vec![x],
                }),
                Body::Touch => Some(Rvalue::Call {
                    callee: Callee::Extern("touch".into()),
                    args: vec![x],
                }),
            };
            let next = ids[(i + 1) % ids.len()];
            define_step(&mut program, ids[i], &format!("step_{}", i), next, value, base);
        }
        (program, ids)
    }

    /// Rounds the fixed point needs: one per hop a mutation travels back
    /// along the ring, plus one to observe that nothing changed.
    fn rounds_needed(bodies: &[Body]) -> usize {
        let len = bodies.len();
        let hops = (0..len)
            .filter_map(|i| (0..len).find(|d| bodies[(i + d) % len] == Body::Touch))
            .max();
        match hops {
            Some(hops) => hops + 2,
            None => 1,
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_cycle_converges_to_least_upper_bound(
            bodies in prop::collection::vec(body(), 1..5),
            bound in 1usize..6,
        ) {
            let (program, ids) = ring(&bodies);
            let config = EngineConfig::sequential().with_max_signature_iterations(bound);
            let result = run(&program, config);

            let expected = if bodies.contains(&Body::Touch) {
                OwnershipMode::MutableBorrow
            } else {
                OwnershipMode::ImmutableBorrow
            };
            let converges = rounds_needed(&bodies) <= bound;

            for (i, id) in ids.iter().enumerate() {
                let sig = result.signature(*id).unwrap();
                prop_assert_eq!(sig.resolved, converges);
                let analysis = result.function(&format!("step_{}", i)).unwrap();
                if converges {
                    prop_assert!(analysis.errors.is_empty(), "{:?}", analysis.errors);
                    prop_assert_eq!(
                        sig.params.clone(),
                        vec![expected, OwnershipMode::ImmutableBorrow]
                    );
                } else {
                    prop_assert!(matches!(
                        &analysis.errors[..],
                        [OwnershipError::UnresolvableRecursiveSignature { cycle, iterations, .. }]
                            if cycle.len() == bodies.len() && *iterations == bound
                    ), "{:?}", analysis.errors);
                    // A cut-off signature never claims more than the fixed point
                    prop_assert!(sig.params[0] <= expected);
                }
            }
        }
    }
}
