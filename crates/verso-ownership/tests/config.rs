//! Engine settings: loading and their effect on inference.

use pretty_assertions::assert_eq;
use verso_ir::*;
use verso_ownership::*;

#[test]
fn test_partial_settings_use_defaults() {
    let config: EngineConfig = serde_json::from_str(
        r#"{ "max_signature_iterations": 4, "suspension_policy": "always_move" }"#,
    )
    .unwrap();
    assert_eq!(config.max_signature_iterations, 4);
    assert_eq!(config.suspension_policy, SuspensionPolicy::AlwaysMove);
    assert_eq!(config.default_extern_mode, OwnershipMode::Moved);
    assert!(config.implicit_function_region);
}

#[test]
fn test_settings_round_trip_through_json() {
    let config = EngineConfig::sequential()
        .with_default_extern_mode(OwnershipMode::ImmutableBorrow)
        .with_worker_threads(3);
    let text = serde_json::to_string(&config).unwrap();
    assert!(text.contains(r#""default_extern_mode":"immutable_borrow""#));
    let back: EngineConfig = serde_json::from_str(&text).unwrap();
    assert_eq!(back, config);
}

#[test]
fn test_unknown_policy_is_rejected() {
    let parsed = serde_json::from_str::<EngineConfig>(r#"{ "suspension_policy": "sometimes" }"#);
    assert!(parsed.is_err());
}

// ============================================================================
// Suspension Policy
// ============================================================================

/// `async fn f(p: Data) { let l = State(); await [p, l] }`
fn suspending(p_override: OverrideMode) -> (Program, Function) {
    let mut program = Program::new("async.vs");
    let id = program.declare_function("f");
    let mut b = FunctionBuilder::new(id, "f", Span::new(0, 50));
    b.set_async(true);
    let p = b.param("p", Ty::named("Data"), Span::new(5, 6));
    let l = b.let_binding("l", Ty::named("State"), Span::new(14, 15));
    b.assign(
        l,
        Rvalue::Call {
            callee: Callee::Constructor("State".into()),
            args: vec![],
        },
        Span::new(10, 25),
    );
    b.push(
        StatementKind::Suspend {
            kind: SuspendKind::Await,
            captures: vec![
                Operand::explicit(p, p_override, Span::new(33, 34)),
                Operand::binding(l, Span::new(36, 37)),
            ],
        },
        Span::new(27, 38),
    );
    b.ret(None, Span::new(49, 50));
    let func = b.finish();
    program.define(func.clone());
    (program, func)
}

fn modes(config: EngineConfig, p_override: OverrideMode) -> (Vec<OwnershipMode>, usize) {
    let (program, func) = suspending(p_override);
    let result = OwnershipEngine::new(config).analyze(&program).unwrap();
    let analysis = result.function("f").unwrap();
    let found = ["p", "l"]
        .iter()
        .map(|name| analysis.binding_mode(&func, name).unwrap())
        .collect();
    (found, analysis.errors.len())
}

#[test]
fn test_caller_owned_captures_move_by_default() {
    let (found, errors) = modes(EngineConfig::sequential(), OverrideMode::None);
    assert_eq!(found, vec![OwnershipMode::Moved, OwnershipMode::MutableBorrow]);
    assert_eq!(errors, 0);
}

#[test]
fn test_suspension_policies() {
    let always = EngineConfig::sequential().with_suspension_policy(SuspensionPolicy::AlwaysMove);
    assert_eq!(
        modes(always, OverrideMode::None).0,
        vec![OwnershipMode::Moved, OwnershipMode::Moved]
    );

    let borrow = EngineConfig::sequential().with_suspension_policy(SuspensionPolicy::MutableBorrow);
    assert_eq!(
        modes(borrow, OverrideMode::None).0,
        vec![OwnershipMode::MutableBorrow, OwnershipMode::MutableBorrow]
    );
}

#[test]
fn test_keyword_at_suspension_is_honored() {
    let (found, errors) = modes(EngineConfig::sequential(), OverrideMode::Borrow);
    assert_eq!(found[0], OwnershipMode::ImmutableBorrow);
    assert_eq!(errors, 0);
}

#[test]
fn test_message_send_captures_value() {
    // fn post(ch: Channel, msg: Data) { send ch <- msg }
    let mut program = Program::new("send.vs");
    let id = program.declare_function("post");
    let mut b = FunctionBuilder::new(id, "post", Span::new(0, 40));
    let ch = b.param("ch", Ty::named("Channel"), Span::new(9, 11));
    let msg = b.param("msg", Ty::named("Data"), Span::new(22, 25));
    b.push(
        StatementKind::Send {
            channel: Operand::binding(ch, Span::new(30, 32)),
            value: Operand::binding(msg, Span::new(36, 39)),
        },
        Span::new(28, 39),
    );
    b.ret(None, Span::new(39, 40));
    program.define(b.finish());

    let result = OwnershipEngine::new(EngineConfig::sequential())
        .analyze(&program)
        .unwrap();
    assert_eq!(
        result.signature(id).unwrap().params,
        vec![OwnershipMode::ImmutableBorrow, OwnershipMode::Moved]
    );
}

#[test]
fn test_undeclared_extern_uses_configured_default() {
    let mut program = Program::new("ffi.vs");
    let id = program.declare_function("f");
    let mut b = FunctionBuilder::new(id, "f", Span::new(0, 30));
    let x = b.param("x", Ty::named("Data"), Span::new(5, 6));
    b.eval(
        Rvalue::Call {
            callee: Callee::Extern("mystery".into()),
            args: vec![Operand::binding(x, Span::new(20, 21))],
        },
        Span::new(12, 22),
    );
    b.ret(None, Span::new(29, 30));
    program.define(b.finish());

    let strict = OwnershipEngine::new(EngineConfig::sequential())
        .analyze(&program)
        .unwrap();
    assert_eq!(strict.signature(id).unwrap().params, vec![OwnershipMode::Moved]);

    let lenient = OwnershipEngine::new(
        EngineConfig::sequential().with_default_extern_mode(OwnershipMode::ImmutableBorrow),
    )
    .analyze(&program)
    .unwrap();
    assert_eq!(
        lenient.signature(id).unwrap().params,
        vec![OwnershipMode::ImmutableBorrow]
    );
}
