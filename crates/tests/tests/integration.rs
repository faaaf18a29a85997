//! Integration tests for end-to-end Tarn execution.
//!
//! These tests verify the full pipeline:
//! Assemble → Compile → Run → Call back and forth → Verify
//!
//! Programs are assembled by hand through the fixed-program front end;
//! the reference engine interprets them the way a real virtual machine
//! would, including the caller capability for nested invocations.

use std::thread;
use std::time::{Duration, Instant};

use tarn_foundation::code::OpcodeKind::{
    Call, Constant, GetBuiltin, GetGlobal, GetLocal, Jump, JumpFalsy, Pop, Return, ReturnValue,
    SetGlobal, SetLocal, Suspend,
};
use tarn_foundation::context::Context;
use tarn_foundation::error::{Error, Result};
use tarn_foundation::value::{Map, NativeFunction, Value};
use tarn_reflect::{HostStruct, TypeBuilder};
use tarn_runtime::script::{OUTPUT_VARIABLE, Script};
use tarn_tests::{FixedProgram, builtin_slot, compile_program, compiled, op, simple};

/// Test that an assembled program runs and its writes land in
/// host-visible variables.
#[test]
fn test_entry_program_updates_host_variables() {
    let mut script = Script::new("answer := 41");
    script.add_variable("answer", 0i64);

    // layout: answer=0, $out=1
    let program = FixedProgram {
        instructions: vec![op(Constant, 0), op(SetGlobal, 0), simple(Suspend)],
        constants: vec![Value::Int(41)],
        ..FixedProgram::default()
    };

    let unit = compile_program(&script, program);
    unit.run().unwrap();

    assert!(unit.is_defined("answer"));
    assert!(unit.get("answer").value().equals(&Value::Int(41)));
}

/// Test that host variables seed the global store and that globals
/// declared by the compiler get slots of their own.
#[test]
fn test_host_variables_seed_the_global_store() {
    let mut script = Script::new("copy := greeting");
    script.add_variable("greeting", "hello");

    // layout: greeting=0, $out=1, copy=2
    let program = FixedProgram {
        instructions: vec![op(GetGlobal, 0), op(SetGlobal, 2), simple(Suspend)],
        globals: vec!["copy".into()],
        ..FixedProgram::default()
    };

    let unit = compile_program(&script, program);
    unit.run().unwrap();

    assert!(unit.get("copy").value().equals(&Value::string("hello")));
    let names: Vec<_> = unit
        .get_all()
        .into_iter()
        .map(|v| v.name().to_string())
        .collect();
    assert_eq!(names, ["greeting", "copy"]);
}

/// Test that the host can pull a function out of a finished unit and
/// call it: the result comes back and the output slot is cleared.
#[test]
fn test_host_invokes_a_script_function() {
    let script = Script::new("fn pick(a, b) { b }");

    // layout: $out=0, pick=1
    let program = FixedProgram {
        instructions: vec![op(Constant, 0), op(SetGlobal, 1), simple(Suspend)],
        constants: vec![compiled(vec![op(GetLocal, 1), simple(ReturnValue)], 2, 2)],
        globals: vec!["pick".into()],
        ..FixedProgram::default()
    };

    let unit = compile_program(&script, program);
    unit.run().unwrap();

    let pick = unit.get("pick").into_value();
    assert!(!pick.is_undefined());

    let ctx = Context::background();
    let got = unit
        .call_value(&ctx, &pick, &[Value::Int(1), Value::Int(2)])
        .unwrap();
    assert!(got.equals(&Value::Int(2)));
    assert!(unit.get(OUTPUT_VARIABLE).value().is_undefined());
}

/// Test the other direction: a running program calls a function the
/// host passed in as a variable.
#[test]
fn test_script_invokes_a_host_function() {
    let bump = NativeFunction::plain("bump", |args: &[Value]| -> Result<Value> {
        match args.first() {
            Some(Value::Int(n)) => Ok(Value::Int(n + 1)),
            _ => Err(Error::WrongNumArguments),
        }
    });

    let mut script = Script::new("result := bump(7)");
    script.add_variable("bump", Value::from(bump));

    // layout: bump=0, $out=1, result=2
    let program = FixedProgram {
        instructions: vec![
            op(GetGlobal, 0),
            op(Constant, 0),
            op(Call, 1),
            op(SetGlobal, 2),
            simple(Suspend),
        ],
        constants: vec![Value::Int(7)],
        globals: vec!["result".into()],
        ..FixedProgram::default()
    };

    let unit = compile_program(&script, program);
    unit.run().unwrap();

    assert!(unit.get("result").value().equals(&Value::Int(8)));
}

/// Test that builtins resolve through the builtin table and run with
/// the execution's context.
#[test]
fn test_builtins_resolve_through_the_builtin_table() {
    let script = Script::new(r#"n := len("abcde"); kind := type_name(3)"#);

    // layout: $out=0, n=1, kind=2
    let program = FixedProgram {
        instructions: vec![
            op(GetBuiltin, builtin_slot("len")),
            op(Constant, 0),
            op(Call, 1),
            op(SetGlobal, 1),
            op(GetBuiltin, builtin_slot("type_name")),
            op(Constant, 1),
            op(Call, 1),
            op(SetGlobal, 2),
            simple(Suspend),
        ],
        constants: vec![Value::string("abcde"), Value::Int(3)],
        globals: vec!["n".into(), "kind".into()],
        ..FixedProgram::default()
    };

    let unit = compile_program(&script, program);
    unit.run().unwrap();

    assert!(unit.get("n").value().equals(&Value::Int(5)));
    assert!(unit.get("kind").value().equals(&Value::string("int")));
}

/// Test conditional jumps and local slots: a two-armed select writes
/// a different constant depending on the condition.
#[test]
fn test_branching_selects_by_condition() {
    fn select(condition: Value) -> FixedProgram {
        // layout: $out=0, result=1
        FixedProgram {
            instructions: vec![
                op(Constant, 0),
                op(SetLocal, 0),
                op(GetLocal, 0),
                op(JumpFalsy, 6),
                op(Constant, 1),
                op(Jump, 7),
                op(Constant, 2),
                op(SetGlobal, 1),
                op(Constant, 1),
                simple(Pop),
                simple(Suspend),
            ],
            constants: vec![condition, Value::Int(1), Value::Int(2)],
            locals: 1,
            globals: vec!["result".into()],
        }
    }

    let script = Script::new("result := if cond { 1 } else { 2 }");

    let unit = compile_program(&script, select(Value::Bool(true)));
    unit.run().unwrap();
    assert!(unit.get("result").value().equals(&Value::Int(1)));

    let unit = compile_program(&script, select(Value::Bool(false)));
    unit.run().unwrap();
    assert!(unit.get("result").value().equals(&Value::Int(2)));
}

/// Test that compiled functions call each other inside the engine
/// without bouncing through the host, and that a bare `Return` yields
/// undefined.
#[test]
fn test_script_functions_call_each_other_inline() {
    let script = Script::new("fn apply(f, x) { f(x) } fn ident(x) { x }");

    // layout: $out=0, apply=1, ident=2
    let program = FixedProgram {
        instructions: vec![
            op(Constant, 0),
            op(SetGlobal, 1),
            op(Constant, 1),
            op(SetGlobal, 2),
            simple(Suspend),
        ],
        constants: vec![
            compiled(
                vec![
                    op(GetLocal, 0),
                    op(GetLocal, 1),
                    op(Call, 1),
                    simple(ReturnValue),
                ],
                2,
                2,
            ),
            compiled(vec![op(GetLocal, 0), simple(ReturnValue)], 1, 1),
        ],
        globals: vec!["apply".into(), "ident".into()],
        ..FixedProgram::default()
    };

    let unit = compile_program(&script, program);
    unit.run().unwrap();

    let ctx = Context::background();
    let apply = unit.get("apply").into_value();
    let ident = unit.get("ident").into_value();
    let got = unit
        .call_value(&ctx, &apply, &[ident, Value::Int(9)])
        .unwrap();
    assert!(got.equals(&Value::Int(9)));

    let void = compiled(vec![simple(Return)], 0, 0);
    let got = unit.call_value(&ctx, &void, &[]).unwrap();
    assert!(got.is_undefined());
}

/// Test that a native callee can re-enter the unit through its context
/// while the unit is already running on the same thread.
#[test]
fn test_nested_calls_reenter_the_unit_on_one_thread() {
    let script = Script::new("");
    let program = FixedProgram {
        instructions: vec![simple(Suspend)],
        ..FixedProgram::default()
    };
    let unit = compile_program(&script, program);
    unit.run().unwrap();

    let relay = Value::from(NativeFunction::with_context(
        "relay",
        |ctx: &Context, args: &[Value]| -> Result<Value> {
            let (callee, rest) = args.split_first().ok_or(Error::WrongNumArguments)?;
            ctx.call(callee, rest)
        },
    ));
    let ident = compiled(vec![op(GetLocal, 0), simple(ReturnValue)], 1, 1);

    // relay -> relay -> ident, three dispatches deep on one thread
    let ctx = Context::background();
    let got = unit
        .call_value(&ctx, &relay, &[relay.clone(), ident, Value::Int(5)])
        .unwrap();
    assert!(got.equals(&Value::Int(5)));
}

/// Test that canceling the context interrupts a spinning program.
#[test]
fn test_cancellation_interrupts_a_running_program() {
    let script = Script::new("loop {}");
    let program = FixedProgram {
        instructions: vec![op(Jump, 0)],
        ..FixedProgram::default()
    };
    let unit = compile_program(&script, program);

    let (ctx, cell) = Context::background().cancelable();
    let canceler = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        cell.cancel();
    });

    let err = unit.run_context(&ctx).unwrap_err();
    assert!(matches!(err, Error::Canceled));
    assert!(err.is_cancellation());
    canceler.join().unwrap();
}

/// Test that a deadline expires a spinning program on its own.
#[test]
fn test_deadline_expiry_stops_the_run() {
    let script = Script::new("loop {}");
    let program = FixedProgram {
        instructions: vec![op(Jump, 0)],
        ..FixedProgram::default()
    };
    let unit = compile_program(&script, program);

    let (ctx, _cell) =
        Context::background().with_deadline(Instant::now() + Duration::from_millis(30));
    let err = unit.run_context(&ctx).unwrap_err();
    assert!(matches!(err, Error::DeadlineExceeded));
    assert!(err.is_cancellation());
}

/// Test that a context canceled before the run starts is rejected
/// without executing a single instruction.
#[test]
fn test_canceled_context_is_rejected_before_execution() {
    let script = Script::new("touched := 1");

    // layout: $out=0, touched=1
    let program = FixedProgram {
        instructions: vec![op(Constant, 0), op(SetGlobal, 1), simple(Suspend)],
        constants: vec![Value::Int(1)],
        globals: vec!["touched".into()],
        ..FixedProgram::default()
    };
    let unit = compile_program(&script, program);

    let (ctx, cell) = Context::background().cancelable();
    cell.cancel();

    let err = unit.run_context(&ctx).unwrap_err();
    assert!(matches!(err, Error::Canceled));
    assert!(unit.get("touched").value().is_undefined());
}

/// Test that repeated host calls neither leak state between calls nor
/// disturb the unit.
#[test]
fn test_repeated_calls_stay_stable() {
    let script = Script::new("fn ident(x) { x }");

    // layout: $out=0, ident=1
    let program = FixedProgram {
        instructions: vec![op(Constant, 0), op(SetGlobal, 1), simple(Suspend)],
        constants: vec![compiled(vec![op(GetLocal, 0), simple(ReturnValue)], 1, 1)],
        globals: vec!["ident".into()],
        ..FixedProgram::default()
    };

    let unit = compile_program(&script, program);
    unit.run().unwrap();

    let ctx = Context::background();
    let ident = unit.get("ident").into_value();
    for i in 0..100 {
        let got = unit.call_value(&ctx, &ident, &[Value::Int(i)]).unwrap();
        assert!(got.equals(&Value::Int(i)));
        assert!(unit.get(OUTPUT_VARIABLE).value().is_undefined());
    }
}

/// Test that the allocation budget stops a push-heavy program while a
/// generous one lets it finish.
#[test]
fn test_allocation_budget_limits_execution() {
    fn pushy() -> FixedProgram {
        FixedProgram {
            instructions: vec![
                op(Constant, 0),
                simple(Pop),
                op(Constant, 0),
                simple(Pop),
                op(Constant, 0),
                simple(Pop),
                op(Constant, 0),
                simple(Pop),
                op(Constant, 0),
                simple(Pop),
                simple(Suspend),
            ],
            constants: vec![Value::Int(0)],
            ..FixedProgram::default()
        }
    }

    let mut script = Script::new("a lot of pushes");
    script.set_max_allocs(Some(3));
    let unit = compile_program(&script, pushy());
    let err = unit.run().unwrap_err();
    assert!(err.to_string().contains("allocation budget"));

    let mut script = Script::new("a lot of pushes");
    script.set_max_allocs(Some(100));
    let unit = compile_program(&script, pushy());
    unit.run().unwrap();
}

/// Test the dynamic struct lifecycle end to end: a program defines a
/// template and instantiates it with overrides, then the host reads
/// fields, writes them and calls a bound method.
#[test]
fn test_struct_template_lifecycle() {
    let fields = Map::new();
    fields.insert("x", Value::Int(0));
    fields.insert("y", Value::Int(0));
    let funcs = Map::new();
    funcs.insert(
        "me",
        compiled(vec![op(GetLocal, 0), simple(ReturnValue)], 1, 1),
    );
    let definition = Map::new();
    definition.insert("name", Value::string("Point"));
    definition.insert("fields", Value::Map(fields));
    definition.insert("funcs", Value::Map(funcs));

    let overrides = Map::new();
    overrides.insert("y", Value::Int(9));

    let script = Script::new("template := struct({...}); point := new(template, {y: 9})");

    // layout: $out=0, template=1, point=2
    let program = FixedProgram {
        instructions: vec![
            op(GetBuiltin, builtin_slot("struct")),
            op(Constant, 0),
            op(Call, 1),
            op(SetGlobal, 1),
            op(GetBuiltin, builtin_slot("new")),
            op(GetGlobal, 1),
            op(Constant, 1),
            op(Call, 2),
            op(SetGlobal, 2),
            simple(Suspend),
        ],
        constants: vec![Value::Map(definition), Value::Map(overrides)],
        globals: vec!["template".into(), "point".into()],
        ..FixedProgram::default()
    };

    let unit = compile_program(&script, program);
    unit.run().unwrap();

    let template = unit.get("template").into_value();
    assert_eq!(template.type_name(), "struct");

    let point = unit.get("point").into_value();
    assert_eq!(point.type_name(), "struct-instance");
    let x = Value::string("x");
    let y = Value::string("y");
    assert!(point.index_get(&x).unwrap().equals(&Value::Int(0)));
    assert!(point.index_get(&y).unwrap().equals(&Value::Int(9)));

    point.index_set(&x, Value::Int(4)).unwrap();
    assert!(point.index_get(&x).unwrap().equals(&Value::Int(4)));
    // the template keeps its defaults
    assert!(template.index_get(&x).unwrap().equals(&Value::Int(0)));

    let me = point.index_get(&Value::string("me")).unwrap();
    assert_eq!(me.type_name(), "struct-method");
    let ctx = Context::background();
    let receiver = unit.call_value(&ctx, &me, &[]).unwrap();
    assert!(receiver.index_get(&x).unwrap().equals(&Value::Int(4)));
}

/// Test that a reflected host type crosses the bridge both ways: the
/// program constructs a fresh instance from the type value, and host
/// state wrapped into a variable is mutated by a bound method call.
#[test]
fn test_reflected_types_bridge_host_state() {
    #[derive(Debug, Default, Clone)]
    struct Counter {
        count: i64,
        label: String,
    }

    impl HostStruct for Counter {
        const NAME: &'static str = "Counter";

        fn describe(builder: &mut TypeBuilder<'_, Self>) {
            builder.field("count", |c| c.count, |c, count| c.count = count);
            builder.field("label", |c| c.label.clone(), |c, label: String| {
                c.label = label
            });
            builder.method("bump", |c: &mut Counter| {
                c.count += 1;
                c.count
            });
        }
    }

    let mut script = Script::new("fresh := new(Counter)");
    script.add_reflected(
        "counter",
        Counter {
            count: 3,
            label: "seeded".into(),
        },
    );
    script.add_type::<Counter>("Counter");

    // layout: counter=0, Counter=1, $out=2, fresh=3
    let program = FixedProgram {
        instructions: vec![
            op(GetBuiltin, builtin_slot("new")),
            op(GetGlobal, 1),
            op(Call, 1),
            op(SetGlobal, 3),
            simple(Suspend),
        ],
        globals: vec!["fresh".into()],
        ..FixedProgram::default()
    };

    let unit = compile_program(&script, program);
    unit.run().unwrap();

    let fresh = unit.get("fresh").into_value();
    assert_eq!(fresh.type_name(), "reflect-struct-instance");
    let count = Value::string("count");
    let label = Value::string("label");
    assert!(fresh.index_get(&count).unwrap().equals(&Value::Int(0)));
    fresh.index_set(&label, Value::string("fresh")).unwrap();
    assert!(fresh.index_get(&label).unwrap().equals(&Value::string("fresh")));

    let counter = unit.get("counter").into_value();
    let bump = counter.index_get(&Value::string("bump")).unwrap();
    assert_eq!(bump.type_name(), "reflect-struct-method");

    let ctx = Context::background();
    assert!(unit.call_value(&ctx, &bump, &[]).unwrap().equals(&Value::Int(4)));
    assert!(unit.call_value(&ctx, &bump, &[]).unwrap().equals(&Value::Int(5)));
    assert!(counter.index_get(&count).unwrap().equals(&Value::Int(5)));
}

/// Test that a cloned unit shares the program but none of the state,
/// and that both run concurrently.
#[test]
fn test_cloned_units_run_independently() {
    let script = Script::new("fn ident(x) { x }");

    // layout: $out=0, ident=1, mark=2
    let program = FixedProgram {
        instructions: vec![op(Constant, 0), op(SetGlobal, 1), simple(Suspend)],
        constants: vec![compiled(vec![op(GetLocal, 0), simple(ReturnValue)], 1, 1)],
        globals: vec!["ident".into(), "mark".into()],
        ..FixedProgram::default()
    };

    let unit = compile_program(&script, program);
    unit.run().unwrap();
    let dup = unit.clone_unit();

    unit.set("mark", Value::Int(1)).unwrap();
    dup.set("mark", Value::Int(2)).unwrap();
    assert!(unit.get("mark").value().equals(&Value::Int(1)));
    assert!(dup.get("mark").value().equals(&Value::Int(2)));

    let ident_a = unit.get("ident").into_value();
    let ident_b = dup.get("ident").into_value();
    thread::scope(|scope| {
        scope.spawn(|| {
            let ctx = Context::background();
            for i in 0..50 {
                let got = unit.call_value(&ctx, &ident_a, &[Value::Int(i)]).unwrap();
                assert!(got.equals(&Value::Int(i)));
            }
        });
        scope.spawn(|| {
            let ctx = Context::background();
            for i in 50..100 {
                let got = dup.call_value(&ctx, &ident_b, &[Value::Int(i)]).unwrap();
                assert!(got.equals(&Value::Int(i)));
            }
        });
    });
}

/// Test that the context builtin derives a value-carrying context a
/// program can hand back to the host.
#[test]
fn test_context_values_layer_through_the_context_builtin() {
    let script = Script::new(r#"derived := context(undefined, "lang", "tarn")"#);

    // layout: $out=0, derived=1
    let program = FixedProgram {
        instructions: vec![
            op(GetBuiltin, builtin_slot("context")),
            op(Constant, 0),
            op(Constant, 1),
            op(Constant, 2),
            op(Call, 3),
            op(SetGlobal, 1),
            simple(Suspend),
        ],
        constants: vec![
            Value::Undefined,
            Value::string("lang"),
            Value::string("tarn"),
        ],
        globals: vec!["derived".into()],
        ..FixedProgram::default()
    };

    let unit = compile_program(&script, program);
    unit.run().unwrap();

    let Value::Context(derived) = unit.get("derived").into_value() else {
        panic!("expected a context value");
    };
    let lang = derived.value(&Value::string("lang")).unwrap();
    assert!(lang.equals(&Value::string("tarn")));
}
