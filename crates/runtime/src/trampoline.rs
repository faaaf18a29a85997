//! Uniform synchronous invocation of callable values.

use std::sync::Arc;

use tracing::trace;

use tarn_foundation::context::Context;
use tarn_foundation::error::{Error, Result};
use tarn_foundation::value::{NativeImpl, Value};

use crate::bytecode::EntryPatch;
use crate::unit::{Unit, settle};

/// Dispatches one call by callee kind. Native functions run in place;
/// compiled functions go through the entry-overlay protocol below.
/// The unit is injected as the context's caller capability first, so
/// whatever the callee invokes in turn recurses through here.
pub(crate) fn dispatch(
    unit: &Unit,
    ctx: &Context,
    callee: &Value,
    args: &[Value],
) -> Result<Value> {
    let ctx = unit.ensure_caller(ctx);
    match callee {
        Value::Undefined => Err(Error::NilCallable),
        Value::Function(function) => match &function.implementation {
            NativeImpl::Plain(call) => call(args),
            NativeImpl::WithContext(call) => call(&ctx, args),
        },
        Value::Compiled(function) => {
            call_compiled(unit, &ctx, Value::Compiled(Arc::clone(function)), args)
        }
        Value::Object(object) if object.can_call_with_context() => {
            let mut forwarded = Vec::with_capacity(args.len() + 1);
            forwarded.push(Value::Context(ctx.clone()));
            forwarded.extend_from_slice(args);
            object.call(&forwarded)
        }
        Value::Object(object) if object.can_call() => object.call(args),
        other => Err(Error::NotCallable {
            type_name: other.type_name().into(),
        }),
    }
}

/// Runs a compiled function on the unit by overlaying a synthetic
/// entry over the shared program: push the callee and its arguments,
/// call, store the result in the reserved output slot, halt. The
/// overlay is dropped with the plan; the base pool is never touched.
fn call_compiled(unit: &Unit, ctx: &Context, callee: Value, args: &[Value]) -> Result<Value> {
    let patch = EntryPatch::call_sequence(
        unit.bytecode.constants().len(),
        callee,
        args,
        unit.out_slot as u32,
    );

    let _guard = unit.lock.acquire();
    trace!(args = args.len(), "trampoline call");
    let mut execution = unit
        .engine
        .new_execution(unit.plan(Some(patch)), unit.globals.clone())?;
    settle(ctx, execution.run(ctx))?;

    let result = unit.globals.get(unit.out_slot)?;
    unit.globals.set(unit.out_slot, Value::Undefined)?;
    Ok(result)
}
