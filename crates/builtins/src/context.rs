//! Context composition builtins.
//!
//! Scripts never mutate a context: every builtin here derives a new one
//! from a base and returns it. The base is the first argument when
//! given (`undefined` means start from a background context), otherwise
//! the ambient context of the call.

use std::time::{Duration, Instant, SystemTime};

use linkme::distributed_slice;

use tarn_foundation::context::Context;
use tarn_foundation::convert::{self, ordinal};
use tarn_foundation::error::{Error, Result};
use tarn_foundation::value::Value;

use crate::{want_between, want_exact, BuiltinDescriptor, BUILTINS};

fn base_context(arg: &Value) -> Result<Context> {
    match arg {
        Value::Context(ctx) => Ok(ctx.clone()),
        Value::Undefined => Ok(Context::background()),
        other => Err(Error::InvalidArgumentType {
            name: "first".into(),
            expected: "context|undefined".into(),
            found: other.type_name().into(),
        }),
    }
}

fn seconds_to_duration(value: &Value, index: usize) -> Result<Duration> {
    let secs = match value {
        Value::Int(i) => *i as f64,
        Value::Float(f) => *f,
        other => {
            return Err(Error::InvalidArgumentType {
                name: ordinal(index),
                expected: "int|float".into(),
                found: other.type_name().into(),
            });
        }
    };
    if !secs.is_finite() || secs <= 0.0 {
        return Ok(Duration::ZERO);
    }
    Ok(Duration::from_secs_f64(secs.min(1.0e9)))
}

/// Absolute wall-clock times become engine deadlines relative to now;
/// a time already in the past yields an immediately expired deadline.
fn time_to_deadline(time: SystemTime) -> Instant {
    let now = Instant::now();
    match time.duration_since(SystemTime::now()) {
        Ok(ahead) => now + ahead,
        Err(_) => now,
    }
}

/// With no arguments, the ambient context. Otherwise layers the given
/// key/value pairs over a copy of the base.
fn context(ctx: &Context, args: &[Value]) -> Result<Value> {
    if args.is_empty() {
        return Ok(Value::Context(ctx.clone()));
    }
    if args.len() % 2 == 0 {
        // base plus pairs means an odd total
        return Err(Error::WrongNumArguments);
    }
    let mut derived = base_context(&args[0])?;
    for pair in args[1..].chunks(2) {
        derived = derived.with_value(pair[0].clone(), pair[1].clone());
    }
    Ok(Value::Context(derived))
}

#[distributed_slice(BUILTINS)]
static BUILTIN_CONTEXT: BuiltinDescriptor = BuiltinDescriptor {
    name: "context",
    signature: "context([ctx|undefined], key, value, ...) -> context",
    doc: "Ambient context, or a copy of the base carrying the given key/value pairs",
    func: context,
};

fn context_timeout(_ctx: &Context, args: &[Value]) -> Result<Value> {
    want_exact(args, 2)?;
    let base = base_context(&args[0])?;
    let timeout = seconds_to_duration(&args[1], 1)?;
    let (derived, _cell) = base.with_deadline(Instant::now() + timeout);
    Ok(Value::Context(derived))
}

#[distributed_slice(BUILTINS)]
static BUILTIN_CONTEXT_TIMEOUT: BuiltinDescriptor = BuiltinDescriptor {
    name: "context_timeout",
    signature: "context_timeout(ctx, seconds) -> context",
    doc: "Cancelable copy of the base that expires after the given seconds",
    func: context_timeout,
};

fn context_deadline(_ctx: &Context, args: &[Value]) -> Result<Value> {
    want_exact(args, 2)?;
    let base = base_context(&args[0])?;
    let time = convert::to_time(&args[1]).ok_or_else(|| Error::InvalidArgumentType {
        name: "second".into(),
        expected: "time".into(),
        found: args[1].type_name().into(),
    })?;
    let (derived, _cell) = base.with_deadline(time_to_deadline(time));
    Ok(Value::Context(derived))
}

#[distributed_slice(BUILTINS)]
static BUILTIN_CONTEXT_DEADLINE: BuiltinDescriptor = BuiltinDescriptor {
    name: "context_deadline",
    signature: "context_deadline(ctx, time) -> context",
    doc: "Cancelable copy of the base that expires at the given time",
    func: context_deadline,
};

/// Derives a manually cancelable context. The cancel function is
/// attached to the returned value only, `context_cancel` on any other
/// derivation fails.
fn context_canceler(ctx: &Context, args: &[Value]) -> Result<Value> {
    want_between(args, 0, 1)?;
    let base = match args.first() {
        None => ctx.clone(),
        Some(arg) => base_context(arg)?,
    };
    let (derived, _cell) = base.cancelable();
    Ok(Value::Context(derived))
}

#[distributed_slice(BUILTINS)]
static BUILTIN_CONTEXT_CANCELER: BuiltinDescriptor = BuiltinDescriptor {
    name: "context_canceler",
    signature: "context_canceler([ctx]) -> context",
    doc: "Cancelable copy of the base (ambient context when omitted)",
    func: context_canceler,
};

fn context_cancel(_ctx: &Context, args: &[Value]) -> Result<Value> {
    want_exact(args, 1)?;
    let Value::Context(target) = &args[0] else {
        return Err(Error::InvalidArgumentType {
            name: "first".into(),
            expected: "context".into(),
            found: args[0].type_name().into(),
        });
    };
    let cell = target.cancel_handle().ok_or(Error::NotCancelable)?;
    cell.cancel();
    Ok(Value::Undefined)
}

#[distributed_slice(BUILTINS)]
static BUILTIN_CONTEXT_CANCEL: BuiltinDescriptor = BuiltinDescriptor {
    name: "context_cancel",
    signature: "context_cancel(ctx) -> undefined",
    doc: "Fires the cancel function attached to the given context",
    func: context_cancel,
};
