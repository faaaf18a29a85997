//! Value utility builtins: introspection, conversion and container
//! editing.

use linkme::distributed_slice;

use tarn_foundation::context::Context;
use tarn_foundation::convert;
use tarn_foundation::error::{Error, Result};
use tarn_foundation::value::Value;

use crate::{want_between, want_exact, BuiltinDescriptor, BUILTINS};

fn type_name(_ctx: &Context, args: &[Value]) -> Result<Value> {
    want_exact(args, 1)?;
    Ok(Value::string(args[0].type_name()))
}

#[distributed_slice(BUILTINS)]
static BUILTIN_TYPE_NAME: BuiltinDescriptor = BuiltinDescriptor {
    name: "type_name",
    signature: "type_name(value) -> string",
    doc: "Script-facing type name of a value",
    func: type_name,
};

/// Element count for arrays and maps, byte length for strings.
fn len(_ctx: &Context, args: &[Value]) -> Result<Value> {
    want_exact(args, 1)?;
    let n = match &args[0] {
        Value::Array(a) => a.len(),
        Value::Map(m) => m.len(),
        Value::Str(s) => s.len(),
        other => {
            return Err(Error::InvalidArgumentType {
                name: "first".into(),
                expected: "array|map|string".into(),
                found: other.type_name().into(),
            });
        }
    };
    Ok(Value::Int(n as i64))
}

#[distributed_slice(BUILTINS)]
static BUILTIN_LEN: BuiltinDescriptor = BuiltinDescriptor {
    name: "len",
    signature: "len(value) -> int",
    doc: "Number of elements in an array or map, bytes in a string",
    func: len,
};

fn copy(_ctx: &Context, args: &[Value]) -> Result<Value> {
    want_exact(args, 1)?;
    Ok(args[0].deep_copy())
}

#[distributed_slice(BUILTINS)]
static BUILTIN_COPY: BuiltinDescriptor = BuiltinDescriptor {
    name: "copy",
    signature: "copy(value) -> value",
    doc: "Deep copy of a value",
    func: copy,
};

/// Returns a new array; the input array is left untouched.
fn append(_ctx: &Context, args: &[Value]) -> Result<Value> {
    if args.is_empty() {
        return Err(Error::WrongNumArguments);
    }
    let Value::Array(a) = &args[0] else {
        return Err(Error::InvalidArgumentType {
            name: "first".into(),
            expected: "array".into(),
            found: args[0].type_name().into(),
        });
    };
    let mut out = a.snapshot();
    out.extend_from_slice(&args[1..]);
    Ok(Value::from(out))
}

#[distributed_slice(BUILTINS)]
static BUILTIN_APPEND: BuiltinDescriptor = BuiltinDescriptor {
    name: "append",
    signature: "append(array, values...) -> array",
    doc: "New array with the given values appended",
    func: append,
};

fn delete(_ctx: &Context, args: &[Value]) -> Result<Value> {
    want_exact(args, 2)?;
    let Value::Map(m) = &args[0] else {
        return Err(Error::InvalidArgumentType {
            name: "first".into(),
            expected: "map".into(),
            found: args[0].type_name().into(),
        });
    };
    let key = convert::index_key(&args[1]).ok_or_else(|| Error::InvalidArgumentType {
        name: "second".into(),
        expected: "string".into(),
        found: args[1].type_name().into(),
    })?;
    m.remove(&key);
    Ok(Value::Undefined)
}

#[distributed_slice(BUILTINS)]
static BUILTIN_DELETE: BuiltinDescriptor = BuiltinDescriptor {
    name: "delete",
    signature: "delete(map, key) -> undefined",
    doc: "Removes a key from a map",
    func: delete,
};

/// Removes `[start, stop)` from the array in place, inserting any
/// further arguments at the cut. Returns the removed elements. Bounds
/// are validated before anything is touched.
fn splice(_ctx: &Context, args: &[Value]) -> Result<Value> {
    if args.is_empty() {
        return Err(Error::WrongNumArguments);
    }
    let Value::Array(a) = &args[0] else {
        return Err(Error::InvalidArgumentType {
            name: "first".into(),
            expected: "array".into(),
            found: args[0].type_name().into(),
        });
    };
    let start_arg = match args.get(1) {
        None => None,
        Some(Value::Int(i)) => Some(*i),
        Some(other) => {
            return Err(Error::InvalidArgumentType {
                name: "second".into(),
                expected: "int".into(),
                found: other.type_name().into(),
            });
        }
    };
    let stop_arg = match args.get(2) {
        None => None,
        Some(Value::Int(i)) => Some(*i),
        Some(other) => {
            return Err(Error::InvalidArgumentType {
                name: "third".into(),
                expected: "int".into(),
                found: other.type_name().into(),
            });
        }
    };
    let items: Vec<Value> = args.get(3..).unwrap_or(&[]).to_vec();

    let removed = a.update(|elements| {
        let len = elements.len() as i64;
        let start = start_arg.unwrap_or(0);
        let stop = stop_arg.unwrap_or(len);
        if start < 0 || start > len {
            return Err(Error::IndexOutOfBounds {
                index: start,
                len: len as usize,
            });
        }
        if stop < start || stop > len {
            return Err(Error::IndexOutOfBounds {
                index: stop,
                len: len as usize,
            });
        }
        Ok(elements
            .splice(start as usize..stop as usize, items)
            .collect::<Vec<_>>())
    })?;
    Ok(Value::from(removed))
}

#[distributed_slice(BUILTINS)]
static BUILTIN_SPLICE: BuiltinDescriptor = BuiltinDescriptor {
    name: "splice",
    signature: "splice(array[, start[, stop]], values...) -> array",
    doc: "Removes a range in place, inserts the given values, returns the removed elements",
    func: splice,
};

fn string(_ctx: &Context, args: &[Value]) -> Result<Value> {
    want_between(args, 1, 2)?;
    match convert::to_string_value(&args[0]) {
        Some(s) => Ok(Value::string(&s)),
        None => Ok(args.get(1).cloned().unwrap_or_default()),
    }
}

#[distributed_slice(BUILTINS)]
static BUILTIN_STRING: BuiltinDescriptor = BuiltinDescriptor {
    name: "string",
    signature: "string(value[, default]) -> string",
    doc: "String rendering of a value, or the default when undefined",
    func: string,
};

fn int(_ctx: &Context, args: &[Value]) -> Result<Value> {
    want_between(args, 1, 2)?;
    match convert::to_i64(&args[0]) {
        Some(i) => Ok(Value::Int(i)),
        None => Ok(args.get(1).cloned().unwrap_or_default()),
    }
}

#[distributed_slice(BUILTINS)]
static BUILTIN_INT: BuiltinDescriptor = BuiltinDescriptor {
    name: "int",
    signature: "int(value[, default]) -> int",
    doc: "Integer reading of a value, or the default when it has none",
    func: int,
};

fn float(_ctx: &Context, args: &[Value]) -> Result<Value> {
    want_between(args, 1, 2)?;
    match convert::to_f64(&args[0]) {
        Some(f) => Ok(Value::Float(f)),
        None => Ok(args.get(1).cloned().unwrap_or_default()),
    }
}

#[distributed_slice(BUILTINS)]
static BUILTIN_FLOAT: BuiltinDescriptor = BuiltinDescriptor {
    name: "float",
    signature: "float(value[, default]) -> float",
    doc: "Float reading of a value, or the default when it has none",
    func: float,
};

fn bool_(_ctx: &Context, args: &[Value]) -> Result<Value> {
    want_exact(args, 1)?;
    Ok(Value::Bool(convert::to_bool(&args[0])))
}

#[distributed_slice(BUILTINS)]
static BUILTIN_BOOL: BuiltinDescriptor = BuiltinDescriptor {
    name: "bool",
    signature: "bool(value) -> bool",
    doc: "Truthiness of a value",
    func: bool_,
};

fn is_undefined(_ctx: &Context, args: &[Value]) -> Result<Value> {
    want_exact(args, 1)?;
    Ok(Value::Bool(args[0].is_undefined()))
}

#[distributed_slice(BUILTINS)]
static BUILTIN_IS_UNDEFINED: BuiltinDescriptor = BuiltinDescriptor {
    name: "is_undefined",
    signature: "is_undefined(value) -> bool",
    doc: "True when the value is undefined",
    func: is_undefined,
};

fn is_function(_ctx: &Context, args: &[Value]) -> Result<Value> {
    want_exact(args, 1)?;
    let yes = matches!(&args[0], Value::Function(_) | Value::Compiled(_));
    Ok(Value::Bool(yes))
}

#[distributed_slice(BUILTINS)]
static BUILTIN_IS_FUNCTION: BuiltinDescriptor = BuiltinDescriptor {
    name: "is_function",
    signature: "is_function(value) -> bool",
    doc: "True for native and compiled functions",
    func: is_function,
};

fn is_callable(_ctx: &Context, args: &[Value]) -> Result<Value> {
    want_exact(args, 1)?;
    Ok(Value::Bool(args[0].can_call()))
}

#[distributed_slice(BUILTINS)]
static BUILTIN_IS_CALLABLE: BuiltinDescriptor = BuiltinDescriptor {
    name: "is_callable",
    signature: "is_callable(value) -> bool",
    doc: "True when the value answers the call capability",
    func: is_callable,
};

fn is_iterable(_ctx: &Context, args: &[Value]) -> Result<Value> {
    want_exact(args, 1)?;
    Ok(Value::Bool(args[0].can_iterate()))
}

#[distributed_slice(BUILTINS)]
static BUILTIN_IS_ITERABLE: BuiltinDescriptor = BuiltinDescriptor {
    name: "is_iterable",
    signature: "is_iterable(value) -> bool",
    doc: "True when the value can be iterated",
    func: is_iterable,
};
