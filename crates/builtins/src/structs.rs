//! Struct definition and instantiation builtins.

use linkme::distributed_slice;

use tarn_foundation::context::Context;
use tarn_foundation::error::{Error, Result};
use tarn_foundation::structs::Struct;
use tarn_foundation::value::{Map, Value};
use tarn_reflect::ReflectedType;

use crate::{want_exact, BuiltinDescriptor, BUILTINS};

fn sub_map(definition: &Map, key: &str) -> Result<Map> {
    match definition.get(key) {
        None | Some(Value::Undefined) => Ok(Map::new()),
        Some(Value::Map(m)) => Ok(m),
        Some(other) => Err(Error::InvalidMapIndexValueType {
            map_name: "definition".into(),
            key: key.into(),
            expected: "map".into(),
            found: other.type_name().into(),
        }),
    }
}

/// Builds a struct template from a definition map with optional
/// `name`, `fields` and `funcs` entries. The template keeps the given
/// maps live, it does not copy them.
fn struct_(_ctx: &Context, args: &[Value]) -> Result<Value> {
    want_exact(args, 1)?;
    let Value::Map(definition) = &args[0] else {
        return Err(Error::InvalidArgumentType {
            name: "first".into(),
            expected: "map".into(),
            found: args[0].type_name().into(),
        });
    };

    let name = match definition.get("name") {
        None | Some(Value::Undefined) => None,
        Some(Value::Str(s)) => Some(s.to_string()),
        Some(other) => {
            return Err(Error::InvalidMapIndexValueType {
                map_name: "definition".into(),
                key: "name".into(),
                expected: "string".into(),
                found: other.type_name().into(),
            });
        }
    };
    let fields = sub_map(definition, "fields")?;
    let funcs = sub_map(definition, "funcs")?;

    Ok(Value::object(Struct::new(name, fields, funcs)?))
}

#[distributed_slice(BUILTINS)]
static BUILTIN_STRUCT: BuiltinDescriptor = BuiltinDescriptor {
    name: "struct",
    signature: "struct({name?, fields?, funcs?}) -> struct",
    doc: "Defines a struct template with field defaults and methods",
    func: struct_,
};

/// Instantiates a struct template or a reflected type. An optional map
/// as second argument supplies field overrides, applied after the
/// constructor ran; remaining arguments are passed to the constructor.
fn new(ctx: &Context, args: &[Value]) -> Result<Value> {
    let Some(target) = args.first() else {
        return Err(Error::WrongNumArguments);
    };
    let template = match target {
        Value::Object(o) if o.as_any().is::<Struct>() || o.as_any().is::<ReflectedType>() => o,
        _ => {
            return Err(Error::InvalidArgumentType {
                name: "first".into(),
                expected: "struct|reflect-struct".into(),
                found: target.type_name().into(),
            });
        }
    };

    let (overrides, ctor_args) = match args.get(1) {
        Some(Value::Map(m)) => (Some(m.clone()), &args[2..]),
        _ => (None, &args[1..]),
    };

    let mut call_args = Vec::with_capacity(ctor_args.len() + 1);
    call_args.push(Value::Context(ctx.clone()));
    call_args.extend_from_slice(ctor_args);
    let instance = template.call(&call_args)?;

    if let Some(overrides) = overrides {
        for (key, value) in overrides.snapshot() {
            instance.index_set(&Value::string(&key), value)?;
        }
    }
    Ok(instance)
}

#[distributed_slice(BUILTINS)]
static BUILTIN_NEW: BuiltinDescriptor = BuiltinDescriptor {
    name: "new",
    signature: "new(type[, overrides], ctor_args...) -> instance",
    doc: "Constructs an instance of a struct template or reflected type",
    func: new,
};
