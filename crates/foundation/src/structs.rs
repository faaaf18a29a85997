//! Script-defined struct model.
//!
//! A [`Struct`] is a template: named fields with defaults plus a fixed
//! set of methods validated at construction. Calling the template runs
//! the construction protocol and yields a [`StructInstance`] whose
//! fields are a deep copy of the template's, so instances never alias
//! template state.
//!
//! Method dispatch is late-bound through the owning shape: a method
//! value keeps only a weak reference to its shape and rebinding fields
//! for an instance rebuilds the methods against the new shape, which is
//! how `self` inside a method sees instance fields instead of template
//! defaults.

use std::any::Any;
use std::fmt;
use std::sync::{Arc, Weak};

use indexmap::IndexMap;

use crate::context::{expect_context, Context};
use crate::convert;
use crate::error::{Error, Result};
use crate::object::RuntimeObject;
use crate::value::{Map, Value};

/// Reserved index returning the live `{fields, funcs}` view.
pub const INTROSPECTION_KEY: &str = "__map__";
/// Method run by the construction protocol, if present.
pub const CONSTRUCTOR_METHOD: &str = "__constructor";
/// Method that makes instances callable, if present.
pub const CALL_METHOD: &str = "__call";

#[derive(Debug)]
struct Shape {
    name: Option<String>,
    fields: Map,
    funcs: Map,
    methods: IndexMap<String, Arc<StructMethod>>,
}

/// A struct template. Callable: invoking it constructs an instance.
#[derive(Debug, Clone)]
pub struct Struct {
    shape: Arc<Shape>,
}

impl Struct {
    /// Builds a template. Every entry of `funcs` must be callable.
    pub fn new(name: Option<String>, fields: Map, funcs: Map) -> Result<Struct> {
        let funcs_snapshot = funcs.snapshot();
        for (key, value) in &funcs_snapshot {
            if !value.can_call() {
                return Err(Error::InvalidMapIndexValueType {
                    map_name: "funcs".into(),
                    key: key.clone(),
                    expected: "callable".into(),
                    found: value.type_name().into(),
                });
            }
        }
        let shape = Arc::new_cyclic(|weak: &Weak<Shape>| {
            let methods = funcs_snapshot
                .into_iter()
                .map(|(key, func)| {
                    let method = Arc::new(StructMethod {
                        name: key.clone(),
                        func,
                        owner: weak.clone(),
                    });
                    (key, method)
                })
                .collect();
            Shape {
                name,
                fields,
                funcs,
                methods,
            }
        });
        Ok(Struct { shape })
    }

    /// Rebinds the template's methods over a different fields map. Used
    /// by construction so methods resolve `self` against the instance.
    fn rebind(&self, fields: Map) -> Struct {
        let shape = Arc::new_cyclic(|weak: &Weak<Shape>| {
            let methods = self
                .shape
                .methods
                .iter()
                .map(|(key, method)| {
                    let rebound = Arc::new(StructMethod {
                        name: method.name.clone(),
                        func: method.func.clone(),
                        owner: weak.clone(),
                    });
                    (key.clone(), rebound)
                })
                .collect();
            Shape {
                name: self.shape.name.clone(),
                fields,
                funcs: self.shape.funcs.clone(),
                methods,
            }
        });
        Struct { shape }
    }

    pub fn name(&self) -> Option<&str> {
        self.shape.name.as_deref()
    }

    pub fn fields(&self) -> &Map {
        &self.shape.fields
    }

    fn method(&self, name: &str) -> Option<Arc<StructMethod>> {
        self.shape.methods.get(name).cloned()
    }

    fn index_key(&self, index: &Value) -> Result<String> {
        convert::index_key(index).ok_or_else(|| Error::InvalidIndexType {
            expected: "string".into(),
            found: index.type_name().into(),
        })
    }

    fn lookup(&self, key: &str) -> Value {
        if key == INTROSPECTION_KEY {
            let view = Map::new();
            view.insert("fields", Value::Map(self.shape.fields.clone()));
            view.insert("funcs", Value::Map(self.shape.funcs.clone()));
            return Value::Map(view);
        }
        if let Some(method) = self.method(key) {
            return Value::Object(method);
        }
        self.shape.fields.get(key).unwrap_or_default()
    }

    fn render_fields(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(name) = &self.shape.name {
            f.write_str(name)?;
        }
        f.write_str("{")?;
        for (i, (key, value)) in self.shape.fields.snapshot().iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{key}: {value}")?;
        }
        f.write_str("}")
    }

    /// Construction protocol: deep-copy the template fields, rebind the
    /// methods, run `__constructor` when present, wrap the result. A
    /// constructor error aborts construction.
    fn construct(&self, ctx: &Context, args: &[Value]) -> Result<Value> {
        let instance = self.rebind(self.shape.fields.deep_copy());
        if let Some(ctor) = instance.method(CONSTRUCTOR_METHOD) {
            ctor.invoke(ctx, args)?;
        }
        Ok(Value::object(StructInstance { strukt: instance }))
    }
}

impl RuntimeObject for Struct {
    fn type_name(&self) -> &'static str {
        "struct"
    }

    fn render(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.shape.name {
            Some(name) => write!(f, "<struct {name}>"),
            None => f.write_str("<struct>"),
        }
    }

    fn eq_value(&self, other: &Value) -> bool {
        let Value::Object(o) = other else {
            return false;
        };
        match o.as_any().downcast_ref::<Struct>() {
            Some(other) => Arc::ptr_eq(&self.shape, &other.shape),
            None => false,
        }
    }

    fn copied(&self) -> Value {
        Value::object(self.clone())
    }

    fn index_get(&self, index: &Value) -> Result<Value> {
        let key = self.index_key(index)?;
        Ok(self.lookup(&key))
    }

    /// Assignment always targets the fields map. Methods are fixed at
    /// template construction.
    fn index_set(&self, index: &Value, value: Value) -> Result<()> {
        let key = self.index_key(index)?;
        self.shape.fields.insert(key, value);
        Ok(())
    }

    fn entries(&self) -> Option<Vec<(Value, Value)>> {
        Some(
            self.shape
                .fields
                .snapshot()
                .into_iter()
                .map(|(k, v)| (Value::string(&k), v))
                .collect(),
        )
    }

    fn can_call(&self) -> bool {
        true
    }

    fn can_call_with_context(&self) -> bool {
        true
    }

    fn call(&self, args: &[Value]) -> Result<Value> {
        let (ctx, rest) = expect_context(args)?;
        self.construct(&ctx, rest)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A method bound to its owning shape. Calling it prepends the owning
/// struct as the receiver.
#[derive(Debug, Clone)]
pub struct StructMethod {
    name: String,
    func: Value,
    owner: Weak<Shape>,
}

impl StructMethod {
    fn invoke(&self, ctx: &Context, args: &[Value]) -> Result<Value> {
        let shape = self.owner.upgrade().ok_or(Error::StructReleased)?;
        let receiver = Value::object(Struct { shape });
        let mut call_args = Vec::with_capacity(args.len() + 1);
        call_args.push(receiver);
        call_args.extend_from_slice(args);
        ctx.call(&self.func, &call_args)
    }
}

impl RuntimeObject for StructMethod {
    fn type_name(&self) -> &'static str {
        "struct-method"
    }

    fn render(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<struct-method {}>", self.name)
    }

    fn eq_value(&self, other: &Value) -> bool {
        let Value::Object(o) = other else {
            return false;
        };
        match o.as_any().downcast_ref::<StructMethod>() {
            Some(other) => self.name == other.name && Weak::ptr_eq(&self.owner, &other.owner),
            None => false,
        }
    }

    fn copied(&self) -> Value {
        Value::object(self.clone())
    }

    fn can_call(&self) -> bool {
        true
    }

    fn can_call_with_context(&self) -> bool {
        true
    }

    fn call(&self, args: &[Value]) -> Result<Value> {
        let (ctx, rest) = expect_context(args)?;
        self.invoke(&ctx, rest)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A constructed struct. Indexing and iteration go to the underlying
/// struct, calling forwards to the `__call` method when defined.
#[derive(Debug, Clone)]
pub struct StructInstance {
    strukt: Struct,
}

impl StructInstance {
    pub fn strukt(&self) -> &Struct {
        &self.strukt
    }
}

impl RuntimeObject for StructInstance {
    fn type_name(&self) -> &'static str {
        "struct-instance"
    }

    fn render(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.strukt.render_fields(f)
    }

    fn eq_value(&self, other: &Value) -> bool {
        let Value::Object(o) = other else {
            return false;
        };
        match o.as_any().downcast_ref::<StructInstance>() {
            Some(other) => Arc::ptr_eq(&self.strukt.shape, &other.strukt.shape),
            None => false,
        }
    }

    fn copied(&self) -> Value {
        Value::object(self.clone())
    }

    fn index_get(&self, index: &Value) -> Result<Value> {
        self.strukt.index_get(index)
    }

    fn index_set(&self, index: &Value, value: Value) -> Result<()> {
        self.strukt.index_set(index, value)
    }

    fn entries(&self) -> Option<Vec<(Value, Value)>> {
        self.strukt.entries()
    }

    fn can_call(&self) -> bool {
        self.strukt.method(CALL_METHOD).is_some()
    }

    fn can_call_with_context(&self) -> bool {
        self.can_call()
    }

    fn call(&self, args: &[Value]) -> Result<Value> {
        let Some(forward) = self.strukt.method(CALL_METHOD) else {
            return Err(Error::NotCallable {
                type_name: self.type_name().into(),
            });
        };
        let (ctx, rest) = expect_context(args)?;
        forward.invoke(&ctx, rest)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
