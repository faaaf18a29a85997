//! Script value model.
//!
//! `Value` is the currency of the whole runtime: globals, constants, call
//! arguments and struct fields are all values. Values are cheap to clone
//! (scalars are copied, everything else is an `Arc` handle) and are
//! `Send + Sync` so a unit's globals can be shared with an execution
//! running on another thread.
//!
//! # Design
//!
//! The enum is closed over the primitive shapes the core needs, plus one
//! open variant: `Value::Object` carries any [`RuntimeObject`], which is
//! how the struct model and the reflection bridge plug their own types
//! into indexing, iteration and calling without this module knowing them.
//!
//! Mutation of arrays and maps goes through interior mutability; reads
//! that need a consistent view take a snapshot instead of holding a lock
//! across user code.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;

use indexmap::IndexMap;

use crate::code::CompiledFunction;
use crate::context::Context;
use crate::convert;
use crate::error::{Error, Result};
use crate::object::RuntimeObject;

/// Ordered string-keyed mapping with interior mutability.
#[derive(Debug, Clone, Default)]
pub struct Map {
    entries: Arc<Mutex<IndexMap<String, Value>>>,
}

impl Map {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: IndexMap<String, Value>) -> Self {
        Map {
            entries: Arc::new(Mutex::new(entries)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, IndexMap<String, Value>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.lock().get(key).cloned()
    }

    pub fn insert(&self, key: impl Into<String>, value: Value) {
        self.lock().insert(key.into(), value);
    }

    /// Removes a key, preserving the order of the remaining entries.
    pub fn remove(&self, key: &str) -> Option<Value> {
        self.lock().shift_remove(key)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.lock().contains_key(key)
    }

    /// Consistent point-in-time view of the entries.
    pub fn snapshot(&self) -> Vec<(String, Value)> {
        self.lock()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn keys(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    /// Runs `f` with exclusive access to the underlying entries.
    pub fn update<R>(&self, f: impl FnOnce(&mut IndexMap<String, Value>) -> R) -> R {
        f(&mut self.lock())
    }

    /// Recursive copy: every value is deep-copied into a fresh map.
    pub fn deep_copy(&self) -> Map {
        let copied = self
            .lock()
            .iter()
            .map(|(k, v)| (k.clone(), v.deep_copy()))
            .collect();
        Map::from_entries(copied)
    }

    /// Identity: two handles over the same underlying storage.
    pub fn ptr_eq(&self, other: &Map) -> bool {
        Arc::ptr_eq(&self.entries, &other.entries)
    }

    pub fn equals(&self, other: &Map) -> bool {
        if self.ptr_eq(other) {
            return true;
        }
        let a = self.snapshot();
        let b = other.snapshot();
        a.len() == b.len()
            && a.iter()
                .zip(b.iter())
                .all(|((ak, av), (bk, bv))| ak == bk && av.equals(bv))
    }
}

/// Growable value sequence with interior mutability.
#[derive(Debug, Clone, Default)]
pub struct Array {
    elements: Arc<Mutex<Vec<Value>>>,
}

impl Array {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_values(values: Vec<Value>) -> Self {
        Array {
            elements: Arc::new(Mutex::new(values)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Value>> {
        self.elements.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, index: usize) -> Option<Value> {
        self.lock().get(index).cloned()
    }

    /// Replaces an existing element; false when the index is out of range.
    pub fn set(&self, index: usize, value: Value) -> bool {
        match self.lock().get_mut(index) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    pub fn push(&self, value: Value) {
        self.lock().push(value);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn snapshot(&self) -> Vec<Value> {
        self.lock().clone()
    }

    /// Runs `f` with exclusive access to the underlying elements.
    pub fn update<R>(&self, f: impl FnOnce(&mut Vec<Value>) -> R) -> R {
        f(&mut self.lock())
    }

    pub fn deep_copy(&self) -> Array {
        let copied = self.lock().iter().map(Value::deep_copy).collect();
        Array::from_values(copied)
    }

    pub fn ptr_eq(&self, other: &Array) -> bool {
        Arc::ptr_eq(&self.elements, &other.elements)
    }

    pub fn equals(&self, other: &Array) -> bool {
        if self.ptr_eq(other) {
            return true;
        }
        let a = self.snapshot();
        let b = other.snapshot();
        a.len() == b.len() && a.iter().zip(b.iter()).all(|(av, bv)| av.equals(bv))
    }
}

pub type PlainFn = Arc<dyn Fn(&[Value]) -> Result<Value> + Send + Sync>;
pub type ContextFn = Arc<dyn Fn(&Context, &[Value]) -> Result<Value> + Send + Sync>;

/// The two shapes a native function comes in, matching the first two
/// arms of the trampoline's dispatch policy.
#[derive(Clone)]
pub enum NativeImpl {
    /// Needs only its arguments.
    Plain(PlainFn),
    /// Additionally takes the calling [`Context`] as an explicit leading
    /// parameter.
    WithContext(ContextFn),
}

impl fmt::Debug for NativeImpl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NativeImpl::Plain(_) => f.write_str("Plain"),
            NativeImpl::WithContext(_) => f.write_str("WithContext"),
        }
    }
}

/// A host function exposed to scripts as a first-class value.
#[derive(Clone, Debug)]
pub struct NativeFunction {
    pub name: String,
    pub implementation: NativeImpl,
}

impl NativeFunction {
    pub fn plain(
        name: impl Into<String>,
        f: impl Fn(&[Value]) -> Result<Value> + Send + Sync + 'static,
    ) -> Self {
        NativeFunction {
            name: name.into(),
            implementation: NativeImpl::Plain(Arc::new(f)),
        }
    }

    pub fn with_context(
        name: impl Into<String>,
        f: impl Fn(&Context, &[Value]) -> Result<Value> + Send + Sync + 'static,
    ) -> Self {
        NativeFunction {
            name: name.into(),
            implementation: NativeImpl::WithContext(Arc::new(f)),
        }
    }
}

/// A script-visible value.
#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Undefined,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Arc<str>),
    Time(SystemTime),
    Array(Array),
    Map(Map),
    Function(Arc<NativeFunction>),
    Compiled(Arc<CompiledFunction>),
    Context(Context),
    Object(Arc<dyn RuntimeObject>),
}

impl Value {
    pub fn string(s: impl AsRef<str>) -> Value {
        Value::Str(Arc::from(s.as_ref()))
    }

    pub fn object(o: impl RuntimeObject + 'static) -> Value {
        Value::Object(Arc::new(o))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::Time(_) => "time",
            Value::Array(_) => "array",
            Value::Map(_) => "map",
            Value::Function(_) => "user-function",
            Value::Compiled(_) => "compiled-function",
            Value::Context(_) => "context",
            Value::Object(o) => o.type_name(),
        }
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    pub fn is_falsy(&self) -> bool {
        match self {
            Value::Undefined => true,
            Value::Bool(b) => !b,
            Value::Int(i) => *i == 0,
            Value::Float(f) => f.is_nan(),
            Value::Str(s) => s.is_empty(),
            Value::Time(t) => *t == SystemTime::UNIX_EPOCH,
            Value::Array(a) => a.is_empty(),
            Value::Map(m) => m.is_empty(),
            Value::Function(_) | Value::Compiled(_) | Value::Context(_) => false,
            Value::Object(o) => o.is_falsy(),
        }
    }

    /// Value equality. Scalars compare by value, collections compare
    /// deeply, functions and objects compare by identity unless the
    /// object overrides it.
    pub fn equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Time(a), Value::Time(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a.equals(b),
            (Value::Map(a), Value::Map(b)) => a.equals(b),
            (Value::Function(a), Value::Function(b)) => Arc::ptr_eq(a, b),
            (Value::Compiled(a), Value::Compiled(b)) => Arc::ptr_eq(a, b),
            (Value::Context(a), Value::Context(b)) => a.same(b),
            (Value::Object(o), _) => o.eq_value(other),
            (_, Value::Object(o)) => o.eq_value(self),
            _ => false,
        }
    }

    /// Deep copy: arrays and maps are copied recursively, objects decide
    /// their own copy policy, everything else is a plain clone.
    pub fn deep_copy(&self) -> Value {
        match self {
            Value::Array(a) => Value::Array(a.deep_copy()),
            Value::Map(m) => Value::Map(m.deep_copy()),
            Value::Object(o) => o.copied(),
            other => other.clone(),
        }
    }

    pub fn can_call(&self) -> bool {
        match self {
            Value::Function(_) | Value::Compiled(_) => true,
            Value::Object(o) => o.can_call(),
            _ => false,
        }
    }

    pub fn can_call_with_context(&self) -> bool {
        match self {
            Value::Function(f) => matches!(f.implementation, NativeImpl::WithContext(_)),
            Value::Object(o) => o.can_call_with_context(),
            _ => false,
        }
    }

    pub fn can_iterate(&self) -> bool {
        match self {
            Value::Array(_) | Value::Map(_) => true,
            Value::Object(o) => o.entries().is_some(),
            _ => false,
        }
    }

    pub fn index_get(&self, index: &Value) -> Result<Value> {
        match self {
            Value::Array(a) => {
                let i = match index {
                    Value::Int(i) => *i,
                    other => {
                        return Err(Error::InvalidIndexType {
                            expected: "int".into(),
                            found: other.type_name().into(),
                        });
                    }
                };
                let len = a.len();
                if i < 0 || i as usize >= len {
                    return Err(Error::IndexOutOfBounds { index: i, len });
                }
                Ok(a.get(i as usize).unwrap_or_default())
            }
            Value::Map(m) => {
                let key = convert::index_key(index).ok_or_else(|| Error::InvalidIndexType {
                    expected: "string".into(),
                    found: index.type_name().into(),
                })?;
                Ok(m.get(&key).unwrap_or_default())
            }
            Value::Object(o) => o.index_get(index),
            other => Err(Error::NotIndexable {
                type_name: other.type_name().into(),
            }),
        }
    }

    pub fn index_set(&self, index: &Value, value: Value) -> Result<()> {
        match self {
            Value::Array(a) => {
                let i = match index {
                    Value::Int(i) => *i,
                    other => {
                        return Err(Error::InvalidIndexType {
                            expected: "int".into(),
                            found: other.type_name().into(),
                        });
                    }
                };
                let len = a.len();
                if i < 0 || !a.set(i as usize, value) {
                    return Err(Error::IndexOutOfBounds { index: i, len });
                }
                Ok(())
            }
            Value::Map(m) => {
                let key = convert::index_key(index).ok_or_else(|| Error::InvalidIndexType {
                    expected: "string".into(),
                    found: index.type_name().into(),
                })?;
                m.insert(key, value);
                Ok(())
            }
            Value::Object(o) => o.index_set(index, value),
            other => Err(Error::NotIndexAssignable {
                type_name: other.type_name().into(),
            }),
        }
    }

    /// Iteration snapshot: arrays yield `(index, element)`, maps yield
    /// `(key, value)`, objects decide for themselves. `None` means the
    /// value is not iterable.
    pub fn entries(&self) -> Option<Vec<(Value, Value)>> {
        match self {
            Value::Array(a) => Some(
                a.snapshot()
                    .into_iter()
                    .enumerate()
                    .map(|(i, v)| (Value::Int(i as i64), v))
                    .collect(),
            ),
            Value::Map(m) => Some(
                m.snapshot()
                    .into_iter()
                    .map(|(k, v)| (Value::string(&k), v))
                    .collect(),
            ),
            Value::Object(o) => o.entries(),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => f.write_str("<undefined>"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Str(s) => write!(f, "{s:?}"),
            Value::Time(t) => match t.duration_since(SystemTime::UNIX_EPOCH) {
                Ok(d) => write!(f, "time({}s)", d.as_secs()),
                Err(e) => write!(f, "time(-{}s)", e.duration().as_secs()),
            },
            Value::Array(a) => {
                f.write_str("[")?;
                for (i, v) in a.snapshot().iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{v}")?;
                }
                f.write_str("]")
            }
            Value::Map(m) => {
                f.write_str("{")?;
                for (i, (k, v)) in m.snapshot().iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                f.write_str("}")
            }
            Value::Function(nf) => {
                if nf.name.is_empty() {
                    f.write_str("<user-function>")
                } else {
                    write!(f, "<user-function {}>", nf.name)
                }
            }
            Value::Compiled(_) => f.write_str("<compiled-function>"),
            Value::Context(_) => f.write_str("<context>"),
            Value::Object(o) => o.render(f),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::string(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::string(&v)
    }
}

impl From<SystemTime> for Value {
    fn from(v: SystemTime) -> Self {
        Value::Time(v)
    }
}

impl From<NativeFunction> for Value {
    fn from(v: NativeFunction) -> Self {
        Value::Function(Arc::new(v))
    }
}

impl From<Map> for Value {
    fn from(v: Map) -> Self {
        Value::Map(v)
    }
}

impl From<Array> for Value {
    fn from(v: Array) -> Self {
        Value::Array(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::Array(Array::from_values(v))
    }
}
