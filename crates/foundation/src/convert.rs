//! Conversions between script values and host types.
//!
//! Two layers live here. The lenient helpers (`to_i64`, `to_bool`, ...)
//! implement the coercion rules script-side conversion builtins expose.
//! The [`FromValue`] / [`IntoValue`] traits are the strict layer used at
//! the host boundary, where a mismatch is a typed error rather than a
//! silent coercion.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use crate::value::{Array, Value};

/// Lenient conversion to an integer. `None` when the value has no
/// integer reading.
pub fn to_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Int(i) => Some(*i),
        Value::Float(f) => Some(*f as i64),
        Value::Bool(true) => Some(1),
        Value::Bool(false) => Some(0),
        Value::Str(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub fn to_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Int(i) => Some(*i as f64),
        Value::Float(f) => Some(*f),
        Value::Bool(true) => Some(1.0),
        Value::Bool(false) => Some(0.0),
        Value::Str(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Truthiness conversion never fails.
pub fn to_bool(value: &Value) -> bool {
    !value.is_falsy()
}

/// String rendering for the `string` builtin. Undefined stays undefined
/// rather than becoming the literal text `<undefined>`.
pub fn to_string_value(value: &Value) -> Option<String> {
    match value {
        Value::Undefined => None,
        Value::Str(s) => Some(s.to_string()),
        other => Some(other.to_string()),
    }
}

/// Time reading: a time value itself, or seconds since the epoch.
pub fn to_time(value: &Value) -> Option<SystemTime> {
    match value {
        Value::Time(t) => Some(*t),
        Value::Int(i) if *i >= 0 => {
            Some(SystemTime::UNIX_EPOCH + Duration::from_secs(*i as u64))
        }
        Value::Float(f) if *f >= 0.0 && f.is_finite() => {
            Some(SystemTime::UNIX_EPOCH + Duration::from_secs_f64(*f))
        }
        _ => None,
    }
}

/// Map-key rendering. Only scalar values can key a map.
pub fn index_key(index: &Value) -> Option<String> {
    match index {
        Value::Str(s) => Some(s.to_string()),
        Value::Int(i) => Some(i.to_string()),
        Value::Float(f) => Some(f.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Positional name for argument error messages.
pub fn ordinal(index: usize) -> String {
    match index {
        0 => "first".into(),
        1 => "second".into(),
        2 => "third".into(),
        3 => "fourth".into(),
        4 => "fifth".into(),
        n => format!("argument #{}", n + 1),
    }
}

/// Strict extraction of a host type from a value.
pub trait FromValue: Sized {
    /// Type name reported in mismatch errors.
    const EXPECTED: &'static str;

    fn from_value(value: &Value) -> Option<Self>;
}

impl FromValue for i64 {
    const EXPECTED: &'static str = "int";

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Int(i) => Some(*i),
            Value::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            _ => None,
        }
    }
}

impl FromValue for i32 {
    const EXPECTED: &'static str = "int";

    fn from_value(value: &Value) -> Option<Self> {
        i64::from_value(value).and_then(|i| i.try_into().ok())
    }
}

impl FromValue for f64 {
    const EXPECTED: &'static str = "float";

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }
}

impl FromValue for f32 {
    const EXPECTED: &'static str = "float";

    fn from_value(value: &Value) -> Option<Self> {
        f64::from_value(value).map(|f| f as f32)
    }
}

impl FromValue for bool {
    const EXPECTED: &'static str = "bool";

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl FromValue for String {
    const EXPECTED: &'static str = "string";

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Str(s) => Some(s.to_string()),
            _ => None,
        }
    }
}

impl FromValue for SystemTime {
    const EXPECTED: &'static str = "time";

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Time(t) => Some(*t),
            _ => None,
        }
    }
}

impl FromValue for Value {
    const EXPECTED: &'static str = "value";

    fn from_value(value: &Value) -> Option<Self> {
        Some(value.clone())
    }
}

/// Infallible injection of a host type into the value model.
pub trait IntoValue {
    fn into_value(self) -> Value;
}

impl IntoValue for Value {
    fn into_value(self) -> Value {
        self
    }
}

impl IntoValue for () {
    fn into_value(self) -> Value {
        Value::Undefined
    }
}

impl IntoValue for bool {
    fn into_value(self) -> Value {
        Value::Bool(self)
    }
}

impl IntoValue for i64 {
    fn into_value(self) -> Value {
        Value::Int(self)
    }
}

impl IntoValue for i32 {
    fn into_value(self) -> Value {
        Value::Int(self as i64)
    }
}

impl IntoValue for u32 {
    fn into_value(self) -> Value {
        Value::Int(self as i64)
    }
}

impl IntoValue for usize {
    fn into_value(self) -> Value {
        Value::Int(self as i64)
    }
}

impl IntoValue for f64 {
    fn into_value(self) -> Value {
        Value::Float(self)
    }
}

impl IntoValue for f32 {
    fn into_value(self) -> Value {
        Value::Float(self as f64)
    }
}

impl IntoValue for &str {
    fn into_value(self) -> Value {
        Value::Str(Arc::from(self))
    }
}

impl IntoValue for String {
    fn into_value(self) -> Value {
        Value::string(&self)
    }
}

impl IntoValue for SystemTime {
    fn into_value(self) -> Value {
        Value::Time(self)
    }
}

impl<T: IntoValue> IntoValue for Vec<T> {
    fn into_value(self) -> Value {
        Value::Array(Array::from_values(
            self.into_iter().map(IntoValue::into_value).collect(),
        ))
    }
}

impl<T: IntoValue> IntoValue for Option<T> {
    fn into_value(self) -> Value {
        match self {
            Some(v) => v.into_value(),
            None => Value::Undefined,
        }
    }
}
