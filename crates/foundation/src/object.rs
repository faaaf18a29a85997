//! Open extension point for host-defined value shapes.
//!
//! Anything that wants to live inside [`Value::Object`] implements
//! [`RuntimeObject`]. Defaults are deliberately restrictive: an object
//! that does not opt into indexing, iteration or calling reports the
//! matching capability errors instead of silently accepting them.

use std::any::Any;
use std::fmt;

use crate::error::{Error, Result};
use crate::value::Value;

/// Behavior contract for values the core does not know structurally.
pub trait RuntimeObject: fmt::Debug + Send + Sync {
    /// Script-facing type name, used in error messages and `type_name()`.
    fn type_name(&self) -> &'static str;

    /// Display rendering inside script output.
    fn render(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result;

    fn is_falsy(&self) -> bool {
        false
    }

    /// Equality against an arbitrary value. Implementations usually
    /// compare identity and must not assume `other` has the same type.
    fn eq_value(&self, other: &Value) -> bool;

    /// Copy policy for `deep_copy`. Identity-style objects return a new
    /// handle to themselves.
    fn copied(&self) -> Value;

    fn index_get(&self, _index: &Value) -> Result<Value> {
        Err(Error::NotIndexable {
            type_name: self.type_name().into(),
        })
    }

    fn index_set(&self, _index: &Value, _value: Value) -> Result<()> {
        Err(Error::NotIndexAssignable {
            type_name: self.type_name().into(),
        })
    }

    /// Iteration snapshot, or `None` when the object is not iterable.
    fn entries(&self) -> Option<Vec<(Value, Value)>> {
        None
    }

    fn can_call(&self) -> bool {
        false
    }

    /// Whether calls must receive the caller's context prepended to the
    /// argument list.
    fn can_call_with_context(&self) -> bool {
        false
    }

    fn call(&self, _args: &[Value]) -> Result<Value> {
        Err(Error::NotCallable {
            type_name: self.type_name().into(),
        })
    }

    /// Downcast hook for bridges that need the concrete type back.
    fn as_any(&self) -> &dyn Any;
}
