//! Script-side views over reflected host values.
//!
//! A constructed host value lives in a [`HostCell`]: the root storage
//! under a mutex plus a projection path for values reached through
//! nested fields. Instances, bound methods and projected children all
//! share the root, so mutation through any view is visible to every
//! other view of the same storage.

use std::any::Any;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use tarn_foundation::context::expect_context;
use tarn_foundation::convert;
use tarn_foundation::error::{Error, Result};
use tarn_foundation::object::RuntimeObject;
use tarn_foundation::value::Value;

use crate::descriptor::{FieldDef, FieldKind, ProjectFn, ReflectedType};

#[derive(Clone)]
pub(crate) struct HostCell {
    root: Arc<Mutex<Box<dyn Any + Send>>>,
    path: Vec<ProjectFn>,
}

impl HostCell {
    fn new(host: Box<dyn Any + Send>) -> Self {
        HostCell {
            root: Arc::new(Mutex::new(host)),
            path: Vec::new(),
        }
    }

    fn extend(&self, project: ProjectFn) -> Self {
        let mut path = self.path.clone();
        path.push(project);
        HostCell {
            root: self.root.clone(),
            path,
        }
    }

    /// Locks the root and runs `f` against the projected slot.
    fn with_mut<R>(&self, f: impl FnOnce(&mut dyn Any) -> R) -> Result<R> {
        let mut guard = self.root.lock().unwrap_or_else(PoisonError::into_inner);
        let mut target: &mut dyn Any = &mut **guard;
        for project in &self.path {
            target = project(target)
                .ok_or_else(|| Error::runtime("reflected projection has unexpected type"))?;
        }
        Ok(f(target))
    }

    /// Same storage slot: same root and same projection path.
    fn same_slot(&self, other: &HostCell) -> bool {
        Arc::ptr_eq(&self.root, &other.root)
            && self.path.len() == other.path.len()
            && self
                .path
                .iter()
                .zip(&other.path)
                .all(|(a, b)| Arc::ptr_eq(a, b))
    }
}

impl fmt::Debug for HostCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostCell")
            .field("depth", &self.path.len())
            .finish_non_exhaustive()
    }
}

/// A live host value exposed to scripts.
#[derive(Clone)]
pub struct ReflectedInstance {
    ty: Arc<ReflectedType>,
    cell: HostCell,
}

impl ReflectedInstance {
    pub(crate) fn from_host(ty: Arc<ReflectedType>, host: Box<dyn Any + Send>) -> Self {
        ReflectedInstance {
            ty,
            cell: HostCell::new(host),
        }
    }

    pub fn type_ref(&self) -> &Arc<ReflectedType> {
        &self.ty
    }

    /// Clones the current host value back out, `None` when `T` does not
    /// match the instance's type.
    pub fn extract<T: Clone + 'static>(&self) -> Option<T> {
        self.cell
            .with_mut(|any| any.downcast_ref::<T>().cloned())
            .ok()
            .flatten()
    }

    fn read_field(&self, field: &FieldDef) -> Result<Value> {
        match &field.kind {
            FieldKind::Scalar { get, .. } => self.cell.with_mut(|any| get(any)),
            FieldKind::Nested { ty, project, .. } => Ok(Value::Object(Arc::new(
                ReflectedInstance {
                    ty: ty.clone(),
                    cell: self.cell.extend(project.clone()),
                },
            ))),
        }
    }

    fn index_key(&self, index: &Value) -> Result<String> {
        convert::index_key(index).ok_or_else(|| Error::InvalidIndexType {
            expected: "string".into(),
            found: index.type_name().into(),
        })
    }
}

impl fmt::Debug for ReflectedInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReflectedInstance")
            .field("type", &self.ty.name)
            .finish_non_exhaustive()
    }
}

impl RuntimeObject for ReflectedInstance {
    fn type_name(&self) -> &'static str {
        "reflect-struct-instance"
    }

    fn render(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{{", self.ty.name)?;
        for (i, (name, field)) in self.ty.fields.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            let value = self.read_field(field).unwrap_or_default();
            write!(f, "{name}: {value}")?;
        }
        f.write_str("}")
    }

    fn eq_value(&self, other: &Value) -> bool {
        let Value::Object(o) = other else {
            return false;
        };
        match o.as_any().downcast_ref::<ReflectedInstance>() {
            Some(other) => {
                self.ty.type_id == other.ty.type_id && self.cell.same_slot(&other.cell)
            }
            None => false,
        }
    }

    fn copied(&self) -> Value {
        let cloned = self.cell.with_mut(|any| (self.ty.clone_any)(&*any));
        match cloned {
            Ok(Some(host)) => {
                Value::Object(Arc::new(ReflectedInstance::from_host(self.ty.clone(), host)))
            }
            _ => Value::Undefined,
        }
    }

    /// Methods shadow fields; unknown names read as undefined.
    fn index_get(&self, index: &Value) -> Result<Value> {
        let key = self.index_key(index)?;
        if let Some(method_index) = self.ty.methods.get_index_of(&key) {
            return Ok(Value::Object(Arc::new(BoundMethod {
                ty: self.ty.clone(),
                cell: self.cell.clone(),
                index: method_index,
            })));
        }
        match self.ty.fields.get(&key) {
            Some(field) => self.read_field(field),
            None => Ok(Value::Undefined),
        }
    }

    fn index_set(&self, index: &Value, value: Value) -> Result<()> {
        let key = self.index_key(index)?;
        let Some(field) = self.ty.fields.get(&key) else {
            return Err(Error::UnknownField {
                name: key,
                type_name: self.ty.name.clone(),
            });
        };
        match &field.kind {
            FieldKind::Scalar { set, host_type, .. } => {
                let accepted = self.cell.with_mut(|any| set(any, &value))?;
                if accepted {
                    Ok(())
                } else {
                    Err(Error::NotAssignable {
                        field: key,
                        host_type: (*host_type).into(),
                        script_type: value.type_name().into(),
                    })
                }
            }
            FieldKind::Nested { ty: child, write, .. } => {
                let source = match &value {
                    Value::Object(o) => o
                        .as_any()
                        .downcast_ref::<ReflectedInstance>()
                        .filter(|inst| inst.ty.type_id == child.type_id),
                    _ => None,
                };
                let Some(source) = source else {
                    return Err(Error::NotAssignable {
                        field: key,
                        host_type: child.name.clone(),
                        script_type: value.type_name().into(),
                    });
                };
                // Clone the source out first; the write below re-locks
                // when source and target share a root.
                let cloned = source.cell.with_mut(|any| (child.clone_any)(&*any))?;
                let Some(cloned) = cloned else {
                    return Err(Error::NotAssignable {
                        field: key,
                        host_type: child.name.clone(),
                        script_type: value.type_name().into(),
                    });
                };
                let accepted = self.cell.with_mut(|any| write(any, cloned))?;
                if accepted {
                    Ok(())
                } else {
                    Err(Error::NotAssignable {
                        field: key,
                        host_type: child.name.clone(),
                        script_type: value.type_name().into(),
                    })
                }
            }
        }
    }

    fn entries(&self) -> Option<Vec<(Value, Value)>> {
        let mut out = Vec::with_capacity(self.ty.fields.len());
        for (name, field) in &self.ty.fields {
            let value = self.read_field(field).unwrap_or_default();
            out.push((Value::string(name), value));
        }
        Some(out)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A method plus the instance it was read from.
#[derive(Clone)]
pub struct BoundMethod {
    ty: Arc<ReflectedType>,
    cell: HostCell,
    index: usize,
}

impl BoundMethod {
    fn method_name(&self) -> &str {
        match self.ty.methods.get_index(self.index) {
            Some((_, method)) => &method.name,
            None => "?",
        }
    }
}

impl fmt::Debug for BoundMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundMethod")
            .field("type", &self.ty.name)
            .field("method", &self.method_name())
            .finish_non_exhaustive()
    }
}

impl RuntimeObject for BoundMethod {
    fn type_name(&self) -> &'static str {
        "reflect-struct-method"
    }

    fn render(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<reflect-struct-method {}.{}>",
            self.ty.name,
            self.method_name()
        )
    }

    fn eq_value(&self, other: &Value) -> bool {
        let Value::Object(o) = other else {
            return false;
        };
        match o.as_any().downcast_ref::<BoundMethod>() {
            Some(other) => {
                self.ty.type_id == other.ty.type_id
                    && self.index == other.index
                    && self.cell.same_slot(&other.cell)
            }
            None => false,
        }
    }

    fn copied(&self) -> Value {
        Value::Object(Arc::new(self.clone()))
    }

    fn can_call(&self) -> bool {
        true
    }

    fn can_call_with_context(&self) -> bool {
        true
    }

    /// Holds the instance lock for the duration of the host call. A
    /// method body must not call back into the same instance.
    fn call(&self, args: &[Value]) -> Result<Value> {
        let (ctx, rest) = expect_context(args)?;
        let Some((_, method)) = self.ty.methods.get_index(self.index) else {
            return Err(Error::runtime("reflected method index out of range"));
        };
        self.cell.with_mut(|any| (method.invoke)(any, &ctx, rest))?
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl RuntimeObject for ReflectedType {
    fn type_name(&self) -> &'static str {
        "reflect-struct"
    }

    fn render(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<reflect-struct {}>", self.name)
    }

    fn eq_value(&self, other: &Value) -> bool {
        let Value::Object(o) = other else {
            return false;
        };
        match o.as_any().downcast_ref::<ReflectedType>() {
            Some(other) => self.type_id == other.type_id,
            None => false,
        }
    }

    fn copied(&self) -> Value {
        match self.self_ref.upgrade() {
            Some(ty) => Value::Object(ty),
            None => Value::Undefined,
        }
    }

    fn can_call(&self) -> bool {
        true
    }

    fn can_call_with_context(&self) -> bool {
        true
    }

    /// Construction: default-initialize, run the constructor when one
    /// is described, wrap the result. Without a constructor the call
    /// accepts no arguments.
    fn call(&self, args: &[Value]) -> Result<Value> {
        let (ctx, rest) = expect_context(args)?;
        let ty = self.self_ref.upgrade().ok_or(Error::StructReleased)?;
        let mut host = (self.instantiate)();
        match &self.constructor {
            Some(ctor) => {
                (ctor.invoke)(&mut *host, &ctx, rest)?;
            }
            None if !rest.is_empty() => return Err(Error::WrongNumArguments),
            None => {}
        }
        Ok(Value::Object(Arc::new(ReflectedInstance::from_host(
            ty, host,
        ))))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
