//! Host type descriptors.
//!
//! A [`HostStruct`] describes itself once through a [`TypeBuilder`];
//! the result is an immutable [`ReflectedType`] holding type-erased
//! accessors. All access closures operate on `&mut dyn Any` so that
//! promoted members of embedded structs are plain compositions of the
//! same closure shapes, uniform at any nesting depth.

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::{Arc, Weak};

use indexmap::IndexMap;

use tarn_foundation::context::Context;
use tarn_foundation::convert::{FromValue, IntoValue};
use tarn_foundation::error::Result;
use tarn_foundation::value::Value;

use crate::marshal::{self, HostMethod};
use crate::registry::TypeRegistry;

pub(crate) type GetFn = Arc<dyn Fn(&mut dyn Any) -> Value + Send + Sync>;
pub(crate) type SetFn = Arc<dyn Fn(&mut dyn Any, &Value) -> bool + Send + Sync>;
pub(crate) type ProjectFn =
    Arc<dyn for<'a> Fn(&'a mut dyn Any) -> Option<&'a mut dyn Any> + Send + Sync>;
pub(crate) type WriteFn = Arc<dyn Fn(&mut dyn Any, Box<dyn Any>) -> bool + Send + Sync>;
pub(crate) type InvokeFn =
    Arc<dyn Fn(&mut dyn Any, &Context, &[Value]) -> Result<Value> + Send + Sync>;
pub(crate) type InstantiateFn = Arc<dyn Fn() -> Box<dyn Any + Send> + Send + Sync>;
pub(crate) type CloneAnyFn =
    Arc<dyn Fn(&dyn Any) -> Option<Box<dyn Any + Send>> + Send + Sync>;

/// A host type scripts may construct and manipulate.
///
/// `Default` provides the pre-constructor value, `Clone` backs the copy
/// and nested-assignment semantics.
pub trait HostStruct: Default + Clone + Send + 'static {
    /// Script-facing type name.
    const NAME: &'static str;

    /// Registers fields, methods and embeddings.
    fn describe(builder: &mut TypeBuilder<'_, Self>);
}

pub(crate) enum FieldKind {
    Scalar {
        get: GetFn,
        set: SetFn,
        host_type: &'static str,
    },
    /// A struct-typed field, surfaced by reference through `project`.
    Nested {
        ty: Arc<ReflectedType>,
        project: ProjectFn,
        write: WriteFn,
    },
}

pub(crate) struct FieldDef {
    pub(crate) kind: FieldKind,
}

pub(crate) struct MethodDef {
    pub(crate) name: String,
    pub(crate) invoke: InvokeFn,
}

/// Immutable descriptor of a reflected host type. Also the callable
/// script value representing the type itself.
pub struct ReflectedType {
    pub(crate) name: String,
    pub(crate) type_id: TypeId,
    pub(crate) fields: IndexMap<String, FieldDef>,
    pub(crate) methods: IndexMap<String, MethodDef>,
    pub(crate) constructor: Option<MethodDef>,
    pub(crate) instantiate: InstantiateFn,
    pub(crate) clone_any: CloneAnyFn,
    pub(crate) self_ref: Weak<ReflectedType>,
}

impl ReflectedType {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn field_names(&self) -> Vec<String> {
        self.fields.keys().cloned().collect()
    }

    pub fn method_names(&self) -> Vec<String> {
        self.methods.keys().cloned().collect()
    }

    pub fn has_constructor(&self) -> bool {
        self.constructor.is_some()
    }
}

impl fmt::Debug for ReflectedType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReflectedType")
            .field("name", &self.name)
            .field("fields", &self.fields.keys().collect::<Vec<_>>())
            .field("methods", &self.methods.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

fn compose_get(project: ProjectFn, get: GetFn) -> GetFn {
    Arc::new(move |any| match project(any) {
        Some(child) => get(child),
        None => Value::Undefined,
    })
}

fn compose_set(project: ProjectFn, set: SetFn) -> SetFn {
    Arc::new(move |any, value| match project(any) {
        Some(child) => set(child, value),
        None => false,
    })
}

fn compose_project(outer: ProjectFn, inner: ProjectFn) -> ProjectFn {
    Arc::new(move |any| outer(any).and_then(|child| inner(child)))
}

fn compose_write(project: ProjectFn, write: WriteFn) -> WriteFn {
    Arc::new(move |any, boxed| match project(any) {
        Some(child) => write(child, boxed),
        None => false,
    })
}

fn compose_invoke(project: ProjectFn, invoke: InvokeFn) -> InvokeFn {
    Arc::new(move |any, ctx, args| match project(any) {
        Some(child) => invoke(child, ctx, args),
        None => Err(tarn_foundation::Error::runtime(
            "reflected receiver has unexpected type",
        )),
    })
}

fn compose_kind(project: &ProjectFn, kind: &FieldKind) -> FieldKind {
    match kind {
        FieldKind::Scalar {
            get,
            set,
            host_type,
        } => FieldKind::Scalar {
            get: compose_get(project.clone(), get.clone()),
            set: compose_set(project.clone(), set.clone()),
            host_type,
        },
        FieldKind::Nested { ty, project: inner, write } => FieldKind::Nested {
            ty: ty.clone(),
            project: compose_project(project.clone(), inner.clone()),
            write: compose_write(project.clone(), write.clone()),
        },
    }
}

/// Collects the member set of one host type during `describe`.
///
/// Direct members always win over promoted ones; among several
/// embeddings the first registration of a name wins.
pub struct TypeBuilder<'r, T: HostStruct> {
    registry: &'r TypeRegistry,
    fields: IndexMap<String, FieldDef>,
    methods: IndexMap<String, MethodDef>,
    constructor: Option<MethodDef>,
    promoted_fields: IndexMap<String, FieldDef>,
    promoted_methods: IndexMap<String, MethodDef>,
    promoted_constructor: Option<MethodDef>,
    _host: std::marker::PhantomData<fn(T)>,
}

impl<'r, T: HostStruct> TypeBuilder<'r, T> {
    pub(crate) fn new(registry: &'r TypeRegistry) -> Self {
        TypeBuilder {
            registry,
            fields: IndexMap::new(),
            methods: IndexMap::new(),
            constructor: None,
            promoted_fields: IndexMap::new(),
            promoted_methods: IndexMap::new(),
            promoted_constructor: None,
            _host: std::marker::PhantomData,
        }
    }

    /// Registers a scalar field through a getter/setter pair. The
    /// script-side type is derived from `F`, assignment of any other
    /// shape is rejected.
    pub fn field<F>(
        &mut self,
        name: impl Into<String>,
        get: impl Fn(&T) -> F + Send + Sync + 'static,
        set: impl Fn(&mut T, F) + Send + Sync + 'static,
    ) where
        F: FromValue + IntoValue + 'static,
    {
        let get_fn: GetFn = Arc::new(move |any| match any.downcast_mut::<T>() {
            Some(host) => get(host).into_value(),
            None => Value::Undefined,
        });
        let set_fn: SetFn = Arc::new(move |any, value| {
            let Some(host) = any.downcast_mut::<T>() else {
                return false;
            };
            match F::from_value(value) {
                Some(converted) => {
                    set(host, converted);
                    true
                }
                None => false,
            }
        });
        self.fields.insert(
            name.into(),
            FieldDef {
                kind: FieldKind::Scalar {
                    get: get_fn,
                    set: set_fn,
                    host_type: F::EXPECTED,
                },
            },
        );
    }

    /// Registers a struct-typed field. Scripts see it by reference:
    /// mutations through the projected value hit the parent's storage.
    pub fn nested<C: HostStruct>(
        &mut self,
        name: impl Into<String>,
        project: impl Fn(&mut T) -> &mut C + Send + Sync + 'static,
    ) {
        let ty = self.registry.reflect::<C>();
        let project = Arc::new(project);
        let project_fn: ProjectFn = {
            let project = project.clone();
            Arc::new(move |any: &mut dyn Any| {
                any.downcast_mut::<T>()
                    .map(|host| project(host) as &mut dyn Any)
            })
        };
        let write_fn: WriteFn = Arc::new(move |any, boxed| {
            let Some(host) = any.downcast_mut::<T>() else {
                return false;
            };
            match boxed.downcast::<C>() {
                Ok(child) => {
                    *project(host) = *child;
                    true
                }
                Err(_) => false,
            }
        });
        self.fields.insert(
            name.into(),
            FieldDef {
                kind: FieldKind::Nested {
                    ty,
                    project: project_fn,
                    write: write_fn,
                },
            },
        );
    }

    /// Embeds another host type: its fields, methods and constructor
    /// are promoted onto this type under their own names, depth first.
    /// The embedded value itself stays reachable under its type name.
    pub fn embed<C: HostStruct>(
        &mut self,
        project: impl Fn(&mut T) -> &mut C + Send + Sync + 'static,
    ) {
        let child = self.registry.reflect::<C>();
        let project = Arc::new(project);
        let project_fn: ProjectFn = {
            let project = project.clone();
            Arc::new(move |any: &mut dyn Any| {
                any.downcast_mut::<T>()
                    .map(|host| project(host) as &mut dyn Any)
            })
        };

        for (name, field) in &child.fields {
            self.promoted_fields
                .entry(name.clone())
                .or_insert_with(|| FieldDef {
                    kind: compose_kind(&project_fn, &field.kind),
                });
        }
        for (name, method) in &child.methods {
            self.promoted_methods
                .entry(name.clone())
                .or_insert_with(|| MethodDef {
                    name: name.clone(),
                    invoke: compose_invoke(project_fn.clone(), method.invoke.clone()),
                });
        }
        if let Some(ctor) = &child.constructor {
            if self.promoted_constructor.is_none() {
                self.promoted_constructor = Some(MethodDef {
                    name: ctor.name.clone(),
                    invoke: compose_invoke(project_fn.clone(), ctor.invoke.clone()),
                });
            }
        }

        let write_fn: WriteFn = Arc::new(move |any, boxed| {
            let Some(host) = any.downcast_mut::<T>() else {
                return false;
            };
            match boxed.downcast::<C>() {
                Ok(child) => {
                    *project(host) = *child;
                    true
                }
                Err(_) => false,
            }
        });
        self.promoted_fields
            .entry(child.name.clone())
            .or_insert_with(|| FieldDef {
                kind: FieldKind::Nested {
                    ty: child.clone(),
                    project: project_fn,
                    write: write_fn,
                },
            });
    }

    /// Registers a method. The receiver is borrowed exclusively for the
    /// duration of the call, so a method must not call back into the
    /// same instance.
    pub fn method<M, F>(&mut self, name: impl Into<String>, f: F)
    where
        F: HostMethod<T, M>,
    {
        let name = name.into();
        self.methods.insert(
            name.clone(),
            MethodDef {
                name,
                invoke: marshal::adapt::<T, M, F>(f),
            },
        );
    }

    /// Registers the construction protocol body. It runs against a
    /// default-initialized value; its error aborts construction.
    pub fn constructor<M, F>(&mut self, f: F)
    where
        F: HostMethod<T, M>,
    {
        self.constructor = Some(MethodDef {
            name: "constructor".into(),
            invoke: marshal::adapt::<T, M, F>(f),
        });
    }

    pub(crate) fn finish(self) -> Arc<ReflectedType> {
        let mut fields = self.promoted_fields;
        for (name, field) in self.fields {
            fields.insert(name, field);
        }
        let mut methods = self.promoted_methods;
        for (name, method) in self.methods {
            methods.insert(name, method);
        }
        let constructor = self.constructor.or(self.promoted_constructor);

        Arc::new_cyclic(|weak: &Weak<ReflectedType>| ReflectedType {
            name: T::NAME.into(),
            type_id: TypeId::of::<T>(),
            fields,
            methods,
            constructor,
            instantiate: Arc::new(|| Box::new(T::default()) as Box<dyn Any + Send>),
            clone_any: Arc::new(|any: &dyn Any| {
                any.downcast_ref::<T>()
                    .map(|host| Box::new(host.clone()) as Box<dyn Any + Send>)
            }),
            self_ref: weak.clone(),
        })
    }
}
