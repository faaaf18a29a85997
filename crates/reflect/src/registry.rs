//! Session-owned reflected type cache.
//!
//! Each embedding session (usually one per script) owns its registry;
//! nothing here is process-global, so two sessions can describe the
//! same Rust type independently and tear down without coordination.

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::debug;

use tarn_foundation::value::Value;

use crate::descriptor::{HostStruct, ReflectedType, TypeBuilder};
use crate::instance::ReflectedInstance;

/// Cache of [`ReflectedType`] descriptors keyed by Rust type.
#[derive(Default)]
pub struct TypeRegistry {
    types: RwLock<HashMap<TypeId, Arc<ReflectedType>>>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the descriptor for `T`, building it on first use.
    ///
    /// Descriptors are built outside the lock so `describe` may reflect
    /// further types (embeddings do); the first finished build for a
    /// type wins and later racers adopt it.
    pub fn reflect<T: HostStruct>(&self) -> Arc<ReflectedType> {
        let type_id = TypeId::of::<T>();
        {
            let types = self.types.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(ty) = types.get(&type_id) {
                return ty.clone();
            }
        }

        let mut builder = TypeBuilder::<T>::new(self);
        T::describe(&mut builder);
        let built = builder.finish();
        debug!(
            type_name = %built.name(),
            fields = built.field_names().len(),
            methods = built.method_names().len(),
            "reflected host type"
        );

        let mut types = self.types.write().unwrap_or_else(PoisonError::into_inner);
        types.entry(type_id).or_insert(built).clone()
    }

    /// The script value representing type `T`: callable, constructs
    /// instances.
    pub fn type_value<T: HostStruct>(&self) -> Value {
        Value::Object(self.reflect::<T>())
    }

    /// Wraps an existing host value as a script-side instance.
    pub fn wrap<T: HostStruct>(&self, host: T) -> Value {
        let ty = self.reflect::<T>();
        Value::Object(Arc::new(ReflectedInstance::from_host(ty, Box::new(host))))
    }

    pub fn len(&self) -> usize {
        self.types
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::TypeBuilder;

    #[derive(Default, Clone)]
    struct Plain {
        n: i64,
    }

    impl HostStruct for Plain {
        const NAME: &'static str = "Plain";

        fn describe(builder: &mut TypeBuilder<'_, Self>) {
            builder.field("n", |p| p.n, |p, n| p.n = n);
        }
    }

    #[test]
    fn test_reflect_caches_per_registry() {
        let registry = TypeRegistry::new();
        let a = registry.reflect::<Plain>();
        let b = registry.reflect::<Plain>();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_registries_are_independent() {
        let first = TypeRegistry::new();
        let second = TypeRegistry::new();
        let a = first.reflect::<Plain>();
        let b = second.reflect::<Plain>();
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_concurrent_reflect_converges_on_one_descriptor() {
        let registry = TypeRegistry::new();
        let seen = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| scope.spawn(|| registry.reflect::<Plain>()))
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().expect("reflect thread panicked"))
                .collect::<Vec<_>>()
        });
        for ty in &seen[1..] {
            assert!(Arc::ptr_eq(&seen[0], ty));
        }
    }
}
