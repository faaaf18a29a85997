//! Name-to-slot layout and the shared global store.

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use indexmap::{IndexMap, IndexSet};

use tarn_foundation::error::{Error, Result};
use tarn_foundation::value::Value;

/// Compile-time mapping from names to fixed global slots, plus the
/// builtin table handed to the compiler.
///
/// Slot indices never change once assigned; redefining a name returns
/// the existing slot.
#[derive(Debug, Default, Clone)]
pub struct GlobalLayout {
    globals: IndexSet<String>,
    builtins: IndexMap<String, Value>,
}

impl GlobalLayout {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn define_global(&mut self, name: &str) -> usize {
        if let Some(slot) = self.globals.get_index_of(name) {
            return slot;
        }
        self.globals.insert_full(name.to_string()).0
    }

    pub fn resolve_global(&self, name: &str) -> Option<usize> {
        self.globals.get_index_of(name)
    }

    pub fn globals_len(&self) -> usize {
        self.globals.len()
    }

    pub fn global_names(&self) -> impl Iterator<Item = &str> {
        self.globals.iter().map(String::as_str)
    }

    /// Records a builtin under a fixed table index. Re-defining a name
    /// keeps the first registration.
    pub fn define_builtin(&mut self, name: &str, value: Value) -> usize {
        let entry = self.builtins.entry(name.to_string());
        let index = entry.index();
        entry.or_insert(value);
        index
    }

    pub fn builtin_index(&self, name: &str) -> Option<usize> {
        self.builtins.get_index_of(name)
    }

    pub fn builtin_values(&self) -> Vec<Value> {
        self.builtins.values().cloned().collect()
    }

    pub fn builtins_len(&self) -> usize {
        self.builtins.len()
    }
}

/// Fixed-length runtime storage for global slots, shared between a
/// unit and its executions.
#[derive(Debug, Clone)]
pub struct Globals {
    slots: Arc<RwLock<Vec<Value>>>,
}

impl Globals {
    pub fn new(len: usize) -> Self {
        Self::from_values(vec![Value::Undefined; len])
    }

    pub fn from_values(values: Vec<Value>) -> Self {
        Self {
            slots: Arc::new(RwLock::new(values)),
        }
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn get(&self, slot: usize) -> Result<Value> {
        let slots = self.read();
        slots.get(slot).cloned().ok_or(Error::IndexOutOfBounds {
            index: slot as i64,
            len: slots.len(),
        })
    }

    pub fn set(&self, slot: usize, value: Value) -> Result<()> {
        let mut slots = self.write();
        let len = slots.len();
        match slots.get_mut(slot) {
            Some(cell) => {
                *cell = value;
                Ok(())
            }
            None => Err(Error::IndexOutOfBounds {
                index: slot as i64,
                len,
            }),
        }
    }

    pub fn snapshot(&self) -> Vec<Value> {
        self.read().clone()
    }

    pub fn same_store(&self, other: &Globals) -> bool {
        Arc::ptr_eq(&self.slots, &other.slots)
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<Value>> {
        self.slots.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<Value>> {
        self.slots.write().unwrap_or_else(PoisonError::into_inner)
    }
}
