//! Seams to the external language front end and virtual machine.
//!
//! Parsing, compilation and instruction dispatch live outside this
//! workspace. The runtime drives them through these traits and assumes
//! only cooperative cancellation: an execution checks its abort flag
//! and its context at instruction boundaries, never mid-call.

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tarn_foundation::context::Context;
use tarn_foundation::error::Result;

use crate::bytecode::{Bytecode, ExecutionPlan};
use crate::globals::{GlobalLayout, Globals};

/// Opaque parser output, handed to the compiler untouched.
pub struct SyntaxTree {
    tree: Box<dyn Any + Send>,
}

impl SyntaxTree {
    pub fn new(tree: impl Any + Send) -> Self {
        Self {
            tree: Box::new(tree),
        }
    }

    pub fn downcast<T: Any>(self) -> Option<Box<T>> {
        self.tree.downcast().ok()
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.tree.downcast_ref()
    }
}

impl fmt::Debug for SyntaxTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SyntaxTree")
    }
}

pub trait Parser: Send + Sync {
    fn parse(&self, source: &str) -> Result<SyntaxTree>;
}

/// Turns a syntax tree into bytecode, defining whatever globals the
/// script declares into the layout it is given.
pub trait Compiler: Send + Sync {
    fn compile(&self, tree: SyntaxTree, layout: &mut GlobalLayout) -> Result<Bytecode>;
}

/// Spawns executions over a plan and a shared global store.
pub trait Engine: Send + Sync {
    fn new_execution(&self, plan: ExecutionPlan, globals: Globals) -> Result<Box<dyn Execution>>;
}

/// One run of the virtual machine.
pub trait Execution: Send {
    /// Runs to completion on the current thread.
    fn run(&mut self, ctx: &Context) -> Result<()>;

    /// Stop flag another thread can raise against this execution.
    fn abort_handle(&self) -> AbortHandle;
}

/// Cooperative stop flag observed at instruction boundaries.
#[derive(Debug, Clone, Default)]
pub struct AbortHandle {
    flag: Arc<AtomicBool>,
}

impl AbortHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_aborted(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abort_handle_is_shared_through_clones() {
        let handle = AbortHandle::new();
        let observer = handle.clone();
        assert!(!observer.is_aborted());
        handle.abort();
        assert!(observer.is_aborted());
    }

    #[test]
    fn test_syntax_tree_round_trips_payload() {
        let tree = SyntaxTree::new(String::from("let x = 1"));
        assert_eq!(tree.downcast_ref::<String>().unwrap(), "let x = 1");
        assert!(tree.downcast_ref::<i64>().is_none());

        let owned = tree.downcast::<String>().unwrap();
        assert_eq!(*owned, "let x = 1");
    }
}
