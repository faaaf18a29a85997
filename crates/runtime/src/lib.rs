// Allow unwrap in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]

//! Tarn runtime
//!
//! Compiles scripts into units and bridges calls between host code and
//! compiled functions through the trampoline.

pub mod bytecode;
pub mod engine;
pub mod globals;
pub mod script;
mod trampoline;
pub mod unit;

pub use bytecode::{Bytecode, EntryPatch, ExecutionLimits, ExecutionPlan};
pub use engine::{AbortHandle, Compiler, Engine, Execution, Parser, SyntaxTree};
pub use globals::{GlobalLayout, Globals};
pub use script::{OUTPUT_VARIABLE, Script};
pub use unit::{Compiled, Variable};
