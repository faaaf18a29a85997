//! Source-to-unit facade.
//!
//! A [`Script`] collects source text, the host values to expose and
//! the session's reflected-type registry, then drives the external
//! parser and compiler to produce a runnable [`Compiled`] unit.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use tracing::{info, instrument};

use tarn_builtins as builtins;
use tarn_foundation::convert::IntoValue;
use tarn_foundation::error::Result;
use tarn_foundation::value::Value;
use tarn_reflect::{HostStruct, TypeRegistry};

use crate::bytecode::ExecutionLimits;
use crate::engine::{Compiler, Engine, Parser};
use crate::globals::{GlobalLayout, Globals};
use crate::unit::Compiled;

/// Reserved global receiving trampoline call results.
pub const OUTPUT_VARIABLE: &str = "$out";

/// Script source plus the host values exposed to it.
pub struct Script {
    source: String,
    variables: IndexMap<String, Value>,
    limits: ExecutionLimits,
    registry: TypeRegistry,
}

impl Script {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            variables: IndexMap::new(),
            limits: ExecutionLimits::default(),
            registry: TypeRegistry::default(),
        }
    }

    /// Exposes a host value as a named global. Insertion order decides
    /// slot order; re-adding a name overwrites its seed value.
    pub fn add_variable(&mut self, name: impl Into<String>, value: impl IntoValue) {
        self.variables.insert(name.into(), value.into_value());
    }

    /// Exposes a host struct instance through the reflection bridge.
    pub fn add_reflected<T: HostStruct>(&mut self, name: impl Into<String>, host: T) {
        let value = self.registry.wrap(host);
        self.variables.insert(name.into(), value);
    }

    /// Exposes a host struct type itself, so scripts can construct
    /// instances with `new(...)`.
    pub fn add_type<T: HostStruct>(&mut self, name: impl Into<String>) {
        let value = self.registry.type_value::<T>();
        self.variables.insert(name.into(), value);
    }

    pub fn remove_variable(&mut self, name: &str) -> bool {
        self.variables.shift_remove(name).is_some()
    }

    /// This script's reflected-type registry. Types are cached here for
    /// the lifetime of the script, not process-wide.
    pub fn type_registry(&self) -> &TypeRegistry {
        &self.registry
    }

    pub fn set_max_allocs(&mut self, max_allocs: Option<u64>) {
        self.limits.max_allocs = max_allocs;
    }

    /// Compiles the source into a runnable unit.
    ///
    /// Layout order: the builtin table first, then user variables in
    /// insertion order, then the reserved output slot, then whatever
    /// globals the compiler defines for script declarations. Globals
    /// are sized to the final layout and seeded with the variable
    /// values.
    #[instrument(skip_all, fields(source_bytes = self.source.len()))]
    pub fn compile(
        &self,
        parser: &dyn Parser,
        compiler: &dyn Compiler,
        engine: Arc<dyn Engine>,
    ) -> Result<Compiled> {
        let mut layout = GlobalLayout::new();
        for descriptor in builtins::all() {
            layout.define_builtin(descriptor.name, descriptor.as_value());
        }
        for name in self.variables.keys() {
            layout.define_global(name);
        }
        let out_slot = layout.define_global(OUTPUT_VARIABLE);

        let tree = parser.parse(&self.source)?;
        let bytecode = compiler.compile(tree, &mut layout)?;

        let globals = Globals::new(layout.globals_len());
        for (name, value) in &self.variables {
            if let Some(slot) = layout.resolve_global(name) {
                globals.set(slot, value.clone())?;
            }
        }

        info!(
            globals = layout.globals_len(),
            builtins = layout.builtins_len(),
            constants = bytecode.constants().len(),
            "script compiled"
        );
        Ok(Compiled::from_parts(
            bytecode,
            layout,
            globals,
            out_slot,
            self.limits,
            engine,
        ))
    }

    /// Compiles and immediately runs with a fresh background context.
    pub fn run(
        &self,
        parser: &dyn Parser,
        compiler: &dyn Compiler,
        engine: Arc<dyn Engine>,
    ) -> Result<Compiled> {
        let compiled = self.compile(parser, compiler, engine)?;
        compiled.run()?;
        Ok(compiled)
    }
}

impl fmt::Debug for Script {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Script")
            .field("source_bytes", &self.source.len())
            .field("variables", &self.variables.len())
            .finish()
    }
}
