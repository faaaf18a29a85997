//! Compiled units: immutable bytecode bound to named global slots,
//! with the exclusive lock the call trampoline serializes on.

use std::fmt;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Condvar, Mutex, PoisonError, Weak};
use std::thread::{self, ThreadId};
use std::time::Instant;

use tracing::{debug, instrument};

use tarn_foundation::context::{Context, FunctionCaller};
use tarn_foundation::error::{Error, Result};
use tarn_foundation::value::Value;

use crate::bytecode::{Bytecode, EntryPatch, ExecutionLimits, ExecutionPlan};
use crate::engine::Engine;
use crate::globals::{GlobalLayout, Globals};
use crate::script::OUTPUT_VARIABLE;
use crate::trampoline;

/// Named view of one global slot.
#[derive(Debug, Clone)]
pub struct Variable {
    name: String,
    value: Value,
}

impl Variable {
    pub(crate) fn new(name: impl Into<String>, value: Value) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn into_value(self) -> Value {
        self.value
    }

    pub fn is_undefined(&self) -> bool {
        self.value.is_undefined()
    }
}

#[derive(Default)]
struct LockState {
    owner: Option<ThreadId>,
    depth: usize,
}

/// Exclusive unit lock the owning thread may re-enter, so a nested
/// trampoline call issued from inside a running call does not deadlock
/// against itself. Other threads are serialized.
pub(crate) struct UnitLock {
    state: Mutex<LockState>,
    released: Condvar,
}

impl UnitLock {
    fn new() -> Self {
        Self {
            state: Mutex::new(LockState::default()),
            released: Condvar::new(),
        }
    }

    pub(crate) fn acquire(&self) -> UnitGuard<'_> {
        let me = thread::current().id();
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            match state.owner {
                None => {
                    state.owner = Some(me);
                    state.depth = 1;
                    return UnitGuard { lock: self };
                }
                Some(owner) if owner == me => {
                    state.depth += 1;
                    return UnitGuard { lock: self };
                }
                Some(_) => {
                    state = self
                        .released
                        .wait(state)
                        .unwrap_or_else(PoisonError::into_inner);
                }
            }
        }
    }
}

pub(crate) struct UnitGuard<'a> {
    lock: &'a UnitLock,
}

impl Drop for UnitGuard<'_> {
    fn drop(&mut self) {
        let mut state = self
            .lock
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        state.depth -= 1;
        if state.depth == 0 {
            state.owner = None;
            self.lock.released.notify_one();
        }
    }
}

pub(crate) struct Unit {
    pub(crate) bytecode: Arc<Bytecode>,
    pub(crate) layout: GlobalLayout,
    pub(crate) globals: Globals,
    pub(crate) builtins: Arc<Vec<Value>>,
    pub(crate) out_slot: usize,
    pub(crate) limits: ExecutionLimits,
    pub(crate) engine: Arc<dyn Engine>,
    pub(crate) lock: UnitLock,
    self_ref: Weak<Unit>,
}

impl Unit {
    pub(crate) fn plan(&self, patch: Option<EntryPatch>) -> ExecutionPlan {
        let plan = ExecutionPlan::new(
            Arc::clone(&self.bytecode),
            Arc::clone(&self.builtins),
            self.limits,
        );
        match patch {
            Some(patch) => plan.with_patch(patch),
            None => plan,
        }
    }

    /// Injects this unit as the context's caller capability unless one
    /// is already present, so nested calls recurse through the same
    /// trampoline.
    pub(crate) fn ensure_caller(&self, ctx: &Context) -> Context {
        if ctx.caller().is_some() {
            return ctx.clone();
        }
        match self.self_ref.upgrade() {
            Some(unit) => ctx.with_caller(unit),
            None => ctx.clone(),
        }
    }
}

impl FunctionCaller for Unit {
    fn call_value(&self, ctx: &Context, callee: &Value, args: &[Value]) -> Result<Value> {
        trampoline::dispatch(self, ctx, callee, args)
    }
}

/// Cancellation wins over whatever error the aborted execution itself
/// reported.
pub(crate) fn settle(ctx: &Context, outcome: Result<()>) -> Result<()> {
    match outcome {
        Err(error) if ctx.is_canceled() => {
            debug!(%error, "execution stopped by cancellation");
            Err(ctx.cancel_error())
        }
        other => other,
    }
}

enum Event {
    Finished(Result<()>),
    Canceled,
}

/// One compiled script instance: immutable bytecode, its own global
/// slots and the trampoline over them.
///
/// Deliberately not `Clone`; [`Compiled::clone_unit`] is the explicit
/// way to duplicate, with its own globals and lock.
pub struct Compiled {
    inner: Arc<Unit>,
}

impl Compiled {
    pub(crate) fn from_parts(
        bytecode: Bytecode,
        layout: GlobalLayout,
        globals: Globals,
        out_slot: usize,
        limits: ExecutionLimits,
        engine: Arc<dyn Engine>,
    ) -> Self {
        let builtins = Arc::new(layout.builtin_values());
        let inner = Arc::new_cyclic(|self_ref| Unit {
            bytecode: Arc::new(bytecode),
            layout,
            globals,
            builtins,
            out_slot,
            limits,
            engine,
            lock: UnitLock::new(),
            self_ref: self_ref.clone(),
        });
        Self { inner }
    }

    /// Runs the program entry with a fresh background context.
    pub fn run(&self) -> Result<()> {
        self.run_sync(&Context::background())
    }

    fn run_sync(&self, ctx: &Context) -> Result<()> {
        let run_ctx = self.inner.ensure_caller(ctx);
        let mut execution = self
            .inner
            .engine
            .new_execution(self.inner.plan(None), self.inner.globals.clone())?;
        let _guard = self.inner.lock.acquire();
        execution.run(&run_ctx)
    }

    /// Runs the program entry, racing completion against the context's
    /// cancellation. On cancellation the execution is aborted and
    /// joined before the cancellation error is returned, so nothing
    /// keeps running past this call.
    #[instrument(skip_all)]
    pub fn run_context(&self, ctx: &Context) -> Result<()> {
        if ctx.is_canceled() {
            return Err(ctx.cancel_error());
        }
        let run_ctx = self.inner.ensure_caller(ctx);
        let execution = self
            .inner
            .engine
            .new_execution(self.inner.plan(None), self.inner.globals.clone())?;
        let abort = execution.abort_handle();

        let (events, inbox) = mpsc::channel();
        let cancel_events = events.clone();
        let watch = ctx.on_cancel(move || {
            let _ = cancel_events.send(Event::Canceled);
        });

        thread::scope(|scope| {
            let unit = Arc::clone(&self.inner);
            scope.spawn(move || {
                let mut execution = execution;
                let _guard = unit.lock.acquire();
                let outcome = execution.run(&run_ctx);
                let _ = events.send(Event::Finished(outcome));
            });

            let event = match ctx.deadline() {
                Some(deadline) => {
                    let timeout = deadline.saturating_duration_since(Instant::now());
                    match inbox.recv_timeout(timeout) {
                        Ok(event) => event,
                        Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => {
                            Event::Canceled
                        }
                    }
                }
                None => inbox.recv().unwrap_or(Event::Canceled),
            };

            match event {
                Event::Finished(outcome) => settle(ctx, outcome),
                Event::Canceled => {
                    abort.abort();
                    drop(watch);
                    // Join the execution; only the worker can send now.
                    loop {
                        match inbox.recv() {
                            Ok(Event::Finished(Err(error))) => {
                                debug!(%error, "execution unwound after abort");
                                break;
                            }
                            Ok(Event::Finished(Ok(()))) => break,
                            Ok(Event::Canceled) => {}
                            Err(_) => break,
                        }
                    }
                    Err(ctx.cancel_error())
                }
            }
        })
    }

    /// Value of a named global; undefined when the name is unknown or
    /// the slot was never written.
    pub fn get(&self, name: &str) -> Variable {
        let value = self
            .inner
            .layout
            .resolve_global(name)
            .and_then(|slot| self.inner.globals.get(slot).ok())
            .unwrap_or_default();
        Variable::new(name, value)
    }

    /// All named globals except the reserved output slot.
    pub fn get_all(&self) -> Vec<Variable> {
        self.inner
            .layout
            .global_names()
            .filter(|name| *name != OUTPUT_VARIABLE)
            .map(|name| self.get(name))
            .collect()
    }

    /// Writes a named global. The name must already have a slot.
    pub fn set(&self, name: &str, value: Value) -> Result<()> {
        let slot = self
            .inner
            .layout
            .resolve_global(name)
            .ok_or_else(|| Error::NotDefined {
                name: name.to_string(),
            })?;
        self.inner.globals.set(slot, value)
    }

    pub fn is_defined(&self, name: &str) -> bool {
        match self.inner.layout.resolve_global(name) {
            Some(slot) => self
                .inner
                .globals
                .get(slot)
                .is_ok_and(|value| !value.is_undefined()),
            None => false,
        }
    }

    /// Duplicates the unit for independent use: same immutable
    /// bytecode, its own globals snapshot and its own lock.
    pub fn clone_unit(&self) -> Compiled {
        let unit = &self.inner;
        let inner = Arc::new_cyclic(|self_ref| Unit {
            bytecode: Arc::clone(&unit.bytecode),
            layout: unit.layout.clone(),
            globals: Globals::from_values(unit.globals.snapshot()),
            builtins: Arc::clone(&unit.builtins),
            out_slot: unit.out_slot,
            limits: unit.limits,
            engine: Arc::clone(&unit.engine),
            lock: UnitLock::new(),
            self_ref: self_ref.clone(),
        });
        Compiled { inner }
    }

    /// Invokes any callable value through this unit's trampoline.
    pub fn call_value(&self, ctx: &Context, callee: &Value, args: &[Value]) -> Result<Value> {
        self.inner.call_value(ctx, callee, args)
    }

    /// Context pre-bound to this unit's caller capability.
    pub fn caller_context(&self) -> Context {
        self.inner.ensure_caller(&Context::background())
    }
}

impl fmt::Debug for Compiled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Compiled")
            .field("globals", &self.inner.globals.len())
            .field("constants", &self.inner.bytecode.constants().len())
            .finish()
    }
}
