//! Cancelable call context.
//!
//! A [`Context`] is an immutable chain of layers. Deriving a context
//! (attaching a value, a cancellation cell, a deadline or a caller)
//! pushes a new layer; lookups walk the chain from newest to oldest.
//! Cancellation is cooperative: executions poll [`Context::is_canceled`]
//! or register a callback with [`Context::on_cancel`], nothing is
//! interrupted preemptively.
//!
//! Cancellation state is a two-state machine. A cell is `Active` until
//! the first `cancel` call transitions it to `Canceled`; later calls are
//! no-ops and the transition is never reversed.

use std::fmt;
use std::mem;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Instant;

use tracing::trace;

use crate::error::{Error, Result};
use crate::value::Value;

type Waiter = Arc<dyn Fn() + Send + Sync>;

enum CancelState {
    Active { waiters: Vec<Weak<dyn Fn() + Send + Sync>> },
    Canceled,
}

/// Shared cancellation flag with registered wakeups.
#[derive(Clone)]
pub struct CancelCell {
    state: Arc<Mutex<CancelState>>,
}

impl CancelCell {
    pub fn new() -> Self {
        CancelCell {
            state: Arc::new(Mutex::new(CancelState::Active {
                waiters: Vec::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CancelState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Transitions to `Canceled` and fires the registered waiters.
    /// Idempotent: only the first call observes the transition.
    pub fn cancel(&self) {
        let waiters = {
            let mut state = self.lock();
            match &mut *state {
                CancelState::Active { waiters } => {
                    let waiters = mem::take(waiters);
                    *state = CancelState::Canceled;
                    waiters
                }
                CancelState::Canceled => return,
            }
        };
        trace!(waiters = waiters.len(), "context canceled");
        // Callbacks run outside the lock; a waiter may re-enter the cell.
        for waiter in waiters {
            if let Some(f) = waiter.upgrade() {
                f();
            }
        }
    }

    pub fn is_canceled(&self) -> bool {
        matches!(&*self.lock(), CancelState::Canceled)
    }

    /// Registers a waiter, firing it right away when the cell has
    /// already transitioned. Only a weak reference is kept, dropping
    /// the owning [`CancelWatch`] unregisters.
    fn add_waiter(&self, waiter: &Waiter) {
        let fire_now = {
            let mut state = self.lock();
            match &mut *state {
                CancelState::Active { waiters } => {
                    waiters.push(Arc::downgrade(waiter));
                    false
                }
                CancelState::Canceled => true,
            }
        };
        if fire_now {
            waiter();
        }
    }
}

impl Default for CancelCell {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CancelCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelCell")
            .field("canceled", &self.is_canceled())
            .finish()
    }
}

/// Keeps an `on_cancel` callback registered. Dropping the watch drops
/// the only strong reference to the callback, after which the cell will
/// skip it.
#[must_use = "dropping the watch unregisters the callback"]
pub struct CancelWatch {
    _callback: Waiter,
}

/// Dispatch seam used by `Context::call`. Implemented by the unit that
/// owns the executing bytecode so native code can call back into
/// script-visible callables.
pub trait FunctionCaller: Send + Sync {
    fn call_value(&self, ctx: &Context, callee: &Value, args: &[Value]) -> Result<Value>;
}

struct Layer {
    parent: Option<Context>,
    entry: Option<(Value, Value)>,
    cancel: Option<CancelCell>,
    deadline: Option<Instant>,
    caller: Option<Arc<dyn FunctionCaller>>,
}

/// Immutable, cheaply cloneable call context.
#[derive(Clone)]
pub struct Context {
    inner: Arc<Layer>,
}

impl Context {
    /// Root context: no values, not cancelable, no deadline.
    pub fn background() -> Self {
        Context {
            inner: Arc::new(Layer {
                parent: None,
                entry: None,
                cancel: None,
                deadline: None,
                caller: None,
            }),
        }
    }

    fn layered(
        &self,
        entry: Option<(Value, Value)>,
        cancel: Option<CancelCell>,
        deadline: Option<Instant>,
        caller: Option<Arc<dyn FunctionCaller>>,
    ) -> Context {
        Context {
            inner: Arc::new(Layer {
                parent: Some(self.clone()),
                entry,
                cancel,
                deadline,
                caller,
            }),
        }
    }

    /// Derives a context carrying one key/value pair. Keys compare with
    /// value equality, a newer layer shadows an older one.
    pub fn with_value(&self, key: Value, value: Value) -> Context {
        self.layered(Some((key, value)), None, None, None)
    }

    pub fn value(&self, key: &Value) -> Option<Value> {
        let mut layer = &self.inner;
        loop {
            if let Some((k, v)) = &layer.entry {
                if k.equals(key) {
                    return Some(v.clone());
                }
            }
            match &layer.parent {
                Some(parent) => layer = &parent.inner,
                None => return None,
            }
        }
    }

    /// Derives a cancelable context. The returned cell cancels only the
    /// derived context (and anything later derived from it), never the
    /// receiver.
    pub fn cancelable(&self) -> (Context, CancelCell) {
        let cell = CancelCell::new();
        let ctx = self.layered(None, Some(cell.clone()), None, None);
        (ctx, cell)
    }

    /// Derives a cancelable context that additionally expires at
    /// `deadline`.
    pub fn with_deadline(&self, deadline: Instant) -> (Context, CancelCell) {
        let cell = CancelCell::new();
        let ctx = self.layered(None, Some(cell.clone()), Some(deadline), None);
        (ctx, cell)
    }

    /// The cell attached directly to this context value, if any. Cells
    /// on ancestor layers are deliberately not reachable here: holding a
    /// derived context does not grant the right to cancel its parent.
    pub fn cancel_handle(&self) -> Option<CancelCell> {
        self.inner.cancel.clone()
    }

    /// True when any layer in the chain has been canceled or has an
    /// expired deadline.
    pub fn is_canceled(&self) -> bool {
        let now = Instant::now();
        let mut layer = &self.inner;
        loop {
            if let Some(cell) = &layer.cancel {
                if cell.is_canceled() {
                    return true;
                }
            }
            if let Some(deadline) = layer.deadline {
                if deadline <= now {
                    return true;
                }
            }
            match &layer.parent {
                Some(parent) => layer = &parent.inner,
                None => return false,
            }
        }
    }

    /// Earliest deadline across the chain.
    pub fn deadline(&self) -> Option<Instant> {
        let mut earliest: Option<Instant> = None;
        let mut layer = &self.inner;
        loop {
            if let Some(deadline) = layer.deadline {
                earliest = Some(match earliest {
                    Some(current) => current.min(deadline),
                    None => deadline,
                });
            }
            match &layer.parent {
                Some(parent) => layer = &parent.inner,
                None => return earliest,
            }
        }
    }

    /// The error a canceled execution reports. Deadline expiry takes
    /// precedence over explicit cancellation.
    pub fn cancel_error(&self) -> Error {
        match self.deadline() {
            Some(deadline) if deadline <= Instant::now() => Error::DeadlineExceeded,
            _ => Error::Canceled,
        }
    }

    /// Registers `f` to run when any cell in the chain cancels. Fires
    /// immediately when the context is already canceled. Deadlines that
    /// expire later do not fire the callback, callers watching a
    /// deadline combine this with a timed wait.
    pub fn on_cancel(&self, f: impl Fn() + Send + Sync + 'static) -> CancelWatch {
        let callback: Waiter = Arc::new(f);
        if self.is_canceled() {
            callback();
            return CancelWatch {
                _callback: callback,
            };
        }
        let mut layer = &self.inner;
        loop {
            if let Some(cell) = &layer.cancel {
                cell.add_waiter(&callback);
            }
            match &layer.parent {
                Some(parent) => layer = &parent.inner,
                None => break,
            }
        }
        CancelWatch {
            _callback: callback,
        }
    }

    /// Derives a context carrying a function caller for
    /// [`Context::call`]. The newest caller on the chain wins.
    pub fn with_caller(&self, caller: Arc<dyn FunctionCaller>) -> Context {
        self.layered(None, None, None, Some(caller))
    }

    pub fn caller(&self) -> Option<Arc<dyn FunctionCaller>> {
        let mut layer = &self.inner;
        loop {
            if let Some(caller) = &layer.caller {
                return Some(caller.clone());
            }
            match &layer.parent {
                Some(parent) => layer = &parent.inner,
                None => return None,
            }
        }
    }

    /// Calls a script-visible callable through the attached caller.
    pub fn call(&self, callee: &Value, args: &[Value]) -> Result<Value> {
        let caller = self.caller().ok_or(Error::CallerUnavailable)?;
        caller.call_value(self, callee, args)
    }

    /// Identity: both handles point at the same layer.
    pub fn same(&self, other: &Context) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Default for Context {
    fn default() -> Self {
        Context::background()
    }
}

/// Splits the leading context argument off a context-aware call's
/// argument list.
pub fn expect_context(args: &[Value]) -> Result<(Context, &[Value])> {
    match args.first() {
        Some(Value::Context(ctx)) => Ok((ctx.clone(), &args[1..])),
        Some(other) => Err(Error::InvalidArgumentType {
            name: "first".into(),
            expected: "context".into(),
            found: other.type_name().into(),
        }),
        None => Err(Error::WrongNumArguments),
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("canceled", &self.is_canceled())
            .field("deadline", &self.deadline())
            .finish_non_exhaustive()
    }
}
