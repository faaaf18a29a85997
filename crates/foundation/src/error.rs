//! Runtime error taxonomy.
//!
//! One shared enum for the whole workspace: the call trampoline forwards
//! callee errors unchanged, so every crate that can sit on a call path
//! reports through this type instead of wrapping it in its own.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Every failure the runtime reports to script or host callers.
///
/// All conditions are recoverable values; nothing in the core panics
/// across the API boundary.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    #[error("wrong number of arguments")]
    WrongNumArguments,

    #[error("invalid type for argument '{name}': expected {expected}, found {found}")]
    InvalidArgumentType {
        name: String,
        expected: String,
        found: String,
    },

    /// A sub-entry of a map argument has the wrong shape, e.g. a
    /// non-callable value under `funcs` in a struct definition.
    #[error("invalid value for key '{key}' of {map_name}: expected {expected}, found {found}")]
    InvalidMapIndexValueType {
        map_name: String,
        key: String,
        expected: String,
        found: String,
    },

    #[error("invalid index type: expected {expected}, found {found}")]
    InvalidIndexType { expected: String, found: String },

    #[error("index {index} out of bounds (len {len})")]
    IndexOutOfBounds { index: i64, len: usize },

    #[error("context is not cancelable")]
    NotCancelable,

    #[error("context canceled")]
    Canceled,

    #[error("context deadline exceeded")]
    DeadlineExceeded,

    #[error("unknown field '{name}' on {type_name}")]
    UnknownField { name: String, type_name: String },

    #[error("cannot assign {script_type} to field '{field}' of host type {host_type}")]
    NotAssignable {
        field: String,
        host_type: String,
        script_type: String,
    },

    #[error("callable expected, found nil")]
    NilCallable,

    #[error("not callable: {type_name}")]
    NotCallable { type_name: String },

    #[error("function caller not attached to context")]
    CallerUnavailable,

    #[error("'{name}' is not defined")]
    NotDefined { name: String },

    #[error("struct shape already released")]
    StructReleased,

    #[error("not indexable: {type_name}")]
    NotIndexable { type_name: String },

    #[error("not index-assignable: {type_name}")]
    NotIndexAssignable { type_name: String },

    /// Execution-reported and user errors, propagated verbatim.
    #[error("{0}")]
    Runtime(String),
}

impl Error {
    pub fn runtime(message: impl Into<String>) -> Self {
        Error::Runtime(message.into())
    }

    /// True for the two cancellation outcomes, which take precedence over
    /// any error the aborted execution produced on its own.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Error::Canceled | Error::DeadlineExceeded)
    }
}
