// Allow unwrap in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]

//! Tarn foundation
//!
//! The value model, error taxonomy, cancelable context and dynamic
//! struct objects everything else builds on. This crate knows nothing
//! about compilation or execution engines; it defines the shapes those
//! layers exchange.

pub mod code;
pub mod context;
pub mod convert;
pub mod error;
pub mod object;
pub mod structs;
pub mod value;

pub use context::{CancelCell, CancelWatch, Context, FunctionCaller};
pub use error::{Error, Result};
pub use object::RuntimeObject;
pub use value::{Array, Map, NativeFunction, NativeImpl, Value};
