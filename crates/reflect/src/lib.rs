// Allow unwrap in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]

//! Tarn reflect
//!
//! Bridges host-defined Rust structs into the script value model. A
//! type describes its fields, methods and embeddings once through
//! [`TypeBuilder`]; the session's [`TypeRegistry`] caches the resulting
//! descriptor and hands out callable type values. Instances hold the
//! live host value, so script-side mutation is visible to the host and
//! nested fields are reached by reference.

pub mod descriptor;
pub mod instance;
pub mod marshal;
pub mod registry;

pub use descriptor::{HostStruct, ReflectedType, TypeBuilder};
pub use instance::{BoundMethod, ReflectedInstance};
pub use marshal::{CallOutcome, HostMethod};
pub use registry::TypeRegistry;
