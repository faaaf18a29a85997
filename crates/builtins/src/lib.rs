// Allow unwrap in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
// linkme's distributed_slice registration expands to `#[link_section]`
// statics, which the `unsafe_code` lint counts as unsafe code.
#![allow(unsafe_code)]

//! Builtin function registry.
//!
//! Provides distributed registration for the native functions scripts
//! can call by name: context composition, struct definition and the
//! value utilities.
//!
//! # Architecture
//!
//! The registry uses [`linkme::distributed_slice`] for link-time
//! registration:
//!
//! 1. Each builtin declares a [`BuiltinDescriptor`] next to its
//!    implementation with `#[distributed_slice(BUILTINS)]`
//! 2. At link time all registrations are collected into [`BUILTINS`]
//! 3. At runtime the registry provides sorted, deterministic lookup for
//!    compilation and dispatch
//!
//! Builtins can therefore live anywhere in the workspace (including
//! downstream crates) while remaining discoverable by the compiler
//! facade.

pub use linkme;

use std::sync::LazyLock;

use linkme::distributed_slice;

use tarn_foundation::context::Context;
use tarn_foundation::error::{Error, Result};
use tarn_foundation::value::{NativeFunction, Value};

pub mod context;
pub mod structs;
pub mod values;

/// Signature shared by every builtin. The context is the caller's;
/// builtins that ignore it are still registered in this shape so the
/// dispatch policy stays uniform.
pub type BuiltinFn = fn(&Context, &[Value]) -> Result<Value>;

/// Descriptor for a registered builtin.
pub struct BuiltinDescriptor {
    /// Script-facing name.
    pub name: &'static str,
    /// Signature string for docs and tooling.
    pub signature: &'static str,
    /// One-line documentation.
    pub doc: &'static str,
    /// The implementation.
    pub func: BuiltinFn,
}

impl BuiltinDescriptor {
    /// The builtin as a first-class script value.
    pub fn as_value(&self) -> Value {
        Value::from(NativeFunction::with_context(self.name, self.func))
    }
}

/// Distributed slice collecting all builtin registrations.
#[distributed_slice]
pub static BUILTINS: [BuiltinDescriptor];

/// Link-section order is unspecified; every consumer goes through this
/// sorted view so slot assignment is deterministic.
static SORTED: LazyLock<Vec<&'static BuiltinDescriptor>> = LazyLock::new(|| {
    let mut all: Vec<_> = BUILTINS.iter().collect();
    all.sort_by_key(|b| b.name);
    all
});

/// All registered builtins, sorted by name.
pub fn all() -> &'static [&'static BuiltinDescriptor] {
    &SORTED
}

/// Look up a builtin by name.
pub fn lookup(name: &str) -> Option<&'static BuiltinDescriptor> {
    SORTED
        .binary_search_by(|b| b.name.cmp(name))
        .ok()
        .map(|i| SORTED[i])
}

/// All builtin names, sorted.
pub fn names() -> Vec<&'static str> {
    SORTED.iter().map(|b| b.name).collect()
}

pub fn is_known(name: &str) -> bool {
    lookup(name).is_some()
}

pub(crate) fn want_exact(args: &[Value], n: usize) -> Result<()> {
    if args.len() == n {
        Ok(())
    } else {
        Err(Error::WrongNumArguments)
    }
}

pub(crate) fn want_between(args: &[Value], lo: usize, hi: usize) -> Result<()> {
    if (lo..=hi).contains(&args.len()) {
        Ok(())
    } else {
        Err(Error::WrongNumArguments)
    }
}
