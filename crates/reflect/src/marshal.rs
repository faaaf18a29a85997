//! Marshaling between script calls and host method signatures.
//!
//! [`HostMethod`] is implemented for plain Rust closures over a small
//! family of signatures: a `&mut` receiver, an optional leading
//! [`Context`], then up to four [`FromValue`] arguments, returning any
//! [`CallOutcome`]. The marker parameter disambiguates the closure
//! family the way an extra generic usually does for handler traits.
//!
//! Return demarshaling follows the call protocol: `()` becomes
//! undefined, a single value stays a value, a tuple becomes an array
//! and a `Result` maps its error onto the script error channel.

use std::any::Any;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::SystemTime;

use tarn_foundation::context::Context;
use tarn_foundation::convert::{ordinal, FromValue, IntoValue};
use tarn_foundation::error::{Error, Result};
use tarn_foundation::value::{Array, Value};

use crate::descriptor::InvokeFn;

/// A host method return shape.
pub trait CallOutcome {
    fn into_call_result(self) -> Result<Value>;
}

macro_rules! impl_call_outcome {
    ($($t:ty),* $(,)?) => {
        $(
            impl CallOutcome for $t {
                fn into_call_result(self) -> Result<Value> {
                    Ok(self.into_value())
                }
            }
        )*
    };
}

impl_call_outcome!((), Value, bool, i64, i32, u32, usize, f64, f32, String, SystemTime);

impl<T: IntoValue> CallOutcome for Vec<T> {
    fn into_call_result(self) -> Result<Value> {
        Ok(self.into_value())
    }
}

impl<T: IntoValue> CallOutcome for Option<T> {
    fn into_call_result(self) -> Result<Value> {
        Ok(self.into_value())
    }
}

impl<T: CallOutcome> CallOutcome for std::result::Result<T, Error> {
    fn into_call_result(self) -> Result<Value> {
        self.and_then(CallOutcome::into_call_result)
    }
}

impl<A: IntoValue, B: IntoValue> CallOutcome for (A, B) {
    fn into_call_result(self) -> Result<Value> {
        Ok(Value::Array(Array::from_values(vec![
            self.0.into_value(),
            self.1.into_value(),
        ])))
    }
}

impl<A: IntoValue, B: IntoValue, C: IntoValue> CallOutcome for (A, B, C) {
    fn into_call_result(self) -> Result<Value> {
        Ok(Value::Array(Array::from_values(vec![
            self.0.into_value(),
            self.1.into_value(),
            self.2.into_value(),
        ])))
    }
}

/// Marker for methods that take only marshaled arguments.
pub struct Plain<A>(PhantomData<fn(A)>);

/// Marker for methods whose first parameter is the calling context.
pub struct WithCtx<A>(PhantomData<fn(A)>);

/// A callable usable as a reflected method body. `Marker` carries the
/// signature family so closure impls do not overlap.
pub trait HostMethod<T, Marker>: Send + Sync + 'static {
    fn invoke(&self, host: &mut T, ctx: &Context, args: &[Value]) -> Result<Value>;
}

fn extract<A: FromValue>(args: &[Value], index: usize) -> Result<A> {
    match args.get(index) {
        Some(value) => A::from_value(value).ok_or_else(|| Error::InvalidArgumentType {
            name: ordinal(index),
            expected: A::EXPECTED.into(),
            found: value.type_name().into(),
        }),
        None => Err(Error::WrongNumArguments),
    }
}

macro_rules! count {
    () => { 0usize };
    ($head:ident $(, $tail:ident)*) => { 1usize + count!($($tail),*) };
}

macro_rules! impl_host_method {
    ($( $arg:ident => $idx:expr ),*) => {
        impl<T, F, R, $($arg,)*> HostMethod<T, Plain<($($arg,)*)>> for F
        where
            T: 'static,
            F: Fn(&mut T, $($arg),*) -> R + Send + Sync + 'static,
            R: CallOutcome,
            $($arg: FromValue + 'static,)*
        {
            fn invoke(&self, host: &mut T, _ctx: &Context, args: &[Value]) -> Result<Value> {
                if args.len() != count!($($arg),*) {
                    return Err(Error::WrongNumArguments);
                }
                (self)(host, $(extract::<$arg>(args, $idx)?),*).into_call_result()
            }
        }

        impl<T, F, R, $($arg,)*> HostMethod<T, WithCtx<($($arg,)*)>> for F
        where
            T: 'static,
            F: Fn(&mut T, &Context, $($arg),*) -> R + Send + Sync + 'static,
            R: CallOutcome,
            $($arg: FromValue + 'static,)*
        {
            fn invoke(&self, host: &mut T, ctx: &Context, args: &[Value]) -> Result<Value> {
                if args.len() != count!($($arg),*) {
                    return Err(Error::WrongNumArguments);
                }
                (self)(host, ctx, $(extract::<$arg>(args, $idx)?),*).into_call_result()
            }
        }
    };
}

impl_host_method!();
impl_host_method!(A0 => 0);
impl_host_method!(A0 => 0, A1 => 1);
impl_host_method!(A0 => 0, A1 => 1, A2 => 2);
impl_host_method!(A0 => 0, A1 => 1, A2 => 2, A3 => 3);

/// Erases a [`HostMethod`] into the descriptor's invoke shape,
/// downcasting the receiver on the way in.
pub(crate) fn adapt<T, M, F>(f: F) -> InvokeFn
where
    T: 'static,
    F: HostMethod<T, M>,
{
    Arc::new(
        move |any: &mut dyn Any, ctx: &Context, args: &[Value]| match any.downcast_mut::<T>() {
            Some(host) => f.invoke(host, ctx, args),
            None => Err(Error::runtime("reflected receiver has unexpected type")),
        },
    )
}
