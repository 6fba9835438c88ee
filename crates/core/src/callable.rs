//! Type-erased callables.
//!
//! Two calling conventions are supported:
//!
//! - [`Callable::Fixed`] takes the argument slice as-is. No per-argument
//!   conversion happens, which makes it the fast path under load.
//! - [`Callable::Dynamic`] takes owned arguments and returns result values.
//!   Ordinary closures are lifted into this shape by the [`IntoDynamic`]
//!   adapter shims, which convert each argument with [`FromValue`] and the
//!   return value with [`IntoReturn`].

use std::fmt;
use std::fmt::Display;
use std::sync::Arc;

use crate::error::CallError;
use crate::value::{extract, Value};

pub type FixedFn = Arc<dyn Fn(&[Value]) + Send + Sync>;
pub type DynamicFn = Arc<dyn Fn(Vec<Value>) -> Result<Vec<Value>, CallError> + Send + Sync>;

#[derive(Clone)]
pub enum Callable {
    Fixed(FixedFn),
    Dynamic(DynamicFn),
}

impl Callable {
    /// Wrap a function using the fixed calling convention.
    pub fn fixed<F>(f: F) -> Self
    where
        F: Fn(&[Value]) + Send + Sync + 'static,
    {
        Callable::Fixed(Arc::new(f))
    }

    /// Wrap an ordinary closure of up to four typed arguments.
    pub fn dynamic<Args, F: IntoDynamic<Args>>(f: F) -> Self {
        Callable::Dynamic(f.into_dynamic())
    }

    /// Wrap a function that already works on raw argument vectors.
    pub fn raw<F>(f: F) -> Self
    where
        F: Fn(Vec<Value>) -> Result<Vec<Value>, CallError> + Send + Sync + 'static,
    {
        Callable::Dynamic(Arc::new(f))
    }

    pub fn is_fixed(&self) -> bool {
        matches!(self, Callable::Fixed(_))
    }

    /// Invoke through the fixed calling convention only.
    pub fn call_strict(&self, args: &[Value]) -> Result<(), CallError> {
        match self {
            Callable::Fixed(f) => {
                f(args);
                Ok(())
            }
            Callable::Dynamic(_) => Err(CallError::StrictMismatch),
        }
    }

    /// Invoke generically. A fixed callable yields no results.
    pub fn call(&self, args: Vec<Value>) -> Result<Vec<Value>, CallError> {
        match self {
            Callable::Fixed(f) => {
                f(&args);
                Ok(Vec::new())
            }
            Callable::Dynamic(f) => f(args),
        }
    }
}

impl fmt::Debug for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Callable::Fixed(_) => f.write_str("Callable::Fixed"),
            Callable::Dynamic(_) => f.write_str("Callable::Dynamic"),
        }
    }
}

// ── Return conversion ───────────────────────────────────────────────

/// Conversion of a closure's return value into result values.
pub trait IntoReturn {
    fn into_return(self) -> Result<Vec<Value>, CallError>;
}

impl IntoReturn for () {
    fn into_return(self) -> Result<Vec<Value>, CallError> {
        Ok(Vec::new())
    }
}

macro_rules! impl_into_return_single {
    ($($t:ty),*) => {
        $(impl IntoReturn for $t {
            fn into_return(self) -> Result<Vec<Value>, CallError> {
                Ok(vec![Value::from(self)])
            }
        })*
    };
}

impl_into_return_single!(Value, bool, i32, i64, u32, f64, String, &'static str, Vec<u8>);

impl<A: Into<Value>, B: Into<Value>> IntoReturn for (A, B) {
    fn into_return(self) -> Result<Vec<Value>, CallError> {
        Ok(vec![self.0.into(), self.1.into()])
    }
}

impl<A: Into<Value>, B: Into<Value>, C: Into<Value>> IntoReturn for (A, B, C) {
    fn into_return(self) -> Result<Vec<Value>, CallError> {
        Ok(vec![self.0.into(), self.1.into(), self.2.into()])
    }
}

impl<R: IntoReturn, E: Display> IntoReturn for Result<R, E> {
    fn into_return(self) -> Result<Vec<Value>, CallError> {
        match self {
            Ok(r) => r.into_return(),
            Err(e) => Err(CallError::Failed(e.to_string())),
        }
    }
}

// ── Argument adapters ───────────────────────────────────────────────

/// Adapter shim turning a typed closure into a [`DynamicFn`].
///
/// `Args` is the tuple of argument types; it only exists to keep the
/// implementations for different arities apart.
pub trait IntoDynamic<Args>: Send + Sync + 'static {
    fn into_dynamic(self) -> DynamicFn;
}

macro_rules! count_idents {
    () => { 0usize };
    ($head:ident $($tail:ident)*) => { 1usize + count_idents!($($tail)*) };
}

macro_rules! impl_into_dynamic {
    ($($arg:ident),*) => {
        #[allow(non_snake_case, unused_mut, unused_variables)]
        impl<F, R, $($arg),*> IntoDynamic<($($arg,)*)> for F
        where
            F: Fn($($arg),*) -> R + Send + Sync + 'static,
            R: IntoReturn,
            $($arg: crate::value::FromValue + 'static,)*
        {
            fn into_dynamic(self) -> DynamicFn {
                Arc::new(move |args: Vec<Value>| {
                    let expected = count_idents!($($arg)*);
                    if args.len() != expected {
                        return Err(CallError::Arity { expected, got: args.len() });
                    }
                    let mut args = args.into_iter().enumerate();
                    $(
                        let $arg = match args.next() {
                            Some((index, value)) => extract::<$arg>(value, index)?,
                            None => return Err(CallError::Arity { expected, got: 0 }),
                        };
                    )*
                    (self)($($arg),*).into_return()
                })
            }
        }
    };
}

impl_into_dynamic!();
impl_into_dynamic!(A1);
impl_into_dynamic!(A1, A2);
impl_into_dynamic!(A1, A2, A3);
impl_into_dynamic!(A1, A2, A3, A4);
