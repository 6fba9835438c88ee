//! Opaque argument values.
//!
//! Tasks carry their arguments as a `Vec<Value>`. Scalars, strings and byte
//! buffers travel inline; anything else can be shared through
//! [`Value::Shared`] and recovered on the far side by downcasting.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::error::CallError;

#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Shared(Arc<dyn Any + Send + Sync>),
}

impl Value {
    /// Wrap an arbitrary value so it can be passed through a task.
    pub fn shared<T: Any + Send + Sync>(value: T) -> Self {
        Value::Shared(Arc::new(value))
    }

    /// Short name of the variant, used in argument errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::List(_) => "list",
            Value::Shared(_) => "shared",
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_shared<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        match self {
            Value::Shared(v) => Arc::clone(v).downcast::<T>().ok(),
            _ => None,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => f.write_str("nil"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Str(s) => write!(f, "{s:?}"),
            Value::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            Value::List(items) => f.debug_list().entries(items).finish(),
            Value::Shared(_) => f.write_str("<shared>"),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Shared(a), Value::Shared(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

// ── Conversions into Value ──────────────────────────────────────────

macro_rules! impl_from_int {
    ($($t:ty),*) => {
        $(impl From<$t> for Value {
            fn from(v: $t) -> Self {
                Value::Int(i64::from(v))
            }
        })*
    };
}

impl_from_int!(i8, i16, i32, i64, u8, u16, u32);

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::Nil
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(f64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::List(v)
    }
}

impl<T: Any + Send + Sync> From<Arc<T>> for Value {
    fn from(v: Arc<T>) -> Self {
        Value::Shared(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Nil, Into::into)
    }
}

// ── Conversions out of Value ────────────────────────────────────────

/// Extraction of a typed argument from a [`Value`].
///
/// On mismatch the original value is handed back so the caller can report
/// what it actually found.
pub trait FromValue: Sized {
    /// Human-readable name of the accepted shape.
    const EXPECTED: &'static str;

    fn from_value(value: Value) -> Result<Self, Value>;
}

/// Extract argument `index`, mapping a mismatch to [`CallError::ArgType`].
pub fn extract<T: FromValue>(value: Value, index: usize) -> Result<T, CallError> {
    T::from_value(value).map_err(|found| CallError::ArgType {
        index,
        expected: T::EXPECTED,
        found: found.kind(),
    })
}

impl FromValue for Value {
    const EXPECTED: &'static str = "any";

    fn from_value(value: Value) -> Result<Self, Value> {
        Ok(value)
    }
}

impl FromValue for bool {
    const EXPECTED: &'static str = "bool";

    fn from_value(value: Value) -> Result<Self, Value> {
        match value {
            Value::Bool(v) => Ok(v),
            other => Err(other),
        }
    }
}

macro_rules! impl_from_value_int {
    ($($t:ty),*) => {
        $(impl FromValue for $t {
            const EXPECTED: &'static str = "int";

            fn from_value(value: Value) -> Result<Self, Value> {
                match value {
                    Value::Int(v) => <$t>::try_from(v).map_err(|_| Value::Int(v)),
                    other => Err(other),
                }
            }
        })*
    };
}

impl_from_value_int!(i32, i64, u32, u64, usize);

impl FromValue for f64 {
    const EXPECTED: &'static str = "float";

    fn from_value(value: Value) -> Result<Self, Value> {
        match value {
            Value::Float(v) => Ok(v),
            Value::Int(v) => Ok(v as f64),
            other => Err(other),
        }
    }
}

impl FromValue for String {
    const EXPECTED: &'static str = "string";

    fn from_value(value: Value) -> Result<Self, Value> {
        match value {
            Value::Str(s) => Ok(s),
            other => Err(other),
        }
    }
}

impl FromValue for Vec<u8> {
    const EXPECTED: &'static str = "bytes";

    fn from_value(value: Value) -> Result<Self, Value> {
        match value {
            Value::Bytes(b) => Ok(b),
            other => Err(other),
        }
    }
}

impl FromValue for Vec<Value> {
    const EXPECTED: &'static str = "list";

    fn from_value(value: Value) -> Result<Self, Value> {
        match value {
            Value::List(items) => Ok(items),
            other => Err(other),
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    const EXPECTED: &'static str = T::EXPECTED;

    fn from_value(value: Value) -> Result<Self, Value> {
        match value {
            Value::Nil => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

impl<T: Any + Send + Sync> FromValue for Arc<T> {
    const EXPECTED: &'static str = "shared";

    fn from_value(value: Value) -> Result<Self, Value> {
        match value {
            Value::Shared(v) => Arc::clone(&v).downcast::<T>().map_err(|_| Value::Shared(v)),
            other => Err(other),
        }
    }
}

/// Build a `Vec<Value>` from a list of convertible expressions.
#[macro_export]
macro_rules! args {
    () => {
        ::std::vec::Vec::<$crate::Value>::new()
    };
    ($($arg:expr),+ $(,)?) => {
        vec![$($crate::Value::from($arg)),+]
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_and_conversions() {
        let args = crate::args![1, "two", 3.5, true, ()];
        let kinds: Vec<_> = args.iter().map(Value::kind).collect();
        assert_eq!(kinds, vec!["int", "string", "float", "bool", "nil"]);
        assert!(args[4].is_nil());
        assert_eq!(args[0].as_int(), Some(1));
    }

    #[test]
    fn extract_reports_index_and_kind() {
        let err = extract::<i64>(Value::from("x"), 2).unwrap_err();
        assert_eq!(
            err,
            CallError::ArgType {
                index: 2,
                expected: "int",
                found: "string"
            }
        );
    }

    #[test]
    fn int_narrowing_rejects_out_of_range() {
        assert!(u32::from_value(Value::Int(-1)).is_err());
        assert_eq!(u32::from_value(Value::Int(7)), Ok(7));
    }

    #[test]
    fn shared_round_trips_through_downcast() {
        #[derive(Debug, PartialEq)]
        struct Session(u32);

        let v = Value::shared(Session(9));
        let back: Arc<Session> = extract(v.clone(), 0).unwrap();
        assert_eq!(*back, Session(9));
        assert_eq!(v.as_shared::<Session>().map(|s| s.0), Some(9));
        assert!(extract::<Arc<String>>(v, 0).is_err());
    }

    #[test]
    fn option_maps_nil() {
        assert_eq!(Option::<i64>::from_value(Value::Nil), Ok(None));
        assert_eq!(Option::<i64>::from_value(Value::Int(3)), Ok(Some(3)));
    }
}
