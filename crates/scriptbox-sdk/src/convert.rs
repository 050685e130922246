//! Conversions between Rust types and [`Value`]
//!
//! Host natives receive `&[Value]` and return a `Value`; these traits keep
//! their bodies free of manual matching.
//!
//! # Example
//!
//! ```ignore
//! use scriptbox_sdk::{FromValue, IntoValue, NativeResult, Value};
//!
//! fn clamp(args: &[Value]) -> NativeResult<Value> {
//!     let v = i64::from_value(&args[0])?;
//!     Ok(v.clamp(0, 100).into_value())
//! }
//! ```

use crate::error::{NativeError, NativeResult};
use crate::value::Value;

/// Extract a Rust value from a script value
pub trait FromValue: Sized {
    /// Convert, failing with `TypeMismatch` on the wrong variant
    fn from_value(value: &Value) -> NativeResult<Self>;
}

/// Wrap a Rust value as a script value
pub trait IntoValue {
    /// Convert into a `Value`
    fn into_value(self) -> Value;
}

fn mismatch(expected: &str, got: &Value) -> NativeError {
    NativeError::TypeMismatch {
        expected: expected.to_string(),
        got: got.value_type().name().to_string(),
    }
}

impl FromValue for Value {
    fn from_value(value: &Value) -> NativeResult<Self> {
        Ok(value.clone())
    }
}

impl FromValue for bool {
    fn from_value(value: &Value) -> NativeResult<Self> {
        value.as_bool().ok_or_else(|| mismatch("bool", value))
    }
}

impl FromValue for i64 {
    fn from_value(value: &Value) -> NativeResult<Self> {
        value.as_int().ok_or_else(|| mismatch("int", value))
    }
}

impl FromValue for i32 {
    fn from_value(value: &Value) -> NativeResult<Self> {
        let wide = value.as_int().ok_or_else(|| mismatch("int", value))?;
        i32::try_from(wide)
            .map_err(|_| NativeError::ArgumentError(format!("{} does not fit in i32", wide)))
    }
}

impl FromValue for f64 {
    fn from_value(value: &Value) -> NativeResult<Self> {
        value.as_float().ok_or_else(|| mismatch("float", value))
    }
}

impl FromValue for f32 {
    fn from_value(value: &Value) -> NativeResult<Self> {
        Ok(f64::from_value(value)? as f32)
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> NativeResult<Self> {
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| mismatch("string", value))
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> NativeResult<Self> {
        if value.is_null() {
            Ok(None)
        } else {
            T::from_value(value).map(Some)
        }
    }
}

impl IntoValue for Value {
    fn into_value(self) -> Value {
        self
    }
}

impl IntoValue for () {
    fn into_value(self) -> Value {
        Value::Null
    }
}

impl IntoValue for bool {
    fn into_value(self) -> Value {
        Value::Bool(self)
    }
}

impl IntoValue for i64 {
    fn into_value(self) -> Value {
        Value::Int(self)
    }
}

impl IntoValue for i32 {
    fn into_value(self) -> Value {
        Value::Int(self as i64)
    }
}

impl IntoValue for f64 {
    fn into_value(self) -> Value {
        Value::Float(self)
    }
}

impl IntoValue for f32 {
    fn into_value(self) -> Value {
        Value::Float(self as f64)
    }
}

impl IntoValue for String {
    fn into_value(self) -> Value {
        Value::str(self)
    }
}

impl IntoValue for &str {
    fn into_value(self) -> Value {
        Value::str(self)
    }
}

impl<T: IntoValue> IntoValue for Option<T> {
    fn into_value(self) -> Value {
        match self {
            Some(v) => v.into_value(),
            None => Value::Null,
        }
    }
}

macro_rules! from_via_into_value {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    v.into_value()
                }
            }
        )*
    };
}

from_via_into_value!(bool, i64, i32, f64, f32, String, &str);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_value_mismatch() {
        let err = i64::from_value(&Value::str("nope")).unwrap_err();
        assert_eq!(
            err,
            NativeError::TypeMismatch {
                expected: "int".to_string(),
                got: "string".to_string()
            }
        );
    }

    #[test]
    fn test_i32_range_check() {
        assert_eq!(i32::from_value(&Value::Int(7)), Ok(7));
        assert!(i32::from_value(&Value::Int(i64::MAX)).is_err());
    }

    #[test]
    fn test_option_round_trip() {
        assert_eq!(Option::<i64>::from_value(&Value::Null), Ok(None));
        assert_eq!(Some(3i64).into_value(), Value::Int(3));
        assert_eq!(Value::from("hi"), Value::str("hi"));
    }
}
