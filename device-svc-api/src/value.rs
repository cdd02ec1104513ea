//! The typed-value union carried by every reading (spec §3).

use crate::Error;
use std::collections::BTreeMap;
use std::convert::TryFrom;
use std::fmt;

/// One sampled or written value at one resource.
///
/// `Object` uses a `BTreeMap` rather than a `HashMap` so that JSON and
/// CBOR serialization of a reading's `objectValue` field is
/// deterministic field-order -- this is what makes round-trip
/// property R2 ("preserves the readings array up to field order")
/// checkable without a canonicalization pass.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Bool(bool),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
    String(String),
    /// Opaque binary data plus its media-type tag (e.g.
    /// `"application/octet-stream"`, `"image/jpeg"`).
    Binary(Vec<u8>, String),
    BoolArray(Vec<bool>),
    I64Array(Vec<i64>),
    F64Array(Vec<f64>),
    StringArray(Vec<String>),
    Object(BTreeMap<String, Value>),
}

impl Value {
    /// The wire-format type label used in a reading's `valueType`
    /// field (spec §4.3 step 8).
    pub fn type_label(&self) -> &'static str {
        match self {
            Value::Bool(_) => "Bool",
            Value::I8(_) => "Int8",
            Value::I16(_) => "Int16",
            Value::I32(_) => "Int32",
            Value::I64(_) => "Int64",
            Value::U8(_) => "Uint8",
            Value::U16(_) => "Uint16",
            Value::U32(_) => "Uint32",
            Value::U64(_) => "Uint64",
            Value::F32(_) => "Float32",
            Value::F64(_) => "Float64",
            Value::String(_) => "String",
            Value::Binary(..) => "Binary",
            Value::BoolArray(_) => "BoolArray",
            Value::I64Array(_) => "Int64Array",
            Value::F64Array(_) => "Float64Array",
            Value::StringArray(_) => "StringArray",
            Value::Object(_) => "Object",
        }
    }

    pub fn is_binary(&self) -> bool {
        matches!(self, Value::Binary(..))
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            Value::I8(_)
                | Value::I16(_)
                | Value::I32(_)
                | Value::I64(_)
                | Value::U8(_)
                | Value::U16(_)
                | Value::U32(_)
                | Value::U64(_)
                | Value::F32(_)
                | Value::F64(_)
        )
    }

    /// Widens any numeric variant to `f64`. Used by the on-change
    /// threshold comparison (spec §4.6) and by bounds validation
    /// (spec §4.4).
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::I8(v) => Some(*v as f64),
            Value::I16(v) => Some(*v as f64),
            Value::I32(v) => Some(*v as f64),
            Value::I64(v) => Some(*v as f64),
            Value::U8(v) => Some(*v as f64),
            Value::U16(v) => Some(*v as f64),
            Value::U32(v) => Some(*v as f64),
            Value::U64(v) => Some(*v as f64),
            Value::F32(v) => Some(*v as f64),
            Value::F64(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(v) => write!(f, "{}", v),
            Value::I8(v) => write!(f, "{}", v),
            Value::I16(v) => write!(f, "{}", v),
            Value::I32(v) => write!(f, "{}", v),
            Value::I64(v) => write!(f, "{}", v),
            Value::U8(v) => write!(f, "{}", v),
            Value::U16(v) => write!(f, "{}", v),
            Value::U32(v) => write!(f, "{}", v),
            Value::U64(v) => write!(f, "{}", v),
            Value::F32(v) => write!(f, "{}", v),
            Value::F64(v) => write!(f, "{}", v),
            Value::String(v) => write!(f, "{}", v),
            Value::Binary(data, mt) => write!(f, "<{} bytes of {}>", data.len(), mt),
            Value::BoolArray(v) => write!(f, "{:?}", v),
            Value::I64Array(v) => write!(f, "{:?}", v),
            Value::F64Array(v) => write!(f, "{:?}", v),
            Value::StringArray(v) => write!(f, "{:?}", v),
            Value::Object(_) => write!(f, "<object>"),
        }
    }
}

macro_rules! value_conv {
    ($ty:ty, $variant:ident) => {
        impl From<$ty> for Value {
            fn from(v: $ty) -> Self {
                Value::$variant(v)
            }
        }

        impl TryFrom<Value> for $ty {
            type Error = Error;

            fn try_from(value: Value) -> Result<Self, Self::Error> {
                if let Value::$variant(v) = value {
                    Ok(v)
                } else {
                    Err(Error::TypeError)
                }
            }
        }
    };
}

value_conv!(bool, Bool);
value_conv!(i8, I8);
value_conv!(i16, I16);
value_conv!(i32, I32);
value_conv!(i64, I64);
value_conv!(u8, U8);
value_conv!(u16, U16);
value_conv!(u32, U32);
value_conv!(u64, U64);
value_conv!(f32, F32);
value_conv!(f64, F64);
value_conv!(String, String);

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!("true", format!("{}", Value::Bool(true)));
        assert_eq!("-5", format!("{}", Value::I32(-5)));
        assert_eq!("1.5", format!("{}", Value::F64(1.5)));
        assert_eq!("hi", format!("{}", Value::String("hi".into())));
    }

    #[test]
    fn test_conversions() {
        assert_eq!(Value::from(true), Value::Bool(true));
        assert_eq!(bool::try_from(Value::Bool(true)), Ok(true));
        assert!(bool::try_from(Value::I32(0)).is_err());

        assert_eq!(Value::from(5i32), Value::I32(5));
        assert_eq!(i32::try_from(Value::I32(5)), Ok(5));
        assert!(i32::try_from(Value::F64(5.0)).is_err());
    }

    #[test]
    fn test_as_f64() {
        assert_eq!(Value::I32(5).as_f64(), Some(5.0));
        assert_eq!(Value::F64(1.5).as_f64(), Some(1.5));
        assert_eq!(Value::String("x".into()).as_f64(), None);
    }

    #[test]
    fn test_type_label() {
        assert_eq!(Value::Bool(true).type_label(), "Bool");
        assert_eq!(Value::Binary(vec![], "application/octet-stream".into()).type_label(), "Binary");
        assert!(Value::Binary(vec![1], "x".into()).is_binary());
        assert!(!Value::Bool(true).is_binary());
    }
}
