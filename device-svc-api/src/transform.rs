//! Numeric transform engine (spec §4.4).
//!
//! Float path, outgoing: `x <- base^x` (if enabled), then `x <- x *
//! scale`, then `x <- x + offset`; non-finite intermediates fail with
//! `Error::Overflow`. Incoming is the exact inverse, in reverse order,
//! skipping any disabled stage.
//!
//! Integer path, outgoing: mask (bitwise AND), shift (negative left,
//! positive right), base (integer power), scale (multiply), offset
//! (add); overflow of the declared type fails with `Error::Overflow`.
//! Incoming inverts in reverse order.
//!
//! Both paths are driven from a single wide accumulator (`f64` for
//! floats, `i128` for integers) so the arithmetic for every declared
//! width shares one implementation, with the final narrowing back to
//! the declared type as the only width-specific step -- this is where
//! overflow is actually caught.

use crate::device::resource::{NumericTransform, TypeCode};
use crate::{Error, Value};

pub fn forward(value: &Value, transform: &NumericTransform, type_code: &TypeCode) -> Result<Value, Error> {
    if type_code.is_float() {
        forward_float(value, transform, type_code)
    } else {
        forward_int(value, transform, type_code)
    }
}

pub fn inverse(value: &Value, transform: &NumericTransform, type_code: &TypeCode) -> Result<Value, Error> {
    if type_code.is_float() {
        inverse_float(value, transform, type_code)
    } else {
        inverse_int(value, transform, type_code)
    }
}

fn as_f64(value: &Value) -> Result<f64, Error> {
    value.as_f64().ok_or(Error::TypeError)
}

fn narrow_float(x: f64, type_code: &TypeCode) -> Result<Value, Error> {
    if !x.is_finite() {
        return Err(Error::Overflow);
    }
    match type_code {
        TypeCode::F32 => {
            let narrowed = x as f32;
            if !narrowed.is_finite() {
                return Err(Error::Overflow);
            }
            Ok(Value::F32(narrowed))
        }
        TypeCode::F64 => Ok(Value::F64(x)),
        _ => Err(Error::TypeError),
    }
}

fn forward_float(value: &Value, t: &NumericTransform, type_code: &TypeCode) -> Result<Value, Error> {
    let mut x = as_f64(value)?;

    if let Some(base) = t.base {
        x = base.powf(x);
        if !x.is_finite() {
            return Err(Error::Overflow);
        }
    }
    if let Some(scale) = t.scale {
        x *= scale;
        if !x.is_finite() {
            return Err(Error::Overflow);
        }
    }
    if let Some(offset) = t.offset {
        x += offset;
    }

    narrow_float(x, type_code)
}

fn inverse_float(value: &Value, t: &NumericTransform, type_code: &TypeCode) -> Result<Value, Error> {
    let mut x = as_f64(value)?;

    if let Some(offset) = t.offset {
        x -= offset;
    }
    if let Some(scale) = t.scale {
        if scale == 0.0 {
            return Err(Error::Overflow);
        }
        x /= scale;
        if !x.is_finite() {
            return Err(Error::Overflow);
        }
    }
    if let Some(base) = t.base {
        x = x.log(base);
        if !x.is_finite() {
            return Err(Error::Overflow);
        }
    }

    narrow_float(x, type_code)
}

fn to_i128(value: &Value) -> Result<i128, Error> {
    match value {
        Value::I8(v) => Ok(*v as i128),
        Value::I16(v) => Ok(*v as i128),
        Value::I32(v) => Ok(*v as i128),
        Value::I64(v) => Ok(*v as i128),
        Value::U8(v) => Ok(*v as i128),
        Value::U16(v) => Ok(*v as i128),
        Value::U32(v) => Ok(*v as i128),
        Value::U64(v) => Ok(*v as i128),
        _ => Err(Error::TypeError),
    }
}

fn narrow_int(x: i128, type_code: &TypeCode) -> Result<Value, Error> {
    macro_rules! narrow {
        ($ty:ty, $variant:ident) => {
            <$ty>::try_from(x).map(Value::$variant).map_err(|_| Error::Overflow)
        };
    }
    match type_code {
        TypeCode::I8 => narrow!(i8, I8),
        TypeCode::I16 => narrow!(i16, I16),
        TypeCode::I32 => narrow!(i32, I32),
        TypeCode::I64 => narrow!(i64, I64),
        TypeCode::U8 => narrow!(u8, U8),
        TypeCode::U16 => narrow!(u16, U16),
        TypeCode::U32 => narrow!(u32, U32),
        TypeCode::U64 => narrow!(u64, U64),
        _ => Err(Error::TypeError),
    }
}

fn apply_shift(x: i128, shift: i32) -> Result<i128, Error> {
    if shift < 0 {
        x.checked_shl((-shift) as u32).ok_or(Error::Overflow)
    } else if shift > 0 {
        Ok(x >> shift)
    } else {
        Ok(x)
    }
}

fn apply_unshift(x: i128, shift: i32) -> Result<i128, Error> {
    // Inverse of apply_shift: reverse direction.
    apply_shift(x, -shift)
}

fn forward_int(value: &Value, t: &NumericTransform, type_code: &TypeCode) -> Result<Value, Error> {
    let mut x = to_i128(value)?;

    if let Some(mask) = t.mask {
        x &= mask as i128;
    }
    if let Some(shift) = t.shift {
        x = apply_shift(x, shift)?;
    }
    if let Some(base) = t.base {
        let base = base as i128;
        let exp = u32::try_from(x).map_err(|_| Error::Overflow)?;
        x = base.checked_pow(exp).ok_or(Error::Overflow)?;
    }
    if let Some(scale) = t.scale {
        let scale = scale as i128;
        x = x.checked_mul(scale).ok_or(Error::Overflow)?;
    }
    if let Some(offset) = t.offset {
        let offset = offset as i128;
        x = x.checked_add(offset).ok_or(Error::Overflow)?;
    }

    narrow_int(x, type_code)
}

fn inverse_int(value: &Value, t: &NumericTransform, type_code: &TypeCode) -> Result<Value, Error> {
    let mut x = to_i128(value)?;

    if let Some(offset) = t.offset {
        let offset = offset as i128;
        x = x.checked_sub(offset).ok_or(Error::Overflow)?;
    }
    if let Some(scale) = t.scale {
        let scale = scale as i128;
        if scale == 0 {
            return Err(Error::Overflow);
        }
        x = x.checked_div(scale).ok_or(Error::Overflow)?;
    }
    if let Some(base) = t.base {
        let base = base as f64;
        let log = (x as f64).log(base);
        if !log.is_finite() {
            return Err(Error::Overflow);
        }
        x = log.round() as i128;
    }
    if let Some(shift) = t.shift {
        x = apply_unshift(x, shift)?;
    }
    if let Some(mask) = t.mask {
        x &= mask as i128;
    }

    narrow_int(x, type_code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scenario_s1_s2() {
        // Uint16, scale=10, offset=-5; driver returns 0x0010 (16) ->
        // event value = 10*16 + (-5) = 155; inverse recovers 0x0010.
        let t = NumericTransform { base: None, scale: Some(10.0), offset: Some(-5.0), shift: None, mask: None };

        let out = forward(&Value::U16(0x0010), &t, &TypeCode::U16).unwrap();
        assert_eq!(out, Value::U16(155));

        let back = inverse(&Value::U16(155), &t, &TypeCode::U16).unwrap();
        assert_eq!(back, Value::U16(0x0010));
    }

    #[test]
    fn test_float_roundtrip() {
        let t = NumericTransform { base: None, scale: Some(2.0), offset: Some(1.0), shift: None, mask: None };
        let out = forward(&Value::F64(10.0), &t, &TypeCode::F64).unwrap();
        assert_eq!(out, Value::F64(21.0));
        let back = inverse(&out, &t, &TypeCode::F64).unwrap();
        assert_eq!(back, Value::F64(10.0));
    }

    #[test]
    fn test_int_overflow() {
        let t = NumericTransform { base: None, scale: Some(1_000_000.0), offset: None, shift: None, mask: None };
        let result = forward(&Value::I32(i32::MAX), &t, &TypeCode::I32);
        assert_eq!(result, Err(Error::Overflow));
    }

    #[test]
    fn test_float_overflow() {
        let t = NumericTransform { base: Some(10.0), scale: None, offset: None, shift: None, mask: None };
        let result = forward(&Value::F64(1000.0), &t, &TypeCode::F64);
        assert_eq!(result, Err(Error::Overflow));
    }

    #[test]
    fn test_mask_and_shift() {
        let t = NumericTransform { base: None, scale: None, offset: None, shift: Some(4), mask: Some(0xFF) };
        let out = forward(&Value::I32(0x1F0), &t, &TypeCode::I32).unwrap();
        // mask: 0x1F0 & 0xFF = 0xF0; shift right 4 = 0xF = 15
        assert_eq!(out, Value::I32(15));
    }

    #[test]
    fn test_string_passthrough_is_type_error() {
        let t = NumericTransform::default();
        assert_eq!(forward(&Value::String("x".into()), &t, &TypeCode::I32), Err(Error::TypeError));
    }
}
