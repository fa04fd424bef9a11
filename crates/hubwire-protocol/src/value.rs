//! Semantic type tags for hub method parameters and stream channels.
//!
//! JSON has a single number type, so the same wire value is checked strictly
//! when bound to a method argument and narrowed leniently when routed into a
//! stream channel.

use std::fmt;

use serde_json::{Number, Value};

use crate::error::ValueError;
use crate::raw::RawPayload;

/// The semantic type of a parameter or channel element.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ValueKind {
    /// Any JSON value, including `null`.
    Any,
    Bool,
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
    String,
    /// A JSON array whose elements all have the inner kind.
    Sequence(Box<ValueKind>),
}

impl ValueKind {
    pub fn sequence(inner: ValueKind) -> Self {
        Self::Sequence(Box::new(inner))
    }

    pub fn is_numeric(&self) -> bool {
        self.integer_range().is_some() || matches!(self, Self::F32 | Self::F64)
    }

    fn integer_range(&self) -> Option<(i128, i128)> {
        let range = match self {
            Self::I8 => (i8::MIN as i128, i8::MAX as i128),
            Self::I16 => (i16::MIN as i128, i16::MAX as i128),
            Self::I32 => (i32::MIN as i128, i32::MAX as i128),
            Self::I64 => (i64::MIN as i128, i64::MAX as i128),
            Self::U8 => (0, u8::MAX as i128),
            Self::U16 => (0, u16::MAX as i128),
            Self::U32 => (0, u32::MAX as i128),
            Self::U64 => (0, u64::MAX as i128),
            _ => return None,
        };
        Some(range)
    }

    /// Decode a method argument, rejecting anything that does not fit exactly.
    ///
    /// Integers must be whole and in range; `null` only fits [`ValueKind::Any`].
    pub fn decode_argument(&self, raw: &RawPayload) -> Result<Value, ValueError> {
        let value = raw.to_value()?;
        self.check(&value)?;
        Ok(value)
    }

    /// Check a decoded value against this kind without converting it.
    pub fn check(&self, value: &Value) -> Result<(), ValueError> {
        if let Some((min, max)) = self.integer_range() {
            let Value::Number(n) = value else {
                return Err(self.mismatch(value));
            };
            let Some(exact) = exact_integer(n) else {
                return Err(ValueError::KindMismatch {
                    expected: self.clone(),
                    found: "fractional number",
                });
            };
            if exact < min || exact > max {
                return Err(self.out_of_range(n));
            }
            return Ok(());
        }

        match (self, value) {
            (Self::Any, _) => Ok(()),
            (Self::Bool, Value::Bool(_)) => Ok(()),
            (Self::String, Value::String(_)) => Ok(()),
            (Self::F64, Value::Number(_)) => Ok(()),
            (Self::F32, Value::Number(n)) => match n.as_f64() {
                Some(f) if f.abs() <= f32::MAX as f64 => Ok(()),
                _ => Err(self.out_of_range(n)),
            },
            (Self::Sequence(inner), Value::Array(items)) => {
                items.iter().try_for_each(|item| inner.check(item))
            }
            _ => Err(self.mismatch(value)),
        }
    }

    /// Convert a stream item into this channel's element type.
    ///
    /// Numbers are narrowed rather than rejected: fractions truncate toward
    /// zero and out-of-range values saturate at the type's bounds. A number
    /// sent to a string channel becomes its decimal text. Arrays are only
    /// accepted by sequence channels.
    pub fn narrow_item(&self, value: Value) -> Result<Value, ValueError> {
        if let Some((min, max)) = self.integer_range() {
            let Value::Number(n) = &value else {
                return Err(self.mismatch(&value));
            };
            let narrowed = truncate_integer(n).clamp(min, max);
            return Ok(if min < 0 {
                Value::from(narrowed as i64)
            } else {
                Value::from(narrowed as u64)
            });
        }

        match (self, value) {
            (Self::Any, value) => Ok(value),
            (Self::F64, Value::Number(n)) => Ok(Value::Number(n)),
            (Self::F32, Value::Number(n)) => {
                let f = n.as_f64().unwrap_or_default();
                let narrowed = (f.clamp(f32::MIN as f64, f32::MAX as f64) as f32) as f64;
                Number::from_f64(narrowed)
                    .map(Value::Number)
                    .ok_or_else(|| self.out_of_range(&n))
            }
            (Self::String, Value::Number(n)) => Ok(Value::String(n.to_string())),
            (Self::String, value @ Value::String(_)) => Ok(value),
            (Self::Bool, value @ Value::Bool(_)) => Ok(value),
            (Self::Sequence(inner), Value::Array(items)) => items
                .into_iter()
                .map(|item| inner.narrow_item(item))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            (_, value) => Err(self.mismatch(&value)),
        }
    }

    fn mismatch(&self, found: &Value) -> ValueError {
        ValueError::KindMismatch {
            expected: self.clone(),
            found: json_kind(found),
        }
    }

    fn out_of_range(&self, value: &Number) -> ValueError {
        ValueError::OutOfRange {
            kind: self.clone(),
            value: value.to_string(),
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => f.write_str("any"),
            Self::Bool => f.write_str("bool"),
            Self::I8 => f.write_str("i8"),
            Self::I16 => f.write_str("i16"),
            Self::I32 => f.write_str("i32"),
            Self::I64 => f.write_str("i64"),
            Self::U8 => f.write_str("u8"),
            Self::U16 => f.write_str("u16"),
            Self::U32 => f.write_str("u32"),
            Self::U64 => f.write_str("u64"),
            Self::F32 => f.write_str("f32"),
            Self::F64 => f.write_str("f64"),
            Self::String => f.write_str("string"),
            Self::Sequence(inner) => write!(f, "[{inner}]"),
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn exact_integer(n: &Number) -> Option<i128> {
    n.as_i64()
        .map(i128::from)
        .or_else(|| n.as_u64().map(i128::from))
}

fn truncate_integer(n: &Number) -> i128 {
    match exact_integer(n) {
        Some(exact) => exact,
        // Float-to-int `as` truncates toward zero, saturates, and maps NaN to 0.
        None => n.as_f64().map(|f| f as i128).unwrap_or_default(),
    }
}
