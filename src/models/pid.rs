//! Pid Coercion
//!
//! Converts raw event field values into process identifiers.

use serde_json::Value;

use crate::error::PidParseError;

/// Operating-system process identifier (`pid_t`).
pub type Pid = i32;

// == Pid Value ==
/// The accepted source representations of a pid field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PidValue {
    /// Decimal string, e.g. `"1234"`
    Text(String),
    /// Signed integer of any width
    Signed(i128),
    /// Unsigned integer of any width
    Unsigned(u128),
}

impl PidValue {
    /// Classifies a JSON field value.
    ///
    /// Floats, booleans, nulls, arrays and objects are rejected.
    pub fn from_json(value: &Value) -> Result<Self, PidParseError> {
        match value {
            Value::String(s) => Ok(PidValue::Text(s.clone())),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(PidValue::Signed(i128::from(i)))
                } else if let Some(u) = n.as_u64() {
                    Ok(PidValue::Unsigned(u128::from(u)))
                } else {
                    Err(PidParseError::UnsupportedType("float"))
                }
            }
            Value::Bool(_) => Err(PidParseError::UnsupportedType("bool")),
            Value::Null => Err(PidParseError::UnsupportedType("null")),
            Value::Array(_) => Err(PidParseError::UnsupportedType("array")),
            Value::Object(_) => Err(PidParseError::UnsupportedType("object")),
        }
    }

    /// Converts to a pid, range-checking integers.
    pub fn to_pid(&self) -> Result<Pid, PidParseError> {
        match self {
            PidValue::Text(s) => s
                .parse::<Pid>()
                .map_err(|_| PidParseError::InvalidString(s.clone())),
            PidValue::Signed(i) => {
                Pid::try_from(*i).map_err(|_| PidParseError::OutOfRange(i.to_string()))
            }
            PidValue::Unsigned(u) => {
                Pid::try_from(*u).map_err(|_| PidParseError::OutOfRange(u.to_string()))
            }
        }
    }
}

macro_rules! pid_value_from {
    ($variant:ident, $wide:ty: $($t:ty),*) => {
        $(
            impl From<$t> for PidValue {
                fn from(v: $t) -> Self {
                    PidValue::$variant(v as $wide)
                }
            }
        )*
    };
}

pid_value_from!(Signed, i128: i8, i16, i32, i64, i128, isize);
pid_value_from!(Unsigned, u128: u8, u16, u32, u64, u128, usize);

impl From<&str> for PidValue {
    fn from(v: &str) -> Self {
        PidValue::Text(v.to_string())
    }
}

impl From<String> for PidValue {
    fn from(v: String) -> Self {
        PidValue::Text(v)
    }
}

/// Coerces a JSON field value into a pid.
pub fn pid_from_value(value: &Value) -> Result<Pid, PidParseError> {
    PidValue::from_json(value)?.to_pid()
}
