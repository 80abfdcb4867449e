use rusqlite::types::{FromSql, FromSqlResult, ToSql, ToSqlOutput, ValueRef};

use crate::{Error, Result};

/// A value exchanged with the engine: a bound argument or a fetched column.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

/// Storage class of a fetched value, as reported by [`crate::Rows::get_type`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Null,
    Integer,
    Float,
    String,
    Blob,
}

impl Value {
    pub fn column_type(&self) -> ColumnType {
        match self {
            Value::Null => ColumnType::Null,
            Value::Integer(_) => ColumnType::Integer,
            Value::Real(_) => ColumnType::Float,
            Value::Text(_) => ColumnType::String,
            Value::Blob(_) => ColumnType::Blob,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "NULL",
            Value::Integer(_) => "INTEGER",
            Value::Real(_) => "REAL",
            Value::Text(_) => "TEXT",
            Value::Blob(_) => "BLOB",
        }
    }

    fn mismatch(&self, wanted: &str) -> Error {
        Error::ConversionFailure(format!(
            "cannot read {} value as {wanted}",
            self.type_name()
        ))
    }

    /// Reads the value as a 64-bit integer. Reals truncate toward zero, NULL reads as 0.
    /// Reals outside the `i64` range are errors; `i64::MAX as f64` is 2^63, so
    /// the upper bound is exclusive.
    pub fn as_long(&self) -> Result<i64> {
        match self {
            Value::Null => Ok(0),
            Value::Integer(i) => Ok(*i),
            Value::Real(f) => {
                if f.is_finite() && *f >= i64::MIN as f64 && *f < i64::MAX as f64 {
                    Ok(f.trunc() as i64)
                } else {
                    Err(Error::ConversionFailure(format!(
                        "REAL value {f} does not fit in a 64-bit integer"
                    )))
                }
            }
            other => Err(other.mismatch("integer")),
        }
    }

    pub fn as_int(&self) -> Result<i32> {
        let v = self.as_long()?;
        i32::try_from(v)
            .map_err(|_| Error::ConversionFailure(format!("value {v} does not fit in i32")))
    }

    pub fn as_short(&self) -> Result<i16> {
        let v = self.as_long()?;
        i16::try_from(v)
            .map_err(|_| Error::ConversionFailure(format!("value {v} does not fit in i16")))
    }

    /// Reads the value as a double. Integers widen, NULL reads as 0.0.
    pub fn as_double(&self) -> Result<f64> {
        match self {
            Value::Null => Ok(0.0),
            Value::Integer(i) => Ok(*i as f64),
            Value::Real(f) => Ok(*f),
            other => Err(other.mismatch("real")),
        }
    }

    /// Reads the value as a float, rounding doubles to the nearest `f32`.
    pub fn as_float(&self) -> Result<f32> {
        self.as_double().map(|f| f as f32)
    }

    /// Renders the value as text. NULL yields `None`; blobs cannot be read as text.
    pub fn as_string(&self) -> Result<Option<String>> {
        match self {
            Value::Null => Ok(None),
            Value::Integer(i) => Ok(Some(i.to_string())),
            Value::Real(f) => Ok(Some(format_real(*f))),
            Value::Text(s) => Ok(Some(s.clone())),
            blob @ Value::Blob(_) => Err(blob.mismatch("text")),
        }
    }

    /// Reads the value as bytes. Text yields its UTF-8 encoding, NULL yields `None`.
    pub fn as_blob(&self) -> Result<Option<Vec<u8>>> {
        match self {
            Value::Null => Ok(None),
            Value::Blob(b) => Ok(Some(b.clone())),
            Value::Text(s) => Ok(Some(s.as_bytes().to_vec())),
            other => Err(other.mismatch("blob")),
        }
    }
}

// Whole reals keep a trailing ".0" so they stay distinguishable from integers.
fn format_real(f: f64) -> String {
    if f.is_finite() && f.fract() == 0.0 && f.abs() < 1e15 {
        format!("{f:.1}")
    } else {
        f.to_string()
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::Borrowed(match self {
            Value::Null => ValueRef::Null,
            Value::Integer(i) => ValueRef::Integer(*i),
            Value::Real(f) => ValueRef::Real(*f),
            Value::Text(s) => ValueRef::Text(s.as_bytes()),
            Value::Blob(b) => ValueRef::Blob(b),
        }))
    }
}

/// TEXT that is not valid UTF-8 is fetched as [`Value::Blob`] so its bytes
/// survive unchanged.
impl FromSql for Value {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        Ok(match value {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(i) => Value::Integer(i),
            ValueRef::Real(f) => Value::Real(f),
            ValueRef::Text(t) => match std::str::from_utf8(t) {
                Ok(text) => Value::Text(text.to_owned()),
                Err(_) => Value::Blob(t.to_vec()),
            },
            ValueRef::Blob(b) => Value::Blob(b.to_vec()),
        })
    }
}

macro_rules! from_integer {
    ($($t:ty),+ $(,)?) => {
        $(impl From<$t> for Value {
            fn from(value: $t) -> Self {
                Value::Integer(value as i64)
            }
        })+
    };
}

from_integer!(i8, i16, i32, i64, u8, u16, u32);

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Integer(value as i64)
    }
}

impl From<f32> for Value {
    fn from(value: f32) -> Self {
        Value::Real(value as f64)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Real(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<&String> for Value {
    fn from(value: &String) -> Self {
        Value::Text(value.clone())
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Value::Blob(value)
    }
}

impl From<&[u8]> for Value {
    fn from(value: &[u8]) -> Self {
        Value::Blob(value.to_vec())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => v.into(),
            None => Value::Null,
        }
    }
}
