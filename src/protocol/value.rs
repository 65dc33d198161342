//! Field values carried in method properties and message headers.

use std::collections::BTreeMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// String-keyed table of values, ordered by key.
pub type FieldTable = BTreeMap<String, Value>;

/// A single field value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Boolean / bit.
    Bool(bool),
    /// Any integer width.
    Int(i64),
    /// Float or double.
    Float(f64),
    /// Byte string (short or long string on the wire).
    Bytes(Bytes),
    /// Seconds since the Unix epoch.
    Timestamp(u64),
    /// Nested table.
    Table(FieldTable),
    /// Array of values.
    Array(Vec<Value>),
}

impl Value {
    /// Short name of the variant, for error messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Bytes(_) => "bytes",
            Value::Timestamp(_) => "timestamp",
            Value::Table(_) => "table",
            Value::Array(_) => "array",
        }
    }

    /// Boolean content, if any.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Integer content, if any.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Byte-string content, if any.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Byte-string content as UTF-8, if it is valid UTF-8.
    pub fn as_str(&self) -> Option<&str> {
        self.as_bytes().and_then(|b| std::str::from_utf8(b).ok())
    }

    /// Table content, if any.
    pub fn as_table(&self) -> Option<&FieldTable> {
        match self {
            Value::Table(t) => Some(t),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

macro_rules! int_from {
    ($($t:ty),*) => {
        $(impl From<$t> for Value {
            fn from(v: $t) -> Self {
                Value::Int(i64::from(v))
            }
        })*
    };
}

int_from!(u8, u16, u32, i8, i16, i32, i64);

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Bytes(Bytes::copy_from_slice(v.as_bytes()))
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Bytes(Bytes::from(v))
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Value::Bytes(Bytes::copy_from_slice(v))
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(Bytes::from(v))
    }
}

impl From<Bytes> for Value {
    fn from(v: Bytes) -> Self {
        Value::Bytes(v)
    }
}

impl From<FieldTable> for Value {
    fn from(v: FieldTable) -> Self {
        Value::Table(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::Array(v)
    }
}

/// Build a [`FieldTable`] from `key => value` pairs.
///
/// ```
/// use amqp_session::{field_table, Value};
///
/// let table = field_table! { "queue" => "q1", "durable" => true };
/// assert_eq!(table["durable"], Value::Bool(true));
/// ```
#[macro_export]
macro_rules! field_table {
    () => { $crate::FieldTable::new() };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut table = $crate::FieldTable::new();
        $( table.insert(::std::string::String::from($key), $crate::Value::from($value)); )+
        table
    }};
}
