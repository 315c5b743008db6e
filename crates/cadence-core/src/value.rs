//! Values and tuples
//!
//! A tuple is an ordered row of values. Tuples delivered over a channel also
//! remember the address they came from; that origin is metadata and does not
//! take part in equality, ordering or hashing.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::net::SocketAddr;
use std::ops::Index;

/// A single column value
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Str(String),
    Bytes(Vec<u8>),
}

impl Value {
    #[inline]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    #[inline]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    #[inline]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[inline]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Str(_) => "str",
            Value::Bytes(_) => "bytes",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(v) => write!(f, "{}", v),
            Value::Str(s) => write!(f, "{:?}", s),
            Value::Bytes(b) => write!(f, "<{} bytes>", b.len()),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<u16> for Value {
    fn from(v: u16) -> Self {
        Value::Int(v as i64)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
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

impl From<&String> for Value {
    fn from(v: &String) -> Self {
        Value::Str(v.clone())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<SocketAddr> for Value {
    fn from(addr: SocketAddr) -> Self {
        Value::Str(addr.to_string())
    }
}

/// An ordered row of values, optionally tagged with its sender address
#[derive(Clone, Debug, Default)]
pub struct Tuple {
    values: Vec<Value>,
    origin: Option<String>,
}

impl Tuple {
    pub fn new(values: Vec<Value>) -> Self {
        Tuple {
            values,
            origin: None,
        }
    }

    /// Tag the tuple with the address of the instance that sent it.
    pub fn with_origin(mut self, addr: impl Into<String>) -> Self {
        self.origin = Some(addr.into());
        self
    }

    /// Address of the sending instance, for tuples received over a channel.
    pub fn source_addr(&self) -> Option<&str> {
        self.origin.as_deref()
    }

    #[inline]
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    #[inline]
    pub fn get(&self, col: usize) -> Option<&Value> {
        self.values.get(col)
    }

    /// Integer at column `col`, if present and an integer.
    pub fn int(&self, col: usize) -> Option<i64> {
        self.get(col).and_then(Value::as_int)
    }

    /// String at column `col`, if present and a string.
    pub fn str(&self, col: usize) -> Option<&str> {
        self.get(col).and_then(Value::as_str)
    }

    /// Values at the given column positions, in order.
    pub fn project(&self, cols: &[usize]) -> Vec<Value> {
        cols.iter()
            .filter_map(|&c| self.values.get(c).cloned())
            .collect()
    }
}

impl PartialEq for Tuple {
    fn eq(&self, other: &Self) -> bool {
        self.values == other.values
    }
}

impl Eq for Tuple {}

impl Hash for Tuple {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.values.hash(state);
    }
}

impl PartialOrd for Tuple {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Tuple {
    fn cmp(&self, other: &Self) -> Ordering {
        self.values.cmp(&other.values)
    }
}

impl Index<usize> for Tuple {
    type Output = Value;

    fn index(&self, col: usize) -> &Value {
        &self.values[col]
    }
}

impl From<Vec<Value>> for Tuple {
    fn from(values: Vec<Value>) -> Self {
        Tuple::new(values)
    }
}

impl fmt::Display for Tuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, v) in self.values.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", v)?;
        }
        write!(f, "]")
    }
}

/// Build a [`Tuple`] from anything convertible into [`Value`].
///
/// ```
/// use cadence_core::{tuple, Value};
/// let t = tuple!["127.0.0.1:9000", 5];
/// assert_eq!(t[1], Value::Int(5));
/// ```
#[macro_export]
macro_rules! tuple {
    ($($v:expr),* $(,)?) => {
        $crate::Tuple::new(vec![$($crate::Value::from($v)),*])
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_origin_ignored_by_equality() {
        let a = tuple!["x", 1].with_origin("127.0.0.1:1");
        let b = tuple!["x", 1];
        assert_eq!(a, b);
        assert_eq!(a.source_addr(), Some("127.0.0.1:1"));
        assert_eq!(b.source_addr(), None);
    }

    #[test]
    fn test_tuple_accessors() {
        let t = tuple!["foo", 61, true];
        assert_eq!(t.str(0), Some("foo"));
        assert_eq!(t.int(1), Some(61));
        assert_eq!(t.int(0), None);
        assert_eq!(t.project(&[2, 0]), vec![Value::Bool(true), Value::from("foo")]);
        assert_eq!(t.to_string(), "[\"foo\", 61, true]");
    }

    #[test]
    fn test_value_ordering_is_total() {
        let mut vals = vec![Value::from("b"), Value::Int(3), Value::Null, Value::from("a")];
        vals.sort();
        assert_eq!(vals[0], Value::Null);
        assert_eq!(vals[1], Value::Int(3));
        assert_eq!(vals[2], Value::from("a"));
    }
}
