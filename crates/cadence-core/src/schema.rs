//! Collection kinds and schemas
//!
//! A schema is an ordered list of columns, key columns first. A column
//! declared with a leading `@` is the address column of a channel: its
//! value selects the destination instance of an async send.

use std::collections::HashSet;
use std::fmt;

use crate::{CadenceError, CadenceResult, Tuple, Value};

/// Marker prefix for address columns in a declaration
pub const ADDRESS_MARKER: char = '@';

/// Collection kind
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CollectionKind {
    /// Persists tuples across ticks until deleted
    Table,
    /// Cleared every tick
    Scratch,
    /// Network channel, routed by its address column
    Channel,
    /// Channel whose destination is always this instance
    Loopback,
}

impl CollectionKind {
    /// Contents do not survive the end of a tick.
    #[inline]
    pub fn is_transient(self) -> bool {
        !matches!(self, CollectionKind::Table)
    }

    #[inline]
    pub fn is_channel_like(self) -> bool {
        matches!(self, CollectionKind::Channel | CollectionKind::Loopback)
    }
}

impl fmt::Display for CollectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CollectionKind::Table => "table",
            CollectionKind::Scratch => "scratch",
            CollectionKind::Channel => "channel",
            CollectionKind::Loopback => "loopback",
        };
        f.write_str(name)
    }
}

/// Relation schema
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Schema {
    columns: Vec<String>,
    key_len: usize,
    address_cols: Vec<usize>,
    payload_cols: Vec<usize>,
}

impl Schema {
    /// Schema with the given key and value columns.
    ///
    /// Columns named `@name` are address columns; the marker is stripped.
    pub fn new<K, V>(keys: K, vals: V) -> Self
    where
        K: IntoIterator,
        K::Item: AsRef<str>,
        V: IntoIterator,
        V::Item: AsRef<str>,
    {
        let mut columns = Vec::new();
        let mut address_cols = Vec::new();
        let mut key_len = 0;

        for name in keys {
            let (name, is_addr) = Self::strip_marker(name.as_ref());
            if is_addr {
                address_cols.push(columns.len());
            }
            columns.push(name);
            key_len += 1;
        }
        for name in vals {
            let (name, is_addr) = Self::strip_marker(name.as_ref());
            if is_addr {
                address_cols.push(columns.len());
            }
            columns.push(name);
        }

        let payload_cols = match address_cols.as_slice() {
            [addr] => (0..columns.len()).filter(|c| c != addr).collect(),
            _ => (0..columns.len()).collect(),
        };

        Schema {
            columns,
            key_len,
            address_cols,
            payload_cols,
        }
    }

    /// Schema where every column is a key column.
    pub fn keys<K>(keys: K) -> Self
    where
        K: IntoIterator,
        K::Item: AsRef<str>,
    {
        Schema::new(keys, std::iter::empty::<&str>())
    }

    /// Default schema for a collection declared without one.
    pub fn default_for(kind: CollectionKind) -> Self {
        match kind {
            CollectionKind::Channel => Schema::keys(["@address", "val"]),
            _ => Schema::new(["key"], ["val"]),
        }
    }

    fn strip_marker(name: &str) -> (String, bool) {
        match name.strip_prefix(ADDRESS_MARKER) {
            Some(stripped) => (stripped.to_string(), true),
            None => (name.to_string(), false),
        }
    }

    /// Check the schema for a collection of the given kind.
    pub fn validate(&self, collection: &str, kind: CollectionKind) -> CadenceResult<()> {
        if self.columns.is_empty() {
            return Err(CadenceError::schema(collection, "schema has no columns"));
        }

        let mut seen = HashSet::new();
        for name in &self.columns {
            if name.is_empty() {
                return Err(CadenceError::schema(collection, "empty column name"));
            }
            if !seen.insert(name.as_str()) {
                return Err(CadenceError::schema(
                    collection,
                    format!("duplicate column {}", name),
                ));
            }
        }

        let addresses = self.address_cols.len();
        match kind {
            CollectionKind::Channel if addresses != 1 => Err(CadenceError::schema(
                collection,
                format!("channel needs exactly one address column, found {}", addresses),
            )),
            CollectionKind::Loopback if addresses > 1 => Err(CadenceError::schema(
                collection,
                format!("loopback allows at most one address column, found {}", addresses),
            )),
            CollectionKind::Table | CollectionKind::Scratch if addresses > 0 => {
                Err(CadenceError::schema(
                    collection,
                    format!("address columns are only valid on channels ({})", kind),
                ))
            }
            _ => Ok(()),
        }
    }

    #[inline]
    pub fn arity(&self) -> usize {
        self.columns.len()
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn key_len(&self) -> usize {
        self.key_len
    }

    /// Column positions excluding the address column
    pub fn payload_cols(&self) -> &[usize] {
        &self.payload_cols
    }

    pub fn payload_names(&self) -> Vec<&str> {
        self.payload_cols
            .iter()
            .map(|&c| self.columns[c].as_str())
            .collect()
    }

    /// Position of the address column, if exactly one is declared.
    pub fn address_col(&self) -> Option<usize> {
        match self.address_cols.as_slice() {
            [addr] => Some(*addr),
            _ => None,
        }
    }

    /// True when the address column sits among the value columns.
    pub fn address_in_values(&self) -> bool {
        self.address_col().is_some_and(|c| c >= self.key_len)
    }

    /// Non-address columns match by name.
    pub fn compatible_with(&self, other: &Schema) -> bool {
        self.payload_names() == other.payload_names()
    }

    /// Key projection of a tuple.
    pub fn key_of(&self, tuple: &Tuple) -> Vec<Value> {
        tuple.values()[..self.key_len.min(tuple.len())].to_vec()
    }

    /// Payload projection of a tuple, keeping its origin.
    pub fn payload_of(&self, tuple: &Tuple) -> Tuple {
        let payload = Tuple::new(tuple.project(&self.payload_cols));
        match tuple.source_addr() {
            Some(origin) => payload.with_origin(origin),
            None => payload,
        }
    }

    pub fn check_arity(&self, collection: &str, tuple: &Tuple) -> CadenceResult<()> {
        if tuple.len() != self.arity() {
            return Err(CadenceError::ArityMismatch {
                collection: collection.to_string(),
                expected: self.arity(),
                actual: tuple.len(),
            });
        }
        Ok(())
    }
}
