//! A named, schema-typed set of tuples

use std::collections::BTreeMap;

use cadence_core::{CadenceError, CadenceResult, CollectionKind, Schema, Tuple, Value};

/// Tuples indexed by their key columns
pub type TupleMap = BTreeMap<Vec<Value>, Tuple>;

/// A collection
#[derive(Clone, Debug)]
pub struct Collection {
    name: String,
    kind: CollectionKind,
    schema: Schema,
    tuples: TupleMap,
}

impl Collection {
    pub fn new(name: impl Into<String>, kind: CollectionKind, schema: Schema) -> Self {
        Collection {
            name: name.into(),
            kind,
            schema,
            tuples: TupleMap::new(),
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn kind(&self) -> CollectionKind {
        self.kind
    }

    #[inline]
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.tuples.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.tuples.is_empty()
    }

    /// Insert a tuple.
    ///
    /// Returns `Ok(false)` for an identical duplicate and a key constraint
    /// error if the key is already bound to different values.
    pub fn insert(&mut self, tuple: Tuple) -> CadenceResult<bool> {
        self.schema.check_arity(&self.name, &tuple)?;
        let key = self.schema.key_of(&tuple);
        match self.tuples.get(&key) {
            Some(existing) if *existing == tuple => Ok(false),
            Some(existing) => Err(key_conflict(&self.name, key, existing, &tuple)),
            None => {
                self.tuples.insert(key, tuple);
                Ok(true)
            }
        }
    }

    /// Remove an exact tuple. A tuple sharing only the key is left alone.
    pub fn remove(&mut self, tuple: &Tuple) -> bool {
        let key = self.schema.key_of(tuple);
        if self.tuples.get(&key) == Some(tuple) {
            self.tuples.remove(&key);
            true
        } else {
            false
        }
    }

    pub fn contains(&self, tuple: &Tuple) -> bool {
        self.tuples.get(&self.schema.key_of(tuple)) == Some(tuple)
    }

    /// Tuple bound to `key`, if any.
    pub fn get(&self, key: &[Value]) -> Option<&Tuple> {
        self.tuples.get(key)
    }

    /// Tuples in key order
    pub fn iter(&self) -> impl Iterator<Item = &Tuple> + '_ {
        self.tuples.values()
    }

    pub fn to_vec(&self) -> Vec<Tuple> {
        self.tuples.values().cloned().collect()
    }

    /// Every tuple projected onto its payload columns.
    pub fn payloads(&self) -> Vec<Tuple> {
        self.tuples
            .values()
            .map(|t| self.schema.payload_of(t))
            .collect()
    }

    pub(crate) fn tuples(&self) -> &TupleMap {
        &self.tuples
    }

    /// Copy of the current contents, for rollback
    pub fn snapshot(&self) -> TupleMap {
        self.tuples.clone()
    }

    /// Swap in a new tuple map, returning the previous one.
    pub fn replace_tuples(&mut self, next: TupleMap) -> TupleMap {
        std::mem::replace(&mut self.tuples, next)
    }

    /// Same collection with no tuples.
    pub fn emptied(&self) -> Collection {
        Collection::new(self.name.clone(), self.kind, self.schema.clone())
    }

    pub fn clear(&mut self) {
        self.tuples.clear();
    }
}

pub(crate) fn key_conflict(
    collection: &str,
    key: Vec<Value>,
    existing: &Tuple,
    conflicting: &Tuple,
) -> CadenceError {
    CadenceError::KeyConstraintError {
        collection: collection.to_string(),
        key,
        existing: existing.values().to_vec(),
        conflicting: conflicting.values().to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_core::tuple;

    fn table() -> Collection {
        Collection::new("t", CollectionKind::Table, Schema::new(["k"], ["v"]))
    }

    #[test]
    fn test_duplicate_absorbed() {
        let mut t = table();
        assert!(t.insert(tuple![1, "a"]).unwrap());
        assert!(!t.insert(tuple![1, "a"]).unwrap());
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn test_key_conflict() {
        let mut t = table();
        t.insert(tuple![1, "a"]).unwrap();
        let err = t.insert(tuple![1, "b"]).unwrap_err();
        match err {
            CadenceError::KeyConstraintError { collection, key, .. } => {
                assert_eq!(collection, "t");
                assert_eq!(key, vec![Value::Int(1)]);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(t.to_vec(), vec![tuple![1, "a"]]);
    }

    #[test]
    fn test_arity_checked() {
        let mut t = table();
        assert!(matches!(
            t.insert(tuple![1]),
            Err(CadenceError::ArityMismatch { expected: 2, actual: 1, .. })
        ));
    }

    #[test]
    fn test_remove_is_exact() {
        let mut t = table();
        t.insert(tuple![1, "a"]).unwrap();
        assert!(!t.remove(&tuple![1, "b"]));
        assert!(t.contains(&tuple![1, "a"]));
        assert!(t.remove(&tuple![1, "a"]));
        assert!(t.is_empty());
    }

    #[test]
    fn test_payloads_drop_address() {
        let mut c = Collection::new(
            "c",
            CollectionKind::Channel,
            Schema::default_for(CollectionKind::Channel),
        );
        c.insert(tuple!["127.0.0.1:1", 7].with_origin("127.0.0.1:2"))
            .unwrap();
        let payloads = c.payloads();
        assert_eq!(payloads, vec![tuple![7]]);
        assert_eq!(payloads[0].source_addr(), Some("127.0.0.1:2"));
    }
}
