//! Collection store
//!
//! Owns every declared collection of a program instance.

use std::collections::BTreeMap;

use cadence_core::{CadenceError, CadenceResult, CollectionKind, Schema, Tuple};

use crate::Collection;

/// All collections of one instance, by name
#[derive(Clone, Debug, Default)]
pub struct CollectionStore {
    collections: BTreeMap<String, Collection>,
}

impl CollectionStore {
    pub fn new() -> Self {
        CollectionStore::default()
    }

    /// Declare a collection.
    pub fn declare(
        &mut self,
        name: impl Into<String>,
        kind: CollectionKind,
        schema: Schema,
    ) -> CadenceResult<()> {
        let name = name.into();
        if name.is_empty() {
            return Err(CadenceError::schema(name, "collection name is empty"));
        }
        if self.collections.contains_key(&name) {
            return Err(CadenceError::schema(name, "already declared"));
        }
        schema.validate(&name, kind)?;
        self.collections
            .insert(name.clone(), Collection::new(name, kind, schema));
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.collections.contains_key(name)
    }

    pub fn get(&self, name: &str) -> CadenceResult<&Collection> {
        self.collections
            .get(name)
            .ok_or_else(|| CadenceError::UnknownCollection(name.to_string()))
    }

    pub fn get_mut(&mut self, name: &str) -> CadenceResult<&mut Collection> {
        self.collections
            .get_mut(name)
            .ok_or_else(|| CadenceError::UnknownCollection(name.to_string()))
    }

    pub fn kind_of(&self, name: &str) -> CadenceResult<CollectionKind> {
        self.get(name).map(Collection::kind)
    }

    /// Contents visible to rule evaluation, in key order.
    pub fn current(&self, name: &str) -> CadenceResult<Vec<Tuple>> {
        self.get(name).map(Collection::to_vec)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Collection> + '_ {
        self.collections.values()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.collections.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.collections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.collections.is_empty()
    }

    /// Names of collections cleared at the end of every tick
    pub fn transient_names(&self) -> Vec<String> {
        self.collections
            .values()
            .filter(|c| c.kind().is_transient())
            .map(|c| c.name().to_string())
            .collect()
    }

    /// Transient collections currently holding tuples
    pub fn nonempty_transient(&self) -> Vec<String> {
        self.collections
            .values()
            .filter(|c| c.kind().is_transient() && !c.is_empty())
            .map(|c| c.name().to_string())
            .collect()
    }

    pub fn clear_transient(&mut self) {
        for collection in self.collections.values_mut() {
            if collection.kind().is_transient() {
                collection.clear();
            }
        }
    }
}
