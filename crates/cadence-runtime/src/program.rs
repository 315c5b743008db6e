//! Programs
//!
//! A [`ProgramBuilder`] collects declarations and rules; [`ProgramBuilder::build`]
//! validates them and computes the evaluation plan. A built [`Program`] is
//! immutable and can be instantiated any number of times.

use std::collections::BTreeMap;

use tracing::debug;

use cadence_core::{CadenceError, CadenceResult, CollectionKind, Schema};
use cadence_state::CollectionStore;

use crate::{dependency_edges, stratify, DependencyEdge, Op, Rule};

/// Derive rules evaluated together to a fixpoint
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Stratum {
    /// Collections whose level maps to this stratum
    pub collections: Vec<String>,
    /// Indices into [`Program::rules`]
    pub rules: Vec<usize>,
}

/// Program builder
#[derive(Debug, Default)]
pub struct ProgramBuilder {
    store: CollectionStore,
    rules: Vec<Rule>,
}

impl ProgramBuilder {
    pub fn new() -> Self {
        ProgramBuilder::default()
    }

    /// Declare a collection.
    pub fn declare(
        &mut self,
        name: &str,
        kind: CollectionKind,
        schema: Schema,
    ) -> CadenceResult<&mut Self> {
        self.store.declare(name, kind, schema)?;
        Ok(self)
    }

    pub fn table(&mut self, name: &str, schema: Schema) -> CadenceResult<&mut Self> {
        self.declare(name, CollectionKind::Table, schema)
    }

    pub fn scratch(&mut self, name: &str, schema: Schema) -> CadenceResult<&mut Self> {
        self.declare(name, CollectionKind::Scratch, schema)
    }

    pub fn channel(&mut self, name: &str, schema: Schema) -> CadenceResult<&mut Self> {
        self.declare(name, CollectionKind::Channel, schema)
    }

    pub fn loopback(&mut self, name: &str, schema: Schema) -> CadenceResult<&mut Self> {
        self.declare(name, CollectionKind::Loopback, schema)
    }

    /// Declare with the default schema for `kind`.
    pub fn declare_default(&mut self, name: &str, kind: CollectionKind) -> CadenceResult<&mut Self> {
        self.declare(name, kind, Schema::default_for(kind))
    }

    pub fn is_declared(&self, name: &str) -> bool {
        self.store.contains(name)
    }

    /// Add a rule. Its target and sources must already be declared.
    pub fn rule(&mut self, rule: Rule) -> CadenceResult<&mut Self> {
        let kind = self.store.kind_of(rule.target())?;
        check_operator(rule.target(), kind, rule.op())?;

        if rule.is_bootstrap() && kind == CollectionKind::Scratch {
            return Err(CadenceError::InvalidOperator {
                collection: rule.target().to_string(),
                kind,
                op: "bootstrap",
            });
        }
        for source in rule.sources() {
            if !self.store.contains(&source.name) {
                return Err(CadenceError::UnknownCollection(source.name.clone()));
            }
        }

        self.rules.push(rule);
        Ok(self)
    }

    /// Validate and plan the program.
    pub fn build(self) -> CadenceResult<Program> {
        let names: Vec<String> = self.store.names().map(str::to_string).collect();
        let edges = dependency_edges(&self.rules);
        let levels = stratify(&names, &edges)?;

        let mut by_level: BTreeMap<usize, Stratum> = BTreeMap::new();
        let mut deferred = Vec::new();
        let mut bootstrap = Vec::new();

        for (i, rule) in self.rules.iter().enumerate() {
            if rule.is_bootstrap() {
                bootstrap.push(i);
            } else if rule.op().is_temporal() {
                deferred.push(i);
            } else {
                let level = levels.get(rule.target()).copied().unwrap_or(0);
                by_level.entry(level).or_default().rules.push(i);
            }
        }
        for (name, level) in &levels {
            if let Some(stratum) = by_level.get_mut(level) {
                stratum.collections.push(name.clone());
            }
        }
        let strata: Vec<Stratum> = by_level.into_values().collect();

        debug!(
            collections = names.len(),
            rules = self.rules.len(),
            strata = strata.len(),
            "program built"
        );

        Ok(Program {
            store: self.store,
            rules: self.rules,
            edges,
            levels,
            strata,
            deferred,
            bootstrap,
        })
    }
}

/// Operator/kind compatibility.
///
/// Channels and loopbacks only accept `<~`; tables and scratches accept
/// everything except `<~`.
pub fn check_operator(collection: &str, kind: CollectionKind, op: Op) -> CadenceResult<()> {
    let allowed = if kind.is_channel_like() {
        op == Op::Send
    } else {
        op != Op::Send
    };
    if allowed {
        Ok(())
    } else {
        Err(CadenceError::InvalidOperator {
            collection: collection.to_string(),
            kind,
            op: op.symbol(),
        })
    }
}

/// A validated, stratified program
#[derive(Clone, Debug)]
pub struct Program {
    store: CollectionStore,
    rules: Vec<Rule>,
    edges: Vec<DependencyEdge>,
    levels: BTreeMap<String, usize>,
    strata: Vec<Stratum>,
    deferred: Vec<usize>,
    bootstrap: Vec<usize>,
}

impl Program {
    pub fn builder() -> ProgramBuilder {
        ProgramBuilder::new()
    }

    /// Declared collections, all empty
    pub fn collections(&self) -> &CollectionStore {
        &self.store
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn dependencies(&self) -> &[DependencyEdge] {
        &self.edges
    }

    /// Level of every collection
    pub fn levels(&self) -> &BTreeMap<String, usize> {
        &self.levels
    }

    /// Derive-rule strata in evaluation order
    pub fn strata(&self) -> &[Stratum] {
        &self.strata
    }

    /// `<+`, `<-` and `<~` rules, evaluated once after the last stratum
    pub fn deferred_rules(&self) -> &[usize] {
        &self.deferred
    }

    pub fn bootstrap_rules(&self) -> &[usize] {
        &self.bootstrap
    }
}
