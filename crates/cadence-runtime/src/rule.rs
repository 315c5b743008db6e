//! Rules
//!
//! A rule is the compiled form of one statement `target op body`. The
//! runtime never parses rule text: it consumes the target, the operator,
//! the list of source collections with their monotonicity, and a body
//! closure that computes output tuples from a [`Scope`].

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use cadence_core::Tuple;
use cadence_state::{Collection, MutationKind};

/// Mutation operator of a rule
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Op {
    /// `<=` visible within the current tick
    Derive,
    /// `<+` visible from the next tick
    Insert,
    /// `<-` removed from the next tick
    Delete,
    /// `<~` shipped to the address column
    Send,
}

impl Op {
    pub fn symbol(self) -> &'static str {
        match self {
            Op::Derive => "<=",
            Op::Insert => "<+",
            Op::Delete => "<-",
            Op::Send => "<~",
        }
    }

    /// Effect only observable in a later tick.
    #[inline]
    pub fn is_temporal(self) -> bool {
        !matches!(self, Op::Derive)
    }

    pub fn mutation_kind(self) -> MutationKind {
        match self {
            Op::Derive => MutationKind::Derive,
            Op::Insert => MutationKind::Insert,
            Op::Delete => MutationKind::Delete,
            Op::Send => MutationKind::Send,
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// A collection read by a rule body
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Source {
    pub name: String,
    /// False when read under negation or aggregation
    pub monotone: bool,
}

/// Rule body
pub type RuleBody = Arc<dyn Fn(&Scope<'_>) -> Vec<Tuple> + Send + Sync>;

/// A compiled rule
#[derive(Clone)]
pub struct Rule {
    target: String,
    op: Op,
    sources: Vec<Source>,
    bootstrap: bool,
    body: RuleBody,
}

impl Rule {
    /// `target <= body`
    pub fn derive(target: impl Into<String>) -> RuleBuilder {
        RuleBuilder::new(target, Op::Derive)
    }

    /// `target <+ body`
    pub fn insert(target: impl Into<String>) -> RuleBuilder {
        RuleBuilder::new(target, Op::Insert)
    }

    /// `target <- body`
    pub fn delete(target: impl Into<String>) -> RuleBuilder {
        RuleBuilder::new(target, Op::Delete)
    }

    /// `target <~ body`
    pub fn send(target: impl Into<String>) -> RuleBuilder {
        RuleBuilder::new(target, Op::Send)
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn op(&self) -> Op {
        self.op
    }

    pub fn sources(&self) -> &[Source] {
        &self.sources
    }

    /// Runs once, on the first tick
    pub fn is_bootstrap(&self) -> bool {
        self.bootstrap
    }

    pub fn reads(&self, name: &str) -> bool {
        self.sources.iter().any(|s| s.name == name)
    }

    pub fn eval(&self, scope: &Scope<'_>) -> Vec<Tuple> {
        (self.body)(scope)
    }
}

impl fmt::Debug for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rule")
            .field("target", &self.target)
            .field("op", &self.op)
            .field("sources", &self.sources)
            .field("bootstrap", &self.bootstrap)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ", self.target, self.op)?;
        if self.bootstrap {
            write!(f, "bootstrap ")?;
        }
        let names: Vec<&str> = self.sources.iter().map(|s| s.name.as_str()).collect();
        write!(f, "[{}]", names.join(", "))
    }
}

/// Rule builder
pub struct RuleBuilder {
    target: String,
    op: Op,
    sources: Vec<Source>,
    bootstrap: bool,
}

impl RuleBuilder {
    fn new(target: impl Into<String>, op: Op) -> Self {
        RuleBuilder {
            target: target.into(),
            op,
            sources: Vec::new(),
            bootstrap: false,
        }
    }

    /// Read `name` monotonically.
    pub fn from(mut self, name: impl Into<String>) -> Self {
        self.sources.push(Source {
            name: name.into(),
            monotone: true,
        });
        self
    }

    /// Read `name` under negation or aggregation.
    pub fn from_nonmonotone(mut self, name: impl Into<String>) -> Self {
        self.sources.push(Source {
            name: name.into(),
            monotone: false,
        });
        self
    }

    /// Run once, on the first tick only.
    pub fn bootstrap(mut self) -> Self {
        self.bootstrap = true;
        self
    }

    pub fn body<F>(self, body: F) -> Rule
    where
        F: Fn(&Scope<'_>) -> Vec<Tuple> + Send + Sync + 'static,
    {
        Rule {
            target: self.target,
            op: self.op,
            sources: self.sources,
            bootstrap: self.bootstrap,
            body: Arc::new(body),
        }
    }

    /// Map every tuple of the first source, keeping the `Some` results.
    pub fn each<F>(self, f: F) -> Rule
    where
        F: Fn(&Tuple) -> Option<Tuple> + Send + Sync + 'static,
    {
        let input = self
            .sources
            .first()
            .map(|s| s.name.clone())
            .unwrap_or_default();
        self.body(move |scope| scope.get(&input).iter().filter_map(&f).collect())
    }

    /// Emit a fixed set of tuples.
    pub fn facts(self, tuples: Vec<Tuple>) -> Rule {
        self.body(move |_| tuples.clone())
    }
}

/// What a rule body may read during one evaluation
pub struct Scope<'a> {
    local_addr: &'a str,
    relations: HashMap<&'a str, Binding<'a>>,
}

struct Binding<'a> {
    current: View<'a>,
    full: &'a Collection,
}

impl<'a> Scope<'a> {
    pub fn new(local_addr: &'a str) -> Self {
        Scope {
            local_addr,
            relations: HashMap::new(),
        }
    }

    /// Bind `collection` in full.
    pub fn bind(&mut self, collection: &'a Collection) {
        self.relations.insert(
            collection.name(),
            Binding {
                current: View::Stored(collection),
                full: collection,
            },
        );
    }

    /// Bind `collection` to the tuples it gained in the previous pass.
    pub fn bind_delta(&mut self, collection: &'a Collection, rows: &'a [Tuple]) {
        self.relations.insert(
            collection.name(),
            Binding {
                current: View::Delta { collection, rows },
                full: collection,
            },
        );
    }

    /// Bound address of this instance
    pub fn local_addr(&self) -> &'a str {
        self.local_addr
    }

    /// The view of a source for this evaluation.
    ///
    /// In a semi-naive pass this is the delta for the source driving the
    /// pass. Collections the rule does not list as sources read as empty.
    pub fn get(&self, name: &str) -> View<'a> {
        self.relations
            .get(name)
            .map(|b| b.current)
            .unwrap_or(View::Empty)
    }

    /// The full contents of a source, regardless of deltas.
    pub fn full(&self, name: &str) -> View<'a> {
        self.relations
            .get(name)
            .map(|b| View::Stored(b.full))
            .unwrap_or(View::Empty)
    }
}

/// Read-only view of a collection
#[derive(Clone, Copy)]
pub enum View<'a> {
    Stored(&'a Collection),
    Delta {
        collection: &'a Collection,
        rows: &'a [Tuple],
    },
    Empty,
}

impl<'a> View<'a> {
    pub fn iter(&self) -> Box<dyn Iterator<Item = &'a Tuple> + 'a> {
        match *self {
            View::Stored(collection) => Box::new(collection.iter()),
            View::Delta { rows, .. } => Box::new(rows.iter()),
            View::Empty => Box::new(std::iter::empty()),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            View::Stored(collection) => collection.len(),
            View::Delta { rows, .. } => rows.len(),
            View::Empty => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, tuple: &Tuple) -> bool {
        match self {
            View::Stored(collection) => collection.contains(tuple),
            View::Delta { rows, .. } => rows.contains(tuple),
            View::Empty => false,
        }
    }

    pub fn to_vec(&self) -> Vec<Tuple> {
        self.iter().cloned().collect()
    }

    /// Tuples projected onto the payload columns, origins kept.
    pub fn payloads(&self) -> Vec<Tuple> {
        match self {
            View::Stored(collection) | View::Delta { collection, .. } => {
                let schema = collection.schema();
                self.iter().map(|t| schema.payload_of(t)).collect()
            }
            View::Empty => Vec::new(),
        }
    }

    /// Cartesian product with another view.
    pub fn pairs(&self, other: &View<'a>) -> Vec<(&'a Tuple, &'a Tuple)> {
        let right: Vec<&'a Tuple> = other.iter().collect();
        self.iter()
            .flat_map(|l| right.iter().map(move |&r| (l, r)))
            .collect()
    }
}

impl fmt::Debug for View<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_core::{tuple, CollectionKind, Schema};

    fn numbers(name: &str, values: &[i64]) -> Collection {
        let mut c = Collection::new(name, CollectionKind::Table, Schema::keys(["n"]));
        for &v in values {
            c.insert(tuple![v]).unwrap();
        }
        c
    }

    #[test]
    fn test_builder_records_sources() {
        let rule = Rule::derive("out")
            .from("a")
            .from_nonmonotone("b")
            .body(|_| Vec::new());
        assert_eq!(rule.op(), Op::Derive);
        assert!(rule.reads("a") && rule.reads("b"));
        assert!(!rule.sources()[1].monotone);
        assert_eq!(rule.to_string(), "out <= [a, b]");
    }

    #[test]
    fn test_each_maps_first_source() {
        let a = numbers("a", &[1, 2, 3]);
        let rule = Rule::derive("out")
            .from("a")
            .each(|t| t.int(0).filter(|n| n % 2 == 1).map(|n| tuple![n * 10]));

        let mut scope = Scope::new("127.0.0.1:1");
        scope.bind(&a);
        assert_eq!(rule.eval(&scope), vec![tuple![10], tuple![30]]);
    }

    #[test]
    fn test_delta_binding() {
        let a = numbers("a", &[1, 2, 3]);
        let delta = vec![tuple![3]];
        let mut scope = Scope::new("127.0.0.1:1");
        scope.bind_delta(&a, &delta);

        assert_eq!(scope.get("a").to_vec(), vec![tuple![3]]);
        assert_eq!(scope.full("a").len(), 3);
        assert!(scope.get("unlisted").is_empty());
        assert_eq!(scope.get("a").pairs(&scope.full("a")).len(), 3);
    }

    #[test]
    fn test_temporal_ops() {
        assert!(!Op::Derive.is_temporal());
        assert!(Op::Insert.is_temporal());
        assert!(Op::Delete.is_temporal());
        assert!(Op::Send.is_temporal());
        assert_eq!(Op::Send.mutation_kind(), MutationKind::Send);
    }
}
