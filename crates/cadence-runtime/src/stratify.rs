//! Dependency analysis and stratification
//!
//! Collections are assigned levels by iterative relaxation over the
//! dependency edges: a monotone edge `a -> b` requires `level(b) >= level(a)`,
//! a non-monotone edge requires `level(b) > level(a)`. Without a cycle
//! through a non-monotone edge every level stays below the number of
//! collections, so reaching that bound proves such a cycle exists.

use std::collections::{BTreeMap, HashMap, VecDeque};

use tracing::debug;

use cadence_core::{CadenceError, CadenceResult};

use crate::Rule;

/// A dependency between two collections
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DependencyEdge {
    pub source: String,
    pub target: String,
    pub monotone: bool,
    /// Produced by a `<+`, `<-` or `<~` rule; does not constrain ordering
    pub temporal: bool,
}

/// Dependency edges of a rule set, in rule order
pub fn dependency_edges(rules: &[Rule]) -> Vec<DependencyEdge> {
    let mut edges = Vec::new();
    for rule in rules {
        for source in rule.sources() {
            let edge = DependencyEdge {
                source: source.name.clone(),
                target: rule.target().to_string(),
                monotone: source.monotone && rule.op() != crate::Op::Delete,
                temporal: rule.op().is_temporal(),
            };
            if !edges.contains(&edge) {
                edges.push(edge);
            }
        }
    }
    edges
}

/// Assign a level to every collection.
///
/// Temporal edges are ignored. Fails with the offending cycle if a
/// non-monotone edge lies on a cycle.
pub fn stratify(
    collections: &[String],
    edges: &[DependencyEdge],
) -> CadenceResult<BTreeMap<String, usize>> {
    let mut levels: BTreeMap<String, usize> =
        collections.iter().map(|c| (c.clone(), 0)).collect();
    let bound = collections.len().max(1);

    let ordering: Vec<&DependencyEdge> = edges.iter().filter(|e| !e.temporal).collect();

    loop {
        let mut changed = false;
        for edge in &ordering {
            let source_level = levels.get(&edge.source).copied().unwrap_or(0);
            let required = if edge.monotone {
                source_level
            } else {
                source_level + 1
            };
            let target_level = levels.entry(edge.target.clone()).or_insert(0);
            if *target_level < required {
                *target_level = required;
                changed = true;
                if required >= bound {
                    let cycle = find_negative_cycle(&ordering)
                        .unwrap_or_else(|| vec![edge.source.clone(), edge.target.clone()]);
                    return Err(CadenceError::StratificationError { cycle });
                }
            }
        }
        if !changed {
            break;
        }
    }

    debug!(collections = levels.len(), "stratified");
    Ok(levels)
}

/// A cycle through some non-monotone edge, as `[a, b, ..., a]`.
fn find_negative_cycle(edges: &[&DependencyEdge]) -> Option<Vec<String>> {
    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
    for edge in edges {
        adjacency
            .entry(edge.source.as_str())
            .or_default()
            .push(edge.target.as_str());
    }

    for edge in edges.iter().filter(|e| !e.monotone) {
        if let Some(path) = shortest_path(&adjacency, &edge.target, &edge.source) {
            let mut cycle = vec![edge.source.clone()];
            cycle.extend(path.into_iter().map(str::to_string));
            return Some(cycle);
        }
    }
    None
}

/// Breadth-first path `from ->* to`, both ends included.
fn shortest_path<'a>(
    adjacency: &HashMap<&'a str, Vec<&'a str>>,
    from: &'a str,
    to: &'a str,
) -> Option<Vec<&'a str>> {
    let mut parent: HashMap<&str, &str> = HashMap::new();
    let mut queue = VecDeque::from([from]);
    let mut seen = std::collections::HashSet::from([from]);

    while let Some(node) = queue.pop_front() {
        if node == to {
            let mut path = vec![node];
            let mut cur = node;
            while let Some(&prev) = parent.get(cur) {
                path.push(prev);
                cur = prev;
            }
            path.reverse();
            return Some(path);
        }
        for &next in adjacency.get(node).into_iter().flatten() {
            if seen.insert(next) {
                parent.insert(next, node);
                queue.push_back(next);
            }
        }
    }
    None
}
