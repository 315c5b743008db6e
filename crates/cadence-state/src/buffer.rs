//! Mutation buffer
//!
//! Holds staged mutations per collection and per kind until the tick
//! boundary. A commit is computed in two steps: [`MutationBuffer::prepare`]
//! validates a batch and builds the next contents without touching the
//! collection, [`PreparedCommit::apply`] swaps them in. Preparing every
//! touched collection before applying any keeps a tick all-or-nothing.

use std::collections::BTreeMap;
use std::fmt;

use tracing::trace;

use cadence_core::{CadenceResult, Tuple, Value};

use crate::collection::key_conflict;
use crate::{Collection, TupleMap};

/// Mutation kinds
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MutationKind {
    /// Immediate derive (`<=`)
    Derive,
    /// Deferred insert (`<+`)
    Insert,
    /// Deferred delete (`<-`)
    Delete,
    /// Asynchronous send (`<~`)
    Send,
    /// Delivered by the channel transport
    Receive,
}

impl MutationKind {
    /// Applied at the start of the next tick rather than drained at commit.
    #[inline]
    pub fn is_boundary(self) -> bool {
        matches!(
            self,
            MutationKind::Insert | MutationKind::Delete | MutationKind::Receive
        )
    }
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MutationKind::Derive => "derive",
            MutationKind::Insert => "insert",
            MutationKind::Delete => "delete",
            MutationKind::Send => "send",
            MutationKind::Receive => "receive",
        };
        f.write_str(name)
    }
}

/// A tuple leaving on a channel
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Outgoing {
    pub channel: String,
    pub tuple: Tuple,
}

#[derive(Clone, Debug, Default)]
struct Queues {
    derive: Vec<Tuple>,
    insert: Vec<Tuple>,
    delete: Vec<Tuple>,
    send: Vec<Tuple>,
    receive: Vec<Tuple>,
}

impl Queues {
    fn get(&self, kind: MutationKind) -> &Vec<Tuple> {
        match kind {
            MutationKind::Derive => &self.derive,
            MutationKind::Insert => &self.insert,
            MutationKind::Delete => &self.delete,
            MutationKind::Send => &self.send,
            MutationKind::Receive => &self.receive,
        }
    }

    fn get_mut(&mut self, kind: MutationKind) -> &mut Vec<Tuple> {
        match kind {
            MutationKind::Derive => &mut self.derive,
            MutationKind::Insert => &mut self.insert,
            MutationKind::Delete => &mut self.delete,
            MutationKind::Send => &mut self.send,
            MutationKind::Receive => &mut self.receive,
        }
    }

    fn len(&self) -> usize {
        self.derive.len() + self.insert.len() + self.delete.len() + self.send.len() + self.receive.len()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn has_boundary_work(&self) -> bool {
        !self.insert.is_empty() || !self.delete.is_empty() || !self.receive.is_empty()
    }
}

/// Staged mutations, per collection and kind
#[derive(Clone, Debug, Default)]
pub struct MutationBuffer {
    queues: BTreeMap<String, Queues>,
}

impl MutationBuffer {
    pub fn new() -> Self {
        MutationBuffer::default()
    }

    pub fn stage(&mut self, collection: &str, kind: MutationKind, tuple: Tuple) {
        trace!(collection, %kind, %tuple, "staged");
        self.queues
            .entry(collection.to_string())
            .or_default()
            .get_mut(kind)
            .push(tuple);
    }

    pub fn stage_all(
        &mut self,
        collection: &str,
        kind: MutationKind,
        tuples: impl IntoIterator<Item = Tuple>,
    ) {
        let mut tuples = tuples.into_iter().peekable();
        if tuples.peek().is_none() {
            return;
        }
        self.queues
            .entry(collection.to_string())
            .or_default()
            .get_mut(kind)
            .extend(tuples);
    }

    /// Staged tuples of one kind
    pub fn pending(&self, collection: &str, kind: MutationKind) -> &[Tuple] {
        self.queues
            .get(collection)
            .map(|q| q.get(kind).as_slice())
            .unwrap_or(&[])
    }

    /// Remove and return the staged tuples of one kind.
    pub fn take(&mut self, collection: &str, kind: MutationKind) -> Vec<Tuple> {
        let Some(queues) = self.queues.get_mut(collection) else {
            return Vec::new();
        };
        let taken = std::mem::take(queues.get_mut(kind));
        if queues.is_empty() {
            self.queues.remove(collection);
        }
        taken
    }

    /// Names of collections with anything staged
    pub fn touched(&self) -> Vec<String> {
        self.queues.keys().cloned().collect()
    }

    pub fn has_pending(&self, collection: &str) -> bool {
        self.queues.get(collection).is_some_and(|q| !q.is_empty())
    }

    /// Any insert, delete or received tuple waiting for a tick boundary
    pub fn has_boundary_work(&self) -> bool {
        self.queues.values().any(Queues::has_boundary_work)
    }

    /// Collections with boundary work
    pub fn boundary_touched(&self) -> Vec<String> {
        self.queues
            .iter()
            .filter(|(_, q)| q.has_boundary_work())
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.queues.values().map(Queues::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }

    /// Drop everything staged for one collection.
    pub fn clear(&mut self, collection: &str) {
        self.queues.remove(collection);
    }

    /// Drop the inserts, deletes and received tuples of one collection.
    pub fn clear_boundary(&mut self, collection: &str) {
        let Some(queues) = self.queues.get_mut(collection) else {
            return;
        };
        queues.insert.clear();
        queues.delete.clear();
        queues.receive.clear();
        if queues.is_empty() {
            self.queues.remove(collection);
        }
    }

    /// Drop everything.
    pub fn discard(&mut self) {
        self.queues.clear();
    }

    /// Compute the next contents of `collection` without modifying it.
    ///
    /// Deletes are applied first by exact match, then derives, inserts and
    /// received tuples are key-checked against the post-delete state. Sends
    /// are key-checked among themselves.
    pub fn prepare(&self, collection: &Collection) -> CadenceResult<PreparedCommit> {
        self.prepare_kinds(collection, false)
    }

    /// Like [`MutationBuffer::prepare`], restricted to inserts, deletes and
    /// received tuples. Staged derives and sends are ignored.
    pub fn prepare_boundary(&self, collection: &Collection) -> CadenceResult<PreparedCommit> {
        self.prepare_kinds(collection, true)
    }

    fn prepare_kinds(
        &self,
        collection: &Collection,
        boundary_only: bool,
    ) -> CadenceResult<PreparedCommit> {
        let name = collection.name();
        let schema = collection.schema();
        let mut prepared = PreparedCommit {
            collection: name.to_string(),
            next: collection.tuples().clone(),
            sends: Vec::new(),
            changed: false,
            inserted: 0,
            deleted: 0,
        };

        let Some(queues) = self.queues.get(name) else {
            return Ok(prepared);
        };

        for tuple in &queues.delete {
            schema.check_arity(name, tuple)?;
            let key = schema.key_of(tuple);
            if prepared.next.get(&key) == Some(tuple) {
                prepared.next.remove(&key);
                prepared.deleted += 1;
            }
        }

        let (derive, send): (&[Tuple], &[Tuple]) = if boundary_only {
            (&[], &[])
        } else {
            (&queues.derive, &queues.send)
        };

        let additions = derive
            .iter()
            .chain(&queues.insert)
            .chain(&queues.receive);
        for tuple in additions {
            schema.check_arity(name, tuple)?;
            let key = schema.key_of(tuple);
            match prepared.next.get(&key) {
                Some(existing) if existing == tuple => {}
                Some(existing) => return Err(key_conflict(name, key, existing, tuple)),
                None => {
                    prepared.next.insert(key, tuple.clone());
                    prepared.inserted += 1;
                }
            }
        }

        // A delete and re-insert of the same tuple nets out
        prepared.changed = if prepared.deleted > 0 && prepared.inserted > 0 {
            prepared.next != *collection.tuples()
        } else {
            prepared.deleted > 0 || prepared.inserted > 0
        };

        let mut sends: BTreeMap<Vec<Value>, &Tuple> = BTreeMap::new();
        for tuple in send {
            schema.check_arity(name, tuple)?;
            let key = schema.key_of(tuple);
            match sends.get(&key) {
                Some(existing) if *existing == tuple => {}
                Some(existing) => return Err(key_conflict(name, key, existing, tuple)),
                None => {
                    sends.insert(key, tuple);
                    prepared.sends.push(tuple.clone());
                }
            }
        }

        Ok(prepared)
    }

    /// Prepare, apply and clear one collection's queues.
    pub fn commit(&mut self, collection: &mut Collection) -> CadenceResult<Committed> {
        let prepared = self.prepare(collection)?;
        self.clear(collection.name());
        Ok(prepared.apply(collection))
    }
}

/// Validated next state of one collection
#[derive(Clone, Debug)]
pub struct PreparedCommit {
    collection: String,
    next: TupleMap,
    sends: Vec<Tuple>,
    changed: bool,
    inserted: usize,
    deleted: usize,
}

impl PreparedCommit {
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Whether applying would alter the contents
    pub fn changed(&self) -> bool {
        self.changed
    }

    pub fn inserted(&self) -> usize {
        self.inserted
    }

    pub fn deleted(&self) -> usize {
        self.deleted
    }

    pub fn sends(&self) -> &[Tuple] {
        &self.sends
    }

    /// Discard the computed contents, keeping only the outbound tuples.
    pub fn into_sends(self) -> Vec<Outgoing> {
        let channel = self.collection;
        self.sends
            .into_iter()
            .map(|tuple| Outgoing {
                channel: channel.clone(),
                tuple,
            })
            .collect()
    }

    pub fn apply(self, collection: &mut Collection) -> Committed {
        let PreparedCommit {
            collection: name,
            next,
            sends,
            changed,
            inserted,
            deleted,
        } = self;
        trace!(collection = %name, inserted, deleted, sends = sends.len(), "applied");

        collection.replace_tuples(next);
        Committed {
            changed,
            inserted,
            deleted,
            sends: sends
                .into_iter()
                .map(|tuple| Outgoing {
                    channel: name.clone(),
                    tuple,
                })
                .collect(),
        }
    }
}

/// Result of applying a commit
#[derive(Clone, Debug, Default)]
pub struct Committed {
    pub changed: bool,
    pub inserted: usize,
    pub deleted: usize,
    pub sends: Vec<Outgoing>,
}
