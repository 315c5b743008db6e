//! Tick engine
//!
//! Runs one program instance tick by tick. Tables are snapshotted the first
//! time a tick touches them so a failed tick can be rolled back.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

use cadence_core::{CadenceError, CadenceResult, CollectionKind, Tuple};
use cadence_state::{Collection, CollectionStore, MutationBuffer, MutationKind, Outgoing, TupleMap};
use cadence_transport::{Inbox, Link};

use crate::{
    check_operator, CallbackHub, CallbackId, ChannelFilter, ChannelStats, ChannelTransport, Op,
    Program, RuntimeConfig, Scope,
};

/// Engine state
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Bootstrapping,
    EvaluatingStratum(usize),
    Committing,
    Flushing,
    Stopped,
}

#[derive(Clone, Debug, Default)]
pub struct RuntimeStats {
    pub ticks: u64,
    pub aborted_ticks: u64,
    pub tuples_received: u64,
    pub tuples_sent: u64,
    pub tuples_derived: u64,
    pub fixpoint_passes: u64,
    pub callbacks_fired: u64,
    pub last_tick_duration: Duration,
}

/// Outcome of one successful tick
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TickReport {
    pub tick: u64,
    /// Collections whose callbacks fired
    pub changed: Vec<String>,
    pub received: usize,
    pub sent: usize,
    /// Another tick would observe new state
    pub pending: bool,
}

/// Everything an engine needs besides its program
pub struct EngineContext {
    pub local_addr: String,
    pub config: RuntimeConfig,
    pub inbox: Option<Arc<Inbox>>,
    pub link: Option<Arc<dyn Link>>,
    pub filter: Option<ChannelFilter>,
}

impl EngineContext {
    pub fn new(local_addr: impl Into<String>) -> Self {
        EngineContext {
            local_addr: local_addr.into(),
            config: RuntimeConfig::default(),
            inbox: None,
            link: None,
            filter: None,
        }
    }

    pub fn with_config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_inbox(mut self, inbox: Arc<Inbox>) -> Self {
        self.inbox = Some(inbox);
        self
    }

    pub fn with_link(mut self, link: Arc<dyn Link>) -> Self {
        self.link = Some(link);
        self
    }

    pub fn with_filter(mut self, filter: Option<ChannelFilter>) -> Self {
        self.filter = filter;
        self
    }
}

/// One running program instance
pub struct Engine {
    program: Program,
    store: CollectionStore,
    buffer: MutationBuffer,
    channels: ChannelTransport,
    hub: CallbackHub,
    config: RuntimeConfig,
    state: EngineState,
    bootstrapped: bool,
    tick: u64,
    stats: RuntimeStats,
    snapshots: HashMap<String, TupleMap>,
    changed: BTreeSet<String>,
    outgoing: Vec<Outgoing>,
}

impl Engine {
    pub fn new(program: Program, ctx: EngineContext) -> Self {
        let inbox = ctx
            .inbox
            .unwrap_or_else(|| Arc::new(Inbox::new(ctx.config.max_inbound)));
        let mut channels = ChannelTransport::new(ctx.local_addr, inbox);
        channels.set_link(ctx.link);
        channels.set_filter(ctx.filter);

        Engine {
            store: program.collections().clone(),
            program,
            buffer: MutationBuffer::new(),
            channels,
            hub: CallbackHub::new(),
            config: ctx.config,
            state: EngineState::Idle,
            bootstrapped: false,
            tick: 0,
            stats: RuntimeStats::default(),
            snapshots: HashMap::new(),
            changed: BTreeSet::new(),
            outgoing: Vec::new(),
        }
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    pub fn local_addr(&self) -> &str {
        self.channels.local_addr()
    }

    pub fn inbox(&self) -> &Arc<Inbox> {
        self.channels.inbox()
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn stats(&self) -> &RuntimeStats {
        &self.stats
    }

    pub fn channel_stats(&self) -> &ChannelStats {
        self.channels.stats()
    }

    /// Number of completed ticks
    pub fn ticks(&self) -> u64 {
        self.tick
    }

    pub fn collection(&self, name: &str) -> CadenceResult<&Collection> {
        self.store.get(name)
    }

    /// Committed contents of a collection.
    pub fn current(&self, name: &str) -> CadenceResult<Vec<Tuple>> {
        self.store.current(name)
    }

    /// Staged mutations or undelivered frames are waiting.
    pub fn has_pending_work(&self) -> bool {
        !self.buffer.is_empty() || !self.channels.inbox().is_empty()
    }

    /// Stage a deferred insert for the next tick.
    pub fn insert_next(&mut self, collection: &str, tuple: Tuple) -> CadenceResult<()> {
        self.stage_external(collection, Op::Insert, tuple)
    }

    /// Stage a deferred delete for the next tick.
    pub fn delete_next(&mut self, collection: &str, tuple: Tuple) -> CadenceResult<()> {
        self.stage_external(collection, Op::Delete, tuple)
    }

    /// Stage an async send, shipped at the end of the next tick.
    pub fn send(&mut self, channel: &str, tuple: Tuple) -> CadenceResult<()> {
        self.stage_external(channel, Op::Send, tuple)
    }

    fn stage_external(&mut self, collection: &str, op: Op, tuple: Tuple) -> CadenceResult<()> {
        self.ensure_running()?;
        let target = self.store.get(collection)?;
        check_operator(collection, target.kind(), op)?;
        target.schema().check_arity(collection, &tuple)?;
        self.buffer.stage(collection, op.mutation_kind(), tuple);
        Ok(())
    }

    pub fn register_callback<F>(&mut self, collection: &str, callback: F) -> CadenceResult<CallbackId>
    where
        F: FnMut(&Collection) + Send + 'static,
    {
        self.hub.register(&self.store, collection, Box::new(callback))
    }

    pub fn unregister_callback(&mut self, id: CallbackId) -> bool {
        self.hub.unregister(id)
    }

    pub fn connect(&mut self, peer: &str) {
        self.channels.connect(peer);
    }

    pub fn disconnect(&mut self, peer: &str) {
        self.channels.disconnect(peer);
    }

    pub fn connect_all(&mut self) {
        self.channels.connect_all();
    }

    pub fn disconnect_all(&mut self) {
        self.channels.disconnect_all();
    }

    /// Stop the engine. Later ticks fail with [`CadenceError::EngineStopped`].
    pub fn stop(&mut self) {
        if self.state != EngineState::Stopped {
            debug!(addr = %self.local_addr(), ticks = self.tick, "engine stopped");
            self.channels.close();
            self.set_state(EngineState::Stopped);
        }
    }

    fn ensure_running(&self) -> CadenceResult<()> {
        if self.state == EngineState::Stopped {
            Err(CadenceError::EngineStopped)
        } else {
            Ok(())
        }
    }

    fn set_state(&mut self, state: EngineState) {
        trace!(from = ?self.state, to = ?state, "engine state");
        self.state = state;
    }

    /// Run one tick to completion, or roll it back.
    pub fn tick(&mut self) -> CadenceResult<TickReport> {
        self.ensure_running()?;
        let start = Instant::now();

        match self.run_tick() {
            Ok(report) => {
                self.stats.last_tick_duration = start.elapsed();
                debug!(
                    tick = report.tick,
                    received = report.received,
                    sent = report.sent,
                    changed = report.changed.len(),
                    "tick complete"
                );
                Ok(report)
            }
            Err(e) => {
                warn!(tick = self.tick + 1, "Tick aborted: {}", e);
                self.abort();
                Err(e)
            }
        }
    }

    fn run_tick(&mut self) -> CadenceResult<TickReport> {
        self.snapshots.clear();
        self.changed.clear();
        self.outgoing.clear();

        let received = self.intake()?;

        if !self.bootstrapped && !self.program.bootstrap_rules().is_empty() {
            self.set_state(EngineState::Bootstrapping);
            self.run_bootstrap()?;
        }

        for stratum in 0..self.program.strata().len() {
            self.set_state(EngineState::EvaluatingStratum(stratum));
            self.evaluate_stratum(stratum)?;
        }
        self.run_deferred();

        self.set_state(EngineState::Committing);
        let committed_changes = self.commit()?;

        self.set_state(EngineState::Flushing);
        let outgoing = std::mem::take(&mut self.outgoing);
        let sent = self.channels.flush(&self.store, outgoing);

        for name in self.store.nonempty_transient() {
            self.changed.insert(name);
        }
        let fired = self.hub.fire(&self.store, &self.changed);
        self.store.clear_transient();

        self.bootstrapped = true;
        self.tick += 1;
        self.stats.ticks += 1;
        self.stats.tuples_received += received as u64;
        self.stats.tuples_sent += sent as u64;
        self.stats.callbacks_fired += fired as u64;
        self.snapshots.clear();
        self.set_state(EngineState::Idle);

        Ok(TickReport {
            tick: self.tick,
            changed: std::mem::take(&mut self.changed).into_iter().collect(),
            received,
            sent,
            pending: committed_changes
                || self.buffer.has_boundary_work()
                || !self.channels.inbox().is_empty(),
        })
    }

    fn abort(&mut self) {
        for (name, tuples) in self.snapshots.drain() {
            if let Ok(collection) = self.store.get_mut(&name) {
                collection.replace_tuples(tuples);
            }
        }
        self.store.clear_transient();
        self.buffer.discard();
        self.outgoing.clear();
        self.changed.clear();
        self.stats.aborted_ticks += 1;
        self.set_state(EngineState::Idle);
    }

    /// Snapshot a table before its first change in this tick.
    fn snapshot(&mut self, name: &str) {
        if self.snapshots.contains_key(name) {
            return;
        }
        if let Ok(collection) = self.store.get(name) {
            if collection.kind() == CollectionKind::Table {
                let snapshot = collection.snapshot();
                self.snapshots.insert(name.to_string(), snapshot);
            }
        }
    }

    /// Deliver received frames and apply boundary mutations.
    ///
    /// Staged sends stay queued so the commit checks them with the sends
    /// this tick's rules produce.
    fn intake(&mut self) -> CadenceResult<usize> {
        let mut received = 0;
        let envelopes = self.channels.inbox().drain();
        for envelope in envelopes {
            if let Some((channel, tuples)) = self.channels.deliver(&self.store, envelope) {
                received += tuples.len();
                self.buffer
                    .stage_all(&channel, MutationKind::Receive, tuples);
            }
        }

        let names = self.buffer.boundary_touched();
        let mut prepared = Vec::with_capacity(names.len());
        for name in &names {
            let collection = self.store.get(name)?;
            prepared.push(self.buffer.prepare_boundary(collection)?);
        }

        for commit in prepared {
            let name = commit.collection().to_string();
            self.snapshot(&name);
            let collection = self.store.get_mut(&name)?;
            let is_table = collection.kind() == CollectionKind::Table;
            let committed = commit.apply(collection);
            if committed.changed && is_table {
                self.changed.insert(name.clone());
            }
            self.buffer.clear_boundary(&name);
        }

        if received > 0 || !names.is_empty() {
            debug!(received, collections = names.len(), "intake");
        }
        Ok(received)
    }

    fn eval_rule(&self, index: usize, delta: Option<(&str, &[Tuple])>) -> Vec<Tuple> {
        let rule = &self.program.rules()[index];
        let mut scope = Scope::new(self.channels.local_addr());
        for source in rule.sources() {
            let Ok(collection) = self.store.get(&source.name) else {
                continue;
            };
            match delta {
                Some((name, rows)) if name == source.name => scope.bind_delta(collection, rows),
                _ => scope.bind(collection),
            }
        }
        rule.eval(&scope)
    }

    /// Apply derived tuples immediately, recording the new ones.
    fn absorb(
        &mut self,
        target: &str,
        tuples: Vec<Tuple>,
        delta: &mut BTreeMap<String, Vec<Tuple>>,
    ) -> CadenceResult<()> {
        if tuples.is_empty() {
            return Ok(());
        }
        self.snapshot(target);
        let collection = self.store.get_mut(target)?;
        let mut added = Vec::new();
        for tuple in tuples {
            if collection.insert(tuple.clone())? {
                added.push(tuple);
            }
        }
        if !added.is_empty() {
            if collection.kind() == CollectionKind::Table {
                self.changed.insert(target.to_string());
            }
            self.stats.tuples_derived += added.len() as u64;
            delta.entry(target.to_string()).or_default().extend(added);
        }
        Ok(())
    }

    fn run_bootstrap(&mut self) -> CadenceResult<()> {
        let mut unused = BTreeMap::new();
        for &index in &self.program.bootstrap_rules().to_vec() {
            let output = self.eval_rule(index, None);
            let rule = &self.program.rules()[index];
            let (target, op) = (rule.target().to_string(), rule.op());
            trace!(rule = %rule, produced = output.len(), "bootstrap");
            match op {
                Op::Derive => self.absorb(&target, output, &mut unused)?,
                op => self.buffer.stage_all(&target, op.mutation_kind(), output),
            }
        }
        Ok(())
    }

    /// Semi-naive fixpoint over the derive rules of one stratum.
    fn evaluate_stratum(&mut self, stratum: usize) -> CadenceResult<()> {
        let rules = self.program.strata()[stratum].rules.clone();
        let max_passes = self.config.max_fixpoint_passes;

        let mut delta: BTreeMap<String, Vec<Tuple>> = BTreeMap::new();
        for &index in &rules {
            let output = self.eval_rule(index, None);
            let target = self.program.rules()[index].target().to_string();
            self.absorb(&target, output, &mut delta)?;
        }

        let mut passes = 1;
        while !delta.is_empty() {
            if passes >= max_passes {
                return Err(CadenceError::FixpointLimit { stratum, passes });
            }
            let previous = std::mem::take(&mut delta);

            for &index in &rules {
                let rule = &self.program.rules()[index];
                let target = rule.target().to_string();
                let mut driving: Vec<String> = rule
                    .sources()
                    .iter()
                    .filter(|s| previous.contains_key(&s.name))
                    .map(|s| s.name.clone())
                    .collect();
                driving.sort();
                driving.dedup();

                for name in driving {
                    let rows = previous.get(&name).map(Vec::as_slice).unwrap_or(&[]);
                    let output = self.eval_rule(index, Some((name.as_str(), rows)));
                    self.absorb(&target, output, &mut delta)?;
                }
            }
            passes += 1;
        }

        trace!(stratum, passes, "stratum fixpoint");
        self.stats.fixpoint_passes += passes as u64;
        Ok(())
    }

    /// Evaluate `<+`, `<-` and `<~` rules against the fixpoint.
    fn run_deferred(&mut self) {
        for &index in &self.program.deferred_rules().to_vec() {
            let output = self.eval_rule(index, None);
            if output.is_empty() {
                continue;
            }
            let rule = &self.program.rules()[index];
            let target = rule.target().to_string();
            let kind = rule.op().mutation_kind();
            self.buffer.stage_all(&target, kind, output);
        }
    }

    /// Validate and apply deferred mutations; collect sends.
    ///
    /// Returns whether any table changed.
    fn commit(&mut self) -> CadenceResult<bool> {
        let names = self.buffer.touched();
        let mut tables = Vec::new();
        let mut sends = Vec::new();

        for name in &names {
            let collection = self.store.get(name)?;
            if collection.kind().is_transient() {
                // Validated now, applied at the next intake
                let prepared = self.buffer.prepare(&collection.emptied())?;
                sends.extend(prepared.into_sends());
            } else {
                tables.push(self.buffer.prepare(collection)?);
            }
        }

        let mut changed = false;
        for commit in tables {
            let name = commit.collection().to_string();
            self.snapshot(&name);
            let committed = commit.apply(self.store.get_mut(&name)?);
            if committed.changed {
                changed = true;
                self.changed.insert(name.clone());
            }
            sends.extend(committed.sends);
            self.buffer.clear(&name);
        }

        for name in &names {
            if self.store.get(name)?.kind().is_transient() {
                self.buffer.take(name, MutationKind::Send);
                self.buffer.take(name, MutationKind::Derive);
            }
        }

        debug!(
            collections = names.len(),
            sends = sends.len(),
            changed,
            "commit"
        );
        self.outgoing.extend(sends);
        Ok(changed)
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("local_addr", &self.local_addr())
            .field("state", &self.state)
            .field("tick", &self.tick)
            .field("collections", &self.store.len())
            .field("rules", &self.program.rules().len())
            .field("channels", &self.channels)
            .finish()
    }
}
