//! Multi-instance driver
//!
//! A [`Cluster`] runs several engines on one [`SimulatedNetwork`] and ticks
//! them in lock step: every member ticks once, then the network delivers.

use std::sync::Arc;

use tracing::debug;

use cadence_core::{CadenceError, CadenceResult, Tuple};
use cadence_runtime::{ChannelFilter, Engine, EngineContext, Program, RuntimeConfig, TickReport};

use crate::network::SimulatedNetwork;

/// Default round limit for [`Cluster::run_until_quiet`]
pub const DEFAULT_MAX_ROUNDS: usize = 1_000;

/// Engines sharing a simulated network
pub struct Cluster {
    network: SimulatedNetwork,
    members: Vec<Engine>,
    rounds: usize,
}

impl Default for Cluster {
    fn default() -> Self {
        Cluster::new(SimulatedNetwork::new())
    }
}

impl Cluster {
    pub fn new(network: SimulatedNetwork) -> Self {
        Cluster {
            network,
            members: Vec::new(),
            rounds: 0,
        }
    }

    /// Add a member running `program`. Returns its index.
    pub fn spawn(&mut self, program: Program) -> usize {
        self.spawn_with(program, RuntimeConfig::default(), None)
    }

    pub fn spawn_with(
        &mut self,
        program: Program,
        config: RuntimeConfig,
        filter: Option<ChannelFilter>,
    ) -> usize {
        let (addr, inbox) = self.network.attach();
        let link = self.network.link(&addr);
        let ctx = EngineContext::new(addr.clone())
            .with_config(config)
            .with_inbox(inbox)
            .with_link(Arc::new(link))
            .with_filter(filter);
        self.members.push(Engine::new(program, ctx));
        debug!(%addr, member = self.members.len() - 1, "member spawned");
        self.members.len() - 1
    }

    pub fn network(&self) -> &SimulatedNetwork {
        &self.network
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Lock-step rounds run so far
    pub fn rounds(&self) -> usize {
        self.rounds
    }

    /// Bound address of member `i`
    ///
    /// # Panics
    /// If `i` is out of range.
    pub fn addr(&self, i: usize) -> String {
        self.members[i].local_addr().to_string()
    }

    pub fn engine(&self, i: usize) -> &Engine {
        &self.members[i]
    }

    pub fn engine_mut(&mut self, i: usize) -> &mut Engine {
        &mut self.members[i]
    }

    /// Committed contents of `collection` on member `i`, sorted.
    pub fn current(&self, i: usize, collection: &str) -> CadenceResult<Vec<Tuple>> {
        let mut tuples = self.members[i].current(collection)?;
        tuples.sort();
        Ok(tuples)
    }

    /// Tick member `i` alone, then deliver whatever it sent.
    pub fn tick(&mut self, i: usize) -> CadenceResult<TickReport> {
        let report = self.members[i].tick()?;
        self.network.deliver();
        Ok(report)
    }

    /// Tick every member once, then deliver.
    pub fn tick_all(&mut self) -> CadenceResult<Vec<TickReport>> {
        let mut reports = Vec::with_capacity(self.members.len());
        for member in &mut self.members {
            reports.push(member.tick()?);
        }
        self.network.deliver();
        self.rounds += 1;
        Ok(reports)
    }

    /// Any member has pending work or frames are still in flight.
    pub fn is_busy(&self) -> bool {
        self.network.in_flight() > 0 || self.members.iter().any(Engine::has_pending_work)
    }

    /// Run rounds until one leaves nothing to do.
    ///
    /// Returns the number of rounds run; fails with
    /// [`CadenceError::TransportError`] if the cluster is still busy after
    /// `max_rounds`.
    pub fn run_until_quiet(&mut self, max_rounds: usize) -> CadenceResult<usize> {
        for round in 1..=max_rounds {
            let reports = self.tick_all()?;
            if !reports.iter().any(|r| r.pending) && !self.is_busy() {
                debug!(rounds = round, "cluster quiet");
                return Ok(round);
            }
        }
        Err(CadenceError::TransportError(format!(
            "cluster still busy after {} rounds",
            max_rounds
        )))
    }

    /// Stop every member.
    pub fn stop(&mut self) {
        for member in &mut self.members {
            member.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_runtime::{tuple, Rule, Schema};

    fn counter() -> Program {
        let mut b = Program::builder();
        b.table("n", Schema::keys(["v"])).unwrap();
        b.rule(
            Rule::insert("n")
                .from("n")
                .each(|t| t.int(0).filter(|v| *v < 3).map(|v| tuple![v + 1])),
        )
        .unwrap();
        b.build().unwrap()
    }

    #[test]
    fn test_addresses_are_distinct() {
        let mut cluster = Cluster::default();
        let a = cluster.spawn(counter());
        let b = cluster.spawn(counter());
        assert_eq!(cluster.len(), 2);
        assert_ne!(cluster.addr(a), cluster.addr(b));
        assert_eq!(cluster.engine(a).local_addr(), cluster.addr(a));
    }

    #[test]
    fn test_run_until_quiet() {
        let mut cluster = Cluster::default();
        let a = cluster.spawn(counter());
        cluster.engine_mut(a).insert_next("n", tuple![0]).unwrap();

        let rounds = cluster.run_until_quiet(DEFAULT_MAX_ROUNDS).unwrap();
        assert!(rounds >= 4);
        assert_eq!(
            cluster.current(a, "n").unwrap(),
            vec![tuple![0], tuple![1], tuple![2], tuple![3]]
        );
    }

    #[test]
    fn test_round_limit() {
        let mut b = Program::builder();
        b.table("n", Schema::keys(["v"])).unwrap();
        b.rule(Rule::insert("n").from("n").each(|t| t.int(0).map(|v| tuple![v + 1])))
            .unwrap();
        let mut cluster = Cluster::default();
        let a = cluster.spawn(b.build().unwrap());
        cluster.engine_mut(a).insert_next("n", tuple![0]).unwrap();

        assert!(matches!(
            cluster.run_until_quiet(5),
            Err(CadenceError::TransportError(_))
        ));
        assert_eq!(cluster.rounds(), 5);
    }

    #[test]
    fn test_stopped_cluster() {
        let mut cluster = Cluster::default();
        cluster.spawn(counter());
        cluster.stop();
        assert_eq!(cluster.tick_all().unwrap_err(), CadenceError::EngineStopped);
    }
}
