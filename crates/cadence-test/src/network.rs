//! In-memory network for multi-instance tests
//!
//! Frames are serialized on send and parsed on delivery, so every frame
//! crosses the real wire codec. Nothing moves until [`SimulatedNetwork::deliver`]
//! is called, which keeps scenarios deterministic.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{trace, warn};

use cadence_core::{CadenceError, CadenceResult};
use cadence_transport::{Envelope, Inbox, Link, DEFAULT_INBOX_CAPACITY};
use cadence_wire::Frame;

/// First port handed out by [`SimulatedNetwork::attach`]
pub const FIRST_SIM_PORT: u16 = 40_000;

/// Network chaos configuration
#[derive(Clone, Debug, PartialEq)]
pub struct ChaosConfig {
    /// Frame loss rate (0.0 - 1.0)
    pub loss_rate: f64,
    /// Duplicate probability
    pub duplicate_prob: f64,
    /// Probability that a frame overtakes earlier in-flight frames
    pub reorder_prob: f64,
}

impl Default for ChaosConfig {
    fn default() -> Self {
        ChaosConfig::perfect()
    }
}

impl ChaosConfig {
    /// Every frame arrives once, in order
    pub fn perfect() -> Self {
        ChaosConfig {
            loss_rate: 0.0,
            duplicate_prob: 0.0,
            reorder_prob: 0.0,
        }
    }

    /// Loss only
    pub fn lossy(loss_rate: f64) -> Self {
        ChaosConfig {
            loss_rate,
            ..ChaosConfig::perfect()
        }
    }

    /// Loss, duplication and reordering
    pub fn hostile() -> Self {
        ChaosConfig {
            loss_rate: 0.15,
            duplicate_prob: 0.05,
            reorder_prob: 0.2,
        }
    }
}

/// Network statistics
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NetworkStats {
    pub frames_sent: u64,
    pub frames_delivered: u64,
    pub frames_lost: u64,
    pub frames_duplicated: u64,
    pub frames_reordered: u64,
    /// Addressed to a host that is not attached
    pub frames_unroutable: u64,
    /// Rejected by the receiving inbox or the codec
    pub frames_rejected: u64,
}

impl NetworkStats {
    pub fn loss_rate(&self) -> f64 {
        if self.frames_sent == 0 {
            0.0
        } else {
            self.frames_lost as f64 / self.frames_sent as f64
        }
    }
}

struct InFlight {
    from: String,
    to: String,
    bytes: Vec<u8>,
}

struct NetState {
    hosts: HashMap<String, Arc<Inbox>>,
    in_flight: VecDeque<InFlight>,
    config: ChaosConfig,
    rng: StdRng,
    next_port: u16,
    stats: NetworkStats,
}

/// Shared handle to a simulated network
#[derive(Clone)]
pub struct SimulatedNetwork {
    state: Arc<Mutex<NetState>>,
}

impl Default for SimulatedNetwork {
    fn default() -> Self {
        SimulatedNetwork::new()
    }
}

impl SimulatedNetwork {
    /// A lossless network
    pub fn new() -> Self {
        SimulatedNetwork::with_chaos(ChaosConfig::perfect(), 0)
    }

    /// A network applying `config`, seeded for reproducible runs.
    pub fn with_chaos(config: ChaosConfig, seed: u64) -> Self {
        SimulatedNetwork {
            state: Arc::new(Mutex::new(NetState {
                hosts: HashMap::new(),
                in_flight: VecDeque::new(),
                config,
                rng: StdRng::seed_from_u64(seed),
                next_port: FIRST_SIM_PORT,
                stats: NetworkStats::default(),
            })),
        }
    }

    /// Attach a new host and return its address and inbox.
    pub fn attach(&self) -> (String, Arc<Inbox>) {
        let addr = {
            let mut state = self.state.lock();
            let port = state.next_port;
            state.next_port = state.next_port.wrapping_add(1);
            format!("127.0.0.1:{}", port)
        };
        let inbox = self.attach_at(&addr);
        (addr, inbox)
    }

    /// Attach a host at a fixed address, replacing any previous one.
    pub fn attach_at(&self, addr: &str) -> Arc<Inbox> {
        let inbox = Arc::new(Inbox::new(DEFAULT_INBOX_CAPACITY));
        self.state.lock().hosts.insert(addr.to_string(), inbox.clone());
        inbox
    }

    /// Remove a host. Frames in flight to it become unroutable.
    pub fn detach(&self, addr: &str) -> bool {
        self.state.lock().hosts.remove(addr).is_some()
    }

    /// Outbound link for the host at `from`
    pub fn link(&self, from: &str) -> SimLink {
        SimLink {
            from: from.to_string(),
            network: self.clone(),
        }
    }

    pub fn set_chaos(&self, config: ChaosConfig) {
        self.state.lock().config = config;
    }

    pub fn stats(&self) -> NetworkStats {
        self.state.lock().stats.clone()
    }

    /// Frames waiting for [`SimulatedNetwork::deliver`]
    pub fn in_flight(&self) -> usize {
        self.state.lock().in_flight.len()
    }

    fn submit(&self, from: &str, to: &str, bytes: Vec<u8>) -> CadenceResult<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.stats.frames_sent += 1;

        if !state.hosts.contains_key(to) {
            state.stats.frames_unroutable += 1;
            return Err(CadenceError::TransportError(format!("no host at {}", to)));
        }
        if state.rng.gen::<f64>() < state.config.loss_rate {
            trace!(from, to, "frame lost");
            state.stats.frames_lost += 1;
            return Ok(());
        }

        let copies = if state.rng.gen::<f64>() < state.config.duplicate_prob {
            state.stats.frames_duplicated += 1;
            2
        } else {
            1
        };
        for _ in 0..copies {
            let frame = InFlight {
                from: from.to_string(),
                to: to.to_string(),
                bytes: bytes.clone(),
            };
            if !state.in_flight.is_empty() && state.rng.gen::<f64>() < state.config.reorder_prob {
                let pos = state.rng.gen_range(0..state.in_flight.len());
                state.in_flight.insert(pos, frame);
                state.stats.frames_reordered += 1;
            } else {
                state.in_flight.push_back(frame);
            }
        }
        Ok(())
    }

    /// Hand every in-flight frame to its destination inbox.
    ///
    /// Returns the number of frames delivered.
    pub fn deliver(&self) -> usize {
        let mut state = self.state.lock();
        let frames = std::mem::take(&mut state.in_flight);

        let mut delivered = 0;
        for InFlight { from, to, bytes } in frames {
            let Some(inbox) = state.hosts.get(&to).cloned() else {
                state.stats.frames_unroutable += 1;
                continue;
            };
            let frame = match Frame::parse(&bytes) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!(%from, %to, "Undecodable frame: {}", e);
                    state.stats.frames_rejected += 1;
                    continue;
                }
            };
            if inbox.push(Envelope { sender: from, frame }) {
                delivered += 1;
            } else {
                state.stats.frames_rejected += 1;
            }
        }
        state.stats.frames_delivered += delivered as u64;
        delivered
    }
}

impl fmt::Debug for SimulatedNetwork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("SimulatedNetwork")
            .field("hosts", &state.hosts.len())
            .field("in_flight", &state.in_flight.len())
            .field("config", &state.config)
            .finish()
    }
}

/// Outbound side of one simulated host
#[derive(Clone, Debug)]
pub struct SimLink {
    from: String,
    network: SimulatedNetwork,
}

impl SimLink {
    pub fn local_addr(&self) -> &str {
        &self.from
    }
}

impl Link for SimLink {
    fn transmit(&self, dest: &str, frame: &Frame) -> CadenceResult<()> {
        let bytes = frame.serialize()?;
        self.network.submit(&self.from, dest, bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_core::Value;
    use cadence_wire::FrameBuilder;
    use proptest::prelude::*;

    fn frame(n: i64) -> Frame {
        FrameBuilder::new("pipe").row(vec![Value::Int(n)]).build()
    }

    #[test]
    fn test_nothing_moves_before_deliver() {
        let net = SimulatedNetwork::new();
        let (a, _) = net.attach();
        let (b, inbox) = net.attach();
        assert_ne!(a, b);

        net.link(&a).transmit(&b, &frame(1)).unwrap();
        assert!(inbox.is_empty());
        assert_eq!(net.in_flight(), 1);

        assert_eq!(net.deliver(), 1);
        let envelopes = inbox.drain();
        assert_eq!(envelopes.len(), 1);
        assert_eq!(envelopes[0].sender, a);
        assert_eq!(envelopes[0].frame, frame(1));
    }

    #[test]
    fn test_unknown_host_is_an_error() {
        let net = SimulatedNetwork::new();
        let (a, _) = net.attach();
        assert!(matches!(
            net.link(&a).transmit("127.0.0.1:1", &frame(1)),
            Err(CadenceError::TransportError(_))
        ));
        assert_eq!(net.stats().frames_unroutable, 1);
    }

    #[test]
    fn test_total_loss() {
        let net = SimulatedNetwork::with_chaos(ChaosConfig::lossy(1.0), 7);
        let (a, _) = net.attach();
        let (b, inbox) = net.attach();
        let link = net.link(&a);
        for n in 0..10 {
            link.transmit(&b, &frame(n)).unwrap();
        }
        assert_eq!(net.deliver(), 0);
        assert!(inbox.is_empty());
        assert_eq!(net.stats().loss_rate(), 1.0);
    }

    #[test]
    fn test_detached_host_unroutable() {
        let net = SimulatedNetwork::new();
        let (a, _) = net.attach();
        let (b, _) = net.attach();
        net.link(&a).transmit(&b, &frame(1)).unwrap();
        assert!(net.detach(&b));
        assert_eq!(net.deliver(), 0);
        assert_eq!(net.stats().frames_unroutable, 1);
    }

    #[test]
    fn test_same_seed_same_outcome() {
        let run = || {
            let net = SimulatedNetwork::with_chaos(ChaosConfig::hostile(), 42);
            let (a, _) = net.attach();
            let (b, inbox) = net.attach();
            let link = net.link(&a);
            for n in 0..50 {
                link.transmit(&b, &frame(n)).unwrap();
            }
            net.deliver();
            inbox
                .drain()
                .into_iter()
                .map(|e| e.frame.rows[0][0].clone())
                .collect::<Vec<_>>()
        };
        assert_eq!(run(), run());
    }

    proptest! {
        #[test]
        fn prop_perfect_network_preserves_order(count in 0usize..64) {
            let net = SimulatedNetwork::new();
            let (a, _) = net.attach();
            let (b, inbox) = net.attach();
            let link = net.link(&a);
            for n in 0..count {
                link.transmit(&b, &frame(n as i64)).unwrap();
            }
            prop_assert_eq!(net.deliver(), count);
            let got: Vec<Value> = inbox.drain().into_iter().map(|e| e.frame.rows[0][0].clone()).collect();
            let want: Vec<Value> = (0..count).map(|n| Value::Int(n as i64)).collect();
            prop_assert_eq!(got, want);
        }
    }
}
