//! Channel transport
//!
//! Turns committed sends into frames and received frames back into tuples.
//! Only payload columns travel; the receiver re-inserts its own bound
//! address at the address column, unless the address is a value column,
//! in which case it travels in-band.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;

use tracing::{debug, trace, warn};

use cadence_core::{CollectionKind, Schema, Tuple, Value};
use cadence_state::{CollectionStore, Outgoing};
use cadence_transport::{Envelope, Inbox, Link};
use cadence_wire::{pack_rows, FrameFlags};

/// Delivery interception hook.
///
/// Called once per flush for each channel with pending tuples; returns the
/// tuples to send now and the tuples to hold for a later flush.
pub type ChannelFilter =
    Arc<dyn Fn(&str, Vec<Tuple>) -> (Vec<Tuple>, Vec<Tuple>) + Send + Sync>;

/// Channel transport counters
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChannelStats {
    /// Tuples handed to a link or the local inbox
    pub tuples_sent: u64,
    pub frames_sent: u64,
    /// Frames delivered to this instance without the network
    pub frames_local: u64,
    pub dropped_disconnected: u64,
    /// Dropped for bad addresses or link failures
    pub dropped_errors: u64,
    pub tuples_received: u64,
    /// Received rows that did not fit the channel schema
    pub rows_rejected: u64,
}

/// Channel side of one instance
pub struct ChannelTransport {
    local_addr: String,
    inbox: Arc<Inbox>,
    link: Option<Arc<dyn Link>>,
    filter: Option<ChannelFilter>,
    held: BTreeMap<String, Vec<Tuple>>,
    disconnected: HashSet<String>,
    reconnected: HashSet<String>,
    all_disconnected: bool,
    stats: ChannelStats,
}

impl ChannelTransport {
    pub fn new(local_addr: impl Into<String>, inbox: Arc<Inbox>) -> Self {
        ChannelTransport {
            local_addr: local_addr.into(),
            inbox,
            link: None,
            filter: None,
            held: BTreeMap::new(),
            disconnected: HashSet::new(),
            reconnected: HashSet::new(),
            all_disconnected: false,
            stats: ChannelStats::default(),
        }
    }

    pub fn set_link(&mut self, link: Option<Arc<dyn Link>>) {
        self.link = link;
    }

    pub fn set_filter(&mut self, filter: Option<ChannelFilter>) {
        self.filter = filter;
    }

    pub fn local_addr(&self) -> &str {
        &self.local_addr
    }

    pub fn inbox(&self) -> &Arc<Inbox> {
        &self.inbox
    }

    pub fn stats(&self) -> &ChannelStats {
        &self.stats
    }

    /// Tuples withheld by the filter
    pub fn held(&self) -> usize {
        self.held.values().map(Vec::len).sum()
    }

    /// Drop the outbound link. Later remote sends are dropped.
    pub fn close(&mut self) {
        self.link = None;
    }

    pub fn disconnect(&mut self, peer: &str) {
        debug!(peer, "disconnect");
        self.reconnected.remove(peer);
        self.disconnected.insert(peer.to_string());
    }

    pub fn connect(&mut self, peer: &str) {
        debug!(peer, "connect");
        self.disconnected.remove(peer);
        if self.all_disconnected {
            self.reconnected.insert(peer.to_string());
        }
    }

    pub fn disconnect_all(&mut self) {
        debug!("disconnect all");
        self.all_disconnected = true;
        self.reconnected.clear();
    }

    pub fn connect_all(&mut self) {
        debug!("connect all");
        self.all_disconnected = false;
        self.disconnected.clear();
        self.reconnected.clear();
    }

    pub fn is_disconnected(&self, peer: &str) -> bool {
        self.disconnected.contains(peer)
            || (self.all_disconnected && !self.reconnected.contains(peer))
    }

    /// Ship this tick's sends together with anything held back earlier.
    ///
    /// Returns the number of tuples that left. Failures never propagate:
    /// the affected tuples are logged and dropped.
    pub fn flush(&mut self, store: &CollectionStore, outgoing: Vec<Outgoing>) -> usize {
        let mut pending = std::mem::take(&mut self.held);
        for Outgoing { channel, tuple } in outgoing {
            pending.entry(channel).or_default().push(tuple);
        }

        let mut sent = 0;
        for (channel, tuples) in pending {
            let (now, later) = match &self.filter {
                Some(filter) => filter(&channel, tuples),
                None => (tuples, Vec::new()),
            };
            if !later.is_empty() {
                trace!(%channel, held = later.len(), "filter held tuples");
                self.held.insert(channel.clone(), later);
            }
            if !now.is_empty() {
                sent += self.send(store, &channel, now);
            }
        }
        sent
    }

    fn send(&mut self, store: &CollectionStore, channel: &str, tuples: Vec<Tuple>) -> usize {
        let collection = match store.get(channel) {
            Ok(c) if c.kind().is_channel_like() => c,
            _ => {
                warn!(%channel, "Dropping sends to a collection that is not a channel");
                self.stats.dropped_errors += tuples.len() as u64;
                return 0;
            }
        };
        let kind = collection.kind();
        let schema = collection.schema();
        let in_band = schema.address_in_values();

        let mut batches: BTreeMap<String, Vec<Vec<Value>>> = BTreeMap::new();
        for tuple in tuples {
            let Some(dest) = self.destination(kind, schema, &tuple) else {
                warn!(%channel, %tuple, "Dropping send without a string address");
                self.stats.dropped_errors += 1;
                continue;
            };
            if kind == CollectionKind::Channel && self.is_disconnected(&dest) {
                debug!(%channel, %dest, %tuple, "Dropping send to disconnected peer");
                self.stats.dropped_disconnected += 1;
                continue;
            }
            let row = if in_band {
                tuple.into_values()
            } else {
                tuple.project(schema.payload_cols())
            };
            batches.entry(dest).or_default().push(row);
        }

        let mut flags = FrameFlags::NONE;
        flags.set_address_in_band(in_band);

        let mut sent = 0;
        for (dest, rows) in batches {
            let count = rows.len();
            let frames = match pack_rows(channel, flags, rows) {
                Ok(frames) => frames,
                Err(e) => {
                    warn!(%channel, %dest, "Dropping batch: {}", e);
                    self.stats.dropped_errors += count as u64;
                    continue;
                }
            };
            for frame in frames {
                let rows = frame.rows.len();
                if dest == self.local_addr {
                    self.inbox.push(Envelope {
                        sender: self.local_addr.clone(),
                        frame,
                    });
                    self.stats.frames_local += 1;
                } else {
                    let result = match &self.link {
                        Some(link) => link.transmit(&dest, &frame),
                        None => {
                            warn!(%channel, %dest, "No outbound link, dropping frame");
                            self.stats.dropped_errors += rows as u64;
                            continue;
                        }
                    };
                    if let Err(e) = result {
                        warn!(%channel, %dest, "Dropping frame: {}", e);
                        self.stats.dropped_errors += rows as u64;
                        continue;
                    }
                }
                self.stats.frames_sent += 1;
                self.stats.tuples_sent += rows as u64;
                sent += rows;
            }
        }
        sent
    }

    fn destination(&self, kind: CollectionKind, schema: &Schema, tuple: &Tuple) -> Option<String> {
        if kind == CollectionKind::Loopback {
            return Some(self.local_addr.clone());
        }
        let col = schema.address_col()?;
        tuple.str(col).map(str::to_string)
    }

    /// Rebuild the tuples carried by a received frame.
    ///
    /// Returns the target channel and its tuples. Frames for unknown
    /// collections and rows of the wrong width are logged and dropped.
    pub fn deliver(
        &mut self,
        store: &CollectionStore,
        envelope: Envelope,
    ) -> Option<(String, Vec<Tuple>)> {
        let Envelope { sender, frame } = envelope;
        let channel = frame.header.channel.clone();
        let collection = match store.get(&channel) {
            Ok(c) if c.kind().is_channel_like() => c,
            _ => {
                warn!(%sender, %channel, "Frame for unknown channel");
                self.stats.rows_rejected += frame.rows.len() as u64;
                return None;
            }
        };
        let schema = collection.schema();
        let in_band = frame.header.flags.address_in_band();

        let mut tuples = Vec::with_capacity(frame.rows.len());
        for mut row in frame.rows {
            if !in_band {
                if let Some(col) = schema.address_col() {
                    if col <= row.len() {
                        row.insert(col, Value::from(self.local_addr.as_str()));
                    }
                }
            }
            let tuple = Tuple::new(row).with_origin(sender.as_str());
            if let Err(e) = schema.check_arity(&channel, &tuple) {
                warn!(%sender, %channel, "Rejecting row: {}", e);
                self.stats.rows_rejected += 1;
                continue;
            }
            tuples.push(tuple);
        }

        self.stats.tuples_received += tuples.len() as u64;
        trace!(%sender, %channel, rows = tuples.len(), "delivered");
        Some((channel, tuples))
    }
}

impl fmt::Debug for ChannelTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelTransport")
            .field("local_addr", &self.local_addr)
            .field("linked", &self.link.is_some())
            .field("filtered", &self.filter.is_some())
            .field("held", &self.held())
            .field("stats", &self.stats)
            .finish()
    }
}
