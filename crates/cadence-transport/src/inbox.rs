//! Bounded inbox shared between the network and the tick engine

use std::collections::VecDeque;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::warn;

use cadence_wire::Frame;

/// Default inbox capacity, in frames
pub const DEFAULT_INBOX_CAPACITY: usize = 4096;

/// A frame together with the address it came from
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Envelope {
    /// Bound address of the sending instance
    pub sender: String,
    pub frame: Frame,
}

/// Inbound frames waiting for the next tick
#[derive(Debug)]
pub struct Inbox {
    queue: Mutex<VecDeque<Envelope>>,
    capacity: usize,
    notify: Notify,
}

impl Inbox {
    pub fn new(capacity: usize) -> Self {
        Inbox {
            queue: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
            notify: Notify::new(),
        }
    }

    /// Append an envelope and wake the driver.
    ///
    /// Returns `false` if the inbox is full; the envelope is dropped.
    pub fn push(&self, envelope: Envelope) -> bool {
        {
            let mut queue = self.queue.lock();
            if queue.len() >= self.capacity {
                warn!(
                    sender = %envelope.sender,
                    channel = %envelope.frame.channel(),
                    capacity = self.capacity,
                    "Inbox full, dropping frame"
                );
                return false;
            }
            queue.push_back(envelope);
        }
        self.notify.notify_one();
        true
    }

    /// Take every queued envelope, oldest first.
    pub fn drain(&self) -> Vec<Envelope> {
        self.queue.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Wake the driver without delivering anything.
    pub fn wake(&self) {
        self.notify.notify_one();
    }

    /// Wait until something is pushed or [`Inbox::wake`] is called.
    pub async fn notified(&self) {
        self.notify.notified().await;
    }
}

impl Default for Inbox {
    fn default() -> Self {
        Inbox::new(DEFAULT_INBOX_CAPACITY)
    }
}
