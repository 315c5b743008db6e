//! Channel filter builders
//!
//! Each builder only touches the named channel; tuples for every other
//! channel pass through unchanged.

use std::sync::Arc;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use cadence_runtime::{ChannelFilter, Tuple};

/// Send the tuples matching `keep`, drop the rest for good.
pub fn keep_only<F>(channel: &str, keep: F) -> ChannelFilter
where
    F: Fn(&Tuple) -> bool + Send + Sync + 'static,
{
    let channel = channel.to_string();
    Arc::new(move |name: &str, tuples: Vec<Tuple>| {
        if name != channel {
            return (tuples, Vec::new());
        }
        (tuples.into_iter().filter(|t| keep(t)).collect(), Vec::new())
    })
}

/// Hold tuples until at least `size` are pending, then send them together.
pub fn batch_at_least(channel: &str, size: usize) -> ChannelFilter {
    let channel = channel.to_string();
    Arc::new(move |name: &str, tuples: Vec<Tuple>| {
        if name != channel || tuples.len() >= size {
            (tuples, Vec::new())
        } else {
            (Vec::new(), tuples)
        }
    })
}

/// Hold everything sent on `channel`.
pub fn hold_all(channel: &str) -> ChannelFilter {
    let channel = channel.to_string();
    Arc::new(move |name: &str, tuples: Vec<Tuple>| {
        if name == channel {
            (Vec::new(), tuples)
        } else {
            (tuples, Vec::new())
        }
    })
}

/// Send everything in a reproducible random order.
pub fn shuffle_seeded(channel: &str, seed: u64) -> ChannelFilter {
    let channel = channel.to_string();
    let rng = Mutex::new(StdRng::seed_from_u64(seed));
    Arc::new(move |name: &str, mut tuples: Vec<Tuple>| {
        if name == channel {
            tuples.shuffle(&mut *rng.lock());
        }
        (tuples, Vec::new())
    })
}
