//! Cadence Test Harness - Simulated networks and multi-instance scenarios
//!
//! This crate provides:
//! - A deterministic in-memory network with seeded chaos (loss, duplication, reordering)
//! - Channel filter builders
//! - A cluster driver that ticks many engines in lock step
//! - End-to-end channel scenarios

pub mod filters;
pub mod harness;
pub mod network;

#[cfg(test)]
mod scenarios;

pub use filters::*;
pub use harness::*;
pub use network::*;
