//! Cadence State - Collections and the mutation buffer
//!
//! Collections hold the tuples visible to rule evaluation. All changes
//! except immediate derives go through the [`MutationBuffer`], which
//! validates a whole batch before anything is applied.

pub mod buffer;
pub mod collection;
pub mod store;

pub use buffer::*;
pub use collection::*;
pub use store::*;
