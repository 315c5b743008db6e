//! Cadence Runtime - Programs, strata and the tick loop
//!
//! Each tick runs through fixed phases:
//! 1. Intake: drain the inbox and apply boundary mutations
//! 2. Bootstrap rules (first tick only)
//! 3. Per-stratum semi-naive fixpoint over immediate derives
//! 4. Deferred pass for `<+`, `<-` and `<~` rules
//! 5. Commit: validate and apply deferred mutations, collect sends
//! 6. Flush: ship sends, fire callbacks, clear transient collections
//!
//! A tick either completes or leaves the instance as it was before it
//! started.

pub mod callback;
pub mod channel;
pub mod config;
pub mod deploy;
pub mod engine;
pub mod instance;
pub mod logging;
pub mod program;
pub mod rule;
pub mod stratify;

pub use callback::*;
pub use channel::*;
pub use config::*;
pub use deploy::*;
pub use engine::*;
pub use instance::*;
pub use logging::*;
pub use program::*;
pub use rule::*;
pub use stratify::*;

pub use cadence_core::{tuple, CadenceError, CadenceResult, CollectionKind, Schema, Tuple, Value};
pub use cadence_state::Collection;
