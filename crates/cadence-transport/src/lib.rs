//! Cadence Transport - Moving channel frames between instances
//!
//! Inbound frames are appended to a bounded [`Inbox`] that the tick engine
//! drains at the start of each tick. Outbound frames go through a [`Link`],
//! fire-and-forget.

pub mod inbox;
pub mod link;
pub mod udp;

pub use inbox::*;
pub use link::*;
pub use udp::*;
