//! Cadence Wire Protocol - Binary channel frames
//!
//! A frame carries a batch of rows for one channel from one sender:
//! - Fixed header (6 bytes) followed by the channel name
//! - Rows of tagged values
//!
//! The sender address is not part of the frame; the transport supplies it.

pub mod codec;
pub mod flags;
pub mod frame;
pub mod header;

pub use codec::*;
pub use flags::*;
pub use frame::*;
pub use header::*;
