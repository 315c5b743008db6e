//! Cadence Core - Fundamental types and primitives
//!
//! This crate defines the types shared by every layer of the runtime:
//! - Values and tuples
//! - Collection kinds and schemas (key, value and address columns)
//! - The error taxonomy

pub mod error;
pub mod schema;
pub mod value;

pub use error::*;
pub use schema::*;
pub use value::*;
