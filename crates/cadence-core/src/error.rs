//! Error types for the Cadence runtime

use thiserror::Error;

use crate::{CollectionKind, Value};

/// Core Cadence errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CadenceError {
    // Declaration errors
    #[error("Schema error on {collection}: {reason}")]
    SchemaError { collection: String, reason: String },

    #[error("Unknown collection: {0}")]
    UnknownCollection(String),

    #[error("Operator {op} not permitted on {kind} {collection}")]
    InvalidOperator {
        collection: String,
        kind: CollectionKind,
        op: &'static str,
    },

    #[error("Arity mismatch on {collection}: expected {expected} columns, got {actual}")]
    ArityMismatch {
        collection: String,
        expected: usize,
        actual: usize,
    },

    // Program errors
    #[error("Stratification error: non-monotone cycle {}", .cycle.join(" -> "))]
    StratificationError { cycle: Vec<String> },

    // Tick errors
    #[error("Key constraint violated on {collection}: key {key:?} maps to {existing:?} and {conflicting:?}")]
    KeyConstraintError {
        collection: String,
        key: Vec<Value>,
        existing: Vec<Value>,
        conflicting: Vec<Value>,
    },

    #[error("Fixpoint not reached in stratum {stratum} after {passes} passes")]
    FixpointLimit { stratum: usize, passes: usize },

    #[error("Engine stopped")]
    EngineStopped,

    // Wire errors
    #[error("Invalid wire format: {0}")]
    InvalidWireFormat(String),

    #[error("Buffer too short: expected {expected}, got {actual}")]
    BufferTooShort { expected: usize, actual: usize },

    #[error("Unknown value tag: {0}")]
    UnknownValueTag(u8),

    // Transport errors
    #[error("Transport error: {0}")]
    TransportError(String),

    // Configuration errors
    #[error("Config error: {0}")]
    ConfigError(String),
}

impl CadenceError {
    pub fn schema(collection: impl Into<String>, reason: impl Into<String>) -> Self {
        CadenceError::SchemaError {
            collection: collection.into(),
            reason: reason.into(),
        }
    }

    /// Construction-time errors: the program never runs.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CadenceError::SchemaError { .. } | CadenceError::StratificationError { .. }
        )
    }
}

/// Result type for Cadence operations
pub type CadenceResult<T> = Result<T, CadenceError>;
