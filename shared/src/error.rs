//! Error types for the store and rules capabilities.

use thiserror::Error;

/// Failures of the backing store or the transport in front of it.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Transport or backing store could not be reached.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// No response arrived within the request timeout.
    #[error("store request timed out")]
    Timeout,

    /// An optimistic transaction kept losing its compare-and-set.
    #[error("transaction gave up after {attempts} attempts")]
    TransactionContention {
        /// Number of attempts made.
        attempts: u32,
    },

    /// A value could not be encoded or decoded.
    #[error("encoding error: {0}")]
    Encoding(String),
}

/// Failures reported by a rules capability.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RulesError {
    /// The position encoding could not be parsed.
    #[error("invalid position: {0}")]
    InvalidPosition(String),

    /// A square name could not be parsed.
    #[error("invalid square: {0}")]
    InvalidSquare(String),
}
