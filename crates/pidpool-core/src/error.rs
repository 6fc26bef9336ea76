//! Pool error types.

use thiserror::Error;

/// Packet identifier pool error.
///
/// Every variant is `Copy` and carries no heap data, so signalling an
/// exhausted pool on the hot path costs nothing beyond the return value.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolError {
    /// Every identifier in the pool's bounds is currently held.
    #[error("No packet identifier available")]
    NoIdAvailable,

    /// The requested identifier is already held by another exchange.
    #[error("Packet identifier {0} is already in use")]
    IdUnavailable(u32),

    /// The identifier lies outside the pool's bounds.
    #[error("Identifier {id} is outside the valid range [{min}, {max}]")]
    InvalidId { id: u32, min: u32, max: u32 },

    /// The pool bounds themselves are unusable.
    #[error("Invalid identifier bounds [{min}, {max}]")]
    InvalidBounds { min: u32, max: u32 },
}

pub type Result<T> = std::result::Result<T, PoolError>;
