//! Flow tracking error types.

use pidpool_core::PoolError;
use thiserror::Error;

/// Error starting or tracking an acknowledged exchange.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowError {
    /// Every packet identifier of the session is in flight.
    #[error("No packet identifier available")]
    Exhausted,

    #[error("Pool error: {0}")]
    Pool(PoolError),

    #[error("Inflight window full ({0} exchanges)")]
    InflightLimit(u16),

    #[error("QoS 0 publish does not use a packet identifier")]
    NoPacketIdRequired,

    #[error("Requested packet identifier {requested} but the pool assigned {assigned}")]
    IdMismatch { requested: u16, assigned: u16 },

    #[error("Packet identifier {0} is already in flight")]
    AlreadyInflight(u16),

    #[error("Packet identifier {0} was not reserved by this flow")]
    IdNotReserved(u16),
}

impl From<PoolError> for FlowError {
    fn from(e: PoolError) -> Self {
        match e {
            PoolError::NoIdAvailable => FlowError::Exhausted,
            e => FlowError::Pool(e),
        }
    }
}

pub type Result<T> = std::result::Result<T, FlowError>;
