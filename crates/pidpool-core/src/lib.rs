//! pidpool-core - Packet identifier allocation for MQTT sessions.
//!
//! Every QoS 1/2 PUBLISH, SUBSCRIBE and UNSUBSCRIBE needs a packet identifier
//! that is unique among the session's in-flight exchanges. This crate provides
//! the pools those identifiers come from:
//!
//! - [`FreeIdRanges`]: free-interval pool over any `[min, max]` bound,
//!   single-owner (`&mut self`), lowest id first.
//! - [`FreePacketIdRanges`]: the same algorithm over `1..=65535`, behind a
//!   mutex, strict about ids that are out of range or already held.
//! - [`CircularIdPool`]: used-id set with a circular cursor, behind a mutex.
//!
//! The two shareable pools implement [`PacketIdPool`].
//!
//! # Example
//!
//! ```
//! use pidpool_core::{FreePacketIdRanges, PoolError};
//!
//! let pool = FreePacketIdRanges::new();
//! pool.prepopulate_with_unavailable_ids(&[2]).unwrap();
//!
//! assert_eq!(pool.take_next_id(), Ok(1));
//! assert_eq!(pool.take_next_id(), Ok(3));
//! assert_eq!(pool.take_specific_id(2), Err(PoolError::IdUnavailable(2)));
//!
//! pool.return_id(1).unwrap();
//! assert_eq!(pool.take_next_id(), Ok(1));
//! ```

pub mod circular;
pub mod error;
pub mod packet_ranges;
pub mod pool;
pub mod ranges;

pub use circular::CircularIdPool;
pub use error::{PoolError, Result};
pub use packet_ranges::FreePacketIdRanges;
pub use pool::{PacketIdPool, MAX_PACKET_ID, MIN_PACKET_ID, PACKET_ID_SPACE};
pub use ranges::FreeIdRanges;
