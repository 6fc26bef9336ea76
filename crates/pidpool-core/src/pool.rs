//! The packet identifier pool contract shared by the synchronized strategies.
//!
//! Implements requirements from MQTT spec:
//! - [MQTT-2.3.1-1] SUBSCRIBE, UNSUBSCRIBE and PUBLISH (QoS > 0) packets MUST contain a non-zero Packet Identifier.
//! - [MQTT-2.3.1-2] Each time a Client sends a new packet it MUST assign a currently unused Packet Identifier.

use crate::error::{PoolError, Result};

/// Lowest legal packet identifier.
pub const MIN_PACKET_ID: u16 = 1;

/// Highest legal packet identifier.
pub const MAX_PACKET_ID: u16 = u16::MAX;

/// Number of legal packet identifiers.
pub const PACKET_ID_SPACE: usize = MAX_PACKET_ID as usize;

/// Reject the one `u16` value that is not a legal packet identifier.
#[inline]
pub(crate) fn check_packet_id(id: u16) -> Result<()> {
    if id < MIN_PACKET_ID {
        return Err(PoolError::InvalidId {
            id: id.into(),
            min: MIN_PACKET_ID.into(),
            max: MAX_PACKET_ID.into(),
        });
    }
    Ok(())
}

/// A per-session pool of packet identifiers that can be shared across threads.
///
/// The message-flow tracker takes an id whenever an acknowledged exchange
/// (QoS 1/2 PUBLISH, SUBSCRIBE, UNSUBSCRIBE) starts and returns it when the
/// exchange completes. Exhaustion is reported with
/// [`PoolError::NoIdAvailable`]; the pool never waits for an id to come back.
pub trait PacketIdPool: Send + Sync {
    /// Take an id that is not currently in use.
    fn take_next_id(&self) -> Result<u16>;

    /// Take `id` if it is free.
    ///
    /// What happens when `id` is already held depends on the strategy: the
    /// range pool fails with [`PoolError::IdUnavailable`], the circular pool
    /// hands out another free id.
    fn take_if_available(&self, id: u16) -> Result<u16>;

    /// Give `id` back. Returning an id that is already free is harmless.
    fn return_id(&self, id: u16) -> Result<()>;

    /// Mark `ids` as held before traffic resumes on a restored session.
    fn prepopulate_with_unavailable_ids(&self, ids: &[u16]) -> Result<()>;

    /// Check if `id` is currently held. Always `false` for id 0.
    fn is_in_use(&self, id: u16) -> bool;

    /// Number of ids currently held.
    fn in_use_count(&self) -> usize;

    /// Free every id (clean session).
    fn clear(&self);

    /// Take `count` ids at once, e.g. one per slot of the inflight window.
    ///
    /// Either all `count` ids are taken or none are: on exhaustion the ids
    /// already taken go back to the pool before the error is returned.
    fn take_batch(&self, count: usize) -> Result<Vec<u16>> {
        let mut ids = Vec::with_capacity(count);
        for _ in 0..count {
            match self.take_next_id() {
                Ok(id) => ids.push(id),
                Err(e) => {
                    for id in ids {
                        // Ids handed out by the pool are always legal.
                        let _ = self.return_id(id);
                    }
                    return Err(e);
                }
            }
        }
        Ok(ids)
    }
}
