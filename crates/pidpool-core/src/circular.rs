//! Circular packet identifier allocation.
//!
//! Tracks the ids in use in a set and walks a cursor around the id space,
//! wrapping from 65535 back to 1. Memory grows with the number of held ids,
//! which is cheap for the usual handful of in-flight messages per client.

use ahash::AHashSet;
use parking_lot::Mutex;

use crate::error::{PoolError, Result};
use crate::pool::{check_packet_id, PacketIdPool, PACKET_ID_SPACE};

#[derive(Debug, Default)]
struct State {
    /// Last id handed out (0 before the first allocation).
    cursor: u16,
    /// Ids currently in use.
    in_use: AHashSet<u16>,
}

impl State {
    fn take_next(&mut self) -> Result<u16> {
        if self.in_use.len() >= PACKET_ID_SPACE {
            return Err(PoolError::NoIdAvailable);
        }

        // At most one full lap over the id space.
        for _ in 0..=PACKET_ID_SPACE {
            self.advance();
            if self.in_use.insert(self.cursor) {
                return Ok(self.cursor);
            }
        }
        Err(PoolError::NoIdAvailable)
    }

    /// Advance the cursor, skipping 0.
    #[inline]
    fn advance(&mut self) {
        self.cursor = self.cursor.wrapping_add(1);
        if self.cursor == 0 {
            self.cursor = 1;
        }
    }
}

/// Packet identifier pool that hands out ids in circular order.
///
/// Unlike [`FreePacketIdRanges`](crate::FreePacketIdRanges), a returned id is
/// not reused until the cursor comes around again, and asking for a held id
/// falls back to the next free one.
#[derive(Debug, Default)]
pub struct CircularIdPool {
    state: Mutex<State>,
}

impl CircularIdPool {
    /// Create an empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the next free id after the cursor.
    pub fn take_next_id(&self) -> Result<u16> {
        self.state.lock().take_next()
    }

    /// Take `id` if it is free, otherwise the next free id after the cursor.
    pub fn take_if_available(&self, id: u16) -> Result<u16> {
        check_packet_id(id)?;
        let mut state = self.state.lock();
        if !state.in_use.insert(id) {
            return state.take_next();
        }
        if id > state.cursor {
            state.cursor = id;
        }
        Ok(id)
    }

    /// Release a packet identifier after its exchange completes.
    ///
    /// Releasing an id that is not in use is harmless; it typically means a
    /// duplicate acknowledgement already released it.
    pub fn return_id(&self, id: u16) -> Result<()> {
        check_packet_id(id)?;
        if !self.state.lock().in_use.remove(&id) {
            log::debug!("Returned packet id {} was not in use", id);
        }
        Ok(())
    }

    /// Mark `ids` as in use and continue allocating above the largest of them.
    pub fn prepopulate_with_unavailable_ids(&self, ids: &[u16]) -> Result<()> {
        for &id in ids {
            check_packet_id(id)?;
        }
        let mut state = self.state.lock();
        state.in_use.extend(ids.iter().copied());
        if let Some(&max) = ids.iter().max() {
            state.cursor = max;
        }
        Ok(())
    }

    /// Check if a packet identifier is currently in use.
    pub fn is_in_use(&self, id: u16) -> bool {
        self.state.lock().in_use.contains(&id)
    }

    /// Get the number of packet IDs currently in use.
    pub fn in_use_count(&self) -> usize {
        self.state.lock().in_use.len()
    }

    /// Clear all allocations (used on clean session connect).
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.in_use.clear();
        state.cursor = 0;
    }
}

impl PacketIdPool for CircularIdPool {
    fn take_next_id(&self) -> Result<u16> {
        CircularIdPool::take_next_id(self)
    }

    fn take_if_available(&self, id: u16) -> Result<u16> {
        CircularIdPool::take_if_available(self, id)
    }

    fn return_id(&self, id: u16) -> Result<()> {
        CircularIdPool::return_id(self, id)
    }

    fn prepopulate_with_unavailable_ids(&self, ids: &[u16]) -> Result<()> {
        CircularIdPool::prepopulate_with_unavailable_ids(self, ids)
    }

    fn is_in_use(&self, id: u16) -> bool {
        CircularIdPool::is_in_use(self, id)
    }

    fn in_use_count(&self) -> usize {
        CircularIdPool::in_use_count(self)
    }

    fn clear(&self) {
        CircularIdPool::clear(self)
    }
}
