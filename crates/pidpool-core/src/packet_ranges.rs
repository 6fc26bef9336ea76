//! Thread-safe free-range pool over the MQTT packet identifier space.

use std::ops::RangeInclusive;

use parking_lot::Mutex;

use crate::error::{PoolError, Result};
use crate::pool::{check_packet_id, PacketIdPool, MAX_PACKET_ID, MIN_PACKET_ID};
use crate::ranges::FreeIdRanges;

/// Free-range pool fixed to packet identifiers `1..=65535`.
///
/// Same interval algorithm as [`FreeIdRanges`], with a stricter policy:
/// - id `0` is rejected with [`PoolError::InvalidId`] before anything changes
/// - asking for a specific id that is held fails with
///   [`PoolError::IdUnavailable`] instead of substituting another id
///
/// All state sits behind one mutex, so concurrent callers (inbound and
/// outbound paths of the same session) see a linear order of takes and
/// returns.
#[derive(Debug)]
pub struct FreePacketIdRanges {
    ranges: Mutex<FreeIdRanges>,
}

impl Default for FreePacketIdRanges {
    fn default() -> Self {
        Self::new()
    }
}

impl FreePacketIdRanges {
    /// Create a pool with every packet identifier free.
    pub fn new() -> Self {
        Self {
            ranges: Mutex::new(FreeIdRanges::with_bounds(
                MIN_PACKET_ID.into(),
                MAX_PACKET_ID.into(),
            )),
        }
    }

    /// Take the lowest free packet identifier.
    pub fn take_next_id(&self) -> Result<u16> {
        let id = self.ranges.lock().take_next_id()?;
        // Bounds are fixed to the u16 packet id space.
        Ok(id as u16)
    }

    /// Take exactly `id`.
    ///
    /// Fails with [`PoolError::IdUnavailable`] if `id` is held; the caller
    /// decides whether to fall back to [`take_next_id`](Self::take_next_id).
    pub fn take_specific_id(&self, id: u16) -> Result<()> {
        check_packet_id(id)?;
        if self.ranges.lock().try_take(id.into()) {
            Ok(())
        } else {
            Err(PoolError::IdUnavailable(id.into()))
        }
    }

    /// Give `id` back to the pool.
    pub fn return_id(&self, id: u16) -> Result<()> {
        check_packet_id(id)?;
        if !self.ranges.lock().release(id.into()) {
            log::trace!("Returned packet id {} was already free", id);
        }
        Ok(())
    }

    /// Mark `ids` as held. Validates every id before touching the pool.
    pub fn prepopulate_with_unavailable_ids(&self, ids: &[u16]) -> Result<()> {
        for &id in ids {
            check_packet_id(id)?;
        }
        let mut ranges = self.ranges.lock();
        for &id in ids {
            ranges.try_take(id.into());
        }
        Ok(())
    }

    /// Whether `id` is currently free.
    pub fn is_free(&self, id: u16) -> bool {
        self.ranges.lock().is_free(id.into())
    }

    /// Whether `id` is a legal packet identifier that is currently held.
    pub fn is_in_use(&self, id: u16) -> bool {
        id >= MIN_PACKET_ID && !self.is_free(id)
    }

    /// Number of free packet identifiers.
    pub fn free_count(&self) -> usize {
        self.ranges.lock().free_count() as usize
    }

    /// Number of held packet identifiers.
    pub fn in_use_count(&self) -> usize {
        self.ranges.lock().held_count() as usize
    }

    /// Snapshot of the free intervals in ascending order.
    pub fn free_ranges(&self) -> Vec<RangeInclusive<u16>> {
        self.ranges
            .lock()
            .free_ranges()
            .map(|r| (*r.start() as u16)..=(*r.end() as u16))
            .collect()
    }

    /// Free every packet identifier.
    pub fn clear(&self) {
        self.ranges.lock().clear();
    }
}

impl PacketIdPool for FreePacketIdRanges {
    fn take_next_id(&self) -> Result<u16> {
        FreePacketIdRanges::take_next_id(self)
    }

    fn take_if_available(&self, id: u16) -> Result<u16> {
        self.take_specific_id(id)?;
        Ok(id)
    }

    fn return_id(&self, id: u16) -> Result<()> {
        FreePacketIdRanges::return_id(self, id)
    }

    fn prepopulate_with_unavailable_ids(&self, ids: &[u16]) -> Result<()> {
        FreePacketIdRanges::prepopulate_with_unavailable_ids(self, ids)
    }

    fn is_in_use(&self, id: u16) -> bool {
        FreePacketIdRanges::is_in_use(self, id)
    }

    fn in_use_count(&self) -> usize {
        FreePacketIdRanges::in_use_count(self)
    }

    fn clear(&self) {
        FreePacketIdRanges::clear(self)
    }

    fn take_batch(&self, count: usize) -> Result<Vec<u16>> {
        // One lock for the whole batch so it cannot interleave with other takers.
        let mut ranges = self.ranges.lock();
        if (ranges.free_count() as usize) < count {
            return Err(PoolError::NoIdAvailable);
        }
        (0..count)
            .map(|_| ranges.take_next_id().map(|id| id as u16))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn test_sequential_allocation() {
        let pool = FreePacketIdRanges::new();
        assert_eq!(pool.take_next_id(), Ok(1));
        assert_eq!(pool.take_next_id(), Ok(2));
        assert_eq!(pool.take_next_id(), Ok(3));
        assert_eq!(pool.in_use_count(), 3);
    }

    #[test]
    fn test_take_specific_id() {
        let pool = FreePacketIdRanges::new();
        assert_eq!(pool.take_specific_id(3), Ok(()));
        assert_eq!(pool.free_ranges(), vec![1..=2, 4..=65535]);
        assert_eq!(pool.take_specific_id(3), Err(PoolError::IdUnavailable(3)));

        // Taking the whole lower interval leaves the pool continuing above it.
        pool.take_specific_id(1).unwrap();
        pool.take_specific_id(2).unwrap();
        assert_eq!(pool.free_ranges(), vec![4..=65535]);
        assert_eq!(pool.take_next_id(), Ok(4));
    }

    #[test]
    fn test_zero_is_rejected_without_mutation() {
        let pool = FreePacketIdRanges::new();
        pool.take_next_id().unwrap();
        let expected = PoolError::InvalidId {
            id: 0,
            min: 1,
            max: 65535,
        };
        assert_eq!(pool.take_specific_id(0), Err(expected));
        assert_eq!(pool.return_id(0), Err(expected));
        assert_eq!(pool.prepopulate_with_unavailable_ids(&[7, 0]), Err(expected));
        assert!(pool.is_free(7));
        assert_eq!(pool.free_ranges(), vec![2..=65535]);
    }

    #[test]
    fn test_is_in_use() {
        let pool = FreePacketIdRanges::new();
        assert!(!pool.is_in_use(0));
        assert!(!pool.is_in_use(1));
        pool.take_next_id().unwrap();
        assert!(pool.is_in_use(1));
        assert!(!pool.is_in_use(0));
        pool.return_id(1).unwrap();
        assert!(!pool.is_in_use(1));
    }

    #[test]
    fn test_max_id_is_legal() {
        let pool = FreePacketIdRanges::new();
        assert_eq!(pool.take_specific_id(65535), Ok(()));
        assert_eq!(pool.free_ranges(), vec![1..=65534]);
        pool.return_id(65535).unwrap();
        assert_eq!(pool.free_ranges(), vec![1..=65535]);
    }

    #[test]
    fn test_exhaustion_and_reuse() {
        let pool = FreePacketIdRanges::new();
        for expected in 1..=65535u16 {
            assert_eq!(pool.take_next_id(), Ok(expected));
        }
        assert_eq!(pool.take_next_id(), Err(PoolError::NoIdAvailable));
        assert_eq!(pool.free_count(), 0);

        pool.return_id(40000).unwrap();
        pool.return_id(2).unwrap();
        assert_eq!(pool.take_next_id(), Ok(2));
        assert_eq!(pool.take_next_id(), Ok(40000));
        assert_eq!(pool.take_next_id(), Err(PoolError::NoIdAvailable));
    }

    #[test]
    fn test_double_return_is_noop() {
        let pool = FreePacketIdRanges::new();
        let id = pool.take_next_id().unwrap();
        pool.return_id(id).unwrap();
        pool.return_id(id).unwrap();
        assert_eq!(pool.free_ranges(), vec![1..=65535]);
    }

    #[test]
    fn test_prepopulate_seeded_restore() {
        let pool = FreePacketIdRanges::new();
        pool.prepopulate_with_unavailable_ids(&[5]).unwrap();
        let taken: Vec<u16> = (0..5).map(|_| pool.take_next_id().unwrap()).collect();
        assert_eq!(taken, vec![1, 2, 3, 4, 6]);
        assert!(!pool.is_free(5));
    }

    #[test]
    fn test_contract_take_if_available() {
        let pool: &dyn PacketIdPool = &FreePacketIdRanges::new();
        assert_eq!(pool.take_if_available(9), Ok(9));
        assert_eq!(pool.take_if_available(9), Err(PoolError::IdUnavailable(9)));
        assert_eq!(pool.in_use_count(), 1);
    }

    #[test]
    fn test_take_batch_is_all_or_nothing() {
        let pool = FreePacketIdRanges::new();
        assert_eq!(pool.take_batch(3), Ok(vec![1, 2, 3]));

        pool.take_specific_id(65535).unwrap();
        for _ in 4..65535 {
            pool.take_next_id().unwrap();
        }
        pool.return_id(10).unwrap();
        pool.return_id(20).unwrap();
        let before = pool.free_ranges();

        assert_eq!(pool.take_batch(3), Err(PoolError::NoIdAvailable));
        assert_eq!(pool.free_ranges(), before);
        assert_eq!(pool.take_batch(2), Ok(vec![10, 20]));
    }

    #[test]
    fn test_concurrent_takes_are_unique() {
        let pool = Arc::new(FreePacketIdRanges::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let pool = Arc::clone(&pool);
                thread::spawn(move || {
                    (0..1000)
                        .map(|_| pool.take_next_id().unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut all = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(all.insert(id), "duplicate packet id {}", id);
            }
        }
        assert_eq!(all.len(), 8000);
        assert_eq!(pool.in_use_count(), 8000);
    }

    #[test]
    fn test_concurrent_take_and_return() {
        let pool = Arc::new(FreePacketIdRanges::new());
        let held = Arc::new(parking_lot::Mutex::new(HashSet::new()));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let pool = Arc::clone(&pool);
                let held = Arc::clone(&held);
                thread::spawn(move || {
                    for _ in 0..2000 {
                        let id = pool.take_next_id().unwrap();
                        assert!(held.lock().insert(id), "packet id {} held twice", id);
                        held.lock().remove(&id);
                        pool.return_id(id).unwrap();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(pool.in_use_count(), 0);
        assert_eq!(pool.free_ranges(), vec![1..=65535]);
    }
}
