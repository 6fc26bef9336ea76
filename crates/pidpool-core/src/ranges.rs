//! Free interval tracking for identifier allocation.
//!
//! Instead of remembering every identifier that is in use, [`FreeIdRanges`]
//! keeps the identifiers that are *not* in use as a sorted list of half-open
//! intervals. A fresh pool is a single interval covering the whole bound, so
//! memory grows with fragmentation rather than with the number of held ids.
//!
//! - Taking always hands out the lowest free id (the first interval shrinks
//!   from below).
//! - Taking a specific id splits the interval containing it.
//! - Returning an id either extends a neighbouring interval, bridges two of
//!   them into one, or becomes a new single-id interval.
//!
//! The intervals are kept non-empty, ascending and never adjacent, so the set
//! of free ids has exactly one representation.

use std::ops::RangeInclusive;

use crate::error::{PoolError, Result};

/// Half-open interval `[start, end)` of free ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Range {
    start: u32,
    end: u32,
}

impl Range {
    #[inline]
    fn single(id: u32) -> Self {
        Self {
            start: id,
            end: id + 1,
        }
    }

    #[inline]
    fn contains(&self, id: u32) -> bool {
        self.start <= id && id < self.end
    }

    #[inline]
    fn len(&self) -> u32 {
        self.end - self.start
    }
}

/// Identifier pool over an arbitrary closed range `[min_id, max_id]`.
///
/// Not internally synchronized: every mutating call takes `&mut self`, so the
/// owner (usually the thread driving one connection) serializes access. Use
/// [`FreePacketIdRanges`](crate::FreePacketIdRanges) when the pool has to be
/// shared.
#[derive(Debug, Clone)]
pub struct FreeIdRanges {
    min_id: u32,
    max_id: u32,
    /// Free intervals, ascending, non-empty and never touching.
    ranges: Vec<Range>,
}

impl FreeIdRanges {
    /// Create a pool in which every id of `[min_id, max_id]` is free.
    ///
    /// Fails with [`PoolError::InvalidBounds`] if `min_id > max_id` or
    /// `max_id == u32::MAX` (the exclusive upper edge must be representable).
    pub fn new(min_id: u32, max_id: u32) -> Result<Self> {
        if min_id > max_id || max_id == u32::MAX {
            return Err(PoolError::InvalidBounds {
                min: min_id,
                max: max_id,
            });
        }
        Ok(Self::with_bounds(min_id, max_id))
    }

    /// Construct without validating; callers guarantee `min_id <= max_id < u32::MAX`.
    pub(crate) fn with_bounds(min_id: u32, max_id: u32) -> Self {
        debug_assert!(min_id <= max_id && max_id < u32::MAX);
        Self {
            min_id,
            max_id,
            ranges: vec![Range {
                start: min_id,
                end: max_id + 1,
            }],
        }
    }

    /// Lowest id this pool hands out.
    #[inline]
    pub fn min_id(&self) -> u32 {
        self.min_id
    }

    /// Highest id this pool hands out.
    #[inline]
    pub fn max_id(&self) -> u32 {
        self.max_id
    }

    #[inline]
    fn in_bounds(&self, id: u32) -> bool {
        self.min_id <= id && id <= self.max_id
    }

    /// Take the lowest id that is not currently allocated.
    ///
    /// Returns [`PoolError::NoIdAvailable`] once every id is held.
    pub fn take_next_id(&mut self) -> Result<u32> {
        let first = self.ranges.first_mut().ok_or(PoolError::NoIdAvailable)?;
        let id = first.start;
        first.start += 1;
        if first.start == first.end {
            self.ranges.remove(0);
        }
        Ok(id)
    }

    /// Take `id` if it is free, otherwise some other free id.
    ///
    /// An `id` outside the pool's bounds is caller misuse; it is logged and
    /// the call falls back to [`take_next_id`](Self::take_next_id) instead of
    /// failing.
    pub fn take_if_available(&mut self, id: u32) -> Result<u32> {
        if !self.in_bounds(id) {
            log::warn!(
                "Attempting to take id {} outside the valid range [{}, {}], taking another id",
                id,
                self.min_id,
                self.max_id
            );
        } else if self.try_take(id) {
            return Ok(id);
        }
        self.take_next_id()
    }

    /// Give `id` back to the pool.
    ///
    /// Returning an id that is already free is a no-op. Out-of-range ids are
    /// logged and ignored.
    pub fn return_id(&mut self, id: u32) {
        if !self.in_bounds(id) {
            log::warn!(
                "Returned id {} is outside the valid range [{}, {}], ignoring",
                id,
                self.min_id,
                self.max_id
            );
            return;
        }
        if !self.release(id) {
            log::trace!("Returned id {} was already free", id);
        }
    }

    /// Mark `ids` as held, e.g. the in-flight ids of a restored session.
    ///
    /// Ids that are already held are left alone; out-of-range ids are logged
    /// and skipped.
    pub fn prepopulate_with_unavailable_ids(&mut self, ids: &[u32]) {
        for &id in ids {
            if !self.in_bounds(id) {
                log::warn!(
                    "Cannot mark id {} as unavailable, outside the valid range [{}, {}]",
                    id,
                    self.min_id,
                    self.max_id
                );
                continue;
            }
            self.try_take(id);
        }
    }

    /// Remove `id` from the free intervals. Returns `false` if it was not free.
    pub(crate) fn try_take(&mut self, id: u32) -> bool {
        // First interval ending above `id`; the only one that can contain it.
        let idx = self.ranges.partition_point(|r| r.end <= id);
        let Some(range) = self.ranges.get_mut(idx) else {
            return false;
        };
        if id < range.start {
            return false;
        }

        if id == range.start {
            range.start += 1;
            if range.start == range.end {
                self.ranges.remove(idx);
            }
        } else if id + 1 == range.end {
            range.end = id;
        } else {
            let lower = Range {
                start: range.start,
                end: id,
            };
            range.start = id + 1;
            self.ranges.insert(idx, lower);
        }

        self.check_invariants();
        true
    }

    /// Put an in-bounds `id` back into the free intervals, coalescing with
    /// its neighbours. Returns `false` if it was already free.
    pub(crate) fn release(&mut self, id: u32) -> bool {
        // First interval reaching up to `id`: it either contains `id`, ends
        // right below it, or is the first interval above it.
        let idx = self.ranges.partition_point(|r| r.end < id);
        match self.ranges.get(idx).copied() {
            Some(range) if range.contains(id) => return false,
            Some(range) if range.end == id => {
                let bridges = self
                    .ranges
                    .get(idx + 1)
                    .is_some_and(|next| next.start == id + 1);
                if bridges {
                    let next = self.ranges.remove(idx + 1);
                    self.ranges[idx].end = next.end;
                } else {
                    self.ranges[idx].end = id + 1;
                }
            }
            Some(range) if range.start == id + 1 => self.ranges[idx].start = id,
            _ => self.ranges.insert(idx, Range::single(id)),
        }

        self.check_invariants();
        true
    }

    /// Whether `id` is currently free.
    pub fn is_free(&self, id: u32) -> bool {
        let idx = self.ranges.partition_point(|r| r.end <= id);
        self.ranges.get(idx).is_some_and(|r| r.contains(id))
    }

    /// Whether every id is held.
    #[inline]
    pub fn is_exhausted(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Number of free ids.
    pub fn free_count(&self) -> u32 {
        self.ranges.iter().map(Range::len).sum()
    }

    /// Number of held ids.
    pub fn held_count(&self) -> u32 {
        (self.max_id - self.min_id + 1) - self.free_count()
    }

    /// Free intervals in ascending order.
    pub fn free_ranges(&self) -> impl Iterator<Item = RangeInclusive<u32>> + '_ {
        self.ranges.iter().map(|r| r.start..=r.end - 1)
    }

    /// Free every id again (clean session).
    pub fn clear(&mut self) {
        self.ranges.clear();
        self.ranges.push(Range {
            start: self.min_id,
            end: self.max_id + 1,
        });
    }

    /// A broken interval list means ids could be handed out twice; abort.
    #[cfg(debug_assertions)]
    fn check_invariants(&self) {
        for pair in self.ranges.windows(2) {
            assert!(
                pair[0].end < pair[1].start,
                "free ranges overlap or touch: {:?} {:?}; this is a bug",
                pair[0],
                pair[1]
            );
        }
        for range in &self.ranges {
            assert!(
                range.start < range.end
                    && range.start >= self.min_id
                    && range.end <= self.max_id + 1,
                "free range {:?} is empty or outside [{}, {}]; this is a bug",
                range,
                self.min_id,
                self.max_id
            );
        }
    }

    #[cfg(not(debug_assertions))]
    #[inline(always)]
    fn check_invariants(&self) {}
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use super::*;

    fn ranges(pool: &FreeIdRanges) -> Vec<RangeInclusive<u32>> {
        pool.free_ranges().collect()
    }

    #[test]
    fn test_invalid_bounds() {
        assert_eq!(
            FreeIdRanges::new(5, 4).unwrap_err(),
            PoolError::InvalidBounds { min: 5, max: 4 }
        );
        assert!(FreeIdRanges::new(0, u32::MAX).is_err());
        assert!(FreeIdRanges::new(7, 7).is_ok());
    }

    #[test]
    fn test_bounds_survive_exhaustion_and_clear() {
        let mut pool = FreeIdRanges::new(7, 8).unwrap();
        pool.take_next_id().unwrap();
        pool.take_next_id().unwrap();
        assert!(pool.is_exhausted());
        assert_eq!((pool.min_id(), pool.max_id()), (7, 8));

        pool.clear();
        assert_eq!((pool.min_id(), pool.max_id()), (7, 8));
        assert_eq!(ranges(&pool), vec![7..=8]);
    }

    #[test]
    fn test_lowest_first_and_reuse() {
        let mut pool = FreeIdRanges::new(1, 3).unwrap();
        assert_eq!(pool.take_next_id(), Ok(1));
        assert_eq!(pool.take_next_id(), Ok(2));
        assert_eq!(pool.take_next_id(), Ok(3));
        assert_eq!(pool.take_next_id(), Err(PoolError::NoIdAvailable));
        assert!(pool.is_exhausted());

        pool.return_id(2);
        assert_eq!(pool.take_next_id(), Ok(2));
        assert_eq!(pool.take_next_id(), Err(PoolError::NoIdAvailable));
    }

    #[test]
    fn test_exhaustion_after_full_span() {
        let mut pool = FreeIdRanges::new(10, 109).unwrap();
        for expected in 10..=109 {
            assert_eq!(pool.take_next_id(), Ok(expected));
        }
        assert_eq!(pool.take_next_id(), Err(PoolError::NoIdAvailable));
        assert_eq!(pool.held_count(), 100);
    }

    #[test]
    fn test_take_if_available_splits_range() {
        let mut pool = FreeIdRanges::new(1, 10).unwrap();
        assert_eq!(pool.take_if_available(5), Ok(5));
        assert_eq!(ranges(&pool), vec![1..=4, 6..=10]);

        // Lower edge, upper edge and last remaining id of an interval.
        assert_eq!(pool.take_if_available(6), Ok(6));
        assert_eq!(pool.take_if_available(10), Ok(10));
        assert_eq!(ranges(&pool), vec![1..=4, 7..=9]);

        assert_eq!(pool.take_next_id(), Ok(1));
        assert_eq!(pool.take_if_available(8), Ok(8));
        assert_eq!(ranges(&pool), vec![2..=4, 7..=7, 9..=9]);
        assert_eq!(pool.take_if_available(7), Ok(7));
        assert_eq!(ranges(&pool), vec![2..=4, 9..=9]);
    }

    #[test]
    fn test_take_if_available_falls_back_when_held() {
        let mut pool = FreeIdRanges::new(1, 5).unwrap();
        pool.take_if_available(2).unwrap();
        // 2 is held, so the lowest free id comes back instead.
        assert_eq!(pool.take_if_available(2), Ok(1));
        assert_eq!(pool.take_if_available(2), Ok(3));
    }

    #[test]
    fn test_take_if_available_out_of_range_falls_back() {
        let mut pool = FreeIdRanges::new(1, 5).unwrap();
        assert_eq!(pool.take_if_available(0), Ok(1));
        assert_eq!(pool.take_if_available(100), Ok(2));

        let mut tiny = FreeIdRanges::new(1, 1).unwrap();
        tiny.take_next_id().unwrap();
        assert_eq!(tiny.take_if_available(1), Err(PoolError::NoIdAvailable));
    }

    #[test]
    fn test_return_creates_singleton_below_head() {
        let mut pool = FreeIdRanges::new(1, 10).unwrap();
        for _ in 0..5 {
            pool.take_next_id().unwrap();
        }
        pool.return_id(2);
        assert_eq!(ranges(&pool), vec![2..=2, 6..=10]);
        assert_eq!(pool.take_next_id(), Ok(2));
    }

    #[test]
    fn test_return_extends_and_merges() {
        let mut pool = FreeIdRanges::new(1, 10).unwrap();
        for _ in 0..10 {
            pool.take_next_id().unwrap();
        }
        pool.return_id(4);
        pool.return_id(8);
        assert_eq!(ranges(&pool), vec![4..=4, 8..=8]);

        // Adjacent to the lower edge of 8.
        pool.return_id(7);
        assert_eq!(ranges(&pool), vec![4..=4, 7..=8]);

        // Adjacent to the upper edge of 4.
        pool.return_id(5);
        assert_eq!(ranges(&pool), vec![4..=5, 7..=8]);

        // Bridges both intervals.
        pool.return_id(6);
        assert_eq!(ranges(&pool), vec![4..=8]);

        pool.return_id(10);
        pool.return_id(1);
        assert_eq!(ranges(&pool), vec![1..=1, 4..=8, 10..=10]);
    }

    #[test]
    fn test_double_return_is_noop() {
        let mut pool = FreeIdRanges::new(1, 10).unwrap();
        pool.take_next_id().unwrap();
        pool.return_id(1);
        pool.return_id(1);
        pool.return_id(7);
        assert_eq!(ranges(&pool), vec![1..=10]);
    }

    #[test]
    fn test_return_out_of_range_is_ignored() {
        let mut pool = FreeIdRanges::new(1, 10).unwrap();
        pool.take_next_id().unwrap();
        pool.return_id(0);
        pool.return_id(11);
        assert_eq!(ranges(&pool), vec![2..=10]);
    }

    #[test]
    fn test_round_trip_restores_ranges() {
        let mut pool = FreeIdRanges::new(1, 100).unwrap();
        for id in [3, 9, 10, 50, 51, 52] {
            pool.take_if_available(id).unwrap();
        }
        let before = ranges(&pool);

        let id = pool.take_next_id().unwrap();
        pool.return_id(id);
        assert_eq!(ranges(&pool), before);

        let id = pool.take_if_available(30).unwrap();
        pool.return_id(id);
        assert_eq!(ranges(&pool), before);
    }

    #[test]
    fn test_prepopulate_skips_seeded_ids() {
        let mut pool = FreeIdRanges::new(1, 65535).unwrap();
        pool.prepopulate_with_unavailable_ids(&[5]);
        let taken: Vec<u32> = (0..5).map(|_| pool.take_next_id().unwrap()).collect();
        assert_eq!(taken, vec![1, 2, 3, 4, 6]);

        pool.return_id(5);
        assert_eq!(pool.take_next_id(), Ok(5));
    }

    #[test]
    fn test_prepopulate_ignores_out_of_range_and_duplicates() {
        let mut pool = FreeIdRanges::new(1, 10).unwrap();
        pool.prepopulate_with_unavailable_ids(&[0, 3, 3, 11, 4]);
        assert_eq!(ranges(&pool), vec![1..=2, 5..=10]);
        assert_eq!(pool.held_count(), 2);
    }

    #[test]
    fn test_clear() {
        let mut pool = FreeIdRanges::new(1, 10).unwrap();
        pool.take_if_available(4).unwrap();
        pool.take_next_id().unwrap();
        pool.clear();
        assert_eq!(ranges(&pool), vec![1..=10]);
        assert_eq!(pool.held_count(), 0);
    }

    #[test]
    fn test_random_operations_partition_bounds() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        let (min, max) = (3u32, 66u32);
        let mut pool = FreeIdRanges::new(min, max).unwrap();
        let mut held = BTreeSet::new();

        for _ in 0..5_000 {
            match rng.gen_range(0..4) {
                0 => match pool.take_next_id() {
                    Ok(id) => {
                        assert!((min..id).all(|lower| held.contains(&lower)));
                        assert!(held.insert(id), "id {} handed out twice", id);
                    }
                    Err(e) => {
                        assert_eq!(e, PoolError::NoIdAvailable);
                        assert_eq!(held.len() as u32, max - min + 1);
                    }
                },
                1 => {
                    let wanted = rng.gen_range(min - 1..=max + 1);
                    if let Ok(id) = pool.take_if_available(wanted) {
                        assert!(held.insert(id), "id {} handed out twice", id);
                    }
                }
                _ => {
                    let id = rng.gen_range(min..=max);
                    pool.return_id(id);
                    held.remove(&id);
                }
            }

            for id in min..=max {
                assert_eq!(pool.is_free(id), !held.contains(&id), "id {}", id);
            }
            assert_eq!(pool.held_count() as usize, held.len());
        }
    }
}
