//! Per-search visited-node tracking without an O(N) reset between searches.
//!
//! Each [`VisitedList`] stamps every node it marks with the list's current
//! epoch; a node counts as visited iff its stored epoch equals the list's
//! epoch. Starting a new search just bumps the epoch rather than clearing
//! the array, so repeated searches against the same [`VisitedPool`] stay
//! cheap. Epochs are `u16` and wrap after ~32k searches, at
//! which point the array is cleared and the epoch restarts at 1.

use parking_lot::Mutex;

use crate::types::PointId;

const WRAP_AT: u16 = u16::MAX;

/// A single worker's mark array, loaned out by a [`VisitedPool`].
pub struct VisitedList {
    epochs: Vec<u16>,
    current: u16,
}

impl VisitedList {
    fn new(capacity: usize) -> Self {
        Self {
            epochs: vec![0; capacity],
            current: 1,
        }
    }

    /// Grow the backing array if the index has gained points since this
    /// list was created or last reset.
    pub fn reserve_capacity(&mut self, capacity: usize) {
        if self.epochs.len() < capacity {
            self.epochs.resize(capacity, 0);
        }
    }

    /// Begin a new search: advance the epoch, wrapping (and clearing) if
    /// we've exhausted the `u16` epoch space.
    pub fn reset(&mut self) {
        if self.current == WRAP_AT {
            self.epochs.iter_mut().for_each(|e| *e = 0);
            self.current = 1;
        } else {
            self.current += 1;
        }
    }

    /// Mark `pid` visited in the current search, returning `true` if it was
    /// not already marked (mirrors `HashSet::insert`'s return convention,
    /// matching the call sites in `search`).
    pub fn insert(&mut self, pid: PointId) -> bool {
        let idx = pid.index();
        if self.epochs[idx] == self.current {
            false
        } else {
            self.epochs[idx] = self.current;
            true
        }
    }

    pub fn is_visited(&self, pid: PointId) -> bool {
        self.epochs[pid.index()] == self.current
    }
}

/// A free list of [`VisitedList`]s, one per concurrent searcher, so that
/// `batch_search` and concurrent queries don't each allocate a full
/// node-count-sized array per call.
pub struct VisitedPool {
    free: Mutex<Vec<VisitedList>>,
    capacity: usize,
}

impl VisitedPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            free: Mutex::new(Vec::new()),
            capacity,
        }
    }

    pub fn acquire(&self) -> VisitedList {
        match self.free.lock().pop() {
            Some(mut list) => {
                list.reserve_capacity(self.capacity);
                list
            }
            None => VisitedList::new(self.capacity),
        }
    }

    pub fn release(&self, list: VisitedList) {
        self.free.lock().push(list);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_reports_first_sighting_only() {
        let mut list = VisitedList::new(4);
        assert!(list.insert(PointId(0)));
        assert!(!list.insert(PointId(0)));
        assert!(list.insert(PointId(1)));
    }

    #[test]
    fn reset_clears_visited_state_without_realloc() {
        let mut list = VisitedList::new(4);
        list.insert(PointId(2));
        list.reset();
        assert!(!list.is_visited(PointId(2)));
    }

    #[test]
    fn epoch_wraps_after_u16_max_resets() {
        let mut list = VisitedList::new(2);
        list.current = u16::MAX;
        list.insert(PointId(0));
        list.reset();
        assert_eq!(list.current, 1);
        assert!(!list.is_visited(PointId(0)));
    }
}
