//! Instance-local diagnostic counters and snapshots.
//!
//! Nothing here is process-global: every heap and allocator carries its own
//! state, so independent heaps never observe each other's traffic.

use std::cell::Cell;

/// Outstanding-allocation counter owned by a single heap.
///
/// Unlike a gauge, underflow is a programming error: decrementing past zero
/// means something was freed that was never allocated, and panics.
#[derive(Debug, Default)]
pub struct Counter(Cell<usize>);

impl Counter {
    pub const fn new() -> Self {
        Self(Cell::new(0))
    }

    #[inline]
    pub fn incr(&self) {
        self.0.set(self.0.get() + 1);
    }

    /// # Panics
    ///
    /// Panics if the counter is already zero.
    #[inline]
    pub fn decr(&self) {
        let current = self.0.get();
        assert!(current != 0, "allocation counter underflow: free without matching alloc");
        self.0.set(current - 1);
    }

    #[inline]
    pub fn get(&self) -> usize {
        self.0.get()
    }
}

/// Point-in-time view of a buddy heap's free space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuddyStats {
    /// Order of the whole region (`2^order` bytes).
    pub order: u8,
    /// Number of free blocks per level; index 0 is the whole-region level.
    pub free_blocks: Vec<usize>,
    /// Sum of the sizes of every free block.
    pub free_bytes: usize,
}

impl BuddyStats {
    /// Size in bytes of a block on `level`.
    #[must_use]
    pub fn block_size(&self, level: usize) -> usize {
        1 << (usize::from(self.order) - level)
    }

    /// True when the region is a single free block.
    #[must_use]
    pub fn is_fully_coalesced(&self) -> bool {
        self.free_blocks.first() == Some(&1) && self.free_blocks[1..].iter().all(|&n| n == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_incr_decr() {
        let c = Counter::new();
        c.incr();
        c.incr();
        c.decr();
        assert_eq!(c.get(), 1);
    }

    #[test]
    #[should_panic(expected = "underflow")]
    fn test_counter_underflow_panics() {
        let c = Counter::new();
        c.decr();
    }

    #[test]
    fn test_buddy_stats_fully_coalesced() {
        let stats = BuddyStats {
            order: 10,
            free_blocks: vec![1, 0, 0, 0, 0],
            free_bytes: 1024,
        };
        assert!(stats.is_fully_coalesced());
        assert_eq!(stats.block_size(2), 256);

        let split = BuddyStats {
            order: 10,
            free_blocks: vec![0, 1, 1, 0, 0],
            free_bytes: 768,
        };
        assert!(!split.is_fully_coalesced());
    }
}
