use super::error::{AllocError, Result};
use super::heap::BaseHeap;
use super::raw::{LibcHeapOps, RawHeapOps};
use super::region::Region;
use fixedbitset::FixedBitSet;
use std::ptr::NonNull;

/// Hard cap on blocks per heap: free-chain links are single bytes and
/// `u8::MAX` is reserved as the terminal marker.
pub const BLOCK_HEAP_MAX: usize = u8::MAX as usize;

/// Link value meaning "no further free block".
const BLOCK_SENTINEL: u8 = u8::MAX;

/// Construction parameters for [`BlockHeap`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockHeapConfig {
    /// Size of every block in bytes. Must be a multiple of `alignment`.
    pub block_size: usize,
    /// Alignment of the region, and therefore of every block. Default: 8.
    pub alignment: usize,
    /// Number of blocks, at most [`BLOCK_HEAP_MAX`]. Default: 255.
    pub capacity: usize,
}

impl Default for BlockHeapConfig {
    fn default() -> Self {
        Self {
            block_size: 64,
            alignment: 8,
            capacity: BLOCK_HEAP_MAX,
        }
    }
}

impl BlockHeapConfig {
    #[must_use]
    pub fn new(block_size: usize, capacity: usize) -> Self {
        Self {
            block_size,
            capacity,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_alignment(mut self, alignment: usize) -> Self {
        self.alignment = alignment;
        self
    }

    fn validate(&self) -> Result<usize> {
        if self.capacity == 0 || self.capacity > BLOCK_HEAP_MAX {
            return Err(AllocError::InvalidConfig(
                "block heap capacity must be in 1..=255",
            ));
        }
        if self.block_size == 0 {
            return Err(AllocError::ZeroSize);
        }
        if !self.alignment.is_power_of_two() {
            return Err(AllocError::InvalidAlignment(self.alignment));
        }
        if !self.block_size.is_multiple_of(self.alignment) {
            return Err(AllocError::InvalidConfig(
                "block size must be a multiple of alignment",
            ));
        }
        self.block_size
            .checked_mul(self.capacity)
            .ok_or(AllocError::Overflow)
    }
}

/// A slab of equal-size blocks carved from one aligned heap allocation.
///
/// Free blocks are chained through their first byte: it holds the index of
/// the next free block. Handed-out memory is uninitialized.
pub struct BlockHeap<'h, O: RawHeapOps = LibcHeapOps> {
    heap: &'h BaseHeap<O>,
    region: Region,
    block_size: usize,
    capacity: u8,
    blocks_free: u8,
    free_head: u8,
    /// Tracks which blocks are currently handed out
    live_mask: FixedBitSet,
}

impl<'h, O: RawHeapOps> BlockHeap<'h, O> {
    /// Reserve `block_size * capacity` bytes from `heap` and thread every
    /// block onto the free chain.
    ///
    /// # Errors
    ///
    /// Returns an error for an invalid configuration, or if the heap cannot
    /// supply the region. Nothing stays allocated on failure.
    pub fn new(heap: &'h BaseHeap<O>, config: &BlockHeapConfig) -> Result<Self> {
        let len = config.validate()?;
        let data = heap.aligned_alloc(len, config.alignment)?;
        let region = Region::new(data, len);

        // Block i links to i - 1 and block 0 terminates, so the chain walks
        // the whole slab starting from the last block.
        for index in 0..config.capacity {
            let link = index.checked_sub(1).map_or(BLOCK_SENTINEL, |prev| prev as u8);
            // Safety: index < capacity, so the block start is inside the region.
            unsafe { data.add(index * config.block_size).write(link) };
        }

        let capacity = config.capacity as u8;
        if heap.is_debug() {
            tracing::debug!(
                addr = ?data,
                block_size = config.block_size,
                capacity,
                "block_heap_init"
            );
        }

        Ok(Self {
            heap,
            region,
            block_size: config.block_size,
            capacity,
            blocks_free: capacity,
            free_head: capacity - 1,
            live_mask: FixedBitSet::with_capacity(config.capacity),
        })
    }

    /// Take the block at the head of the free chain.
    ///
    /// # Errors
    ///
    /// Returns `Exhausted` when every block is in use.
    pub fn alloc(&mut self) -> Result<NonNull<u8>> {
        if self.blocks_free == 0 {
            return Err(AllocError::Exhausted);
        }

        let index = usize::from(self.free_head);
        let ptr = self
            .region
            .at(index * self.block_size)
            .ok_or(AllocError::Corrupted("free head outside block heap"))?;

        // Safety: the block is free, so its first byte is the chain link.
        self.free_head = unsafe { ptr.read() };
        self.blocks_free -= 1;
        self.live_mask.insert(index);

        Ok(ptr)
    }

    /// Return a block to the free chain. Null is a no-op.
    ///
    /// Pointers outside the slab, off a block boundary, or already free are
    /// rejected without touching any state.
    ///
    /// # Errors
    ///
    /// `InvalidPointer` or `DoubleFree`.
    pub fn free(&mut self, ptr: *mut u8) -> Result<()> {
        if ptr.is_null() {
            return Ok(());
        }

        let index = self.block_index(ptr).ok_or(AllocError::InvalidPointer)?;
        if !self.live_mask.contains(index) {
            return Err(AllocError::DoubleFree);
        }
        let Some(block) = self.region.at(index * self.block_size) else {
            return Err(AllocError::InvalidPointer);
        };

        // Safety: block is inside the region and the caller has given it back.
        unsafe { block.write(self.free_head) };
        // index < capacity <= 255
        self.free_head = index as u8;
        self.blocks_free += 1;
        self.live_mask.set(index, false);

        Ok(())
    }

    /// Index of the block starting exactly at `ptr`.
    fn block_index(&self, ptr: *const u8) -> Option<usize> {
        let offset = self.region.offset_of(ptr)?;
        offset
            .is_multiple_of(self.block_size)
            .then(|| offset / self.block_size)
    }

    /// True if `ptr` is inside this slab (block boundary or not).
    #[must_use]
    pub fn contains(&self, ptr: *const u8) -> bool {
        self.region.contains(ptr)
    }

    #[must_use]
    pub fn blocks_free(&self) -> usize {
        usize::from(self.blocks_free)
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        usize::from(self.capacity)
    }

    #[must_use]
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Return the slab to the heap. Equivalent to dropping it.
    pub fn term(self) {}
}

impl<O: RawHeapOps> Drop for BlockHeap<'_, O> {
    fn drop(&mut self) {
        // Safety: the region came from aligned_alloc on this heap.
        unsafe { self.heap.aligned_free(self.region.base().as_ptr()) };
    }
}
