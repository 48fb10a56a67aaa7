//! Binary buddy allocator over a single `2^order` byte region.
//!
//! Free space is segregated by level: level 0 holds the whole region, and
//! every level below halves the block size, down to `2^min_order` bytes.
//! Each level keeps an intrusive free list.
//!
//! Buddy state lives in one bitset with a bit per sibling pair. The bit is
//! the XOR of the two siblings' "on a free list" states, so:
//!
//! | operation | bit before | effect                                        |
//! |-----------|------------|-----------------------------------------------|
//! | split     | any        | parent leaves its list, bit toggled           |
//! | alloc     | any        | block leaves its list, bit toggled            |
//! | free      | 0          | buddy is in use: push block, toggle bit       |
//! | free      | 1          | buddy is free: unlink it, clear bit, merge up |
//!
//! The bit for a block is found from its level-order index in the implicit
//! tree (root = 0): siblings `2j + 1` and `2j + 2` both map to bit `j + 1`,
//! and the root owns bit 0.
//!
//! Every pointer handed out is preceded by a [`BlockPrefix`] recording the
//! block's level and offset, because the requested alignment may push the
//! pointer away from the block's start.

use super::bits::{align_up, pow2_roundup, trailing_zeros};
use super::error::{AllocError, Result};
use super::free_list::{FreeList, MIN_NODE_SIZE};
use super::heap::BaseHeap;
use super::raw::{LibcHeapOps, RawHeapOps};
use super::region::Region;
use super::stats::BuddyStats;
use std::ptr::NonNull;

/// Largest supported region order (256 MiB).
pub const BUDDY_MAX_ORDER: u8 = 28;
/// Default smallest block order (64 bytes).
pub const BUDDY_DEFAULT_MIN_ORDER: u8 = 6;
/// Smallest block order accepted in a config (16 bytes).
const BUDDY_MIN_ORDER_FLOOR: u8 = 4;
/// Alignment of the pair bitset allocation.
pub const META_ALIGNMENT: usize = 32;

const MAX_LEVELS: usize = (BUDDY_MAX_ORDER - BUDDY_MIN_ORDER_FLOOR) as usize + 1;
const _: () = assert!(1 << BUDDY_MIN_ORDER_FLOOR >= MIN_NODE_SIZE);

/// Header written immediately before every pointer returned by
/// [`BuddyHeap::alloc`].
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct BlockPrefix {
    level: u8,
    /// Start of the block relative to the data region.
    offset: usize,
}

const PREFIX_SIZE: usize = size_of::<BlockPrefix>();

/// Construction parameters for [`BuddyHeap`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BuddyConfig {
    /// Region order: the heap manages `2^order` bytes. Default: 20 (1 MiB).
    pub order: u8,
    /// Smallest block order. Default: [`BUDDY_DEFAULT_MIN_ORDER`].
    pub min_order: u8,
    /// Alignment of every returned pointer. Default: 8.
    pub alignment: usize,
}

impl Default for BuddyConfig {
    fn default() -> Self {
        Self {
            order: 20,
            min_order: BUDDY_DEFAULT_MIN_ORDER,
            alignment: 8,
        }
    }
}

impl BuddyConfig {
    #[must_use]
    pub fn new(order: u8) -> Self {
        Self {
            order,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_alignment(mut self, alignment: usize) -> Self {
        self.alignment = alignment;
        self
    }

    #[must_use]
    pub fn with_min_order(mut self, min_order: u8) -> Self {
        self.min_order = min_order;
        self
    }

    fn validate(&self) -> Result<()> {
        if !(self.order > self.min_order && self.order <= BUDDY_MAX_ORDER) {
            return Err(AllocError::InvalidOrder {
                order: self.order,
                min: self.min_order,
                max: BUDDY_MAX_ORDER,
            });
        }
        if self.min_order < BUDDY_MIN_ORDER_FLOOR {
            return Err(AllocError::InvalidConfig(
                "minimum block order too small to hold a free-list link",
            ));
        }
        if !self.alignment.is_power_of_two() {
            return Err(AllocError::InvalidAlignment(self.alignment));
        }
        Ok(())
    }
}

/// One bit per buddy pair, stored in heap memory.
struct PairBits {
    bytes: Region,
    nbits: usize,
}

impl PairBits {
    fn byte(&self, bit: usize) -> NonNull<u8> {
        assert!(bit < self.nbits, "buddy bit {bit} out of range ({})", self.nbits);
        match self.bytes.at(bit / 8) {
            Some(byte) => byte,
            None => unreachable!("bitset shorter than its bit count"),
        }
    }

    fn test(&self, bit: usize) -> bool {
        // Safety: byte() is bounds-checked against the bitset region.
        unsafe { self.byte(bit).read() & (1 << (bit % 8)) != 0 }
    }

    fn toggle(&mut self, bit: usize) {
        let byte = self.byte(bit);
        // Safety: as above, and &mut self gives exclusive access.
        unsafe { byte.write(byte.read() ^ (1 << (bit % 8))) };
    }
}

/// Power-of-two buddy allocator carved from one heap allocation.
pub struct BuddyHeap<'h, O: RawHeapOps = LibcHeapOps> {
    heap: &'h BaseHeap<O>,
    order: u8,
    min_order: u8,
    alignment: usize,
    free_lists: [FreeList; MAX_LEVELS],
    bits: PairBits,
    data: Region,
}

impl<'h, O: RawHeapOps> BuddyHeap<'h, O> {
    /// Reserve the pair bitset and a `2^order` byte data region from `heap`,
    /// and seed level 0 with the whole region.
    ///
    /// # Errors
    ///
    /// `InvalidOrder`, `InvalidConfig` or `InvalidAlignment` for a bad
    /// config; heap errors if either reservation fails. If the data region
    /// cannot be reserved the bitset is released before returning.
    pub fn new(heap: &'h BaseHeap<O>, config: &BuddyConfig) -> Result<Self> {
        config.validate()?;

        let nbits = 1usize << (config.order - config.min_order);
        let meta_len = nbits.div_ceil(8);
        let meta = heap.aligned_alloc(meta_len, META_ALIGNMENT)?;
        // Safety: meta is valid for meta_len bytes.
        unsafe { meta.as_ptr().write_bytes(0, meta_len) };

        let data_len = 1usize << config.order;
        let data = match heap.aligned_alloc(data_len, config.alignment.max(align_of::<usize>())) {
            Ok(data) => data,
            Err(e) => {
                // Safety: meta came from aligned_alloc on this heap.
                unsafe { heap.aligned_free(meta.as_ptr()) };
                return Err(e);
            }
        };

        let mut buddy = Self {
            heap,
            order: config.order,
            min_order: config.min_order,
            alignment: config.alignment,
            free_lists: [const { FreeList::new() }; MAX_LEVELS],
            bits: PairBits {
                bytes: Region::new(meta, meta_len),
                nbits,
            },
            data: Region::new(data, data_len),
        };
        // Safety: data spans the whole region and is pointer-aligned.
        unsafe { buddy.free_lists[0].push(data) };

        if heap.is_debug() {
            tracing::debug!(
                addr = ?data,
                order = config.order,
                min_order = config.min_order,
                meta_len,
                "buddy_heap_init"
            );
        }

        Ok(buddy)
    }

    /// Allocate at least `nbytes`, aligned to the configured alignment.
    ///
    /// # Errors
    ///
    /// `ZeroSize` for `nbytes == 0`; `OutOfMemory` when the request exceeds
    /// the region or no block large enough is free.
    pub fn alloc(&mut self, nbytes: usize) -> Result<NonNull<u8>> {
        let level = self.level_for(nbytes)?;

        if self.free_lists[level].is_empty() {
            let Some(from) = (0..level).rev().find(|&l| !self.free_lists[l].is_empty()) else {
                if self.heap.is_debug() {
                    tracing::debug!(nbytes, level, "buddy: no splittable block");
                }
                return Err(AllocError::OutOfMemory);
            };
            for l in from..level {
                self.split(l)?;
            }
        }

        // Safety: every block on the list lies in the data region.
        let block = unsafe { self.free_lists[level].pop() }
            .ok_or(AllocError::Corrupted("free list empty after split"))?;
        let offset = self.offset_of(block)?;
        self.bits.toggle(self.bit_position(level, offset));

        let start = block.as_ptr().addr();
        let user_offset = offset + (align_up(start + PREFIX_SIZE, self.alignment) - start);
        let user = self
            .data
            .at(user_offset)
            .ok_or(AllocError::Corrupted("aligned pointer outside data region"))?;

        let prefix = BlockPrefix {
            // level < MAX_LEVELS
            level: level as u8,
            offset,
        };
        // Safety: user - PREFIX_SIZE >= block, still inside the block. The
        // prefix is not necessarily aligned for usize.
        unsafe {
            user.as_ptr()
                .sub(PREFIX_SIZE)
                .cast::<BlockPrefix>()
                .write_unaligned(prefix);
        }

        Ok(user)
    }

    /// Return an allocation, coalescing with free buddies as far up the tree
    /// as they allow. Null is a no-op.
    ///
    /// # Safety
    ///
    /// The header in front of `ptr` is trusted without validation. `ptr`
    /// must be null or a pointer returned by [`alloc`](Self::alloc) on this
    /// heap that has not been freed since. Passing a foreign pointer or
    /// freeing twice corrupts the heap and is undefined behaviour.
    ///
    /// # Errors
    ///
    /// `InvalidPointer` if the header is obviously out of range, and
    /// `Corrupted` if the bitset says a buddy is free but it is missing from
    /// its list. In the latter case the block is still returned to a list.
    pub unsafe fn free(&mut self, ptr: *mut u8) -> Result<()> {
        let Some(ptr) = NonNull::new(ptr) else {
            return Ok(());
        };

        // Safety: caller guarantees ptr came from alloc, which wrote the
        // prefix just below it.
        let prefix = unsafe {
            ptr.as_ptr()
                .sub(PREFIX_SIZE)
                .cast::<BlockPrefix>()
                .read_unaligned()
        };
        let mut level = usize::from(prefix.level);
        let mut offset = prefix.offset;
        if level > self.levels() || offset >= self.data.len() {
            return Err(AllocError::InvalidPointer);
        }

        let mut result = Ok(());
        while level > 0 {
            let bit = self.bit_position(level, offset);
            if !self.bits.test(bit) {
                break;
            }

            let buddy_offset = offset ^ self.block_size(level);
            let Some(buddy) = self.data.at(buddy_offset) else {
                result = Err(AllocError::Corrupted("buddy outside data region"));
                break;
            };
            // Safety: every block on the list lies in the data region.
            if !unsafe { self.free_lists[level].remove(buddy) } {
                tracing::error!(level, buddy_offset, "buddy marked free but missing from free list");
                result = Err(AllocError::Corrupted("free buddy missing from free list"));
                break;
            }
            self.bits.toggle(bit);

            if self.heap.is_debug() {
                tracing::trace!(level, offset, buddy_offset, "buddy coalesce");
            }
            offset = offset.min(buddy_offset);
            level -= 1;
        }

        if level == 0 && self.heap.is_debug() {
            tracing::debug!("buddy_heap: all memory blocks coalesced");
        }

        self.bits.toggle(self.bit_position(level, offset));
        let block = self.block_at(offset)?;
        // Safety: block is a free, pointer-aligned block of this level.
        unsafe { self.free_lists[level].push(block) };

        result
    }

    /// Split the head block of `level` into two buddies on `level + 1`.
    fn split(&mut self, level: usize) -> Result<()> {
        // Safety: every block on the list lies in the data region.
        let block = unsafe { self.free_lists[level].pop() }
            .ok_or(AllocError::Corrupted("split from empty level"))?;
        let offset = self.offset_of(block)?;
        self.bits.toggle(self.bit_position(level, offset));

        let upper = self.block_at(offset + self.block_size(level + 1))?;
        // Safety: both halves are inside the popped block and off every list.
        unsafe {
            self.free_lists[level + 1].push(upper);
            self.free_lists[level + 1].push(block);
        }

        if self.heap.is_debug() {
            tracing::trace!(level, offset, "buddy split");
        }
        Ok(())
    }

    /// Level whose blocks fit `nbytes` plus the prefix and alignment slack.
    fn level_for(&self, nbytes: usize) -> Result<usize> {
        if nbytes == 0 {
            return Err(AllocError::ZeroSize);
        }
        let total = nbytes
            .checked_add(self.alignment - 1 + PREFIX_SIZE)
            .ok_or(AllocError::OutOfMemory)?;
        if total > self.capacity() {
            return Err(AllocError::OutOfMemory);
        }

        // total <= 2^BUDDY_MAX_ORDER, so it fits in u32 and rounds without
        // wrapping.
        let total = u32::try_from(total).map_err(|_| AllocError::Overflow)?;
        let block_order = trailing_zeros(pow2_roundup(total)).max(u32::from(self.min_order));
        Ok((u32::from(self.order) - block_order) as usize)
    }

    /// Shared bit index of the pair containing the block at `offset` on
    /// `level`.
    fn bit_position(&self, level: usize, offset: usize) -> usize {
        let tree_index = (offset >> (usize::from(self.order) - level)) + (1 << level) - 1;
        tree_index / 2 + tree_index % 2
    }

    fn offset_of(&self, block: NonNull<u8>) -> Result<usize> {
        self.data
            .offset_of(block.as_ptr())
            .ok_or(AllocError::Corrupted("free block outside data region"))
    }

    fn block_at(&self, offset: usize) -> Result<NonNull<u8>> {
        self.data
            .at(offset)
            .ok_or(AllocError::Corrupted("block offset outside data region"))
    }

    #[inline]
    fn block_size(&self, level: usize) -> usize {
        1 << (usize::from(self.order) - level)
    }

    /// Deepest level index (smallest blocks).
    #[inline]
    fn levels(&self) -> usize {
        usize::from(self.order - self.min_order)
    }

    #[must_use]
    pub fn order(&self) -> u8 {
        self.order
    }

    #[must_use]
    pub fn min_order(&self) -> u8 {
        self.min_order
    }

    #[must_use]
    pub fn alignment(&self) -> usize {
        self.alignment
    }

    /// Size of the managed region in bytes.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// True if `ptr` points into the data region.
    #[must_use]
    pub fn contains(&self, ptr: *const u8) -> bool {
        self.data.contains(ptr)
    }

    /// Walk every free list and report per-level counts.
    #[must_use]
    pub fn stats(&self) -> BuddyStats {
        let free_blocks: Vec<usize> = self.free_lists[..=self.levels()]
            .iter()
            // Safety: every block on the list lies in the data region.
            .map(|list| unsafe { list.len() })
            .collect();
        let free_bytes = free_blocks
            .iter()
            .enumerate()
            .map(|(level, &n)| n * self.block_size(level))
            .sum();
        BuddyStats {
            order: self.order,
            free_blocks,
            free_bytes,
        }
    }

    /// Return the data region and bitset to the heap. Equivalent to dropping.
    pub fn term(self) {}
}

impl<O: RawHeapOps> Drop for BuddyHeap<'_, O> {
    fn drop(&mut self) {
        // Safety: both regions came from aligned_alloc on this heap.
        unsafe {
            self.heap.aligned_free(self.data.base().as_ptr());
            self.heap.aligned_free(self.bits.bytes.base().as_ptr());
        }
    }
}
