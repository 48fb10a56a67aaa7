use super::error::{AllocError, Result};
use super::raw::{LibcHeapOps, RawHeapOps};
use super::stats::Counter;
use bitflags::bitflags;
use std::ptr::NonNull;

bitflags! {
    /// Behaviour switches for a [`BaseHeap`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct HeapFlags: u32 {
        /// Track outstanding allocations.
        const COUNT = 1 << 0;
        /// Zero-fill every allocation.
        const CLEAR = 1 << 1;
        /// Emit `tracing` events for every allocation and free.
        const DEBUG = 1 << 2;
    }
}

/// Width of the slot that records the raw base of an aligned allocation.
const BASE_SLOT: usize = size_of::<usize>();

/// The backing heap every allocator reserves its region from.
///
/// Single-threaded: the counter lives in a `Cell`, so the heap is `!Sync`.
/// Allocators borrow it for their whole lifetime.
pub struct BaseHeap<O: RawHeapOps = LibcHeapOps> {
    flags: HeapFlags,
    alloc_count: Counter,
    ops: O,
}

impl BaseHeap<LibcHeapOps> {
    #[must_use]
    pub fn new(flags: HeapFlags) -> Self {
        Self::with_ops(flags, LibcHeapOps)
    }
}

impl Default for BaseHeap<LibcHeapOps> {
    fn default() -> Self {
        Self::new(HeapFlags::COUNT)
    }
}

impl<O: RawHeapOps> BaseHeap<O> {
    pub fn with_ops(flags: HeapFlags, ops: O) -> Self {
        Self {
            flags,
            alloc_count: Counter::new(),
            ops,
        }
    }

    #[must_use]
    pub fn flags(&self) -> HeapFlags {
        self.flags
    }

    #[inline]
    pub(crate) fn is_debug(&self) -> bool {
        self.flags.contains(HeapFlags::DEBUG)
    }

    /// Allocations handed out and not yet freed. Always 0 without
    /// [`HeapFlags::COUNT`].
    #[must_use]
    pub fn alloc_count(&self) -> usize {
        self.alloc_count.get()
    }

    /// Allocate `nbytes` from the platform primitive.
    ///
    /// # Errors
    ///
    /// `ZeroSize` when `nbytes == 0`, `OutOfMemory` when the primitive fails.
    pub fn alloc(&self, nbytes: usize) -> Result<NonNull<u8>> {
        if nbytes == 0 {
            return Err(AllocError::ZeroSize);
        }

        // Safety: nbytes is non-zero.
        let Some(ptr) = (unsafe { self.ops.alloc(nbytes) }) else {
            if self.is_debug() {
                tracing::debug!(nbytes, "heap: could not allocate requested size");
            }
            return Err(AllocError::OutOfMemory);
        };

        if self.flags.contains(HeapFlags::COUNT) {
            self.alloc_count.incr();
        }
        if self.flags.contains(HeapFlags::CLEAR) {
            // Safety: ptr is valid for nbytes writes.
            unsafe { ptr.as_ptr().write_bytes(0, nbytes) };
        }
        if self.is_debug() {
            tracing::debug!(addr = ?ptr, nbytes, "heap_alloc");
        }

        Ok(ptr)
    }

    /// Allocate `nbytes` whose start is a multiple of `alignment`.
    ///
    /// Over-allocates by `alignment - 1` plus one pointer-width slot, and
    /// records the raw base in that slot, just below the returned address.
    /// Release with [`aligned_free`](Self::aligned_free), never
    /// [`free`](Self::free).
    ///
    /// # Errors
    ///
    /// `InvalidAlignment`, `ZeroSize`, `Overflow`, or `OutOfMemory`.
    pub fn aligned_alloc(&self, nbytes: usize, alignment: usize) -> Result<NonNull<u8>> {
        if !alignment.is_power_of_two() {
            if self.is_debug() {
                tracing::debug!(alignment, "heap_aligned: alignment not a power of 2");
            }
            return Err(AllocError::InvalidAlignment(alignment));
        }
        if nbytes == 0 {
            return Err(AllocError::ZeroSize);
        }

        let offset = alignment - 1 + BASE_SLOT;
        let total = nbytes.checked_add(offset).ok_or(AllocError::Overflow)?;
        let raw = self.alloc(total)?;

        let raw_addr = raw.as_ptr().addr();
        let aligned_addr = (raw_addr + offset) & !(alignment - 1);
        let aligned = raw.as_ptr().wrapping_add(aligned_addr - raw_addr);

        // Safety: aligned - BASE_SLOT >= raw, and aligned + nbytes <= raw + total.
        // The slot may not be usize-aligned when alignment < BASE_SLOT.
        unsafe {
            aligned
                .sub(BASE_SLOT)
                .cast::<*mut u8>()
                .write_unaligned(raw.as_ptr());
        }
        if self.is_debug() {
            tracing::debug!(addr = ?aligned, alignment, "heap_aligned_alloc");
        }

        // Safety: derived from a non-null allocation by a forward offset.
        Ok(unsafe { NonNull::new_unchecked(aligned) })
    }

    /// Return memory obtained from [`alloc`](Self::alloc). Null is a no-op.
    ///
    /// # Safety
    /// `ptr` must be null or come from `alloc` on this heap, and must not
    /// have been freed already.
    ///
    /// # Panics
    ///
    /// Panics if counting is enabled and the counter would underflow.
    pub unsafe fn free(&self, ptr: *mut u8) {
        let Some(ptr) = NonNull::new(ptr) else {
            return;
        };

        if self.flags.contains(HeapFlags::COUNT) {
            self.alloc_count.decr();
        }
        if self.is_debug() {
            tracing::debug!(addr = ?ptr, "heap_free");
        }

        // Safety: upheld by caller.
        unsafe { self.ops.free(ptr) };
    }

    /// Return memory obtained from [`aligned_alloc`](Self::aligned_alloc).
    /// Null is a no-op.
    ///
    /// # Safety
    /// `ptr` must be null or come from `aligned_alloc` on this heap, and must
    /// not have been freed already.
    pub unsafe fn aligned_free(&self, ptr: *mut u8) {
        if ptr.is_null() {
            return;
        }
        // Safety: aligned_alloc stored the raw base in the slot below ptr.
        let raw = unsafe { ptr.sub(BASE_SLOT).cast::<*mut u8>().read_unaligned() };
        // Safety: raw came from alloc on this heap.
        unsafe { self.free(raw) };
    }

    /// Diagnostic teardown check. Frees nothing.
    ///
    /// Returns `true` when every counted allocation has been freed.
    pub fn term(&self) -> bool {
        let outstanding = self.alloc_count.get();
        if self.flags.contains(HeapFlags::COUNT | HeapFlags::DEBUG) {
            if outstanding == 0 {
                tracing::debug!("heap: all allocs freed");
            } else {
                tracing::debug!(outstanding, "heap: allocs not freed");
            }
        }
        outstanding == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::raw::testing::FailAfter;

    #[test]
    fn test_alloc_zero_size_fails() {
        let heap = BaseHeap::new(HeapFlags::COUNT);
        assert_eq!(heap.alloc(0), Err(AllocError::ZeroSize));
        assert_eq!(heap.alloc_count(), 0);
    }

    #[test]
    fn test_alloc_free_counts() {
        let heap = BaseHeap::new(HeapFlags::COUNT);
        let a = heap.alloc(16).unwrap();
        let b = heap.alloc(32).unwrap();
        assert_eq!(heap.alloc_count(), 2);
        assert!(!heap.term());

        // Safety: Test code.
        unsafe {
            heap.free(a.as_ptr());
            heap.free(b.as_ptr());
        }
        assert_eq!(heap.alloc_count(), 0);
        assert!(heap.term());
    }

    #[test]
    fn test_count_disabled_stays_zero() {
        let heap = BaseHeap::new(HeapFlags::empty());
        let a = heap.alloc(8).unwrap();
        assert_eq!(heap.alloc_count(), 0);
        // Safety: Test code.
        unsafe { heap.free(a.as_ptr()) };
        assert_eq!(heap.alloc_count(), 0);
    }

    #[test]
    fn test_free_null_is_noop() {
        let heap = BaseHeap::new(HeapFlags::COUNT);
        // Safety: null is always accepted.
        unsafe {
            heap.free(std::ptr::null_mut());
            heap.aligned_free(std::ptr::null_mut());
        }
        assert_eq!(heap.alloc_count(), 0);
    }

    #[test]
    #[should_panic(expected = "underflow")]
    fn test_free_more_than_allocated_panics() {
        // Count is enabled on this heap only; the raw pointer comes from a
        // heap that did not count it.
        let uncounted = BaseHeap::new(HeapFlags::empty());
        let counted = BaseHeap::new(HeapFlags::COUNT);
        let p = uncounted.alloc(8).unwrap();
        // Safety: both heaps share the same libc primitive.
        unsafe { counted.free(p.as_ptr()) };
    }

    #[test]
    fn test_clear_zero_fills() {
        let heap = BaseHeap::new(HeapFlags::CLEAR | HeapFlags::COUNT);
        let p = heap.alloc(256).unwrap();
        // Safety: Test code.
        unsafe {
            let bytes = std::slice::from_raw_parts(p.as_ptr(), 256);
            assert!(bytes.iter().all(|&b| b == 0));
            heap.free(p.as_ptr());
        }
    }

    #[test]
    fn test_aligned_alloc_alignment() {
        let heap = BaseHeap::new(HeapFlags::COUNT);
        for alignment in [1usize, 2, 8, 16, 64, 4096] {
            let p = heap.aligned_alloc(100, alignment).unwrap();
            assert_eq!(p.as_ptr().addr() % alignment, 0);
            // Safety: Test code.
            unsafe {
                p.as_ptr().write_bytes(0x5A, 100);
                heap.aligned_free(p.as_ptr());
            }
        }
        assert_eq!(heap.alloc_count(), 0);
    }

    #[test]
    fn test_aligned_alloc_rejects_bad_alignment() {
        let heap = BaseHeap::new(HeapFlags::COUNT);
        assert_eq!(heap.aligned_alloc(64, 0), Err(AllocError::InvalidAlignment(0)));
        assert_eq!(heap.aligned_alloc(64, 24), Err(AllocError::InvalidAlignment(24)));
        assert_eq!(heap.alloc_count(), 0);
    }

    #[test]
    fn test_aligned_alloc_overflow() {
        let heap = BaseHeap::new(HeapFlags::COUNT);
        assert_eq!(heap.aligned_alloc(usize::MAX, 16), Err(AllocError::Overflow));
    }

    #[test]
    fn test_primitive_failure_is_out_of_memory() {
        let heap = BaseHeap::with_ops(HeapFlags::COUNT | HeapFlags::DEBUG, FailAfter::new(0));
        assert_eq!(heap.alloc(16), Err(AllocError::OutOfMemory));
        assert_eq!(heap.aligned_alloc(16, 8), Err(AllocError::OutOfMemory));
        assert_eq!(heap.alloc_count(), 0);
    }
}
