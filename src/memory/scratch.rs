use super::bits::align_up;
use super::error::{AllocError, Result};
use super::heap::BaseHeap;
use super::raw::{LibcHeapOps, RawHeapOps};
use super::region::Region;
use std::ptr::NonNull;

/// A bump allocator over one pre-sized region. Individual allocations are
/// never freed; [`reset`](Self::reset) reclaims everything at once.
pub struct ScratchHeap<'h, O: RawHeapOps = LibcHeapOps> {
    heap: &'h BaseHeap<O>,
    region: Region,
    /// Offset of the next free byte. Only moves forward between resets.
    head: usize,
}

impl<'h, O: RawHeapOps> ScratchHeap<'h, O> {
    /// Reserve `nbytes` from `heap`, aligned to `alignment`.
    ///
    /// # Errors
    ///
    /// `ZeroSize`, `InvalidAlignment`, or whatever the heap reports.
    pub fn new(heap: &'h BaseHeap<O>, nbytes: usize, alignment: usize) -> Result<Self> {
        if nbytes == 0 {
            return Err(AllocError::ZeroSize);
        }
        let mem = heap.aligned_alloc(nbytes, alignment)?;
        if heap.is_debug() {
            tracing::debug!(addr = ?mem, nbytes, alignment, "scratch_heap_init");
        }

        Ok(Self {
            heap,
            region: Region::new(mem, nbytes),
            head: 0,
        })
    }

    /// Bump-allocate `nbytes` at the next `alignment` boundary.
    ///
    /// # Errors
    ///
    /// `InvalidAlignment` if `alignment` is not a power of two, `Exhausted`
    /// if the request does not fit before the end of the region.
    pub fn alloc(&mut self, nbytes: usize, alignment: usize) -> Result<NonNull<u8>> {
        if !alignment.is_power_of_two() {
            return Err(AllocError::InvalidAlignment(alignment));
        }

        let base = self.region.base().as_ptr().addr();
        let current = base.checked_add(self.head).ok_or(AllocError::Overflow)?;
        if current.checked_add(alignment - 1).is_none() {
            return Err(AllocError::Overflow);
        }
        let start = align_up(current, alignment) - base;
        let end = start.checked_add(nbytes).ok_or(AllocError::Overflow)?;

        if end > self.region.len() {
            if self.heap.is_debug() {
                tracing::debug!(
                    nbytes,
                    alignment,
                    remaining = self.remaining(),
                    "scratch: no allocation"
                );
            }
            return Err(AllocError::Exhausted);
        }

        let ptr = self
            .region
            .at_or_end(start)
            .ok_or(AllocError::Corrupted("scratch head outside region"))?;
        self.head = end;
        Ok(ptr)
    }

    /// Rewind to the start of the region.
    ///
    /// Every pointer handed out before the reset is invalidated; the caller
    /// must not use them afterwards.
    pub fn reset(&mut self) {
        self.head = 0;
    }

    /// Bytes consumed since the last reset, padding included.
    #[must_use]
    pub fn used(&self) -> usize {
        self.head
    }

    #[must_use]
    pub fn remaining(&self) -> usize {
        self.region.len() - self.head
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.region.len()
    }

    /// Return the region to the heap. Equivalent to dropping it.
    pub fn term(self) {}
}

/// Helpers for allocating typed values.
impl<O: RawHeapOps> ScratchHeap<'_, O> {
    /// Allocates a value of type `T` in the scratch region.
    ///
    /// `T` must be `Copy`: [`reset`](Self::reset) never runs destructors.
    ///
    /// # Errors
    ///
    /// Same as [`alloc`](Self::alloc).
    pub fn alloc_val<T: Copy>(&mut self, val: T) -> Result<&mut T> {
        let ptr = self.alloc(size_of::<T>(), align_of::<T>())?.cast::<T>();
        // Safety: ptr is valid and aligned for T, and exclusively ours until
        // the next reset, which needs &mut self.
        unsafe {
            ptr.as_ptr().write(val);
            Ok(&mut *ptr.as_ptr())
        }
    }

    /// Copy a slice into the scratch region.
    ///
    /// # Errors
    ///
    /// `Overflow` if the byte length overflows, otherwise as
    /// [`alloc`](Self::alloc).
    pub fn alloc_slice<T: Copy>(&mut self, val: &[T]) -> Result<&mut [T]> {
        let nbytes = size_of::<T>()
            .checked_mul(val.len())
            .ok_or(AllocError::Overflow)?;
        let ptr = self.alloc(nbytes, align_of::<T>())?.cast::<T>();
        // Safety: ptr is valid for val.len() elements and does not overlap val.
        unsafe {
            std::ptr::copy_nonoverlapping(val.as_ptr(), ptr.as_ptr(), val.len());
            Ok(std::slice::from_raw_parts_mut(ptr.as_ptr(), val.len()))
        }
    }
}

impl<O: RawHeapOps> Drop for ScratchHeap<'_, O> {
    fn drop(&mut self) {
        // Safety: the region came from aligned_alloc on this heap.
        unsafe { self.heap.aligned_free(self.region.base().as_ptr()) };
    }
}
