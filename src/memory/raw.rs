use std::ptr::NonNull;

/// Abstract interface for the platform allocation primitive a [`BaseHeap`]
/// draws from.
///
/// [`BaseHeap`]: super::heap::BaseHeap
pub trait RawHeapOps {
    /// Allocate `size` bytes. Returns `None` when the platform is out of memory.
    ///
    /// # Safety
    /// `size` must be non-zero.
    unsafe fn alloc(&self, size: usize) -> Option<NonNull<u8>>;

    /// Return memory obtained from [`alloc`](Self::alloc).
    ///
    /// # Safety
    /// `ptr` must come from `alloc` on the same implementation and must not
    /// have been freed already.
    unsafe fn free(&self, ptr: NonNull<u8>);
}

/// `malloc`/`free` from the C runtime.
#[derive(Debug, Default, Clone, Copy)]
pub struct LibcHeapOps;

impl RawHeapOps for LibcHeapOps {
    unsafe fn alloc(&self, size: usize) -> Option<NonNull<u8>> {
        debug_assert!(size != 0, "LibcHeapOps::alloc called with size 0");
        // Safety: FFI call to malloc.
        let ptr = unsafe { libc::malloc(size) };
        NonNull::new(ptr.cast::<u8>())
    }

    unsafe fn free(&self, ptr: NonNull<u8>) {
        // Safety: FFI call to free; caller guarantees ptr came from malloc.
        unsafe { libc::free(ptr.as_ptr().cast::<libc::c_void>()) };
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_libc_alloc_write_free() {
        // Safety: Test code.
        unsafe {
            let ptr = LibcHeapOps.alloc(64).expect("malloc failed");
            ptr.as_ptr().write_bytes(0xAB, 64);
            assert_eq!(*ptr.as_ptr().add(63), 0xAB);
            LibcHeapOps.free(ptr);
        }
    }

    #[test]
    fn test_fail_after_counts_down() {
        let ops = testing::FailAfter::new(1);
        // Safety: Test code.
        unsafe {
            let first = ops.alloc(16).expect("first alloc should succeed");
            assert!(ops.alloc(16).is_none());
            ops.free(first);
        }
    }
}
