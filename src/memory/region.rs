use std::ptr::NonNull;

/// A contiguous byte range owned by one allocator.
///
/// All allocator address math is expressed as offsets into a `Region`, and
/// every conversion back to a pointer is bounds-checked.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Region {
    base: NonNull<u8>,
    len: usize,
}

impl Region {
    pub(crate) const fn new(base: NonNull<u8>, len: usize) -> Self {
        Self { base, len }
    }

    #[inline]
    pub(crate) const fn base(&self) -> NonNull<u8> {
        self.base
    }

    #[inline]
    pub(crate) const fn len(&self) -> usize {
        self.len
    }

    /// Offset of `ptr` from the base, or `None` if it lies outside.
    #[inline]
    pub(crate) fn offset_of(&self, ptr: *const u8) -> Option<usize> {
        let offset = ptr.addr().checked_sub(self.base.as_ptr().addr())?;
        (offset < self.len).then_some(offset)
    }

    /// Pointer `offset` bytes into the region, or `None` past the end.
    #[inline]
    pub(crate) fn at(&self, offset: usize) -> Option<NonNull<u8>> {
        if offset >= self.len {
            return None;
        }
        // Safety: offset < len, so the result stays inside the allocation.
        Some(unsafe { self.base.add(offset) })
    }

    /// Pointer `offset` bytes in, where `offset == len` is allowed.
    #[inline]
    pub(crate) fn at_or_end(&self, offset: usize) -> Option<NonNull<u8>> {
        if offset > self.len {
            return None;
        }
        // Safety: offset <= len, one-past-the-end is a valid address.
        Some(unsafe { self.base.add(offset) })
    }

    #[inline]
    pub(crate) fn contains(&self, ptr: *const u8) -> bool {
        self.offset_of(ptr).is_some()
    }
}
