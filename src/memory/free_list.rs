//! Singly linked list threaded through the free blocks themselves.
//!
//! Ownership contract: while a block is on a list the list owns its first
//! machine word (the link) and the allocator owns the rest of its bytes.
//! Popping or deleting a block ends that ownership; from then on the list
//! never touches it again.

use std::ptr::NonNull;

/// Link overlaid on the first word of a free block.
struct FreeNode {
    next: Option<NonNull<FreeNode>>,
}

/// Smallest block an intrusive list can thread through.
pub(crate) const MIN_NODE_SIZE: usize = size_of::<FreeNode>();

pub(crate) struct FreeList {
    head: Option<NonNull<FreeNode>>,
}

impl FreeList {
    pub(crate) const fn new() -> Self {
        Self { head: None }
    }

    #[inline]
    pub(crate) const fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Push `block` on the front.
    ///
    /// # Safety
    /// `block` must be valid for writes of [`MIN_NODE_SIZE`] bytes, aligned
    /// for a pointer, and not already on any list.
    pub(crate) unsafe fn push(&mut self, block: NonNull<u8>) {
        let node = block.cast::<FreeNode>();
        // Safety: upheld by caller.
        unsafe { node.write(FreeNode { next: self.head }) };
        self.head = Some(node);
    }

    /// Pop the front block.
    ///
    /// # Safety
    /// Every block on the list must still be valid (see [`push`](Self::push)).
    pub(crate) unsafe fn pop(&mut self) -> Option<NonNull<u8>> {
        let node = self.head?;
        // Safety: node is on the list, so its link is initialized.
        self.head = unsafe { node.as_ref().next };
        Some(node.cast())
    }

    /// Unlink `block` wherever it sits. Returns `false` if it is not on the
    /// list.
    ///
    /// # Safety
    /// Every block on the list must still be valid.
    pub(crate) unsafe fn remove(&mut self, block: NonNull<u8>) -> bool {
        let target = block.cast::<FreeNode>();
        let mut link: *mut Option<NonNull<FreeNode>> = &raw mut self.head;

        // Safety: link always points at self.head or at the `next` field of
        // a node that is on the list.
        unsafe {
            while let Some(node) = *link {
                if node == target {
                    *link = node.as_ref().next;
                    return true;
                }
                link = &raw mut (*node.as_ptr()).next;
            }
        }
        false
    }

    /// Number of blocks on the list. Walks the whole chain.
    ///
    /// # Safety
    /// Every block on the list must still be valid.
    pub(crate) unsafe fn len(&self) -> usize {
        let mut count = 0;
        let mut current = self.head;
        while let Some(node) = current {
            count += 1;
            // Safety: node is on the list.
            current = unsafe { node.as_ref().next };
        }
        count
    }
}
