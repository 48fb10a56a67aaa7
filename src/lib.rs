//! Manual memory allocators layered over one counted backing heap.
//!
//! A [`BaseHeap`] wraps the platform primitive and tracks outstanding
//! allocations. Each allocator reserves a single region from it at
//! construction and manages that region itself:
//!
//! - [`BlockHeap`]: up to 255 equal-size blocks, O(1) alloc and free.
//! - [`ScratchHeap`]: bump allocation with bulk [`reset`](ScratchHeap::reset).
//! - [`BuddyHeap`]: power-of-two blocks with split and coalesce.
//!
//! Everything is single-threaded.

pub mod memory;

// heap
pub use memory::heap::{BaseHeap, HeapFlags};
pub use memory::raw::{LibcHeapOps, RawHeapOps};

// allocators
pub use memory::block::{BLOCK_HEAP_MAX, BlockHeap, BlockHeapConfig};
pub use memory::buddy::{
    BUDDY_DEFAULT_MIN_ORDER, BUDDY_MAX_ORDER, BuddyConfig, BuddyHeap, META_ALIGNMENT,
};
pub use memory::scratch::ScratchHeap;

// stats
pub use memory::stats::BuddyStats;

// errors
pub use memory::error::{AllocError, Result};

// bit helpers
pub use memory::bits::{pow2_roundup, trailing_zeros};
