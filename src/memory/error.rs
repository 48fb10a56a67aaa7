use thiserror::Error;

/// Errors reported by the backing heap and the allocators layered over it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AllocError {
    /// A zero-byte allocation or a zero-size backing region was requested.
    #[error("zero-size request")]
    ZeroSize,
    /// Alignment is not a power of two.
    #[error("alignment {0} is not a power of two")]
    InvalidAlignment(usize),
    /// Buddy order outside the supported range.
    #[error("order {order} outside supported range ({min}, {max}]")]
    InvalidOrder { order: u8, min: u8, max: u8 },
    /// Any other rejected construction parameter.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
    /// Size arithmetic overflowed.
    #[error("size computation overflowed")]
    Overflow,
    /// The backing primitive failed, or no buddy order can satisfy the request.
    #[error("out of memory")]
    OutOfMemory,
    /// The allocator's fixed region has no room left.
    #[error("allocator exhausted")]
    Exhausted,
    /// Pointer is outside the region or not on a block boundary.
    #[error("pointer does not belong to this allocator")]
    InvalidPointer,
    /// Block is already free.
    #[error("double free detected")]
    DoubleFree,
    /// Free lists and bitset disagree.
    #[error("allocator state corrupted: {0}")]
    Corrupted(&'static str),
}

pub type Result<T> = core::result::Result<T, AllocError>;
