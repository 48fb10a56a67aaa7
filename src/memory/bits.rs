//! Bit tricks for sizing buddy metadata and mapping byte counts to orders.

/// De Bruijn multiplier `0x077CB531`: every 5-bit window of the sequence is
/// distinct, so `(isolated_bit * DEBRUIJN) >> 27` is a perfect hash of the
/// bit position.
const DEBRUIJN: u32 = 0x077C_B531;

const BIT_POSITION: [u8; 32] = [
    0, 1, 28, 2, 29, 14, 24, 3, 30, 22, 20, 15, 25, 17, 4, 8, //
    31, 27, 13, 23, 21, 19, 16, 7, 26, 12, 18, 6, 11, 5, 10, 9,
];

/// Index of the lowest set bit of `a`. Returns 0 for `a == 0`.
#[inline]
#[must_use]
pub const fn trailing_zeros(a: u32) -> u32 {
    let lowest = a & a.wrapping_neg();
    BIT_POSITION[(lowest.wrapping_mul(DEBRUIJN) >> 27) as usize] as u32
}

/// Round `a` up to the next power of two. Powers of two map to themselves.
///
/// `0` and values above `2^31` wrap to `0`; callers bound their input.
#[inline]
#[must_use]
pub const fn pow2_roundup(a: u32) -> u32 {
    let mut a = a.wrapping_sub(1);
    a |= a >> 1;
    a |= a >> 2;
    a |= a >> 4;
    a |= a >> 8;
    a |= a >> 16;
    a.wrapping_add(1)
}

/// Align `addr` upwards to `align`, which must be a power of two.
#[inline]
#[must_use]
pub const fn align_up(addr: usize, align: usize) -> usize {
    debug_assert!(align.is_power_of_two());
    (addr + align - 1) & !(align - 1)
}
