// vim: tw=80
//! Common utility functions used throughout GRAID

use crate::types::*;
use divbuf::DivBufShared;
use lazy_static::lazy_static;
use num_traits::One;
use std::ops::{Add, Div, Sub};

/// LBAs always use 4K LBAs, even if the underlying device supports smaller.
pub const BYTES_PER_LBA: usize = 4096;

/// Length of the global read-only `ZERO_REGION`
pub const ZERO_REGION_LEN: usize = 8 * BYTES_PER_LBA;

lazy_static! {
    /// A read-only buffer of zeros, useful for padding.
    ///
    /// The length is pretty arbitrary.  Code should be able to cope with a
    /// smaller-than-desired `ZERO_REGION`.
    pub static ref ZERO_REGION: DivBufShared =
        DivBufShared::from(vec![0u8; ZERO_REGION_LEN]);
}

/// Divide two numbers (usually integers), rounding up.
pub fn div_roundup<T>(dividend: T, divisor: T) -> T
    where T: Add<Output=T> + Copy + Div<Output=T> + One + Sub<Output=T>
{
    (dividend + divisor - T::one()) / divisor
}

/// Create an `SGList` of zeros, without copying
pub fn zero_sglist(len: usize) -> SGList {
    let zero_region_len = ZERO_REGION.len();
    let zero_bufs = div_roundup(len, zero_region_len);
    let mut sglist = SGList::new();
    for _ in 0..(zero_bufs - 1) {
        sglist.push(ZERO_REGION.try_const().unwrap())
    }
    sglist.push(ZERO_REGION.try_const().unwrap()
                .slice_to(len - (zero_bufs - 1) * zero_region_len));
    sglist
}

// LCOV_EXCL_STOP
