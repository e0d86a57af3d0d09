//! Utility functions and types used throughout Tongs.
//!
//! This module provides:
//! - Constants for memory geometry ([`PAGE_SIZE`], [`CL_SIZE`], [`SUPERPAGE_SIZE`], ...)
//! - Bit helpers ([`bit`], [`lsb`], [`parity`])
//! - Random number generation ([`Rng`])
//! - The [`retry!`](crate::retry) macro

mod constants;
mod rng;

pub use self::constants::*;
pub use self::rng::Rng;

/// Returns a word with only bit `n` set.
#[inline(always)]
pub const fn bit(n: usize) -> u64 {
    1 << n
}

/// Returns a mask with the lowest `n` bits set.
///
/// `n` may be 64, in which case all bits are set.
#[inline(always)]
pub const fn low_mask(n: usize) -> u64 {
    if n >= 64 { u64::MAX } else { (1 << n) - 1 }
}

/// Parity of the set bits in `x` (compiles to `popcnt`).
#[inline(always)]
pub const fn parity(x: u64) -> bool {
    x.count_ones() & 1 == 1
}

/// Index of the least significant set bit, or `None` for zero.
#[inline(always)]
pub const fn lsb(x: u64) -> Option<usize> {
    if x == 0 {
        None
    } else {
        Some(x.trailing_zeros() as usize)
    }
}

/// Macro for retrying operations until they succeed.
///
/// This macro continuously executes a closure until it returns `Ok`, logging errors
/// for each failed attempt. **Warning**: This creates an infinite loop if the operation
/// never succeeds, which is intended for conditions such as the physical placement of a
/// fresh allocation that eventually cooperate.
#[macro_export]
macro_rules! retry {
    ($f:expr) => {{
        let mut f = $f;
        let mut attempt: usize = 0;
        loop {
            attempt += 1;
            match f() {
                Ok(x) => break x,
                Err(e) => {
                    log::warn!("attempt {} failed: {}, retrying", attempt, e);
                }
            }
        }
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_low_mask() {
        assert_eq!(low_mask(0), 0);
        assert_eq!(low_mask(6), 0x3f);
        assert_eq!(low_mask(30), 0x3fff_ffff);
        assert_eq!(low_mask(64), u64::MAX);
    }

    #[test]
    fn test_lsb_and_parity() {
        assert_eq!(lsb(0), None);
        assert_eq!(lsb(0xc3200), Some(9));
        assert!(parity(0b1011));
        assert!(!parity(0b1001));
        assert!(!parity(0));
    }

    #[test]
    fn test_retry_until_ok() {
        let mut calls = 0;
        let value = retry!(|| {
            calls += 1;
            if calls < 3 { Err("not yet") } else { Ok(calls) }
        });
        assert_eq!(value, 3);
    }
}
