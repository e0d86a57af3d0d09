//! Single memory access primitives.
//!
//! These are the only places where Tongs dereferences addresses. Every function is
//! `unsafe`: the caller guarantees the address lies inside a live mapping.

use std::arch::asm;
use std::arch::x86_64::{_mm_clflush, _mm_mfence};

use super::VirtAddr;

/// Loads one byte from `addr`.
///
/// # Safety
///
/// `addr` must be valid for reads.
#[inline(always)]
pub unsafe fn read(addr: VirtAddr) -> u8 {
    unsafe { std::ptr::read_volatile(addr.as_ptr() as *const u8) }
}

/// Stores `value` at `addr`.
///
/// # Safety
///
/// `addr` must be valid for writes.
#[inline(always)]
pub unsafe fn write(addr: VirtAddr, value: u8) {
    unsafe { std::ptr::write_volatile(addr.as_ptr(), value) }
}

/// Flushes the cache line of `addr` with `clflush`.
///
/// # Safety
///
/// `addr` must be mapped.
#[inline(always)]
pub unsafe fn clflush(addr: VirtAddr) {
    unsafe { _mm_clflush(addr.as_ptr() as *const u8) }
}

/// Flushes the cache line of `addr` with `clflushopt`, which is only ordered by fences.
///
/// # Safety
///
/// `addr` must be mapped and the CPU must support `clflushopt`.
#[inline(always)]
pub unsafe fn clflushopt(addr: VirtAddr) {
    unsafe { asm!("clflushopt [{}]", in(reg) addr.as_ptr() as *const u8) }
}

/// Full memory fence.
#[inline(always)]
pub fn mfence() {
    unsafe { _mm_mfence() }
}
