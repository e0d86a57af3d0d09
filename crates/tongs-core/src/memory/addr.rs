use std::fmt::{self, Debug, Formatter, LowerHex};
use std::ops::{Add, Sub};

use serde::Serialize;

/// Virtual memory address.
///
/// A newtype around the numeric value of a pointer. Holding a `VirtAddr` never
/// grants access to the memory behind it; only the primitives in
/// [`access`](crate::memory::access) dereference addresses.
#[repr(transparent)]
#[derive(Clone, Copy, Default, Serialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VirtAddr(usize);

/// Physical memory address.
///
/// A newtype wrapper around a physical address value.
#[repr(transparent)]
#[derive(Clone, Copy, Default, Serialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PhysAddr(usize);

macro_rules! impl_addr {
    ($name:ident) => {
        impl $name {
            /// Creates a new address.
            pub const fn new(addr: usize) -> Self {
                $name(addr)
            }

            /// Returns the address as a usize.
            pub const fn as_usize(&self) -> usize {
                self.0
            }

            /// Returns the address as a u64.
            pub const fn as_u64(&self) -> u64 {
                self.0 as u64
            }

            /// Rounds the address down to a multiple of `1 << shift`.
            pub const fn align_down(&self, shift: usize) -> Self {
                $name(self.0 & !((1 << shift) - 1))
            }

            /// Offset of the address inside a `1 << shift` aligned block.
            pub const fn offset_in(&self, shift: usize) -> usize {
                self.0 & ((1 << shift) - 1)
            }

            /// Returns true if the address is a multiple of `1 << shift`.
            pub const fn is_aligned(&self, shift: usize) -> bool {
                self.offset_in(shift) == 0
            }
        }

        impl Debug for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "(0x{:x})"), self.0)
            }
        }

        impl LowerHex for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
                LowerHex::fmt(&self.0, f)
            }
        }

        impl fmt::Pointer for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
                write!(f, "{:#x}", self.0)
            }
        }

        impl From<$name> for usize {
            fn from(addr: $name) -> usize {
                addr.0
            }
        }

        impl Add<usize> for $name {
            type Output = $name;

            fn add(self, rhs: usize) -> Self::Output {
                $name(self.0 + rhs)
            }
        }

        impl Sub<$name> for $name {
            type Output = usize;

            fn sub(self, rhs: $name) -> Self::Output {
                assert!(self.0 >= rhs.0, "{:?} - {:?} underflows", self, rhs);
                self.0 - rhs.0
            }
        }

        impl Sub<usize> for $name {
            type Output = $name;

            fn sub(self, rhs: usize) -> Self::Output {
                assert!(self.0 >= rhs);
                $name(self.0 - rhs)
            }
        }
    };
}

impl_addr!(VirtAddr);
impl_addr!(PhysAddr);

impl VirtAddr {
    /// Returns the address as a raw pointer.
    pub fn as_ptr(&self) -> *mut u8 {
        self.0 as *mut u8
    }
}

impl<T> From<*mut T> for VirtAddr {
    fn from(ptr: *mut T) -> Self {
        VirtAddr(ptr as usize)
    }
}

impl<T> From<*const T> for VirtAddr {
    fn from(ptr: *const T) -> Self {
        VirtAddr(ptr as usize)
    }
}
