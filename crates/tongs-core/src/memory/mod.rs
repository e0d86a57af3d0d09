//! The `memory` module provides hugepage allocations, DRAM address translation and constrained address search.
//!
//! The `memory` module provides the following abstractions:
//! - `Allocation`: Page-locked 1 GiB hugepage chunks with a virtual/physical chunk table.
//! - `VirtToPhysResolver`: A trait for resolving the physical address of a provided virtual address.
//! - `LinuxPageMap`: Resolves physical addresses through `/proc/self/pagemap`.
//! - `MemoryTypeControl`: A trait for switching hugepage mappings to uncacheable memory.
//! - `AddressFunction` / `FunctionConstraint`: Parity functions over address bits and required values.
//! - `BitMatrix`: Square matrices over GF(2) with Gauss-Jordan inversion.
//! - `GeometryConfig`: Platform DRAM geometry, loaded from JSON.
//! - `DramCodec`: Converts DRAM linear addresses to `DramAddr` tuples and back.
//! - `DramContext`: Binds one allocation to one codec.
//! - `AddressGenerator`: Random and "good" address search in DRAM linear space.
//!
//! The [`access`] submodule holds the raw read, write, flush and fence primitives.
pub mod access;
mod addr;
mod allocation;
mod bit_matrix;
mod codec;
mod context;
mod dram_addr;
mod function;
mod generator;
mod geometry;
mod virt_to_phys;

pub use self::addr::{PhysAddr, VirtAddr};
pub use self::allocation::{Allocation, AllocationError, Chunk, MemoryType, MemoryTypeControl};
pub use self::bit_matrix::{BitMatrix, MatrixError};
pub use self::codec::{DramCodec, Field};
pub use self::context::{ContextError, DramContext};
pub use self::dram_addr::DramAddr;
pub use self::function::{AddressFunction, FunctionConstraint, ParseFunctionError, all_satisfied};
pub use self::generator::{
    AccessTarget, AddressGenerator, CSV_HEADER, DEFAULT_GOOD_ADDR_ITERATIONS,
    RANDOM_ADDR_ATTEMPTS, SearchError, bit_distribution, shuffle_in_windows,
};
pub use self::geometry::{ConfigError, GeometryConfig};
pub use self::virt_to_phys::{LinuxPageMap, LinuxPageMapError, VirtToPhysResolver};
