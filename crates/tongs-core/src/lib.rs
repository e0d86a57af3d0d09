//! # Tongs Core
//!
//! `tongs-core` contains the address arithmetic behind Tongs disturbance
//! experiments. It turns the DRAM geometry of a target platform into a linear
//! algebra problem over GF(2), searches large physically-backed allocations for
//! addresses that satisfy parity constraints, and replays exact sequences of
//! memory accesses.
//!
//! ## Main Components
//!
//! - [`memory::Allocation`] - Page-locked 1 GiB hugepage chunks with a
//!   virtual/physical chunk table and uniform address sampling.
//!
//! - [`memory::AddressFunction`] and [`memory::FunctionConstraint`] - Boolean
//!   parity functions over address bits, used both as DRAM decoders and as
//!   search predicates.
//!
//! - [`memory::DramCodec`] - Builds the `linear_to_dram` matrix from a
//!   [`memory::GeometryConfig`] and inverts it, converting between linear
//!   offsets and [`memory::DramAddr`] tuples. [`memory::DramContext`] binds one
//!   codec to the one allocation it describes.
//!
//! - [`memory::AddressGenerator`] - Rejection sampling and "good address"
//!   search in DRAM linear space.
//!
//! - [`program`] module - Instruction sequences (read, write, flush, fence)
//!   replayed in a tight loop and listed with DRAM annotations.
//!
//! ## Platform Support
//!
//! Executing programs and allocating hugepages requires x86_64 Linux with 1 GiB
//! hugepages reserved, and root privileges to read physical frame numbers from
//! `/proc/self/pagemap`. Everything that only computes on addresses (codec,
//! search, listing) works on synthetic allocations without privileges.

#![warn(missing_docs)]

mod error;
pub mod memory;
pub mod program;
pub mod util;

pub use crate::error::Error;
