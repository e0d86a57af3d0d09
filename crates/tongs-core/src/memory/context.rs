use log::info;
use thiserror::Error;

use super::{Allocation, ConfigError, DramAddr, DramCodec, GeometryConfig, VirtAddr};
use crate::util::{SUPERPAGE_SHIFT, SUPERPAGE_SIZE};

/// Errors when binding an allocation to a DRAM geometry.
#[derive(Debug, Error)]
pub enum ContextError {
    /// The geometry is invalid
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The allocation is not a single superpage
    #[error("need a mapping of exactly one 1 GiB superpage, got {chunks} chunk(s) of 0x{len:x} bytes")]
    NotOneSuperpage {
        /// Number of chunks
        chunks: usize,
        /// Length of the allocation
        len: usize,
    },
    /// The matrices address more than one superpage
    #[error("matrix size {0} addresses more than one 1 GiB superpage")]
    MatrixTooLarge(usize),
    /// The allocation base is not aligned to the span of the matrices
    #[error("allocation base {base:?} is not aligned to 2^{matrix_size}")]
    MisalignedBase {
        /// Allocation base
        base: VirtAddr,
        /// Matrix dimension
        matrix_size: usize,
    },
}

/// One allocation bound to one DRAM geometry.
///
/// The context owns its [`Allocation`] and the [`DramCodec`] built from a
/// [`GeometryConfig`], and converts between virtual addresses in the allocation and
/// [`DramAddr`] tuples. Pass it by reference to whatever needs to place accesses.
#[derive(Debug)]
pub struct DramContext {
    allocation: Allocation,
    codec: DramCodec,
}

impl DramContext {
    /// Binds `allocation` to the geometry described by `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the geometry is invalid, the allocation is not exactly one
    /// superpage, or its base is not aligned to `2^D`.
    pub fn new(allocation: Allocation, config: &GeometryConfig) -> Result<Self, ContextError> {
        info!("Initializing DRAM context with mapping {:p}", allocation.base());
        if allocation.chunks().len() != 1 || allocation.len() != SUPERPAGE_SIZE {
            return Err(ContextError::NotOneSuperpage {
                chunks: allocation.chunks().len(),
                len: allocation.len(),
            });
        }
        if config.matrix_size > SUPERPAGE_SHIFT {
            return Err(ContextError::MatrixTooLarge(config.matrix_size));
        }
        let codec = DramCodec::new(config)?;
        if !allocation.base().is_aligned(codec.matrix_size()) {
            return Err(ContextError::MisalignedBase {
                base: allocation.base(),
                matrix_size: codec.matrix_size(),
            });
        }
        Ok(DramContext { allocation, codec })
    }

    /// The bound allocation.
    pub fn allocation(&self) -> &Allocation {
        &self.allocation
    }

    /// The codec derived from the geometry.
    pub fn codec(&self) -> &DramCodec {
        &self.codec
    }

    /// Decodes a virtual address of the bound allocation.
    pub fn from_virt(&self, virt: VirtAddr) -> DramAddr {
        self.codec.decode(virt.as_u64())
    }

    /// Encodes `addr` into a virtual address inside the bound allocation.
    pub fn to_virt(&self, addr: &DramAddr) -> VirtAddr {
        self.allocation.base() + self.codec.encode(addr) as usize
    }

    /// Releases the allocation.
    pub fn into_allocation(self) -> Allocation {
        self.allocation
    }
}
