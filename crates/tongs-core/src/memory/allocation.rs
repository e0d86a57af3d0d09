use std::fmt;
use std::ptr::null_mut;

use log::{debug, info};
use rand::Rng;
use serde::Serialize;
use thiserror::Error;

use super::{LinuxPageMap, PhysAddr, VirtAddr, VirtToPhysResolver};
use crate::util::{SUPERPAGE_SHIFT, SUPERPAGE_SIZE};

type BoxedError = Box<dyn std::error::Error + Send + Sync>;

/// Errors that can occur while creating or configuring an [`Allocation`].
#[derive(Debug, Error)]
pub enum AllocationError {
    /// Reserving the hugepage mapping failed
    #[error("mmap of {size} bytes failed: {source}")]
    Mmap {
        /// Requested size in bytes
        size: usize,
        /// OS error
        source: std::io::Error,
    },
    /// Locking the mapping into RAM failed
    #[error("mlock failed: {0}")]
    Mlock(#[source] std::io::Error),
    /// Physical address resolution of a chunk failed
    #[error("failed to resolve physical base of chunk at {virt:?}: {source}")]
    Resolve {
        /// Virtual base of the chunk
        virt: VirtAddr,
        /// Resolver error
        source: BoxedError,
    },
    /// The chunk table does not describe the region
    #[error("invalid chunk {index} at {virt:?} for region {base:?}+0x{len:x}")]
    InvalidChunk {
        /// Index in the chunk table
        index: usize,
        /// Virtual base of the offending chunk
        virt: VirtAddr,
        /// Region base
        base: VirtAddr,
        /// Region length
        len: usize,
    },
    /// The memory type control interface failed
    #[error("memory type control failed for {virt:?}: {source}")]
    MemoryTypeControl {
        /// Virtual base of the chunk
        virt: VirtAddr,
        /// Controller error
        source: BoxedError,
    },
    /// The memory type did not change as requested
    #[error("chunk {virt:?} is still {actual} after switching to uncacheable")]
    MemoryTypeUnchanged {
        /// Virtual base of the chunk
        virt: VirtAddr,
        /// Memory type read back
        actual: MemoryType,
    },
}

/// One physically contiguous superpage of an allocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Chunk {
    /// Virtual base address (superpage aligned)
    pub virt: VirtAddr,
    /// Physical base address (superpage aligned)
    pub phys: PhysAddr,
}

/// x86 page attribute memory types.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum MemoryType {
    /// UC
    Uncacheable,
    /// WC
    WriteCombining,
    /// WT
    WriteThrough,
    /// WP
    WriteProtected,
    /// WB
    WriteBack,
    /// UC-
    UncacheableMinus,
}

impl fmt::Display for MemoryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MemoryType::Uncacheable => "UC",
            MemoryType::WriteCombining => "WC",
            MemoryType::WriteThrough => "WT",
            MemoryType::WriteProtected => "WP",
            MemoryType::WriteBack => "WB",
            MemoryType::UncacheableMinus => "UC-",
        };
        f.write_str(s)
    }
}

/// Interface to a kernel facility that rewrites the memory type of a huge page mapping.
///
/// Tongs does not ship an implementation; the page table editor used on the
/// measurement machine is an external collaborator.
pub trait MemoryTypeControl {
    /// Errors reported by the controller
    type Error: std::error::Error + Send + Sync + 'static;

    /// Reads the memory type of the huge page mapping `page`.
    fn memory_type(&mut self, page: VirtAddr) -> Result<MemoryType, Self::Error>;

    /// Rewrites the memory type of the huge page mapping `page` and flushes the TLB entry.
    fn set_memory_type(&mut self, page: VirtAddr, mt: MemoryType) -> Result<(), Self::Error>;
}

/// A page-locked memory region made of 1 GiB superpages.
///
/// Keeps one `(virtual base, physical base)` pair per superpage so addresses can be
/// translated in both directions without touching the pagemap again. An allocation is
/// move-only: the chunk table refers to exactly one mapping.
pub struct Allocation {
    ptr: *mut u8,
    len: usize,
    chunks: Vec<Chunk>,
    owned: bool,
}

impl fmt::Debug for Allocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Allocation")
            .field("base", &self.base())
            .field("len", &format_args!("0x{:x}", self.len))
            .field("chunks", &self.chunks)
            .field("owned", &self.owned)
            .finish()
    }
}

impl Allocation {
    /// Allocates `num_superpages` 1 GiB hugepages and resolves their physical bases via pagemap.
    ///
    /// # Errors
    ///
    /// Returns an error if the pagemap cannot be opened, the mapping or lock fails, or
    /// a chunk cannot be resolved.
    pub fn allocate(num_superpages: usize) -> Result<Self, AllocationError> {
        let mut resolver = LinuxPageMap::new().map_err(|e| AllocationError::Resolve {
            virt: VirtAddr::default(),
            source: Box::new(e),
        })?;
        Self::allocate_with(num_superpages, &mut resolver)
    }

    /// Allocates `num_superpages` 1 GiB hugepages, resolving physical bases with `resolver`.
    ///
    /// # Errors
    ///
    /// Returns an error if `mmap` or `mlock` fails or a chunk cannot be resolved. The
    /// mapping is released before returning an error.
    pub fn allocate_with<R>(num_superpages: usize, resolver: &mut R) -> Result<Self, AllocationError>
    where
        R: VirtToPhysResolver,
        R::Error: Send + Sync + 'static,
    {
        assert!(num_superpages > 0, "need at least one superpage");
        let len = num_superpages * SUPERPAGE_SIZE;
        let p = unsafe {
            libc::mmap(
                null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE
                    | libc::MAP_ANONYMOUS
                    | libc::MAP_POPULATE
                    | libc::MAP_HUGETLB
                    | libc::MAP_HUGE_1GB,
                -1,
                0,
            )
        };
        if p == libc::MAP_FAILED {
            return Err(AllocationError::Mmap {
                size: len,
                source: std::io::Error::last_os_error(),
            });
        }
        // from here on, drop releases the mapping on every error path
        let mut alloc = Allocation {
            ptr: p as *mut u8,
            len,
            chunks: Vec::with_capacity(num_superpages),
            owned: true,
        };

        if unsafe { libc::mlock(p, len) } < 0 {
            return Err(AllocationError::Mlock(std::io::Error::last_os_error()));
        }

        for offset in (0..len).step_by(SUPERPAGE_SIZE) {
            let virt = alloc.base() + offset;
            let phys = resolver
                .get_phys(virt)
                .map_err(|e| AllocationError::Resolve {
                    virt,
                    source: Box::new(e),
                })?;
            debug!("chunk {:p} -> {:p}", virt, phys);
            alloc.chunks.push(Chunk { virt, phys });
        }
        info!(
            "allocated {} superpage(s) at {:p}, first physical base {:p}",
            num_superpages,
            alloc.base(),
            alloc.chunks[0].phys
        );
        Ok(alloc)
    }

    /// Wraps a region this allocation does not own, given its chunk table.
    ///
    /// The region is never unmapped. No memory is accessed through the returned
    /// allocation, so `base` may describe a synthetic address space.
    ///
    /// # Errors
    ///
    /// Returns [`AllocationError::InvalidChunk`] unless `chunks` lists, in order, one
    /// superpage-aligned pair for every superpage of `[base, base + len)`. An empty
    /// region is rejected.
    pub fn from_parts(
        base: VirtAddr,
        len: usize,
        chunks: Vec<Chunk>,
    ) -> Result<Self, AllocationError> {
        let invalid = |index: usize, virt: VirtAddr| AllocationError::InvalidChunk {
            index,
            virt,
            base,
            len,
        };
        if chunks.is_empty() {
            return Err(invalid(0, base));
        }
        if len != chunks.len() * SUPERPAGE_SIZE {
            return Err(invalid(chunks.len(), base + len));
        }
        for (index, chunk) in chunks.iter().enumerate() {
            if chunk.virt != base + index * SUPERPAGE_SIZE
                || !chunk.virt.is_aligned(SUPERPAGE_SHIFT)
                || !chunk.phys.is_aligned(SUPERPAGE_SHIFT)
            {
                return Err(invalid(index, chunk.virt));
            }
        }
        Ok(Allocation {
            ptr: base.as_ptr(),
            len,
            chunks,
            owned: false,
        })
    }

    /// Base address of the region.
    pub fn base(&self) -> VirtAddr {
        VirtAddr::from(self.ptr)
    }

    /// Raw pointer to the start of the region.
    pub fn ptr(&self) -> *mut u8 {
        self.ptr
    }

    /// Length of the region in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true for a zero-length region.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The chunk table, ordered by virtual address.
    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    /// Returns true if `virt` lies inside the region.
    pub fn contains(&self, virt: VirtAddr) -> bool {
        virt >= self.base() && virt.as_usize() - self.base().as_usize() < self.len
    }

    /// Translates a virtual address inside the region to its physical address.
    ///
    /// Returns `None` if `virt` is not covered by any chunk.
    pub fn virt_to_phys(&self, virt: VirtAddr) -> Option<PhysAddr> {
        let page = virt.align_down(SUPERPAGE_SHIFT);
        self.chunks
            .iter()
            .find(|chunk| chunk.virt == page)
            .map(|chunk| chunk.phys + virt.offset_in(SUPERPAGE_SHIFT))
    }

    /// Translates a physical address to its virtual address inside the region.
    ///
    /// Returns `None` if `phys` is not backed by any chunk.
    pub fn phys_to_virt(&self, phys: PhysAddr) -> Option<VirtAddr> {
        let page = phys.align_down(SUPERPAGE_SHIFT);
        self.chunks
            .iter()
            .find(|chunk| chunk.phys == page)
            .map(|chunk| chunk.virt + phys.offset_in(SUPERPAGE_SHIFT))
    }

    /// Draws a uniformly distributed address from the region.
    pub fn get_rand_addr<R: Rng>(&self, rng: &mut R) -> VirtAddr {
        self.base() + rng.random_range(0..self.len)
    }

    /// Switches every chunk to the uncacheable memory type.
    ///
    /// Each chunk is read back after the update. Any failure invalidates the
    /// experiment and is meant to be treated as fatal by the caller.
    ///
    /// # Errors
    ///
    /// Returns an error if the controller fails or a chunk keeps another memory type.
    pub fn set_uncached<C: MemoryTypeControl + ?Sized>(
        &self,
        control: &mut C,
    ) -> Result<(), AllocationError> {
        let wrap = |virt: VirtAddr| {
            move |e: C::Error| AllocationError::MemoryTypeControl {
                virt,
                source: Box::new(e),
            }
        };
        for chunk in &self.chunks {
            let before = control.memory_type(chunk.virt).map_err(wrap(chunk.virt))?;
            debug!("chunk {:p} is {}", chunk.virt, before);
            control
                .set_memory_type(chunk.virt, MemoryType::Uncacheable)
                .map_err(wrap(chunk.virt))?;
            let after = control.memory_type(chunk.virt).map_err(wrap(chunk.virt))?;
            if after != MemoryType::Uncacheable {
                return Err(AllocationError::MemoryTypeUnchanged {
                    virt: chunk.virt,
                    actual: after,
                });
            }
            info!("chunk {:p} is now {}", chunk.virt, after);
        }
        info!("allocation is fully uncacheable");
        Ok(())
    }
}

impl Drop for Allocation {
    fn drop(&mut self) {
        if self.owned {
            unsafe { libc::munmap(self.ptr as *mut libc::c_void, self.len) };
        }
    }
}
