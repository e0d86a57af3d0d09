/// Page shift value (12 bits) for 4KB pages
pub const PAGE_SHIFT: usize = 12;
/// Standard page size (4096 bytes)
pub const PAGE_SIZE: usize = 1 << PAGE_SHIFT;
/// Mask for extracting page offset
pub const PAGE_MASK: usize = PAGE_SIZE - 1;

/// Cache line shift value (6 bits) for x86_64
pub const CL_SHIFT: usize = 6;
/// Cache line size (64 bytes) for x86_64
pub const CL_SIZE: usize = 1 << CL_SHIFT;

/// Superpage shift value (30 bits) for 1GB hugepages
pub const SUPERPAGE_SHIFT: usize = 30;
/// Size of one 1GB hugepage, the chunk granularity of an [`Allocation`](crate::memory::Allocation)
pub const SUPERPAGE_SIZE: usize = 1 << SUPERPAGE_SHIFT;
/// Mask for extracting the offset inside a superpage
pub const SUPERPAGE_MASK: usize = SUPERPAGE_SIZE - 1;

/// Number of address bits in a machine word
pub const WORD_BITS: usize = usize::BITS as usize;

/// Bytes per MiB
pub const MIB: usize = 1 << 20;
/// Bytes per GiB
pub const GIB: usize = 1 << 30;
