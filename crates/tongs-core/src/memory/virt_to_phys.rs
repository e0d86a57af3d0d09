use log::warn;
use pagemap2::{PageMapError, VirtualMemoryArea};
use thiserror::Error;

use super::{PhysAddr, VirtAddr};
use crate::util::{PAGE_MASK, PAGE_SHIFT};

/// Trait for resolving virtual addresses to physical addresses.
///
/// Implementors provide methods to translate virtual memory addresses
/// to physical addresses using system interfaces like `/proc/{pid}/pagemap`.
pub trait VirtToPhysResolver {
    /// Errors that can occur during physical address resolution
    type Error: std::error::Error;

    /// Translates a virtual address to a physical address.
    ///
    /// # Errors
    ///
    /// Returns an error if address translation fails.
    fn get_phys(&mut self, virt: VirtAddr) -> Result<PhysAddr, Self::Error>;
}

/// Errors that can happen during PageMap operations
#[derive(Debug, Error)]
pub enum LinuxPageMapError {
    /// Reading or parsing the pagemap failed
    #[error(transparent)]
    PageMap(#[from] PageMapError),
    /// The kernel hid the frame number, which happens without root privileges
    #[error("got PFN 0 for virtual address {0:?}, are we root?")]
    NullPfn(VirtAddr),
    /// The pagemap did not return exactly one entry for a single page
    #[error("got {count} pagemap entries for virtual address {virt:?}, expected exactly one")]
    UnexpectedEntries {
        /// Queried address
        virt: VirtAddr,
        /// Number of entries returned
        count: usize,
    },
}

/// Virtual to physical address translator using Linux pagemap.
///
/// Uses `/proc/{pid}/pagemap` to translate virtual to physical addresses.
/// Requires root privileges to access pagemap.
pub struct LinuxPageMap {
    pagemap_wrapper: pagemap2::PageMap,
}

impl LinuxPageMap {
    /// Creates a new pagemap for the current process.
    ///
    /// # Errors
    ///
    /// Returns an error if opening `/proc/self/pagemap` fails.
    pub fn new() -> Result<LinuxPageMap, LinuxPageMapError> {
        let res = LinuxPageMap {
            pagemap_wrapper: pagemap2::PageMap::new(std::process::id() as u64)?,
        };
        Ok(res)
    }
}

impl VirtToPhysResolver for LinuxPageMap {
    type Error = LinuxPageMapError;

    fn get_phys(&mut self, virt: VirtAddr) -> Result<PhysAddr, Self::Error> {
        let page = virt.align_down(PAGE_SHIFT).as_u64();
        let memory_region = VirtualMemoryArea::from((page, page + PAGE_MASK as u64));
        let entry = self.pagemap_wrapper.pagemap_vma(&memory_region)?;
        if entry.len() != 1 {
            return Err(LinuxPageMapError::UnexpectedEntries {
                virt,
                count: entry.len(),
            });
        }
        let pfn = entry[0].pfn()?;
        if pfn == 0 {
            warn!("Got invalid PFN 0 for virtual address {:?}", virt);
            return Err(LinuxPageMapError::NullPfn(virt));
        }
        Ok(PhysAddr::new(
            ((pfn as usize) << PAGE_SHIFT) | virt.offset_in(PAGE_SHIFT),
        ))
    }
}
