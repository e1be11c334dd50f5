use std::collections::HashMap;
use std::convert::Infallible;
use std::fmt::{Debug, Formatter};

use crate::util::{PAGE_MASK, PAGE_SHIFT};
use log::warn;
use pagemap2::{PageMapError, VirtualMemoryArea};
use serde::Serialize;
use thiserror::Error;

#[repr(transparent)]
#[derive(Clone, Copy, Default, Serialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
/// Physical memory address.
///
/// A newtype wrapper around a physical address value.
pub struct PhysAddr(usize);

impl Debug for PhysAddr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("PhysAddr(0x{:02x})", self.0))
    }
}

impl PhysAddr {
    /// Creates a new physical address.
    pub fn new(addr: usize) -> Self {
        PhysAddr(addr)
    }

    /// Returns the address as a usize.
    pub fn as_usize(&self) -> usize {
        self.0
    }
}

/// Trait for resolving virtual addresses to the addresses the cache indexes.
///
/// The address set builder hashes whatever this trait returns, which makes the
/// addressing contract explicit: either a real translation ([`LinuxPageMap`]) or
/// the documented virtual == physical approximation ([`IdentityResolver`]).
pub trait VirtToPhysResolver {
    /// Errors that can occur during physical address resolution
    type Error;
    /// Translates a virtual address to a physical address.
    ///
    /// # Errors
    ///
    /// Returns an error if address translation fails.
    fn get_phys(&mut self, virt: u64) -> Result<PhysAddr, Self::Error>;
}

/// Resolver assuming virtual and physical addresses coincide.
///
/// Exact for address bits inside the backing page (4 KB, or the huge page when
/// the region is huge page backed). Bits above the page are taken verbatim,
/// so slice selection is only correct up to a constant permutation.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityResolver;

impl VirtToPhysResolver for IdentityResolver {
    type Error = Infallible;
    fn get_phys(&mut self, virt: u64) -> Result<PhysAddr, Self::Error> {
        Ok(PhysAddr(virt as usize))
    }
}

/// Errors that can happen during PageMap operations
#[derive(Debug, Error)]
pub enum LinuxPageMapError {
    /// Reading `/proc/<pid>/pagemap` failed
    #[error(transparent)]
    PageMap(#[from] PageMapError),
    /// The pagemap reported an unexpected number of entries for a single page
    #[error("Got {count} pagemap entries for virtual address 0x{virt:x}, expected exactly one")]
    EntryCount {
        /// Number of entries returned
        count: usize,
        /// Queried virtual address
        virt: u64,
    },
}

/// Virtual to physical address translator using Linux pagemap.
///
/// Uses `/proc/{pid}/pagemap` to translate virtual to physical addresses.
/// Requires root privileges; unprivileged reads yield PFN 0.
/// Translations are cached per page.
pub struct LinuxPageMap {
    pagemap_wrapper: pagemap2::PageMap,
    frames: HashMap<u64, u64>,
}

impl LinuxPageMap {
    /// Creates a new pagemap for the current process.
    ///
    /// # Errors
    ///
    /// Returns an error if opening `/proc/self/pagemap` fails.
    pub fn new() -> Result<LinuxPageMap, LinuxPageMapError> {
        Ok(LinuxPageMap {
            pagemap_wrapper: pagemap2::PageMap::new(std::process::id() as u64)?,
            frames: HashMap::new(),
        })
    }
}

impl VirtToPhysResolver for LinuxPageMap {
    type Error = LinuxPageMapError;
    fn get_phys(&mut self, virt: u64) -> Result<PhysAddr, Self::Error> {
        let vpn = virt >> PAGE_SHIFT;
        let pfn = match self.frames.get(&vpn) {
            Some(&pfn) => pfn,
            None => {
                let vaddr_start_page = vpn << PAGE_SHIFT;
                let vaddr_end_page = vaddr_start_page + PAGE_MASK as u64;
                let memory_region = VirtualMemoryArea::from((vaddr_start_page, vaddr_end_page));
                let entry = self.pagemap_wrapper.pagemap_vma(&memory_region)?;
                if entry.len() != 1 {
                    return Err(LinuxPageMapError::EntryCount {
                        count: entry.len(),
                        virt,
                    });
                }
                let pfn = entry[0].pfn()?;
                if pfn == 0 {
                    warn!(
                        "Got invalid PFN 0 for virtual address 0x{:x}. Are we root?",
                        virt
                    );
                }
                self.frames.insert(vpn, pfn);
                pfn
            }
        };
        Ok(PhysAddr(
            ((pfn << PAGE_SHIFT) | (virt & PAGE_MASK as u64)) as usize,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity() {
        let mut r = IdentityResolver;
        assert_eq!(r.get_phys(0xdead_beef).unwrap(), PhysAddr::new(0xdead_beef));
    }

    #[test]
    fn test_phys_addr_debug() {
        assert_eq!(format!("{:?}", PhysAddr::new(0x1f40)), "PhysAddr(0x1f40)");
    }

    #[test]
    #[ignore = "requires root to read physical frame numbers"]
    fn test_pagemap_keeps_page_offset() -> anyhow::Result<()> {
        let buf = vec![1u8; 8192];
        let virt = buf.as_ptr() as u64 + 100;
        let phys = LinuxPageMap::new()?.get_phys(virt)?;
        assert_eq!(phys.as_usize() & PAGE_MASK, virt as usize & PAGE_MASK);
        assert_ne!(phys.as_usize() >> PAGE_SHIFT, 0);
        Ok(())
    }
}
