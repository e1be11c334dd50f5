//! The `memory` module provides the memory regions the channels build their
//! address sets from, and the platform boundary used to time accesses.
//!
//! - `Memory`: an owned anonymous mapping, optionally backed by a huge page.
//! - `BytePointer`: a trait for addressing a region byte by byte.
//! - `VirtToPhysResolver`: a trait for resolving the physical address of a virtual address,
//!   with `LinuxPageMap` (pagemap based) and `IdentityResolver` (virtual == physical)
//!   implementations.
//! - `CacheTimer`: the only place where timestamps are read and lines are flushed.
mod memblock;
mod timer;
mod virt_to_phys;

pub use self::memblock::{Memory, MemoryError, hugepage_size};
pub use self::timer::{CacheTimer, TimerError, TscTimer, construct_cache_timer, wait_until};
pub use self::virt_to_phys::{
    IdentityResolver, LinuxPageMap, LinuxPageMapError, PhysAddr, VirtToPhysResolver,
};

/// Trait for accessing memory as a byte pointer.
///
/// Provides low-level access to memory regions with byte-level addressing.
#[allow(clippy::len_without_is_empty)]
pub trait BytePointer {
    /// Returns a pointer to the byte at the given offset.
    ///
    /// # Panics
    ///
    /// Panics if `offset` is outside the region.
    fn addr(&self, offset: usize) -> *const u8 {
        assert!(
            offset < self.len(),
            "BytePointer::addr failed. Offset {} >= {}",
            offset,
            self.len()
        );
        unsafe { self.ptr().byte_add(offset) }
    }

    /// Returns a pointer to the start of the memory region.
    fn ptr(&self) -> *const u8;

    /// Returns the total length of the memory region in bytes.
    fn len(&self) -> usize;
}

impl BytePointer for [u8] {
    fn ptr(&self) -> *const u8 {
        self.as_ptr()
    }
    fn len(&self) -> usize {
        <[u8]>::len(self)
    }
}

impl BytePointer for Vec<u8> {
    fn ptr(&self) -> *const u8 {
        self.as_ptr()
    }
    fn len(&self) -> usize {
        Vec::len(self)
    }
}
