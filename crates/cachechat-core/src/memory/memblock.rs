use std::fs::File;
use std::io::Read;
use std::ptr::null_mut;

use super::BytePointer;
use crate::util::HUGEPAGE_SIZE;
use lazy_static::lazy_static;
use libc::{MAP_ANONYMOUS, MAP_HUGETLB, MAP_POPULATE, MAP_PRIVATE, PROT_READ, PROT_WRITE};
use log::{debug, warn};
use thiserror::Error;

// https://www.kernel.org/doc/Documentation/vm/hugetlbpage.txt
//
// The output of "cat /proc/meminfo" will include lines like:
// ...
// HugePages_Total: uuu
// HugePages_Free:  vvv
// Hugepagesize:    yyy kB
const MEMINFO_PATH: &str = "/proc/meminfo";
const TOKEN: &str = "Hugepagesize:";

lazy_static! {
    static ref HUGEPAGE_BYTES: Option<usize> = {
        let buf = File::open(MEMINFO_PATH).map_or("".to_owned(), |mut f| {
            let mut s = String::new();
            let _ = f.read_to_string(&mut s);
            s
        });
        parse_hugepage_size(&buf)
    };
}

fn parse_hugepage_size(s: &str) -> Option<usize> {
    let line = s.lines().find(|line| line.starts_with(TOKEN))?;
    let mut parts = line.strip_prefix(TOKEN)?.split_whitespace();
    let size = parts.next()?.parse::<usize>().ok()?;
    let unit = match parts.next() {
        Some("kB") => 1024,
        Some(_) => return None,
        None => 1,
    };
    Some(size * unit)
}

/// The default huge page size of the running kernel, if it reports one.
pub fn hugepage_size() -> Option<usize> {
    *HUGEPAGE_BYTES
}

/// Errors raised while obtaining a memory region.
#[derive(Debug, Error)]
pub enum MemoryError {
    /// Attempted to map a zero-size region
    #[error("Zero size region")]
    ZeroSize,
    /// Anonymous mapping failed
    #[error("mmap of {size} bytes failed: {source}")]
    Mmap {
        /// Requested size in bytes
        size: usize,
        /// Underlying OS error
        source: std::io::Error,
    },
    /// Huge page backed mapping failed
    #[error("huge page mapping of {size} bytes failed (are huge pages reserved?): {source}")]
    Hugepage {
        /// Requested size in bytes
        size: usize,
        /// Underlying OS error
        source: std::io::Error,
    },
}

/// An owned, page-aligned memory region.
///
/// The region is unmapped when dropped.
#[derive(Debug)]
pub struct Memory {
    ptr: *mut u8,
    len: usize,
    huge: bool,
}

unsafe impl Send for Memory {}

impl Memory {
    fn map(size: usize, flags: libc::c_int) -> std::io::Result<*mut u8> {
        let p = unsafe { libc::mmap(null_mut(), size, PROT_READ | PROT_WRITE, flags, -1, 0) };
        if p == libc::MAP_FAILED {
            return Err(std::io::Error::last_os_error());
        }
        // touch every page so no fault happens inside a timed window
        unsafe { libc::memset(p, 0x00, size) };
        Ok(p as *mut u8)
    }

    /// Allocates an anonymous, populated region of `size` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::Mmap`] if the kernel refuses the mapping.
    pub fn mmap(size: usize) -> Result<Self, MemoryError> {
        if size == 0 {
            return Err(MemoryError::ZeroSize);
        }
        let ptr = Self::map(size, MAP_PRIVATE | MAP_ANONYMOUS | MAP_POPULATE)
            .map_err(|source| MemoryError::Mmap { size, source })?;
        debug!("mapped {} bytes at {:p}", size, ptr);
        Ok(Memory {
            ptr,
            len: size,
            huge: false,
        })
    }

    /// Allocates a region backed by huge pages.
    ///
    /// `size` is rounded up to a multiple of the huge page size. Within one huge
    /// page, virtual and physical address bits below the huge page shift coincide.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::Hugepage`] if no huge pages are available.
    pub fn hugepage(size: usize) -> Result<Self, MemoryError> {
        if size == 0 {
            return Err(MemoryError::ZeroSize);
        }
        let page = hugepage_size().unwrap_or_else(|| {
            warn!("Could not read huge page size, assuming {} bytes", HUGEPAGE_SIZE);
            HUGEPAGE_SIZE
        });
        let size = size.div_ceil(page) * page;
        let ptr = Self::map(
            size,
            MAP_PRIVATE | MAP_ANONYMOUS | MAP_POPULATE | MAP_HUGETLB,
        )
        .map_err(|source| MemoryError::Hugepage { size, source })?;
        debug!("mapped {} bytes of huge pages at {:p}", size, ptr);
        Ok(Memory {
            ptr,
            len: size,
            huge: true,
        })
    }

    /// Whether the region is backed by huge pages.
    pub fn is_hugepage(&self) -> bool {
        self.huge
    }
}

impl Drop for Memory {
    fn drop(&mut self) {
        unsafe { libc::munmap(self.ptr as *mut libc::c_void, self.len) };
    }
}

impl BytePointer for Memory {
    fn ptr(&self) -> *const u8 {
        self.ptr
    }
    fn len(&self) -> usize {
        self.len
    }
}
