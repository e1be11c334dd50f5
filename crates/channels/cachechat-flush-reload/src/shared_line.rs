use std::fs::File;
use std::path::{Path, PathBuf};

use cachechat_core::util::CL_SIZE;
use log::debug;
use memmap2::Mmap;
use thiserror::Error;

/// Errors that can occur while mapping the shared line.
#[derive(Debug, Error)]
pub enum SharedLineError {
    /// The file could not be opened or mapped
    #[error("failed to map {path}: {source}")]
    Map {
        /// Shared file
        path: PathBuf,
        /// Underlying I/O error
        source: std::io::Error,
    },
    /// The offset lies outside the file
    #[error("offset {offset} outside of {path} ({len} bytes)")]
    Offset {
        /// Requested offset
        offset: usize,
        /// File length
        len: usize,
        /// Shared file
        path: PathBuf,
    },
}

/// One cache line of a file mapped read-only.
///
/// Every process mapping the same file gets the same page-cache pages, so the
/// line is shared across processes without any write access.
#[derive(Debug)]
pub struct SharedLine {
    map: Mmap,
    offset: usize,
}

impl SharedLine {
    /// Maps `path` and selects the line containing byte `offset`.
    ///
    /// # Errors
    ///
    /// Returns a [`SharedLineError`] if the file cannot be mapped or is too
    /// short.
    pub fn open<P: AsRef<Path>>(path: P, offset: usize) -> Result<Self, SharedLineError> {
        let path = path.as_ref();
        let map_err = |source| SharedLineError::Map {
            path: path.to_path_buf(),
            source,
        };
        let file = File::open(path).map_err(map_err)?;
        let map = unsafe { Mmap::map(&file) }.map_err(map_err)?;
        if offset >= map.len() {
            return Err(SharedLineError::Offset {
                offset,
                len: map.len(),
                path: path.to_path_buf(),
            });
        }
        let offset = offset & !(CL_SIZE - 1);
        debug!(
            "Mapped {} ({} bytes), shared line at offset 0x{:x}",
            path.display(),
            map.len(),
            offset
        );
        Ok(SharedLine { map, offset })
    }

    /// Address of the shared line.
    pub fn ptr(&self) -> *const u8 {
        self.map[self.offset..].as_ptr()
    }

    /// Line-aligned offset inside the file.
    pub fn offset(&self) -> usize {
        self.offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open() -> anyhow::Result<()> {
        let path = std::env::temp_dir().join(format!("cachechat-line-{}", std::process::id()));
        std::fs::write(&path, vec![7u8; 4096])?;
        let line = SharedLine::open(&path, 200)?;
        assert_eq!(line.offset(), 192);
        assert_eq!(unsafe { *line.ptr() }, 7);
        assert!(matches!(
            SharedLine::open(&path, 4096),
            Err(SharedLineError::Offset { len: 4096, .. })
        ));
        std::fs::remove_file(&path)?;
        assert!(matches!(
            SharedLine::open(&path, 0),
            Err(SharedLineError::Map { .. })
        ));
        Ok(())
    }
}
