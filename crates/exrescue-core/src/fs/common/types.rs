/// Common types and utilities for image access
use memmap2::MmapOptions;
use std::fs::File;
use std::path::Path;

use crate::error::{Result, ScanError};

enum Backing {
    Mapped(memmap2::Mmap),
    Memory(Vec<u8>),
}

/// A read-only view of a volume image.
///
/// Every read is positional, so independent readers (directory scanning and
/// rescue extraction) never disturb each other.
pub struct BlockDevice {
    backing: Backing,
}

impl BlockDevice {
    /// Open an image file and map it read-only
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref())?;

        let mmap = unsafe { MmapOptions::new().map(&file)? };

        Ok(BlockDevice {
            backing: Backing::Mapped(mmap),
        })
    }

    /// Wrap an in-memory image
    pub fn from_bytes(data: Vec<u8>) -> Self {
        BlockDevice {
            backing: Backing::Memory(data),
        }
    }

    fn data(&self) -> &[u8] {
        match &self.backing {
            Backing::Mapped(mmap) => &mmap[..],
            Backing::Memory(data) => &data[..],
        }
    }

    /// Get the size of the image in bytes
    pub fn size(&self) -> u64 {
        self.data().len() as u64
    }

    /// Read exactly `length` bytes starting at `offset`
    pub fn read_bytes(&self, offset: u64, length: u64) -> Result<&[u8]> {
        let data = self.data();
        let size = data.len() as u64;
        let available = size.saturating_sub(offset);

        if offset > size || length > available {
            return Err(ScanError::ShortRead {
                offset,
                needed: length,
                available,
            });
        }

        let start = offset as usize;
        Ok(&data[start..start + length as usize])
    }

    /// Read a single 512-byte sector
    pub fn read_sector(&self, sector: u64) -> Result<&[u8]> {
        self.read_bytes(sector.saturating_mul(512), 512)
    }
}
