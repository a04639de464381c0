use std::ops::Range;
use std::path::Path;

use crate::error::{PmemError, Result};

/// Size of the device flash.
pub const FILESYSTEM_SIZE: usize = 0x3C_0000;

/// Unit of every flash read.
pub const BLOCK_SIZE: usize = 512;

/// A copy of the flash where each block is either fetched or absent.
#[derive(Clone)]
pub struct MemoryImage {
    data: Vec<u8>,
    present: Vec<bool>,
}

impl MemoryImage {
    /// An empty image of the flash size.
    pub fn new() -> Self {
        Self::with_size(FILESYSTEM_SIZE)
    }

    /// An empty image of `size` bytes, rounded up to whole blocks.
    pub fn with_size(size: usize) -> Self {
        let blocks = size.div_ceil(BLOCK_SIZE);
        Self {
            data: vec![0; blocks * BLOCK_SIZE],
            present: vec![false; blocks],
        }
    }

    /// A complete image from a flash dump of exactly [`FILESYSTEM_SIZE`] bytes.
    pub fn from_dump(bytes: Vec<u8>) -> Result<Self> {
        if bytes.len() != FILESYSTEM_SIZE {
            return Err(PmemError::ImageSize {
                expected: FILESYSTEM_SIZE,
                actual: bytes.len(),
            });
        }
        Ok(Self::from_bytes(bytes))
    }

    /// A complete image of any size; a partial last block is zero padded.
    pub fn from_bytes(mut bytes: Vec<u8>) -> Self {
        let blocks = bytes.len().div_ceil(BLOCK_SIZE);
        bytes.resize(blocks * BLOCK_SIZE, 0);
        Self {
            data: bytes,
            present: vec![true; blocks],
        }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_dump(std::fs::read(path.as_ref())?)
    }

    /// Write the image as a flat dump; absent blocks are written as zeros.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path.as_ref(), &self.data)?;
        Ok(())
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn block_count(&self) -> usize {
        self.present.len()
    }

    pub fn is_block_present(&self, index: usize) -> bool {
        self.present.get(index).copied().unwrap_or(false)
    }

    pub fn present_blocks(&self) -> usize {
        self.present.iter().filter(|&&p| p).count()
    }

    pub fn is_complete(&self) -> bool {
        self.present.iter().all(|&p| p)
    }

    /// Block indices covering `offset..offset + length`.
    pub fn blocks_for(offset: usize, length: usize) -> Range<usize> {
        if length == 0 {
            return 0..0;
        }
        offset / BLOCK_SIZE..(offset + length - 1) / BLOCK_SIZE + 1
    }

    /// Byte ranges of absent blocks, coalesced.
    pub fn missing_ranges(&self) -> Vec<Range<usize>> {
        let mut ranges: Vec<Range<usize>> = Vec::new();
        for (index, &present) in self.present.iter().enumerate() {
            if present {
                continue;
            }
            let start = index * BLOCK_SIZE;
            match ranges.last_mut() {
                Some(last) if last.end == start => last.end = start + BLOCK_SIZE,
                _ => ranges.push(start..start + BLOCK_SIZE),
            }
        }
        ranges
    }

    pub fn check_bounds(&self, offset: usize, length: usize) -> Result<()> {
        match offset.checked_add(length) {
            Some(end) if end <= self.size() => Ok(()),
            _ => Err(PmemError::OutOfBounds {
                offset,
                length,
                size: self.size(),
            }),
        }
    }

    /// Borrow a range; every block it touches must be present.
    pub fn get(&self, offset: usize, length: usize) -> Result<&[u8]> {
        self.check_bounds(offset, length)?;
        if let Some(block) = Self::blocks_for(offset, length).find(|&b| !self.present[b]) {
            return Err(PmemError::Missing {
                offset: block * BLOCK_SIZE,
            });
        }
        Ok(&self.data[offset..offset + length])
    }

    /// The raw buffer, absent blocks included as zeros.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub(crate) fn store_block(&mut self, index: usize, data: &[u8]) -> Result<()> {
        if index >= self.block_count() || data.len() != BLOCK_SIZE {
            return Err(PmemError::OutOfBounds {
                offset: index * BLOCK_SIZE,
                length: data.len(),
                size: self.size(),
            });
        }
        let start = index * BLOCK_SIZE;
        self.data[start..start + BLOCK_SIZE].copy_from_slice(data);
        self.present[index] = true;
        Ok(())
    }
}

impl Default for MemoryImage {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryImage")
            .field("size", &self.size())
            .field("present_blocks", &self.present_blocks())
            .finish()
    }
}
