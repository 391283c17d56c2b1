//! An in-memory implementation of the [`BlockDevice`] trait.
//!
//! A `RamDisk` behaves like an ideal flash device for testing purposes:
//! reads and writes never fail, and discarded sectors are zeroed so that
//! reclaimed space is observably distinct from live data. Write flags are
//! accepted and ignored, as there is no volatile cache to flush.

#![no_std]

extern crate alloc;

use alloc::vec;
use alloc::vec::Vec;
use block_device::{BlockDevice, BlockIo, IoError, WriteFlags};

const SECTOR_SIZE: usize = 512;

/// A block device backed by a heap-allocated byte array.
pub struct RamDisk {
    data: Vec<u8>,
    block_size: usize,
    num_blocks: usize,
    discard_count: usize,
}

impl RamDisk {
    /// Creates a zero-filled ram disk of `num_blocks` blocks of `block_size` bytes each.
    pub fn new(block_size: usize, num_blocks: usize) -> RamDisk {
        RamDisk {
            data: vec![0; block_size * num_blocks],
            block_size,
            num_blocks,
            discard_count: 0,
        }
    }

    /// The number of discard commands this device has received.
    pub fn discard_count(&self) -> usize {
        self.discard_count
    }

    fn check_transfer(&self, buffer_len: usize, block_offset: usize) -> Result<usize, IoError> {
        if buffer_len == 0 || buffer_len % self.block_size != 0 {
            return Err(IoError::InvalidInput);
        }
        let num_blocks = buffer_len / self.block_size;
        if block_offset + num_blocks > self.num_blocks {
            return Err(IoError::OutOfBounds);
        }
        Ok(num_blocks)
    }
}

impl BlockIo for RamDisk {
    fn block_size(&self) -> usize { self.block_size }
    fn num_blocks(&self) -> usize { self.num_blocks }
}

impl BlockDevice for RamDisk {
    fn read_blocks(&mut self, buffer: &mut [u8], block_offset: usize) -> Result<usize, IoError> {
        let num_blocks = self.check_transfer(buffer.len(), block_offset)?;
        let start = block_offset * self.block_size;
        buffer.copy_from_slice(&self.data[start .. start + buffer.len()]);
        Ok(num_blocks)
    }

    fn write_blocks(&mut self, buffer: &[u8], block_offset: usize, _flags: WriteFlags) -> Result<usize, IoError> {
        let num_blocks = self.check_transfer(buffer.len(), block_offset)?;
        let start = block_offset * self.block_size;
        self.data[start .. start + buffer.len()].copy_from_slice(buffer);
        Ok(num_blocks)
    }

    fn discard_sectors(&mut self, sector_offset: usize, num_sectors: usize) -> Result<(), IoError> {
        let start = sector_offset * SECTOR_SIZE;
        let end = start + num_sectors * SECTOR_SIZE;
        if end > self.data.len() {
            return Err(IoError::OutOfBounds);
        }
        for byte in &mut self.data[start .. end] {
            *byte = 0;
        }
        self.discard_count += 1;
        Ok(())
    }
}
