//! Traits and types for block-granular storage devices.
//!
//! The important items are summarized below:
//! * [`BlockIo`]: a parent trait that specifies the block size and capacity
//!   of a block-based storage device.
//! * [`BlockDevice`]: a trait for devices that can transfer whole blocks
//!   and accept a discard (TRIM) command for a range of sectors.
//! * [`WriteFlags`]: per-write barrier/priority attributes that a device
//!   may honor, e.g., issuing a cache flush before or after the write.
//! * [`BlockDeviceRef`]: the shareable reference type used across crates,
//!   a `dyn BlockDevice` behind an `Arc<spin::Mutex<_>>`.
//!
//! Transfers are always a whole number of blocks: the length of the caller's
//! buffer dictates the transfer size and must be a multiple of the device
//! block size. Discard is the odd one out -- it addresses 512-byte sectors,
//! because that is the granularity the TRIM command operates on regardless
//! of the device's logical block size.

#![no_std]

extern crate alloc;

use alloc::{boxed::Box, sync::Arc};
use bitflags::bitflags;
use spin::Mutex;

/// Errors that can be returned from block device operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoError {
    /// An input parameter or argument was incorrect or invalid.
    InvalidInput,
    /// The operation attempted to access blocks beyond the end of the device.
    OutOfBounds,
    /// The device reported a failure while servicing the transfer.
    DeviceFault,
    /// The operation timed out and was canceled.
    TimedOut,
}

impl From<IoError> for &'static str {
    fn from(io_error: IoError) -> Self {
        match io_error {
            IoError::InvalidInput => "IoError: invalid input",
            IoError::OutOfBounds  => "IoError: out of bounds",
            IoError::DeviceFault  => "IoError: device fault",
            IoError::TimedOut     => "IoError: timed out",
        }
    }
}

bitflags! {
    /// Attributes attached to a single write request.
    ///
    /// These mirror the request flags of a conventional block layer; a device
    /// that has no volatile cache may ignore all of them.
    pub struct WriteFlags: u8 {
        /// Flush the device's volatile cache before servicing this write.
        const PREFLUSH = 0x01;
        /// This write carries filesystem metadata.
        const META     = 0x02;
        /// Service this write ahead of non-prioritized requests.
        const PRIO     = 0x04;
        /// Force unit access: the write itself must be durable on completion.
        const FUA      = 0x08;
    }
}

/// A parent trait specifying the geometry of a block-based storage device.
pub trait BlockIo {
    /// Returns the size in bytes of a single block, the minimum granularity
    /// of read/write transfers.
    fn block_size(&self) -> usize;

    /// Returns the total number of blocks on this device.
    fn num_blocks(&self) -> usize;
}

impl<B> BlockIo for Box<B> where B: BlockIo + ?Sized {
    fn block_size(&self) -> usize { (**self).block_size() }
    fn num_blocks(&self) -> usize { (**self).num_blocks() }
}
impl<B> BlockIo for &mut B where B: BlockIo + ?Sized {
    fn block_size(&self) -> usize { (**self).block_size() }
    fn num_blocks(&self) -> usize { (**self).num_blocks() }
}

/// A storage device that transfers whole blocks and supports discard.
///
/// A `BlockDevice` is not aware of any current offset; every operation names
/// the absolute block (or sector, for discard) where the transfer starts.
pub trait BlockDevice: BlockIo {
    /// Reads blocks of data from this device into the given `buffer`.
    ///
    /// The number of blocks read is dictated by the length of the given
    /// `buffer`, which must be a multiple of the block size.
    ///
    /// Returns the number of blocks read.
    fn read_blocks(&mut self, buffer: &mut [u8], block_offset: usize) -> Result<usize, IoError>;

    /// Writes blocks of data from the given `buffer` to this device.
    ///
    /// The number of blocks written is dictated by the length of the given
    /// `buffer`, which must be a multiple of the block size.
    /// The given `flags` describe the barrier semantics of this write.
    ///
    /// Returns the number of blocks written.
    fn write_blocks(&mut self, buffer: &[u8], block_offset: usize, flags: WriteFlags) -> Result<usize, IoError>;

    /// Informs the device that the given range of 512-byte sectors no longer
    /// holds live data (TRIM). The device is free to ignore the hint.
    fn discard_sectors(&mut self, sector_offset: usize, num_sectors: usize) -> Result<(), IoError>;
}

impl<B> BlockDevice for Box<B> where B: BlockDevice + ?Sized {
    fn read_blocks(&mut self, buffer: &mut [u8], block_offset: usize) -> Result<usize, IoError> {
        (**self).read_blocks(buffer, block_offset)
    }
    fn write_blocks(&mut self, buffer: &[u8], block_offset: usize, flags: WriteFlags) -> Result<usize, IoError> {
        (**self).write_blocks(buffer, block_offset, flags)
    }
    fn discard_sectors(&mut self, sector_offset: usize, num_sectors: usize) -> Result<(), IoError> {
        (**self).discard_sectors(sector_offset, num_sectors)
    }
}
impl<B> BlockDevice for &mut B where B: BlockDevice + ?Sized {
    fn read_blocks(&mut self, buffer: &mut [u8], block_offset: usize) -> Result<usize, IoError> {
        (**self).read_blocks(buffer, block_offset)
    }
    fn write_blocks(&mut self, buffer: &[u8], block_offset: usize, flags: WriteFlags) -> Result<usize, IoError> {
        (**self).write_blocks(buffer, block_offset, flags)
    }
    fn discard_sectors(&mut self, sector_offset: usize, num_sectors: usize) -> Result<(), IoError> {
        (**self).discard_sectors(sector_offset, num_sectors)
    }
}

/// A shareable reference to a block device, the type used across crate boundaries.
pub type BlockDeviceRef = Arc<Mutex<dyn BlockDevice + Send>>;
