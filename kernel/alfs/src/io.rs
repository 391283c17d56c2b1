//! Device I/O primitives for the remapper.
//!
//! All metadata writes go out with write-barrier attributes (`PREFLUSH`,
//! `META`, `PRIO`, and `FUA` unless the mount disables barriers). Reads
//! hold the read side of the read semaphore and writes hold the write side
//! of the write semaphore, ordering single-page transfers at this layer.
//!
//! Each submission builds an [`IoContext`] that owns the transfer's pages;
//! the completion path releases them and, for synchronous calls, signals
//! the submitter's [`Completion`]. No buffer outlives its request.

use alloc::vec::Vec;
use block_device::{BlockDeviceRef, WriteFlags};
use spin::RwLock;
use crate::request::Completion;
use crate::{Error, MountFlags, Page, SECTORS_PER_BLOCK};

/// Outcome of a trim request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrimStatus {
    /// The device was told to discard the range.
    Issued,
    /// Discard support is disabled; nothing was sent. Treated as success.
    NotIssued,
}

/// Completion context for one write submission. Owns the pages for the
/// duration of the transfer and releases them in [`end_io`].
///
/// [`end_io`]: IoContext::end_io
struct IoContext<'a> {
    pages: Vec<Page>,
    waiter: Option<&'a Completion>,
}

impl<'a> IoContext<'a> {
    fn new(pages: Vec<Page>, waiter: Option<&'a Completion>) -> IoContext<'a> {
        IoContext { pages, waiter }
    }

    /// Releases the owned pages and signals the waiter, if any.
    fn end_io(&mut self) {
        self.pages.clear();
        if let Some(waiter) = self.waiter {
            waiter.complete();
        }
    }
}

/// The primitive I/O layer: a shared device plus the two semaphores that
/// order reads and writes issued by the remapper.
pub(crate) struct MetaIo {
    device: BlockDeviceRef,
    options: MountFlags,
    read_sem: RwLock<()>,
    write_sem: RwLock<()>,
}

impl MetaIo {
    pub fn new(device: BlockDeviceRef, options: MountFlags) -> MetaIo {
        MetaIo {
            device,
            options,
            read_sem: RwLock::new(()),
            write_sem: RwLock::new(()),
        }
    }

    fn barrier_flags(&self) -> WriteFlags {
        let mut flags = WriteFlags::PREFLUSH | WriteFlags::META | WriteFlags::PRIO;
        if !self.options.contains(MountFlags::NO_BARRIER) {
            flags |= WriteFlags::FUA;
        }
        flags
    }

    /// Synchronously reads one block at physical address `pblk` into `page`.
    pub fn read_page(&self, page: &mut Page, pblk: u32) -> Result<(), Error> {
        let _read_guard = self.read_sem.read();
        self.device.lock().read_blocks(page.as_mut_slice(), pblk as usize)?;
        Ok(())
    }

    /// Writes one block at physical address `pblk` with barrier semantics.
    ///
    /// The page is owned by the submission's completion context and freed
    /// when the transfer retires; if `sync`, the call returns only after
    /// the completion has been signaled.
    pub fn write_page(&self, page: Page, pblk: u32, sync: bool) -> Result<(), Error> {
        let _write_guard = self.write_sem.write();
        let wait = Completion::new();
        let mut context = IoContext::new(vec![page], if sync { Some(&wait) } else { None });
        let result = {
            let mut device = self.device.lock();
            device
                .write_blocks(context.pages[0].as_slice(), pblk as usize, self.barrier_flags())
                .map(|_| ())
                .map_err(Error::from)
        };
        context.end_io();
        if sync {
            wait.wait();
        }
        result
    }

    /// Writes a pre-assembled multi-page run to consecutive physical blocks
    /// starting at `start_pblk`, in submission order.
    pub fn write_run(&self, pages: Vec<Page>, start_pblk: u32, sync: bool) -> Result<(), Error> {
        let _write_guard = self.write_sem.write();
        let wait = Completion::new();
        let mut context = IoContext::new(pages, if sync { Some(&wait) } else { None });
        let mut result = Ok(());
        {
            let mut device = self.device.lock();
            let flags = self.barrier_flags();
            for (i, page) in context.pages.iter().enumerate() {
                if let Err(error) = device.write_blocks(page.as_slice(), start_pblk as usize + i, flags) {
                    result = Err(Error::from(error));
                    break;
                }
            }
        }
        context.end_io();
        if sync {
            wait.wait();
        }
        result
    }

    /// Discards `nr_blks` blocks starting at physical address `pblk`,
    /// if the mount enabled the discard option.
    pub fn trim(&self, pblk: u32, nr_blks: u32) -> Result<TrimStatus, Error> {
        if !self.options.contains(MountFlags::DISCARD) {
            return Ok(TrimStatus::NotIssued);
        }
        self.device.lock().discard_sectors(
            pblk as usize * SECTORS_PER_BLOCK,
            nr_blks as usize * SECTORS_PER_BLOCK,
        )?;
        Ok(TrimStatus::Issued)
    }

    /// Reads one block at its host-visible address, bypassing the remap
    /// semaphores and barrier flags: used for pass-through requests.
    pub fn read_page_through(&self, page: &mut Page, blk: u32) -> Result<(), Error> {
        self.device.lock().read_blocks(page.as_mut_slice(), blk as usize)?;
        Ok(())
    }

    /// Writes one block at its host-visible address unchanged, for
    /// pass-through requests.
    pub fn write_page_through(&self, page: &Page, blk: u32) -> Result<(), Error> {
        self.device.lock().write_blocks(page.as_slice(), blk as usize, WriteFlags::empty())?;
        Ok(())
    }
}
