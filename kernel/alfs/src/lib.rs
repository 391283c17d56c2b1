//! An append-log remapper for filesystem metadata.
//!
//! A log-structured filesystem rewrites its metadata blocks in place within
//! a fixed logical range, which concentrates flash wear on a handful of
//! addresses. This crate sits between the filesystem and the block device
//! and transparently relocates every metadata write to a fresh physical
//! block inside a larger physical region, spreading the wear evenly.
//!
//! The important pieces:
//! * [`Alfs`]: one mounted instance. Created with [`Alfs::mount`], which
//!   rebuilds the logical-to-physical map from the on-disk mapping region.
//! * [`MetaRequest`]: a bio-like batch of block I/O submitted through
//!   [`Alfs::submit`] (or [`Alfs::submit_merged`], which coalesces a write
//!   batch into one sequential device request when possible). Requests for
//!   addresses outside the metadata logical range pass through unchanged.
//! * The mapping table: windows of 1020 logical entries, each persisted as
//!   a versioned mapping block appended to a dedicated mapping region.
//!   A write to the checkpoint block flushes all dirty windows, so the
//!   on-disk map is always at least as fresh as the last checkpoint.
//! * Garbage collection: both the metadata log and the mapping region are
//!   circular logs reclaimed a section at a time, compacting live blocks
//!   (metadata log) or relying on version supersession (mapping region).
//!
//! ## Example
//! ```rust,ignore
//! let device: BlockDeviceRef = Arc::new(Mutex::new(disk));
//! let alfs = Alfs::mount(device, geometry, MountFlags::DISCARD)?;
//! let mut write = MetaRequest::new_write(sector, pages, true);
//! alfs.submit(&mut write)?;
//! ```

#![no_std]

#[macro_use] extern crate alloc;
#[macro_use] extern crate log;

mod error;
mod gc;
mod io;
mod mapping;
mod metalog;
mod page;
mod recovery;
mod remap;
mod request;
mod summary;

pub use error::Error;
pub use io::TrimStatus;
pub use mapping::{ENTRIES_PER_MAP_BLOCK, UNMAPPED};
pub use page::Page;
pub use request::{Completion, MetaOp, MetaRequest};
pub use summary::BlockState;

use bitflags::bitflags;
use block_device::BlockDeviceRef;
use spin::Mutex;
use crate::io::MetaIo;
use crate::mapping::MappingTable;
use crate::metalog::CircularLog;
use crate::summary::SummaryTable;

/// Size in bytes of one block, the unit of addressing and transfer.
pub const BLOCK_SIZE: usize = 4096;
/// Size in bytes of one sector; discard ranges are expressed in sectors.
pub const SECTOR_SIZE: usize = 512;
pub const SECTORS_PER_BLOCK: usize = BLOCK_SIZE / SECTOR_SIZE;
/// Length of the mapping region, in sections.
pub const NR_MAPPING_SECS: u32 = 8;

bitflags! {
    /// Mount-time options consumed from the host.
    pub struct MountFlags: u8 {
        /// Omit FUA on metadata writes; the preflush is retained.
        const NO_BARRIER = 0x01;
        /// Emit TRIM when blocks are reclaimed; otherwise trims are skipped.
        const DISCARD    = 0x02;
    }
}

/// Geometry of the two on-disk regions, as provided by the host filesystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    /// First block of the mapping region.
    pub mapping_base: u32,
    /// First block of the metadata-log region; also the base of the host's
    /// metadata logical range.
    pub metalog_base: u32,
    pub blocks_per_seg: u32,
    pub segs_per_sec: u32,
    /// Length of the host-visible metadata logical range, in blocks.
    pub nr_metalog_logi_blks: u32,
    /// Length of the physical metadata-log region, in blocks. Must be
    /// section-aligned and leave at least one spare section beyond the
    /// logical range.
    pub nr_metalog_phys_blks: u32,
    /// Logical address whose write (and that address plus one segment)
    /// triggers a flush of dirty mapping windows.
    pub checkpoint_blkaddr: u32,
}

impl Geometry {
    /// Blocks per section, the unit of erase/reclaim.
    pub fn blks_per_sec(&self) -> u32 {
        self.segs_per_sec * self.blocks_per_seg
    }

    /// Length of the mapping region, in blocks.
    pub fn nr_mapping_phys_blks(&self) -> u32 {
        NR_MAPPING_SECS * self.blks_per_sec()
    }

    /// Whether `lblk` lies in the host-visible metadata logical range.
    pub fn contains_logical(&self, lblk: u32) -> bool {
        lblk >= self.metalog_base && lblk < self.metalog_base + self.nr_metalog_logi_blks
    }

    /// Whether `pblk` lies in the physical metadata-log region.
    pub fn contains_physical(&self, pblk: u32) -> bool {
        pblk >= self.metalog_base && pblk < self.metalog_base + self.nr_metalog_phys_blks
    }

    /// Whether a write to `lblk` is a checkpoint write. The host keeps two
    /// checkpoint packs, one segment apart.
    pub fn is_checkpoint_block(&self, lblk: u32) -> bool {
        lblk == self.checkpoint_blkaddr || lblk == self.checkpoint_blkaddr + self.blocks_per_seg
    }

    fn validate(&self) -> Result<(), Error> {
        let blks_per_sec = self.blks_per_sec();
        if blks_per_sec == 0 || self.nr_metalog_logi_blks == 0 {
            error!("geometry: empty section or logical range");
            return Err(Error::InvalidAddress);
        }
        if self.nr_metalog_phys_blks % blks_per_sec != 0 {
            error!("geometry: physical region is not section-aligned");
            return Err(Error::InvalidAddress);
        }
        if self.nr_metalog_phys_blks < self.nr_metalog_logi_blks + blks_per_sec {
            error!("geometry: physical region leaves no spare section for GC");
            return Err(Error::InvalidAddress);
        }
        Ok(())
    }
}

/// State guarded by the mapping lock: the L2P map, the summary table, and
/// the metadata log's pointers move together under one spinlock, which is
/// never held across device I/O.
pub(crate) struct MetaState {
    pub(crate) map: MappingTable,
    pub(crate) summary: SummaryTable,
    pub(crate) metalog: CircularLog,
}

/// One mounted remapper instance.
///
/// All state is per-instance; there are no globals. The instance is `Sync`
/// and operations may be invoked concurrently from multiple submitters.
pub struct Alfs {
    pub(crate) geometry: Geometry,
    pub(crate) io: MetaIo,
    pub(crate) state: Mutex<MetaState>,
    pub(crate) mapping_log: Mutex<CircularLog>,
    pub(crate) gc_mutex: Mutex<()>,
}

impl Alfs {
    /// Mounts the remapper on `device`, rebuilding the mapping table,
    /// summary table, and both circular logs from the mapping region.
    ///
    /// Fails with [`Error::NoFreeMapSpace`] / [`Error::NoFreeMetaSpace`]
    /// when either region lacks a dead section to resume logging into.
    pub fn mount(device: BlockDeviceRef, geometry: Geometry, options: MountFlags) -> Result<Alfs, Error> {
        geometry.validate()?;

        info!("--------------------------------");
        info!(" * mapping region base: {} ({} blks)", geometry.mapping_base, geometry.nr_mapping_phys_blks());
        info!(" * metalog region base: {}", geometry.metalog_base);
        info!(" * # of blks per sec: {}", geometry.blks_per_sec());
        info!(" * # of logical meta-log blks: {}", geometry.nr_metalog_logi_blks);
        info!(" * # of physical meta-log blks: {}", geometry.nr_metalog_phys_blks);
        info!(" * the range of logical meta address: {} - {}",
            geometry.metalog_base, geometry.metalog_base + geometry.nr_metalog_logi_blks);
        info!(" * the range of physical meta address: {} - {}",
            geometry.metalog_base, geometry.metalog_base + geometry.nr_metalog_phys_blks);

        let io = MetaIo::new(device, options);
        let recovered = recovery::recover(&io, &geometry)?;

        Ok(Alfs {
            geometry,
            io,
            state: Mutex::new(MetaState {
                map: recovered.map,
                summary: recovered.summary,
                metalog: recovered.metalog,
            }),
            mapping_log: Mutex::new(recovered.mapping_log),
            gc_mutex: Mutex::new(()),
        })
    }

    /// Submits a request, writing each remapped page as its own device
    /// request. The request is retired through its completion; the final
    /// status is also returned for convenience.
    pub fn submit(&self, request: &mut MetaRequest) -> Result<(), Error> {
        remap::submit(self, request, false)
    }

    /// Submits a request like [`submit`], but a remapped write batch is
    /// coalesced into one sequential device request when the allocator
    /// hands out consecutive physical blocks.
    ///
    /// [`submit`]: Alfs::submit
    pub fn submit_merged(&self, request: &mut MetaRequest) -> Result<(), Error> {
        remap::submit(self, request, true)
    }

    /// Flushes every dirty mapping window to the mapping region,
    /// advancing each window's version.
    ///
    /// After this returns, recovery will reconstruct at least the mapping
    /// state as of the call.
    pub fn flush_mapping(&self) -> Result<(), Error> {
        let pages = self.state.lock().map.serialize_dirty();
        for page in pages {
            self.append_mapping_block(page)?;
        }
        Ok(())
    }

    /// Appends one serialized mapping window to the mapping log,
    /// reclaiming a section first when free space has fallen to one
    /// section or less.
    fn append_mapping_block(&self, page: Page) -> Result<(), Error> {
        let blks_per_sec = self.geometry.blks_per_sec();
        let dst = {
            let need_gc = {
                let log = self.mapping_log.lock();
                log.free_blocks()? <= blks_per_sec
            };
            if need_gc {
                gc::mapping_gc(self)?;
            }
            let mut log = self.mapping_log.lock();
            let dst = self.geometry.mapping_base + log.end();
            log.advance_end();
            dst
        };
        self.io.write_page(page, dst, false)
    }

    /// Runs one round of metadata-log GC, compacting the section at the
    /// reclaim tail. The write path triggers this automatically; it is
    /// exposed for hosts that reclaim proactively.
    pub fn run_gc(&self) -> Result<(), Error> {
        gc::metalog_gc(self)
    }

    /// Flushes dirty mapping windows and consumes the instance.
    pub fn unmount(self) -> Result<(), Error> {
        self.flush_mapping()
    }

    /// The physical block currently backing logical address `lblk`,
    /// or `None` if it is unmapped (or mapped outside the region).
    pub fn lookup(&self, lblk: u32) -> Option<u32> {
        if !self.geometry.contains_logical(lblk) {
            return None;
        }
        let state = self.state.lock();
        state
            .map
            .lookup(lblk - self.geometry.metalog_base)
            .filter(|&pblk| self.geometry.contains_physical(pblk))
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    /// Summary state of the physical block `pblk`, or `None` when `pblk`
    /// lies outside the metadata-log region.
    pub fn block_state(&self, pblk: u32) -> Option<BlockState> {
        if !self.geometry.contains_physical(pblk) {
            return None;
        }
        Some(self.state.lock().summary.get(pblk))
    }

    /// Current (tail, head) offsets of the metadata log.
    pub fn metalog_offsets(&self) -> (u32, u32) {
        let state = self.state.lock();
        (state.metalog.start(), state.metalog.end())
    }

    /// Current (tail, head) offsets of the mapping log.
    pub fn mapping_offsets(&self) -> (u32, u32) {
        let log = self.mapping_log.lock();
        (log.start(), log.end())
    }

    /// Free blocks remaining in the metadata log.
    pub fn metalog_free_blks(&self) -> Result<u32, Error> {
        self.state.lock().metalog.free_blocks()
    }

    /// Version of the mapping window covering logical address `lblk`,
    /// or `None` when `lblk` lies outside the metadata logical range.
    pub fn mapping_version(&self, lblk: u32) -> Option<u32> {
        if !self.geometry.contains_logical(lblk) {
            return None;
        }
        let window = ((lblk - self.geometry.metalog_base) as usize) / ENTRIES_PER_MAP_BLOCK;
        Some(self.state.lock().map.windows()[window].ver)
    }
}
