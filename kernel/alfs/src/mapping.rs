//! The in-memory L2P mapping table and its on-disk mapping-block record.
//!
//! The global map is split into windows of [`ENTRIES_PER_MAP_BLOCK`] logical
//! entries; each window is persisted as one block-sized record carrying a
//! magic tag, the window's starting entry index, and a monotonic version
//! number. Newer appends of the same window supersede older on-disk copies;
//! recovery keeps the highest version per window, which is what lets the
//! mapping region be reclaimed by whole-section discard without copying.

use alloc::vec::Vec;
use byteorder::{ByteOrder, LittleEndian};
use crate::{Page, BLOCK_SIZE};

/// Number of L2P entries carried by one mapping block.
pub const ENTRIES_PER_MAP_BLOCK: usize = 1020;

/// The sentinel entry value meaning "no physical block assigned".
pub const UNMAPPED: u32 = 0xFFFF_FFFF;

/// Magic tag identifying an on-disk mapping block.
const MAP_BLOCK_MAGIC: u32 = 0xEF;

/// Byte length of the record header: magic, index, ver, dirty.
const HEADER_LEN: usize = 16;

/// One window of the mapping table: entries `[index .. index + 1019]`.
pub struct MapBlock {
    /// Starting logical entry offset of this window; a multiple of
    /// [`ENTRIES_PER_MAP_BLOCK`].
    pub index: u32,
    /// Monotonic version, advanced each time the window is flushed.
    pub ver: u32,
    /// Whether the window has unflushed changes. In-memory only.
    pub dirty: bool,
    /// Physical block addresses, [`UNMAPPED`] where no block is assigned.
    pub mapping: [u32; ENTRIES_PER_MAP_BLOCK],
}

impl MapBlock {
    fn new(window: u32) -> MapBlock {
        MapBlock {
            index: window * ENTRIES_PER_MAP_BLOCK as u32,
            ver: 0,
            dirty: false,
            mapping: [UNMAPPED; ENTRIES_PER_MAP_BLOCK],
        }
    }

    /// Serializes this window into an on-disk record.
    /// The `dirty` word is persisted as zero and ignored on read.
    pub fn serialize(&self) -> Page {
        let mut page = Page::new();
        let buf = page.as_mut_slice();
        LittleEndian::write_u32(&mut buf[0..4], MAP_BLOCK_MAGIC);
        LittleEndian::write_u32(&mut buf[4..8], self.index);
        LittleEndian::write_u32(&mut buf[8..12], self.ver);
        LittleEndian::write_u32(&mut buf[12..16], 0);
        LittleEndian::write_u32_into(&self.mapping, &mut buf[HEADER_LEN..BLOCK_SIZE]);
        page
    }

    /// Parses an on-disk record, returning `None` if the magic tag is absent.
    pub fn parse(buf: &[u8]) -> Option<MapBlock> {
        if LittleEndian::read_u32(&buf[0..4]) != MAP_BLOCK_MAGIC {
            return None;
        }
        let mut block = MapBlock {
            index: LittleEndian::read_u32(&buf[4..8]),
            ver: LittleEndian::read_u32(&buf[8..12]),
            dirty: false,
            mapping: [UNMAPPED; ENTRIES_PER_MAP_BLOCK],
        };
        LittleEndian::read_u32_into(&buf[HEADER_LEN..BLOCK_SIZE], &mut block.mapping);
        Some(block)
    }
}

/// The in-memory mapping table: one [`MapBlock`] per window of the
/// metadata logical range. All addresses are entry offsets relative to
/// `metalog_base`; absolute physical addresses are stored in the entries.
pub struct MappingTable {
    blocks: Vec<MapBlock>,
}

impl MappingTable {
    /// Creates a table covering `nr_logi_blks` logical blocks, all unmapped.
    pub fn new(nr_logi_blks: u32) -> MappingTable {
        let nr_windows = nr_windows_for(nr_logi_blks);
        let mut blocks = Vec::with_capacity(nr_windows as usize);
        for window in 0..nr_windows {
            blocks.push(MapBlock::new(window));
        }
        MappingTable { blocks }
    }

    pub fn nr_windows(&self) -> u32 {
        self.blocks.len() as u32
    }

    /// The raw entry for logical offset `l_ofs`, [`UNMAPPED`] included.
    pub fn raw_entry(&self, l_ofs: u32) -> u32 {
        let (window, slot) = split(l_ofs);
        self.blocks[window].mapping[slot]
    }

    /// Looks up the physical address mapped to logical offset `l_ofs`,
    /// translating the [`UNMAPPED`] sentinel to `None`.
    pub fn lookup(&self, l_ofs: u32) -> Option<u32> {
        match self.raw_entry(l_ofs) {
            UNMAPPED => None,
            pblk => Some(pblk),
        }
    }

    /// Maps logical offset `l_ofs` to physical address `pblk`, marking the
    /// owning window dirty. Returns the previous raw entry. The window's
    /// version is untouched; it advances only when the window is flushed.
    pub fn assign(&mut self, l_ofs: u32, pblk: u32) -> u32 {
        let (window, slot) = split(l_ofs);
        let block = &mut self.blocks[window];
        let prev = block.mapping[slot];
        block.mapping[slot] = pblk;
        block.dirty = true;
        prev
    }

    /// Finds the logical offset currently mapped to `pblk` by scanning all
    /// entries linearly, as GC does when relocating a block.
    pub fn reverse_lookup(&self, pblk: u32) -> Option<u32> {
        for (window, block) in self.blocks.iter().enumerate() {
            for (slot, &entry) in block.mapping.iter().enumerate() {
                if entry == pblk {
                    return Some((window * ENTRIES_PER_MAP_BLOCK + slot) as u32);
                }
            }
        }
        None
    }

    /// Remaps the entry found by [`reverse_lookup`] during GC relocation.
    ///
    /// [`reverse_lookup`]: MappingTable::reverse_lookup
    pub fn remap(&mut self, l_ofs: u32, pblk: u32) {
        self.assign(l_ofs, pblk);
    }

    /// Accepts a window read back from disk during recovery if its version
    /// is at least the version already held, so that re-reading the latest
    /// copy never regresses the table. Returns whether it was accepted.
    pub fn absorb(&mut self, block: MapBlock) -> bool {
        let window = (block.index as usize) / ENTRIES_PER_MAP_BLOCK;
        match self.blocks.get_mut(window) {
            Some(held) if block.ver >= held.ver => {
                *held = block;
                true
            }
            _ => false,
        }
    }

    /// Serializes every dirty window for appending to the mapping log,
    /// advancing each window's version and clearing its dirty flag.
    pub fn serialize_dirty(&mut self) -> Vec<Page> {
        let mut pages = Vec::new();
        for block in self.blocks.iter_mut() {
            if !block.dirty {
                continue;
            }
            block.ver += 1;
            block.dirty = false;
            pages.push(block.serialize());
        }
        pages
    }

    pub fn windows(&self) -> &[MapBlock] {
        &self.blocks
    }
}

/// Number of mapping windows needed to cover `nr_logi_blks` entries.
pub fn nr_windows_for(nr_logi_blks: u32) -> u32 {
    (nr_logi_blks + ENTRIES_PER_MAP_BLOCK as u32 - 1) / ENTRIES_PER_MAP_BLOCK as u32
}

fn split(l_ofs: u32) -> (usize, usize) {
    let l_ofs = l_ofs as usize;
    (l_ofs / ENTRIES_PER_MAP_BLOCK, l_ofs % ENTRIES_PER_MAP_BLOCK)
}

#[cfg(test)]
mod test {
    extern crate std;
    use super::*;

    #[test]
    fn record_layout_fills_one_block() {
        assert_eq!(HEADER_LEN + 4 * ENTRIES_PER_MAP_BLOCK, BLOCK_SIZE);
    }

    #[test]
    fn new_table_is_unmapped_and_clean() {
        let table = MappingTable::new(2100);
        assert_eq!(table.nr_windows(), 3);
        assert_eq!(table.lookup(0), None);
        assert_eq!(table.lookup(2099), None);
        assert!(table.windows().iter().all(|b| !b.dirty && b.ver == 0));
        assert_eq!(table.windows()[2].index, 2040);
    }

    #[test]
    fn assign_sets_entry_and_dirties_only_its_window() {
        let mut table = MappingTable::new(2100);
        let prev = table.assign(1021, 7777);
        assert_eq!(prev, UNMAPPED);
        assert_eq!(table.lookup(1021), Some(7777));
        assert!(table.windows()[1].dirty);
        assert!(!table.windows()[0].dirty);
        // versions advance only on flush
        assert_eq!(table.windows()[1].ver, 0);
    }

    #[test]
    fn assign_returns_previous_mapping() {
        let mut table = MappingTable::new(32);
        table.assign(3, 1000);
        assert_eq!(table.assign(3, 1001), 1000);
    }

    #[test]
    fn reverse_lookup_finds_the_owner() {
        let mut table = MappingTable::new(2100);
        table.assign(1500, 4242);
        assert_eq!(table.reverse_lookup(4242), Some(1500));
        assert_eq!(table.reverse_lookup(4243), None);
    }

    #[test]
    fn serialized_record_parses_back() {
        let mut table = MappingTable::new(32);
        table.assign(0, 1000);
        let pages = table.serialize_dirty();
        assert_eq!(pages.len(), 1);
        assert!(!table.windows()[0].dirty);
        assert_eq!(table.windows()[0].ver, 1);

        let block = MapBlock::parse(pages[0].as_slice()).expect("magic missing");
        assert_eq!(block.index, 0);
        assert_eq!(block.ver, 1);
        assert_eq!(block.mapping[0], 1000);
        assert!(block.mapping[1..].iter().all(|&e| e == UNMAPPED));
    }

    #[test]
    fn parse_rejects_foreign_blocks() {
        let page = Page::new();
        assert!(MapBlock::parse(page.as_slice()).is_none());
    }

    #[test]
    fn serialize_dirty_skips_clean_windows() {
        let mut table = MappingTable::new(2100);
        table.assign(0, 9);
        table.assign(2050, 10);
        let pages = table.serialize_dirty();
        assert_eq!(pages.len(), 2);
        // window 1 stayed clean, so its version did not advance
        assert_eq!(table.windows()[1].ver, 0);
        assert!(table.serialize_dirty().is_empty());
    }

    #[test]
    fn absorb_keeps_newest_version() {
        let mut table = MappingTable::new(32);
        let mut newer = MapBlock::new(0);
        newer.ver = 2;
        newer.mapping[0] = 1003;
        assert!(table.absorb(newer));
        assert_eq!(table.lookup(0), Some(1003));

        let mut stale = MapBlock::new(0);
        stale.ver = 1;
        stale.mapping[0] = 1001;
        assert!(!table.absorb(stale));
        assert_eq!(table.lookup(0), Some(1003));

        // an equal version is accepted, so re-reading the latest copy
        // is idempotent rather than a regression
        let mut equal = MapBlock::new(0);
        equal.ver = 2;
        equal.mapping[0] = 1005;
        assert!(table.absorb(equal));
        assert_eq!(table.lookup(0), Some(1005));
    }

    #[test]
    fn absorb_rejects_out_of_range_windows() {
        let mut table = MappingTable::new(32);
        let mut foreign = MapBlock::new(5);
        foreign.ver = 9;
        assert!(!table.absorb(foreign));
    }
}
