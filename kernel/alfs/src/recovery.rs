//! Mount-time recovery of the mapping table from the on-disk mapping region.
//!
//! The mapping region is scanned section by section. Every block carrying
//! the mapping magic competes for its window; the highest version wins,
//! with ties resolved in favor of the newcomer so that re-reading the
//! latest copy is idempotent. A section in which no block won its window is
//! dead; the first such section becomes the new append head of the mapping
//! log. The summary table is then rebuilt from the recovered map, and the
//! first fully-invalid section of the metadata-log region becomes that
//! log's append head.

use crate::io::MetaIo;
use crate::mapping::{MapBlock, MappingTable, UNMAPPED};
use crate::metalog::CircularLog;
use crate::summary::{BlockState, SummaryTable};
use crate::{Error, Geometry, Page, NR_MAPPING_SECS};

/// The per-mount state reconstructed from disk.
pub(crate) struct RecoveredState {
    pub map: MappingTable,
    pub summary: SummaryTable,
    pub metalog: CircularLog,
    pub mapping_log: CircularLog,
}

pub(crate) fn recover(io: &MetaIo, geometry: &Geometry) -> Result<RecoveredState, Error> {
    let blks_per_sec = geometry.blks_per_sec();
    let nr_mapping_phys_blks = geometry.nr_mapping_phys_blks();
    let mut map = MappingTable::new(geometry.nr_metalog_logi_blks);
    let mut mapping_log = None;
    let mut page = Page::new();

    // Scan the mapping region for the newest copy of every window.
    for section in 0..NR_MAPPING_SECS {
        let mut dead = true;
        for block in 0..blks_per_sec {
            let pblk = geometry.mapping_base + section * blks_per_sec + block;
            io.read_page(&mut page, pblk)?;
            if let Some(map_block) = MapBlock::parse(page.as_slice()) {
                if map.absorb(map_block) {
                    dead = false;
                }
            }
        }
        if dead && mapping_log.is_none() {
            info!("dead mapping section detected: {}", section);
            let end = section * blks_per_sec;
            let start = (end + blks_per_sec) % nr_mapping_phys_blks;
            mapping_log = Some(CircularLog::new(start, end, nr_mapping_phys_blks));
            let _ = io.trim(geometry.mapping_base + end, blks_per_sec);
        }
    }
    let mapping_log = mapping_log.ok_or_else(|| {
        error!("there is no free space for the mapping table");
        Error::NoFreeMapSpace
    })?;

    // Rebuild the summary: every mapped physical block in the region is live.
    let mut summary = SummaryTable::new(geometry.metalog_base, geometry.nr_metalog_phys_blks);
    for window in map.windows() {
        for &entry in window.mapping.iter() {
            if entry == UNMAPPED {
                continue;
            }
            if geometry.contains_physical(entry) {
                summary.set(entry, BlockState::Valid);
            } else {
                warn!("recovered mapping entry {} is outside the metadata log", entry);
            }
        }
    }

    // The metadata log resumes at the first section with no live blocks.
    let mut metalog = None;
    for section in 0 .. geometry.nr_metalog_phys_blks / blks_per_sec {
        let section_start = section * blks_per_sec;
        if summary.section_is_dead(section_start, blks_per_sec) {
            let start = (section_start + blks_per_sec) % geometry.nr_metalog_phys_blks;
            summary.clear_section(section_start, blks_per_sec);
            let _ = io.trim(geometry.metalog_base + section_start, blks_per_sec);
            metalog = Some(CircularLog::new(start, section_start, geometry.nr_metalog_phys_blks));
            break;
        }
    }
    let metalog = metalog.ok_or_else(|| {
        error!("cannot find a dead section in the metadata log");
        Error::NoFreeMetaSpace
    })?;

    info!("recovered mapping log: start {} end {}", mapping_log.start(), mapping_log.end());
    info!("recovered metadata log: start {} end {}", metalog.start(), metalog.end());

    Ok(RecoveredState { map, summary, metalog, mapping_log })
}
