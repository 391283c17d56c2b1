//! Garbage collection for both circular-log regions.
//!
//! The metadata-log region is compacted: live blocks in the victim section
//! are relocated to the append head before the section is discarded. The
//! mapping region needs no copying at all, because newer appends of a
//! mapping window supersede older copies; its victim section is simply
//! discarded and the tail advanced.
//!
//! Both variants run under the instance's GC mutex. Individual mapping and
//! summary updates synchronize with the write path through the mapping
//! lock, which is never held across device I/O.

use crate::summary::BlockState;
use crate::{Alfs, Error, Page};

/// Compacts the section at the metadata log's reclaim tail.
pub(crate) fn metalog_gc(alfs: &Alfs) -> Result<(), Error> {
    let _gc_guard = alfs.gc_mutex.lock();
    let geometry = &alfs.geometry;
    let blks_per_sec = geometry.blks_per_sec();

    let section_start = alfs.state.lock().metalog.start();
    if section_start % blks_per_sec != 0 {
        error!("metalog GC: tail offset {} is not section-aligned", section_start);
        return Err(Error::CorruptMapping);
    }

    for offset in section_start .. section_start + blks_per_sec {
        // Anything not live is freed in place.
        let src = {
            let mut state = alfs.state.lock();
            match state.summary.get_at_offset(offset) {
                BlockState::Free | BlockState::Invalid => {
                    state.summary.set_at_offset(offset, BlockState::Free);
                    None
                }
                BlockState::Valid => Some(geometry.metalog_base + offset),
            }
        };
        let src = match src {
            Some(src) => src,
            None => continue,
        };

        // Relocate the live block to the append head: read it, write the
        // copy, and discard the source. A failure skips the block with the
        // map, summary, and head untouched, so the live copy at `src`
        // stays authoritative; GC is best-effort per block.
        let mut page = Page::new();
        if let Err(error) = alfs.io.read_page(&mut page, src) {
            error!("metalog GC: errors occur while reading blk {}: {:?}", src, error);
            continue;
        }
        let dst = geometry.metalog_base + alfs.state.lock().metalog.end();
        if let Err(error) = alfs.io.write_page(page, dst, false) {
            error!("metalog GC: errors occur while writing blk {}: {:?}", dst, error);
            continue;
        }
        if alfs.io.trim(src, 1).is_err() {
            error!("metalog GC: errors occur while trimming blk {}", src);
            continue;
        }

        // The copy is durable; switch the mapping over to it.
        let mut state = alfs.state.lock();
        match state.map.reverse_lookup(src) {
            Some(l_ofs) => state.map.remap(l_ofs, dst),
            // CorruptMapping: the summary said live but no entry points here.
            None => error!("metalog GC: cannot find a mapped physical blk for {}", src),
        }
        state.summary.set(src, BlockState::Free);
        state.summary.set(dst, BlockState::Valid);
        state.metalog.advance_end();
    }

    // The whole victim section is dead now; discard it and advance the tail.
    if alfs.io.trim(geometry.metalog_base + section_start, blks_per_sec).is_err() {
        error!("metalog GC: errors occur while trimming the victim section at {}", section_start);
    }
    alfs.state.lock().metalog.advance_start_section(blks_per_sec);
    Ok(())
}

/// Reclaims one section of the mapping region by discard alone.
pub(crate) fn mapping_gc(alfs: &Alfs) -> Result<(), Error> {
    let _gc_guard = alfs.gc_mutex.lock();
    let blks_per_sec = alfs.geometry.blks_per_sec();
    let section_start = {
        let mut log = alfs.mapping_log.lock();
        let section_start = log.start();
        log.advance_start_section(blks_per_sec);
        section_start
    };
    if alfs.io.trim(alfs.geometry.mapping_base + section_start, blks_per_sec).is_err() {
        error!("mapping GC: errors occur while trimming the section at {}", section_start);
    }
    Ok(())
}
