//! The remap front-end: intercepts batched block requests and redirects
//! metadata traffic through the L2P map.
//!
//! A write to the checkpoint block first flushes the dirty mapping windows,
//! so that recovery is guaranteed to see at least the mapping state as of
//! that checkpoint. Requests outside the metadata logical range pass
//! through to the device unchanged. Metadata writes are redirected to
//! freshly allocated log blocks; metadata reads resolve through the map.

use alloc::vec::Vec;
use crate::mapping::UNMAPPED;
use crate::summary::BlockState;
use crate::{gc, Alfs, Error, MetaOp, MetaRequest, Page};
use block_device::IoError;

/// Services one request and retires it through its completion.
pub(crate) fn submit(alfs: &Alfs, request: &mut MetaRequest, merged: bool) -> Result<(), Error> {
    let result = dispatch(alfs, request, merged);
    request.end_io(result);
    result
}

fn dispatch(alfs: &Alfs, request: &mut MetaRequest, merged: bool) -> Result<(), Error> {
    let start_blk = request.start_block();

    // A checkpoint write means every mapping change before it must be
    // durable before the checkpoint itself lands.
    if alfs.geometry.is_checkpoint_block(start_blk) {
        alfs.flush_mapping()?;
    }

    if !alfs.geometry.contains_logical(start_blk) {
        return pass_through(alfs, request);
    }

    match request.op() {
        MetaOp::Write => {
            if merged {
                write_merged(alfs, request)
            } else {
                write_pages(alfs, request)
            }
        }
        MetaOp::Read | MetaOp::ReadAhead => read_pages(alfs, request),
        other => {
            warn!("unknown request type {:?} for metadata range, passing through", other);
            pass_through(alfs, request)
        }
    }
}

/// Forwards a request to the device without remapping.
fn pass_through(alfs: &Alfs, request: &mut MetaRequest) -> Result<(), Error> {
    let start_blk = request.start_block();
    match request.op() {
        MetaOp::Write => {
            for (i, page) in request.pages().iter().enumerate() {
                alfs.io.write_page_through(page, start_blk + i as u32)?;
            }
        }
        MetaOp::Read | MetaOp::ReadAhead => {
            for (i, page) in request.pages_mut().iter_mut().enumerate() {
                alfs.io.read_page_through(page, start_blk + i as u32)?;
            }
        }
        MetaOp::Flush => {}
    }
    Ok(())
}

/// Allocates a fresh physical block for logical offset `l_ofs` and switches
/// the mapping over to it, all under the mapping lock. The superseded
/// physical block, if any, is returned so the caller can discard it
/// outside the lock.
///
/// GC runs whenever free space has fallen to one section or less, keeping a
/// full section of headroom ahead of the append head: a GC round relocates
/// at most one section of live blocks, so with that headroom the head can
/// never run into the victim section. A nearly-empty log is exempt (GC
/// there would only lap the head), and a log that stays starved after a
/// full lap of GC rounds is exhausted.
fn allocate_block(alfs: &Alfs, l_ofs: u32) -> Result<(u32, Option<u32>), Error> {
    let blks_per_sec = alfs.geometry.blks_per_sec();
    let nr_sections = alfs.geometry.nr_metalog_phys_blks / blks_per_sec;
    let mut gc_rounds = 0;
    loop {
        {
            let mut state = alfs.state.lock();
            let free = state.metalog.free_blocks()?;
            let len = state.metalog.len();
            let can_allocate = free > blks_per_sec
                || free >= len - blks_per_sec
                || (gc_rounds >= nr_sections && free >= 2);
            if can_allocate {
                let end = state.metalog.end();
                if state.summary.get_at_offset(end) != BlockState::Free {
                    error!(
                        "metalog end {} is NOT free: summary = {:?}",
                        end,
                        state.summary.get_at_offset(end)
                    );
                    return Err(Error::Exhausted);
                }
                let pblk = alfs.geometry.metalog_base + end;

                let prev = state.map.assign(l_ofs, pblk);
                let superseded = if prev != UNMAPPED && alfs.geometry.contains_physical(prev) {
                    state.summary.set(prev, BlockState::Invalid);
                    Some(prev)
                } else {
                    if prev != UNMAPPED && prev != 0 {
                        error!("invalid previous mapping {} for entry {}", prev, l_ofs);
                    }
                    None
                };

                state.summary.set(pblk, BlockState::Valid);
                state.metalog.advance_end();
                return Ok((pblk, superseded));
            }
            if gc_rounds >= nr_sections {
                error!("metadata log exhausted: GC could not free a section");
                return Err(Error::Exhausted);
            }
        }
        gc::metalog_gc(alfs)?;
        gc_rounds += 1;
    }
}

/// Remaps and writes each page of the batch as its own device request.
fn write_pages(alfs: &Alfs, request: &mut MetaRequest) -> Result<(), Error> {
    let start_blk = request.start_block();
    let sync = request.is_sync();
    for (i, page) in request.pages().iter().enumerate() {
        let lblk = start_blk + i as u32;
        if !alfs.geometry.contains_logical(lblk) {
            error!("write batch runs past the metadata logical range at {}", lblk);
            return Err(Error::Io(IoError::OutOfBounds));
        }
        let (pblk, superseded) = allocate_block(alfs, lblk - alfs.geometry.metalog_base)?;
        if let Some(old_pblk) = superseded {
            if alfs.io.trim(old_pblk, 1).is_err() {
                error!("errors occur while trimming superseded blk {}", old_pblk);
            }
        }
        let mut copy = Page::new();
        copy.copy_from_page(page);
        alfs.io.write_page(copy, pblk, sync)?;
    }
    Ok(())
}

/// Remaps the whole batch first, then writes it as a single sequential
/// device request when the allocator produced consecutive physical blocks.
/// A run that wraps the region boundary falls back to per-page writes.
fn write_merged(alfs: &Alfs, request: &mut MetaRequest) -> Result<(), Error> {
    let start_blk = request.start_block();
    let sync = request.is_sync();
    if request.pages().is_empty() {
        return Ok(());
    }

    let mut copies = Vec::with_capacity(request.pages().len());
    let mut pblks = Vec::with_capacity(request.pages().len());
    let mut superseded = Vec::new();
    for (i, page) in request.pages().iter().enumerate() {
        let lblk = start_blk + i as u32;
        if !alfs.geometry.contains_logical(lblk) {
            error!("write batch runs past the metadata logical range at {}", lblk);
            return Err(Error::Io(IoError::OutOfBounds));
        }
        let (pblk, old_pblk) = allocate_block(alfs, lblk - alfs.geometry.metalog_base)?;
        if let Some(old_pblk) = old_pblk {
            superseded.push(old_pblk);
        }
        let mut copy = Page::new();
        copy.copy_from_page(page);
        copies.push(copy);
        pblks.push(pblk);
    }
    for old_pblk in superseded {
        if alfs.io.trim(old_pblk, 1).is_err() {
            error!("errors occur while trimming superseded blk {}", old_pblk);
        }
    }

    let contiguous = pblks.windows(2).all(|pair| pair[1] == pair[0] + 1);
    if contiguous {
        alfs.io.write_run(copies, pblks[0], sync)
    } else {
        for (copy, pblk) in copies.into_iter().zip(pblks) {
            alfs.io.write_page(copy, pblk, sync)?;
        }
        Ok(())
    }
}

/// Resolves each page of the batch through the map and reads it into the
/// caller's pages via one scratch buffer.
fn read_pages(alfs: &Alfs, request: &mut MetaRequest) -> Result<(), Error> {
    let start_blk = request.start_block();
    let mut scratch = Page::new();
    for i in 0..request.pages().len() {
        let lblk = start_blk + i as u32;
        if !alfs.geometry.contains_logical(lblk) {
            error!("read batch runs past the metadata logical range at {}", lblk);
            return Err(Error::Io(IoError::OutOfBounds));
        }
        let pblk = resolve_mapped(alfs, lblk)?;
        alfs.io.read_page(&mut scratch, pblk)?;
        request.pages_mut()[i].copy_from_page(&scratch);
    }
    Ok(())
}

/// Looks up the physical block backing `lblk` for a read.
///
/// An entry outside the metadata-log region is treated as unmapped; it is
/// also logged, unless it is zero (the host's null address, which stale
/// records may carry).
fn resolve_mapped(alfs: &Alfs, lblk: u32) -> Result<u32, Error> {
    let state = alfs.state.lock();
    let raw = state.map.raw_entry(lblk - alfs.geometry.metalog_base);
    if raw == UNMAPPED {
        return Err(Error::UnmappedRead);
    }
    if !alfs.geometry.contains_physical(raw) {
        if raw != 0 {
            error!("invalid pblkaddr {} mapped for lblkaddr {}", raw, lblk);
        }
        return Err(Error::UnmappedRead);
    }
    let cell = state.summary.get(raw);
    if cell != BlockState::Valid {
        warn!("the summary table is incorrect: pblkaddr={} ({:?})", raw, cell);
    }
    Ok(raw)
}
