//! An owned one-block buffer.
//!
//! Every in-flight transfer owns its `Page`; completion contexts release
//! them deterministically instead of sharing raw buffer pointers.

use alloc::boxed::Box;
use crate::BLOCK_SIZE;

/// A heap-allocated, block-sized byte buffer.
pub struct Page(Box<[u8; BLOCK_SIZE]>);

impl Page {
    /// Allocates a new zero-filled page.
    pub fn new() -> Page {
        Page(Box::new([0u8; BLOCK_SIZE]))
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0[..]
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.0[..]
    }

    /// Copies the full contents of `other` into this page.
    pub fn copy_from_page(&mut self, other: &Page) {
        self.0.copy_from_slice(&other.0[..]);
    }

    /// Fills the whole page with `byte`.
    pub fn fill(&mut self, byte: u8) {
        for b in self.0.iter_mut() {
            *b = byte;
        }
    }
}

impl Default for Page {
    fn default() -> Page {
        Page::new()
    }
}

impl Clone for Page {
    fn clone(&self) -> Page {
        let mut page = Page::new();
        page.copy_from_page(self);
        page
    }
}
