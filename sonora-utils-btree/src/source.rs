// SPDX-FileCopyrightText: 2026 Sonora Contributors
// SPDX-License-Identifier: MIT

//! Where pages come from.

use std::collections::HashMap;

use crate::error::{BtreeError, Result};

/// Supplies raw page bytes by page number.
///
/// Implementations decide how pages are fetched (a virtual table, positioned
/// file reads, memory). The walker only requires that every page has exactly
/// [`PageSource::page_size`] bytes.
pub trait PageSource {
    /// Size in bytes of every page of the database.
    fn page_size(&self) -> usize;

    /// Replace the contents of `buf` with page `pgno` (1-based).
    fn read_page(&mut self, pgno: u32, buf: &mut Vec<u8>) -> Result<()>;
}

impl<S: PageSource + ?Sized> PageSource for &mut S {
    fn page_size(&self) -> usize {
        (**self).page_size()
    }

    fn read_page(&mut self, pgno: u32, buf: &mut Vec<u8>) -> Result<()> {
        (**self).read_page(pgno, buf)
    }
}

/// Pages held in memory, keyed by page number.
#[derive(Debug, Clone, Default)]
pub struct MemoryPages {
    page_size: usize,
    pages: HashMap<u32, Vec<u8>>,
    reads: usize,
}

impl MemoryPages {
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size,
            pages: HashMap::new(),
            reads: 0,
        }
    }

    pub fn insert(&mut self, pgno: u32, data: Vec<u8>) {
        self.pages.insert(pgno, data);
    }

    /// How many pages have been read so far.
    pub fn reads(&self) -> usize {
        self.reads
    }
}

impl PageSource for MemoryPages {
    fn page_size(&self) -> usize {
        self.page_size
    }

    fn read_page(&mut self, pgno: u32, buf: &mut Vec<u8>) -> Result<()> {
        let page = self
            .pages
            .get(&pgno)
            .ok_or_else(|| BtreeError::from_source(pgno, format!("no page {pgno}")))?;
        buf.clear();
        buf.extend_from_slice(page);
        self.reads += 1;
        Ok(())
    }
}
