// SPDX-FileCopyrightText: 2026 Sonora Contributors
// SPDX-License-Identifier: MIT

//! A single b-tree page and its cells.

use crate::error::{BtreeError, Result};
use crate::varint::{get2, get4, read_varint};

/// Page 1 starts with the 100-byte database file header.
const FILE_HEADER_LEN: usize = 100;

/// The two page types a rowid table is built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageKind {
    /// Routing page: cells hold a child page and the largest rowid below it
    InteriorTable,
    /// Terminal page: cells hold a row's payload size and rowid
    LeafTable,
}

impl PageKind {
    pub const INTERIOR_FLAG: u8 = 0x05;
    pub const LEAF_FLAG: u8 = 0x0d;

    fn from_flag(flag: u8) -> Option<Self> {
        match flag {
            Self::INTERIOR_FLAG => Some(Self::InteriorTable),
            Self::LEAF_FLAG => Some(Self::LeafTable),
            _ => None,
        }
    }

    /// Length of the page header; the cell pointer array follows it.
    pub fn header_len(self) -> usize {
        match self {
            Self::InteriorTable => 12,
            Self::LeafTable => 8,
        }
    }
}

/// Cell of an interior table page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InteriorCell {
    /// Page holding rows with keys up to and including `max_key`
    pub child: u32,
    /// Largest rowid stored under `child`
    pub max_key: i64,
}

/// Cell of a leaf table page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeafCell {
    /// Total payload bytes of the row, including any overflow
    pub payload_size: u64,
    /// The row's integer key
    pub row_id: i64,
}

/// Raw bytes of one page together with its page number.
#[derive(Debug, Clone)]
pub struct Page {
    pgno: u32,
    kind: PageKind,
    data: Vec<u8>,
}

impl Page {
    /// Wrap page bytes, checking that the type flag names a table b-tree page.
    pub fn new(pgno: u32, data: Vec<u8>) -> Result<Self> {
        let header = header_offset(pgno);
        let flag = *data
            .get(header)
            .ok_or(BtreeError::Truncated { pgno, offset: header })?;
        let kind =
            PageKind::from_flag(flag).ok_or(BtreeError::UnexpectedPageType { pgno, flag })?;
        let page = Self { pgno, kind, data };
        // Make sure the fixed header is all there before anyone indexes into it.
        page.bytes(header, kind.header_len())?;
        Ok(page)
    }

    pub fn pgno(&self) -> u32 {
        self.pgno
    }

    pub fn kind(&self) -> PageKind {
        self.kind
    }

    /// Give the buffer back so it can be reused for another page.
    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    /// Number of cells on the page.
    pub fn cell_count(&self) -> Result<u16> {
        let at = header_offset(self.pgno) + 3;
        get2(self.bytes(at, 2)?).ok_or_else(|| self.truncated(at))
    }

    /// The right-most child of an interior page, holding keys above every cell.
    pub fn right_child(&self) -> Result<u32> {
        debug_assert_eq!(self.kind, PageKind::InteriorTable);
        let at = header_offset(self.pgno) + 8;
        let child = get4(self.bytes(at, 4)?).ok_or_else(|| self.truncated(at))?;
        self.check_child(child)
    }

    /// Decode cell `index` of an interior page.
    pub fn interior_cell(&self, index: u16) -> Result<InteriorCell> {
        debug_assert_eq!(self.kind, PageKind::InteriorTable);
        let offset = self.cell_offset(index)?;
        let child = get4(self.bytes(offset, 4)?).ok_or_else(|| self.truncated(offset))?;
        let (key, _) = self.varint_at(offset + 4)?;
        Ok(InteriorCell {
            child: self.check_child(child)?,
            max_key: key as i64,
        })
    }

    /// Decode cell `index` of a leaf page.
    pub fn leaf_cell(&self, index: u16) -> Result<LeafCell> {
        debug_assert_eq!(self.kind, PageKind::LeafTable);
        let offset = self.cell_offset(index)?;
        let (payload_size, used) = self.varint_at(offset)?;
        let (row_id, _) = self.varint_at(offset + used)?;
        Ok(LeafCell {
            payload_size,
            row_id: row_id as i64,
        })
    }

    fn cell_offset(&self, index: u16) -> Result<usize> {
        let at = header_offset(self.pgno) + self.kind.header_len() + 2 * usize::from(index);
        let offset = get2(self.bytes(at, 2)?).ok_or_else(|| self.truncated(at))?;
        Ok(usize::from(offset))
    }

    fn varint_at(&self, offset: usize) -> Result<(u64, usize)> {
        let tail = self.data.get(offset..).ok_or_else(|| self.truncated(offset))?;
        read_varint(tail).ok_or_else(|| self.truncated(offset))
    }

    fn bytes(&self, offset: usize, len: usize) -> Result<&[u8]> {
        self.data
            .get(offset..offset + len)
            .ok_or_else(|| self.truncated(offset))
    }

    fn check_child(&self, child: u32) -> Result<u32> {
        if child == 0 {
            return Err(BtreeError::InvalidChild {
                pgno: self.pgno,
                child,
            });
        }
        Ok(child)
    }

    fn truncated(&self, offset: usize) -> BtreeError {
        BtreeError::Truncated {
            pgno: self.pgno,
            offset,
        }
    }
}

fn header_offset(pgno: u32) -> usize {
    if pgno == 1 { FILE_HEADER_LEN } else { 0 }
}
