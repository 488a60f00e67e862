// SPDX-FileCopyrightText: 2026 Sonora Contributors
// SPDX-License-Identifier: MIT

//! Errors raised while decoding pages.

use thiserror::Error;

/// Result type for b-tree walking.
pub type Result<T> = std::result::Result<T, BtreeError>;

#[derive(Error, Debug)]
pub enum BtreeError {
    /// A field extends past the end of the page
    #[error("page {pgno} is truncated at offset {offset}")]
    Truncated { pgno: u32, offset: usize },

    /// The page is not part of a rowid table b-tree
    #[error("page {pgno} has unexpected type flag {flag:#04x}")]
    UnexpectedPageType { pgno: u32, flag: u8 },

    /// The page source returned a buffer of the wrong length
    #[error("page {pgno} is {found} bytes, expected {expected}")]
    PageSizeMismatch {
        pgno: u32,
        expected: usize,
        found: usize,
    },

    /// Child pointer that cannot be a valid page
    #[error("page {pgno} points to invalid child page {child}")]
    InvalidChild { pgno: u32, child: u32 },

    /// The tree is deeper than any sane database can produce
    #[error("b-tree deeper than {0} levels, file is likely corrupt")]
    TooDeep(usize),

    /// The caller asked the scan to stop
    #[error("scan cancelled")]
    Cancelled,

    /// The page source failed to deliver a page
    #[error("failed to read page {pgno}: {source}")]
    Source {
        pgno: u32,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl BtreeError {
    pub fn from_source(pgno: u32, source: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::Source {
            pgno,
            source: source.into(),
        }
    }
}
