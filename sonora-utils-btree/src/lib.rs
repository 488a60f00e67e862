// SPDX-FileCopyrightText: 2026 Sonora Contributors
// SPDX-License-Identifier: MIT

//! Page-level access to SQLite table b-trees.
//!
//! This crate reads the on-disk format described at
//! <https://www.sqlite.org/fileformat.html> far enough to enumerate the cells
//! of a rowid table: interior pages (`0x05`) route by the largest rowid of
//! each child, leaf pages (`0x0d`) carry the payload size and rowid of every
//! row.
//!
//! **Architecture**: This is the Format Layer under `sonora-store-db`'s usage
//! accounting. It never writes and knows nothing about connections.
//!
//! # Example
//!
//! ```ignore
//! use sonora_utils_btree::{total_payload, row_payload};
//!
//! let total = total_payload(&mut source, root_page)?;
//! let one = row_payload(&mut source, root_page, 42)?.unwrap_or(0);
//! ```

mod error;
mod page;
mod source;
mod varint;
mod walk;

pub use error::{BtreeError, Result};
pub use page::{InteriorCell, LeafCell, Page, PageKind};
pub use source::{MemoryPages, PageSource};
pub use varint::{get2, get4, read_varint, varint_len};
pub use walk::{MAX_DEPTH, row_payload, scan_rows, total_payload};

/// Page size the project store is created with.
pub const DEFAULT_PAGE_SIZE: usize = 65536;
