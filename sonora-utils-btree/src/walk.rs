// SPDX-FileCopyrightText: 2026 Sonora Contributors
// SPDX-License-Identifier: MIT

//! Iterative traversal of a rowid table b-tree.
//!
//! Because the table key is the rowid, visiting interior cells in stored
//! order and then the right-most child yields rows in ascending rowid order.

use std::ops::ControlFlow;

use tracing::trace;

use crate::error::{BtreeError, Result};
use crate::page::{LeafCell, Page, PageKind};
use crate::source::PageSource;

/// Upper bound on tree depth. A 64 KiB-page table would need more rows than
/// fit in any file to get anywhere close.
pub const MAX_DEPTH: usize = 64;

/// One level of the traversal.
struct Frame {
    page: Page,
    cells: u16,
    next_cell: u16,
    right_visited: bool,
}

/// Reads pages and recycles their buffers.
struct Loader<'s, S: ?Sized> {
    source: &'s mut S,
    spare: Vec<Vec<u8>>,
}

impl<'s, S: PageSource + ?Sized> Loader<'s, S> {
    fn new(source: &'s mut S) -> Self {
        Self {
            source,
            spare: Vec::new(),
        }
    }

    fn load(&mut self, pgno: u32) -> Result<Page> {
        let mut buf = self.spare.pop().unwrap_or_default();
        self.source.read_page(pgno, &mut buf)?;
        let expected = self.source.page_size();
        if buf.len() != expected {
            return Err(BtreeError::PageSizeMismatch {
                pgno,
                expected,
                found: buf.len(),
            });
        }
        Page::new(pgno, buf)
    }

    fn recycle(&mut self, page: Page) {
        self.spare.push(page.into_data());
    }
}

/// Visit every leaf cell of the table rooted at `root` in ascending rowid
/// order.
///
/// `visit` is called once per row and may return [`ControlFlow::Break`] to
/// stop early. Returns `true` when the whole table was visited.
pub fn scan_rows<S, F>(source: &mut S, root: u32, mut visit: F) -> Result<bool>
where
    S: PageSource + ?Sized,
    F: FnMut(LeafCell) -> ControlFlow<()>,
{
    let mut loader = Loader::new(source);
    let mut stack: Vec<Frame> = Vec::new();
    let root_page = loader.load(root)?;
    stack.push(Frame {
        cells: root_page.cell_count()?,
        page: root_page,
        next_cell: 0,
        right_visited: false,
    });

    while let Some(frame) = stack.last_mut() {
        let descend = match frame.page.kind() {
            PageKind::InteriorTable => {
                if frame.next_cell < frame.cells {
                    let cell = frame.page.interior_cell(frame.next_cell)?;
                    frame.next_cell += 1;
                    Some(cell.child)
                } else if !frame.right_visited {
                    frame.right_visited = true;
                    Some(frame.page.right_child()?)
                } else {
                    None
                }
            }
            PageKind::LeafTable => {
                for index in 0..frame.cells {
                    if visit(frame.page.leaf_cell(index)?).is_break() {
                        return Ok(false);
                    }
                }
                None
            }
        };

        match descend {
            Some(child) => {
                if stack.len() >= MAX_DEPTH {
                    return Err(BtreeError::TooDeep(MAX_DEPTH));
                }
                let page = loader.load(child)?;
                trace!(pgno = child, depth = stack.len(), "descending");
                stack.push(Frame {
                    cells: page.cell_count()?,
                    page,
                    next_cell: 0,
                    right_visited: false,
                });
            }
            None => {
                if let Some(done) = stack.pop() {
                    loader.recycle(done.page);
                }
            }
        }
    }

    Ok(true)
}

/// Sum of the payload sizes of every row in the table.
///
/// `keep_going` is consulted before each row; returning `false` aborts the
/// scan with [`BtreeError::Cancelled`].
pub fn total_payload<S, F>(source: &mut S, root: u32, mut keep_going: F) -> Result<u64>
where
    S: PageSource + ?Sized,
    F: FnMut() -> bool,
{
    let mut total = 0u64;
    let finished = scan_rows(source, root, |cell| {
        if !keep_going() {
            return ControlFlow::Break(());
        }
        total += cell.payload_size;
        ControlFlow::Continue(())
    })?;
    if !finished {
        return Err(BtreeError::Cancelled);
    }
    Ok(total)
}

/// Payload size of the row with key `row_id`, or `None` when the leaf that
/// would hold it does not.
///
/// Only one root-to-leaf path is read: at each interior page the first cell
/// whose largest key is at least `row_id` is followed, or the right-most
/// child when there is none.
pub fn row_payload<S>(source: &mut S, root: u32, row_id: i64) -> Result<Option<u64>>
where
    S: PageSource + ?Sized,
{
    let mut loader = Loader::new(source);
    let mut pgno = root;
    for _ in 0..MAX_DEPTH {
        let page = loader.load(pgno)?;
        let cells = page.cell_count()?;
        match page.kind() {
            PageKind::InteriorTable => {
                let mut next = None;
                for index in 0..cells {
                    let cell = page.interior_cell(index)?;
                    if row_id <= cell.max_key {
                        next = Some(cell.child);
                        break;
                    }
                }
                pgno = match next {
                    Some(child) => child,
                    None => page.right_child()?,
                };
                loader.recycle(page);
            }
            PageKind::LeafTable => {
                for index in 0..cells {
                    let cell = page.leaf_cell(index)?;
                    if cell.row_id == row_id {
                        return Ok(Some(cell.payload_size));
                    }
                }
                return Ok(None);
            }
        }
    }
    Err(BtreeError::TooDeep(MAX_DEPTH))
}
