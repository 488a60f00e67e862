// SPDX-FileCopyrightText: 2026 Sonora Contributors
// SPDX-License-Identifier: MIT

//! Disk usage of sample blocks from a direct walk of the table b-tree.
//!
//! Every figure here is the record payload size stored in the leaf cells of
//! `sampleblocks` (see [`SampleBlockData::record_size`](crate::SampleBlockData::record_size)).
//! Reading cell headers touches one page per few hundred rows, which is far
//! cheaper than pulling every blob through the query layer.

use std::fs::File;
use std::ops::ControlFlow;
use std::os::unix::fs::FileExt;

use rusqlite::{CachedStatement, OptionalExtension, params};
use sonora_utils_btree::{self as btree, BtreeError, PageSource};
use tracing::{debug, trace};

use crate::connection::StoreConnection;
use crate::error::{DbContext, Error, Result};
use crate::types::{BlockIdSet, SampleBlockId};

/// Pages served by the `sqlite_dbpage` virtual table, which sees the
/// connection's own uncommitted changes.
struct DbPageSource<'c> {
    stmt: CachedStatement<'c>,
    page_size: usize,
}

impl PageSource for DbPageSource<'_> {
    fn page_size(&self) -> usize {
        self.page_size
    }

    fn read_page(&mut self, pgno: u32, buf: &mut Vec<u8>) -> btree::Result<()> {
        *buf = self
            .stmt
            .query_row(params![pgno], |row| row.get::<_, Vec<u8>>(0))
            .map_err(|e| BtreeError::from_source(pgno, e))?;
        Ok(())
    }
}

/// Pages read straight from the database file.
///
/// Only valid once the write-ahead log has been checkpointed into the file.
struct FilePageSource<'f> {
    file: &'f File,
    page_size: usize,
}

impl PageSource for FilePageSource<'_> {
    fn page_size(&self) -> usize {
        self.page_size
    }

    fn read_page(&mut self, pgno: u32, buf: &mut Vec<u8>) -> btree::Result<()> {
        let index = pgno
            .checked_sub(1)
            .ok_or_else(|| BtreeError::from_source(pgno, "page numbers start at 1"))?;
        buf.resize(self.page_size, 0);
        self.file
            .read_exact_at(buf, u64::from(index) * self.page_size as u64)
            .map_err(|e| BtreeError::from_source(pgno, e))
    }
}

/// Where the walker gets its pages from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PageAccess {
    /// `sqlite_dbpage` when available, file reads otherwise
    Auto,
    /// File reads only
    #[cfg(test)]
    File,
}

impl StoreConnection {
    /// Total payload bytes of every sample block.
    pub fn total_usage(&self) -> Result<u64> {
        self.total_usage_with(|| true)
    }

    /// Like [`total_usage`](Self::total_usage), consulting `keep_going`
    /// before each row and failing with [`Error::Cancelled`] when it says no.
    pub fn total_usage_with<F>(&self, mut keep_going: F) -> Result<u64>
    where
        F: FnMut() -> bool,
    {
        let total = self.walk_blocks(PageAccess::Auto, |source, root| {
            btree::total_payload(source, root, &mut keep_going)
        })?;
        Ok(total.unwrap_or(0))
    }

    /// Payload bytes of block `id`, or 0 when it does not exist.
    pub fn block_usage(&self, id: SampleBlockId) -> Result<u64> {
        let size = self.walk_blocks(PageAccess::Auto, |source, root| {
            btree::row_payload(source, root, id)
        })?;
        Ok(size.flatten().unwrap_or(0))
    }

    /// Payload bytes of the blocks in `ids`, in one pass over the table.
    pub fn live_usage(&self, ids: &BlockIdSet) -> Result<u64> {
        self.live_usage_with(ids, || true)
    }

    /// Like [`live_usage`](Self::live_usage), consulting `keep_going` before
    /// each row and failing with [`Error::Cancelled`] when it says no.
    pub fn live_usage_with<F>(&self, ids: &BlockIdSet, mut keep_going: F) -> Result<u64>
    where
        F: FnMut() -> bool,
    {
        let mut total = 0u64;
        let completed = self.walk_blocks(PageAccess::Auto, |source, root| {
            btree::scan_rows(source, root, |cell| {
                if !keep_going() {
                    return ControlFlow::Break(());
                }
                if ids.contains(&cell.row_id) {
                    total += cell.payload_size;
                }
                ControlFlow::Continue(())
            })
        })?;
        if completed == Some(false) {
            return Err(Error::Cancelled);
        }
        Ok(total)
    }

    /// Run `walk` over the `sampleblocks` b-tree. `None` when the table does
    /// not exist.
    fn walk_blocks<T, F>(&self, access: PageAccess, walk: F) -> Result<Option<T>>
    where
        F: FnOnce(&mut dyn PageSource, u32) -> btree::Result<T>,
    {
        let Some(root) = self.sample_blocks_root()? else {
            return Ok(None);
        };
        let page_size = self.page_size()?;

        if access == PageAccess::Auto
            && let Ok(stmt) = self
                .conn
                .prepare_cached("SELECT data FROM sqlite_dbpage WHERE pgno = ?1")
        {
            trace!(root, "Walking sample blocks through sqlite_dbpage");
            let mut source = DbPageSource { stmt, page_size };
            return Ok(Some(walk(&mut source, root)?));
        }

        self.checkpoint_for_reads()?;
        trace!(root, "Walking sample blocks through file reads");
        let mut source = FilePageSource {
            file: self.page_file()?,
            page_size,
        };
        Ok(Some(walk(&mut source, root)?))
    }

    fn sample_blocks_root(&self) -> Result<Option<u32>> {
        self.conn
            .query_row(
                "SELECT rootpage FROM main.sqlite_master WHERE type = 'table' AND name = 'sampleblocks'",
                [],
                |row| row.get(0),
            )
            .optional()
            .db_context(|| "Failed to find the sample block table".to_string())
    }

    fn page_size(&self) -> Result<usize> {
        let size: i64 = self
            .conn
            .query_row("PRAGMA main.page_size", [], |row| row.get(0))
            .db_context(|| "Failed to read page size".to_string())?;
        Ok(size as usize)
    }

    /// Move every committed page from the write-ahead log into the file.
    fn checkpoint_for_reads(&self) -> Result<()> {
        if !self.is_autocommit() {
            return Err(Error::UsageUnavailable {
                reason: "pages cannot be read from the file inside a transaction".to_string(),
            });
        }
        let (busy, log, checkpointed): (i64, i64, i64) = self
            .conn
            .query_row("PRAGMA main.wal_checkpoint(TRUNCATE)", [], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })
            .db_context(|| "Failed to checkpoint the write-ahead log".to_string())?;
        if busy != 0 {
            return Err(Error::UsageUnavailable {
                reason: "the write-ahead log is busy".to_string(),
            });
        }
        debug!(log, checkpointed, "Checkpointed write-ahead log for page reads");
        Ok(())
    }

    /// Handle used for positioned page reads; opened on first use and kept
    /// for the life of the connection.
    fn page_file(&self) -> Result<&File> {
        if let Some(file) = self.page_file.get() {
            return Ok(file);
        }
        let file = File::open(self.path()).map_err(|e| {
            Error::io(
                format!("Failed to open {} for page reads", self.path().display()),
                e,
            )
        })?;
        Ok(self.page_file.get_or_init(|| file))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::types::{SampleBlockData, SampleFormat};
    use rstest::rstest;

    fn open() -> (tempfile::TempDir, StoreConnection) {
        let dir = tempfile::tempdir().unwrap();
        let db = StoreConnection::open(dir.path().join("u.sonora"), &StoreConfig::default())
            .unwrap();
        (dir, db)
    }

    fn data(samples: usize) -> SampleBlockData {
        SampleBlockData {
            sample_format: SampleFormat::Float,
            sum_min: -0.75,
            sum_max: 0.75,
            sum_rms: 0.125,
            summary256: vec![1; samples / 256 * 12],
            summary64k: Vec::new(),
            samples: vec![7; samples],
        }
    }

    fn walk_total(db: &StoreConnection, access: PageAccess) -> u64 {
        db.walk_blocks(access, |source, root| {
            btree::total_payload(source, root, || true)
        })
        .unwrap()
        .unwrap()
    }

    #[rstest]
    #[case(PageAccess::Auto)]
    #[case(PageAccess::File)]
    fn test_empty_table(#[case] access: PageAccess) {
        let (_dir, db) = open();
        assert_eq!(walk_total(&db, access), 0);
        assert_eq!(db.block_usage(1).unwrap(), 0);
    }

    #[rstest]
    #[case(PageAccess::Auto)]
    #[case(PageAccess::File)]
    fn test_total_matches_record_sizes(#[case] access: PageAccess) {
        let (_dir, db) = open();
        // Enough rows to need interior pages, plus rows that overflow a page
        let mut expected = 0;
        for i in 0..3000 {
            let block = data(if i % 500 == 0 { 200_000 } else { 40 + i % 300 });
            expected += block.record_size();
            db.insert_block(&block).unwrap();
        }

        assert_eq!(walk_total(&db, access), expected);
        assert_eq!(db.total_usage().unwrap(), expected);
    }

    #[test]
    fn test_block_usage_matches_record_size() {
        let (_dir, db) = open();
        let mut sizes = Vec::new();
        for i in 0..2000 {
            let block = data(30 + i % 700);
            sizes.push((db.insert_block(&block).unwrap(), block.record_size()));
        }

        for (id, size) in &sizes {
            assert_eq!(db.block_usage(*id).unwrap(), *size, "block {id}");
        }
        assert_eq!(db.block_usage(0).unwrap(), 0);
        assert_eq!(db.block_usage(sizes.len() as i64 + 1).unwrap(), 0);
    }

    #[test]
    fn test_live_usage_sums_members() {
        let (_dir, db) = open();
        let a = db.insert_block(&data(100)).unwrap();
        let b = db.insert_block(&data(200)).unwrap();
        let c = db.insert_block(&data(300)).unwrap();

        let live = BlockIdSet::from([a, c, 1000]);
        assert_eq!(
            db.live_usage(&live).unwrap(),
            data(100).record_size() + data(300).record_size()
        );
        assert_eq!(
            db.live_usage(&BlockIdSet::from([b])).unwrap(),
            db.block_usage(b).unwrap()
        );
    }

    #[test]
    fn test_cancelled_scan() {
        let (_dir, db) = open();
        for _ in 0..10 {
            db.insert_block(&data(10)).unwrap();
        }
        let mut budget = 3;
        let err = db
            .total_usage_with(|| {
                budget -= 1;
                budget >= 0
            })
            .unwrap_err();
        assert!(err.is_cancelled());
    }

    #[test]
    fn test_cancelled_live_scan() {
        let (_dir, db) = open();
        for _ in 0..10 {
            db.insert_block(&data(10)).unwrap();
        }
        let live: BlockIdSet = (1..=10).collect();

        let mut rows = 0;
        let err = db
            .live_usage_with(&live, || {
                rows += 1;
                rows <= 4
            })
            .unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(rows, 5);

        assert_eq!(db.live_usage_with(&live, || true).unwrap(), db.total_usage().unwrap());
    }

    #[test]
    fn test_file_reads_refused_inside_transaction() {
        let (_dir, db) = open();
        db.savepoint_start("busy").unwrap();
        let err = db
            .walk_blocks(PageAccess::File, |source, root| {
                btree::total_payload(source, root, || true)
            })
            .unwrap_err();
        assert!(matches!(err, Error::UsageUnavailable { .. }));
        db.savepoint_rollback("busy").unwrap();
    }
}
